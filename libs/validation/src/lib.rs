//! Request validation for the trusted host.
//!
//! The trusted host is the only stage that decides whether a request may
//! travel toward the proxy. A request passes when:
//! - its method is one of `GET`, `POST`, `PUT`, `DELETE`
//! - a statement can be extracted from it (path, `query` parameter or JSON body)
//! - the statement matches one of the accepted shapes
//! - in read-only mode, the statement is a `SELECT`
//!
//! Validation never fails with an error: every outcome is a [`ValidationVerdict`].

use std::fmt;

mod request;
mod statement;

pub use request::{extract_statement, InboundRequest};
pub use statement::{classify, StatementShape};

/// Methods that may be forwarded.
pub const ALLOWED_METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Method outside the allow-list.
    MethodNotAllowed,
    /// No statement found in the request.
    MissingStatement,
    /// Body was expected to be JSON and was not.
    MalformedPayload,
    /// Statement does not match any accepted shape.
    UnrecognizedStatement,
    /// Write statement on a read-only endpoint.
    WriteNotAllowed,
}

impl RejectReason {
    /// Stable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "method_not_allowed",
            Self::MissingStatement => "missing_statement",
            Self::MalformedPayload => "malformed_payload",
            Self::UnrecognizedStatement => "unrecognized_statement",
            Self::WriteNotAllowed => "write_not_allowed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of validating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Pass { shape: StatementShape },
    Fail { reason: RejectReason },
}

impl ValidationVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    /// Rejection reason, if any.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Pass { .. } => None,
            Self::Fail { reason } => Some(*reason),
        }
    }
}

impl From<Result<StatementShape, RejectReason>> for ValidationVerdict {
    fn from(result: Result<StatementShape, RejectReason>) -> Self {
        match result {
            Ok(shape) => Self::Pass { shape },
            Err(reason) => Self::Fail { reason },
        }
    }
}

/// Acceptance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// All four statement shapes.
    #[default]
    General,
    /// `SELECT` only.
    ReadOnly,
}

/// Syntactic request validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    mode: ValidationMode,
}

impl Validator {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    /// Validator accepting every statement shape.
    pub fn general() -> Self {
        Self::new(ValidationMode::General)
    }

    /// Validator accepting `SELECT` statements only.
    pub fn read_only() -> Self {
        Self::new(ValidationMode::ReadOnly)
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Validate a full inbound request.
    pub fn validate(&self, request: &InboundRequest) -> ValidationVerdict {
        if !is_allowed_method(&request.method) {
            return ValidationVerdict::Fail {
                reason: RejectReason::MethodNotAllowed,
            };
        }

        extract_statement(request)
            .and_then(|sql| self.check_shape(&sql))
            .into()
    }

    /// Validate an already extracted statement.
    pub fn check_statement(&self, method: &str, sql: &str) -> ValidationVerdict {
        if !is_allowed_method(method) {
            return ValidationVerdict::Fail {
                reason: RejectReason::MethodNotAllowed,
            };
        }
        self.check_shape(sql).into()
    }

    fn check_shape(&self, sql: &str) -> Result<StatementShape, RejectReason> {
        let shape = classify(sql).ok_or(RejectReason::UnrecognizedStatement)?;
        if self.mode == ValidationMode::ReadOnly && !shape.is_read() {
            return Err(RejectReason::WriteNotAllowed);
        }
        Ok(shape)
    }
}

fn is_allowed_method(method: &str) -> bool {
    ALLOWED_METHODS.contains(&method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("PATCH")]
    #[case("HEAD")]
    #[case("OPTIONS")]
    #[case("TRACE")]
    #[case("get")]
    fn test_disallowed_methods_fail(#[case] method: &str) {
        let request = InboundRequest::new(method).with_path_statement("SELECT * FROM film");
        assert_eq!(
            Validator::general().validate(&request).reason(),
            Some(RejectReason::MethodNotAllowed)
        );
        assert_eq!(
            Validator::read_only().validate(&request).reason(),
            Some(RejectReason::MethodNotAllowed)
        );
    }

    #[rstest]
    #[case("SELECT * FROM film LIMIT 5", true)]
    #[case("select * from film;", true)]
    #[case("INSERT INTO actor VALUES (1, 'x')", false)]
    #[case("UPDATE film SET title = 'x' WHERE film_id = 1", false)]
    #[case("DELETE FROM film;", false)]
    fn test_modes(#[case] sql: &str, #[case] read: bool) {
        for method in ALLOWED_METHODS {
            assert!(Validator::general().check_statement(method, sql).is_pass());
            let strict = Validator::read_only().check_statement(method, sql);
            assert_eq!(strict.is_pass(), read, "{method} {sql}");
            if !read {
                assert_eq!(strict.reason(), Some(RejectReason::WriteNotAllowed));
            }
        }
    }

    #[test]
    fn test_drop_table_rejected() {
        let request = InboundRequest::new("POST").with_body(r#"{"query":"DROP TABLE film"}"#);
        assert_eq!(
            Validator::general().validate(&request),
            ValidationVerdict::Fail {
                reason: RejectReason::UnrecognizedStatement
            }
        );
    }

    #[test]
    fn test_get_with_query_param_passes() {
        let request = InboundRequest::new("GET").with_query_param("SELECT * FROM film LIMIT 5");
        assert_eq!(
            Validator::read_only().validate(&request),
            ValidationVerdict::Pass {
                shape: StatementShape::Select
            }
        );
    }

    #[test]
    fn test_malformed_body_yields_fail_verdict() {
        let request = InboundRequest::new("POST").with_body("not json");
        assert_eq!(
            Validator::general().validate(&request).reason(),
            Some(RejectReason::MalformedPayload)
        );
    }

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(RejectReason::WriteNotAllowed.code(), "write_not_allowed");
        assert_eq!(RejectReason::MethodNotAllowed.to_string(), "method_not_allowed");
    }
}
