//! Inbound request view and statement extraction.

use bytes::Bytes;
use serde::Deserialize;

use crate::RejectReason;

/// What validation needs to know about an inbound request.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// HTTP method as sent by the client.
    pub method: String,

    /// Statement embedded in the path (`/{route}/{statement}`), already decoded.
    pub path_statement: Option<String>,

    /// Value of the `query` query parameter, already decoded.
    pub query_param: Option<String>,

    /// Raw request body.
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_path_statement(mut self, statement: impl Into<String>) -> Self {
        self.path_statement = Some(statement.into());
        self
    }

    pub fn with_query_param(mut self, statement: impl Into<String>) -> Self {
        self.query_param = Some(statement.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    query: Option<String>,
}

/// Pull the SQL text out of a request.
///
/// Precedence: path-embedded statement, then the `query` parameter for `GET`,
/// then the `query` field of a JSON body for every other method.
pub fn extract_statement(request: &InboundRequest) -> Result<String, RejectReason> {
    if let Some(statement) = &request.path_statement {
        return Ok(statement.clone());
    }

    if request.method == "GET" {
        return request
            .query_param
            .clone()
            .ok_or(RejectReason::MissingStatement);
    }

    if request.body.iter().all(u8::is_ascii_whitespace) {
        return Err(RejectReason::MissingStatement);
    }

    let body: QueryBody =
        serde_json::from_slice(&request.body).map_err(|_| RejectReason::MalformedPayload)?;
    body.query.ok_or(RejectReason::MissingStatement)
}
