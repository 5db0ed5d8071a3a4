use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-item rejection reported by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponseError {
    pub index: usize,
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
}

/// Ingestion acknowledgement body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub items_received: usize,
    pub items_accepted: usize,
    #[serde(default)]
    pub errors: Vec<ApiResponseError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResponseBody {
    Parsed(ApiResponse),
    /// Body that was not a recognizable acknowledgement, decoded lossily.
    Raw(String),
    #[default]
    Empty,
}

impl ResponseBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }

    pub fn parsed(&self) -> Option<&ApiResponse> {
        match self {
            ResponseBody::Parsed(response) => Some(response),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Parsed(r) => write!(
                f,
                "received={} accepted={} errors={}",
                r.items_received,
                r.items_accepted,
                r.errors.len()
            ),
            ResponseBody::Raw(text) => f.write_str(text),
            ResponseBody::Empty => f.write_str("<empty>"),
        }
    }
}

/// Parses an ingestion response body. Never fails: anything that is not an
/// acknowledgement comes back as raw text, and no bytes come back as `Empty`.
pub fn deserialize_response(body: &[u8]) -> ResponseBody {
    if body.is_empty() {
        return ResponseBody::Empty;
    }
    match serde_json::from_slice::<ApiResponse>(body) {
        Ok(parsed) => ResponseBody::Parsed(parsed),
        Err(_) => ResponseBody::Raw(String::from_utf8_lossy(body).into_owned()),
    }
}
