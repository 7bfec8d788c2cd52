//! Wire types shared by the HTTP surface and the streaming relay.

use serde::{Deserialize, Serialize};

/// Request body for the execute endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

/// Response body for non-streaming execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub output: String,
    pub error: Option<String>,
}

/// One frame on the streaming wire.
///
/// Serialized as the `data:` payload of a server-sent event. A stream is
/// zero or more `Output`/`Error` frames followed by exactly one `Complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Output {
        content: String,
    },
    Error {
        content: String,
    },
    Complete {
        #[serde(rename = "returnCode")]
        return_code: i32,
    },
}

impl StreamFrame {
    /// Terminal frame for a finished stream.
    #[must_use]
    pub const fn complete(return_code: i32) -> Self {
        Self::Complete { return_code }
    }
}
