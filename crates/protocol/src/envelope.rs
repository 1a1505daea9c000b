use serde::{Deserialize, Serialize};

use crate::constants::{CODE_INVALID, CODE_OK, CODE_SERVER_ERROR};

/// Envelope for every HTTP response.
///
/// `code` defaults to 200 when the field is absent, matching the server's
/// behaviour of only spelling out non-default codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T = serde_json::Value> {
    #[serde(default = "default_code")]
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn default_code() -> u16 {
    CODE_OK
}

impl<T> ApiResponse<T> {
    /// Creates a successful response carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_OK,
            msg: None,
            data: Some(data),
        }
    }

    /// Creates a successful response with a message.
    pub fn ok_with_msg(data: T, msg: impl Into<String>) -> Self {
        Self {
            code: CODE_OK,
            msg: Some(msg.into()),
            data: Some(data),
        }
    }

    /// Creates a response with an arbitrary code.
    pub fn with_code(code: u16, msg: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code,
            msg: Some(msg.into()),
            data,
        }
    }

    /// Returns `true` if the envelope reports success.
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// Returns `true` for client-input failures (415).
    pub fn is_invalid(&self) -> bool {
        self.code == CODE_INVALID
    }

    /// Returns `true` for server-side failures (500).
    pub fn is_server_error(&self) -> bool {
        self.code == CODE_SERVER_ERROR
    }
}

impl ApiResponse<serde_json::Value> {
    /// Creates a 415 response for a client-input problem.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::with_code(CODE_INVALID, msg, Some(serde_json::Value::Bool(false)))
    }

    /// Creates a 500 response carrying the error text as data.
    pub fn server_error(msg: impl Into<String>, error: impl Into<String>) -> Self {
        Self::with_code(
            CODE_SERVER_ERROR,
            msg,
            Some(serde_json::Value::String(error.into())),
        )
    }
}
