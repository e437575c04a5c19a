//! Response Types
//!
//! This module defines the RPC response structure.

use serde::{Deserialize, Serialize};
use super::error::{Result, ScamandriosError};
use super::RequestId;

/// RPC method result (JSON value)
pub type RpcResult = serde_json::Value;

/// An RPC response returned by a node.
///
/// # Fields
///
/// - `id`: The request ID this response corresponds to
/// - `result`: The result value (present on success)
/// - `error`: Error message (present on failure)
/// - `success`: Whether the request succeeded
///
/// # Example
///
/// ```
/// use scamandrios_common::protocol::responses::Response;
/// use serde_json::json;
///
/// let ok = Response::success(123, json!(["10.0.0.1:9160"]));
/// assert_eq!(ok.into_result().unwrap(), json!(["10.0.0.1:9160"]));
///
/// let failed = Response::error(123, "Keyspace 'nope' does not exist");
/// assert!(failed.into_result().is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value (present on success)
    pub result: Option<RpcResult>,
    /// Error message (present on failure)
    pub error: Option<String>,
    /// Whether the request succeeded
    pub success: bool,
}

impl Response {
    /// Creates a successful response.
    pub fn success(id: RequestId, result: RpcResult) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
            success: true,
        }
    }

    /// Creates an error response.
    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(error.into()),
            success: false,
        }
    }

    /// Converts the response into the call's outcome.
    ///
    /// A server-reported failure becomes [`ScamandriosError::Application`]
    /// carrying the server's message verbatim. A success without a result is
    /// malformed and becomes [`ScamandriosError::Protocol`].
    pub fn into_result(self) -> Result<RpcResult> {
        if self.success {
            self.result.ok_or_else(|| {
                ScamandriosError::Protocol("Missing result in success response".to_string())
            })
        } else {
            Err(ScamandriosError::Application(
                self.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}
