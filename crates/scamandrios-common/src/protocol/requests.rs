use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

pub type RequestId = u64;
pub type MethodName = String;
pub type RpcArgs = serde_json::Value;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A typed call sent to a single node.
///
/// The `id` is echoed back in the matching [`Response`](super::Response) and is
/// what a session uses to pair responses with requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: MethodName,
    pub args: RpcArgs,
    pub timeout_ms: Option<u64>,
}

impl Request {
    pub fn new(method: impl Into<String>, args: RpcArgs) -> Self {
        Request {
            id: generate_request_id(),
            method: method.into(),
            args,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Clone of this request with a fresh id, used when a call is replayed on
    /// a different connection.
    pub fn reissue(&self) -> Self {
        Request {
            id: generate_request_id(),
            method: self.method.clone(),
            args: self.args.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}

fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // upper 32 bits: timestamp, lower 32 bits: counter
    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}
