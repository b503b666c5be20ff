use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method name carried by progressive partial-result notifications.
pub const STREAM_CHUNK_METHOD: &str = "stream/chunk";

/// A classified protocol frame.
///
/// `id` is present iff the frame is a request, response, or error response;
/// a completed request carries exactly one of `result`/`error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// An outbound (or echoed) method invocation.
    Request {
        id: u64,
        method: String,
        params: Option<Value>,
    },
    /// A successful completion for the request with the same id.
    Response { id: u64, result: Value },
    /// A failed completion for the request with the same id.
    ErrorResponse { id: u64, error: RpcErrorBody },
    /// A progressive partial result tied to an in-flight request.
    StreamChunk(StreamChunk),
    /// An out-of-band notification; never matched to a pending request.
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// Structured error object attached to an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Payload of a `stream/chunk` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    /// The request this fragment belongs to.
    pub request_id: u64,
    /// The fragment text, in production order.
    pub chunk: String,
    /// True on the last fragment of the stream.
    pub done: bool,
    /// Zero-based fragment index.
    pub index: u64,
}

impl Envelope {
    /// Classify a parsed JSON value as a protocol frame.
    ///
    /// Returns `None` for objects that do not match any frame kind,
    /// including `stream/chunk` notifications with malformed params.
    pub fn classify(value: Value) -> Option<Envelope> {
        let obj = value.as_object()?;

        if let Some(version) = obj.get("jsonrpc") {
            if version.as_str() != Some("2.0") {
                return None;
            }
        }

        match obj.get("id").map(Value::as_u64) {
            // Request/response frames must carry a numeric id.
            Some(None) => None,
            Some(Some(id)) => {
                if let Some(method) = obj.get("method").and_then(Value::as_str) {
                    return Some(Envelope::Request {
                        id,
                        method: method.to_string(),
                        params: obj.get("params").cloned(),
                    });
                }
                match (obj.get("result"), obj.get("error")) {
                    (Some(result), None) => Some(Envelope::Response {
                        id,
                        result: result.clone(),
                    }),
                    (None, Some(error)) => {
                        let error: RpcErrorBody =
                            serde_json::from_value(error.clone()).ok()?;
                        Some(Envelope::ErrorResponse { id, error })
                    }
                    // Both or neither violates the completion invariant.
                    _ => None,
                }
            }
            None => {
                let method = obj.get("method").and_then(Value::as_str)?;
                if method == STREAM_CHUNK_METHOD {
                    let params = obj.get("params").cloned()?;
                    let chunk: StreamChunk = serde_json::from_value(params).ok()?;
                    return Some(Envelope::StreamChunk(chunk));
                }
                Some(Envelope::Notification {
                    method: method.to_string(),
                    params: obj.get("params").cloned(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_request() {
        let env = Envelope::classify(json!({
            "jsonrpc": "2.0", "id": 3, "method": "generate", "params": {"prompt": "hi"}
        }))
        .unwrap();
        assert!(matches!(env, Envelope::Request { id: 3, .. }));
    }

    #[test]
    fn classifies_response_and_error() {
        let ok = Envelope::classify(json!({"jsonrpc": "2.0", "id": 1, "result": "done"}));
        assert!(matches!(ok, Some(Envelope::Response { id: 1, .. })));

        let err = Envelope::classify(json!({
            "jsonrpc": "2.0", "id": 2,
            "error": {"code": -32601, "message": "no such method"}
        }))
        .unwrap();
        match err {
            Envelope::ErrorResponse { id, error } => {
                assert_eq!(id, 2);
                assert_eq!(error.code, -32601);
                assert_eq!(error.message, "no such method");
                assert!(error.data.is_none());
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn result_and_error_together_is_invalid() {
        let env = Envelope::classify(json!({
            "id": 1, "result": "x", "error": {"code": -32000, "message": "y"}
        }));
        assert!(env.is_none());
    }

    #[test]
    fn classifies_stream_chunk() {
        let env = Envelope::classify(json!({
            "jsonrpc": "2.0", "method": "stream/chunk",
            "params": {"requestId": 7, "chunk": "Hel", "done": false, "index": 0}
        }))
        .unwrap();
        match env {
            Envelope::StreamChunk(chunk) => {
                assert_eq!(chunk.request_id, 7);
                assert_eq!(chunk.chunk, "Hel");
                assert!(!chunk.done);
                assert_eq!(chunk.index, 0);
            }
            other => panic!("expected stream chunk, got {other:?}"),
        }
    }

    #[test]
    fn malformed_stream_chunk_params_are_discarded() {
        let env = Envelope::classify(json!({
            "method": "stream/chunk", "params": {"requestId": "seven"}
        }));
        assert!(env.is_none());
    }

    #[test]
    fn classifies_plain_notification() {
        let env = Envelope::classify(json!({
            "jsonrpc": "2.0", "method": "status/update", "params": {"load": 0.3}
        }))
        .unwrap();
        assert!(matches!(env, Envelope::Notification { ref method, .. } if method == "status/update"));
    }

    #[test]
    fn non_numeric_id_is_discarded() {
        let env = Envelope::classify(json!({"id": "abc", "result": 1}));
        assert!(env.is_none());
    }

    #[test]
    fn wrong_jsonrpc_version_is_discarded() {
        let env = Envelope::classify(json!({"jsonrpc": "1.0", "id": 1, "result": 1}));
        assert!(env.is_none());
    }
}
