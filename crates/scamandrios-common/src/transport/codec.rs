use crate::protocol::error::{Result, ScamandriosError};
use crate::protocol::{Request, Response};

/// JSON codec for the frame payloads.
///
/// Encoding failures surface as [`ScamandriosError::JsonSerialization`].
/// Decoding failures mean the peer sent something that is not a protocol
/// message, so they surface as [`ScamandriosError::Protocol`].
///
/// # Example
///
/// ```
/// use scamandrios_common::transport::JsonCodec;
/// use scamandrios_common::protocol::{Request, Response};
/// use serde_json::json;
///
/// let request = Request::new("describe_ring", json!({}));
/// let encoded = JsonCodec::encode_request(&request).unwrap();
/// assert_eq!(JsonCodec::decode_request(&encoded).unwrap(), request);
///
/// let response = Response::success(request.id, json!([]));
/// let encoded = JsonCodec::encode_response(&response).unwrap();
/// assert_eq!(JsonCodec::decode_response(&encoded).unwrap().id, request.id);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    pub fn decode_request(data: &[u8]) -> Result<Request> {
        serde_json::from_slice(data)
            .map_err(|e| ScamandriosError::Protocol(format!("Malformed request frame: {}", e)))
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    pub fn decode_response(data: &[u8]) -> Result<Response> {
        serde_json::from_slice(data)
            .map_err(|e| ScamandriosError::Protocol(format!("Malformed response frame: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_with_timeout_survives_encoding() {
        let request = Request::new("get_slice", json!({"key": "row1"})).with_timeout(5000);

        let encoded = JsonCodec::encode_request(&request).unwrap();
        let decoded = JsonCodec::decode_request(&encoded).unwrap();

        assert_eq!(request, decoded);
        assert_eq!(decoded.timeout_ms, Some(5000));
    }

    #[test]
    fn test_error_response_keeps_message() {
        let response = Response::error(123, "UnavailableException");

        let encoded = JsonCodec::encode_response(&response).unwrap();
        let decoded = JsonCodec::decode_response(&encoded).unwrap();

        assert!(!decoded.success);
        assert_eq!(decoded.error, Some("UnavailableException".to_string()));
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        let err = JsonCodec::decode_response(&[0xFF, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, ScamandriosError::Protocol(_)));
        assert!(err.is_transport_failure());
    }

    #[test]
    fn test_wrong_shape_is_protocol_error() {
        let err = JsonCodec::decode_request(br#"{"hello": "world"}"#).unwrap_err();
        assert!(matches!(err, ScamandriosError::Protocol(_)));
    }
}
