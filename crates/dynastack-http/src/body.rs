//! Response body draining.

use bytes::Bytes;
use http_body_util::BodyExt;

use crate::connector::TransportBody;
use crate::error::TransportError;
use crate::response::ResponseBody;

/// Header carrying the CRC32 of the response payload.
pub const CRC32_HEADER: &str = "x-amz-crc32";

/// Read the whole body, chunked or not, into one buffer.
///
/// When the response carries `x-amz-crc32`, the buffer's checksum must
/// match it.
pub async fn drain(
    headers: &http::HeaderMap,
    body: TransportBody,
) -> Result<ResponseBody, TransportError> {
    let bytes: Bytes = body.collect().await?.to_bytes();
    if let Some(expected) = expected_crc(headers) {
        let actual = crc32fast::hash(&bytes);
        if actual != expected {
            return Err(TransportError::Checksum { expected, actual });
        }
    }
    Ok(ResponseBody::from_bytes(bytes))
}

fn expected_crc(headers: &http::HeaderMap) -> Option<u32> {
    headers
        .get(CRC32_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
