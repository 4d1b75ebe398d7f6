//! Just enough HTTP/1.1 to front the cache: pull the target out of a request
//! head, and flatten an upstream response into the bytes that go on the wire
//! (and into the cache).
use reqwest::header;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{CdnError, CdnResult};

// anything bigger than this is not a request head worth reading
const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Extract the request target from an HTTP/1.1 request line.
///
/// ```
/// use cdnlib::http::request_target;
///
/// assert_eq!(request_target("GET /wiki/Foo HTTP/1.1").unwrap(), "/wiki/Foo");
/// assert!(request_target("GET /wiki/Foo").is_err());
/// ```
pub fn request_target(request_line: &str) -> CdnResult<String> {
    let mut fields = request_line.split_whitespace();
    let _method = fields
        .next()
        .ok_or_else(|| CdnError::new("empty request line"))?;
    let target = fields
        .next()
        .ok_or_else(|| CdnError::new("request line has no target"))?;
    match fields.next() {
        Some(version) if version.starts_with("HTTP/") => Ok(target.to_string()),
        _ => Err(CdnError::new("malformed request line")),
    }
}

/// Consume the rest of a request head, through the blank line. The header
/// fields themselves are of no use to a warm-only cache.
pub async fn drain_request_head<R>(reader: &mut R) -> CdnResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let mut total = 0usize;
    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(CdnError::new("request head ended before the blank line"));
        }
        total += read;
        if total > MAX_HEAD_SIZE {
            return Err(CdnError::new("request head too large"));
        }
        if line == "\r\n" || line == "\n" {
            return Ok(());
        }
    }
}

/// Flatten an upstream response to its serialized form: status line, header
/// fields, blank line, body. This byte image is what the cache stores and
/// what clients receive.
///
/// The transfer framing is normalized on the way through: reqwest has
/// already undone any chunked encoding, so `Transfer-Encoding` is dropped
/// and `Content-Length` rewritten to the decoded body length.
pub async fn serialize_response(response: reqwest::Response) -> CdnResult<Vec<u8>> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    let mut bytes = Vec::with_capacity(body.len() + 256);
    bytes.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in headers.iter() {
        if name == &header::TRANSFER_ENCODING || name == &header::CONTENT_LENGTH {
            continue;
        }
        bytes.extend_from_slice(name.as_str().as_bytes());
        bytes.extend_from_slice(b": ");
        bytes.extend_from_slice(value.as_bytes());
        bytes.extend_from_slice(b"\r\n");
    }
    bytes.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    bytes.extend_from_slice(&body);

    Ok(bytes)
}
