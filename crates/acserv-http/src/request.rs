//! HTTP/1.x request reading using httparse

use bytes::Bytes;
use http::uri::PathAndQuery;
use http::{HeaderMap, Method, Request, Uri, Version};
use percent_encoding::percent_decode_str;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

use crate::HttpError;

/// Maximum number of headers to parse
const MAX_HEADERS: usize = 100;

/// Longest accepted chunk-size line in a chunked body
const MAX_CHUNK_LINE: u64 = 1024;

/// Bounds applied while reading one request
#[derive(Debug, Clone)]
pub struct RequestLimits {
    /// Request line plus headers
    pub max_head_bytes: usize,
    /// Decoded body
    pub max_body_bytes: usize,
    /// Deadline for each wait on the peer, `None` waits forever
    pub idle_timeout: Option<Duration>,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_body_bytes: 1024 * 1024,
            idle_timeout: None,
        }
    }
}

/// Read one request from the stream.
///
/// Returns `Ok(None)` when the peer closed the connection before sending any
/// byte of a new request.
pub async fn read_request<R>(
    reader: &mut R,
    limits: &RequestLimits,
) -> Result<Option<Request<Bytes>>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let head = match read_head(reader, limits).await? {
        Some(head) => head,
        None => return Ok(None),
    };

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    if parsed.parse(&head)?.is_partial() {
        return Err(HttpError::Incomplete);
    }

    let method = Method::from_bytes(parsed.method.unwrap_or_default().as_bytes())
        .map_err(|e| HttpError::Invalid(e.to_string()))?;
    let target = parsed.path.unwrap_or("/");
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut builder = Request::builder()
        .method(method)
        .uri(target)
        .version(version);

    let mut content_length = None;
    let mut is_chunked = false;
    for header in parsed.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            let value = std::str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| HttpError::Invalid("bad Content-Length".to_string()))?;
            content_length = Some(value);
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            is_chunked = String::from_utf8_lossy(header.value)
                .to_ascii_lowercase()
                .contains("chunked");
        }
        builder = builder.header(header.name, header.value);
    }

    let body = if is_chunked {
        read_chunked_body(reader, limits).await?
    } else if let Some(len) = content_length {
        if len > limits.max_body_bytes {
            return Err(HttpError::BodyTooLarge(limits.max_body_bytes));
        }
        let mut body = vec![0u8; len];
        with_deadline(limits.idle_timeout, reader.read_exact(&mut body)).await?;
        body
    } else {
        Vec::new()
    };

    trace!(
        "Read request head ({} bytes) and body ({} bytes)",
        head.len(),
        body.len()
    );

    Ok(Some(builder.body(Bytes::from(body))?))
}

async fn read_head<R>(reader: &mut R, limits: &RequestLimits) -> Result<Option<Vec<u8>>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);

    loop {
        let remaining = limits.max_head_bytes.saturating_sub(head.len());
        if remaining == 0 {
            return Err(HttpError::HeadTooLarge(limits.max_head_bytes));
        }

        let start = head.len();
        let mut limited = (&mut *reader).take(remaining as u64);
        let read = with_deadline(limits.idle_timeout, limited.read_until(b'\n', &mut head)).await;

        let n = match read {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && head.is_empty() => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };

        if n == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(HttpError::Incomplete);
        }

        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // Stray CRLF between requests
                head.clear();
                continue;
            }
            return Ok(Some(head));
        }
    }
}

async fn read_chunked_body<R>(reader: &mut R, limits: &RequestLimits) -> Result<Vec<u8>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();

    loop {
        let line = read_line(reader, limits).await?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| HttpError::Invalid(format!("bad chunk size: {:?}", size_str)))?;

        if size == 0 {
            // Trailer section ends with an empty line
            loop {
                if read_line(reader, limits).await?.is_empty() {
                    return Ok(body);
                }
            }
        }

        let start = body.len();
        let end = start
            .checked_add(size)
            .filter(|n| *n <= limits.max_body_bytes)
            .ok_or(HttpError::BodyTooLarge(limits.max_body_bytes))?;
        body.resize(end, 0);
        with_deadline(limits.idle_timeout, reader.read_exact(&mut body[start..])).await?;

        if !read_line(reader, limits).await?.is_empty() {
            return Err(HttpError::Invalid("missing CRLF after chunk".to_string()));
        }
    }
}

/// One CRLF-terminated line without its terminator
async fn read_line<R>(reader: &mut R, limits: &RequestLimits) -> Result<String, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(MAX_CHUNK_LINE);
    let n = with_deadline(limits.idle_timeout, limited.read_until(b'\n', &mut line)).await?;
    if n == 0 || !line.ends_with(b"\n") {
        return Err(HttpError::Incomplete);
    }
    let line = String::from_utf8_lossy(&line);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn with_deadline<F, T>(deadline: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(duration) => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
        None => fut.await,
    }
}

/// Serve directory targets as their `index.html`.
///
/// A target whose path ends in `/` gets `index.html` appended, both in the
/// request URI and in the returned logical path.
pub fn normalize_target<B>(request: &mut Request<B>) -> String {
    if request.uri().path().ends_with('/') {
        let mut target = format!("{}index.html", request.uri().path());
        if let Some(query) = request.uri().query() {
            target.push('?');
            target.push_str(query);
        }

        let mut parts = request.uri().clone().into_parts();
        if let Ok(path_and_query) = PathAndQuery::try_from(target) {
            parts.path_and_query = Some(path_and_query);
            if let Ok(uri) = Uri::from_parts(parts) {
                *request.uri_mut() = uri;
            }
        }
    }

    logical_path(request.uri())
}

/// Percent-decoded path of the target, query stripped
pub fn logical_path(uri: &Uri) -> String {
    let path = percent_decode_str(uri.path()).decode_utf8_lossy();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.into_owned()
    }
}

/// Whether the client asked not to reuse the connection
pub fn request_wants_close<B>(request: &Request<B>) -> bool {
    if connection_has(request.headers(), "close") {
        return true;
    }
    request.version() == Version::HTTP_10 && !connection_has(request.headers(), "keep-alive")
}

/// Whether any `Connection` header lists `token`
pub(crate) fn connection_has(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}
