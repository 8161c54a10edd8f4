//! In-memory HTTP response builder

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::request::connection_has;
use crate::HttpError;

/// Collects status, headers and body for one response.
///
/// Handlers write into the recorder; nothing touches the connection until
/// [`ResponseRecorder::write_to`] serializes it as an HTTP/1.1 response.
#[derive(Debug, Clone)]
pub struct ResponseRecorder {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
}

impl Default for ResponseRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Replace every value of `name` with `value`
    pub fn set_header(&mut self, name: HeaderName, value: &'static str) {
        self.headers.insert(name, HeaderValue::from_static(value));
    }

    /// Add a value for `name`, keeping existing ones
    pub fn append_header(&mut self, name: HeaderName, value: &'static str) {
        self.headers.append(name, HeaderValue::from_static(value));
    }

    /// Append bytes to the body
    pub fn write(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// Set `Content-Type` unless a handler already did
    pub fn default_content_type(&mut self, value: &'static str) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.set_header(CONTENT_TYPE, value);
        }
    }

    /// Whether the response tells the client the connection will close
    pub fn wants_close(&self) -> bool {
        connection_has(&self.headers, "close")
    }

    /// Serialize as an HTTP/1.1 response.
    ///
    /// Header names are written in canonical `Title-Case`, in insertion
    /// order, and `Content-Length` always reflects the recorded body.
    pub fn to_wire(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(256 + self.body.len());

        out.put_slice(b"HTTP/1.1 ");
        out.put_slice(self.status.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(
            self.status
                .canonical_reason()
                .unwrap_or("Unknown")
                .as_bytes(),
        );
        out.put_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            if name == CONTENT_LENGTH {
                continue;
            }
            out.put_slice(canonical_name(name.as_str()).as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }

        out.put_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        out.put_slice(&self.body);
        out.freeze()
    }

    /// Serialize into `writer` and flush
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), HttpError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_wire()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// `x-cstp-version` -> `X-Cstp-Version`
fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        upper = c == '-';
    }
    out
}
