//! Request environment shared by every attempt of one request.
//!
//! The environment is the unit the host hands to the policy. Request objects
//! are rebuilt from it on each attempt; anything stored here survives across
//! attempts, anything stored on a request object does not. The attempt state
//! lives here too, so request factories, handlers and view predicates can read
//! it while an attempt is running.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Position of the running attempt within the attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    /// 0-based index of the running attempt.
    pub attempt: usize,
    /// Total attempts allowed for this request.
    pub attempts: usize,
}

impl AttemptState {
    pub fn is_last(&self) -> bool {
        self.attempt + 1 == self.attempts
    }
}

/// Request payload.
pub enum Body {
    /// Nothing to read.
    Empty,
    /// Unbuffered input stream; it can be consumed once.
    Stream {
        reader: Pin<Box<dyn AsyncRead + Send + Sync>>,
        content_length: Option<u64>,
    },
    /// Fully buffered payload; every read starts from the beginning.
    Buffered(Bytes),
}

impl Body {
    pub fn stream<R>(reader: R, content_length: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        Body::Stream { reader: Box::pin(reader), content_length }
    }

    pub fn is_seekable(&self) -> bool {
        !matches!(self, Body::Stream { .. })
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Stream { content_length, .. } => {
                f.debug_struct("Body::Stream").field("content_length", content_length).finish()
            }
            Body::Buffered(bytes) => write!(f, "Body::Buffered({} bytes)", bytes.len()),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Buffered(bytes)
    }
}

/// Environment of one incoming request.
#[derive(Debug)]
pub struct Environ {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Body,
    attempt: Option<AttemptState>,
}

impl Environ {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: Body::Empty,
            attempt: None,
        }
    }

    /// Shorthand for a `GET` with no body.
    pub fn blank(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Take the body out, leaving [`Body::Empty`] behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, Body::Empty)
    }

    /// Declared payload length from the `content-length` header.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Buffered body bytes, if the body has been made seekable or was given as bytes.
    pub fn body_bytes(&self) -> Option<Bytes> {
        match &self.body {
            Body::Buffered(bytes) => Some(bytes.clone()),
            Body::Empty => Some(Bytes::new()),
            Body::Stream { .. } => None,
        }
    }

    /// Read the whole payload, buffering it in place so later reads see it too.
    pub async fn read_body(&mut self) -> io::Result<Bytes> {
        self.make_body_seekable().await?;
        Ok(self.body_bytes().unwrap_or_default())
    }

    /// Buffer the input stream so the body can be read once per attempt.
    ///
    /// A no-op when the body is already buffered. The expected length is the
    /// stream's own `content_length`, else the `content-length` header. Fails
    /// with `UnexpectedEof` when fewer bytes arrive, including a declared
    /// non-zero length with no body at all; the body is left empty in that case.
    pub async fn make_body_seekable(&mut self) -> io::Result<()> {
        let declared = self.content_length();
        let (mut reader, content_length) = match self.take_body() {
            Body::Stream { reader, content_length } => (reader, content_length.or(declared)),
            Body::Empty => {
                return match declared {
                    Some(expected) if expected > 0 => Err(disconnected(expected)),
                    _ => Ok(()),
                };
            }
            other => {
                self.body = other;
                return Ok(());
            }
        };

        let mut buf = Vec::with_capacity(
            content_length.and_then(|n| usize::try_from(n).ok()).unwrap_or_default(),
        );
        match content_length {
            Some(expected) => {
                reader.take(expected).read_to_end(&mut buf).await?;
                let read = buf.len() as u64;
                if read < expected {
                    return Err(disconnected(expected - read));
                }
            }
            None => {
                reader.read_to_end(&mut buf).await?;
            }
        }

        self.body = Body::Buffered(Bytes::from(buf));
        Ok(())
    }

    /// Attempt state, present only while an attempt is running.
    pub fn attempt_state(&self) -> Option<AttemptState> {
        self.attempt
    }

    pub(crate) fn set_attempt_state(&mut self, state: AttemptState) {
        self.attempt = Some(state);
    }

    pub(crate) fn clear_attempt_state(&mut self) {
        self.attempt = None;
    }
}

fn disconnected(missing: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("client disconnected while sending the body ({} more bytes were expected)", missing),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_attempt_is_index_plus_one() {
        assert!(!AttemptState { attempt: 0, attempts: 3 }.is_last());
        assert!(!AttemptState { attempt: 1, attempts: 3 }.is_last());
        assert!(AttemptState { attempt: 2, attempts: 3 }.is_last());
        assert!(AttemptState { attempt: 0, attempts: 1 }.is_last());
    }

    #[test]
    fn headers_are_case_insensitive() {
        let environ = Environ::blank("/").with_header("Content-Type", "text/plain");
        assert_eq!(environ.header("content-type"), Some("text/plain"));
        assert_eq!(environ.header("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(environ.header("accept"), None);
    }

    #[tokio::test]
    async fn stream_body_is_buffered_once() {
        let mut environ = Environ::new("POST", "/submit")
            .with_body(Body::stream(&b"payload"[..], Some(7)));
        assert!(!environ.body().is_seekable());
        assert!(environ.body_bytes().is_none());

        environ.make_body_seekable().await.unwrap();
        assert!(environ.body().is_seekable());
        assert_eq!(environ.body_bytes().unwrap(), Bytes::from_static(b"payload"));
        // second read starts from the beginning again
        assert_eq!(environ.body_bytes().unwrap(), Bytes::from_static(b"payload"));

        environ.make_body_seekable().await.unwrap();
        assert_eq!(environ.body_bytes().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn stream_without_length_reads_to_end() {
        let mut environ = Environ::new("POST", "/").with_body(Body::stream(&b"abc"[..], None));
        environ.make_body_seekable().await.unwrap();
        assert_eq!(environ.body_bytes().unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn short_stream_is_a_disconnect() {
        let mut environ = Environ::new("GET", "/").with_body(Body::stream(&b""[..], Some(1)));
        let err = environ.make_body_seekable().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(err.to_string().contains("1 more bytes"));
    }

    #[tokio::test]
    async fn declared_length_caps_the_read() {
        let mut environ =
            Environ::new("POST", "/").with_body(Body::stream(&b"abcdef"[..], Some(3)));
        environ.make_body_seekable().await.unwrap();
        assert_eq!(environ.body_bytes().unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn header_length_applies_to_streams_without_one() {
        let mut environ = Environ::new("POST", "/")
            .with_header("Content-Length", "4")
            .with_body(Body::stream(&b"ab"[..], None));
        let err = environ.make_body_seekable().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(err.to_string().contains("2 more bytes"));
    }

    #[tokio::test]
    async fn declared_length_without_a_body_is_a_disconnect() {
        let mut environ = Environ::blank("/").with_header("Content-Length", "1");
        let err = environ.make_body_seekable().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut environ = Environ::blank("/").with_header("Content-Length", "0");
        environ.make_body_seekable().await.unwrap();
        assert_eq!(environ.body_bytes().unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn read_body_consumes_a_stream_once() {
        let mut environ =
            Environ::new("POST", "/").with_body(Body::stream(&b"payload"[..], Some(7)));
        assert_eq!(environ.read_body().await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(environ.read_body().await.unwrap(), Bytes::from_static(b"payload"));
        assert!(environ.body().is_seekable());

        assert!(matches!(environ.take_body(), Body::Buffered(_)));
        assert!(matches!(environ.body(), Body::Empty));
    }
}
