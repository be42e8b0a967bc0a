//! Minimal HTTP/1.1 request parsing and response writing
//!
//! One request per connection: the server always answers with
//! `Connection: close`, so there is no pipelining or keep-alive state.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Maximum size of the request line plus headers
const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Maximum request body size (1MB)
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Errors while reading a request off the wire
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Connection closed before a full request was read")]
    ConnectionClosed,

    #[error("Request head exceeds the size limit")]
    HeadTooLarge,

    #[error("Request body of {0} bytes exceeds the size limit")]
    BodyTooLarge(usize),

    #[error("Transfer-Encoding '{0}' is not supported, send a Content-Length body")]
    UnsupportedTransferEncoding(String),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request methods the router distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    fn parse(raw: &str) -> Self {
        match raw {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Other(m) => write!(f, "{}", m),
        }
    }
}

/// A parsed request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: String,
}

impl Request {
    /// Decoded value of a query parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// A response ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn ok() -> Self {
        Self::with_status(200)
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn no_content() -> Self {
        Self::with_status(204)
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self {
            status: 400,
            body: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self {
            status: 409,
            body: reason.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::with_status(404)
    }

    pub fn method_not_allowed() -> Self {
        Self::with_status(405)
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self {
            status: 500,
            body: reason.into(),
        }
    }

    fn with_status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

/// Read one request from a buffered stream
pub async fn read_request<R>(reader: &mut R) -> Result<Request, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head_size = 0;

    // Blank lines before the request line are ignored
    let request_line = loop {
        match read_head_line(reader, &mut head_size).await? {
            None => return Err(HttpError::ConnectionClosed),
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
        }
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(HttpError::Malformed(format!("bad request line '{}'", request_line)));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed(format!("unsupported version '{}'", version)));
    }

    let mut content_length = 0usize;
    loop {
        let line = read_head_line(reader, &mut head_size)
            .await?
            .ok_or(HttpError::ConnectionClosed)?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(HttpError::Malformed(format!("bad header '{}'", line)));
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(HttpError::UnsupportedTransferEncoding(value.trim().to_string()));
        }
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| HttpError::Malformed(format!("bad content-length '{}'", value.trim())))?;
        }
    }

    if content_length > MAX_BODY_SIZE {
        return Err(HttpError::BodyTooLarge(content_length));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    let body = String::from_utf8(body).map_err(|_| HttpError::Malformed("body is not UTF-8".to_string()))?;

    let (path, query) = split_target(target)?;
    debug!(%method, %path, body_len = body.len(), "read_request: parsed request");

    Ok(Request {
        method: Method::parse(method),
        path,
        query,
        body,
    })
}

/// Read a CRLF-terminated head line, enforcing the head size limit
///
/// Returns `None` at EOF and an empty string for a blank line.
async fn read_head_line<R>(reader: &mut R, head_size: &mut usize) -> Result<Option<String>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let remaining = (MAX_HEAD_SIZE - *head_size) as u64 + 1;
    let bytes_read = (&mut *reader).take(remaining).read_line(&mut line).await?;

    *head_size += bytes_read;
    if *head_size > MAX_HEAD_SIZE {
        return Err(HttpError::HeadTooLarge);
    }
    if bytes_read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        return Err(HttpError::ConnectionClosed);
    }

    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Split a request target into its path and decoded query parameters
fn split_target(target: &str) -> Result<(String, HashMap<String, String>), HttpError> {
    let (path, raw_query) = target.split_once('?').unwrap_or((target, ""));

    let mut query = HashMap::new();
    for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        query.insert(decode_component(name)?, decode_component(value)?);
    }

    Ok((percent_decode(path)?, query))
}

fn decode_component(raw: &str) -> Result<String, HttpError> {
    // Form encoding (used by reqwest's query builder) writes spaces as '+'
    percent_decode(&raw.replace('+', " "))
}

fn percent_decode(raw: &str) -> Result<String, HttpError> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|_| HttpError::Malformed(format!("bad percent-encoding in '{}'", raw)))
}

/// Write a response and flush the stream
pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), HttpError>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason_phrase(response.status));
    // 204 carries neither a body nor a length
    if response.status != 204 {
        head.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    head.push_str("Connection: close\r\n\r\n");

    writer.write_all(head.as_bytes()).await?;
    if response.status != 204 {
        writer.write_all(response.body.as_bytes()).await?;
    }
    writer.flush().await?;
    debug!(status = response.status, "write_response: sent response");
    Ok(())
}

/// Status line plus body, used when a request could not even be parsed
pub fn error_response(err: &HttpError) -> Option<Response> {
    match err {
        HttpError::ConnectionClosed | HttpError::Io(_) => None,
        HttpError::BodyTooLarge(_) => Some(Response {
            status: 413,
            body: err.to_string(),
        }),
        HttpError::UnsupportedTransferEncoding(_) => Some(Response {
            status: 501,
            body: err.to_string(),
        }),
        HttpError::HeadTooLarge | HttpError::Malformed(_) => Some(Response::bad_request(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(raw: &str) -> Result<Request, HttpError> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn test_parse_get_with_query() {
        let req = parse("GET /api/Data/GetCacheByName?name=run%20id HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/api/Data/GetCacheByName");
        assert_eq!(req.param("name"), Some("run id"));
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn test_parse_plus_as_space() {
        let req = parse("GET /x?name=a+b HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(req.param("name"), Some("a b"));
    }

    #[tokio::test]
    async fn test_parse_post_body() {
        let req = parse("POST /x?name=k HTTP/1.1\r\ncontent-length: 5\r\n\r\nhello").await.unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.body, "hello");
    }

    #[tokio::test]
    async fn test_chunked_body_is_refused() {
        let raw = "POST /x?name=k HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let err = parse(raw).await.unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedTransferEncoding(ref te) if te == "chunked"));
        assert_eq!(error_response(&err).map(|r| r.status), Some(501));
    }

    #[tokio::test]
    async fn test_leading_blank_lines_skipped() {
        let req = parse("\r\n\r\nGET /x?name=k HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.param("name"), Some("k"));
    }

    #[tokio::test]
    async fn test_blank_lines_then_eof_is_closed() {
        assert!(matches!(parse("\r\n\r\n").await, Err(HttpError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_truncated_head_is_closed() {
        assert!(matches!(
            parse("GET /x HTTP/1.1\r\nHost: x\r\n").await,
            Err(HttpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_empty_stream_is_closed() {
        assert!(matches!(parse("").await, Err(HttpError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_bad_request_line() {
        assert!(matches!(parse("GARBAGE\r\n\r\n").await, Err(HttpError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let raw = format!("POST /x HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_BODY_SIZE + 1);
        assert!(matches!(parse(&raw).await, Err(HttpError::BodyTooLarge(_))));
    }

    #[tokio::test]
    async fn test_head_too_large() {
        let raw = format!("GET /x HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(MAX_HEAD_SIZE));
        assert!(matches!(parse(&raw).await, Err(HttpError::HeadTooLarge)));
    }

    #[tokio::test]
    async fn test_write_no_content_has_no_length() {
        let mut out = Vec::new();
        write_response(&mut out, &Response::no_content()).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!text.contains("Content-Length"));
    }

    #[tokio::test]
    async fn test_write_text_response() {
        let mut out = Vec::new();
        write_response(&mut out, &Response::text("42")).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n42"));
    }
}
