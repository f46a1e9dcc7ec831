//! HTTP/1.1 transport.
//!
//! Writes the request head by hand so the caller's header order reaches
//! the wire untouched, then parses the response with httparse. Handles
//! Content-Length, chunked and close-delimited bodies; 1xx responses are
//! consumed and skipped. One request per connection.

use bytes::Bytes;
use http::Method;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::request::AssembledRequest;
use crate::response::{status_text, RawResponse, MAX_BODY_SIZE};

/// Maximum size of a response head.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of response headers.
const MAX_HEADERS: usize = 100;

/// Run one request over an established stream (TLS or plaintext).
/// `on_first_byte` fires when the first bytes of the status line arrive.
pub async fn round_trip<S, F>(
    stream: &mut S,
    request: &AssembledRequest,
    mut on_first_byte: F,
) -> Result<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(),
{
    let head = build_request_head(request);
    stream
        .write_all(&head)
        .await
        .map_err(|e| Error::protocol(format!("write request: {}", e)))?;
    if let Some(body) = &request.body {
        stream
            .write_all(body)
            .await
            .map_err(|e| Error::protocol(format!("write body: {}", e)))?;
    }
    stream
        .flush()
        .await
        .map_err(|e| Error::protocol(format!("flush request: {}", e)))?;

    read_response(stream, &request.method, &mut on_first_byte).await
}

fn build_request_head(request: &AssembledRequest) -> Vec<u8> {
    let mut head = Vec::with_capacity(512);
    head.extend_from_slice(request.method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(request.request_uri().as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    // Host goes first; an explicit URL port is kept, default ports are not.
    head.extend_from_slice(b"Host: ");
    let host_value = request.get_header("Host").map(str::to_string).unwrap_or_else(|| {
        let host = request.url.host_str().unwrap_or_default();
        match request.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    });
    head.extend_from_slice(host_value.as_bytes());
    head.extend_from_slice(b"\r\n");

    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    if let Some(body) = &request.body {
        let has_length = request.get_header("Content-Length").is_some()
            || request.get_header("Transfer-Encoding").is_some();
        if !has_length {
            head.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
    }

    head.extend_from_slice(b"\r\n");
    head
}

async fn read_response<S, F>(
    stream: &mut S,
    method: &Method,
    on_first_byte: &mut F,
) -> Result<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(),
{
    let mut buffer: Vec<u8> = Vec::with_capacity(8 * 1024);
    let mut first_read = true;

    loop {
        // Accumulate until the head is complete.
        let head_end = loop {
            if let Some(end) = find_head_end(&buffer) {
                break end;
            }
            if buffer.len() > MAX_HEAD_SIZE {
                return Err(Error::protocol("response head too large"));
            }
            let mut chunk = [0u8; 8192];
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| Error::protocol(format!("read response: {}", e)))?;
            if n == 0 {
                return Err(Error::protocol("connection closed before response head"));
            }
            if first_read {
                on_first_byte();
                first_read = false;
            }
            buffer.extend_from_slice(&chunk[..n]);
        };

        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut header_storage);
        let status = match parsed
            .parse(&buffer[..head_end])
            .map_err(|e| Error::protocol(format!("parse response: {}", e)))?
        {
            httparse::Status::Complete(_) => parsed
                .code
                .ok_or_else(|| Error::protocol("response missing status code"))?,
            httparse::Status::Partial => {
                return Err(Error::protocol("incomplete response head"));
            }
        };

        let headers: Vec<(String, String)> = parsed
            .headers
            .iter()
            .filter(|h| !h.name.is_empty())
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();

        // 1xx interim responses are skipped; the final response may
        // already be sitting in the buffer.
        if (100..200).contains(&status) {
            buffer.drain(..head_end);
            continue;
        }

        let reason = parsed.reason.unwrap_or_else(|| status_text(status));
        let mut response = RawResponse {
            status,
            status_text: format!("{} {}", status, reason).trim_end().to_string(),
            headers,
            body: Bytes::new(),
            http_version: format!("HTTP/1.{}", parsed.version.unwrap_or(1)),
        };

        let leftover = buffer[head_end..].to_vec();
        response.body = read_body(stream, method, &response, leftover).await?;
        return Ok(response);
    }
}

async fn read_body<S>(
    stream: &mut S,
    method: &Method,
    response: &RawResponse,
    leftover: Vec<u8>,
) -> Result<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bodyless =
        matches!(response.status, 204 | 304) || *method == Method::HEAD;
    if bodyless {
        return Ok(Bytes::new());
    }

    let chunked = response
        .header("Transfer-Encoding")
        .map(|v| {
            v.split(',')
                .next_back()
                .map(|t| t.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false)
        })
        .unwrap_or(false);

    if chunked {
        return read_chunked(stream, leftover).await;
    }

    if let Some(length) = response
        .header("Content-Length")
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if length > MAX_BODY_SIZE {
            return Err(Error::protocol(format!(
                "response body exceeds {} byte limit",
                MAX_BODY_SIZE
            )));
        }
        return read_exact_len(stream, leftover, length).await;
    }

    // No framing: the body runs to connection close.
    read_until_close(stream, leftover).await
}

async fn read_exact_len<S>(stream: &mut S, leftover: Vec<u8>, length: usize) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut body = leftover;
    body.truncate(body.len().min(length));
    body.reserve(length - body.len());
    while body.len() < length {
        let mut chunk = [0u8; 8192];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::protocol(format!("read body: {}", e)))?;
        if n == 0 {
            return Err(Error::protocol(format!(
                "connection closed with {} of {} body bytes",
                body.len(),
                length
            )));
        }
        let take = n.min(length - body.len());
        body.extend_from_slice(&chunk[..take]);
    }
    Ok(Bytes::from(body))
}

async fn read_until_close<S>(stream: &mut S, leftover: Vec<u8>) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut body = leftover;
    loop {
        let mut chunk = [0u8; 8192];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::protocol(format!("read body: {}", e)))?;
        if n == 0 {
            return Ok(Bytes::from(body));
        }
        if body.len() + n > MAX_BODY_SIZE {
            return Err(Error::protocol(format!(
                "response body exceeds {} byte limit",
                MAX_BODY_SIZE
            )));
        }
        body.extend_from_slice(&chunk[..n]);
    }
}

async fn read_chunked<S>(stream: &mut S, leftover: Vec<u8>) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let mut buffer = leftover;

    loop {
        // Chunk size line, hex with optional extensions.
        let (size, line_end) = loop {
            if let Some(found) = parse_chunk_size(&buffer) {
                break found?;
            }
            let mut chunk = [0u8; 8192];
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| Error::protocol(format!("read chunk size: {}", e)))?;
            if n == 0 {
                return Err(Error::protocol("connection closed inside chunked body"));
            }
            buffer.extend_from_slice(&chunk[..n]);
        };
        buffer.drain(..line_end);

        if size == 0 {
            // Trailer section runs to an empty line; drop it.
            consume_trailers(stream, &mut buffer).await?;
            return Ok(Bytes::from(body));
        }

        if body.len() + size > MAX_BODY_SIZE {
            return Err(Error::protocol(format!(
                "response body exceeds {} byte limit",
                MAX_BODY_SIZE
            )));
        }

        let needed = size + 2; // data + CRLF
        while buffer.len() < needed {
            let mut chunk = [0u8; 8192];
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| Error::protocol(format!("read chunk data: {}", e)))?;
            if n == 0 {
                return Err(Error::protocol("connection closed inside chunk"));
            }
            buffer.extend_from_slice(&chunk[..n]);
        }
        body.extend_from_slice(&buffer[..size]);
        buffer.drain(..needed);
    }
}

async fn consume_trailers<S>(stream: &mut S, buffer: &mut Vec<u8>) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = find_crlf(buffer) {
            if pos == 0 {
                buffer.drain(..2);
                return Ok(());
            }
            buffer.drain(..pos + 2);
            continue;
        }
        let mut chunk = [0u8; 4096];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::protocol(format!("read trailers: {}", e)))?;
        if n == 0 {
            // Missing final CRLF on close; tolerate it.
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Parse a chunk-size line; `None` means more bytes are needed,
/// `Some(Err)` a malformed size.
fn parse_chunk_size(buffer: &[u8]) -> Option<Result<(usize, usize)>> {
    let pos = find_crlf(buffer)?;
    let line = String::from_utf8_lossy(&buffer[..pos]);
    let size_part = line.split(';').next().unwrap_or("").trim();
    Some(
        usize::from_str_radix(size_part, 16)
            .map(|size| (size, pos + 2))
            .map_err(|_| Error::protocol(format!("bad chunk size {:?}", line))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{assemble, KeyValueEntry, RequestSpec};
    use tokio::io::duplex;

    fn get_request(url: &str, headers: Vec<(&str, &str)>) -> AssembledRequest {
        let spec = RequestSpec {
            method: "GET".into(),
            url: url.into(),
            headers: headers
                .into_iter()
                .map(|(k, v)| KeyValueEntry::new(k, v))
                .collect(),
            ..Default::default()
        };
        assemble(&spec).unwrap()
    }

    #[test]
    fn request_head_preserves_header_order() {
        let req = get_request(
            "http://example.com/path?x=1",
            vec![("X-B", "2"), ("X-A", "1"), ("User-Agent", "wraith")],
        );
        let head = String::from_utf8(build_request_head(&req)).unwrap();
        assert!(head.starts_with("GET /path?x=1 HTTP/1.1\r\nHost: example.com\r\n"));
        let b = head.find("X-B").unwrap();
        let a = head.find("X-A").unwrap();
        let ua = head.find("User-Agent").unwrap();
        assert!(b < a && a < ua);
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn explicit_port_reaches_host_header() {
        let req = get_request("http://example.com:8080/", vec![]);
        let head = String::from_utf8(build_request_head(&req)).unwrap();
        assert!(head.contains("Host: example.com:8080\r\n"));
    }

    #[test]
    fn content_length_is_added_for_bodies() {
        let mut req = get_request("http://example.com/", vec![]);
        req.method = Method::POST;
        req.body = Some(Bytes::from_static(b"hello"));
        let head = String::from_utf8(build_request_head(&req)).unwrap();
        assert!(head.contains("Content-Length: 5\r\n"));
    }

    #[tokio::test]
    async fn round_trips_content_length_response() {
        let (mut client, mut server) = duplex(16 * 1024);
        let req = get_request("http://example.com/", vec![]);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
        });

        let mut saw_first_byte = false;
        let resp = round_trip(&mut client, &req, || saw_first_byte = true)
            .await
            .unwrap();
        assert!(saw_first_byte);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.status_text, "200 OK");
        assert_eq!(&resp.body[..], b"hello");
        assert_eq!(resp.header("Content-Type"), Some("text/plain"));
    }

    #[tokio::test]
    async fn decodes_chunked_bodies_with_extensions_and_trailers() {
        let (mut client, mut server) = duplex(16 * 1024);
        let req = get_request("http://example.com/", vec![]);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(
                    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                      5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: t\r\n\r\n",
                )
                .await
                .unwrap();
        });

        let resp = round_trip(&mut client, &req, || {}).await.unwrap();
        assert_eq!(&resp.body[..], b"hello world");
    }

    #[tokio::test]
    async fn skips_interim_responses() {
        let (mut client, mut server) = duplex(16 * 1024);
        let req = get_request("http://example.com/", vec![]);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(
                    b"HTTP/1.1 103 Early Hints\r\nLink: </s.css>\r\n\r\n\
                      HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
                )
                .await
                .unwrap();
        });

        let resp = round_trip(&mut client, &req, || {}).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"ok");
    }

    #[tokio::test]
    async fn close_delimited_body_reads_to_eof() {
        let (mut client, mut server) = duplex(16 * 1024);
        let req = get_request("http://example.com/", vec![]);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(b"HTTP/1.1 200 OK\r\n\r\nstream until close")
                .await
                .unwrap();
            drop(server);
        });

        let resp = round_trip(&mut client, &req, || {}).await.unwrap();
        assert_eq!(&resp.body[..], b"stream until close");
    }

    #[tokio::test]
    async fn head_responses_have_no_body() {
        let (mut client, mut server) = duplex(16 * 1024);
        let mut req = get_request("http://example.com/", vec![]);
        req.method = Method::HEAD;

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n")
                .await
                .unwrap();
        });

        let resp = round_trip(&mut client, &req, || {}).await.unwrap();
        assert!(resp.body.is_empty());
    }

    #[test]
    fn chunk_size_parsing() {
        assert!(matches!(parse_chunk_size(b"5\r\n"), Some(Ok((5, 3)))));
        assert!(matches!(parse_chunk_size(b"ff\r\n"), Some(Ok((255, 4)))));
        assert!(matches!(parse_chunk_size(b"5;a=b\r\n"), Some(Ok((5, 7)))));
        assert!(parse_chunk_size(b"5").is_none());
        assert!(matches!(parse_chunk_size(b"zz\r\n"), Some(Err(_))));
    }
}
