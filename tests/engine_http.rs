//! End-to-end engine tests against an in-process HTTP/1.1 server:
//! redirects, decompression, classification, header flattening, request
//! assembly and timing, all through `Client::execute`.

use std::io::Write as _;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use wraith::request::{KeyValueEntry, RequestSpec};
use wraith::{Client, TlsFingerprintSpec};

/// Minimal request-routing HTTP server for a bounded number of
/// connections; one response per connection.
async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(handle_connection(stream));
        }
    });
    format!("http://127.0.0.1:{}", port)
}

async fn handle_connection(mut stream: TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let request_line = head.lines().next().unwrap_or("").to_string();
    let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();

    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let response: Vec<u8> = if let Some(rest) = path.strip_prefix("/redirect/") {
        let n: u32 = rest.parse().unwrap_or(0);
        let target = if n <= 1 {
            "/hello".to_string()
        } else {
            format!("/redirect/{}", n - 1)
        };
        format!(
            "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\n\r\n",
            target
        )
        .into_bytes()
    } else {
        match path.as_str() {
            "/hello" => {
                b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Length: 11\r\n\r\nhello world".to_vec()
            }
            "/loop" => {
                b"HTTP/1.1 302 Found\r\nLocation: /loop\r\nContent-Length: 0\r\n\r\n".to_vec()
            }
            "/gzip" => {
                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::new(),
                    flate2::Compression::default(),
                );
                encoder.write_all(b"compressed payload").unwrap();
                let compressed = encoder.finish().unwrap();
                let mut response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
                    compressed.len()
                )
                .into_bytes();
                response.extend_from_slice(&compressed);
                response
            }
            "/binary" => {
                b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: 4\r\n\r\n\x00\x01\x02\xff".to_vec()
            }
            "/echo" => {
                let mut payload = head.clone().into_bytes();
                payload.extend_from_slice(&body);
                let mut response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
                    payload.len()
                )
                .into_bytes();
                response.extend_from_slice(&payload);
                response
            }
            _ => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec(),
        }
    };

    stream.write_all(&response).await.unwrap();
    let _ = stream.shutdown().await;
}

fn client() -> Client {
    Client::new(TlsFingerprintSpec::preset("chrome_131"))
}

fn get(url: String) -> RequestSpec {
    RequestSpec {
        method: "GET".into(),
        url,
        ..Default::default()
    }
}

#[tokio::test]
async fn plain_get_materialises_the_response() {
    let base = spawn_server().await;
    let record = client().execute(&get(format!("{}/hello", base))).await.unwrap();

    assert_eq!(record.status, 200);
    assert_eq!(record.status_text, "200 OK");
    assert_eq!(record.body, "hello world");
    assert!(!record.is_base64);
    assert_eq!(record.size, 11);
    assert_eq!(record.headers.get("Content-Type").unwrap(), "text/plain");
    // Multi-value headers flatten with a newline.
    assert_eq!(record.headers.get("Set-Cookie").unwrap(), "a=1\nb=2");
    // Plaintext connections produce no TLS info and no trace.
    assert!(record.tls_info.is_none());
    assert!(record.conn_trace.is_none());
    assert!(record.timing.total >= record.timing.ttfb);
}

#[tokio::test]
async fn redirect_chain_records_each_hop() {
    let base = spawn_server().await;
    let mut spec = get(format!("{}/redirect/3", base));
    spec.follow_redirects = true;
    spec.max_redirects = 10;

    let record = client().execute(&spec).await.unwrap();
    assert_eq!(record.status, 200);
    assert_eq!(record.body, "hello world");
    assert_eq!(record.redirects.len(), 3);
    assert_eq!(record.redirects[0].url, format!("{}/redirect/3", base));
    assert_eq!(record.redirects[1].url, format!("{}/redirect/2", base));
    assert_eq!(record.redirects[2].url, format!("{}/redirect/1", base));
    for hop in &record.redirects {
        assert_eq!(hop.status, 302);
        assert!(hop.headers.contains_key("Location"));
    }
}

#[tokio::test]
async fn redirect_loop_hits_the_cap() {
    let base = spawn_server().await;
    let mut spec = get(format!("{}/loop", base));
    spec.follow_redirects = true;
    spec.max_redirects = 4;

    let err = client().execute(&spec).await.unwrap_err();
    assert!(err.to_string().contains("too many redirects"), "{}", err);
}

#[tokio::test]
async fn gzip_bodies_decompress_but_report_raw_size() {
    let base = spawn_server().await;
    let record = client().execute(&get(format!("{}/gzip", base))).await.unwrap();

    assert_eq!(record.body, "compressed payload");
    assert_eq!(record.content_encoding, "gzip");
    assert!(!record.is_base64);
    // Raw size is the compressed byte count, not the inflated length.
    assert_ne!(record.size, "compressed payload".len());
}

#[tokio::test]
async fn binary_bodies_are_base64() {
    let base = spawn_server().await;
    let record = client().execute(&get(format!("{}/binary", base))).await.unwrap();
    assert!(record.is_base64);
    assert_eq!(record.body, "AAEC/w==");
    assert_eq!(record.size, 4);
}

#[tokio::test]
async fn header_order_cookies_and_query_reach_the_wire() {
    let base = spawn_server().await;
    let mut spec = get(format!("{}/echo?fixed=1", base));
    spec.params.push(KeyValueEntry::new("added", "2"));
    spec.headers.push(KeyValueEntry::new("X-Second-Look", "b"));
    spec.headers.push(KeyValueEntry::new("X-First-Look", "a"));
    spec.cookies.push(KeyValueEntry::new("sid", "123"));
    spec.cookies.push(KeyValueEntry::new("theme", "dark"));

    let record = client().execute(&spec).await.unwrap();
    let echoed = record.body;
    assert!(echoed.starts_with("GET /echo?fixed=1&added=2 HTTP/1.1\r\n"));
    let second = echoed.find("X-Second-Look: b").unwrap();
    let first = echoed.find("X-First-Look: a").unwrap();
    assert!(second < first, "caller header order must be preserved");
    assert!(echoed.contains("Cookie: sid=123; theme=dark\r\n"));
}

#[tokio::test]
async fn urlencoded_post_gets_content_type_and_body() {
    let base = spawn_server().await;
    let mut spec = get(format!("{}/echo", base));
    spec.method = "POST".into();
    spec.body_type = "urlencoded".into();
    spec.form_data = vec![
        wraith::request::FormDataEntry {
            entry: KeyValueEntry::new("a", "1"),
            ..Default::default()
        },
        wraith::request::FormDataEntry {
            entry: KeyValueEntry::new("b", "2"),
            ..Default::default()
        },
    ];

    let record = client().execute(&spec).await.unwrap();
    assert!(record
        .body
        .contains("Content-Type: application/x-www-form-urlencoded"));
    assert!(record.body.ends_with("a=1&b=2"));
}

#[tokio::test]
async fn bearer_auth_header_reaches_the_wire() {
    let base = spawn_server().await;
    let mut spec = get(format!("{}/echo", base));
    spec.auth = wraith::request::AuthSpec {
        kind: "bearer".into(),
        bearer: Some("tok-42".into()),
        ..Default::default()
    };

    let record = client().execute(&spec).await.unwrap();
    assert!(record.body.contains("Authorization: Bearer tok-42\r\n"));
}

#[tokio::test]
async fn not_followed_redirect_is_returned_as_is() {
    let base = spawn_server().await;
    let record = client()
        .execute(&get(format!("{}/redirect/2", base)))
        .await
        .unwrap();
    assert_eq!(record.status, 302);
    assert!(record.redirects.is_empty());
    assert_eq!(record.headers.get("Location").unwrap(), "/redirect/1");
}
