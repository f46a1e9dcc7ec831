//! Response record and assembly.
//!
//! Transports hand back a [`RawResponse`]; [`assemble`] turns it into the
//! [`ResponseRecord`] the caller sees: flattened headers, transparent
//! gzip/deflate decompression, text-vs-binary classification and the raw
//! (pre-decompression) size.

use std::collections::BTreeMap;
use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Maximum response body the engine will buffer (100 MiB).
pub const MAX_BODY_SIZE: usize = 100 * 1024 * 1024;

/// What a transport produced: status line, headers in wire order (names
/// may repeat) and the raw body bytes.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub http_version: String,
}

impl RawResponse {
    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Timing breakdown in integer milliseconds. DNS is folded into TCP.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingData {
    pub dns: i64,
    pub tcp: i64,
    pub tls: i64,
    pub ttfb: i64,
    pub download: i64,
    pub total: i64,
}

/// Negotiated TLS parameters for the connection that served the response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsInfo {
    pub version: String,
    pub cipher_suite: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ja3_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ja4_hash: Option<String>,
}

/// One hop in a redirect chain: the URL that produced the Location, the
/// status it answered with and its flattened headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectHop {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
}

/// One observed connection event (usually a TLS record).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnEvent {
    /// Milliseconds since the first byte tap was created.
    pub time: f64,
    /// "send" or "recv".
    pub direction: String,
    pub size: usize,
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hex_preview: String,
}

/// The full connection trace attached to a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnTrace {
    pub events: Vec<ConnEvent>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_addr: String,
}

/// The fully materialised response returned by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    /// UTF-8 text, or base64 when `is_base64` is set.
    pub body: String,
    /// Raw byte count before any decompression.
    pub size: usize,
    pub is_base64: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_encoding: String,
    pub timing: TimingData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_info: Option<TlsInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirects: Vec<RedirectHop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_trace: Option<ConnTrace>,
}

/// Flatten wire-order headers into one entry per name, joining repeated
/// values (Set-Cookie and friends) with a newline.
pub fn flatten_headers(headers: &[(String, String)]) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let key = canonical_name(name);
        match flat.get_mut(&key) {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => {
                flat.insert(key, value.clone());
            }
        }
    }
    flat
}

/// Canonical Header-Case for a (possibly lowercased HTTP/2) header name.
fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if upper_next {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper_next = c == '-';
    }
    out
}

/// Build a [`ResponseRecord`] from a transport response, per the rules in
/// the response-assembly contract: capture the raw size first, then try
/// gzip/deflate, then classify text vs binary.
pub fn assemble(raw: &RawResponse) -> ResponseRecord {
    let raw_size = raw.body.len();
    let content_encoding = raw
        .header("Content-Encoding")
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_default();

    // Decompression failures are swallowed on purpose: the caller still
    // sees the original encoding tag next to the raw bytes.
    let mut body_bytes = raw.body.to_vec();
    match decompress(&raw.body, &content_encoding) {
        Ok(Some(decompressed)) => body_bytes = decompressed,
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(encoding = %content_encoding, %err, "decompression failed, keeping raw bytes");
        }
    }

    let is_text = std::str::from_utf8(&body_bytes).is_ok() && !body_bytes.contains(&0);

    let (body, is_base64) = if is_text {
        (String::from_utf8(body_bytes).unwrap_or_default(), false)
    } else {
        (BASE64.encode(&body_bytes), true)
    };

    ResponseRecord {
        status: raw.status,
        status_text: raw.status_text.clone(),
        headers: flatten_headers(&raw.headers),
        body,
        size: raw_size,
        is_base64,
        content_encoding,
        ..Default::default()
    }
}

fn decompress(data: &[u8], encoding: &str) -> std::io::Result<Option<Vec<u8>>> {
    match encoding {
        "gzip" => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
            Ok(Some(out))
        }
        "deflate" => {
            // Servers disagree on whether "deflate" means zlib-wrapped or
            // raw; try zlib first, then raw.
            let mut out = Vec::new();
            if flate2::read::ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .is_ok()
            {
                return Ok(Some(out));
            }
            out.clear();
            flate2::read::DeflateDecoder::new(data).read_to_end(&mut out)?;
            Ok(Some(out))
        }
        _ => Ok(None),
    }
}

/// TLS version as shown in TlsInfo and the event timeline.
pub fn tls_version_string(v: u16) -> String {
    match v {
        0x0300 => "SSL 3.0".to_string(),
        0x0301 => "TLS 1.0".to_string(),
        0x0302 => "TLS 1.1".to_string(),
        0x0303 => "TLS 1.2".to_string(),
        0x0304 => "TLS 1.3".to_string(),
        other => format!("0x{:04X}", other),
    }
}

/// Standard reason phrase for a status code, empty when unassigned.
pub fn status_text(code: u16) -> &'static str {
    http::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn raw(body: &[u8], headers: Vec<(&str, &str)>) -> RawResponse {
        RawResponse {
            status: 200,
            status_text: "200 OK".into(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Bytes::copy_from_slice(body),
            http_version: "HTTP/1.1".into(),
        }
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn text_body_stays_text() {
        let record = assemble(&raw(b"hello world", vec![]));
        assert!(!record.is_base64);
        assert_eq!(record.body, "hello world");
        assert_eq!(record.size, 11);
    }

    #[test]
    fn binary_body_is_base64() {
        let record = assemble(&raw(&[0x00, 0x01, 0xff], vec![]));
        assert!(record.is_base64);
        assert_eq!(record.body, BASE64.encode([0x00, 0x01, 0xff]));
    }

    #[test]
    fn nul_byte_forces_binary_even_if_utf8() {
        let record = assemble(&raw(b"abc\0def", vec![]));
        assert!(record.is_base64);
    }

    #[test]
    fn gzip_body_is_decompressed_but_size_is_raw() {
        let compressed = gzip(b"payload payload payload");
        let compressed_len = compressed.len();
        let record = assemble(&raw(&compressed, vec![("Content-Encoding", "gzip")]));
        assert_eq!(record.body, "payload payload payload");
        assert_eq!(record.size, compressed_len);
        assert_eq!(record.content_encoding, "gzip");
    }

    #[test]
    fn broken_gzip_keeps_raw_bytes_and_encoding_tag() {
        let record = assemble(&raw(b"\x1f\x8bnot really gzip", vec![(
            "Content-Encoding",
            "gzip",
        )]));
        assert_eq!(record.content_encoding, "gzip");
        assert!(record.is_base64);
        assert_eq!(
            record.body,
            BASE64.encode(b"\x1f\x8bnot really gzip")
        );
    }

    #[test]
    fn multi_value_headers_join_with_newline() {
        let record = assemble(&raw(
            b"",
            vec![
                ("set-cookie", "a=1"),
                ("set-cookie", "b=2"),
                ("content-type", "text/plain"),
            ],
        ));
        assert_eq!(record.headers.get("Set-Cookie").unwrap(), "a=1\nb=2");
        assert_eq!(record.headers.get("Content-Type").unwrap(), "text/plain");
    }

    #[test]
    fn version_strings() {
        assert_eq!(tls_version_string(0x0303), "TLS 1.2");
        assert_eq!(tls_version_string(0x0304), "TLS 1.3");
        assert_eq!(tls_version_string(0x1234), "0x1234");
    }
}
