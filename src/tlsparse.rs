//! TLS record annotation for the connection timeline.
//!
//! Walks the byte-tap entries of a connection and interprets each chunk
//! as a sequence of TLS records, producing one human-readable event per
//! record: ClientHello with cipher/extension counts and the SNI,
//! ServerHello with the negotiated version and cipher, certificates with
//! subject/issuer/expiry, alerts with level and description.

use std::fmt::Write as _;

use boring::nid::Nid;
use boring::x509::X509;

use crate::response::{tls_version_string, ConnEvent};
use crate::tap::TapEntry;

/// Annotate captured entries into connection events. Every event summary
/// carries a `(N bytes)` suffix and the full lowercase hex of its chunk.
pub fn parse_tls_records(entries: &[TapEntry]) -> Vec<ConnEvent> {
    let mut events = Vec::with_capacity(entries.len());

    for entry in entries {
        let (mut summary, detail) = if entry.data.len() >= 5 {
            annotate_record(&entry.data)
        } else {
            (String::new(), String::new())
        };
        if summary.is_empty() {
            summary = "Data".to_string();
        }

        events.push(ConnEvent {
            time: entry.elapsed.as_micros() as f64 / 1000.0,
            direction: entry.direction.as_str().to_string(),
            size: entry.data.len(),
            summary: format!("{} ({} bytes)", summary, entry.data.len()),
            detail,
            hex_preview: hex_lower(&entry.data),
        });
    }

    events
}

fn hex_lower(data: &[u8]) -> String {
    data.iter().fold(String::with_capacity(data.len() * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// Interpret the first TLS record of a chunk: `type(1) version(2) len(2)`.
fn annotate_record(data: &[u8]) -> (String, String) {
    let content_type = data[0];
    let version = u16::from_be_bytes([data[1], data[2]]);
    let record_len = u16::from_be_bytes([data[3], data[4]]) as usize;
    let ver_str = tls_version_string(version);

    // Bound the payload to the declared record length so a chunk holding
    // several records does not bleed into the next one.
    let mut payload = &data[5..];
    if record_len < payload.len() {
        payload = &payload[..record_len];
    }

    match content_type {
        20 => ("ChangeCipherSpec".to_string(), ver_str),
        21 => annotate_alert(payload, ver_str),
        22 => annotate_handshake(payload, ver_str),
        23 => ("Application Data".to_string(), ver_str),
        other => (format!("TLS Record (type={})", other), ver_str),
    }
}

fn annotate_handshake(payload: &[u8], ver_str: String) -> (String, String) {
    if payload.len() < 4 {
        return ("Handshake".to_string(), ver_str);
    }
    let body = &payload[4..];
    match payload[0] {
        1 => ("ClientHello".to_string(), client_hello_detail(body, ver_str)),
        2 => ("ServerHello".to_string(), server_hello_detail(body, ver_str)),
        11 => ("Certificate".to_string(), certificate_detail(body, ver_str)),
        12 => ("ServerKeyExchange".to_string(), ver_str),
        13 => ("CertificateRequest".to_string(), ver_str),
        14 => ("ServerHelloDone".to_string(), ver_str),
        15 => ("CertificateVerify".to_string(), ver_str),
        16 => ("ClientKeyExchange".to_string(), ver_str),
        20 => ("Finished".to_string(), ver_str),
        other => (format!("Handshake (type={})", other), ver_str),
    }
}

/// `TLS 1.2, Ciphers: 16, Extensions: 18, SNI: example.com`
fn client_hello_detail(data: &[u8], ver_str: String) -> String {
    let mut parts = vec![ver_str];

    // client_version(2) + random(32)
    if data.len() < 34 {
        return parts.remove(0);
    }
    let mut pos = 34;

    // session_id
    if pos >= data.len() {
        return parts.join(", ");
    }
    let sid_len = data[pos] as usize;
    if pos + 1 + sid_len > data.len() {
        return parts.join(", ");
    }
    pos += 1 + sid_len;

    // cipher_suites
    if pos + 2 > data.len() {
        return parts.join(", ");
    }
    let cs_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    parts.push(format!("Ciphers: {}", cs_len / 2));
    pos += 2 + cs_len;

    // compression_methods
    if pos >= data.len() {
        return parts.join(", ");
    }
    let comp_len = data[pos] as usize;
    pos += 1 + comp_len;

    // extensions
    if pos + 2 > data.len() {
        return parts.join(", ");
    }
    let ext_total = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;
    let ext_end = (pos + ext_total).min(data.len());

    let mut ext_count = 0;
    let mut sni = String::new();
    while pos + 4 <= ext_end {
        let ext_type = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let ext_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        ext_count += 1;

        // server_name: list_len(2) type(1) name_len(2) name
        if ext_type == 0 && ext_len > 5 && pos + 4 + ext_len <= data.len() {
            let name_len = u16::from_be_bytes([data[pos + 7], data[pos + 8]]) as usize;
            if pos + 9 + name_len <= data.len() {
                sni = String::from_utf8_lossy(&data[pos + 9..pos + 9 + name_len]).into_owned();
            }
        }
        pos += 4 + ext_len;
    }

    parts.push(format!("Extensions: {}", ext_count));
    if !sni.is_empty() {
        parts.push(format!("SNI: {}", sni));
    }
    parts.join(", ")
}

/// Version comes from the server_version field so a TLS 1.3 ServerHello
/// (whose record layer still says 1.2) reads correctly.
fn server_hello_detail(data: &[u8], ver_str: String) -> String {
    let mut parts = vec![ver_str];

    if data.len() < 34 {
        return parts.remove(0);
    }
    let server_version = u16::from_be_bytes([data[0], data[1]]);
    parts[0] = tls_version_string(server_version);
    let mut pos = 34;

    if pos >= data.len() {
        return parts.join(", ");
    }
    let sid_len = data[pos] as usize;
    if pos + 1 + sid_len > data.len() {
        return parts.join(", ");
    }
    pos += 1 + sid_len;

    if pos + 2 > data.len() {
        return parts.join(", ");
    }
    let cipher = u16::from_be_bytes([data[pos], data[pos + 1]]);
    parts.push(format!("Cipher: 0x{:04X}", cipher));
    parts.join(", ")
}

/// First three certificates of the chain; the leaf shows subject, issuer
/// and expiry, intermediates show their CN. Parse errors drop silently.
fn certificate_detail(data: &[u8], ver_str: String) -> String {
    if data.len() < 3 {
        return ver_str;
    }
    let mut pos = 3; // certificates_length(3)

    let mut parts = Vec::new();
    let mut cert_idx = 0;
    while pos + 3 <= data.len() && cert_idx < 3 {
        let cert_len = ((data[pos] as usize) << 16)
            | ((data[pos + 1] as usize) << 8)
            | data[pos + 2] as usize;
        pos += 3;
        if pos + cert_len > data.len() {
            break;
        }
        if let Ok(cert) = X509::from_der(&data[pos..pos + cert_len]) {
            let cn = name_entry(&cert, true);
            if cert_idx == 0 {
                let issuer = name_entry(&cert, false);
                let expires = asn1_date(&cert.not_after().to_string());
                parts.push(format!("CN={}, Issuer={}, Expires={}", cn, issuer, expires));
            } else {
                parts.push(format!("CA: {}", cn));
            }
        }
        pos += cert_len;
        cert_idx += 1;
    }

    if parts.is_empty() {
        ver_str
    } else {
        parts.join(" | ")
    }
}

fn name_entry(cert: &X509, subject: bool) -> String {
    let name = if subject {
        cert.subject_name()
    } else {
        cert.issuer_name()
    };
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|e| e.data().as_utf8().ok().map(|s| s.to_string()))
        .unwrap_or_default()
}

/// Reduce an ASN.1 time display ("Jun  4 12:00:00 2031 GMT") to
/// `YYYY-MM-DD`; falls back to the raw string when unparseable.
fn asn1_date(display: &str) -> String {
    let fields: Vec<&str> = display.split_whitespace().collect();
    if fields.len() < 4 {
        return display.to_string();
    }
    let month = match fields[0] {
        "Jan" => "01",
        "Feb" => "02",
        "Mar" => "03",
        "Apr" => "04",
        "May" => "05",
        "Jun" => "06",
        "Jul" => "07",
        "Aug" => "08",
        "Sep" => "09",
        "Oct" => "10",
        "Nov" => "11",
        "Dec" => "12",
        _ => return display.to_string(),
    };
    let (Ok(day), Ok(year)) = (fields[1].parse::<u8>(), fields[3].parse::<u16>()) else {
        return display.to_string();
    };
    format!("{:04}-{}-{:02}", year, month, day)
}

fn annotate_alert(payload: &[u8], ver_str: String) -> (String, String) {
    if payload.len() < 2 {
        return ("Alert".to_string(), ver_str);
    }
    let level = if payload[0] == 2 { "fatal" } else { "warning" };
    let desc = alert_description(payload[1]);
    (format!("Alert: {} ({})", desc, level), ver_str)
}

fn alert_description(code: u8) -> String {
    match code {
        0 => "close_notify".to_string(),
        10 => "unexpected_message".to_string(),
        20 => "bad_record_mac".to_string(),
        40 => "handshake_failure".to_string(),
        42 => "bad_certificate".to_string(),
        48 => "unknown_ca".to_string(),
        50 => "decode_error".to_string(),
        70 => "protocol_version".to_string(),
        112 => "unrecognized_name".to_string(),
        other => format!("code_{}", other),
    }
}
