//! JA3 fingerprint text parsing.
//!
//! Grammar: `TLSVersion,Ciphers,Extensions,Curves,PointFormats` where the
//! lists are `-`-separated decimal ids and the last two are optional.

use crate::error::{Error, Result};

/// GREASE values per RFC 8701: `0x?a?a` with matching nibbles.
pub const GREASE_VALUES: [u16; 16] = [
    0x0a0a, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a, 0x9a9a, 0xaaaa,
    0xbaba, 0xcaca, 0xdada, 0xeaea, 0xfafa,
];

/// Whether a cipher/extension/group id is a GREASE value.
pub fn is_grease(value: u16) -> bool {
    GREASE_VALUES.contains(&value)
}

/// Parsed components of a JA3 text string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ja3 {
    pub tls_version: u16,
    pub cipher_suites: Vec<u16>,
    pub extensions: Vec<u16>,
    pub curves: Vec<u16>,
    pub point_formats: Vec<u8>,
}

impl Ja3 {
    /// Parse a JA3 text. At least version, ciphers and extensions must be
    /// present; unparseable list items are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split(',').collect();
        if parts.len() < 3 {
            return Err(Error::config(format!(
                "invalid JA3: expected at least 3 comma-separated parts, got {}",
                parts.len()
            )));
        }

        let tls_version = parts[0]
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::config(format!("invalid JA3 TLS version {:?}", parts[0])))?;

        let mut ja3 = Ja3 {
            tls_version,
            ..Default::default()
        };
        ja3.cipher_suites = parse_u16_list(parts[1]);
        ja3.extensions = parse_u16_list(parts[2]);
        if let Some(curves) = parts.get(3) {
            ja3.curves = parse_u16_list(curves);
        }
        if let Some(formats) = parts.get(4) {
            ja3.point_formats = formats
                .split('-')
                .filter_map(|s| s.trim().parse::<u8>().ok())
                .collect();
        }
        Ok(ja3)
    }

    /// Re-serialize into the canonical five-field JA3 text.
    pub fn to_text(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.tls_version,
            join_u16(&self.cipher_suites),
            join_u16(&self.extensions),
            join_u16(&self.curves),
            self.point_formats
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("-"),
        )
    }

    /// MD5 hash of the JA3 text, lowercase hex.
    pub fn hash(&self) -> String {
        format!("{:x}", md5::compute(self.to_text().as_bytes()))
    }
}

fn parse_u16_list(part: &str) -> Vec<u16> {
    part.split('-')
        .filter_map(|s| s.trim().parse::<u16>().ok())
        .collect()
}

fn join_u16(list: &[u16]) -> String {
    list.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}
