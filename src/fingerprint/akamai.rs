//! Akamai HTTP/2 fingerprint text parsing.
//!
//! Grammar: `SETTINGS|WINDOW_UPDATE|PRIORITY|HEADER_ORDER`, e.g.
//! `1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p`. Empty parts are
//! tolerated; the letters map `m,a,s,p` to the four pseudo-headers.

use crate::error::{Error, Result};

/// The four HTTP/2 request pseudo-headers, in default order.
pub const DEFAULT_PSEUDO_ORDER: [&str; 4] = [":method", ":authority", ":scheme", ":path"];

/// Parsed Akamai fingerprint: ordered SETTINGS, connection window-update
/// increment, raw priority text and the pseudo-header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkamaiFingerprint {
    /// SETTINGS parameters in the exact order they must appear on the wire.
    pub settings: Vec<(u16, u32)>,
    /// Stream-0 WINDOW_UPDATE increment; 0 suppresses the frame.
    pub window_update: u32,
    /// Raw priority section, `0` or a comma list; carried, not emitted.
    pub priority: String,
    /// Pseudo-header order for the HEADERS frame.
    pub header_order: Vec<String>,
}

impl Default for AkamaiFingerprint {
    fn default() -> Self {
        Self {
            settings: Vec::new(),
            window_update: 0,
            priority: String::new(),
            header_order: DEFAULT_PSEUDO_ORDER.map(String::from).to_vec(),
        }
    }
}

impl AkamaiFingerprint {
    /// Parse an Akamai fingerprint text.
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(Error::config("empty Akamai fingerprint"));
        }

        let parts: Vec<&str> = text.split('|').collect();
        let mut fp = AkamaiFingerprint::default();

        if !parts[0].is_empty() {
            for pair in parts[0].split(';') {
                let Some((id, val)) = pair.split_once(':') else {
                    continue;
                };
                let (Ok(id), Ok(val)) = (id.trim().parse::<u16>(), val.trim().parse::<u32>())
                else {
                    continue;
                };
                fp.settings.push((id, val));
            }
        }

        if let Some(wu) = parts.get(1) {
            if let Ok(val) = wu.trim().parse::<u32>() {
                fp.window_update = val;
            }
        }

        if let Some(priority) = parts.get(2) {
            fp.priority = priority.to_string();
        }

        if let Some(order) = parts.get(3) {
            let mapped: Vec<String> = order
                .split(',')
                .filter_map(|letter| match letter.trim() {
                    "m" => Some(":method".to_string()),
                    "a" => Some(":authority".to_string()),
                    "s" => Some(":scheme".to_string()),
                    "p" => Some(":path".to_string()),
                    _ => None,
                })
                .collect();
            if !mapped.is_empty() {
                fp.header_order = mapped;
            }
        }

        Ok(fp)
    }

    /// Re-serialize into the canonical four-part text.
    pub fn to_text(&self) -> String {
        let settings = self
            .settings
            .iter()
            .map(|(id, val)| format!("{}:{}", id, val))
            .collect::<Vec<_>>()
            .join(";");
        let order = self
            .header_order
            .iter()
            .filter_map(|h| match h.as_str() {
                ":method" => Some("m"),
                ":authority" => Some("a"),
                ":scheme" => Some("s"),
                ":path" => Some("p"),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(",");
        format!("{}|{}|{}|{}", settings, self.window_update, self.priority, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_AKAMAI: &str = "1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p";

    #[test]
    fn parses_settings_in_order() {
        let fp = AkamaiFingerprint::parse(CHROME_AKAMAI).unwrap();
        assert_eq!(
            fp.settings,
            vec![(1, 65536), (2, 0), (4, 6291456), (6, 262144)]
        );
        assert_eq!(fp.window_update, 15663105);
        assert_eq!(fp.priority, "0");
        assert_eq!(
            fp.header_order,
            vec![":method", ":authority", ":scheme", ":path"]
        );
    }

    #[test]
    fn firefox_style_order() {
        let fp = AkamaiFingerprint::parse("1:65536;4:131072;5:16384|12517377|0|m,p,a,s").unwrap();
        assert_eq!(
            fp.header_order,
            vec![":method", ":path", ":authority", ":scheme"]
        );
    }

    #[test]
    fn missing_parts_take_defaults() {
        let fp = AkamaiFingerprint::parse("1:65536").unwrap();
        assert_eq!(fp.settings, vec![(1, 65536)]);
        assert_eq!(fp.window_update, 0);
        assert_eq!(fp.priority, "");
        assert_eq!(fp.header_order, DEFAULT_PSEUDO_ORDER.to_vec());
    }

    #[test]
    fn unparseable_order_falls_back_to_default() {
        let fp = AkamaiFingerprint::parse("1:1|0|0|x,y").unwrap();
        assert_eq!(fp.header_order, DEFAULT_PSEUDO_ORDER.to_vec());
    }

    #[test]
    fn bad_settings_pairs_are_skipped() {
        let fp = AkamaiFingerprint::parse("1:65536;bogus;3:abc;4:1|0|0|m,a,s,p").unwrap();
        assert_eq!(fp.settings, vec![(1, 65536), (4, 1)]);
    }

    #[test]
    fn empty_text_is_an_error() {
        assert!(AkamaiFingerprint::parse("").is_err());
    }

    #[test]
    fn parse_is_idempotent_through_serialization() {
        let once = AkamaiFingerprint::parse(CHROME_AKAMAI).unwrap();
        let twice = AkamaiFingerprint::parse(&once.to_text()).unwrap();
        assert_eq!(once, twice);
    }
}
