//! HPACK (RFC 7541) with caller-controlled field ordering.
//!
//! The encoder emits pseudo-headers in the order dictated by the Akamai
//! fingerprint, then regular headers in the caller's order — the header
//! block layout is part of the wire fingerprint. The decoder is a full
//! implementation (indexing, dynamic table updates, Huffman strings)
//! sized at 65536 to match common server advertisements.

use std::collections::VecDeque;

use super::huffman;

/// RFC 7541 Appendix A static table, indices 1..=61.
const STATIC_TABLE: [(&[u8], &[u8]); 61] = [
    (b":authority", b""),
    (b":method", b"GET"),
    (b":method", b"POST"),
    (b":path", b"/"),
    (b":path", b"/index.html"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"200"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"304"),
    (b":status", b"400"),
    (b":status", b"404"),
    (b":status", b"500"),
    (b"accept-charset", b""),
    (b"accept-encoding", b"gzip, deflate"),
    (b"accept-language", b""),
    (b"accept-ranges", b""),
    (b"accept", b""),
    (b"access-control-allow-origin", b""),
    (b"age", b""),
    (b"allow", b""),
    (b"authorization", b""),
    (b"cache-control", b""),
    (b"content-disposition", b""),
    (b"content-encoding", b""),
    (b"content-language", b""),
    (b"content-length", b""),
    (b"content-location", b""),
    (b"content-range", b""),
    (b"content-type", b""),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"expect", b""),
    (b"expires", b""),
    (b"from", b""),
    (b"host", b""),
    (b"if-match", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"if-range", b""),
    (b"if-unmodified-since", b""),
    (b"last-modified", b""),
    (b"link", b""),
    (b"location", b""),
    (b"max-forwards", b""),
    (b"proxy-authenticate", b""),
    (b"proxy-authorization", b""),
    (b"range", b""),
    (b"referer", b""),
    (b"refresh", b""),
    (b"retry-after", b""),
    (b"server", b""),
    (b"set-cookie", b""),
    (b"strict-transport-security", b""),
    (b"transfer-encoding", b""),
    (b"user-agent", b""),
    (b"vary", b""),
    (b"via", b""),
    (b"www-authenticate", b""),
];

/// Headers HTTP/2 forbids (RFC 9113 §8.2.2); dropped on encode.
const CONNECTION_HEADERS: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// FIFO dynamic table with RFC 7541 size accounting (entry + 32).
struct DynamicTable {
    entries: VecDeque<(Vec<u8>, Vec<u8>)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict();
    }

    fn add(&mut self, name: Vec<u8>, value: Vec<u8>) {
        let entry_size = name.len() + value.len() + 32;
        self.entries.push_front((name, value));
        self.size += entry_size;
        self.evict();
    }

    fn evict(&mut self) {
        while self.size > self.max_size {
            let Some((name, value)) = self.entries.pop_back() else {
                break;
            };
            self.size -= name.len() + value.len() + 32;
        }
    }

    /// 1-based dynamic index (1 = most recent).
    fn get(&self, index: usize) -> Option<(&[u8], &[u8])> {
        self.entries
            .get(index - 1)
            .map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    fn find(&self, name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
        let mut name_match = None;
        for (i, (n, v)) in self.entries.iter().enumerate() {
            if n == name {
                if v == value {
                    return (Some(i + 1), Some(i + 1));
                }
                name_match.get_or_insert(i + 1);
            }
        }
        (None, name_match)
    }
}

fn static_find(name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
    let mut name_match = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if *n == name {
            if *v == value {
                return (Some(i + 1), Some(i + 1));
            }
            name_match.get_or_insert(i + 1);
        }
    }
    (None, name_match)
}

/// Write an integer with an N-bit prefix into the last byte of `buf`
/// (RFC 7541 §5.1). The caller has already pushed the pattern byte.
fn encode_integer(buf: &mut Vec<u8>, value: usize, prefix_bits: u8) {
    let max_prefix = (1usize << prefix_bits) - 1;
    let last = buf.len() - 1;
    if value < max_prefix {
        buf[last] |= value as u8;
        return;
    }
    buf[last] |= max_prefix as u8;
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        buf.push((remaining % 128 + 128) as u8);
        remaining /= 128;
    }
    buf.push(remaining as u8);
}

/// Read an integer with an N-bit prefix. Returns (value, bytes consumed
/// beyond the prefix byte).
fn decode_integer(data: &[u8], prefix_bits: u8) -> Result<(usize, usize), String> {
    if data.is_empty() {
        return Err("integer: empty input".to_string());
    }
    let max_prefix = (1usize << prefix_bits) - 1;
    let prefix = (data[0] as usize) & max_prefix;
    if prefix < max_prefix {
        return Ok((prefix, 0));
    }
    let mut value = max_prefix;
    let mut shift = 0u32;
    let mut pos = 1;
    loop {
        let Some(&byte) = data.get(pos) else {
            return Err("integer: truncated".to_string());
        };
        value += ((byte & 0x7f) as usize) << shift;
        shift += 7;
        pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
        if shift > 28 {
            return Err("integer: overflow".to_string());
        }
    }
    Ok((value, pos - 1))
}

fn encode_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(0); // no Huffman on emit
    encode_integer(buf, data.len(), 7);
    buf.extend_from_slice(data);
}

/// HPACK encoder driving the fingerprint-controlled header block.
pub struct Encoder {
    table: DynamicTable,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            table: DynamicTable::new(4096),
        }
    }

    /// Encode a request header block.
    ///
    /// Pseudo-headers go first in `pseudo_order`; then, when
    /// `ordered_keys` is non-empty, the named keys in that order (all
    /// values per key consecutively, names lowercased), then any headers
    /// not named, in their own insertion order.
    pub fn encode_request(
        &mut self,
        method: &str,
        scheme: &str,
        authority: &str,
        path: &str,
        pseudo_order: &[String],
        ordered_keys: &[String],
        headers: &[(String, String)],
    ) -> Vec<u8> {
        let mut block = Vec::with_capacity(256);

        for pseudo in pseudo_order {
            let value = match pseudo.as_str() {
                ":method" => method,
                ":authority" => authority,
                ":scheme" => scheme,
                ":path" => path,
                _ => continue,
            };
            self.encode_field(&mut block, pseudo.as_bytes(), value.as_bytes());
        }

        let emit = |this: &mut Self, block: &mut Vec<u8>, name: &str, value: &str| {
            if name.starts_with(':') || name.is_empty() {
                return;
            }
            let lower = name.to_ascii_lowercase();
            if CONNECTION_HEADERS.contains(&lower.as_str()) {
                return;
            }
            this.encode_field(block, lower.as_bytes(), value.as_bytes());
        };

        if ordered_keys.is_empty() {
            for (name, value) in headers {
                emit(self, &mut block, name, value);
            }
        } else {
            let mut written = vec![false; headers.len()];
            for key in ordered_keys {
                for (i, (name, value)) in headers.iter().enumerate() {
                    if !written[i] && name.eq_ignore_ascii_case(key) {
                        emit(self, &mut block, name, value);
                        written[i] = true;
                    }
                }
            }
            for (i, (name, value)) in headers.iter().enumerate() {
                if !written[i] {
                    emit(self, &mut block, name, value);
                }
            }
        }

        block
    }

    fn encode_field(&mut self, block: &mut Vec<u8>, name: &[u8], value: &[u8]) {
        let (static_full, static_name) = static_find(name, value);
        if let Some(index) = static_full {
            block.push(0x80);
            encode_integer(block, index, 7);
            return;
        }
        let (dyn_full, dyn_name) = self.table.find(name, value);
        if let Some(index) = dyn_full {
            block.push(0x80);
            encode_integer(block, 61 + index, 7);
            return;
        }

        // Literal with incremental indexing, indexed name when we have one.
        let name_index = static_name.or(dyn_name.map(|i| 61 + i));
        block.push(0x40);
        match name_index {
            Some(index) => encode_integer(block, index, 6),
            None => {
                encode_string(block, name);
            }
        }
        encode_string(block, value);
        self.table.add(name.to_vec(), value.to_vec());
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// HPACK decoder.
pub struct Decoder {
    table: DynamicTable,
}

impl Decoder {
    /// Decoder with a 65536-byte dynamic table ceiling.
    pub fn new() -> Self {
        Self {
            table: DynamicTable::new(65536),
        }
    }

    /// Decode a complete header block.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<(String, String)>, String> {
        let mut headers = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            let byte = data[pos];

            if byte & 0x80 != 0 {
                // Indexed field.
                let (index, extra) = decode_integer(&data[pos..], 7)?;
                pos += 1 + extra;
                let (name, value) = self.entry(index)?;
                headers.push((to_string(&name), to_string(&value)));
            } else if byte & 0xc0 == 0x40 {
                // Literal with incremental indexing.
                let (name, value, consumed) = self.literal(&data[pos..], 6)?;
                pos += consumed;
                headers.push((to_string(&name), to_string(&value)));
                self.table.add(name, value);
            } else if byte & 0xe0 == 0x20 {
                // Dynamic table size update.
                let (size, extra) = decode_integer(&data[pos..], 5)?;
                pos += 1 + extra;
                self.table.set_max_size(size);
            } else {
                // Literal without indexing / never indexed (same layout).
                let (name, value, consumed) = self.literal(&data[pos..], 4)?;
                pos += consumed;
                headers.push((to_string(&name), to_string(&value)));
            }
        }

        Ok(headers)
    }

    fn entry(&self, index: usize) -> Result<(Vec<u8>, Vec<u8>), String> {
        if index == 0 {
            return Err("indexed field with index 0".to_string());
        }
        if index <= 61 {
            let (name, value) = STATIC_TABLE[index - 1];
            Ok((name.to_vec(), value.to_vec()))
        } else {
            self.table
                .get(index - 61)
                .map(|(n, v)| (n.to_vec(), v.to_vec()))
                .ok_or_else(|| format!("invalid table index {}", index))
        }
    }

    /// Decode a literal field; returns (name, value, bytes consumed).
    fn literal(&self, data: &[u8], prefix_bits: u8) -> Result<(Vec<u8>, Vec<u8>, usize), String> {
        let (name_index, extra) = decode_integer(data, prefix_bits)?;
        let mut pos = 1 + extra;

        let name = if name_index == 0 {
            let (name, consumed) = decode_string(&data[pos..])?;
            pos += consumed;
            name
        } else {
            self.entry(name_index)?.0
        };

        let (value, consumed) = decode_string(&data[pos..])?;
        pos += consumed;
        Ok((name, value, pos))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_string(data: &[u8]) -> Result<(Vec<u8>, usize), String> {
    if data.is_empty() {
        return Err("string: empty input".to_string());
    }
    let huffman_flag = data[0] & 0x80 != 0;
    let (length, extra) = decode_integer(data, 7)?;
    let start = 1 + extra;
    let Some(raw) = data.get(start..start + length) else {
        return Err("string: truncated".to_string());
    };
    let decoded = if huffman_flag {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };
    Ok((decoded, start + length))
}

fn to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pseudo(order: &[&str]) -> Vec<String> {
        order.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn integer_rfc_examples() {
        // RFC 7541 C.1: 10 fits a 5-bit prefix; 1337 does not.
        let mut buf = vec![0u8];
        encode_integer(&mut buf, 10, 5);
        assert_eq!(buf, [0x0a]);

        let mut buf = vec![0u8];
        encode_integer(&mut buf, 1337, 5);
        assert_eq!(buf, [0x1f, 0x9a, 0x0a]);

        assert_eq!(decode_integer(&[0x0a], 5).unwrap(), (10, 0));
        assert_eq!(decode_integer(&[0x1f, 0x9a, 0x0a], 5).unwrap(), (1337, 2));
    }

    #[test]
    fn pseudo_headers_follow_given_order() {
        let mut encoder = Encoder::new();
        let block = encoder.encode_request(
            "GET",
            "https",
            "example.com",
            "/",
            &pseudo(&[":method", ":authority", ":scheme", ":path"]),
            &[],
            &[],
        );
        let decoded = Decoder::new().decode(&block).unwrap();
        let names: Vec<&str> = decoded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, [":method", ":authority", ":scheme", ":path"]);
        assert_eq!(decoded[1].1, "example.com");
    }

    #[test]
    fn firefox_pseudo_order() {
        let mut encoder = Encoder::new();
        let block = encoder.encode_request(
            "GET",
            "https",
            "example.com",
            "/x",
            &pseudo(&[":method", ":path", ":authority", ":scheme"]),
            &[],
            &[],
        );
        let decoded = Decoder::new().decode(&block).unwrap();
        let names: Vec<&str> = decoded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, [":method", ":path", ":authority", ":scheme"]);
    }

    #[test]
    fn ordered_keys_come_first_then_insertion_order() {
        let mut encoder = Encoder::new();
        let headers = owned(&[
            ("X-Alpha", "1"),
            ("X-Beta", "2"),
            ("X-Gamma", "3"),
        ]);
        let block = encoder.encode_request(
            "GET",
            "https",
            "example.com",
            "/",
            &pseudo(&[":method", ":authority", ":scheme", ":path"]),
            &["x-gamma".to_string(), "x-alpha".to_string()],
            &headers,
        );
        let decoded = Decoder::new().decode(&block).unwrap();
        let regular: Vec<&str> = decoded
            .iter()
            .map(|(n, _)| n.as_str())
            .filter(|n| !n.starts_with(':'))
            .collect();
        assert_eq!(regular, ["x-gamma", "x-alpha", "x-beta"]);
    }

    #[test]
    fn names_are_lowercased_and_connection_headers_dropped() {
        let mut encoder = Encoder::new();
        let headers = owned(&[
            ("User-Agent", "wraith/0.1"),
            ("Connection", "keep-alive"),
            ("Upgrade", "h2c"),
        ]);
        let block = encoder.encode_request(
            "GET",
            "https",
            "example.com",
            "/",
            &pseudo(&[":method", ":authority", ":scheme", ":path"]),
            &[],
            &headers,
        );
        let decoded = Decoder::new().decode(&block).unwrap();
        assert_eq!(decoded.len(), 5);
        assert_eq!(decoded[4].0, "user-agent");
        assert_eq!(decoded[4].1, "wraith/0.1");
    }

    #[test]
    fn repeated_fields_hit_the_dynamic_table() {
        let mut encoder = Encoder::new();
        let headers = owned(&[("x-token", "abc123")]);
        let order = pseudo(&[":method", ":authority", ":scheme", ":path"]);
        let first = encoder.encode_request("GET", "https", "a.com", "/", &order, &[], &headers);
        let second = encoder.encode_request("GET", "https", "a.com", "/", &order, &[], &headers);
        // Second block reuses indexed entries, so it is strictly smaller.
        assert!(second.len() < first.len());

        let mut decoder = Decoder::new();
        decoder.decode(&first).unwrap();
        let decoded = decoder.decode(&second).unwrap();
        assert!(decoded.contains(&("x-token".to_string(), "abc123".to_string())));
    }

    #[test]
    fn decodes_huffman_literals() {
        // :path with a Huffman value: "www.example.com" (RFC 7541 C.4.1
        // uses it as :authority; any indexed name works the same).
        let mut block = vec![0x41, 0x8c];
        block.extend_from_slice(&[
            0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ]);
        let decoded = Decoder::new().decode(&block).unwrap();
        assert_eq!(decoded, vec![(":authority".to_string(), "www.example.com".to_string())]);
    }

    #[test]
    fn decoder_handles_table_size_update() {
        // 0x3f 0xe1 0x1f = size update to 4096+... just use small: 0x20 = update to 0
        let mut decoder = Decoder::new();
        let decoded = decoder.decode(&[0x20, 0x82]).unwrap();
        assert_eq!(decoded, vec![(":method".to_string(), "GET".to_string())]);
    }

    #[test]
    fn invalid_index_is_an_error() {
        assert!(Decoder::new().decode(&[0xff, 0x80, 0x7f]).is_err());
    }

    #[test]
    fn dynamic_table_evicts_by_size() {
        let mut table = DynamicTable::new(100);
        table.add(b"aaaaaaaaaa".to_vec(), b"bbbbbbbbbb".to_vec()); // 52
        table.add(b"cccccccccc".to_vec(), b"dddddddddd".to_vec()); // 52 -> evicts first
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.get(1).unwrap().0, b"cccccccccc");
    }
}
