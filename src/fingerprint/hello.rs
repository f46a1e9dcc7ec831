//! ClientHello specification model.
//!
//! A [`ClientHelloSpec`] is the typed description of the handshake a
//! connection must emit: ordered cipher ids, a TLS version range and an
//! ordered extension list. [`build_from_ja3`] derives one from a parsed
//! JA3 the way Chrome would send it — GREASE spliced in, defaults filled,
//! extensions shuffled.

use rand::seq::SliceRandom;
use rand::Rng;

use super::ja3::{is_grease, Ja3};

pub const TLS12: u16 = 0x0303;
pub const TLS13: u16 = 0x0304;

/// X25519MLKEM768 hybrid group id.
pub const X25519_MLKEM768: u16 = 4588;

/// Default curve list when the JA3 omits one: X25519, P-256, P-384.
pub const DEFAULT_CURVES: [u16; 3] = [29, 23, 24];

/// Default signature algorithm set (Chrome-like) for extension 13.
pub const DEFAULT_SIGNATURE_ALGORITHMS: [u16; 8] = [
    0x0403, // ecdsa_secp256r1_sha256
    0x0804, // rsa_pss_rsae_sha256
    0x0401, // rsa_pkcs1_sha256
    0x0503, // ecdsa_secp384r1_sha384
    0x0805, // rsa_pss_rsae_sha384
    0x0501, // rsa_pkcs1_sha384
    0x0806, // rsa_pss_rsae_sha512
    0x0601, // rsa_pkcs1_sha512
];

/// One ClientHello extension. Order in the containing list is the order
/// on the wire. `Grease` is positional; `Opaque` preserves unknown ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// Injected GREASE extension (RFC 8701).
    Grease,
    /// server_name (0); the name itself comes from the dial target.
    Sni,
    /// status_request (5).
    StatusRequest,
    /// supported_groups (10) with a GREASE curve prepended.
    SupportedGroups(Vec<u16>),
    /// ec_point_formats (11).
    EcPointFormats(Vec<u8>),
    /// signature_algorithms (13).
    SignatureAlgorithms(Vec<u16>),
    /// application_layer_protocol_negotiation (16).
    Alpn(Vec<String>),
    /// status_request_v2 (17).
    StatusRequestV2,
    /// signed_certificate_timestamp (18).
    Sct,
    /// padding (21), boring-style length.
    Padding,
    /// extended_master_secret (23).
    ExtendedMasterSecret,
    /// compress_certificate (27), brotli.
    CompressCertificate,
    /// session_ticket (35).
    SessionTicket,
    /// supported_versions (43): GREASE, then the listed versions.
    SupportedVersions(Vec<u16>),
    /// psk_key_exchange_modes (45): psk_dhe_ke.
    PskKeyExchangeModes,
    /// key_share (51): ordered group ids, GREASE first.
    KeyShare(Vec<u16>),
    /// renegotiation_info (65281).
    RenegotiationInfo,
    /// application_settings at the old codepoint (17513), for "h2".
    ApplicationSettings,
    /// application_settings at the new codepoint (17613).
    ApplicationSettingsNew,
    /// GREASE encrypted_client_hello (65037).
    GreaseEch,
    /// Unknown id kept in place with an empty payload.
    Opaque { id: u16 },
}

impl Extension {
    /// The extension's codepoint; `None` for positional GREASE.
    pub fn id(&self) -> Option<u16> {
        match self {
            Extension::Grease => None,
            Extension::Sni => Some(0),
            Extension::StatusRequest => Some(5),
            Extension::SupportedGroups(_) => Some(10),
            Extension::EcPointFormats(_) => Some(11),
            Extension::SignatureAlgorithms(_) => Some(13),
            Extension::Alpn(_) => Some(16),
            Extension::StatusRequestV2 => Some(17),
            Extension::Sct => Some(18),
            Extension::Padding => Some(21),
            Extension::ExtendedMasterSecret => Some(23),
            Extension::CompressCertificate => Some(27),
            Extension::SessionTicket => Some(35),
            Extension::SupportedVersions(_) => Some(43),
            Extension::PskKeyExchangeModes => Some(45),
            Extension::KeyShare(_) => Some(51),
            Extension::RenegotiationInfo => Some(65281),
            Extension::ApplicationSettings => Some(17513),
            Extension::ApplicationSettingsNew => Some(17613),
            Extension::GreaseEch => Some(65037),
            Extension::Opaque { id } => Some(*id),
        }
    }
}

/// Complete handshake description applied by the TLS engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloSpec {
    /// Cipher suite ids in wire order, GREASE included.
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
    pub min_version: u16,
    pub max_version: u16,
    /// Whether the engine should GREASE the handshake.
    pub grease: bool,
    /// Whether the extension list gets the Chrome 106+ shuffle.
    pub shuffle: bool,
}

impl ClientHelloSpec {
    /// Extension codepoints in order, GREASE excluded — the JA3 view.
    pub fn extension_ids(&self) -> Vec<u16> {
        self.extensions.iter().filter_map(|e| e.id()).collect()
    }

    /// Curves offered in supported_groups, GREASE excluded.
    pub fn curves(&self) -> Vec<u16> {
        self.extensions
            .iter()
            .find_map(|e| match e {
                Extension::SupportedGroups(curves) => Some(
                    curves
                        .iter()
                        .copied()
                        .filter(|c| !is_grease(*c))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// EC point formats, `[0]` when the extension is absent.
    pub fn point_formats(&self) -> Vec<u8> {
        self.extensions
            .iter()
            .find_map(|e| match e {
                Extension::EcPointFormats(formats) => Some(formats.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// The JA3-equivalent of this spec (GREASE stripped), used for the
    /// `ja3Hash` reported next to the TLS info.
    pub fn to_ja3(&self) -> Ja3 {
        Ja3 {
            tls_version: TLS12,
            cipher_suites: self
                .cipher_suites
                .iter()
                .copied()
                .filter(|c| !is_grease(*c))
                .collect(),
            extensions: self.extension_ids(),
            curves: self.curves(),
            point_formats: self.point_formats(),
        }
    }

    /// Chrome 106+ style deterministic-given-RNG shuffle: permute the
    /// span between the leading GREASE and the trailing GREASE, keeping
    /// padding pinned at the end. Returns the permutation (new position
    /// -> old index within the span) so tests can invert it.
    pub fn shuffle_extensions<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<usize> {
        let first = self
            .extensions
            .iter()
            .position(|e| !matches!(e, Extension::Grease));
        let last = self.extensions.iter().rposition(|e| {
            !matches!(e, Extension::Grease) && !matches!(e, Extension::Padding)
        });
        let (Some(first), Some(last)) = (first, last) else {
            return Vec::new();
        };
        if first >= last {
            return Vec::new();
        }

        let span = last - first + 1;
        let mut order: Vec<usize> = (0..span).collect();
        order.shuffle(rng);

        let original: Vec<Extension> = self.extensions[first..=last].to_vec();
        for (new_pos, &old_idx) in order.iter().enumerate() {
            self.extensions[first + new_pos] = original[old_idx].clone();
        }
        order
    }
}

/// Build a [`ClientHelloSpec`] from a parsed JA3 per the Chrome rules:
/// GREASE cipher prepended, each extension id mapped in order (JA3-listed
/// GREASE dropped, unknown ids kept opaque), one GREASE extension spliced
/// on each end, then the shuffle applied by the engine at dial time.
pub fn build_from_ja3(ja3: &Ja3) -> ClientHelloSpec {
    let mut cipher_suites = Vec::with_capacity(ja3.cipher_suites.len() + 1);
    cipher_suites.push(0x0a0a);
    cipher_suites.extend(ja3.cipher_suites.iter().copied().filter(|c| !is_grease(*c)));

    let curves: Vec<u16> = if ja3.curves.is_empty() {
        DEFAULT_CURVES.to_vec()
    } else {
        ja3.curves.clone()
    };
    let point_formats: Vec<u8> = if ja3.point_formats.is_empty() {
        vec![0]
    } else {
        ja3.point_formats.clone()
    };

    let mut extensions = Vec::with_capacity(ja3.extensions.len() + 2);
    extensions.push(Extension::Grease);
    for &id in &ja3.extensions {
        if is_grease(id) {
            continue;
        }
        extensions.push(map_extension(id, &curves, &point_formats));
    }
    extensions.push(Extension::Grease);

    ClientHelloSpec {
        cipher_suites,
        compression_methods: vec![0],
        extensions,
        // 771 and 772 both get the full range: 1.3 negotiates through
        // supported_versions, 1.2 stays available like a real browser.
        min_version: TLS12,
        max_version: TLS13,
        grease: true,
        shuffle: true,
    }
}

fn map_extension(id: u16, curves: &[u16], point_formats: &[u8]) -> Extension {
    match id {
        0 => Extension::Sni,
        5 => Extension::StatusRequest,
        10 => {
            let mut greased = Vec::with_capacity(curves.len() + 1);
            greased.push(0x0a0a);
            greased.extend_from_slice(curves);
            Extension::SupportedGroups(greased)
        }
        11 => Extension::EcPointFormats(point_formats.to_vec()),
        13 => Extension::SignatureAlgorithms(DEFAULT_SIGNATURE_ALGORITHMS.to_vec()),
        16 => Extension::Alpn(vec!["h2".to_string(), "http/1.1".to_string()]),
        17 => Extension::StatusRequestV2,
        18 => Extension::Sct,
        21 => Extension::Padding,
        23 => Extension::ExtendedMasterSecret,
        27 => Extension::CompressCertificate,
        35 => Extension::SessionTicket,
        43 => Extension::SupportedVersions(vec![0x0a0a, TLS13, TLS12]),
        45 => Extension::PskKeyExchangeModes,
        51 => {
            let mut shares = vec![0x0a0a];
            if curves.contains(&X25519_MLKEM768) {
                shares.push(X25519_MLKEM768);
            }
            shares.push(29); // X25519
            Extension::KeyShare(shares)
        }
        65281 => Extension::RenegotiationInfo,
        17513 => Extension::ApplicationSettings,
        17613 => Extension::ApplicationSettingsNew,
        65037 => Extension::GreaseEch,
        other => Extension::Opaque { id: other },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn chrome_ja3() -> Ja3 {
        Ja3::parse("771,4865-4866-4867-49195-49199,0-23-65281-10-11-35-16-13-43-45-51,29-23-24,0")
            .unwrap()
    }

    #[test]
    fn grease_cipher_is_prepended() {
        let spec = build_from_ja3(&chrome_ja3());
        assert_eq!(spec.cipher_suites[0], 0x0a0a);
        assert_eq!(&spec.cipher_suites[1..], &[4865, 4866, 4867, 49195, 49199]);
    }

    #[test]
    fn extension_order_matches_ja3_between_grease_ends() {
        let ja3 = chrome_ja3();
        let spec = build_from_ja3(&ja3);
        assert!(matches!(spec.extensions.first(), Some(Extension::Grease)));
        assert!(matches!(spec.extensions.last(), Some(Extension::Grease)));
        assert_eq!(spec.extension_ids(), ja3.extensions);
    }

    #[test]
    fn ja3_grease_extensions_are_stripped() {
        let ja3 = Ja3::parse("771,4865,2570-0-16-60138,29,0").unwrap();
        let spec = build_from_ja3(&ja3);
        assert_eq!(spec.extension_ids(), vec![0, 16]);
    }

    #[test]
    fn unknown_extensions_stay_opaque_in_place() {
        let ja3 = Ja3::parse("771,4865,0-34-16,29,0").unwrap();
        let spec = build_from_ja3(&ja3);
        assert_eq!(spec.extension_ids(), vec![0, 34, 16]);
        assert!(spec
            .extensions
            .iter()
            .any(|e| matches!(e, Extension::Opaque { id: 34 })));
    }

    #[test]
    fn supported_groups_gets_grease_and_defaults() {
        let ja3 = Ja3::parse("771,4865,10,,").unwrap();
        let spec = build_from_ja3(&ja3);
        let Some(Extension::SupportedGroups(groups)) = spec
            .extensions
            .iter()
            .find(|e| matches!(e, Extension::SupportedGroups(_)))
        else {
            panic!("missing supported_groups");
        };
        assert_eq!(groups[0], 0x0a0a);
        assert_eq!(&groups[1..], &DEFAULT_CURVES);
        assert_eq!(spec.point_formats(), vec![0]);
    }

    #[test]
    fn key_share_includes_mlkem_when_listed() {
        let ja3 = Ja3::parse("771,4865,51,4588-29-23-24,0").unwrap();
        let spec = build_from_ja3(&ja3);
        let Some(Extension::KeyShare(shares)) = spec
            .extensions
            .iter()
            .find(|e| matches!(e, Extension::KeyShare(_)))
        else {
            panic!("missing key_share");
        };
        assert_eq!(shares, &vec![0x0a0a, X25519_MLKEM768, 29]);

        let plain = build_from_ja3(&Ja3::parse("771,4865,51,29-23-24,0").unwrap());
        let Some(Extension::KeyShare(shares)) = plain
            .extensions
            .iter()
            .find(|e| matches!(e, Extension::KeyShare(_)))
        else {
            panic!("missing key_share");
        };
        assert_eq!(shares, &vec![0x0a0a, 29]);
    }

    #[test]
    fn supported_versions_lead_with_grease() {
        let spec = build_from_ja3(&Ja3::parse("771,4865,43,29,0").unwrap());
        let Some(Extension::SupportedVersions(versions)) = spec
            .extensions
            .iter()
            .find(|e| matches!(e, Extension::SupportedVersions(_)))
        else {
            panic!("missing supported_versions");
        };
        assert_eq!(versions, &vec![0x0a0a, TLS13, TLS12]);
    }

    #[test]
    fn version_range_is_12_to_13_for_771_and_772() {
        for ver in ["771", "772", "770"] {
            let spec = build_from_ja3(&Ja3::parse(&format!("{},4865,0,29,0", ver)).unwrap());
            assert_eq!(spec.min_version, TLS12);
            assert_eq!(spec.max_version, TLS13);
            assert_eq!(spec.compression_methods, vec![0]);
        }
    }

    #[test]
    fn shuffle_is_invertible_with_its_permutation() {
        let ja3 = chrome_ja3();
        let mut spec = build_from_ja3(&ja3);
        let before = spec.extensions.clone();

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let perm = spec.shuffle_extensions(&mut rng);
        assert!(!perm.is_empty());

        // Undo: the permutation maps new span positions to old indexes.
        let first = spec
            .extensions
            .iter()
            .position(|e| !matches!(e, Extension::Grease))
            .unwrap();
        let span = perm.len();
        let shuffled: Vec<Extension> = spec.extensions[first..first + span].to_vec();
        let mut restored = spec.extensions.clone();
        for (new_pos, &old_idx) in perm.iter().enumerate() {
            restored[first + old_idx] = shuffled[new_pos].clone();
        }
        assert_eq!(restored, before);
        // GREASE bookends never move.
        assert!(matches!(spec.extensions.first(), Some(Extension::Grease)));
        assert!(matches!(spec.extensions.last(), Some(Extension::Grease)));
    }

    #[test]
    fn padding_stays_pinned_after_shuffle() {
        let ja3 = Ja3::parse("771,4865,0-16-13-21,29,0").unwrap();
        let mut spec = build_from_ja3(&ja3);
        let mut rng = StdRng::seed_from_u64(7);
        spec.shuffle_extensions(&mut rng);
        let ids = spec.extension_ids();
        assert_eq!(*ids.last().unwrap(), 21);
    }

    #[test]
    fn to_ja3_round_trips_modulo_grease() {
        let ja3 = chrome_ja3();
        let spec = build_from_ja3(&ja3);
        let back = spec.to_ja3();
        assert_eq!(back.cipher_suites, ja3.cipher_suites);
        assert_eq!(back.extensions, ja3.extensions);
        assert_eq!(back.curves, ja3.curves);
        assert_eq!(back.point_formats, ja3.point_formats);
    }
}
