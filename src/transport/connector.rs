//! Fingerprinted TLS dialing.
//!
//! Dials through the proxy dialer, wraps the TCP stream in a byte tap,
//! then drives a BoringSSL handshake configured from the resolved
//! [`ClientHelloSpec`]: cipher order, curve order, signature algorithms,
//! version range, ALPN, GREASE and extension permutation. Timings, the
//! negotiated TLS parameters and the tap handle all land in the
//! per-request scratch the engine reads afterwards.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use boring::ssl::{SslConnector, SslMethod, SslVersion};
use boring_sys::SSL_CTX;
use std::os::raw::c_int;
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use crate::error::{Error, Result};
use crate::fingerprint::hello::{ClientHelloSpec, Extension};
use crate::fingerprint::TlsFingerprintSpec;
use crate::proxy::Dialer;
use crate::response::TlsInfo;
use crate::tap::{TapHandle, TapStream};
use crate::timing::TimingTracker;

extern "C" {
    /// Toggle GREASE values in the ClientHello (RFC 8701).
    fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
    /// Toggle the Chrome 110+ extension order permutation.
    fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
}

/// Per-request connection state shared between the engine and the dial
/// callbacks: timing marks, tap handles (one per TCP connection), the
/// negotiated TLS parameters and the observed addresses.
#[derive(Debug, Default)]
pub struct Scratch {
    pub timing: TimingTracker,
    pub taps: Vec<TapHandle>,
    pub tls_info: Option<TlsInfo>,
    pub target: String,
    pub remote_addr: String,
    pub local_addr: String,
}

pub type SharedScratch = Arc<Mutex<Scratch>>;

/// A TLS stream over a tapped TCP connection.
pub type TlsStream = SslStream<TapStream<TcpStream>>;

/// The negotiated ALPN protocol of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alpn {
    H2,
    Http1,
    None,
}

/// Fingerprinted TLS dialer bound to one request's scratch.
pub struct TlsConnector {
    fingerprint: TlsFingerprintSpec,
    dialer: Dialer,
    scratch: SharedScratch,
}

impl TlsConnector {
    pub fn new(fingerprint: TlsFingerprintSpec, dialer: Dialer, scratch: SharedScratch) -> Self {
        Self {
            fingerprint,
            dialer,
            scratch,
        }
    }

    /// Plain TCP dial (plaintext HTTP); stamps TCP timing and addresses.
    pub async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream> {
        let tcp_start = Instant::now();
        let stream = self.dialer.dial(host, port).await?;
        let tcp_done = Instant::now();
        self.note_connection(&stream, host, port, tcp_start, tcp_done);
        Ok(stream)
    }

    /// Dial and handshake. Returns the TLS stream and the ALPN outcome.
    pub async fn connect_tls(&self, host: &str, port: u16) -> Result<(TlsStream, Alpn)> {
        let tcp_start = Instant::now();
        let stream = self.dialer.dial(host, port).await?;
        let tcp_done = Instant::now();
        self.note_connection(&stream, host, port, tcp_start, tcp_done);

        let tapped = TapStream::new(stream);
        {
            let mut scratch = self.scratch.lock().unwrap();
            scratch.taps.push(tapped.handle());
        }

        let mut hello = self.fingerprint.client_hello()?;
        if hello.shuffle {
            hello.shuffle_extensions(&mut rand::thread_rng());
        }
        let connector = build_connector(&hello)?;
        let config = connector
            .configure()
            .map_err(|e| Error::tls(format!("configure TLS: {}", e)))?;

        let tls_start = Instant::now();
        let tls = tokio_boring::connect(config, host, tapped)
            .await
            .map_err(|e| Error::tls(format!("handshake with {}: {}", host, e)))?;
        let tls_done = Instant::now();

        let ssl = tls.ssl();
        let alpn = match ssl.selected_alpn_protocol() {
            Some(b"h2") => Alpn::H2,
            Some(b"http/1.1") => Alpn::Http1,
            _ => Alpn::None,
        };
        let info = TlsInfo {
            version: version_name(ssl.version_str()),
            cipher_suite: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            ja3_hash: Some(hello.to_ja3().hash()),
            ja4_hash: (!self.fingerprint.custom_ja4.is_empty())
                .then(|| self.fingerprint.custom_ja4.clone()),
        };

        {
            let mut scratch = self.scratch.lock().unwrap();
            scratch.timing.set_tls(tls_start, tls_done);
            scratch.tls_info = Some(info);
        }

        tracing::debug!(host, ?alpn, "TLS handshake complete");
        Ok((tls, alpn))
    }

    fn note_connection(
        &self,
        stream: &TcpStream,
        host: &str,
        port: u16,
        tcp_start: Instant,
        tcp_done: Instant,
    ) {
        let mut scratch = self.scratch.lock().unwrap();
        scratch.timing.set_tcp(tcp_start, tcp_done);
        scratch.target = format!("{}:{}", host, port);
        if let Ok(addr) = stream.peer_addr() {
            scratch.remote_addr = addr.to_string();
        }
        if let Ok(addr) = stream.local_addr() {
            scratch.local_addr = addr.to_string();
        }
    }
}

/// Apply a [`ClientHelloSpec`] to a BoringSSL connector builder. The
/// typed extension list drives which features get switched on; list
/// order within supported_groups and the cipher list carries through.
fn build_connector(hello: &ClientHelloSpec) -> Result<SslConnector> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| Error::tls(format!("create connector: {}", e)))?;

    let ciphers = cipher_list(&hello.cipher_suites);
    if !ciphers.is_empty() {
        builder
            .set_cipher_list(&ciphers)
            .map_err(|e| Error::tls(format!("set cipher list: {}", e)))?;
    }

    let curves = curve_list(hello);
    if !curves.is_empty() {
        builder
            .set_curves_list(&curves)
            .map_err(|e| Error::tls(format!("set curves: {}", e)))?;
    }

    if let Some(sigalgs) = sigalg_list(hello) {
        builder
            .set_sigalgs_list(&sigalgs)
            .map_err(|e| Error::tls(format!("set signature algorithms: {}", e)))?;
    }

    builder
        .set_min_proto_version(Some(to_ssl_version(hello.min_version)))
        .map_err(|e| Error::tls(format!("set min version: {}", e)))?;
    builder
        .set_max_proto_version(Some(to_ssl_version(hello.max_version)))
        .map_err(|e| Error::tls(format!("set max version: {}", e)))?;

    builder
        .set_alpn_protos(b"\x02h2\x08http/1.1")
        .map_err(|e| Error::tls(format!("set ALPN: {}", e)))?;

    unsafe {
        let ctx = builder.as_ptr() as *mut SSL_CTX;
        SSL_CTX_set_grease_enabled(ctx, hello.grease as c_int);
        SSL_CTX_set_permute_extensions(ctx, hello.shuffle as c_int);
    }

    // Host verification against the SNI name stays on; the engine never
    // offers an insecure mode.
    Ok(builder.build())
}

fn to_ssl_version(version: u16) -> SslVersion {
    match version {
        0x0304 => SslVersion::TLS1_3,
        0x0302 => SslVersion::TLS1_1,
        0x0301 => SslVersion::TLS1,
        _ => SslVersion::TLS1_2,
    }
}

fn version_name(boring_name: &str) -> String {
    match boring_name {
        "TLSv1.3" => "TLS 1.3".to_string(),
        "TLSv1.2" => "TLS 1.2".to_string(),
        "TLSv1.1" => "TLS 1.1".to_string(),
        "TLSv1" => "TLS 1.0".to_string(),
        other => other.to_string(),
    }
}

/// OpenSSL config names for the TLS 1.2 suites a browser offers. TLS 1.3
/// suites are always enabled in BoringSSL and GREASE is injected by the
/// library, so both are skipped here.
fn cipher_list(ids: &[u16]) -> String {
    ids.iter()
        .filter_map(|&id| cipher_name(id))
        .collect::<Vec<_>>()
        .join(":")
}

fn cipher_name(id: u16) -> Option<&'static str> {
    match id {
        0xc02b => Some("ECDHE-ECDSA-AES128-GCM-SHA256"),
        0xc02f => Some("ECDHE-RSA-AES128-GCM-SHA256"),
        0xc02c => Some("ECDHE-ECDSA-AES256-GCM-SHA384"),
        0xc030 => Some("ECDHE-RSA-AES256-GCM-SHA384"),
        0xcca9 => Some("ECDHE-ECDSA-CHACHA20-POLY1305"),
        0xcca8 => Some("ECDHE-RSA-CHACHA20-POLY1305"),
        0xc009 => Some("ECDHE-ECDSA-AES128-SHA"),
        0xc00a => Some("ECDHE-ECDSA-AES256-SHA"),
        0xc013 => Some("ECDHE-RSA-AES128-SHA"),
        0xc014 => Some("ECDHE-RSA-AES256-SHA"),
        0xc008 => Some("ECDHE-ECDSA-DES-CBC3-SHA"),
        0xc012 => Some("ECDHE-RSA-DES-CBC3-SHA"),
        0x009c => Some("AES128-GCM-SHA256"),
        0x009d => Some("AES256-GCM-SHA384"),
        0x002f => Some("AES128-SHA"),
        0x0035 => Some("AES256-SHA"),
        0x000a => Some("DES-CBC3-SHA"),
        _ => None,
    }
}

fn curve_list(hello: &ClientHelloSpec) -> String {
    hello
        .curves()
        .iter()
        .filter_map(|&id| curve_name(id))
        .collect::<Vec<_>>()
        .join(":")
}

fn curve_name(id: u16) -> Option<&'static str> {
    match id {
        29 => Some("X25519"),
        23 => Some("P-256"),
        24 => Some("P-384"),
        25 => Some("P-521"),
        4588 => Some("X25519MLKEM768"),
        _ => None,
    }
}

fn sigalg_list(hello: &ClientHelloSpec) -> Option<String> {
    hello.extensions.iter().find_map(|e| match e {
        Extension::SignatureAlgorithms(schemes) => Some(
            schemes
                .iter()
                .filter_map(|&s| sigalg_name(s))
                .collect::<Vec<_>>()
                .join(":"),
        ),
        _ => None,
    })
}

fn sigalg_name(scheme: u16) -> Option<&'static str> {
    match scheme {
        0x0403 => Some("ecdsa_secp256r1_sha256"),
        0x0804 => Some("rsa_pss_rsae_sha256"),
        0x0401 => Some("rsa_pkcs1_sha256"),
        0x0503 => Some("ecdsa_secp384r1_sha384"),
        0x0805 => Some("rsa_pss_rsae_sha384"),
        0x0501 => Some("rsa_pkcs1_sha384"),
        0x0806 => Some("rsa_pss_rsae_sha512"),
        0x0601 => Some("rsa_pkcs1_sha512"),
        0x0402 => Some("ecdsa_secp256r1_sha384"),
        0x0603 => Some("ecdsa_secp521r1_sha512"),
        _ => None,
    }
}
