//! # wraith
//!
//! HTTP client engine with wire-level fingerprint control: the TLS
//! handshake and HTTP/2 connection preface it emits reproduce a named
//! browser or a user-supplied JA3 + Akamai specification. Built for
//! API-debugging front-ends that need the bytes on the wire to be
//! indistinguishable from a real browser's.

pub mod client;
pub mod error;
pub mod fingerprint;
pub mod proxy;
pub mod request;
pub mod response;
pub mod storage;
pub mod tap;
pub mod timing;
pub mod tlsparse;
pub mod transport;

pub use client::{execute_json, Client};
pub use error::{Error, Result};
pub use fingerprint::{AkamaiFingerprint, Ja3, Preset, TlsFingerprintSpec};
pub use request::RequestSpec;
pub use response::ResponseRecord;
pub use storage::Storage;
