//! TLS and HTTP/2 fingerprint models.

pub mod akamai;
pub mod hello;
pub mod ja3;
pub mod presets;

use serde::{Deserialize, Serialize};

pub use akamai::AkamaiFingerprint;
pub use hello::{build_from_ja3, ClientHelloSpec, Extension};
pub use ja3::Ja3;
pub use presets::Preset;

use crate::error::Result;

/// The fingerprint configuration the front-end hands the engine: a named
/// preset, or `custom` with a JA3 text, an optional advisory JA4 text and
/// an optional Akamai HTTP/2 text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsFingerprintSpec {
    /// Preset id, or "custom".
    #[serde(default)]
    pub preset: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_ja3: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_ja4: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_akamai: String,
}

impl TlsFingerprintSpec {
    pub fn preset(id: &str) -> Self {
        Self {
            preset: id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_custom(&self) -> bool {
        self.preset == "custom" && !self.custom_ja3.is_empty()
    }

    /// Resolve to the ClientHello the connection must emit.
    pub fn client_hello(&self) -> Result<ClientHelloSpec> {
        if self.is_custom() {
            let ja3 = Ja3::parse(&self.custom_ja3)?;
            Ok(build_from_ja3(&ja3))
        } else {
            Ok(Preset::from_id(&self.preset).client_hello())
        }
    }

    /// The custom Akamai fingerprint, if one is configured.
    pub fn akamai_override(&self) -> Result<Option<AkamaiFingerprint>> {
        if self.preset == "custom" && !self.custom_akamai.is_empty() {
            AkamaiFingerprint::parse(&self.custom_akamai).map(Some)
        } else {
            Ok(None)
        }
    }

    /// HTTP/2 parameters for the standard transport: the preset's, or
    /// Chrome's when running a custom JA3 without an Akamai text.
    pub fn akamai_defaults(&self) -> AkamaiFingerprint {
        if self.preset == "custom" {
            Preset::Chrome131.akamai()
        } else {
            Preset::from_id(&self.preset).akamai()
        }
    }
}
