//! Built-in browser fingerprint templates.
//!
//! Each preset id maps to a JA3 template plus the GREASE/shuffle toggles
//! that browser actually exhibits, and the Akamai HTTP/2 parameters its
//! connections open with. Unknown ids fall back to Chrome.

use super::akamai::AkamaiFingerprint;
use super::hello::{build_from_ja3, ClientHelloSpec};
use super::ja3::Ja3;

/// Chrome 131 (also Edge 131 — same engine, same handshake).
const CHROME_131_JA3: &str = "771,4865-4866-4867-49195-49199-49196-49200-52393-52392-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17613-65037,4588-29-23-24,0";

/// Firefox 133. No GREASE, no extension shuffling, wider curve list.
const FIREFOX_133_JA3: &str = "771,4865-4867-4866-49195-49199-52393-52392-49196-49200-49162-49161-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-34-51-43-13-45-28-65037,4588-29-23-24-25-256-257,0";

/// Safari 18 on macOS; iOS 18 shares the handshake.
const SAFARI_18_JA3: &str = "771,4865-4866-4867-49196-49195-52393-49200-49199-52392-49162-49161-49172-49171-157-156-53-47-49160-49170-10,0-23-65281-10-11-16-5-13-18-51-45-43-27-21,29-23-24-25,0";

/// Android 14 / OkHttp default client.
const ANDROID_14_JA3: &str = "771,4865-4866-4867-49195-49196-52393-49199-49200-52392-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-13-51-45-43-21,29-23-24,0";

const CHROME_AKAMAI: &str = "1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p";
const FIREFOX_AKAMAI: &str = "1:65536;4:131072;5:16384|12517377|0|m,p,a,s";
const SAFARI_AKAMAI: &str = "2:0;4:2097152;3:100|10485760|0|m,s,p,a";
const OKHTTP_AKAMAI: &str = "4:16777216|16711681|0|m,p,a,s";

/// A named browser fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    #[default]
    Chrome131,
    Firefox133,
    Safari18,
    Edge131,
    Ios18,
    Android14,
}

impl Preset {
    /// Resolve a preset id; unrecognized ids fall back to Chrome.
    pub fn from_id(id: &str) -> Self {
        match id {
            "chrome_131" => Preset::Chrome131,
            "firefox_133" => Preset::Firefox133,
            "safari_18" => Preset::Safari18,
            "edge_131" => Preset::Edge131,
            "ios_18" => Preset::Ios18,
            "android_14" => Preset::Android14,
            _ => Preset::Chrome131,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Preset::Chrome131 => "chrome_131",
            Preset::Firefox133 => "firefox_133",
            Preset::Safari18 => "safari_18",
            Preset::Edge131 => "edge_131",
            Preset::Ios18 => "ios_18",
            Preset::Android14 => "android_14",
        }
    }

    fn ja3_text(&self) -> &'static str {
        match self {
            Preset::Chrome131 | Preset::Edge131 => CHROME_131_JA3,
            Preset::Firefox133 => FIREFOX_133_JA3,
            Preset::Safari18 | Preset::Ios18 => SAFARI_18_JA3,
            Preset::Android14 => ANDROID_14_JA3,
        }
    }

    /// The built-in ClientHello template for this preset.
    pub fn client_hello(&self) -> ClientHelloSpec {
        let ja3 = Ja3::parse(self.ja3_text()).expect("preset JA3 templates are well-formed");
        let mut spec = build_from_ja3(&ja3);
        match self {
            Preset::Chrome131 | Preset::Edge131 => {}
            Preset::Firefox133 => {
                spec.grease = false;
                spec.shuffle = false;
            }
            Preset::Safari18 | Preset::Ios18 => {
                spec.shuffle = false;
            }
            Preset::Android14 => {
                spec.grease = false;
                spec.shuffle = false;
            }
        }
        spec
    }

    /// The HTTP/2 parameters this browser opens connections with, used by
    /// the standard H2 transport when no custom Akamai text is supplied.
    pub fn akamai(&self) -> AkamaiFingerprint {
        let text = match self {
            Preset::Chrome131 | Preset::Edge131 => CHROME_AKAMAI,
            Preset::Firefox133 => FIREFOX_AKAMAI,
            Preset::Safari18 | Preset::Ios18 => SAFARI_AKAMAI,
            Preset::Android14 => OKHTTP_AKAMAI,
        };
        AkamaiFingerprint::parse(text).expect("preset Akamai templates are well-formed")
    }
}
