//! Request model and assembly.
//!
//! A [`RequestSpec`] is what the front-end hands the engine: method, URL,
//! ordered key/value entries for query, headers and cookies, a body, auth
//! and an optional proxy. [`assemble`] turns it into the concrete pieces a
//! transport sends on the wire. Entry order is semantically significant —
//! the header list order is what ends up on the wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use http::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// A key/value entry with an enabled toggle, as edited in the GUI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValueEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl KeyValueEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: true,
            ..Default::default()
        }
    }

    fn is_active(&self) -> bool {
        self.enabled && !self.key.is_empty()
    }
}

/// A form-data entry. File entries are reserved for the multipart body
/// type, which is not implemented yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDataEntry {
    #[serde(flatten)]
    pub entry: KeyValueEntry,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Basic auth credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// API key auth: a key/value pair added to headers or the query string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyAuth {
    pub key: String,
    pub value: String,
    /// "header" or "query".
    pub add_to: String,
}

/// Request authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// "none", "bearer", "basic" or "apikey".
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apikey: Option<ApiKeyAuth>,
}

/// Proxy auth credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Per-request proxy specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    /// "none", "http" or "socks5".
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ProxyAuth>,
}

/// The complete request configuration handed to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub params: Vec<KeyValueEntry>,
    #[serde(default)]
    pub headers: Vec<KeyValueEntry>,
    #[serde(default)]
    pub cookies: Vec<KeyValueEntry>,
    #[serde(default)]
    pub body: String,
    /// "none", "json", "raw", "urlencoded"; "form" (multipart) is reserved.
    #[serde(default)]
    pub body_type: String,
    #[serde(default)]
    pub form_data: Vec<FormDataEntry>,
    #[serde(default)]
    pub auth: AuthSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default)]
    pub max_redirects: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// A request reduced to what goes on the wire. Header order is the order
/// the entries will be emitted in, for both HTTP/1.1 and HTTP/2.
#[derive(Debug, Clone)]
pub struct AssembledRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl AssembledRequest {
    /// host:port of the target, defaulting the port from the scheme.
    pub fn address(&self) -> Result<(String, u16)> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| Error::config("URL has no host"))?
            .to_string();
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| Error::config("URL has no usable port"))?;
        Ok((host, port))
    }

    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// Request-URI (path plus query), `/` at minimum.
    pub fn request_uri(&self) -> String {
        let mut uri = self.url.path().to_string();
        if uri.is_empty() {
            uri.push('/');
        }
        if let Some(q) = self.url.query() {
            uri.push('?');
            uri.push_str(q);
        }
        uri
    }

    fn header_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Set a header, replacing an existing entry with the same name while
    /// keeping its position in the list.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        match self.header_index(name) {
            Some(i) => self.headers[i].1 = value.into(),
            None => self.headers.push((name.to_string(), value.into())),
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.header_index(name).map(|i| self.headers[i].1.as_str())
    }
}

/// Build the wire-level request from a [`RequestSpec`]: merge query
/// entries into the URL, pick the body, apply headers, cookies, auth and
/// the default Content-Type.
pub fn assemble(spec: &RequestSpec) -> Result<AssembledRequest> {
    let method: Method = spec
        .method
        .parse()
        .map_err(|_| Error::config(format!("invalid method {:?}", spec.method)))?;

    let mut url = Url::parse(&spec.url)?;
    merge_query(&mut url, &spec.params);

    let body = build_body(spec);

    let mut req = AssembledRequest {
        method,
        url,
        headers: Vec::new(),
        body,
    };

    for h in &spec.headers {
        if h.is_active() {
            req.set_header(&h.key, h.value.clone());
        }
    }

    let cookie = spec
        .cookies
        .iter()
        .filter(|c| c.is_active())
        .map(|c| format!("{}={}", c.key, c.value))
        .collect::<Vec<_>>()
        .join("; ");
    if !cookie.is_empty() {
        req.set_header("Cookie", cookie);
    }

    apply_auth(&mut req, &spec.auth);

    if req.get_header("Content-Type").is_none() {
        match spec.body_type.as_str() {
            "json" => req.set_header("Content-Type", "application/json"),
            "urlencoded" => req.set_header("Content-Type", "application/x-www-form-urlencoded"),
            _ => {}
        }
    }

    Ok(req)
}

fn merge_query(url: &mut Url, params: &[KeyValueEntry]) {
    let active: Vec<_> = params.iter().filter(|p| p.is_active()).collect();
    if active.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for p in active {
        pairs.append_pair(&p.key, &p.value);
    }
}

fn build_body(spec: &RequestSpec) -> Option<Bytes> {
    match spec.body_type.as_str() {
        "json" | "raw" => {
            if spec.body.is_empty() {
                None
            } else {
                Some(Bytes::from(spec.body.clone().into_bytes()))
            }
        }
        "urlencoded" => {
            let mut encoder = url::form_urlencoded::Serializer::new(String::new());
            for fd in &spec.form_data {
                if fd.entry.is_active() {
                    encoder.append_pair(&fd.entry.key, &fd.entry.value);
                }
            }
            let encoded = encoder.finish();
            if encoded.is_empty() {
                None
            } else {
                Some(Bytes::from(encoded.into_bytes()))
            }
        }
        // TODO: multipart/form-data once the GUI grows a file picker.
        _ => None,
    }
}

fn apply_auth(req: &mut AssembledRequest, auth: &AuthSpec) {
    match auth.kind.as_str() {
        "bearer" => {
            if let Some(token) = auth.bearer.as_deref().filter(|t| !t.is_empty()) {
                req.set_header("Authorization", format!("Bearer {}", token));
            }
        }
        "basic" => {
            if let Some(basic) = &auth.basic {
                let cred = format!("{}:{}", basic.username, basic.password);
                req.set_header("Authorization", format!("Basic {}", BASE64.encode(cred)));
            }
        }
        "apikey" => {
            if let Some(apikey) = &auth.apikey {
                match apikey.add_to.as_str() {
                    "header" => req.set_header(&apikey.key, apikey.value.clone()),
                    "query" => {
                        req.url
                            .query_pairs_mut()
                            .append_pair(&apikey.key, &apikey.value);
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}
