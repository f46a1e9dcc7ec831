//! The request engine.
//!
//! A [`Client`] holds a fingerprint configuration; every
//! [`Client::execute`] call assembles the request, dials a fresh
//! connection through the proxy dialer, round-trips over the selected
//! transport, follows redirects by hand and returns one fully
//! materialised [`ResponseRecord`] — body, flattened headers, timings,
//! TLS parameters, redirect hops and the annotated connection timeline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::Method;

use crate::error::{Error, Result};
use crate::fingerprint::TlsFingerprintSpec;
use crate::proxy::Dialer;
use crate::request::{assemble, AssembledRequest, RequestSpec};
use crate::response::{self, ConnTrace, RawResponse, RedirectHop, ResponseRecord};
use crate::tap::merge_taps;
use crate::tlsparse::parse_tls_records;
use crate::transport::{CustomH2, Scratch, SharedScratch, TlsConnector, Transport};

/// Default per-request deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Redirect cap applied when the request asks for 0.
const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Fingerprint-controlled HTTP client. Cheap to build; holds no
/// connections and no cross-request state.
pub struct Client {
    fingerprint: TlsFingerprintSpec,
    timeout: Duration,
}

impl Client {
    pub fn new(fingerprint: TlsFingerprintSpec) -> Self {
        Self {
            fingerprint,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute one request under the client's deadline.
    pub async fn execute(&self, spec: &RequestSpec) -> Result<ResponseRecord> {
        tokio::time::timeout(self.timeout, self.execute_inner(spec))
            .await
            .map_err(|_| Error::timeout(format!("request exceeded {:?}", self.timeout)))?
    }

    async fn execute_inner(&self, spec: &RequestSpec) -> Result<ResponseRecord> {
        let request = assemble(spec)?;
        let dialer = Dialer::from_spec(spec.proxy.as_ref())?;

        let scratch: SharedScratch = Arc::new(Mutex::new(Scratch::default()));
        scratch.lock().unwrap().timing.start_request();

        let connector = TlsConnector::new(self.fingerprint.clone(), dialer, scratch.clone());
        let custom = self.fingerprint.akamai_override()?.map(|fingerprint| {
            // The enabled header keys double as the wire order for the
            // custom transport's HEADERS frame.
            let header_order = spec
                .headers
                .iter()
                .filter(|h| h.enabled && !h.key.is_empty())
                .map(|h| h.key.clone())
                .collect();
            CustomH2::new(fingerprint, header_order)
        });
        let transport = Transport::new(
            &connector,
            custom,
            self.fingerprint.akamai_defaults(),
            scratch.clone(),
        );

        let (redirects, raw) = if spec.follow_redirects {
            follow_redirects(&transport, request, spec.max_redirects).await?
        } else {
            (Vec::new(), transport.round_trip(&request).await?)
        };

        scratch.lock().unwrap().timing.mark_body_done();

        let mut record = response::assemble(&raw);
        record.redirects = redirects;

        let scratch = scratch.lock().unwrap();
        record.timing = scratch.timing.result();
        record.tls_info = scratch.tls_info.clone();
        if !scratch.taps.is_empty() {
            let entries = merge_taps(&scratch.taps);
            record.conn_trace = Some(ConnTrace {
                events: parse_tls_records(&entries),
                target_addr: scratch.target.clone(),
                remote_addr: scratch.remote_addr.clone(),
                local_addr: scratch.local_addr.clone(),
            });
        }

        Ok(record)
    }
}

/// Manual redirect loop. Each 3xx with a Location becomes a hop record;
/// the next request is a bare GET against the resolved URL — the body is
/// dropped and the method downgraded even for 307/308, diverging from
/// RFC 9110 to preserve the behavior callers already depend on.
async fn follow_redirects(
    transport: &Transport<'_>,
    request: AssembledRequest,
    max_redirects: u32,
) -> Result<(Vec<RedirectHop>, RawResponse)> {
    let cap = if max_redirects == 0 {
        DEFAULT_MAX_REDIRECTS
    } else {
        max_redirects
    };

    let mut hops = Vec::new();
    let mut current = request;

    for _ in 0..cap {
        let response = transport.round_trip(&current).await?;

        if response.status < 300 || response.status >= 400 {
            return Ok((hops, response));
        }
        let Some(location) = response.header("Location").map(str::to_string) else {
            return Ok((hops, response));
        };

        hops.push(RedirectHop {
            url: current.url.to_string(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response::flatten_headers(&response.headers),
        });

        let next = current
            .url
            .join(&location)
            .map_err(|e| Error::redirect(format!("invalid Location {:?}: {}", location, e)))?;
        tracing::debug!(from = %current.url, to = %next, status = response.status, "following redirect");

        current = AssembledRequest {
            method: Method::GET,
            url: next,
            headers: Vec::new(),
            body: None,
        };
    }

    Err(Error::redirect(format!("too many redirects (max {})", cap)))
}

/// JSON boundary for the GUI: request spec in, response record out, any
/// failure as `{"error": "<message>"}`.
pub async fn execute_json(request_json: &str, tls_json: &str) -> String {
    match execute_json_inner(request_json, tls_json).await {
        Ok(record) => record,
        Err(err) => {
            serde_json::json!({ "error": err.to_string() }).to_string()
        }
    }
}

async fn execute_json_inner(request_json: &str, tls_json: &str) -> Result<String> {
    let spec: RequestSpec = serde_json::from_str(request_json)?;
    let fingerprint: TlsFingerprintSpec = serde_json::from_str(tls_json)?;
    let record = Client::new(fingerprint).execute(&spec).await?;
    Ok(serde_json::to_string(&record)?)
}
