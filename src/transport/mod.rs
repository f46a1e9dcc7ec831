//! Transport selection and the h2-then-h1 fallback.
//!
//! For `https` the transport tries HTTP/2 first — the custom
//! fingerprint-exact flavour when an Akamai text is configured, the
//! standard one otherwise — and silently retries over HTTP/1.1 on a
//! fresh connection if the h2 attempt fails or ALPN picked `http/1.1`.
//! Plain `http` goes straight to HTTP/1.1 over the proxy dialer.

pub mod connector;
pub mod h1;
pub mod h2;

use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::fingerprint::AkamaiFingerprint;
use crate::request::AssembledRequest;
use crate::response::RawResponse;

pub use connector::{Alpn, Scratch, SharedScratch, TlsConnector, TlsStream};
pub use h2::CustomH2;

/// Per-request transport stack.
pub struct Transport<'a> {
    connector: &'a TlsConnector,
    custom: Option<CustomH2>,
    h2_defaults: AkamaiFingerprint,
    scratch: SharedScratch,
}

impl<'a> Transport<'a> {
    pub fn new(
        connector: &'a TlsConnector,
        custom: Option<CustomH2>,
        h2_defaults: AkamaiFingerprint,
        scratch: SharedScratch,
    ) -> Self {
        Self {
            connector,
            custom,
            h2_defaults,
            scratch,
        }
    }

    /// Execute one request end to end on a fresh connection.
    pub async fn round_trip(&self, request: &AssembledRequest) -> Result<RawResponse> {
        if request.is_https() {
            self.round_trip_https(request).await
        } else {
            self.round_trip_http(request).await
        }
    }

    async fn round_trip_http(&self, request: &AssembledRequest) -> Result<RawResponse> {
        let (host, port) = request.address()?;
        let mut stream = self.connector.connect_tcp(&host, port).await?;
        let response = h1::round_trip(&mut stream, request, self.first_byte_hook()).await;
        let _ = stream.shutdown().await;
        response
    }

    async fn round_trip_https(&self, request: &AssembledRequest) -> Result<RawResponse> {
        let (host, port) = request.address()?;
        let (mut tls, alpn) = self.connector.connect_tls(&host, port).await?;

        if alpn != Alpn::H2 {
            // The server never offered h2; speak 1.1 on this connection.
            let response = h1::round_trip(&mut tls, request, self.first_byte_hook()).await;
            let _ = tls.shutdown().await;
            return response;
        }

        let attempt = match &self.custom {
            Some(custom) => {
                let result = custom
                    .round_trip(&mut tls, request, self.first_byte_hook())
                    .await;
                let _ = tls.shutdown().await;
                result
            }
            None => {
                h2::standard::round_trip(tls, &self.h2_defaults, request, self.first_byte_hook())
                    .await
            }
        };

        match attempt {
            Ok(response) => Ok(response),
            Err(err) => {
                // The h2 error is suppressed in favour of the h1 outcome;
                // the retry gets its own connection and byte tap.
                tracing::debug!(%err, "h2 attempt failed, falling back to HTTP/1.1");
                let (mut tls, _) = self.connector.connect_tls(&host, port).await?;
                let response = h1::round_trip(&mut tls, request, self.first_byte_hook()).await;
                let _ = tls.shutdown().await;
                response
            }
        }
    }

    fn first_byte_hook(&self) -> impl FnMut() {
        let scratch = self.scratch.clone();
        move || {
            scratch.lock().unwrap().timing.mark_first_byte();
        }
    }
}
