//! Standard HTTP/2 transport on the h2 crate.
//!
//! Used when no custom Akamai fingerprint is supplied: the connection
//! still rides the fingerprinted TLS stream, and the SETTINGS values
//! (though not their order — the h2 crate owns frame layout) come from
//! the active preset's HTTP/2 parameters.

use bytes::Bytes;
use h2::client;
use http::Request;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};
use crate::fingerprint::AkamaiFingerprint;
use crate::request::AssembledRequest;
use crate::response::{status_text, RawResponse, MAX_BODY_SIZE};

/// Run one request over an established TLS stream that negotiated `h2`.
/// `on_first_byte` fires when the response head arrives.
pub async fn round_trip<S, F>(
    stream: S,
    fingerprint: &AkamaiFingerprint,
    request: &AssembledRequest,
    mut on_first_byte: F,
) -> Result<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: FnMut(),
{
    let mut builder = client::Builder::new();
    for &(id, value) in &fingerprint.settings {
        match id {
            0x1 => {
                builder.header_table_size(value);
            }
            0x2 => {
                builder.enable_push(value != 0);
            }
            0x3 => {
                builder.max_concurrent_streams(value);
            }
            0x4 => {
                builder.initial_window_size(value);
            }
            0x5 => {
                builder.max_frame_size(value);
            }
            0x6 => {
                builder.max_header_list_size(value);
            }
            _ => {}
        }
    }
    if fingerprint.window_update > 0 {
        // The h2 crate expresses the connection window as a total, not an
        // increment on the 65535 default.
        builder.initial_connection_window_size(65_535 + fingerprint.window_update);
    }

    let (send_request, connection) = builder
        .handshake(stream)
        .await
        .map_err(|e| Error::protocol(format!("h2 handshake: {}", e)))?;

    // The connection future owns all frame I/O; nothing moves without it.
    let driver = tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::debug!(%err, "h2 connection terminated");
        }
    });

    let result = send_on(send_request, request, &mut on_first_byte).await;
    driver.abort();
    result
}

async fn send_on<F>(
    send_request: client::SendRequest<Bytes>,
    request: &AssembledRequest,
    on_first_byte: &mut F,
) -> Result<RawResponse>
where
    F: FnMut(),
{
    let mut send_request = send_request
        .ready()
        .await
        .map_err(|e| Error::protocol(format!("h2 not ready: {}", e)))?;

    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(request.url.as_str());
    for (name, value) in &request.headers {
        if !name.starts_with(':') {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    let h2_request = builder
        .body(())
        .map_err(|e| Error::protocol(format!("build h2 request: {}", e)))?;

    let body = request.body.clone().unwrap_or_default();
    let end_stream = body.is_empty();

    let (response_future, mut send_stream) = send_request
        .send_request(h2_request, end_stream)
        .map_err(|e| Error::protocol(format!("send h2 request: {}", e)))?;

    if !end_stream {
        send_stream
            .send_data(body, true)
            .map_err(|e| Error::protocol(format!("send h2 body: {}", e)))?;
    }

    let response = response_future
        .await
        .map_err(|e| Error::protocol(format!("h2 response: {}", e)))?;
    on_first_byte();

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let mut recv_stream = response.into_body();
    let mut body = Vec::new();
    while let Some(chunk) = recv_stream.data().await {
        let chunk = chunk.map_err(|e| Error::protocol(format!("read h2 body: {}", e)))?;
        if body.len() + chunk.len() > MAX_BODY_SIZE {
            return Err(Error::protocol(format!(
                "response body exceeds {} byte limit",
                MAX_BODY_SIZE
            )));
        }
        body.extend_from_slice(&chunk);
        let _ = recv_stream.flow_control().release_capacity(chunk.len());
    }

    Ok(RawResponse {
        status,
        status_text: format!("{} {}", status, status_text(status))
            .trim_end()
            .to_string(),
        headers,
        body: Bytes::from(body),
        http_version: "HTTP/2.0".to_string(),
    })
}
