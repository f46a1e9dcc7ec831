//! Fingerprint-exact HTTP/2 transport.
//!
//! Executes one request on stream 1 with full wire control: the client
//! preface, a SETTINGS frame whose parameters appear in the exact order
//! of the Akamai fingerprint, an optional stream-0 WINDOW_UPDATE, then a
//! HEADERS frame whose pseudo-headers follow the fingerprint's order.
//! All frames after the preface flush as one write. The read loop
//! honours PING, SETTINGS ACK, GOAWAY and RST_STREAM, echoes
//! WINDOW_UPDATE for received DATA and enforces the body cap.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::fingerprint::AkamaiFingerprint;
use crate::request::AssembledRequest;
use crate::response::{status_text, RawResponse, MAX_BODY_SIZE};

use super::frame::{self, flags, ErrorCode, FrameHeader, FrameType, FRAME_HEADER_SIZE};
use super::hpack;

/// The one stream this transport ever opens.
const STREAM_ID: u32 = 1;

/// Largest frame we are willing to read back (16 MiB).
const MAX_READ_FRAME: u32 = 1 << 24;

/// Custom HTTP/2 transport driven by an Akamai fingerprint.
pub struct CustomH2 {
    fingerprint: AkamaiFingerprint,
    /// Header keys in the order they must hit the wire; headers not named
    /// here follow in their own insertion order.
    header_order: Vec<String>,
}

impl CustomH2 {
    pub fn new(fingerprint: AkamaiFingerprint, header_order: Vec<String>) -> Self {
        Self {
            fingerprint,
            header_order,
        }
    }

    /// Run one request over an established (TLS) stream that already
    /// negotiated `h2`. `on_first_byte` fires when the first frame for
    /// our stream arrives.
    pub async fn round_trip<S, F>(
        &self,
        stream: &mut S,
        request: &AssembledRequest,
        mut on_first_byte: F,
    ) -> Result<RawResponse>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: FnMut(),
    {
        stream
            .write_all(frame::CONNECTION_PREFACE)
            .await
            .map_err(|e| Error::protocol(format!("write preface: {}", e)))?;

        let body = request.body.clone().unwrap_or_default();
        let flight = self.client_flight(request, &body)?;
        stream
            .write_all(&flight)
            .await
            .map_err(|e| Error::protocol(format!("write request frames: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::protocol(format!("flush request frames: {}", e)))?;

        self.read_response(stream, &mut on_first_byte).await
    }

    /// SETTINGS + WINDOW_UPDATE + HEADERS + DATA, serialized back to back
    /// so they leave in a single write.
    fn client_flight(&self, request: &AssembledRequest, body: &Bytes) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(1024 + body.len());

        frame::write_settings(&mut buf, &self.fingerprint.settings);

        if self.fingerprint.window_update > 0 {
            frame::write_window_update(&mut buf, 0, self.fingerprint.window_update);
        }

        let (host, port) = request.address()?;
        let authority = if request.url.port().is_some() {
            format!("{}:{}", host, port)
        } else {
            host
        };
        let block = hpack::Encoder::new().encode_request(
            request.method.as_str(),
            request.url.scheme(),
            &authority,
            &request.request_uri(),
            &self.fingerprint.header_order,
            &self.header_order,
            &request.headers,
        );
        if block.is_empty() {
            return Err(Error::protocol("empty header block"));
        }

        let end_stream = body.is_empty();
        frame::write_headers(&mut buf, STREAM_ID, &block, end_stream);

        if !end_stream {
            // A body that ends exactly on a frame boundary gets a
            // zero-length END_STREAM frame after the full chunks.
            let exact_boundary = body.len() % frame::MAX_DATA_PAYLOAD == 0;
            let mut chunks = body.chunks(frame::MAX_DATA_PAYLOAD).peekable();
            while let Some(chunk) = chunks.next() {
                let last = chunks.peek().is_none() && !exact_boundary;
                frame::write_data(&mut buf, STREAM_ID, chunk, last);
            }
            if exact_boundary {
                frame::write_data(&mut buf, STREAM_ID, &[], true);
            }
        }

        Ok(buf)
    }

    async fn read_response<S, F>(&self, stream: &mut S, on_first_byte: &mut F) -> Result<RawResponse>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: FnMut(),
    {
        let mut response = RawResponse {
            http_version: "HTTP/2.0".to_string(),
            ..Default::default()
        };
        let mut decoder = hpack::Decoder::new();
        let mut read_buf = BytesMut::with_capacity(16 * 1024);
        let mut body = BytesMut::new();
        let mut headers_received = false;
        let mut first_stream_frame = true;

        loop {
            let Some((header, payload)) = read_frame(stream, &mut read_buf).await? else {
                // EOF mid-stream: keep what we have once headers landed.
                if headers_received {
                    tracing::debug!("EOF after headers, finalizing partial body");
                    response.body = body.freeze();
                    return Ok(response);
                }
                return Err(Error::protocol("connection closed before response headers"));
            };

            if header.stream_id == STREAM_ID
                && matches!(header.frame_type, FrameType::Headers | FrameType::Data)
                && first_stream_frame
            {
                on_first_byte();
                first_stream_frame = false;
            }

            match header.frame_type {
                FrameType::Headers if header.stream_id == STREAM_ID => {
                    let mut block = BytesMut::from(
                        &frame::strip_padding(FrameType::Headers, header.flags, payload)
                            .ok_or_else(|| Error::protocol("malformed HEADERS frame"))?[..],
                    );
                    if !header.has(flags::END_HEADERS) {
                        self.read_continuations(stream, &mut read_buf, &mut block).await?;
                    }

                    let decoded = decoder
                        .decode(&block)
                        .map_err(|e| Error::protocol(format!("HPACK decode: {}", e)))?;
                    for (name, value) in decoded {
                        if name == ":status" {
                            let code: u16 = value.parse().unwrap_or(0);
                            response.status = code;
                            response.status_text =
                                format!("{} {}", value, status_text(code)).trim_end().to_string();
                        } else if !name.starts_with(':') {
                            response.headers.push((name, value));
                        }
                    }
                    headers_received = true;

                    if header.has(flags::END_STREAM) {
                        response.body = body.freeze();
                        return Ok(response);
                    }
                }
                FrameType::Data if header.stream_id == STREAM_ID => {
                    let data = frame::strip_padding(FrameType::Data, header.flags, payload)
                        .ok_or_else(|| Error::protocol("malformed DATA frame"))?;
                    if body.len() + data.len() > MAX_BODY_SIZE {
                        return Err(Error::protocol(format!(
                            "response body exceeds {} byte limit",
                            MAX_BODY_SIZE
                        )));
                    }
                    body.extend_from_slice(&data);

                    if !data.is_empty() {
                        let mut updates = BytesMut::with_capacity(26);
                        frame::write_window_update(&mut updates, 0, data.len() as u32);
                        frame::write_window_update(&mut updates, STREAM_ID, data.len() as u32);
                        stream
                            .write_all(&updates)
                            .await
                            .map_err(|e| Error::protocol(format!("write WINDOW_UPDATE: {}", e)))?;
                    }

                    if header.has(flags::END_STREAM) {
                        response.body = body.freeze();
                        return Ok(response);
                    }
                }
                FrameType::Settings => {
                    if !header.has(flags::ACK) {
                        let mut ack = BytesMut::with_capacity(FRAME_HEADER_SIZE);
                        frame::write_settings_ack(&mut ack);
                        stream
                            .write_all(&ack)
                            .await
                            .map_err(|e| Error::protocol(format!("write SETTINGS ACK: {}", e)))?;
                    }
                }
                FrameType::Ping => {
                    if !header.has(flags::ACK) && payload.len() == 8 {
                        let mut data = [0u8; 8];
                        data.copy_from_slice(&payload);
                        let mut pong = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
                        frame::write_ping_ack(&mut pong, &data);
                        stream
                            .write_all(&pong)
                            .await
                            .map_err(|e| Error::protocol(format!("write PING ACK: {}", e)))?;
                    }
                }
                FrameType::GoAway => {
                    let goaway = frame::parse_goaway(payload)
                        .ok_or_else(|| Error::protocol("malformed GOAWAY frame"))?;
                    if headers_received {
                        response.body = body.freeze();
                        return Ok(response);
                    }
                    if goaway.error_code == ErrorCode::NoError
                        && goaway.last_stream_id >= STREAM_ID
                    {
                        tracing::debug!("graceful GOAWAY, awaiting stream completion");
                        continue;
                    }
                    return Err(Error::protocol(format!("GOAWAY: {:?}", goaway.error_code)));
                }
                FrameType::RstStream if header.stream_id == STREAM_ID => {
                    let code = frame::parse_rst_stream(payload)
                        .ok_or_else(|| Error::protocol("malformed RST_STREAM frame"))?;
                    if headers_received {
                        response.body = body.freeze();
                        return Ok(response);
                    }
                    return Err(Error::protocol(format!("RST_STREAM: {:?}", code)));
                }
                // WINDOW_UPDATE, PRIORITY, frames for other streams.
                _ => {}
            }
        }
    }

    async fn read_continuations<S>(
        &self,
        stream: &mut S,
        read_buf: &mut BytesMut,
        block: &mut BytesMut,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let Some((header, payload)) = read_frame(stream, read_buf).await? else {
                return Err(Error::protocol("EOF inside header block"));
            };
            if header.frame_type != FrameType::Continuation || header.stream_id != STREAM_ID {
                return Err(Error::protocol("expected CONTINUATION frame"));
            }
            block.extend_from_slice(&payload);
            if header.has(flags::END_HEADERS) {
                return Ok(());
            }
        }
    }
}

/// Read one frame. `Ok(None)` is a clean EOF at a frame boundary; EOF
/// inside a frame is also reported as `None` so the caller can apply the
/// headers-already-received rule.
async fn read_frame<S>(
    stream: &mut S,
    read_buf: &mut BytesMut,
) -> Result<Option<(FrameHeader, Bytes)>>
where
    S: AsyncRead + Unpin,
{
    while read_buf.len() < FRAME_HEADER_SIZE {
        if !fill(stream, read_buf).await? {
            return Ok(None);
        }
    }

    let header = FrameHeader::parse(&read_buf[..FRAME_HEADER_SIZE])
        .ok_or_else(|| Error::protocol("invalid frame header"))?;
    if header.length > MAX_READ_FRAME {
        return Err(Error::protocol(format!(
            "frame of {} bytes exceeds read limit",
            header.length
        )));
    }

    let total = FRAME_HEADER_SIZE + header.length as usize;
    while read_buf.len() < total {
        if !fill(stream, read_buf).await? {
            return Ok(None);
        }
    }

    read_buf.advance(FRAME_HEADER_SIZE);
    let payload = read_buf.copy_to_bytes(header.length as usize);
    Ok(Some((header, payload)))
}

/// Read more bytes into the buffer; false on EOF.
async fn fill<S: AsyncRead + Unpin>(stream: &mut S, read_buf: &mut BytesMut) -> Result<bool> {
    let mut chunk = [0u8; 16 * 1024];
    let n = stream
        .read(&mut chunk)
        .await
        .map_err(|e| Error::protocol(format!("read frame: {}", e)))?;
    if n == 0 {
        return Ok(false);
    }
    read_buf.extend_from_slice(&chunk[..n]);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{assemble, RequestSpec};

    fn request(url: &str, body: Option<&[u8]>) -> AssembledRequest {
        let spec = RequestSpec {
            method: if body.is_some() { "POST" } else { "GET" }.into(),
            url: url.into(),
            body_type: "raw".into(),
            body: String::new(),
            ..Default::default()
        };
        let mut req = assemble(&spec).unwrap();
        req.body = body.map(Bytes::copy_from_slice);
        req
    }

    fn transport(text: &str) -> CustomH2 {
        CustomH2::new(AkamaiFingerprint::parse(text).unwrap(), Vec::new())
    }

    /// Split a serialized flight back into (header, payload) frames.
    fn split_frames(mut buf: &[u8]) -> Vec<(FrameHeader, Vec<u8>)> {
        let mut frames = Vec::new();
        while !buf.is_empty() {
            let header = FrameHeader::parse(&buf[..FRAME_HEADER_SIZE]).unwrap();
            let end = FRAME_HEADER_SIZE + header.length as usize;
            frames.push((header, buf[FRAME_HEADER_SIZE..end].to_vec()));
            buf = &buf[end..];
        }
        frames
    }

    #[test]
    fn flight_orders_settings_exactly_as_fingerprinted() {
        let custom = transport("1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p");
        let req = request("https://example.com/", None);
        let flight = custom.client_flight(&req, &Bytes::new()).unwrap();
        let frames = split_frames(&flight);

        assert_eq!(frames[0].0.frame_type, FrameType::Settings);
        assert_eq!(
            frame::parse_settings(Bytes::from(frames[0].1.clone())),
            vec![(1, 65536), (2, 0), (4, 6291456), (6, 262144)]
        );

        assert_eq!(frames[1].0.frame_type, FrameType::WindowUpdate);
        assert_eq!(frames[1].0.stream_id, 0);
        assert_eq!(
            u32::from_be_bytes(frames[1].1[..4].try_into().unwrap()),
            15663105
        );

        assert_eq!(frames[2].0.frame_type, FrameType::Headers);
        assert_eq!(frames[2].0.stream_id, STREAM_ID);
        assert!(frames[2].0.has(flags::END_HEADERS));
        assert!(frames[2].0.has(flags::END_STREAM));
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn zero_window_update_suppresses_the_frame() {
        let custom = transport("1:65536|0|0|m,a,s,p");
        let req = request("https://example.com/", None);
        let flight = custom.client_flight(&req, &Bytes::new()).unwrap();
        let frames = split_frames(&flight);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].0.frame_type, FrameType::Headers);
    }

    #[test]
    fn pseudo_headers_follow_the_fingerprint_order() {
        let custom = transport("1:65536|0|0|m,p,a,s");
        let req = request("https://example.com/x?q=1", None);
        let flight = custom.client_flight(&req, &Bytes::new()).unwrap();
        let frames = split_frames(&flight);
        let block = &frames.last().unwrap().1;
        let decoded = hpack::Decoder::new().decode(block).unwrap();
        let names: Vec<&str> = decoded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names[..4], [":method", ":path", ":authority", ":scheme"]);
        assert_eq!(decoded[1].1, "/x?q=1");
        assert_eq!(decoded[2].1, "example.com");
    }

    #[test]
    fn body_is_chunked_at_the_frame_limit() {
        let custom = transport("1:65536|0|0|m,a,s,p");
        let body = vec![0xaa; frame::MAX_DATA_PAYLOAD + 5];
        let req = request("https://example.com/", Some(&body));
        let flight = custom.client_flight(&req, &Bytes::from(body)).unwrap();
        let frames = split_frames(&flight);

        let data: Vec<_> = frames
            .iter()
            .filter(|(h, _)| h.frame_type == FrameType::Data)
            .collect();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].0.length as usize, frame::MAX_DATA_PAYLOAD);
        assert!(!data[0].0.has(flags::END_STREAM));
        assert_eq!(data[1].0.length, 5);
        assert!(data[1].0.has(flags::END_STREAM));

        // HEADERS must not claim END_STREAM when a body follows.
        let headers = frames
            .iter()
            .find(|(h, _)| h.frame_type == FrameType::Headers)
            .unwrap();
        assert!(!headers.0.has(flags::END_STREAM));
    }

    #[test]
    fn exact_frame_boundary_gets_a_bare_end_stream() {
        let custom = transport("1:65536|0|0|m,a,s,p");
        let body = vec![0xbb; frame::MAX_DATA_PAYLOAD];
        let req = request("https://example.com/", Some(&body));
        let flight = custom.client_flight(&req, &Bytes::from(body)).unwrap();
        let frames = split_frames(&flight);

        let data: Vec<_> = frames
            .iter()
            .filter(|(h, _)| h.frame_type == FrameType::Data)
            .collect();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].0.length as usize, frame::MAX_DATA_PAYLOAD);
        assert!(!data[0].0.has(flags::END_STREAM));
        assert_eq!(data[1].0.length, 0);
        assert!(data[1].0.has(flags::END_STREAM));
    }
}
