//! Byte-tap stream wrapper.
//!
//! [`TapStream`] interposes on a stream and records a timestamped copy of
//! every successful read and write. The entries live behind an
//! `Arc<Mutex<..>>` shared with a [`TapHandle`], so the recorded bytes
//! outlive the connection — the response's event timeline is built from
//! them after the stream is gone.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Direction of a captured chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Recv => "recv",
        }
    }
}

/// One captured chunk: elapsed time since the tap was created, direction
/// and a copy of the bytes.
#[derive(Debug, Clone)]
pub struct TapEntry {
    pub elapsed: Duration,
    pub direction: Direction,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct TapInner {
    start: Instant,
    entries: Mutex<Vec<TapEntry>>,
}

/// Cheap handle to a tap's recorded entries.
#[derive(Debug, Clone)]
pub struct TapHandle {
    inner: Arc<TapInner>,
}

impl TapHandle {
    pub fn start(&self) -> Instant {
        self.inner.start
    }

    /// Defensive copy of the entries recorded so far.
    pub fn entries(&self) -> Vec<TapEntry> {
        self.inner.entries.lock().unwrap().clone()
    }

    fn record(&self, direction: Direction, data: &[u8]) {
        let entry = TapEntry {
            elapsed: self.inner.start.elapsed(),
            direction,
            data: data.to_vec(),
        };
        // Hold the lock only for the push; never across I/O.
        self.inner.entries.lock().unwrap().push(entry);
    }
}

/// Stream wrapper that records every send/recv into a shared tap.
#[derive(Debug)]
pub struct TapStream<S> {
    stream: S,
    handle: TapHandle,
}

impl<S> TapStream<S> {
    pub fn new(stream: S) -> Self {
        let handle = TapHandle {
            inner: Arc::new(TapInner {
                start: Instant::now(),
                entries: Mutex::new(Vec::new()),
            }),
        };
        Self { stream, handle }
    }

    pub fn handle(&self) -> TapHandle {
        self.handle.clone()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TapStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.stream).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let filled = buf.filled();
                if filled.len() > before {
                    this.handle.record(Direction::Recv, &filled[before..]);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TapStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.stream).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                if n > 0 {
                    this.handle.record(Direction::Send, &buf[..n]);
                }
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Merge entries from several taps (an h2 attempt plus its h1 fallback)
/// into one timeline. Each tap's entries are shifted by the offset of its
/// start from the first tap's start; the merge is stable, so entries on
/// the same tick keep their source order.
pub fn merge_taps(handles: &[TapHandle]) -> Vec<TapEntry> {
    let Some(first) = handles.first() else {
        return Vec::new();
    };
    let base = first.start();
    let mut merged = Vec::new();
    for handle in handles {
        let offset = handle.start().saturating_duration_since(base);
        for entry in handle.entries() {
            merged.push(TapEntry {
                elapsed: entry.elapsed + offset,
                ..entry
            });
        }
    }
    merged.sort_by_key(|e| e.elapsed);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn records_sends_and_recvs_in_wire_order() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut tapped = TapStream::new(client);
        let handle = tapped.handle();

        tapped.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        server.write_all(b"pong").await.unwrap();
        tapped.read_exact(&mut buf).await.unwrap();

        let entries = handle.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].direction, Direction::Send);
        assert_eq!(entries[0].data, b"ping");
        assert_eq!(entries[1].direction, Direction::Recv);
        assert_eq!(entries[1].data, b"pong");
        assert!(entries[0].elapsed <= entries[1].elapsed);
    }

    #[tokio::test]
    async fn entries_outlive_the_stream() {
        let (client, mut server) = tokio::io::duplex(64);
        let handle = {
            let mut tapped = TapStream::new(client);
            tapped.write_all(b"x").await.unwrap();
            tapped.handle()
        };
        let mut buf = [0u8; 1];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(handle.entries().len(), 1);
    }

    #[tokio::test]
    async fn merge_shifts_by_start_offset_and_sorts() {
        let (a_client, mut a_server) = tokio::io::duplex(64);
        let mut a = TapStream::new(a_client);
        a.write_all(b"first").await.unwrap();
        let mut buf = [0u8; 5];
        a_server.read_exact(&mut buf).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let (b_client, mut b_server) = tokio::io::duplex(64);
        let mut b = TapStream::new(b_client);
        b.write_all(b"second").await.unwrap();
        let mut buf = [0u8; 6];
        b_server.read_exact(&mut buf).await.unwrap();

        let merged = merge_taps(&[a.handle(), b.handle()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].data, b"first");
        assert_eq!(merged[1].data, b"second");
        assert!(merged[1].elapsed >= Duration::from_millis(5));
    }
}
