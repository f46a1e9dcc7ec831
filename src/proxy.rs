//! Proxy-aware TCP dialing.
//!
//! A [`Dialer`] produces a raw TCP stream to the target, either directly
//! or tunnelled through an HTTP CONNECT or SOCKS5 proxy (RFC 1928, with
//! RFC 1929 username/password auth). Proxying is strictly per-request;
//! the `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` environment variables are
//! never consulted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::request::ProxySpec;

const SOCKS_VERSION: u8 = 0x05;

/// Proxy credentials.
#[derive(Debug, Clone)]
pub struct Auth {
    pub username: String,
    pub password: String,
}

/// How to reach the target.
#[derive(Debug, Clone, Default)]
pub enum Dialer {
    /// Plain TCP connect.
    #[default]
    Direct,
    /// HTTP CONNECT tunnel through `host:port`.
    HttpConnect {
        host: String,
        port: u16,
        auth: Option<Auth>,
    },
    /// SOCKS5 CONNECT through `host:port`.
    Socks5 {
        host: String,
        port: u16,
        auth: Option<Auth>,
    },
}

impl Dialer {
    /// Build a dialer from the per-request proxy spec.
    pub fn from_spec(spec: Option<&ProxySpec>) -> Result<Self> {
        let Some(spec) = spec else {
            return Ok(Dialer::Direct);
        };
        let auth = spec.auth.as_ref().filter(|a| !a.username.is_empty()).map(|a| Auth {
            username: a.username.clone(),
            password: a.password.clone(),
        });
        match spec.kind.as_str() {
            "" | "none" => Ok(Dialer::Direct),
            "http" => Ok(Dialer::HttpConnect {
                host: spec.host.clone(),
                port: spec.port,
                auth,
            }),
            "socks5" => Ok(Dialer::Socks5 {
                host: spec.host.clone(),
                port: spec.port,
                auth,
            }),
            other => Err(Error::config(format!("unsupported proxy type {:?}", other))),
        }
    }

    /// Dial `host:port`, tunnelling through the proxy if one is set. The
    /// returned stream is ready for the TLS handshake (or plaintext HTTP)
    /// with no proxy bytes left unread.
    pub async fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        match self {
            Dialer::Direct => TcpStream::connect((host, port))
                .await
                .map_err(|e| Error::dial(format!("connect {}:{}: {}", host, port, e))),
            Dialer::HttpConnect {
                host: proxy_host,
                port: proxy_port,
                auth,
            } => {
                let mut stream = TcpStream::connect((proxy_host.as_str(), *proxy_port))
                    .await
                    .map_err(|e| {
                        Error::dial(format!("connect proxy {}:{}: {}", proxy_host, proxy_port, e))
                    })?;
                http_connect(&mut stream, host, port, auth.as_ref()).await?;
                Ok(stream)
            }
            Dialer::Socks5 {
                host: proxy_host,
                port: proxy_port,
                auth,
            } => {
                let mut stream = TcpStream::connect((proxy_host.as_str(), *proxy_port))
                    .await
                    .map_err(|e| {
                        Error::dial(format!("connect proxy {}:{}: {}", proxy_host, proxy_port, e))
                    })?;
                socks5_connect(&mut stream, host, port, auth.as_ref()).await?;
                Ok(stream)
            }
        }
    }
}

/// Issue a CONNECT and read the response head up to the first blank line.
/// The stream becomes a tunnel on a 200; nothing past the blank line is
/// consumed.
async fn http_connect<S>(stream: &mut S, host: &str, port: u16, auth: Option<&Auth>) -> Result<()>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let mut request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n",
        host = host,
        port = port
    );
    if let Some(auth) = auth {
        let cred = BASE64.encode(format!("{}:{}", auth.username, auth.password));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", cred));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::dial(format!("write CONNECT: {}", e)))?;

    // Read byte-by-byte so the tunnel's first bytes stay on the stream.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() > 16 * 1024 {
            return Err(Error::dial("CONNECT response head too large"));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| Error::dial(format!("read CONNECT response: {}", e)))?;
        if n == 0 {
            return Err(Error::dial("proxy closed connection during CONNECT"));
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or("");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::dial(format!("malformed CONNECT response: {:?}", status_line)))?;

    if status != 200 {
        return Err(Error::dial(format!("proxy refused CONNECT: {}", status_line)));
    }
    Ok(())
}

/// RFC 1928 greeting + CONNECT, with the RFC 1929 user/pass
/// sub-negotiation when the proxy picks it.
async fn socks5_connect<S>(stream: &mut S, host: &str, port: u16, auth: Option<&Auth>) -> Result<()>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let methods: &[u8] = if auth.is_some() {
        &[0x00, 0x02] // no-auth, username/password
    } else {
        &[0x00]
    };
    let mut greeting = vec![SOCKS_VERSION, methods.len() as u8];
    greeting.extend_from_slice(methods);
    stream
        .write_all(&greeting)
        .await
        .map_err(|e| Error::dial(format!("socks5 greeting: {}", e)))?;

    let mut choice = [0u8; 2];
    stream
        .read_exact(&mut choice)
        .await
        .map_err(|e| Error::dial(format!("socks5 method selection: {}", e)))?;
    if choice[0] != SOCKS_VERSION {
        return Err(Error::dial(format!("socks5: bad version {:#04x}", choice[0])));
    }

    match choice[1] {
        0x00 => {}
        0x02 => {
            let auth = auth.ok_or_else(|| {
                Error::dial("socks5 proxy requires authentication but none configured")
            })?;
            let user = auth.username.as_bytes();
            let pass = auth.password.as_bytes();
            if user.len() > 255 || pass.len() > 255 {
                return Err(Error::config("socks5 credentials too long"));
            }
            let mut msg = vec![0x01, user.len() as u8];
            msg.extend_from_slice(user);
            msg.push(pass.len() as u8);
            msg.extend_from_slice(pass);
            stream
                .write_all(&msg)
                .await
                .map_err(|e| Error::dial(format!("socks5 auth: {}", e)))?;

            let mut reply = [0u8; 2];
            stream
                .read_exact(&mut reply)
                .await
                .map_err(|e| Error::dial(format!("socks5 auth reply: {}", e)))?;
            if reply[1] != 0x00 {
                return Err(Error::dial("socks5 authentication failed"));
            }
        }
        0xff => return Err(Error::dial("socks5: no acceptable auth method")),
        other => return Err(Error::dial(format!("socks5: unexpected method {:#04x}", other))),
    }

    // CONNECT request with a domain address (the proxy resolves it).
    let host_bytes = host.as_bytes();
    if host_bytes.len() > 255 {
        return Err(Error::config("socks5 target hostname too long"));
    }
    let mut request = vec![SOCKS_VERSION, 0x01, 0x00, 0x03, host_bytes.len() as u8];
    request.extend_from_slice(host_bytes);
    request.extend_from_slice(&port.to_be_bytes());
    stream
        .write_all(&request)
        .await
        .map_err(|e| Error::dial(format!("socks5 connect: {}", e)))?;

    let mut reply = [0u8; 4];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| Error::dial(format!("socks5 connect reply: {}", e)))?;
    if reply[1] != 0x00 {
        return Err(Error::dial(format!("socks5 connect failed: reply {:#04x}", reply[1])));
    }

    // Drain the bound address so the tunnel starts clean.
    let addr_len = match reply[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(|e| Error::dial(format!("socks5 bound addr: {}", e)))?;
            len[0] as usize
        }
        other => return Err(Error::dial(format!("socks5: bad address type {:#04x}", other))),
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream
        .read_exact(&mut rest)
        .await
        .map_err(|e| Error::dial(format!("socks5 bound addr: {}", e)))?;

    Ok(())
}
