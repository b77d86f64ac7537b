use crate::error::{Error, Result};
#[cfg(unix)]
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::time::{timeout, Duration};
use tracing::debug;
use url::Url;

pub const DEFAULT_FASTCGI_PORT: u16 = 9000;

/// Where the FastCGI application listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Tcp {
        host: String,
        port: u16,
    },
    #[cfg(unix)]
    Unix {
        path: PathBuf,
    },
}

impl Backend {
    /// Accepts `host:port`, `fastcgi://host[:port]`, `unix://path` and
    /// `fastcgi+unix://path`.
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(path) = raw.strip_prefix("unix://") {
            return unix_backend(raw, path);
        }
        if raw.starts_with("fastcgi://") || raw.starts_with("fastcgi+unix://") {
            let url = Url::parse(raw).map_err(|_| Error::InvalidAddress(raw.to_string()))?;
            return match url.scheme() {
                "fastcgi" => {
                    let host = url
                        .host_str()
                        .ok_or_else(|| Error::InvalidAddress(raw.to_string()))?;
                    Ok(Self::Tcp {
                        host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                        port: url.port().unwrap_or(DEFAULT_FASTCGI_PORT),
                    })
                }
                _ => unix_backend(raw, url.path()),
            };
        }
        // host:port (no scheme)
        let Some((host, port)) = raw.rsplit_once(':') else {
            return Err(Error::InvalidAddress(raw.to_string()));
        };
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidAddress(raw.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::InvalidAddress(raw.to_string()));
        }
        Ok(Self::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{}]:{}", host, port),
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            #[cfg(unix)]
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

#[cfg(unix)]
fn unix_backend(raw: &str, path: &str) -> Result<Backend> {
    if path.is_empty() {
        return Err(Error::InvalidAddress(raw.to_string()));
    }
    Ok(Backend::Unix {
        path: PathBuf::from(path),
    })
}

#[cfg(not(unix))]
fn unix_backend(raw: &str, _path: &str) -> Result<Backend> {
    Err(Error::InvalidAddress(format!(
        "unix FastCGI backends are not supported: {}",
        raw
    )))
}

/// Byte stream to a FastCGI application.
#[derive(Debug)]
pub enum FastCgiStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Dial the backend; the timeout bounds connection setup only.
pub async fn connect(backend: &Backend, timeout_dur: Duration) -> Result<FastCgiStream> {
    match backend {
        Backend::Tcp { host, port } => {
            let stream = timeout(timeout_dur, TcpStream::connect((host.as_str(), *port)))
                .await
                .map_err(|_| Error::ConnectTimeout(backend.to_string()))??;
            let _ = stream.set_nodelay(true);
            debug!(backend = %backend, "connected to FastCGI backend");
            Ok(FastCgiStream::Tcp(stream))
        }
        #[cfg(unix)]
        Backend::Unix { path } => {
            let stream = timeout(timeout_dur, UnixStream::connect(path))
                .await
                .map_err(|_| Error::ConnectTimeout(backend.to_string()))??;
            debug!(backend = %backend, "connected to FastCGI backend");
            Ok(FastCgiStream::Unix(stream))
        }
    }
}

impl AsyncRead for FastCgiStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for FastCgiStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
