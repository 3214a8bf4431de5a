//! `proto://address` endpoints. Daemons listen and dial over both TCP and
//! Unix domain sockets.

use std::{fmt, path::PathBuf, time::Duration};

use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio_util::either::Either;

use crate::error::{Error, Result};

/// A stream to a peer, regardless of transport.
pub type PeerStream = Either<TcpStream, UnixStream>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    Tcp(String),
    Unix(PathBuf),
}

impl Addr {
    pub fn parse(spec: &str) -> Result<Self> {
        let Some((proto, addr)) = spec.split_once("://") else {
            return Err(Error::InvalidAddr(spec.to_owned()));
        };
        if addr.is_empty() {
            return Err(Error::InvalidAddr(spec.to_owned()));
        }
        match proto {
            "tcp" => Ok(Self::Tcp(addr.to_owned())),
            "unix" => Ok(Self::Unix(PathBuf::from(addr))),
            _ => Err(Error::InvalidAddr(spec.to_owned())),
        }
    }

    /// Dial the peer; not answering within `timeout` is a retriable
    /// transport error.
    pub async fn connect(&self, timeout: Duration) -> Result<PeerStream> {
        let dial = async {
            match self {
                Self::Tcp(addr) => {
                    TcpStream::connect(addr.as_str()).await.map(Either::Left)
                }
                Self::Unix(path) => {
                    UnixStream::connect(path).await.map(Either::Right)
                }
            }
        };
        match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(Error::Transport(format!("dial {self}: {e}"))),
            Err(_) => Err(Error::Transport(format!("dial {self}: timed out"))),
        }
    }

    pub async fn bind(&self) -> Result<Listener> {
        match self {
            Self::Tcp(addr) => {
                Ok(Listener::Tcp(TcpListener::bind(addr.as_str()).await?))
            }
            Self::Unix(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                // a daemon that died without cleanup leaves the socket file
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(Listener::Unix(UnixListener::bind(path)?))
            }
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    pub async fn accept(&self) -> Result<PeerStream> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Either::Left(stream))
            }
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Either::Right(stream))
            }
        }
    }
}
