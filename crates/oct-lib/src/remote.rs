//! Client stubs for the daemon RPC surface.
//!
//! [`Peer`] is bound to one daemon address and opens a fresh connection per
//! call. [`RemotePeers`] fans a leecher's `GetTorrent` out over the
//! configured seeders, round-robin with failover: a seeder that cannot be
//! dialed is skipped in favor of the next one.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use tokio_util::codec::Framed;
use tracing::warn;

use crate::{
    addr::Addr,
    error::{Error, Result},
    peer_wire::{
        GetTorrentRequest, LayerDownState, Message, PeerCodec,
        StartDownloadRequest, StatusRequest, StopDownloadRequest,
        VersionInfo,
    },
};

/// Stub bound to a single daemon address.
pub struct Peer {
    addr: Addr,
    conn_timeout: Duration,
}

impl Peer {
    pub fn new(spec: &str, conn_timeout: Duration) -> Result<Self> {
        Ok(Self { addr: Addr::parse(spec)?, conn_timeout })
    }

    pub async fn get_server_version(&self) -> Result<VersionInfo> {
        match self.call(Message::GetVersion).await? {
            Message::Version(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    pub async fn start_download(
        &self,
        request: StartDownloadRequest,
    ) -> Result<()> {
        match self.call(Message::StartDownload(request)).await? {
            Message::Started => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn stop_download(
        &self,
        request: StopDownloadRequest,
    ) -> Result<Vec<String>> {
        match self.call(Message::StopDownload(request)).await? {
            Message::Stopped(reply) => Ok(reply.ids),
            other => Err(unexpected(other)),
        }
    }

    pub async fn status(&self, source: &str) -> Result<Vec<LayerDownState>> {
        let request = StatusRequest { source: source.to_owned() };
        match self.call(Message::Status(request)).await? {
            Message::StatusReply(reply) => Ok(reply.layers),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_torrent(&self, id: &str) -> Result<Vec<u8>> {
        let request = GetTorrentRequest { id: id.to_owned() };
        match self.call(Message::GetTorrent(request)).await? {
            Message::Torrent(reply) => Ok(reply.torrent),
            other => Err(unexpected(other)),
        }
    }

    /// One connection, one request, one reply. Only the dial is bounded by
    /// the connection timeout; downloads legitimately take long.
    async fn call(&self, request: Message) -> Result<Message> {
        let stream = self.addr.connect(self.conn_timeout).await?;
        let mut framed = Framed::new(stream, PeerCodec);

        framed
            .send(request)
            .await
            .map_err(|e| Error::Transport(format!("send to {}: {e}", self.addr)))?;

        match framed.next().await {
            Some(Ok(Message::Error(reply))) => Err(Error::Remote(reply.message)),
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => {
                Err(Error::Transport(format!("read from {}: {e}", self.addr)))
            }
            None => Err(Error::Transport(format!(
                "{} closed the connection",
                self.addr
            ))),
        }
    }
}

fn unexpected(msg: Message) -> Error {
    Error::Remote(format!("unexpected reply {msg:?}"))
}

/// The seeders a leecher may ask for torrent metainfo.
pub struct RemotePeers {
    peers: Vec<Peer>,
    next: AtomicUsize,
}

impl RemotePeers {
    pub fn new(specs: &[String], conn_timeout: Duration) -> Result<Self> {
        let peers = specs
            .iter()
            .map(|spec| Peer::new(spec, conn_timeout))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { peers, next: AtomicUsize::new(0) })
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Fetch the metainfo for `id`, starting at the next seeder in the
    /// rotation and falling through to the others on transport errors.
    pub async fn get_torrent(&self, id: &str) -> Result<Vec<u8>> {
        if self.peers.is_empty() {
            return Err(Error::Remote(
                "seeder server cannot be empty".to_owned(),
            ));
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut last_err = None;

        for i in 0..self.peers.len() {
            let peer = &self.peers[(start + i) % self.peers.len()];
            match peer.get_torrent(id).await {
                Ok(torrent) => return Ok(torrent),
                Err(e) if e.is_retriable() => {
                    warn!("seeder {}: {e}", peer.addr);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::Transport("no seeder reachable".to_owned())
        }))
    }
}
