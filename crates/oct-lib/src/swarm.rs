//! Contract the torrent engine needs from a BitTorrent client.
//!
//! The wire protocol itself is an external collaborator; the engine only
//! consumes [`Client`] and [`TorrentHandle`]. [`sim`] is the in-process
//! implementation used by the binaries and the test suite: torrents
//! rendezvous through a per-process provider table instead of a tracker.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, LazyLock, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use hashbrown::HashMap;
use sha1::{Digest as _, Sha1};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::watch,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    error::Result,
    metainfo::{InfoHash, MetaInfo},
};

/// How the engine wants the client brought up. Rate limits are bytes per
/// second, 0 means unlimited.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub data_dir: PathBuf,
    pub listen_addr: SocketAddr,
    pub disable_encryption: bool,
    pub enable_upload: bool,
    pub enable_seeding: bool,
    pub upload_rate_limit: u64,
    pub download_rate_limit: u64,
}

/// A BitTorrent client as seen by the engine: torrents are registered from
/// full metainfo, dropped by info-hash, and rate limits apply globally.
#[async_trait]
pub trait Client: Sized + Send + Sync + 'static {
    async fn start(config: ClientConfig) -> Result<Self>;

    /// Register a torrent. Info may not be available synchronously, await
    /// [`TorrentHandle::wait_info`] before transfers. Re-adding a torrent
    /// with a known info-hash returns the existing handle.
    async fn add_torrent(&self, meta: MetaInfo)
        -> Result<Arc<dyn TorrentHandle>>;

    /// Drop a torrent, stopping its transfers. Unknown hashes are ignored.
    fn remove_torrent(&self, info_hash: InfoHash);

    fn set_upload_rate_limit(&self, bytes_per_sec: u64);
    fn upload_rate_limit(&self) -> u64;
    fn set_download_rate_limit(&self, bytes_per_sec: u64);
    fn download_rate_limit(&self) -> u64;
}

/// One registered torrent.
#[async_trait]
pub trait TorrentHandle: Send + Sync {
    fn info_hash(&self) -> InfoHash;
    fn name(&self) -> String;

    /// Resolves once the metainfo is known to the client.
    async fn wait_info(&self);
    fn has_info(&self) -> bool;

    /// Start downloading all pieces; a no-op when already complete.
    fn download_all(self: Arc<Self>);

    fn bytes_completed(&self) -> u64;
    fn total_length(&self) -> u64;
    fn is_seeding(&self) -> bool;

    /// True after the torrent was dropped from the client.
    fn is_closed(&self) -> bool;
}

pub mod sim {
    //! In-process swarm: complete copies of a torrent register themselves as
    //! providers keyed by info-hash; a leech copies from any provider in
    //! rate-limited chunks and verifies piece hashes before announcing
    //! itself complete.

    use super::*;

    const COPY_BUF: usize = 64 * 1024;
    const PROVIDER_RETRY: Duration = Duration::from_millis(200);

    static PROVIDERS: LazyLock<Mutex<HashMap<InfoHash, Vec<PathBuf>>>> =
        LazyLock::new(|| Mutex::new(HashMap::new()));

    fn add_provider(info_hash: InfoHash, path: &Path) {
        let mut providers = PROVIDERS.lock().unwrap();
        let paths = providers.entry(info_hash).or_default();
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_owned());
        }
    }

    fn remove_provider(info_hash: InfoHash, path: &Path) {
        let mut providers = PROVIDERS.lock().unwrap();
        if let Some(paths) = providers.get_mut(&info_hash) {
            paths.retain(|p| p != path);
        }
    }

    fn pick_provider(info_hash: InfoHash, own: &Path) -> Option<PathBuf> {
        let providers = PROVIDERS.lock().unwrap();
        providers
            .get(&info_hash)?
            .iter()
            .find(|p| p.as_path() != own)
            .cloned()
    }

    struct Limits {
        upload: AtomicU64,
        download: AtomicU64,
    }

    pub struct SimClient {
        config: ClientConfig,
        limits: Arc<Limits>,
        torrents: Mutex<HashMap<InfoHash, Arc<SimTorrent>>>,
        // holds the configured incoming port for the client's lifetime
        _listener: TcpListener,
    }

    #[async_trait]
    impl Client for SimClient {
        async fn start(config: ClientConfig) -> Result<Self> {
            let listener = TcpListener::bind(config.listen_addr).await?;
            debug!("sim swarm listening on {}", config.listen_addr);

            let limits = Arc::new(Limits {
                upload: AtomicU64::new(config.upload_rate_limit),
                download: AtomicU64::new(config.download_rate_limit),
            });

            Ok(Self {
                config,
                limits,
                torrents: Mutex::new(HashMap::new()),
                _listener: listener,
            })
        }

        async fn add_torrent(
            &self,
            meta: MetaInfo,
        ) -> Result<Arc<dyn TorrentHandle>> {
            let info_hash = meta.info.info_hash;

            if let Some(t) = self.torrents.lock().unwrap().get(&info_hash) {
                return Ok(t.clone());
            }

            let path = self.config.data_dir.join(&meta.info.name);
            let complete = match fs::metadata(&path).await {
                Ok(m) => m.len() == meta.info.length,
                Err(_) => false,
            };

            let (info_tx, info_rx) = watch::channel(false);
            let torrent = Arc::new(SimTorrent {
                meta,
                path: path.clone(),
                completed: AtomicU64::new(0),
                seeding: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                enable_seeding: self.config.enable_seeding
                    && self.config.enable_upload,
                limits: self.limits.clone(),
                cancel: CancellationToken::new(),
                info_rx,
                _info_tx: info_tx,
            });

            if complete {
                torrent
                    .completed
                    .store(torrent.meta.info.length, Ordering::Release);
                if torrent.enable_seeding {
                    torrent.seeding.store(true, Ordering::Release);
                    add_provider(info_hash, &path);
                }
            }

            // metainfo came in whole, so info is available immediately
            let _ = torrent._info_tx.send(true);

            let mut torrents = self.torrents.lock().unwrap();
            // a concurrent add may have won the race
            let entry =
                torrents.entry(info_hash).or_insert_with(|| torrent.clone());
            Ok(entry.clone())
        }

        fn remove_torrent(&self, info_hash: InfoHash) {
            let torrent = self.torrents.lock().unwrap().remove(&info_hash);
            if let Some(t) = torrent {
                t.cancel.cancel();
                t.closed.store(true, Ordering::Release);
                t.seeding.store(false, Ordering::Release);
                remove_provider(info_hash, &t.path);
            }
        }

        fn set_upload_rate_limit(&self, bytes_per_sec: u64) {
            self.limits.upload.store(bytes_per_sec, Ordering::Release);
        }

        fn upload_rate_limit(&self) -> u64 {
            self.limits.upload.load(Ordering::Acquire)
        }

        fn set_download_rate_limit(&self, bytes_per_sec: u64) {
            self.limits.download.store(bytes_per_sec, Ordering::Release);
        }

        fn download_rate_limit(&self) -> u64 {
            self.limits.download.load(Ordering::Acquire)
        }
    }

    pub struct SimTorrent {
        meta: MetaInfo,
        path: PathBuf,
        completed: AtomicU64,
        seeding: AtomicBool,
        closed: AtomicBool,
        enable_seeding: bool,
        limits: Arc<Limits>,
        cancel: CancellationToken,
        info_rx: watch::Receiver<bool>,
        _info_tx: watch::Sender<bool>,
    }

    #[async_trait]
    impl TorrentHandle for SimTorrent {
        fn info_hash(&self) -> InfoHash {
            self.meta.info.info_hash
        }

        fn name(&self) -> String {
            self.meta.info.name.clone()
        }

        async fn wait_info(&self) {
            let mut rx = self.info_rx.clone();
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }

        fn has_info(&self) -> bool {
            *self.info_rx.borrow()
        }

        fn download_all(self: Arc<Self>) {
            if self.bytes_completed() >= self.total_length()
                && self.has_local_copy()
            {
                return;
            }
            tokio::spawn(async move {
                self.fetch().await;
            });
        }

        fn bytes_completed(&self) -> u64 {
            self.completed.load(Ordering::Acquire)
        }

        fn total_length(&self) -> u64 {
            self.meta.info.length
        }

        fn is_seeding(&self) -> bool {
            self.seeding.load(Ordering::Acquire)
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Acquire)
        }
    }

    impl SimTorrent {
        fn has_local_copy(&self) -> bool {
            std::fs::metadata(&self.path)
                .map(|m| m.len() == self.meta.info.length)
                .unwrap_or(false)
        }

        async fn fetch(self: Arc<Self>) {
            let info_hash = self.meta.info.info_hash;

            if self.meta.info.length == 0 {
                // nothing to transfer, just materialize the empty file
                if let Err(e) = fs::write(&self.path, b"").await {
                    error!("sim: create {:?} failed: {e}", self.path);
                    return;
                }
                self.mark_complete();
                return;
            }

            loop {
                if self.cancel.is_cancelled() {
                    return;
                }

                let Some(src) = pick_provider(info_hash, &self.path) else {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = sleep(PROVIDER_RETRY) => continue,
                    }
                };

                match self.copy_from(&src).await {
                    Ok(true) => {
                        self.mark_complete();
                        return;
                    }
                    Ok(false) => {
                        warn!("sim: piece hash mismatch copying {info_hash}");
                    }
                    Err(e) => {
                        warn!("sim: copy from {src:?} failed: {e}");
                    }
                }

                self.completed.store(0, Ordering::Release);
                let _ = fs::remove_file(&self.path).await;
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = sleep(PROVIDER_RETRY) => {}
                }
            }
        }

        fn mark_complete(&self) {
            self.completed.store(self.meta.info.length, Ordering::Release);
            if self.enable_seeding && !self.cancel.is_cancelled() {
                self.seeding.store(true, Ordering::Release);
                add_provider(self.meta.info.info_hash, &self.path);
            }
        }

        /// Copy the provider's file into place, verifying every piece hash
        /// on the way. Returns Ok(false) when a piece does not match.
        async fn copy_from(&self, src: &Path) -> Result<bool> {
            let mut src = fs::File::open(src).await?;
            let mut dst = fs::File::create(&self.path).await?;

            self.completed.store(0, Ordering::Release);

            let piece_length = self.meta.info.piece_length as usize;
            let mut piece = Vec::with_capacity(piece_length);
            let mut piece_index = 0usize;
            let mut buf = vec![0u8; COPY_BUF];

            loop {
                if self.cancel.is_cancelled() {
                    return Ok(false);
                }

                let n = src.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                dst.write_all(&buf[..n]).await?;
                self.completed.fetch_add(n as u64, Ordering::AcqRel);

                let mut rest = &buf[..n];
                while !rest.is_empty() {
                    let take = (piece_length - piece.len()).min(rest.len());
                    piece.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];
                    if piece.len() == piece_length {
                        if !self.piece_ok(piece_index, &piece) {
                            return Ok(false);
                        }
                        piece_index += 1;
                        piece.clear();
                    }
                }

                let limit = self.limits.download.load(Ordering::Acquire);
                if limit > 0 {
                    sleep(Duration::from_secs_f64(n as f64 / limit as f64))
                        .await;
                }
            }

            if !piece.is_empty() && !self.piece_ok(piece_index, &piece) {
                return Ok(false);
            }

            dst.flush().await?;
            Ok(self.bytes_completed() == self.meta.info.length)
        }

        fn piece_ok(&self, index: usize, piece: &[u8]) -> bool {
            let begin = index * 20;
            let Some(want) = self.meta.info.pieces.get(begin..begin + 20)
            else {
                return false;
            };
            Sha1::digest(piece).as_slice() == want
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{sim::SimClient, *};
    use crate::engine::PIECE_LENGTH;

    fn client_config(dir: &Path, port: u16) -> ClientConfig {
        ClientConfig {
            data_dir: dir.to_owned(),
            listen_addr: format!("127.0.0.1:{port}").parse().unwrap(),
            disable_encryption: true,
            enable_upload: true,
            enable_seeding: true,
            upload_rate_limit: 0,
            download_rate_limit: 0,
        }
    }

    #[tokio::test]
    async fn leech_from_seeder() -> Result<()> {
        let seed_dir = tempfile::tempdir()?;
        let leech_dir = tempfile::tempdir()?;

        let data = seed_dir.path().join("aa.layer");
        fs::write(&data, vec![3u8; 3000]).await?;
        let meta = MetaInfo::build_from_file(
            &data,
            "http://tracker.example/announce".to_owned(),
            PIECE_LENGTH,
        )
        .await?;

        let seeder =
            SimClient::start(client_config(seed_dir.path(), 0)).await?;
        let leecher =
            SimClient::start(client_config(leech_dir.path(), 0)).await?;

        let sh = seeder.add_torrent(meta.clone()).await?;
        sh.clone().download_all();
        assert!(sh.is_seeding());

        let lh = leecher.add_torrent(meta).await?;
        lh.wait_info().await;
        lh.clone().download_all();

        while lh.bytes_completed() < lh.total_length() {
            sleep(Duration::from_millis(10)).await;
        }

        let got = fs::read(leech_dir.path().join("aa.layer")).await?;
        assert_eq!(got, vec![3u8; 3000]);
        assert!(lh.is_seeding());

        Ok(())
    }
}
