//! Reference-counted torrent registry over a BitTorrent client.
//!
//! Each image layer is one single-file torrent keyed by the layer id (the
//! digest hex). The engine owns the id registry, the on-disk `data/` and
//! `torrents/` trees, and the per-torrent lifecycle; the actual transfers
//! happen inside the [`swarm::Client`] it wraps.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use hashbrown::{hash_map::Entry, HashMap};
use tokio::{
    fs,
    io::{AsyncWrite, AsyncWriteExt},
    time::sleep,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    metainfo::{InfoHash, MetaInfo},
    swarm::{self, ClientConfig, TorrentHandle},
};

/// Piece length written into every created torrent.
pub const PIECE_LENGTH: u32 = 1024 * 1024;

/// Default rate limit each way, bytes per second.
pub const DEFAULT_RATE_LIMIT: u64 = 50 * 1024 * 1024;

pub const DEFAULT_INCOMING_PORT: u16 = 50007;

const DATA_DIR: &str = "data";
const TORRENT_DIR: &str = "torrents";
const LAYER_EXT: &str = "layer";

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub disable_encryption: bool,
    pub enable_upload: bool,
    pub enable_seeding: bool,
    pub incoming_port: u16,
    /// Bytes per second, 0 means unlimited.
    pub upload_rate_limit: u64,
    /// Bytes per second, 0 means unlimited.
    pub download_rate_limit: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disable_encryption: true,
            enable_upload: true,
            enable_seeding: true,
            incoming_port: DEFAULT_INCOMING_PORT,
            upload_rate_limit: DEFAULT_RATE_LIMIT,
            download_rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    New,
    Started,
    Dropped,
}

impl TorrentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Started => "started",
            Self::Dropped => "dropped",
        }
    }
}

/// Snapshot of one torrent, as reported over RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub id: String,
    pub state: TorrentState,
    pub completed: u64,
    pub total: u64,
    pub seeding: bool,
}

struct Torrent {
    meta: MetaInfo,
    state: TorrentState,
    downloaded: u64,
    size: u64,
    seeding: bool,
    handle: Arc<dyn TorrentHandle>,
}

impl Torrent {
    /// Refresh the cached fields from the underlying handle.
    fn update(&mut self) {
        self.downloaded = self.handle.bytes_completed();
        if self.handle.has_info() {
            self.size = self.handle.total_length();
        }
        self.seeding = self.handle.is_seeding();
    }
}

struct IdInfo {
    info_hash: InfoHash,
    started: bool,
    ref_count: u32,
}

struct State<C> {
    started: bool,
    client: Option<Arc<C>>,
    /// info-hash to torrent; at most one entry per swarm.
    ts: HashMap<InfoHash, Torrent>,
    /// layer id to registration.
    id_infos: HashMap<String, IdInfo>,
}

/// The engine. All maps live behind one mutex; the lock is never held
/// across an await.
pub struct TorrentEngine<C: swarm::Client> {
    root: PathBuf,
    data_dir: PathBuf,
    torrent_dir: PathBuf,
    trackers: Vec<String>,
    config: EngineConfig,
    state: Mutex<State<C>>,
    // handed to the start-after-info tasks, which outlive the borrow
    weak: Weak<Self>,
}

impl<C: swarm::Client> TorrentEngine<C> {
    pub fn new(
        root: impl Into<PathBuf>,
        trackers: Vec<String>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let root = root.into();
        Arc::new_cyclic(|weak| Self {
            data_dir: root.join(DATA_DIR),
            torrent_dir: root.join(TORRENT_DIR),
            root,
            trackers,
            config,
            state: Mutex::new(State {
                started: false,
                client: None,
                ts: HashMap::new(),
                id_infos: HashMap::new(),
            }),
            weak: weak.clone(),
        })
    }

    /// Start the underlying client and reseed every layer found on disk.
    ///
    /// The engine is marked started before the scan so the scan's
    /// `start_seed` calls go through; a layer that fails to seed is logged
    /// and skipped so one bad file cannot keep the daemon down.
    pub async fn run(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).await?;
        fs::create_dir_all(&self.torrent_dir).await?;

        if self.config.incoming_port == 0 {
            return Err(Error::InvalidPort(self.config.incoming_port));
        }

        let client_config = ClientConfig {
            data_dir: self.data_dir.clone(),
            listen_addr: format!("0.0.0.0:{}", self.config.incoming_port)
                .parse()
                .map_err(|_| Error::InvalidPort(self.config.incoming_port))?,
            disable_encryption: self.config.disable_encryption,
            enable_upload: self.config.enable_upload,
            enable_seeding: self.config.enable_seeding,
            upload_rate_limit: self.config.upload_rate_limit,
            download_rate_limit: self.config.download_rate_limit,
        };
        let client = Arc::new(C::start(client_config).await?);

        {
            let mut state = self.state.lock().unwrap();
            state.client = Some(client);
            state.started = true;
        }

        for id in self.scan_layers().await? {
            if let Err(e) = self.start_seed(&id).await {
                error!("start seed {id} failed: {e}");
            }
        }

        Ok(())
    }

    /// Ids of `<id>.layer` files that have a companion torrent file.
    async fn scan_layers(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.data_dir).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(id) = name.strip_suffix(&format!(".{LAYER_EXT}")) else {
                continue;
            };
            if id.is_empty() || id.contains('.') {
                error!("found invalid layer file {name}");
                continue;
            }
            if !fs::try_exists(self.torrent_file_path(id)).await? {
                continue;
            }
            ids.push(id.to_owned());
        }

        Ok(ids)
    }

    pub fn started(&self) -> bool {
        self.state.lock().unwrap().started
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// `<root>/data/<id>.layer`
    pub fn file_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("{id}.{LAYER_EXT}"))
    }

    /// `<root>/torrents/<id>.torrent`
    pub fn torrent_file_path(&self, id: &str) -> PathBuf {
        self.torrent_dir.join(format!("{id}.torrent"))
    }

    /// Seed the layer file for `id`, creating the torrent file on first
    /// seed. Seeding an already started id only bumps its reference count.
    pub async fn start_seed(&self, id: &str) -> Result<()> {
        let client = self.client()?;
        if self.bump_if_started(id)? {
            return Ok(());
        }

        let torrent_file = self.torrent_file_path(id);
        let meta = if fs::try_exists(&torrent_file).await? {
            MetaInfo::load(&torrent_file).await?
        } else {
            debug!("create torrent file for {id}");
            self.create_torrent(id).await?
        };

        let handle = client.add_torrent(meta.clone()).await?;
        self.register(id, meta, handle);
        Ok(())
    }

    /// Register a torrent received as metainfo bytes and start leeching it.
    /// With a progress sink this blocks until the download completes,
    /// otherwise the transfer continues in the background.
    pub async fn start_leecher(
        &self,
        id: &str,
        torrent: &[u8],
        progress: Option<&mut ProgressDownload>,
    ) -> Result<()> {
        let client = self.client()?;
        if self.bump_if_started(id)? {
            return Ok(());
        }

        let meta = MetaInfo::from_bytes(torrent)?;
        let handle = client.add_torrent(meta.clone()).await?;
        self.register(id, meta, handle.clone());

        if let Some(progress) = progress {
            debug!("waiting for bt download {id} to complete");
            progress.wait_complete(handle.as_ref()).await?;
            info!("bt download {id} completed");
        }
        Ok(())
    }

    /// Drop one reference; the torrent is actually stopped when the count
    /// reaches zero. Unknown or already stopped ids are a no-op.
    pub async fn stop_torrent(&self, id: &str) -> Result<()> {
        let client = self.client()?;

        let mut state = self.state.lock().unwrap();
        let Some(info) = state.id_infos.get_mut(id) else {
            return Ok(());
        };
        if !info.started {
            return Ok(());
        }

        info.ref_count -= 1;
        if info.ref_count > 0 {
            return Ok(());
        }
        info.started = false;

        let info_hash = info.info_hash;
        let torrent = state
            .ts
            .get_mut(&info_hash)
            .ok_or_else(|| Error::IdNotFound(id.to_owned()))?;
        if torrent.state == TorrentState::Dropped {
            return Err(Error::AlreadyStopped(id.to_owned()));
        }
        torrent.state = TorrentState::Dropped;
        torrent.seeding = false;

        client.remove_torrent(info_hash);
        Ok(())
    }

    /// Forget a stopped id and remove its data and torrent files.
    pub async fn delete_torrent(&self, id: &str) -> Result<()> {
        let client = self.client()?;

        let info_hash = {
            let mut state = self.state.lock().unwrap();
            let Some(info) = state.id_infos.get(id) else {
                return Ok(());
            };
            if info.started {
                return Err(Error::DeleteWhileStarted(id.to_owned()));
            }
            let info_hash = info.info_hash;
            state.ts.remove(&info_hash);
            state.id_infos.remove(id);
            info_hash
        };
        client.remove_torrent(info_hash);

        for path in [self.file_path(id), self.torrent_file_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Serialized metainfo of a registered torrent, what a leecher needs to
    /// join the swarm.
    pub fn get_torrent(&self, id: &str) -> Result<Vec<u8>> {
        self.ensure_started()?;

        let state = self.state.lock().unwrap();
        let info = state
            .id_infos
            .get(id)
            .ok_or_else(|| Error::IdNotFound(id.to_owned()))?;
        let torrent = state
            .ts
            .get(&info.info_hash)
            .ok_or_else(|| Error::IdNotFound(id.to_owned()))?;
        torrent.meta.to_bytes()
    }

    pub fn get_status(&self, id: &str) -> Result<Status> {
        self.ensure_started()?;

        let mut state = self.state.lock().unwrap();
        let info_hash = state
            .id_infos
            .get(id)
            .ok_or_else(|| Error::IdNotFound(id.to_owned()))?
            .info_hash;
        let torrent = state
            .ts
            .get_mut(&info_hash)
            .ok_or_else(|| Error::IdNotFound(id.to_owned()))?;
        torrent.update();

        Ok(Status {
            id: id.to_owned(),
            state: torrent.state,
            completed: torrent.downloaded,
            total: torrent.size,
            seeding: torrent.seeding,
        })
    }

    pub fn get_all_status(&self) -> Result<Vec<Status>> {
        self.ensure_started()?;

        let mut state = self.state.lock().unwrap();
        let ids: Vec<(String, InfoHash)> = state
            .id_infos
            .iter()
            .map(|(id, info)| (id.clone(), info.info_hash))
            .collect();

        let mut statuses = Vec::with_capacity(ids.len());
        for (id, info_hash) in ids {
            let Some(torrent) = state.ts.get_mut(&info_hash) else {
                warn!("get status for {id} failed: torrent missing");
                continue;
            };
            torrent.update();
            statuses.push(Status {
                id,
                state: torrent.state,
                completed: torrent.downloaded,
                total: torrent.size,
                seeding: torrent.seeding,
            });
        }
        Ok(statuses)
    }

    pub fn set_upload_rate_limit(&self, bytes_per_sec: u64) -> Result<()> {
        self.client()?.set_upload_rate_limit(bytes_per_sec);
        Ok(())
    }

    pub fn upload_rate_limit(&self) -> Result<u64> {
        Ok(self.client()?.upload_rate_limit())
    }

    pub fn set_download_rate_limit(&self, bytes_per_sec: u64) -> Result<()> {
        self.client()?.set_download_rate_limit(bytes_per_sec);
        Ok(())
    }

    pub fn download_rate_limit(&self) -> Result<u64> {
        Ok(self.client()?.download_rate_limit())
    }

    fn ensure_started(&self) -> Result<()> {
        if !self.started() {
            return Err(Error::EngineNotStarted);
        }
        Ok(())
    }

    fn client(&self) -> Result<Arc<C>> {
        self.state
            .lock()
            .unwrap()
            .client
            .clone()
            .ok_or(Error::EngineNotStarted)
    }

    /// Bump the reference count when `id` is already started.
    fn bump_if_started(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if !state.started {
            return Err(Error::EngineNotStarted);
        }
        if let Some(info) = state.id_infos.get_mut(id) {
            if info.started {
                info.ref_count += 1;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Build the metainfo for `id` from its data file and persist it.
    async fn create_torrent(&self, id: &str) -> Result<MetaInfo> {
        let announce =
            self.trackers.first().ok_or(Error::TrackerMissing)?.clone();

        let meta = MetaInfo::build_from_file(
            &self.file_path(id),
            announce,
            PIECE_LENGTH,
        )
        .await?;
        meta.write(&self.torrent_file_path(id)).await?;
        info!("created torrent file for {id}");
        Ok(meta)
    }

    /// Record the registration and kick off the start-after-info task. A
    /// concurrent registration of the same id only bumps the count.
    fn register(
        &self,
        id: &str,
        meta: MetaInfo,
        handle: Arc<dyn TorrentHandle>,
    ) {
        let info_hash = handle.info_hash();

        let mut state = self.state.lock().unwrap();
        if let Some(info) = state.id_infos.get_mut(id) {
            if info.started {
                info.ref_count += 1;
                return;
            }
        }

        match state.ts.entry(info_hash) {
            Entry::Occupied(mut occupied) => {
                // a restart after stop; the old handle was dropped from the
                // client, adopt the fresh one
                let torrent = occupied.get_mut();
                torrent.handle = handle.clone();
                torrent.meta = meta;
                torrent.update();
            }
            Entry::Vacant(vacant) => {
                let mut torrent = Torrent {
                    meta,
                    state: TorrentState::New,
                    downloaded: 0,
                    size: 0,
                    seeding: false,
                    handle: handle.clone(),
                };
                torrent.update();
                vacant.insert(torrent);
            }
        }

        state.id_infos.insert(
            id.to_owned(),
            IdInfo { info_hash, started: true, ref_count: 1 },
        );
        drop(state);

        let Some(engine) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            handle.wait_info().await;
            match engine.start_torrent(info_hash) {
                Ok(()) => info!("start torrent {info_hash} success"),
                Err(e) => error!("start torrent {info_hash} failed: {e}"),
            }
        });
    }

    /// Promote a torrent to Started once its info arrived.
    fn start_torrent(&self, info_hash: InfoHash) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let torrent = state
            .ts
            .get_mut(&info_hash)
            .ok_or_else(|| Error::IdNotFound(info_hash.to_hex()))?;
        if torrent.state == TorrentState::Started {
            return Err(Error::AlreadyStarted(info_hash.to_hex()));
        }
        torrent.state = TorrentState::Started;
        let handle = torrent.handle.clone();
        drop(state);

        if handle.has_info() {
            handle.download_all();
        }
        Ok(())
    }
}

/// Where pipeline progress lines go: the requester's FIFO, or nowhere.
/// Cheap to clone so the pipeline and a [`ProgressDownload`] can share one
/// stream the way the RPC request intended.
#[derive(Clone)]
pub struct Report {
    sink: Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl Report {
    pub fn new(sink: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self { sink: Arc::new(tokio::sync::Mutex::new(sink)) }
    }

    /// A report that discards everything.
    pub fn sink() -> Self {
        Self::new(Box::new(tokio::io::sink()))
    }

    /// Write one line; report problems never fail the operation.
    pub async fn line(&self, line: impl AsRef<str>) {
        let mut sink = self.sink.lock().await;
        let _ = sink.write_all(line.as_ref().as_bytes()).await;
        let _ = sink.write_all(b"\n").await;
        let _ = sink.flush().await;
    }
}

/// Reports a leech to the caller's [`Report`] and blocks until the torrent
/// finishes (or is dropped via `stop_torrent`).
pub struct ProgressDownload {
    id: String,
    report: Report,
}

impl ProgressDownload {
    pub fn new(id: String, report: Report) -> Self {
        Self { id, report }
    }

    pub async fn wait_complete(
        &mut self,
        handle: &dyn TorrentHandle,
    ) -> Result<()> {
        self.report.line(format!("{}: Getting torrent info", self.id)).await;
        handle.wait_info().await;
        self.report
            .line(format!("{}: Start bittorrent downloading", self.id))
            .await;

        loop {
            let total = handle.total_length();
            let completed = handle.bytes_completed();
            if completed >= total {
                break;
            }
            if handle.is_closed() {
                self.report
                    .line(format!("{}: Download cancelled", self.id))
                    .await;
                return Err(Error::AlreadyStopped(self.id.clone()));
            }
            self.report
                .line(format!(
                    "{}: Downloaded {completed}/{total} bytes",
                    self.id
                ))
                .await;
            sleep(PROGRESS_INTERVAL).await;
        }

        self.report.line(format!("{}: Download completed", self.id)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::sim::SimClient;

    const TRACKER: &str = "http://tracker.example:6969/announce";

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn new_engine(root: &Path) -> Arc<TorrentEngine<SimClient>> {
        TorrentEngine::new(
            root,
            vec![TRACKER.to_owned()],
            EngineConfig { incoming_port: free_port(), ..Default::default() },
        )
    }

    async fn write_layer(root: &Path, id: &str, content: &[u8]) -> Result<()> {
        fs::create_dir_all(root.join(DATA_DIR)).await?;
        fs::write(root.join(DATA_DIR).join(format!("{id}.layer")), content)
            .await?;
        Ok(())
    }

    async fn wait_started(
        engine: &TorrentEngine<SimClient>,
        id: &str,
    ) -> Result<()> {
        for _ in 0..100 {
            if engine.get_status(id)?.state == TorrentState::Started {
                return Ok(());
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("torrent {id} never reached started");
    }

    #[tokio::test]
    async fn ops_before_run_fail() {
        let dir = tempfile::tempdir().unwrap();
        let engine = new_engine(dir.path());
        assert!(matches!(
            engine.start_seed("xx").await,
            Err(Error::EngineNotStarted)
        ));
        assert!(matches!(
            engine.get_torrent("xx"),
            Err(Error::EngineNotStarted)
        ));
    }

    #[tokio::test]
    async fn run_rejects_port_zero() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TorrentEngine::<SimClient>::new(
            dir.path(),
            vec![TRACKER.to_owned()],
            EngineConfig { incoming_port: 0, ..Default::default() },
        );
        assert!(matches!(engine.run().await, Err(Error::InvalidPort(0))));
    }

    #[tokio::test]
    async fn refcount_balanced() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_layer(dir.path(), "xx", b"layer bytes").await?;
        let engine = new_engine(dir.path());
        engine.run().await?;

        engine.start_seed("xx").await?;
        engine.start_seed("xx").await?;
        wait_started(&engine, "xx").await?;

        engine.stop_torrent("xx").await?;
        assert_eq!(engine.get_status("xx")?.state, TorrentState::Started);

        engine.stop_torrent("xx").await?;
        assert_eq!(engine.get_status("xx")?.state, TorrentState::Dropped);

        // stopping a stopped torrent is a no-op
        engine.stop_torrent("xx").await?;
        assert_eq!(engine.get_status("xx")?.state, TorrentState::Dropped);
        Ok(())
    }

    #[tokio::test]
    async fn delete_requires_stop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_layer(dir.path(), "xx", b"some layer").await?;
        let engine = new_engine(dir.path());
        engine.run().await?;

        engine.start_seed("xx").await?;
        wait_started(&engine, "xx").await?;

        assert!(matches!(
            engine.delete_torrent("xx").await,
            Err(Error::DeleteWhileStarted(_))
        ));

        engine.stop_torrent("xx").await?;
        engine.delete_torrent("xx").await?;

        assert!(!fs::try_exists(engine.file_path("xx")).await?);
        assert!(!fs::try_exists(engine.torrent_file_path("xx")).await?);
        assert!(matches!(
            engine.get_status("xx"),
            Err(Error::IdNotFound(_))
        ));

        // deleting a forgotten id stays a no-op
        engine.delete_torrent("xx").await?;
        Ok(())
    }

    #[tokio::test]
    async fn reseed_on_restart() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_layer(dir.path(), "xx", b"restartable layer").await?;

        // first run creates the torrent file
        let engine = new_engine(dir.path());
        engine.run().await?;
        engine.start_seed("xx").await?;
        wait_started(&engine, "xx").await?;
        drop(engine);

        // second run picks the layer up from the scan alone
        let engine = new_engine(dir.path());
        engine.run().await?;
        wait_started(&engine, "xx").await?;

        let status = engine.get_status("xx")?;
        assert_eq!(status.state, TorrentState::Started);
        assert!(status.seeding);
        assert_eq!(status.completed, status.total);
        Ok(())
    }

    #[tokio::test]
    async fn scan_ignores_foreign_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_layer(dir.path(), "good", b"good layer").await?;

        // give the valid layer its companion torrent file
        let engine = new_engine(dir.path());
        engine.run().await?;
        engine.start_seed("good").await?;
        drop(engine);

        let data = dir.path().join(DATA_DIR);
        fs::write(data.join("README"), b"not a layer").await?;
        fs::write(data.join("bad.name.layer"), b"two dots").await?;
        // a layer without a companion torrent file is skipped too
        fs::write(data.join("orphan.layer"), b"orphan").await?;

        let engine = new_engine(dir.path());
        engine.run().await?;

        wait_started(&engine, "good").await?;
        let all = engine.get_all_status()?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "good");
        Ok(())
    }

    #[tokio::test]
    async fn get_torrent_matches_created_metainfo() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_layer(dir.path(), "xx", b"hash me").await?;
        let engine = new_engine(dir.path());
        engine.run().await?;
        engine.start_seed("xx").await?;

        let bytes = engine.get_torrent("xx")?;
        let served = MetaInfo::from_bytes(&bytes)?;
        let on_disk = MetaInfo::load(&engine.torrent_file_path("xx")).await?;

        assert_eq!(served.info.info_hash, on_disk.info.info_hash);
        assert_eq!(served.announce, TRACKER);
        assert_eq!(served.info.piece_length, PIECE_LENGTH);
        Ok(())
    }

    #[tokio::test]
    async fn rate_limits_apply_globally() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join(DATA_DIR)).await?;
        let engine = new_engine(dir.path());
        engine.run().await?;

        assert_eq!(engine.upload_rate_limit()?, DEFAULT_RATE_LIMIT);
        engine.set_download_rate_limit(0)?;
        assert_eq!(engine.download_rate_limit()?, 0);
        Ok(())
    }
}
