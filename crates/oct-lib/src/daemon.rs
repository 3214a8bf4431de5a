//! The daemon: one process that is either a seeder or a leecher, driving
//! the per-layer pipeline between the upstream registry, the OCI layout
//! and the torrent engine.
//!
//! A seeder ingests an image into its layout, copies each layer into the
//! BT data dir and seeds it. A leecher asks a seeder for each layer's
//! torrent metainfo, downloads the bytes from the swarm, and reassembles
//! the image, manifest and config included, in its own layout.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::fs;
use tracing::{debug, error, info};

use crate::{
    digest::Digest,
    engine::{EngineConfig, ProgressDownload, Report, TorrentEngine},
    error::{Error, Result},
    image::ImageRef,
    manifest,
    oci::{Descriptor, Layout},
    peer_wire::{
        LayerDownState, Message, StartDownloadRequest, StatusRequest,
        StopDownloadRequest, StoppedReply, StatusReply, TorrentReply,
        VersionInfo,
    },
    registry::{BlobInfo, Credentials, Registry},
    remote::RemotePeers,
    swarm,
    version,
};

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub root: PathBuf,
    pub bt_enable: bool,
    pub bt_seeder: bool,
    pub bt_trackers: Vec<String>,
    pub bt_seeder_server: Vec<String>,
    /// Bytes per second, 0 means unlimited.
    pub upload_rate_limit: u64,
    pub download_rate_limit: u64,
    pub conn_timeout: Duration,
    pub incoming_port: u16,
}

pub struct Daemon<C: swarm::Client, R: Registry> {
    config: DaemonConfig,
    engine: Arc<TorrentEngine<C>>,
    registry: R,
    peers: RemotePeers,
}

impl<C: swarm::Client, R: Registry> Daemon<C, R> {
    /// Create the root layout and the engine, and run the engine when BT is
    /// enabled (reseeding whatever survived a restart).
    pub async fn new(config: DaemonConfig, registry: R) -> Result<Self> {
        debug!("daemon config: {config:?}");

        let bt_root = config.root.join("bt");
        fs::create_dir_all(&bt_root).await?;
        fs::create_dir_all(config.root.join("oci")).await?;

        let engine_config = EngineConfig {
            incoming_port: config.incoming_port,
            upload_rate_limit: config.upload_rate_limit,
            download_rate_limit: config.download_rate_limit,
            ..Default::default()
        };
        let engine = TorrentEngine::new(
            bt_root,
            config.bt_trackers.clone(),
            engine_config,
        );
        if config.bt_enable {
            engine.run().await?;
            debug!("bt engine started");
        }

        let peers =
            RemotePeers::new(&config.bt_seeder_server, config.conn_timeout)?;

        Ok(Self { config, engine, registry, peers })
    }

    pub fn engine(&self) -> &Arc<TorrentEngine<C>> {
        &self.engine
    }

    /// Serve one RPC request. Failures become [`Message::Error`] so the
    /// connection survives them.
    pub async fn handle(&self, request: Message) -> Message {
        match request {
            Message::GetVersion => Message::Version(VersionInfo {
                major: version::MAJOR,
                minor: version::MINOR,
                patch: version::PATCH,
                revision: version::REVISION.to_owned(),
            }),
            Message::StartDownload(r) => match self.start_download(r).await {
                Ok(()) => Message::Started,
                Err(e) => error_reply(e),
            },
            Message::StopDownload(r) => match self.stop_download(r).await {
                Ok(ids) => Message::Stopped(StoppedReply { ids }),
                Err(e) => error_reply(e),
            },
            Message::GetTorrent(r) => match self.engine.get_torrent(&r.id) {
                Ok(torrent) => Message::Torrent(TorrentReply { torrent }),
                Err(e) => error_reply(e),
            },
            Message::Status(r) => match self.status(r).await {
                Ok(layers) => Message::StatusReply(StatusReply { layers }),
                Err(e) => error_reply(e),
            },
            other => error_reply(Error::Remote(format!(
                "unexpected request {other:?}"
            ))),
        }
    }

    pub async fn start_download(
        &self,
        r: StartDownloadRequest,
    ) -> Result<()> {
        let image = ImageRef::parse(&r.source)?;
        let creds = match (r.username, r.password) {
            (Some(username), Some(password)) => {
                Some(Credentials { username, password })
            }
            _ => None,
        };
        let report = open_report(r.stdout.as_deref()).await?;

        if self.config.bt_seeder {
            self.seeder_download(&image, creds.as_ref(), report).await
        } else {
            self.leecher_download(&image, creds.as_ref(), report).await
        }
    }

    /// Ingest the image into the local layout and seed every layer.
    async fn seeder_download(
        &self,
        image: &ImageRef,
        creds: Option<&Credentials>,
        report: Report,
    ) -> Result<()> {
        report.line(format!("Inspect {image}")).await;

        let manifest_bytes = self.registry.manifest(image, creds).await?;
        let layers = self.registry.layer_infos(image, creds).await?;
        debug!("layer infos: {layers:?}");

        let layout = Layout::open(image.layout_dir(&self.oci_root())).await?;

        for layer in &layers {
            let id = layer.digest.id();
            if layout.exist(&layer.digest).await? {
                report.line(format!("{id}: Already exists, skipping")).await;
            } else {
                let stream =
                    self.registry.open_blob(image, &layer.digest, creds).await?;
                put_blob_checked(&layout, stream, &layer.digest).await?;
            }

            debug!("start seeding layer {}", layer.digest);
            self.seed_layer(&layout, &layer.digest, &report).await?;
        }

        self.copy_config(image, creds, &layout, &report).await?;

        report.line("Writing manifest to image destination").await;
        self.put_manifest(&layout, &image.tag, &manifest_bytes).await?;

        layout.close().await?;
        Ok(())
    }

    /// Copy one layer blob into the BT data dir and seed it. Seed failures
    /// are logged, not fatal: the blob itself landed safely in the layout.
    async fn seed_layer(
        &self,
        layout: &Layout,
        digest: &Digest,
        report: &Report,
    ) -> Result<()> {
        let id = digest.id();
        let src = layout.get_blob_path(digest).await?;
        fs::copy(&src, self.engine.file_path(id)).await?;

        report.line(format!("Start seeding {id}")).await;
        match self.engine.start_seed(id).await {
            Ok(()) => info!("seed layer {id} success"),
            Err(e) => error!("seed layer {id} failed: {e}"),
        }
        report.line(format!("Start seeding {id} success")).await;
        Ok(())
    }

    /// Fetch every layer over BitTorrent and reassemble the image.
    async fn leecher_download(
        &self,
        image: &ImageRef,
        creds: Option<&Credentials>,
        report: Report,
    ) -> Result<()> {
        report.line(format!("Get layer info {image}")).await;
        let layers = self.registry.layer_infos(image, creds).await?;
        debug!("layer infos: {layers:?}");

        let layout = Layout::open(image.layout_dir(&self.oci_root())).await?;

        report.line(format!("Start download image: {image}")).await;
        for layer in &layers {
            self.leech_layer(&layout, layer, &report).await?;
        }

        self.copy_config(image, creds, &layout, &report).await?;

        let manifest_bytes = self.registry.manifest(image, creds).await?;
        report.line("Writing manifest to image destination").await;
        self.put_manifest(&layout, &image.tag, &manifest_bytes).await?;

        layout.close().await?;
        Ok(())
    }

    async fn leech_layer(
        &self,
        layout: &Layout,
        layer: &BlobInfo,
        report: &Report,
    ) -> Result<()> {
        let id = layer.digest.id();
        if layout.exist(&layer.digest).await? {
            report.line(format!("{id}: Already exists, skipping")).await;
            return Ok(());
        }

        debug!("start leeching layer {id}");
        report.line(format!("{id}: Get torrent data from seeder")).await;
        let torrent = self.peers.get_torrent(id).await.inspect_err(|e| {
            error!("get torrent data from seeder for {id} failed: {e}")
        })?;

        let mut progress =
            ProgressDownload::new(id.to_owned(), report.clone());
        self.engine
            .start_leecher(id, &torrent, Some(&mut progress))
            .await
            .inspect_err(|e| error!("download layer {id} failed: {e}"))?;
        info!("download layer {id} success");

        report.line(format!("{id}: Copy to OCI directory")).await;
        let file = fs::File::open(self.engine.file_path(id)).await?;
        put_blob_checked(layout, file, &layer.digest).await?;
        Ok(())
    }

    /// Pull the config blob into the layout, digest-checked.
    async fn copy_config(
        &self,
        image: &ImageRef,
        creds: Option<&Credentials>,
        layout: &Layout,
        report: &Report,
    ) -> Result<()> {
        let Some(config) = self.registry.config_info(image, creds).await?
        else {
            info!("config of {image} is empty");
            return Ok(());
        };

        if layout.exist(&config.digest).await? {
            return Ok(());
        }

        report.line(format!("Copying config {}", config.digest)).await;
        let stream =
            self.registry.open_blob(image, &config.digest, creds).await?;
        put_blob_checked(layout, stream, &config.digest).await?;
        Ok(())
    }

    /// Translate the raw manifest to OCI form, store it, and point the tag
    /// reference at it.
    async fn put_manifest(
        &self,
        layout: &Layout,
        tag: &str,
        raw: &[u8],
    ) -> Result<()> {
        let (oci_manifest, media_type) = manifest::to_oci_manifest(raw)?;
        let digest = Digest::of_bytes(&oci_manifest);

        let (stored, size) = layout.put_blob(oci_manifest.as_slice()).await?;
        if stored != digest {
            return Err(Error::DigestMismatch {
                expected: digest,
                actual: stored,
            });
        }

        let descriptor = Descriptor { media_type, digest, size };
        layout.put_reference(tag, &descriptor).await
    }

    /// Stop (and optionally delete) the torrents of every layer of an
    /// image already present in the local layout.
    pub async fn stop_download(
        &self,
        r: StopDownloadRequest,
    ) -> Result<Vec<String>> {
        let image = ImageRef::parse(&r.source)?;
        debug!("stop oci image {image}");
        let layers = self.oci_image_layers(&image).await?;

        let mut ids = Vec::new();
        for layer in layers {
            let id = layer.digest.id().to_owned();
            self.engine.stop_torrent(&id).await.inspect_err(|e| {
                error!("stop torrent {id} failed: {e}");
            })?;
            info!("stop torrent {id} success");

            if r.clean {
                match self.engine.delete_torrent(&id).await {
                    Ok(()) => info!("delete torrent {id} success"),
                    Err(e) => error!("delete torrent {id} error: {e}"),
                }
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Per-layer download state of an image in the local layout. Layers
    /// the engine no longer tracks were completed and evicted at some
    /// point, so they report as dropped and fully complete.
    pub async fn status(
        &self,
        r: StatusRequest,
    ) -> Result<Vec<LayerDownState>> {
        let image = ImageRef::parse(&r.source)?;
        debug!("status oci image {image}");
        let layers = self.oci_image_layers(&image).await?;

        let mut states = Vec::with_capacity(layers.len());
        for layer in layers {
            let id = layer.digest.id().to_owned();
            let state = match self.engine.get_status(&id) {
                Ok(s) => LayerDownState {
                    id,
                    state: s.state.as_str().to_owned(),
                    completed: s.completed,
                    size: s.total,
                    seeding: s.seeding,
                },
                Err(e) if e.is_not_found() => LayerDownState {
                    id,
                    state: "dropped".to_owned(),
                    completed: layer.size,
                    size: layer.size,
                    seeding: false,
                },
                Err(e) => return Err(e),
            };
            states.push(state);
        }
        Ok(states)
    }

    /// Layers of the image as recorded in the local layout's manifest.
    async fn oci_image_layers(
        &self,
        image: &ImageRef,
    ) -> Result<Vec<BlobInfo>> {
        use tokio::io::AsyncReadExt;

        let dir = image.layout_dir(&self.oci_root());
        if !fs::try_exists(&dir).await? {
            return Err(Error::RefNotFound(image.to_string()));
        }

        let layout = Layout::open(dir).await?;
        let descriptor = layout.get_reference(&image.tag).await?;
        let mut reader = layout.get_blob(&descriptor.digest).await?;
        let mut buf = Vec::with_capacity(descriptor.size as usize);
        reader.read_to_end(&mut buf).await?;
        layout.close().await?;

        let manifest = manifest::Manifest::from_bytes(&buf)?;
        Ok(manifest
            .layers
            .into_iter()
            .map(|l| BlobInfo { digest: l.digest, size: l.size })
            .collect())
    }

    fn oci_root(&self) -> PathBuf {
        self.config.root.join("oci")
    }
}

fn error_reply(e: Error) -> Message {
    Message::Error(crate::peer_wire::ErrorReply { message: e.to_string() })
}

/// Stream into the layout and insist the content matches the claimed
/// digest; a mismatched blob is removed again.
async fn put_blob_checked(
    layout: &Layout,
    reader: impl tokio::io::AsyncRead + Unpin,
    expected: &Digest,
) -> Result<()> {
    let (digest, _size) = layout.put_blob(reader).await?;
    if digest != *expected {
        layout.delete_blob(&digest).await?;
        return Err(Error::DigestMismatch {
            expected: expected.clone(),
            actual: digest,
        });
    }
    Ok(())
}

/// Open the requester's FIFO for the report stream. Opened read-write so
/// the daemon never blocks waiting for a reader that chose `--quiet`.
async fn open_report(path: Option<&str>) -> Result<Report> {
    let Some(path) = path else {
        return Ok(Report::sink());
    };
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .await?;
    Ok(Report::new(Box::new(file)))
}
