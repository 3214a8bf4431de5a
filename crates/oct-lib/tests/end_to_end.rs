//! Full seeder-to-leecher cycle over the RPC surface and the sim swarm:
//! the leecher ends up with the same blobs and reference descriptor as the
//! seeder.

use std::{sync::Arc, time::Duration};

use tokio::{fs, io::AsyncReadExt, spawn};

use oct_lib::{
    addr::Addr,
    daemon::{Daemon, DaemonConfig},
    digest::Digest,
    error::Result,
    image::ImageRef,
    manifest::{Manifest, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_MANIFEST, MEDIA_TYPE_OCI_LAYER},
    oci::{Descriptor, Layout},
    peer_wire::{
        Message, PeerCodec, StartDownloadRequest, StatusRequest,
        StopDownloadRequest,
    },
    registry::DirRegistry,
    swarm::sim::SimClient,
};

const IMAGE: &str = "docker.io/library/busybox:latest";
const TRACKER: &str = "http://tracker.example:6969/announce";

type TestDaemon = Arc<Daemon<SimClient, DirRegistry>>;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Seed an upstream image into `registry_root`: two layers, a config, and
/// an OCI manifest referenced by the tag.
async fn build_upstream_image(
    registry_root: &std::path::Path,
    layers: &[&[u8]],
) -> Result<Descriptor> {
    let image = ImageRef::parse(IMAGE)?;
    let layout = Layout::open(image.layout_dir(registry_root)).await?;

    let mut layer_descriptors = Vec::new();
    for content in layers {
        let (digest, size) = layout.put_blob(*content).await?;
        layer_descriptors.push(Descriptor {
            media_type: MEDIA_TYPE_OCI_LAYER.to_owned(),
            digest,
            size,
        });
    }

    let config_bytes = br#"{"architecture":"amd64","os":"linux"}"#;
    let (config_digest, config_size) =
        layout.put_blob(&config_bytes[..]).await?;

    let manifest = Manifest {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_OCI_MANIFEST.to_owned()),
        config: Descriptor {
            media_type: MEDIA_TYPE_OCI_CONFIG.to_owned(),
            digest: config_digest,
            size: config_size,
        },
        layers: layer_descriptors,
    };
    let manifest_bytes = manifest.to_bytes()?;
    let (manifest_digest, manifest_size) =
        layout.put_blob(manifest_bytes.as_slice()).await?;

    let descriptor = Descriptor {
        media_type: MEDIA_TYPE_OCI_MANIFEST.to_owned(),
        digest: manifest_digest,
        size: manifest_size,
    };
    layout.put_reference(&image.tag, &descriptor).await?;
    layout.close().await?;
    Ok(descriptor)
}

async fn start_daemon(
    root: &std::path::Path,
    registry_root: &std::path::Path,
    seeder: bool,
    seeder_addrs: Vec<String>,
) -> Result<TestDaemon> {
    let config = DaemonConfig {
        root: root.to_owned(),
        bt_enable: true,
        bt_seeder: seeder,
        bt_trackers: vec![TRACKER.to_owned()],
        bt_seeder_server: seeder_addrs,
        upload_rate_limit: 0,
        download_rate_limit: 0,
        conn_timeout: Duration::from_secs(1),
        incoming_port: free_port(),
    };
    let registry = DirRegistry::new(registry_root);
    Ok(Arc::new(Daemon::new(config, registry).await?))
}

/// The daemon side of the RPC surface, as the binary wires it.
async fn serve(daemon: TestDaemon, addr: Addr) -> Result<()> {
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    let listener = addr.bind().await?;
    spawn(async move {
        while let Ok(stream) = listener.accept().await {
            let daemon = daemon.clone();
            spawn(async move {
                let mut framed = Framed::new(stream, PeerCodec);
                while let Some(Ok(request)) = framed.next().await {
                    let reply = daemon.handle(request).await;
                    if framed.send(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    Ok(())
}

fn start_request() -> Message {
    Message::StartDownload(StartDownloadRequest {
        source: IMAGE.to_owned(),
        username: None,
        password: None,
        stdout: None,
        stderr: None,
    })
}

async fn read_blob(layout: &Layout, digest: &Digest) -> Result<Vec<u8>> {
    let mut reader = layout.get_blob(digest).await?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn seeder_to_leecher_cycle() -> Result<()> {
    let registry_dir = tempfile::tempdir()?;
    let seeder_dir = tempfile::tempdir()?;
    let leecher_dir = tempfile::tempdir()?;
    let sock_dir = tempfile::tempdir()?;

    // one layer crosses a piece boundary, one is tiny
    let big = vec![0xabu8; 3 * 1024 * 1024 + 17];
    let small = b"tiny layer".to_vec();
    build_upstream_image(registry_dir.path(), &[&big, &small]).await?;

    let seeder = start_daemon(
        seeder_dir.path(),
        registry_dir.path(),
        true,
        Vec::new(),
    )
    .await?;

    let seeder_sock = sock_dir.path().join("seeder.sock");
    let seeder_spec = format!("unix://{}", seeder_sock.display());
    serve(seeder.clone(), Addr::parse(&seeder_spec)?).await?;

    // seeder ingests the image and seeds every layer
    assert_eq!(seeder.handle(start_request()).await, Message::Started);

    let leecher = start_daemon(
        leecher_dir.path(),
        registry_dir.path(),
        false,
        vec![seeder_spec],
    )
    .await?;

    // leecher pulls the layers over the swarm, blocking until complete
    assert_eq!(leecher.handle(start_request()).await, Message::Started);

    // same blobs on both sides, and all digest-correct
    let image = ImageRef::parse(IMAGE)?;
    let seeder_layout =
        Layout::open(image.layout_dir(&seeder_dir.path().join("oci"))).await?;
    let leecher_layout =
        Layout::open(image.layout_dir(&leecher_dir.path().join("oci")))
            .await?;

    let mut seeder_blobs = seeder_layout.list_blobs().await?;
    let mut leecher_blobs = leecher_layout.list_blobs().await?;
    seeder_blobs.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    leecher_blobs.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(seeder_blobs, leecher_blobs);
    // 2 layers + config + manifest
    assert_eq!(leecher_blobs.len(), 4);

    for digest in &leecher_blobs {
        let content = read_blob(&leecher_layout, digest).await?;
        assert_eq!(Digest::of_bytes(&content), *digest);
    }

    let seeder_ref = seeder_layout.get_reference(&image.tag).await?;
    let leecher_ref = leecher_layout.get_reference(&image.tag).await?;
    assert_eq!(seeder_ref, leecher_ref);

    // the manifest the reference points at lists exactly our layers
    let manifest_bytes =
        read_blob(&leecher_layout, &leecher_ref.digest).await?;
    let manifest = Manifest::from_bytes(&manifest_bytes)?;
    assert_eq!(manifest.layers.len(), 2);
    assert_eq!(manifest.layers[0].digest, Digest::of_bytes(&big));
    assert_eq!(manifest.layers[1].digest, Digest::of_bytes(&small));

    seeder_layout.close().await?;
    leecher_layout.close().await?;

    // both layers are started and seeding on the leecher as well
    let status_request =
        Message::Status(StatusRequest { source: IMAGE.to_owned() });
    let Message::StatusReply(reply) = leecher.handle(status_request).await
    else {
        panic!("expected a status reply");
    };
    assert_eq!(reply.layers.len(), 2);
    for layer in &reply.layers {
        assert_eq!(layer.state, "started");
        assert_eq!(layer.completed, layer.size);
        assert!(layer.seeding);
    }

    // stop with cleanup evicts the layers from the engine; status then
    // fabricates dropped-and-complete entries
    let stop_request = Message::StopDownload(StopDownloadRequest {
        source: IMAGE.to_owned(),
        clean: true,
    });
    let Message::Stopped(stopped) = leecher.handle(stop_request).await else {
        panic!("expected a stopped reply");
    };
    assert_eq!(stopped.ids.len(), 2);
    for id in &stopped.ids {
        assert!(!fs::try_exists(leecher.engine().file_path(id)).await?);
    }

    let status_request =
        Message::Status(StatusRequest { source: IMAGE.to_owned() });
    let Message::StatusReply(reply) = leecher.handle(status_request).await
    else {
        panic!("expected a status reply");
    };
    for layer in &reply.layers {
        assert_eq!(layer.state, "dropped");
        assert_eq!(layer.completed, layer.size);
        assert!(!layer.seeding);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn leecher_round_robins_over_dead_seeder() -> Result<()> {
    let registry_dir = tempfile::tempdir()?;
    let seeder_dir = tempfile::tempdir()?;
    let leecher_dir = tempfile::tempdir()?;
    let sock_dir = tempfile::tempdir()?;

    build_upstream_image(registry_dir.path(), &[b"only layer"]).await?;

    let seeder = start_daemon(
        seeder_dir.path(),
        registry_dir.path(),
        true,
        Vec::new(),
    )
    .await?;

    let live_sock = sock_dir.path().join("live.sock");
    let live_spec = format!("unix://{}", live_sock.display());
    serve(seeder.clone(), Addr::parse(&live_spec)?).await?;
    assert_eq!(seeder.handle(start_request()).await, Message::Started);

    // first address in the rotation is dead, the second serves
    let dead_spec =
        format!("unix://{}", sock_dir.path().join("dead.sock").display());
    let leecher = start_daemon(
        leecher_dir.path(),
        registry_dir.path(),
        false,
        vec![dead_spec, live_spec],
    )
    .await?;

    assert_eq!(leecher.handle(start_request()).await, Message::Started);

    let image = ImageRef::parse(IMAGE)?;
    let layout =
        Layout::open(image.layout_dir(&leecher_dir.path().join("oci")))
            .await?;
    let digest = Digest::of_bytes(b"only layer");
    assert!(layout.exist(&digest).await?);
    layout.close().await?;
    Ok(())
}
