//! The oci-torrentd daemon binary: config and flag merging, the RPC
//! server loop, and signal handling.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::{
    signal::unix::{signal, SignalKind},
    spawn,
};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use oct_lib::{
    addr::{Addr, PeerStream},
    config::Config,
    daemon::{Daemon, DaemonConfig},
    error::Error,
    peer_wire::PeerCodec,
    registry::DirRegistry,
    swarm::sim::SimClient,
};

/// CLI flags; these take preference over values of the config file and
/// environment.
#[derive(Parser, Debug)]
#[command(name = "oci-torrentd", version, about = "OCI image torrent daemon")]
struct Flags {
    /// Enable debug output in the logs.
    #[clap(long)]
    debug: bool,

    /// Daemon root directory.
    #[clap(long)]
    root_dir: Option<String>,

    /// Disable bittorrent.
    #[clap(long)]
    disable_bt: bool,

    /// Run the daemon as a bittorrent seeder.
    #[clap(long)]
    bt_seeder: bool,

    /// Bittorrent tracker URL, e.g. http://10.10.10.10:6882/announce.
    #[clap(long = "bt-tracker")]
    bt_trackers: Vec<String>,

    /// Bittorrent seeder address, proto://address.
    #[clap(long = "seeder-addr")]
    seeder_addrs: Vec<String>,

    /// Bittorrent upload rate limit, bytes per second, 0 for unlimited.
    #[clap(long = "upload-rate")]
    upload_rate: Option<u64>,

    /// Bittorrent download rate limit, bytes per second, 0 for unlimited.
    #[clap(long = "download-rate")]
    download_rate: Option<u64>,

    /// proto://address on which the RPC API will listen.
    #[clap(long, short = 'l')]
    listen: Option<String>,

    /// RPC connection timeout in seconds.
    #[clap(long = "conn-timeout")]
    conn_timeout: Option<u64>,

    /// Port the BT client accepts peer connections on.
    #[clap(long = "incoming-port")]
    incoming_port: Option<u16>,

    /// Directory of OCI layouts to pull upstream images from.
    #[clap(long = "registry-dir")]
    registry_dir: Option<String>,
}

fn merge(mut config: Config, flags: &Flags) -> Config {
    if let Some(root) = &flags.root_dir {
        config.root = root.clone();
    }
    if flags.disable_bt {
        config.bt_enable = false;
    }
    if flags.bt_seeder {
        config.bt_seeder = true;
    }
    if !flags.bt_trackers.is_empty() {
        config.bt_trackers = flags.bt_trackers.clone();
    }
    if !flags.seeder_addrs.is_empty() {
        config.bt_seeder_server = flags.seeder_addrs.clone();
    }
    if let Some(rate) = flags.upload_rate {
        config.upload_rate_limit = rate;
    }
    if let Some(rate) = flags.download_rate {
        config.download_rate_limit = rate;
    }
    if let Some(listen) = &flags.listen {
        config.listen = listen.clone();
    }
    if let Some(secs) = flags.conn_timeout {
        config.conn_timeout = secs;
    }
    if let Some(port) = flags.incoming_port {
        config.incoming_port = port;
    }
    if let Some(dir) = &flags.registry_dir {
        config.registry_dir = dir.clone();
    }
    config
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let flags = Flags::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if flags.debug { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let config = merge(Config::load()?, &flags);
    debug!("config: {config:?}");

    let root = PathBuf::from(&config.root);
    let registry_dir = if config.registry_dir.is_empty() {
        root.join("registry")
    } else {
        PathBuf::from(&config.registry_dir)
    };

    let daemon_config = DaemonConfig {
        root,
        bt_enable: config.bt_enable,
        bt_seeder: config.bt_seeder,
        bt_trackers: config.bt_trackers.clone(),
        bt_seeder_server: config.bt_seeder_server.clone(),
        upload_rate_limit: config.upload_rate_limit,
        download_rate_limit: config.download_rate_limit,
        conn_timeout: config.conn_timeout(),
        incoming_port: config.incoming_port,
    };

    let registry = DirRegistry::new(registry_dir);
    let daemon = Arc::new(
        Daemon::<SimClient, DirRegistry>::new(daemon_config, registry)
            .await?,
    );

    setup_status_dump_trap(daemon.clone())?;

    let listen = Addr::parse(&config.listen)?;
    let listener = listen.bind().await?;
    info!("oci-torrentd api on {listen}");

    let server = {
        let daemon = daemon.clone();
        spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(stream) => {
                        let daemon = daemon.clone();
                        spawn(async move {
                            serve_connection(daemon, stream).await;
                        });
                    }
                    Err(e) => {
                        error!("accept failed: {e}");
                    }
                }
            }
        })
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("stopping server after receiving SIGTERM"),
        _ = sigint.recv() => info!("stopping server after receiving SIGINT"),
    }
    server.abort();

    Ok(())
}

/// One request, one reply, until the peer hangs up.
async fn serve_connection(
    daemon: Arc<Daemon<SimClient, DirRegistry>>,
    stream: PeerStream,
) {
    let mut framed = Framed::new(stream, PeerCodec);

    while let Some(request) = framed.next().await {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                warn!("bad frame: {e}");
                break;
            }
        };
        let reply = daemon.handle(request).await;
        if let Err(e) = framed.send(reply).await {
            warn!("send reply failed: {e}");
            break;
        }
    }
}

/// SIGUSR1 dumps the engine's view of every torrent to the log.
fn setup_status_dump_trap(
    daemon: Arc<Daemon<SimClient, DirRegistry>>,
) -> Result<(), Error> {
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    spawn(async move {
        while sigusr1.recv().await.is_some() {
            match daemon.engine().get_all_status() {
                Ok(statuses) => {
                    info!("=== BEGIN torrent status dump ===");
                    for s in statuses {
                        info!(
                            "{} {} {}/{} seeding={}",
                            s.id,
                            s.state.as_str(),
                            s.completed,
                            s.total,
                            s.seeding
                        );
                    }
                    info!("=== END torrent status dump ===");
                }
                Err(e) => error!("status dump failed: {e}"),
            }
        }
    });
    Ok(())
}
