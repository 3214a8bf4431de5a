//! The `oct` CLI: drives a daemon over its RPC socket.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use nix::sys::stat::Mode;
use tokio::fs;
use tracing_subscriber::FmtSubscriber;

use oct_lib::{
    config::DEFAULT_LISTEN,
    error::{Error, Result},
    peer_wire::{StartDownloadRequest, StopDownloadRequest},
    remote::Peer,
};

#[derive(Parser, Debug)]
#[command(name = "oct", version, about = "OCI image torrent cli")]
struct Cli {
    /// proto://address of the daemon RPC API.
    #[clap(long, default_value = DEFAULT_LISTEN)]
    address: String,

    /// RPC connection timeout in seconds.
    #[clap(long = "conn-timeout", default_value_t = 1)]
    conn_timeout: u64,

    /// Enable debug output in the logs.
    #[clap(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start downloading (and seeding) an image.
    Start {
        image: String,
        /// Do not attach to the progress stream.
        #[clap(long)]
        quiet: bool,
    },
    /// Stop the torrents of an image.
    Stop {
        image: String,
        /// Also delete the torrents and their data files.
        #[clap(long)]
        clean: bool,
    },
    /// Per-layer download state of an image.
    Status { image: String },
    /// Print the daemon version.
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[oct] {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let peer =
        Peer::new(&cli.address, Duration::from_secs(cli.conn_timeout))?;

    match cli.command {
        Command::Start { image, quiet } => {
            let stdio = if quiet { None } else { Some(Stdio::create()?) };
            let (stdout, stderr) = match &stdio {
                Some(s) => {
                    s.attach().await?;
                    (
                        Some(s.stdout.display().to_string()),
                        Some(s.stderr.display().to_string()),
                    )
                }
                None => (None, None),
            };

            peer.start_download(StartDownloadRequest {
                source: image,
                username: None,
                password: None,
                stdout,
                stderr,
            })
            .await
        }
        Command::Stop { image, clean } => {
            let ids = peer
                .stop_download(StopDownloadRequest { source: image, clean })
                .await?;
            for id in ids {
                println!("Stopped: {id}");
            }
            Ok(())
        }
        Command::Status { image } => {
            let layers = peer.status(&image).await?;
            println!("ID\tSTATE\tCOMPLETED\tTOTALLEN\tSEEDING");
            for l in layers {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    truncate_id(&l.id),
                    l.state,
                    l.completed,
                    l.size,
                    l.seeding
                );
            }
            Ok(())
        }
        Command::Version => {
            let v = peer.get_server_version().await?;
            println!(
                "daemon version {}.{}.{} commit: {}",
                v.major, v.minor, v.patch, v.revision
            );
            Ok(())
        }
    }
}

/// Shorthand identifier, enough to tell layers apart on a terminal.
fn truncate_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

/// FIFOs the daemon writes its report stream into.
struct Stdio {
    dir: PathBuf,
    stdout: PathBuf,
    stderr: PathBuf,
}

impl Stdio {
    fn create() -> Result<Self> {
        let dir =
            std::env::temp_dir().join(format!("oct-{:08x}", rand::random::<u32>()));
        std::fs::create_dir_all(&dir)?;

        let stdout = dir.join("stdout");
        let stderr = dir.join("stderr");
        for path in [&stdout, &stderr] {
            nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o644))
                .map_err(|e| Error::Io(e.into()))?;
        }

        Ok(Self { dir, stdout, stderr })
    }

    /// Mirror both FIFOs onto our own stdio for as long as we live.
    async fn attach(&self) -> Result<()> {
        // read-write so the open never blocks on the daemon side
        let mut out = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.stdout)
            .await?;
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut out, &mut tokio::io::stdout()).await;
        });

        let mut err = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.stderr)
            .await?;
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut err, &mut tokio::io::stderr()).await;
        });

        Ok(())
    }
}

impl Drop for Stdio {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
