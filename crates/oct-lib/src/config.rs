//! Daemon configuration.
//!
//! Three layers, in order of priority:
//!
//! CLI flags --overrides--> environment --overrides--> config file

use std::time::Duration;

use serde::Deserialize;

use crate::{
    engine::{DEFAULT_INCOMING_PORT, DEFAULT_RATE_LIMIT},
    error::{Error, Result},
};

pub const DEFAULT_ROOT_DIR: &str = "/data/oci-torrentd";
pub const DEFAULT_LISTEN: &str = "unix:///run/oci-torrentd/oci-torrentd.sock";
pub const DEFAULT_CONN_TIMEOUT_SECS: u64 = 1;

const DEFAULT_CONFIG_FILE: &str = "/etc/oci-torrent/config";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Daemon root directory; `bt/` and `oci/` live under it.
    pub root: String,

    /// `proto://address` the RPC server listens on.
    pub listen: String,

    /// Whether to run the BT engine at all.
    pub bt_enable: bool,

    /// Seeder role; leecher otherwise.
    pub bt_seeder: bool,

    /// Tracker URLs; the first one is written into created torrents.
    pub bt_trackers: Vec<String>,

    /// Seeder addresses a leecher may fetch torrent metainfo from.
    pub bt_seeder_server: Vec<String>,

    /// Bytes per second, 0 means unlimited.
    pub upload_rate_limit: u64,
    pub download_rate_limit: u64,

    /// RPC dial timeout in seconds.
    pub conn_timeout: u64,

    /// Port the BT client accepts peer connections on.
    pub incoming_port: u16,

    /// Directory of OCI layouts the daemon pulls upstream images from.
    /// Empty means `<root>/registry`.
    pub registry_dir: String,
}

impl Config {
    /// Load the file/environment layers. CLI flags are merged on top by the
    /// daemon binary.
    pub fn load() -> Result<Self> {
        let config_file = std::env::var("OCT_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_owned());

        config::Config::builder()
            .add_source(config::File::with_name(&config_file).required(false))
            .add_source(config::Environment::with_prefix("OCT"))
            .set_default("root", DEFAULT_ROOT_DIR)?
            .set_default("listen", DEFAULT_LISTEN)?
            .set_default("bt_enable", true)?
            .set_default("bt_seeder", false)?
            .set_default("bt_trackers", Vec::<String>::new())?
            .set_default("bt_seeder_server", Vec::<String>::new())?
            .set_default("upload_rate_limit", DEFAULT_RATE_LIMIT)?
            .set_default("download_rate_limit", DEFAULT_RATE_LIMIT)?
            .set_default("conn_timeout", DEFAULT_CONN_TIMEOUT_SECS)?
            .set_default("incoming_port", DEFAULT_INCOMING_PORT as u64)?
            .set_default("registry_dir", "")?
            .build()?
            .try_deserialize::<Config>()
            .map_err(Error::Config)
    }

    pub fn conn_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_timeout)
    }
}
