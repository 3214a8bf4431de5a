use std::io;

use thiserror::Error;

use crate::digest::Digest;

pub type Result<T> = std::result::Result<T, Error>;

impl From<bendy::decoding::Error> for Error {
    fn from(_value: bendy::decoding::Error) -> Self {
        Self::MetainfoInvalid
    }
}

impl From<bendy::encoding::Error> for Error {
    fn from(_value: bendy::encoding::Error) -> Self {
        Self::MetainfoInvalid
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("blob {0} not found")]
    BlobNotFound(Digest),

    #[error("reference `{0}` not found")]
    RefNotFound(String),

    #[error("id {0} not registered")]
    IdNotFound(String),

    #[error("operation would clobber reference `{0}`")]
    Clobber(String),

    #[error("digest mismatch, expected {expected}, got {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error("bt engine not started")]
    EngineNotStarted,

    #[error("torrent {0} already started")]
    AlreadyStarted(String),

    #[error("torrent {0} already stopped")]
    AlreadyStopped(String),

    #[error("torrent {0} is still started, stop it first")]
    DeleteWhileStarted(String),

    #[error("unsupported manifest: {0}")]
    UnsupportedManifest(String),

    #[error("no bittorrent tracker configured")]
    TrackerMissing,

    #[error("the torrent metainfo could not be decoded or encoded")]
    MetainfoInvalid,

    #[error("invalid incoming port {0}")]
    InvalidPort(u16),

    #[error("invalid digest `{0}`")]
    InvalidDigest(String),

    #[error("invalid image reference `{0}`")]
    InvalidReference(String),

    #[error("bad address `{0}`, expected proto://address")]
    InvalidAddr(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("remote peer: {0}")]
    Remote(String),

    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("wire serialization error")]
    Wire(#[from] speedy::Error),
}

impl Error {
    /// NotFound kinds are skipped or fabricated around by the pipeline,
    /// everything else aborts the current operation.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::BlobNotFound(_)
            | Self::RefNotFound(_)
            | Self::IdNotFound(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Dial failures and timeouts; the remote client moves on to the next
    /// seeder address on these.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
