use std::path::PathBuf;

use confsync_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration environment invalid: {0}")]
    Env(String),
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    FileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("configuration center dial failed: {0}")]
    DialFailed(#[source] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] ProtoError),
    #[error("heartbeat liveness window elapsed")]
    HeartbeatTimeout,
    #[error("reconnect attempts exhausted, subscription is dormant")]
    ReloadExhausted,
    #[error("configuration center rejected request: {0}")]
    Server(String),
    #[error("http pull failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no usable snapshot for {0}")]
    SnapshotMiss(String),
    #[error("snapshot write failed: {0}")]
    Snapshot(#[source] std::io::Error),
}
