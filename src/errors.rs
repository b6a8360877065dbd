use std::path::PathBuf;

/// Errors that cross a module boundary other code branches on: loading the
/// sensors database and (de)serializing the template dump. Wire-decoding
/// stays on the teacher's `Result<T, String>` idiom (see `wire/`), since a
/// malformed datagram is always just logged and dropped, never inspected by
/// a caller.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read sensors file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse sensors file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("sensor key {0:?} is not a valid CIDR")]
    BadCidr(String),

    #[error("MAC address {0:?} could not be parsed")]
    BadMac(String),
}

#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error("failed to open template dump {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode template dump: {0}")]
    Encode(#[from] bincode::Error),
}
