use std::io;

use thiserror::Error;

use ouchgate_proto::ParseError;

/// Engine failures. All are fatal to the engine process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{context}: {source}")]
    Startup {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("gateway link failed: {0}")]
    Gateway(#[source] io::Error),

    #[error("publish failed: {0}")]
    Publish(#[source] io::Error),

    #[error("malformed envelope from gateway: {0}")]
    Protocol(#[from] ParseError),
}
