use std::io;

use thiserror::Error;

use ouchgate_proto::ParseError;

use crate::client::ClientId;

/// Gateway failures.
///
/// Everything except [`GatewayError::UnknownClient`] is fatal to the
/// gateway process when returned from the event loop.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    #[error("{context}: {source}")]
    Startup {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("readiness wait failed: {0}")]
    Poll(#[source] io::Error),

    #[error("engine link failed: {0}")]
    EngineLink(#[source] io::Error),

    #[error("engine closed the link")]
    EngineClosed,

    #[error("acknowledgement feed failed: {0}")]
    Feed(#[source] io::Error),

    #[error("malformed acknowledgement: {0}")]
    Protocol(#[from] ParseError),
}

impl GatewayError {
    pub(crate) fn startup(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| GatewayError::Startup { context, source }
    }
}
