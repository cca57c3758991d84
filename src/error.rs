use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RipError>;

#[derive(Debug, Error)]
pub enum RipError {
    /// Binding or configuring one of a router's sockets failed. Fatal to that router only.
    #[error("router {router}: socket setup on port {port} failed: {source}")]
    SocketSetup {
        router: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Transient; the next periodic or triggered cycle resends.
    #[error("send to port {port} failed: {source}")]
    SendFailure {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("datagram from unknown neighbor port {0}")]
    UnknownNeighbor(u16),

    #[error("invalid router name {0:?}, expected R<n> with n in 0..=255")]
    InvalidRouterName(String),

    #[error("invalid link {0:?}, expected R<i>-R<j>")]
    InvalidLink(String),

    #[error("unknown router {0}")]
    UnknownRouter(String),

    #[error("router {0} already exists")]
    DuplicateRouter(String),

    #[error("router {0} was already started")]
    AlreadyStarted(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for RipError {
    fn from(e: serde_json::Error) -> Self {
        RipError::Config(e.to_string())
    }
}
