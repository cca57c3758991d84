//! RIPv1 (RFC 2453) distance-vector routing simulated by router tasks that
//! talk over loopback UDP sockets.

pub mod config;
pub mod error;
pub mod message;
pub mod neighbor;
pub mod network;
pub mod router;
pub mod routing_table;

pub use config::{ProtocolConfig, RouterIdentity, Startup};
pub use error::{Result, RipError};
pub use network::Network;
pub use router::Router;
pub use routing_table::{RouteRow, RoutingTable};
