use crate::config::RouterIdentity;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::Ipv4Addr;

/// Snapshot of an adjacent router taken when the link was established.
///
/// Holds no handle to the live router; it only records where to send
/// advertisements (`input_port`) and how to recognise the neighbor's
/// datagrams (`output_port`, their source port).
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub name: String,
    pub addr: Ipv4Addr,
    pub output_port: u16,
    pub input_port: u16,
    pub linked_at: DateTime<Utc>,
}

impl Neighbor {
    pub fn new(identity: &RouterIdentity) -> Self {
        Self {
            name: identity.name.clone(),
            addr: identity.addr,
            output_port: identity.output_port,
            input_port: identity.input_port,
            linked_at: Utc::now(),
        }
    }
}

impl fmt::Display for Neighbor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) out {} in {}, linked {}",
            self.name,
            self.addr,
            self.output_port,
            self.input_port,
            self.linked_at.format("%H:%M:%S")
        )
    }
}
