//! RIPv1 message format (RFC 2453 section 3.6).
//!
//! ```text
//!  0        1        2                 4
//! +--------+--------+-----------------+
//! | command| version|   must be zero  |   header, 4 bytes
//! +--------+--------+-----------------+
//! |       AFI       |   must be zero  |
//! +-----------------+-----------------+
//! |            IPv4 address           |   entry, 20 bytes
//! +-----------------------------------+
//! |    must be zero (8 bytes)         |
//! +-----------------------------------+
//! |              metric               |
//! +-----------------------------------+
//! ```
//!
//! All fields are big-endian.

use crate::error::{Result, RipError};
use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv4Addr;

pub const RIP_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 4;
pub const ENTRY_LEN: usize = 20;
pub const MAX_DATAGRAM: usize = 512;
/// Largest number of entries that fits one datagram.
pub const MAX_ENTRIES: usize = (MAX_DATAGRAM - HEADER_LEN) / ENTRY_LEN;

pub const AFI_INET: u16 = 2;
/// AFI of the single entry of a "send me your entire table" request.
pub const AFI_WHOLE_TABLE: u16 = 0;

pub const INFINITY: u32 = 16;

const AFI: std::ops::Range<usize> = 0..2;
const ADDR: std::ops::Range<usize> = 4..8;
const METRIC: std::ops::Range<usize> = 16..20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Request = 1,
    Response = 2,
}

impl TryFrom<u8> for Command {
    type Error = RipError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Command::Request),
            2 => Ok(Command::Response),
            other => Err(RipError::MalformedPacket(format!("unknown command {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: Command,
    pub version: u8,
}

impl Header {
    pub fn new(command: Command) -> Self {
        Self { command, version: RIP_VERSION }
    }

    fn write(&self, buf: &mut [u8]) {
        buf[0] = self.command as u8;
        buf[1] = self.version;
    }

    fn read(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            command: Command::try_from(buf[0])?,
            version: buf[1],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub afi: u16,
    pub addr: Ipv4Addr,
    pub metric: u32,
}

impl Entry {
    pub fn route(addr: Ipv4Addr, metric: u32) -> Self {
        Self { afi: AFI_INET, addr, metric }
    }

    /// The lone entry of a whole-table request; carries the requester's address.
    pub fn whole_table(requester: Ipv4Addr) -> Self {
        Self {
            afi: AFI_WHOLE_TABLE,
            addr: requester,
            metric: INFINITY,
        }
    }

    fn write(&self, buf: &mut [u8]) {
        BigEndian::write_u16(&mut buf[AFI], self.afi);
        buf[ADDR].copy_from_slice(&self.addr.octets());
        BigEndian::write_u32(&mut buf[METRIC], self.metric);
    }

    fn read(buf: &[u8]) -> Self {
        Self {
            afi: BigEndian::read_u16(&buf[AFI]),
            addr: Ipv4Addr::from(BigEndian::read_u32(&buf[ADDR])),
            metric: BigEndian::read_u32(&buf[METRIC]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub entries: Vec<Entry>,
}

impl Packet {
    pub fn request(requester: Ipv4Addr) -> Self {
        Self {
            header: Header::new(Command::Request),
            entries: vec![Entry::whole_table(requester)],
        }
    }

    pub fn response(entries: Vec<Entry>) -> Self {
        Self {
            header: Header::new(Command::Response),
            entries,
        }
    }

    /// Splits a list of route entries into as many responses as the datagram
    /// size requires. An empty list still yields one (empty) response.
    pub fn responses(entries: Vec<Entry>) -> Vec<Packet> {
        if entries.is_empty() {
            return vec![Packet::response(entries)];
        }
        entries
            .chunks(MAX_ENTRIES)
            .map(|chunk| Packet::response(chunk.to_vec()))
            .collect()
    }

    /// Only "exactly one entry, AFI 0, metric infinity" qualifies.
    pub fn is_whole_table_request(&self) -> bool {
        self.header.command == Command::Request
            && matches!(
                self.entries.as_slice(),
                [entry] if entry.afi == AFI_WHOLE_TABLE && entry.metric == INFINITY
            )
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.entries.len() * ENTRY_LEN
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.header.write(&mut buf[..HEADER_LEN]);
        for (entry, slot) in self.entries.iter().zip(buf[HEADER_LEN..].chunks_exact_mut(ENTRY_LEN)) {
            entry.write(slot);
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(RipError::MalformedPacket(format!(
                "{} bytes is shorter than the header",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);
        let header = Header::read(header)?;

        if body.len() % ENTRY_LEN != 0 {
            return Err(RipError::MalformedPacket(format!(
                "body of {} bytes is not a whole number of {ENTRY_LEN}-byte entries",
                body.len()
            )));
        }

        let entries = body.chunks_exact(ENTRY_LEN).map(Entry::read).collect();
        Ok(Self { header, entries })
    }
}
