#![allow(dead_code)]

use rip_sim::message::{MAX_DATAGRAM, Packet};
use rip_sim::{Network, ProtocolConfig, RouteRow, RouterIdentity};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};

/// Sub-second timers so scenarios converge and age out quickly.
pub fn fast_config(output_port_base: u16, input_port_base: u16) -> ProtocolConfig {
    ProtocolConfig {
        update_interval_secs: 0.2,
        max_jitter_secs: 0.1,
        timeout_secs: 1.5,
        garbage_secs: 1.0,
        receive_grace_secs: 0.3,
        output_port_base,
        input_port_base,
        ..ProtocolConfig::default()
    }
}

pub fn addr(n: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 0, 2, n)
}

/// Polls `router`'s table until `done` holds, panicking after a few seconds.
pub async fn wait_for_table(network: &Network, router: &str, done: impl Fn(&[RouteRow]) -> bool) -> Vec<RouteRow> {
    let deadline = Instant::now() + Duration::from_secs(8);
    loop {
        let rows = network.table(router).await.unwrap();
        if done(&rows) {
            return rows;
        }
        assert!(Instant::now() < deadline, "{router} table never settled: {rows:?}");
        time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn route(rows: &[RouteRow], destination: Ipv4Addr) -> Option<&RouteRow> {
    rows.iter().find(|r| r.destination == destination)
}

/// Sockets occupying a router's ports without running the protocol.
pub struct FakeRouter {
    pub identity: RouterIdentity,
    pub outbound: UdpSocket,
    pub inbound: UdpSocket,
}

impl FakeRouter {
    pub async fn bind(identity: RouterIdentity) -> Self {
        Self {
            outbound: UdpSocket::bind((Ipv4Addr::LOCALHOST, identity.output_port)).await.unwrap(),
            inbound: UdpSocket::bind((Ipv4Addr::LOCALHOST, identity.input_port)).await.unwrap(),
            identity,
        }
    }

    pub async fn send(&self, packet: &Packet, port: u16) {
        self.outbound.send_to(&packet.encode(), (Ipv4Addr::LOCALHOST, port)).await.unwrap();
    }

    pub async fn recv(&self) -> Packet {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = self.inbound.recv_from(&mut buf).await.unwrap();
        Packet::decode(&buf[..len]).unwrap()
    }
}
