use crate::config::{ProtocolConfig, RouterIdentity};
use crate::error::{Result, RipError};
use crate::message::{AFI_INET, Command, INFINITY, MAX_DATAGRAM, Packet};
use crate::neighbor::Neighbor;
use crate::routing_table::{Advertise, DEFAULT_COST, RouteRow, RoutingTable, SharedTable};
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// One simulated RIP router. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    identity: RouterIdentity,
    config: ProtocolConfig,
    table: SharedTable,
    neighbors: RwLock<Vec<Neighbor>>,
    alive: AtomicBool,
    // Signalled when a neighbor is added or the router is stopped.
    wakeup: Notify,
    advertise: mpsc::UnboundedSender<Advertise>,
    // Taken by the scheduler when the router starts.
    pending: Mutex<Option<mpsc::UnboundedReceiver<Advertise>>>,
}

impl Router {
    pub fn new(identity: RouterIdentity, config: ProtocolConfig) -> Self {
        let (advertise, pending) = mpsc::unbounded_channel();
        let table = RoutingTable::shared(&identity.name, &config, advertise.clone());

        Self {
            inner: Arc::new(RouterInner {
                identity,
                config,
                table,
                neighbors: RwLock::new(Vec::new()),
                alive: AtomicBool::new(true),
                wakeup: Notify::new(),
                advertise,
                pending: Mutex::new(Some(pending)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.identity.name
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.inner.identity.addr
    }

    pub fn identity(&self) -> &RouterIdentity {
        &self.inner.identity
    }

    pub fn table(&self) -> &SharedTable {
        &self.inner.table
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// Records `other` as a neighbor and installs its directly connected route.
    pub async fn add_neighbor(&self, other: &RouterIdentity) {
        {
            let mut neighbors = self.inner.neighbors.write().await;
            if neighbors.iter().any(|n| n.name == other.name) {
                debug!("Router {}: {} is already a neighbor", self.name(), other.name);
            } else {
                neighbors.push(Neighbor::new(other));
            }
        }
        self.inner.table.lock().await.check_entry(other.addr, DEFAULT_COST, None);
        self.inner.wakeup.notify_one();
    }

    /// The route to the removed neighbor is left to time out.
    pub async fn delete_neighbor(&self, name: &str) -> bool {
        let mut neighbors = self.inner.neighbors.write().await;
        let before = neighbors.len();
        neighbors.retain(|n| n.name != name);
        before != neighbors.len()
    }

    pub async fn neighbors(&self) -> Vec<Neighbor> {
        self.inner.neighbors.read().await.clone()
    }

    pub async fn routes(&self) -> Vec<RouteRow> {
        self.inner.table.lock().await.rows()
    }

    /// Asks the router to shut down. Observed by the receive loop right away
    /// and at the latest after one receive timeout. Idempotent.
    pub fn stop(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        self.inner.wakeup.notify_one();
    }

    /// Runs the router until [`Router::stop`] is called.
    ///
    /// Binds both sockets, waits for the first neighbor, asks every neighbor
    /// for its whole table, then serves datagrams while the scheduler task
    /// sends periodic and triggered responses.
    pub async fn run(self) -> Result<()> {
        let pending = self
            .inner
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| RipError::AlreadyStarted(self.name().to_string()))?;

        let sockets = self
            .bind(self.inner.identity.output_port)
            .and_then(|outbound| Ok((outbound, self.bind(self.inner.identity.input_port)?)));
        let (outbound, inbound) = match sockets {
            Ok((outbound, inbound)) => (Arc::new(outbound), inbound),
            Err(e) => {
                self.disable(None).await;
                return Err(e);
            }
        };
        info!(
            "Router {} started on ports {} (out) and {} (in)",
            self.name(),
            self.inner.identity.output_port,
            self.inner.identity.input_port
        );

        if self.wait_for_neighbors().await {
            self.output_request(&outbound).await;
            let scheduler = self.spawn_scheduler(outbound.clone(), pending);
            self.listen(&inbound).await;
            self.disable(Some(scheduler)).await;
        } else {
            self.disable(None).await;
        }

        info!("Router {} stopped working", self.name());
        Ok(())
    }

    fn bind(&self, port: u16) -> Result<UdpSocket> {
        let setup = |source: io::Error| RipError::SocketSetup {
            router: self.name().to_string(),
            port,
            source,
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(&setup)?;
        socket.set_nonblocking(true).map_err(&setup)?;
        socket
            .bind(&SocketAddrV4::new(self.inner.config.bind_address, port).into())
            .map_err(&setup)?;
        UdpSocket::from_std(socket.into()).map_err(&setup)
    }

    async fn wait_for_neighbors(&self) -> bool {
        loop {
            if !self.is_alive() {
                return false;
            }
            if !self.inner.neighbors.read().await.is_empty() {
                return true;
            }
            self.inner.wakeup.notified().await;
        }
    }

    async fn disable(&self, scheduler: Option<JoinHandle<()>>) {
        self.inner.alive.store(false, Ordering::SeqCst);
        if let Some(scheduler) = scheduler {
            scheduler.abort();
        }
        self.inner.table.lock().await.cancel_timers();
        self.inner.neighbors.write().await.clear();
    }

    /// Periodic advertisements on a jittered one-shot deadline that is
    /// re-sampled after every full advertisement, plus on-demand full and
    /// triggered advertisements.
    fn spawn_scheduler(&self, outbound: Arc<UdpSocket>, mut pending: mpsc::UnboundedReceiver<Advertise>) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let mut deadline = Instant::now() + router.inner.config.update_interval();
            loop {
                let triggered = tokio::select! {
                    _ = time::sleep_until(deadline) => false,
                    Some(advertise) = pending.recv() => advertise == Advertise::Triggered,
                };

                router.output_response(&outbound, triggered).await;
                if !triggered {
                    deadline = Instant::now() + router.inner.config.update_interval();
                }
            }
        })
    }

    async fn listen(&self, inbound: &UdpSocket) {
        let mut buf = [0u8; MAX_DATAGRAM];
        let receive_timeout = self.inner.config.receive_timeout();

        while self.is_alive() {
            tokio::select! {
                _ = self.inner.wakeup.notified() => {}
                received = time::timeout(receive_timeout, inbound.recv_from(&mut buf)) => match received {
                    Err(_) => debug!("Router {}: no traffic for {:?}", self.name(), receive_timeout),
                    Ok(Err(e)) => warn!("Router {}: receive failed: {}", self.name(), e),
                    Ok(Ok((len, from))) => {
                        if let Err(e) = self.handle_datagram(&buf[..len], from).await {
                            warn!("Router {}: dropped datagram from {}: {}", self.name(), from, e);
                        }
                    }
                }
            }
        }
    }

    /// Any datagram from a neighbor counts as proof that the neighbor is
    /// alive; there is no separate hello message.
    async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) -> Result<()> {
        let neighbor = self
            .neighbor_by_port(from.port())
            .await
            .ok_or(RipError::UnknownNeighbor(from.port()))?;
        let packet = Packet::decode(bytes)?;
        debug!(
            "Router {}: {:?} with {} entries from {}",
            self.name(),
            packet.header.command,
            packet.entries.len(),
            neighbor.name
        );

        self.inner.table.lock().await.refresh_direct(neighbor.addr);

        match packet.header.command {
            Command::Request if packet.is_whole_table_request() => {
                let _ = self.inner.advertise.send(Advertise::Full);
            }
            Command::Request => {
                debug!("Router {}: ignoring partial request from {}", self.name(), neighbor.name);
            }
            Command::Response => self.process_response(&packet, &neighbor).await,
        }
        Ok(())
    }

    async fn process_response(&self, packet: &Packet, neighbor: &Neighbor) {
        let mut table = self.inner.table.lock().await;
        for entry in &packet.entries {
            if entry.afi != AFI_INET || entry.addr == self.addr() || entry.metric >= INFINITY {
                continue;
            }
            let metric = (entry.metric + DEFAULT_COST).min(INFINITY);
            table.check_entry(entry.addr, metric, Some(neighbor.addr));
        }
    }

    async fn neighbor_by_port(&self, port: u16) -> Option<Neighbor> {
        self.inner
            .neighbors
            .read()
            .await
            .iter()
            .find(|n| n.output_port == port)
            .cloned()
    }

    async fn output_request(&self, outbound: &UdpSocket) {
        let bytes = Packet::request(self.addr()).encode();
        for neighbor in self.neighbors().await {
            self.send(outbound, &bytes, neighbor.input_port).await;
        }
    }

    /// Sends the table (or only its changed entries) to every neighbor with
    /// poison reverse applied per neighbor. A triggered advertisement clears
    /// the route-changed flags afterwards.
    async fn output_response(&self, outbound: &UdpSocket, triggered: bool) {
        let neighbors = self.neighbors().await;
        let mut outgoing = Vec::new();
        {
            let mut table = self.inner.table.lock().await;
            if triggered && !table.has_changes() {
                return;
            }
            for neighbor in &neighbors {
                for packet in Packet::responses(table.advertisement(neighbor.addr, triggered)) {
                    outgoing.push((neighbor.input_port, packet.encode()));
                }
            }
            if triggered {
                table.clear_route_changes();
            }
        }

        debug!(
            "Router {}: sending {} response to {} neighbors",
            self.name(),
            if triggered { "triggered" } else { "full" },
            neighbors.len()
        );
        for (port, bytes) in outgoing {
            self.send(outbound, &bytes, port).await;
        }
    }

    async fn send(&self, socket: &UdpSocket, bytes: &[u8], port: u16) {
        let target = SocketAddrV4::new(self.inner.config.bind_address, port);
        if let Err(source) = socket.send_to(bytes, target).await {
            warn!("Router {}: {}", self.name(), RipError::SendFailure { port, source });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Entry;
    use std::time::Duration;

    const R8: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 8);
    const R9: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 9);

    // Periodic updates far enough out that only requests cause responses.
    fn quiet_config(output_port_base: u16, input_port_base: u16) -> ProtocolConfig {
        ProtocolConfig {
            update_interval_secs: 30.0,
            max_jitter_secs: 0.0,
            receive_grace_secs: 0.2,
            output_port_base,
            input_port_base,
            ..ProtocolConfig::default()
        }
    }

    /// Sockets standing in for a neighbor that is not a real router.
    struct FakeNeighbor {
        outbound: UdpSocket,
        inbound: UdpSocket,
    }

    impl FakeNeighbor {
        async fn bind(identity: &RouterIdentity) -> Self {
            Self {
                outbound: UdpSocket::bind((Ipv4Addr::LOCALHOST, identity.output_port)).await.unwrap(),
                inbound: UdpSocket::bind((Ipv4Addr::LOCALHOST, identity.input_port)).await.unwrap(),
            }
        }

        async fn send(&self, bytes: &[u8], port: u16) {
            self.outbound.send_to(bytes, (Ipv4Addr::LOCALHOST, port)).await.unwrap();
        }

        async fn recv(&self, wait: Duration) -> Option<Packet> {
            let mut buf = [0u8; MAX_DATAGRAM];
            let (len, _) = time::timeout(wait, self.inbound.recv_from(&mut buf)).await.ok()?.unwrap();
            Some(Packet::decode(&buf[..len]).unwrap())
        }
    }

    async fn route_to(router: &Router, destination: Ipv4Addr) -> RouteRow {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(row) = router.routes().await.into_iter().find(|r| r.destination == destination) {
                return row;
            }
            assert!(Instant::now() < deadline, "{} never learned {}", router.name(), destination);
            time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn learns_routes_and_answers_requests_with_poison_reverse() {
        let config = quiet_config(21000, 22000);
        let r1 = Router::new(config.identity_for("R1").unwrap(), config.clone());
        let r2 = config.identity_for("R2").unwrap();
        let fake = FakeNeighbor::bind(&r2).await;

        r1.add_neighbor(&r2).await;
        let task = tokio::spawn(r1.clone().run());

        let request = fake.recv(Duration::from_secs(2)).await.expect("initial request");
        assert!(request.is_whole_table_request());
        assert_eq!(request.entries[0].addr, r1.addr());

        let response = Packet::response(vec![
            Entry::route(R9, 3),
            Entry::route(r1.addr(), 1),
            Entry::route(R8, INFINITY),
        ]);
        fake.send(&response.encode(), r1.identity().input_port).await;

        let learned = route_to(&r1, R9).await;
        assert_eq!((learned.metric, learned.next_hop), (4, Some(r2.addr)));
        let routes = r1.routes().await;
        assert!(routes.iter().all(|r| r.destination != r1.addr()));
        assert!(routes.iter().all(|r| r.destination != R8));

        fake.send(&Packet::request(r2.addr).encode(), r1.identity().input_port).await;
        let answer = fake.recv(Duration::from_secs(2)).await.expect("response to request");
        assert_eq!(answer.header.command, Command::Response);
        assert_eq!(answer.entries, vec![Entry::route(r2.addr, 1), Entry::route(R9, INFINITY)]);

        r1.stop();
        time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
        assert!(!r1.is_alive());
        assert!(r1.neighbors().await.is_empty());
    }

    #[tokio::test]
    async fn discards_strangers_partial_requests_and_garbage() {
        let config = quiet_config(21100, 22100);
        let r1 = Router::new(config.identity_for("R1").unwrap(), config.clone());
        let r2 = config.identity_for("R2").unwrap();
        let fake = FakeNeighbor::bind(&r2).await;
        let stranger = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let r1_input = (Ipv4Addr::LOCALHOST, r1.identity().input_port);

        r1.add_neighbor(&r2).await;
        let task = tokio::spawn(r1.clone().run());
        fake.recv(Duration::from_secs(2)).await.expect("initial request");

        stranger.send_to(&Packet::request(R9).encode(), r1_input).await.unwrap();
        let mut partial = Packet::request(r2.addr);
        partial.entries.push(Entry::route(R9, 1));
        fake.send(&partial.encode(), r1_input.1).await;
        fake.send(&[2, 1, 0, 0, 1, 2, 3], r1_input.1).await;
        assert!(fake.recv(Duration::from_millis(500)).await.is_none());

        fake.send(&Packet::request(r2.addr).encode(), r1_input.1).await;
        assert!(fake.recv(Duration::from_secs(2)).await.is_some());
        assert_eq!(r1.routes().await.len(), 1);

        r1.stop();
        time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn stops_while_waiting_for_first_neighbor() {
        let config = quiet_config(21200, 22200);
        let r1 = Router::new(config.identity_for("R1").unwrap(), config);
        let task = tokio::spawn(r1.clone().run());

        time::sleep(Duration::from_millis(100)).await;
        assert!(r1.is_alive());
        r1.stop();
        time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();

        assert!(matches!(r1.clone().run().await, Err(RipError::AlreadyStarted(_))));
    }

    #[tokio::test]
    async fn triggered_updates_carry_only_what_changed_since_the_last_one() {
        let config = ProtocolConfig {
            timeout_secs: 1.0,
            garbage_secs: 10.0,
            ..quiet_config(21400, 22400)
        };
        let r1 = Router::new(config.identity_for("R1").unwrap(), config.clone());
        let (r2, r3, r4) = (
            config.identity_for("R2").unwrap(),
            config.identity_for("R3").unwrap(),
            config.identity_for("R4").unwrap(),
        );
        let fakes = [FakeNeighbor::bind(&r2).await, FakeNeighbor::bind(&r3).await, FakeNeighbor::bind(&r4).await];
        for identity in [&r2, &r3, &r4] {
            r1.add_neighbor(identity).await;
        }
        let task = tokio::spawn(r1.clone().run());
        for fake in &fakes {
            fake.recv(Duration::from_secs(2)).await.expect("initial request");
        }
        let [_, fake_r3, fake_r4] = &fakes;

        // R2 stays silent, R3 keeps talking, R4 speaks once so it times out later than R2.
        let keepalive = Packet::response(vec![]).encode();
        let input = r1.identity().input_port;
        let started = Instant::now();
        let mut r4_spoke = false;
        let mut triggered = Vec::new();
        while started.elapsed() < Duration::from_secs(3) {
            if let Some(packet) = fake_r3.recv(Duration::from_millis(200)).await {
                assert_eq!(packet.header.command, Command::Response);
                triggered.push(packet.entries);
            }
            fake_r3.send(&keepalive, input).await;
            if !r4_spoke && started.elapsed() >= Duration::from_millis(500) {
                fake_r4.send(&keepalive, input).await;
                r4_spoke = true;
            }
        }

        assert_eq!(
            triggered,
            vec![
                vec![Entry::route(r2.addr, INFINITY), Entry::route(r3.addr, 1), Entry::route(r4.addr, 1)],
                vec![Entry::route(r4.addr, INFINITY)],
            ]
        );

        r1.stop();
        time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn second_router_on_the_same_ports_fails_to_bind() {
        let config = quiet_config(21500, 22500);
        let identity = config.identity_for("R1").unwrap();
        let first = Router::new(identity.clone(), config.clone());
        let task = tokio::spawn(first.clone().run());
        time::sleep(Duration::from_millis(100)).await;

        let second = Router::new(identity.clone(), config);
        match second.clone().run().await {
            Err(RipError::SocketSetup { port, .. }) => assert_eq!(port, identity.output_port),
            other => panic!("expected socket setup failure, got {other:?}"),
        }
        assert!(!second.is_alive());
        assert!(first.is_alive());

        first.stop();
        time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn socket_conflict_is_fatal_to_the_router() {
        let config = quiet_config(21300, 22300);
        let identity = config.identity_for("R1").unwrap();
        let _squatter = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, identity.input_port)).unwrap();

        let r1 = Router::new(identity.clone(), config);
        match r1.clone().run().await {
            Err(RipError::SocketSetup { port, .. }) => assert_eq!(port, identity.input_port),
            other => panic!("expected socket setup failure, got {other:?}"),
        }
        assert!(!r1.is_alive());
    }
}
