use crate::config::ProtocolConfig;
use crate::message::{Entry, INFINITY};
use log::{debug, info};
use std::collections::HashMap;
use std::collections::hash_map::Entry as Slot;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Cost of the link to any neighbor.
pub const DEFAULT_COST: u32 = 1;

pub type SharedTable = Arc<Mutex<RoutingTable>>;

/// Advertisement requests handed to a router's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advertise {
    /// Whole table to every neighbor; re-arms the periodic timer.
    Full,
    /// Only the entries flagged as changed.
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Active,
    /// Timed out; advertised as unreachable until garbage collected.
    Aging,
}

#[derive(Debug)]
pub struct TableEntry {
    pub addr: Ipv4Addr,
    pub metric: u32,
    /// `None` for directly connected neighbors.
    pub next_hop: Option<Ipv4Addr>,
    pub route_changed: bool,
    state: EntryState,
    refreshed_at: Instant,
    // Bumped on every restart or cancel; timer callbacks carrying an older
    // epoch are ignored.
    epoch: u64,
    refresh_timer: Option<JoinHandle<()>>,
    garbage_timer: Option<JoinHandle<()>>,
}

impl TableEntry {
    fn new(addr: Ipv4Addr, metric: u32, next_hop: Option<Ipv4Addr>) -> Self {
        Self {
            addr,
            metric,
            next_hop,
            route_changed: true,
            state: EntryState::Active,
            refreshed_at: Instant::now(),
            epoch: 0,
            refresh_timer: None,
            garbage_timer: None,
        }
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn is_directly_connected(&self) -> bool {
        self.next_hop.is_none()
    }

    fn cancel_timers(&mut self) {
        self.epoch += 1;
        if let Some(timer) = self.refresh_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.garbage_timer.take() {
            timer.abort();
        }
    }
}

struct Timers {
    table: Weak<Mutex<RoutingTable>>,
    owner: String,
    timeout: Duration,
    garbage: Duration,
    advertise: mpsc::UnboundedSender<Advertise>,
}

impl Timers {
    fn arm_refresh(&self, entry: &mut TableEntry) {
        entry.cancel_timers();
        entry.state = EntryState::Active;
        entry.refreshed_at = Instant::now();

        let (table, addr, epoch, delay) = (self.table.clone(), entry.addr, entry.epoch, self.timeout);
        entry.refresh_timer = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(table) = table.upgrade() {
                table.lock().await.expire(addr, epoch);
            }
        }));
    }

    fn arm_garbage(&self, entry: &mut TableEntry) {
        let (table, addr, epoch, delay) = (self.table.clone(), entry.addr, entry.epoch, self.garbage);
        entry.garbage_timer = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(table) = table.upgrade() {
                table.lock().await.collect_garbage(addr, epoch);
            }
        }));
    }
}

/// Destinations known to one router, keyed by address.
///
/// Always used behind [`SharedTable`]: the receive loop, the advertisement
/// scheduler and the entry timers all take the same lock.
pub struct RoutingTable {
    entries: HashMap<Ipv4Addr, TableEntry>,
    timers: Timers,
}

impl RoutingTable {
    /// Aging entries send [`Advertise::Triggered`] on `advertise`.
    pub fn shared(owner: &str, config: &ProtocolConfig, advertise: mpsc::UnboundedSender<Advertise>) -> SharedTable {
        Arc::new_cyclic(|table| {
            Mutex::new(Self {
                entries: HashMap::new(),
                timers: Timers {
                    table: table.clone(),
                    owner: owner.to_string(),
                    timeout: config.timeout(),
                    garbage: config.garbage(),
                    advertise,
                },
            })
        })
    }

    /// Distance-vector update rule. Returns whether the table changed.
    ///
    /// A new destination is installed. The current next hop is authoritative
    /// and always overwrites the metric. Any other next hop only wins with a
    /// strictly smaller metric.
    pub fn check_entry(&mut self, destination: Ipv4Addr, metric: u32, next_hop: Option<Ipv4Addr>) -> bool {
        let timers = &self.timers;
        let entry = match self.entries.entry(destination) {
            Slot::Vacant(slot) => {
                let entry = slot.insert(TableEntry::new(destination, metric, next_hop));
                timers.arm_refresh(entry);
                debug!("{}: new route to {} [{}] via {}", timers.owner, destination, metric, via(next_hop));
                return true;
            }
            Slot::Occupied(slot) => slot.into_mut(),
        };

        if entry.next_hop != next_hop {
            if metric >= entry.metric {
                return false;
            }
            debug!(
                "{}: route to {} moves from {} [{}] to {} [{}]",
                timers.owner,
                destination,
                via(entry.next_hop),
                entry.metric,
                via(next_hop),
                metric
            );
            entry.next_hop = next_hop;
        }
        entry.metric = metric;
        entry.route_changed = true;
        timers.arm_refresh(entry);
        true
    }

    /// Liveness signal from a directly connected neighbor: restarts the
    /// refresh timer of its route, reinstalling the route if it is missing,
    /// aging or learned elsewhere.
    pub fn refresh_direct(&mut self, neighbor: Ipv4Addr) {
        let live = self
            .entries
            .get(&neighbor)
            .is_some_and(|e| e.is_directly_connected() && e.state == EntryState::Active);
        if !live {
            self.check_entry(neighbor, DEFAULT_COST, None);
            return;
        }
        if let Some(entry) = self.entries.get_mut(&neighbor) {
            self.timers.arm_refresh(entry);
        }
    }

    fn expire(&mut self, addr: Ipv4Addr, epoch: u64) {
        let timers = &self.timers;
        let Some(entry) = self.entries.get_mut(&addr) else {
            return;
        };
        if entry.epoch != epoch {
            return;
        }

        entry.refresh_timer = None;
        entry.metric = INFINITY;
        entry.route_changed = true;
        entry.state = EntryState::Aging;
        info!("{}: route to {} timed out, garbage collection started", timers.owner, addr);

        let _ = timers.advertise.send(Advertise::Triggered);
        timers.arm_garbage(entry);
    }

    fn collect_garbage(&mut self, addr: Ipv4Addr, epoch: u64) {
        if self.entries.get(&addr).is_some_and(|e| e.epoch == epoch) {
            self.remove_entry(addr);
            info!("{}: route to {} removed", self.timers.owner, addr);
        }
    }

    pub fn get_entry(&self, addr: Ipv4Addr) -> Option<&TableEntry> {
        self.entries.get(&addr)
    }

    pub fn remove_entry(&mut self, addr: Ipv4Addr) -> Option<TableEntry> {
        let mut entry = self.entries.remove(&addr)?;
        entry.cancel_timers();
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Idempotent; entries stay in place with their timers stopped.
    pub fn cancel_timers(&mut self) {
        for entry in self.entries.values_mut() {
            entry.cancel_timers();
        }
    }

    pub fn has_changes(&self) -> bool {
        self.entries.values().any(|e| e.route_changed)
    }

    pub fn clear_route_changes(&mut self) {
        for entry in self.entries.values_mut() {
            entry.route_changed = false;
        }
    }

    /// Entries to advertise to `neighbor`, with poison reverse applied: routes
    /// learned through `neighbor` are sent back with metric infinity.
    pub fn advertisement(&self, neighbor: Ipv4Addr, triggered: bool) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self
            .entries
            .values()
            .filter(|e| !triggered || e.route_changed)
            .map(|e| {
                let metric = if e.next_hop == Some(neighbor) { INFINITY } else { e.metric };
                Entry::route(e.addr, metric)
            })
            .collect();
        entries.sort_by_key(|e| e.addr);
        entries
    }

    /// Display rows sorted by destination.
    pub fn rows(&self) -> Vec<RouteRow> {
        let mut rows: Vec<RouteRow> = self
            .entries
            .values()
            .map(|e| RouteRow {
                destination: e.addr,
                metric: e.metric,
                next_hop: e.next_hop,
                ttl: match e.state {
                    EntryState::Active => Some(self.timers.timeout.saturating_sub(e.refreshed_at.elapsed())),
                    EntryState::Aging => None,
                },
            })
            .collect();
        rows.sort_by_key(|r| r.destination);
        rows
    }
}

fn via(next_hop: Option<Ipv4Addr>) -> String {
    next_hop.map_or_else(|| "directly connected".to_string(), |hop| hop.to_string())
}

/// One line of a routing table as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRow {
    pub destination: Ipv4Addr,
    pub metric: u32,
    pub next_hop: Option<Ipv4Addr>,
    /// `None` once garbage collection has started.
    pub ttl: Option<Duration>,
}

impl RouteRow {
    /// `C` for directly connected routes, `R` for routes learned over RIP.
    pub fn learned_via(&self) -> char {
        if self.next_hop.is_none() { 'C' } else { 'R' }
    }
}

impl fmt::Display for RouteRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<15} [{:>2}] via {:<18}",
            self.learned_via(),
            self.destination,
            self.metric,
            via(self.next_hop)
        )?;
        match self.ttl {
            Some(ttl) => write!(f, " ttl: {}", ttl.as_secs()),
            None => write!(f, " ttl: Garbage collection started"),
        }
    }
}
