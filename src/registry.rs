//! Registry of DRM clients tracked across scans
//!
//! Clients live in a growable array of slots. Each scan first marks every
//! alive client as probed, then re-confirms the clients it finds; whatever
//! is still probed at the end of the scan has gone away and is released.
//!
//! After [`ClientRegistry::sort`] all alive clients form a contiguous prefix
//! of the array and free slots its suffix. Between sorts new clients may
//! land anywhere, so [`ClientRegistry::active`] is only meaningful right
//! after a sort.

use std::cmp::Ordering;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::client::Client;
use crate::present::Snapshot;
use crate::sort::SortKey;
use crate::source::ClientSource;
use crate::types::{ClientStatus, CounterRecord, EngineMap};

/// Caller predicate deciding whether a record is tracked at all
pub type ClientFilter<'a> = &'a dyn Fn(&ClientRegistry, &CounterRecord) -> bool;

/// All DRM clients seen by the most recent scans
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Vec<Client>,
    /// Length of the alive prefix as of the last sort
    active: usize,
    max_pid_len: usize,
    max_name_len: usize,
    engine_map: Option<EngineMap>,
}

impl ClientRegistry {
    /// Create an empty registry with auto-detected engines
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry indexing engines by a fixed map
    pub fn with_engine_map(engine_map: EngineMap) -> Self {
        Self {
            engine_map: Some(engine_map),
            ..Self::default()
        }
    }

    /// The fixed engine map, if any
    pub fn engine_map(&self) -> Option<&EngineMap> {
        self.engine_map.as_ref()
    }

    /// Run a full scan cycle against a source
    ///
    /// Records rejected by `filter` are never confirmed, so a client that
    /// becomes filtered out is released like one whose process exited.
    /// Returns the number of clients released.
    pub fn scan<S>(&mut self, source: &S, filter: Option<ClientFilter<'_>>) -> usize
    where
        S: ClientSource + ?Sized,
    {
        self.begin_scan();

        for found in source.scan(self.engine_map.as_ref()) {
            if let Some(filter) = filter {
                if !filter(self, &found.record) {
                    trace!(pid = found.pid, client_id = found.record.client_id, "filtered out");
                    continue;
                }
            }
            self.observe(found.drm_minor, &found.record, found.pid, &found.name);
        }

        self.end_scan()
    }

    /// Mark every alive client as unconfirmed
    ///
    /// Scans must not overlap. Finding a client still being probed is a
    /// caller bug: debug builds panic, release builds release those clients
    /// and carry on.
    pub fn begin_scan(&mut self) {
        let stale = self
            .clients
            .iter()
            .filter(|c| c.status == ClientStatus::Probe)
            .count();

        if stale > 0 {
            debug_assert!(stale == 0, "begin_scan with {stale} clients still probed");
            warn!(stale, "previous scan never ended, releasing unconfirmed clients");
            for c in &mut self.clients {
                if c.status == ClientStatus::Probe {
                    c.release();
                }
            }
            self.update_max_lengths();
        }

        for c in &mut self.clients {
            if c.status == ClientStatus::Alive {
                c.status = ClientStatus::Probe;
            }
        }
    }

    /// Record one sighting of a client on a device
    ///
    /// A client already confirmed in this scan is the same client reached
    /// through a shared fd: only its owner is refreshed.
    pub fn observe(&mut self, drm_minor: u32, record: &CounterRecord, pid: u32, name: &str) {
        let Ok(id) = i64::try_from(record.client_id) else {
            trace!(pid, client_id = record.client_id, "client id out of range");
            return;
        };

        if let Some(i) = self.find(ClientStatus::Alive, drm_minor, id) {
            trace!(pid, drm_minor, id, "duplicate fd");
            if self.clients[i].set_owner(pid, name) {
                self.bump_max_lengths(i);
            }
            return;
        }

        let i = match self.find(ClientStatus::Probe, drm_minor, id) {
            Some(i) => i,
            None => {
                let i = self.free_slot();
                self.clients[i] = Client::new(drm_minor, id, record, self.engine_map.as_ref());
                debug!(pid, name, drm_minor, id, slot = i, "new client");
                i
            }
        };

        if self.clients[i].set_owner(pid, name) {
            self.bump_max_lengths(i);
        }
        self.clients[i].update(record);
    }

    /// Release every client which was not confirmed during this scan
    ///
    /// Returns the number of clients released.
    pub fn end_scan(&mut self) -> usize {
        let mut freed = 0;

        for c in &mut self.clients {
            if c.status == ClientStatus::Probe {
                debug!(pid = c.pid, drm_minor = c.drm_minor, id = c.id, "client gone");
                c.release();
                freed += 1;
            }
        }

        if freed > 0 {
            self.update_max_lengths();
        }

        freed
    }

    /// Sort by device, then `key`, then client id
    pub fn sort(&mut self, key: SortKey) {
        self.sort_by(|a, b| key.compare(a, b));
    }

    /// Sort with a custom comparator
    ///
    /// Alive clients are always grouped ahead of every other slot before
    /// `cmp` is consulted. Afterwards the alive prefix length is refreshed
    /// and surplus free slots are trimmed.
    pub fn sort_by<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&Client, &Client) -> Ordering,
    {
        self.clients.sort_by(|a, b| {
            status_rank(a.status)
                .cmp(&status_rank(b.status))
                .then_with(|| cmp(a, b))
        });

        self.active = self
            .clients
            .iter()
            .take_while(|c| c.status == ClientStatus::Alive)
            .count();

        self.compact();
    }

    /// Shrink the slot array once free slots outnumber half of it
    ///
    /// Keeps `active + free / 2` slots. Only slots that are actually free
    /// are ever dropped.
    pub fn compact(&mut self) {
        let len = self.clients.len();
        let active = self.active.min(len);
        let free = len - active;

        if free <= len / 2 {
            return;
        }

        let in_use = self
            .clients
            .iter()
            .rposition(|c| c.status != ClientStatus::Free)
            .map_or(0, |i| i + 1);
        let new_len = (active + free / 2).max(in_use);

        if new_len < len {
            debug!(from = len, to = new_len, "trimming client slots");
            self.clients.truncate(new_len);
            self.clients.shrink_to_fit();
        }
    }

    /// Alive clients as of the last sort
    pub fn active(&self) -> &[Client] {
        &self.clients[..self.active.min(self.clients.len())]
    }

    /// Every slot, in array order, whatever its status
    pub fn slots(&self) -> &[Client] {
        &self.clients
    }

    /// Alive clients, found by status rather than position
    pub fn alive(&self) -> impl Iterator<Item = &Client> {
        self.clients
            .iter()
            .filter(|c| c.status == ClientStatus::Alive)
    }

    /// Look up an alive client
    pub fn get(&self, drm_minor: u32, id: i64) -> Option<&Client> {
        self.find(ClientStatus::Alive, drm_minor, id)
            .map(|i| &self.clients[i])
    }

    /// Length of the alive prefix as of the last sort
    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Number of slots, free ones included
    pub fn capacity(&self) -> usize {
        self.clients.len()
    }

    /// True if no client is alive
    pub fn is_empty(&self) -> bool {
        self.alive().next().is_none()
    }

    /// Widest PID string among alive clients
    pub fn max_pid_len(&self) -> usize {
        self.max_pid_len
    }

    /// Widest printable name among alive clients
    pub fn max_name_len(&self) -> usize {
        self.max_name_len
    }

    /// Copy the alive clients out for rendering
    pub fn snapshot(&self, elapsed: Duration) -> Snapshot {
        Snapshot {
            clients: self.alive().cloned().collect(),
            elapsed,
            max_pid_len: self.max_pid_len,
            max_name_len: self.max_name_len,
        }
    }

    fn find(&self, status: ClientStatus, drm_minor: u32, id: i64) -> Option<usize> {
        self.clients
            .iter()
            .position(|c| c.status == status && c.drm_minor == drm_minor && c.id == id)
    }

    /// Find a free slot, growing the array by half when there is none
    fn free_slot(&mut self) -> usize {
        let len = self.clients.len();
        let start = self.active.min(len);

        let found = (start..len)
            .chain(0..start)
            .find(|&i| self.clients[i].status == ClientStatus::Free);

        match found {
            Some(i) => i,
            None => {
                let grown = len + (len + 2) / 2;
                self.clients.resize_with(grown, Client::default);
                len
            }
        }
    }

    fn bump_max_lengths(&mut self, i: usize) {
        let c = &self.clients[i];
        self.max_pid_len = self.max_pid_len.max(c.pid_str.len());
        self.max_name_len = self.max_name_len.max(c.print_name.chars().count());
    }

    fn update_max_lengths(&mut self) {
        let (pid, name) = self.alive().fold((0, 0), |(pid, name), c| {
            (
                pid.max(c.pid_str.len()),
                name.max(c.print_name.chars().count()),
            )
        });
        self.max_pid_len = pid;
        self.max_name_len = name;
    }
}

fn status_rank(status: ClientStatus) -> u8 {
    match status {
        ClientStatus::Alive => 0,
        ClientStatus::Probe => 1,
        ClientStatus::Free => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ScannedClient;
    use crate::types::EngineSample;

    fn record(id: u64, busy: &[(&str, u64)]) -> CounterRecord {
        CounterRecord {
            driver: "acc".into(),
            pdev: "0000:00:02.0".into(),
            client_id: id,
            engines: busy
                .iter()
                .enumerate()
                .map(|(index, &(name, busy_ns))| EngineSample {
                    index,
                    name: name.into(),
                    busy_ns,
                    capacity: 1,
                })
                .collect(),
        }
    }

    fn scanned(pid: u32, minor: u32, id: u64, busy: u64) -> ScannedClient {
        ScannedClient {
            pid,
            name: format!("proc{pid}"),
            drm_minor: minor,
            record: record(id, &[("render", busy)]),
        }
    }

    #[test]
    fn test_new_registry_is_empty() {
        let reg = ClientRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.capacity(), 0);
        assert!(reg.active().is_empty());
    }

    #[test]
    fn test_duplicate_observation_is_idempotent() {
        let mut reg = ClientRegistry::new();
        let rec = record(1, &[("render", 100)]);

        reg.begin_scan();
        reg.observe(0, &rec, 10, "a");
        reg.observe(0, &rec, 10, "a");
        reg.end_scan();

        assert_eq!(reg.alive().count(), 1);
        assert_eq!(reg.get(0, 1).unwrap().samples(), 1);
    }

    #[test]
    fn test_shared_fd_updates_owner() {
        let mut reg = ClientRegistry::new();
        let rec = record(1, &[("render", 100)]);

        reg.begin_scan();
        reg.observe(0, &rec, 10, "parent");
        reg.observe(0, &rec, 12345, "child");
        reg.end_scan();

        let c = reg.get(0, 1).unwrap();
        assert_eq!(c.pid(), 12345);
        assert_eq!(c.name(), "child");
        assert_eq!(reg.max_pid_len(), 5);
        assert_eq!(reg.alive().count(), 1);
    }

    #[test]
    fn test_same_id_on_different_devices() {
        let mut reg = ClientRegistry::new();
        let rec = record(1, &[("render", 100)]);

        reg.begin_scan();
        reg.observe(0, &rec, 10, "a");
        reg.observe(1, &rec, 10, "a");
        reg.end_scan();

        assert_eq!(reg.alive().count(), 2);
    }

    #[test]
    fn test_lifecycle_and_slot_reuse() {
        let mut reg = ClientRegistry::new();

        reg.scan(&vec![scanned(10, 0, 1, 100)], None);
        reg.sort(SortKey::Runtime);
        assert_eq!(reg.active_count(), 1);
        let slots = reg.capacity();

        let released = reg.scan(&Vec::<ScannedClient>::new(), None);
        assert_eq!(released, 1);
        assert_eq!(reg.slots()[0].status(), ClientStatus::Free);
        assert!(reg.get(0, 1).is_none());

        reg.scan(&vec![scanned(11, 0, 2, 100)], None);
        assert_eq!(reg.capacity(), slots);
        assert_eq!(reg.slots()[0].id(), 2);
        assert_eq!(reg.slots()[0].status(), ClientStatus::Alive);
    }

    #[test]
    fn test_probe_state_during_scan() {
        let mut reg = ClientRegistry::new();
        reg.scan(&vec![scanned(10, 0, 1, 100), scanned(11, 0, 2, 100)], None);

        reg.begin_scan();
        assert!(reg
            .slots()
            .iter()
            .filter(|c| c.status() != ClientStatus::Free)
            .all(|c| c.status() == ClientStatus::Probe));

        reg.observe(0, &record(1, &[("render", 200)]), 10, "proc10");
        assert_eq!(reg.get(0, 1).unwrap().status(), ClientStatus::Alive);
        assert!(reg.get(0, 2).is_none());

        assert_eq!(reg.end_scan(), 1);
        assert_eq!(reg.alive().count(), 1);
    }

    #[test]
    fn test_filtered_client_is_released() {
        let mut reg = ClientRegistry::new();
        let source = vec![scanned(10, 0, 1, 100), scanned(11, 0, 2, 100)];
        reg.scan(&source, None);
        assert_eq!(reg.alive().count(), 2);

        let only_one = |_: &ClientRegistry, r: &CounterRecord| r.client_id == 1;
        let released = reg.scan(&source, Some(&only_one));
        assert_eq!(released, 1);
        assert!(reg.get(0, 2).is_none());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "still probed")]
    fn test_overlapping_scans_panic_in_debug() {
        let mut reg = ClientRegistry::new();
        reg.scan(&vec![scanned(10, 0, 1, 100)], None);
        reg.begin_scan();
        reg.begin_scan();
    }

    #[test]
    fn test_growth_is_amortized() {
        let mut reg = ClientRegistry::new();
        reg.begin_scan();
        for id in 0..7 {
            reg.observe(0, &record(id, &[("render", 1)]), 1, "x");
        }
        reg.end_scan();

        // 0 -> 1 -> 2 -> 4 -> 7 slots
        assert_eq!(reg.capacity(), 7);
        assert_eq!(reg.alive().count(), 7);
    }

    #[test]
    fn test_compact_shrinks_free_suffix() {
        let mut reg = ClientRegistry::new();
        reg.clients = (0..50)
            .map(|i| {
                let mut c = Client::default();
                if i < 10 {
                    c.status = ClientStatus::Alive;
                    c.id = i;
                }
                c
            })
            .collect();
        reg.active = 10;

        reg.compact();
        assert_eq!(reg.capacity(), 30);
        assert_eq!(reg.alive().count(), 10);
    }

    #[test]
    fn test_compact_keeps_small_free_suffix() {
        let mut reg = ClientRegistry::new();
        reg.clients = (0..10)
            .map(|i| {
                let mut c = Client::default();
                if i < 6 {
                    c.status = ClientStatus::Alive;
                }
                c
            })
            .collect();
        reg.active = 6;

        reg.compact();
        assert_eq!(reg.capacity(), 10);
    }

    #[test]
    fn test_compact_never_drops_live_slots() {
        let mut reg = ClientRegistry::new();
        reg.clients = (0..10).map(|_| Client::default()).collect();
        reg.clients[9].status = ClientStatus::Alive;
        reg.active = 0;

        reg.compact();
        assert_eq!(reg.capacity(), 10);
    }

    #[test]
    fn test_sort_groups_alive_first() {
        let mut reg = ClientRegistry::new();
        let source: Vec<_> = (1..=6).map(|id| scanned(id as u32, 0, id, id * 10)).collect();
        reg.scan(&source, None);

        let survivors: Vec<_> = source
            .iter()
            .filter(|s| s.record.client_id % 2 == 0)
            .cloned()
            .collect();
        reg.scan(&survivors, None);
        reg.sort(SortKey::Id);

        assert_eq!(reg.active_count(), 3);
        let ids: Vec<_> = reg.active().iter().map(|c| c.id()).collect();
        assert_eq!(ids, [2, 4, 6]);
        assert!(reg.slots()[3..].iter().all(|c| c.status() == ClientStatus::Free));
    }

    #[test]
    fn test_churn_is_bounded() {
        let mut reg = ClientRegistry::new();
        for round in 0..50u64 {
            let source: Vec<_> = (0..20)
                .map(|i| scanned(1000 + i as u32, 0, round * 100 + i, 1))
                .collect();
            reg.scan(&source, None);
            reg.sort(SortKey::Runtime);
        }
        assert_eq!(reg.active_count(), 20);
        assert!(reg.capacity() < 80);
    }

    #[test]
    fn test_width_hints_shrink_on_exit() {
        let mut reg = ClientRegistry::new();
        let mut long = scanned(123456, 0, 1, 1);
        long.name = "a-much-longer-name".into();
        reg.scan(&vec![long, scanned(7, 0, 2, 1)], None);
        assert_eq!(reg.max_pid_len(), 6);
        assert_eq!(reg.max_name_len(), 18);

        reg.scan(&vec![scanned(7, 0, 2, 2)], None);
        assert_eq!(reg.max_pid_len(), 1);
        assert_eq!(reg.max_name_len(), 5);
    }

    #[test]
    fn test_fixed_map_files_detected_records_by_name() {
        let text = "drm-driver:\ti915\ndrm-client-id:\t3\ndrm-engine-render:\t500 ns\n";
        let rec = crate::fdinfo::parse_fdinfo(text, None).unwrap();
        assert_eq!(rec.engines[0].index, 0);

        let mut reg = ClientRegistry::with_engine_map(EngineMap::new(["video", "render"]));
        let client = ScannedClient {
            pid: 10,
            name: "app".into(),
            drm_minor: 0,
            record: rec,
        };
        reg.scan(&vec![client], None);

        let c = reg.get(0, 3).unwrap();
        assert_eq!(c.engines().names(), ["video", "render"]);
        assert_eq!(c.last_busy_ns(0), 0);
        assert_eq!(c.last_busy_ns(1), 500);
        assert_eq!(c.engines().num_engines(), 1);
    }

    #[test]
    fn test_snapshot_copies_alive_clients() {
        let mut reg = ClientRegistry::new();
        reg.scan(&vec![scanned(10, 0, 1, 100)], None);
        reg.scan(&vec![scanned(10, 0, 1, 300)], None);
        reg.sort(SortKey::Runtime);

        let snap = reg.snapshot(Duration::from_secs(1));
        assert_eq!(snap.clients.len(), 1);
        assert_eq!(snap.clients[0].delta_ns(0), 200);
        assert_eq!(snap.max_pid_len, 2);

        reg.scan(&Vec::<ScannedClient>::new(), None);
        assert_eq!(snap.clients.len(), 1);
    }
}
