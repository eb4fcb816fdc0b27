//! Per-client state and busy-time delta computation

use std::time::Duration;

use crate::types::{ClientStatus, CounterRecord, EngineMap, EngineView};

/// Engine names and capacities tracked for one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEngines {
    names: EngineNames,
    /// Capacity per engine index, 0 until the engine has been seen
    capacity: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EngineNames {
    /// Indices come from a caller-supplied map shared by all clients
    Fixed(EngineMap),
    /// Names auto-detected from this client's records, first-seen order
    Detected(Vec<String>),
}

impl ClientEngines {
    /// Engines indexed by a caller-supplied map
    pub fn fixed(map: EngineMap) -> Self {
        let capacity = vec![0; map.len()];
        Self {
            names: EngineNames::Fixed(map),
            capacity,
        }
    }

    /// Engines detected per client
    pub fn detected() -> Self {
        Self {
            names: EngineNames::Detected(Vec::new()),
            capacity: Vec::new(),
        }
    }

    /// Engine names by index
    pub fn names(&self) -> &[String] {
        match &self.names {
            EngineNames::Fixed(map) => map,
            EngineNames::Detected(names) => names,
        }
    }

    /// Capacity of an engine, 0 if it was never seen
    pub fn capacity(&self, index: usize) -> u32 {
        self.capacity.get(index).copied().unwrap_or(0)
    }

    /// Number of engines seen at least once
    pub fn num_engines(&self) -> usize {
        self.capacity.iter().filter(|&&c| c > 0).count()
    }

    /// Number of engine slots (highest index + 1)
    pub fn len(&self) -> usize {
        self.capacity.len()
    }

    /// True if no engine slot exists
    pub fn is_empty(&self) -> bool {
        self.capacity.is_empty()
    }

    /// Index of an engine by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names().iter().position(|n| n == name)
    }

    /// True if indices come from a caller-supplied map
    pub fn is_fixed(&self) -> bool {
        matches!(self.names, EngineNames::Fixed(_))
    }

    /// Resolve the slot for an engine, registering auto-detected names
    ///
    /// With a fixed map the slot is the name's position in the map; engines
    /// outside the map have no slot.
    pub(crate) fn slot(&mut self, name: &str) -> Option<usize> {
        let slot = match &mut self.names {
            EngineNames::Fixed(map) => map.index_of(name)?,
            EngineNames::Detected(names) => match names.iter().position(|n| n == name) {
                Some(pos) => pos,
                None => {
                    names.push(name.to_string());
                    names.len() - 1
                }
            },
        };

        if slot >= self.capacity.len() {
            self.capacity.resize(slot + 1, 0);
        }
        Some(slot)
    }

    pub(crate) fn set_capacity(&mut self, slot: usize, capacity: u32) {
        if let Some(c) = self.capacity.get_mut(slot) {
            *c = capacity;
        }
    }
}

/// One DRM client: a (device minor, client id) pair seen through an open
/// file descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub(crate) status: ClientStatus,
    /// Client id from fdinfo; negative for per-process aggregates
    pub(crate) id: i64,
    pub(crate) drm_minor: u32,
    pub(crate) driver: String,
    pub(crate) pdev: String,
    pub(crate) pid: u32,
    pub(crate) pid_str: String,
    pub(crate) name: String,
    pub(crate) print_name: String,
    pub(crate) samples: u32,
    pub(crate) total_runtime: u64,
    pub(crate) last_runtime: u64,
    pub(crate) engines: ClientEngines,
    /// Busy time per engine since the previous scan
    pub(crate) val: Vec<u64>,
    /// Busy time per engine as last parsed from fdinfo
    pub(crate) last: Vec<u64>,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            status: ClientStatus::Free,
            id: 0,
            drm_minor: 0,
            driver: String::new(),
            pdev: String::new(),
            pid: 0,
            pid_str: String::new(),
            name: String::new(),
            print_name: String::new(),
            samples: 0,
            total_runtime: 0,
            last_runtime: 0,
            engines: ClientEngines::detected(),
            val: Vec::new(),
            last: Vec::new(),
        }
    }
}

impl Client {
    /// Create a fresh, alive client for a record seen on a device
    pub(crate) fn new(
        drm_minor: u32,
        id: i64,
        record: &CounterRecord,
        engine_map: Option<&EngineMap>,
    ) -> Self {
        let engines = match engine_map {
            Some(map) => ClientEngines::fixed(map.clone()),
            None => ClientEngines::detected(),
        };
        let slots = engines.len();

        Self {
            status: ClientStatus::Alive,
            id,
            drm_minor,
            driver: record.driver.clone(),
            pdev: record.pdev.clone(),
            engines,
            val: vec![0; slots],
            last: vec![0; slots],
            ..Self::default()
        }
    }

    /// Lifecycle state
    pub fn status(&self) -> ClientStatus {
        self.status
    }

    /// Client id (negative for per-process aggregates)
    pub fn id(&self) -> i64 {
        self.id
    }

    /// DRM minor of the device this client belongs to
    pub fn drm_minor(&self) -> u32 {
        self.drm_minor
    }

    /// Driver name from fdinfo
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Device bus address from fdinfo
    pub fn pdev(&self) -> &str {
        &self.pdev
    }

    /// PID which has the DRM fd open
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Cached decimal representation of the PID
    pub fn pid_str(&self) -> &str {
        &self.pid_str
    }

    /// Process name as read from procfs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process name with non-printable characters replaced by '*'
    pub fn print_name(&self) -> &str {
        &self.print_name
    }

    /// Number of scans which updated this client
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// True once two samples exist and deltas are meaningful
    pub fn has_data(&self) -> bool {
        self.samples >= 2
    }

    /// Busy time summed over all engines and all observed deltas
    pub fn total_runtime(&self) -> u64 {
        self.total_runtime
    }

    /// Busy time summed over all engines in the most recent scan
    pub fn last_runtime(&self) -> u64 {
        self.last_runtime
    }

    /// Engines tracked for this client
    pub fn engines(&self) -> &ClientEngines {
        &self.engines
    }

    /// Busy time of an engine since the previous scan
    pub fn delta_ns(&self, index: usize) -> u64 {
        self.val.get(index).copied().unwrap_or(0)
    }

    /// Last cumulative busy counter seen for an engine
    pub fn last_busy_ns(&self, index: usize) -> u64 {
        self.last.get(index).copied().unwrap_or(0)
    }

    /// Utilisation of an engine over the last scan period
    ///
    /// Returns `None` before the second sample or for an engine the client
    /// has never reported.
    pub fn busy_percent(&self, index: usize, elapsed: Duration, view: EngineView) -> Option<f64> {
        if !self.has_data() {
            return None;
        }
        let capacity = self.engines.capacity(index);
        if capacity == 0 {
            return None;
        }

        let pct = busy_percent(self.delta_ns(index), elapsed, capacity);
        Some(match view {
            EngineView::Aggregated => pct,
            EngineView::Physical => pct * capacity as f64,
        })
    }

    /// Update pid and name, returning true if either changed
    pub(crate) fn set_owner(&mut self, pid: u32, name: &str) -> bool {
        let mut changed = false;

        if self.pid != pid || self.pid_str.is_empty() {
            self.pid = pid;
            self.pid_str = pid.to_string();
            changed = true;
        }

        if self.name != name {
            self.name = name.to_string();
            self.print_name = printable_name(name);
            changed = true;
        }

        changed
    }

    /// Fold a fresh record into this client
    ///
    /// An engine counter lower than the last one seen is skipped for this
    /// scan: fdinfo lags behind a freshly reset or created client and will
    /// catch up.
    pub(crate) fn update(&mut self, record: &CounterRecord) {
        self.last_runtime = 0;
        self.val.iter_mut().for_each(|v| *v = 0);

        for sample in &record.engines {
            let Some(i) = self.engines.slot(&sample.name) else {
                continue;
            };
            if i >= self.last.len() {
                self.last.resize(i + 1, 0);
                self.val.resize(i + 1, 0);
            }
            self.engines.set_capacity(i, sample.capacity);

            if sample.busy_ns < self.last[i] {
                continue;
            }

            let delta = sample.busy_ns - self.last[i];
            self.val[i] = delta;
            self.last[i] = sample.busy_ns;
            self.last_runtime = self.last_runtime.saturating_add(delta);
            self.total_runtime = self.total_runtime.saturating_add(delta);
        }

        self.samples = self.samples.saturating_add(1);
        self.status = ClientStatus::Alive;
    }

    /// Drop engine state and return the slot to the free pool
    pub(crate) fn release(&mut self) {
        *self = Client::default();
    }
}

/// Convert a busy-time delta into a percentage of one engine instance
///
/// The result is clamped to 0 - 100 to absorb skew between when the
/// kernel sampled the counters and when the scan period was measured.
pub fn busy_percent(delta_ns: u64, elapsed: Duration, capacity: u32) -> f64 {
    let elapsed_ns = elapsed.as_nanos() as f64;
    if elapsed_ns <= 0.0 || capacity == 0 {
        return 0.0;
    }

    let capacity = capacity as f64;
    let raw = (delta_ns as f64 / elapsed_ns * 100.0).clamp(0.0, 100.0 * capacity);
    raw / capacity
}

fn printable_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_control() { '*' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EngineSample;

    fn record(id: u64, engines: &[(&str, u64, u32)]) -> CounterRecord {
        CounterRecord {
            driver: "acc".into(),
            pdev: String::new(),
            client_id: id,
            engines: engines
                .iter()
                .enumerate()
                .map(|(index, &(name, busy_ns, capacity))| EngineSample {
                    index,
                    name: name.into(),
                    busy_ns,
                    capacity,
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_update_is_baseline() {
        let rec = record(1, &[("foo", 1000, 1)]);
        let mut c = Client::new(0, 1, &rec, None);
        c.update(&rec);

        assert_eq!(c.samples(), 1);
        assert!(!c.has_data());
        assert_eq!(c.last_busy_ns(0), 1000);
        assert_eq!(c.busy_percent(0, Duration::from_secs(1), EngineView::Aggregated), None);
    }

    #[test]
    fn test_delta_scenario() {
        let mut c = Client::new(0, 1, &record(1, &[]), None);
        c.update(&record(1, &[("foo", 1000, 1)]));
        c.update(&record(1, &[("foo", 5000, 1)]));

        assert_eq!(c.samples(), 2);
        assert_eq!(c.delta_ns(0), 4000);
        assert_eq!(c.last_runtime(), 4000);
        assert_eq!(c.total_runtime(), 5000);

        let pct = c
            .busy_percent(0, Duration::from_secs(1), EngineView::Aggregated)
            .unwrap();
        assert!((pct - 0.0004).abs() < 1e-9);
    }

    #[test]
    fn test_regressed_counter_is_skipped() {
        let mut c = Client::new(0, 1, &record(1, &[]), None);
        c.update(&record(1, &[("foo", 1000, 1), ("bar", 10, 1)]));
        c.update(&record(1, &[("foo", 500, 1), ("bar", 30, 1)]));

        assert_eq!(c.delta_ns(0), 0);
        assert_eq!(c.last_busy_ns(0), 1000);
        assert_eq!(c.delta_ns(1), 20);
        assert_eq!(c.last_runtime(), 20);

        c.update(&record(1, &[("foo", 1600, 1), ("bar", 30, 1)]));
        assert_eq!(c.delta_ns(0), 600);
        assert_eq!(c.last_busy_ns(0), 1600);
    }

    #[test]
    fn test_detected_engines_keep_slots_by_name() {
        let mut c = Client::new(0, 1, &record(1, &[]), None);
        c.update(&record(1, &[("render", 10, 1)]));
        c.update(&record(1, &[("copy", 5, 1), ("render", 30, 1)]));

        assert_eq!(c.engines().names(), ["render", "copy"]);
        assert_eq!(c.delta_ns(0), 20);
        assert_eq!(c.delta_ns(1), 5);
        assert_eq!(c.engines().num_engines(), 2);
    }

    #[test]
    fn test_fixed_engine_map() {
        let map = EngineMap::new(["render", "copy", "video"]);
        let rec = CounterRecord {
            driver: "i915".into(),
            pdev: String::new(),
            client_id: 3,
            engines: vec![EngineSample {
                index: 2,
                name: "video".into(),
                busy_ns: 70,
                capacity: 2,
            }],
        };
        let mut c = Client::new(1, 3, &rec, Some(&map));
        c.update(&rec);

        assert!(c.engines().is_fixed());
        assert_eq!(c.engines().len(), 3);
        assert_eq!(c.engines().num_engines(), 1);
        assert_eq!(c.engines().capacity(2), 2);
        assert_eq!(c.last_busy_ns(2), 70);
    }

    #[test]
    fn test_fixed_engine_map_resolves_by_name() {
        let map = EngineMap::new(["video", "render"]);
        // Indices follow the record's own order, not the map's
        let rec = record(4, &[("render", 500, 1), ("blitter", 9, 1)]);
        let mut c = Client::new(0, 4, &rec, Some(&map));
        c.update(&rec);

        assert_eq!(c.engines().len(), 2);
        assert_eq!(c.last_busy_ns(0), 0);
        assert_eq!(c.last_busy_ns(1), 500);
        assert_eq!(c.engines().capacity(0), 0);
        assert_eq!(c.engines().capacity(1), 1);
        assert_eq!(c.last_runtime(), 500);
    }

    #[test]
    fn test_busy_percent_clamps() {
        let second = Duration::from_secs(1);
        assert_eq!(busy_percent(2_000_000_000, second, 1), 100.0);
        assert_eq!(busy_percent(500_000_000, second, 1), 50.0);
        assert_eq!(busy_percent(500_000_000, second, 2), 25.0);
        assert_eq!(busy_percent(5_000_000_000, second, 2), 100.0);
        assert_eq!(busy_percent(100, Duration::ZERO, 1), 0.0);
    }

    #[test]
    fn test_physical_view_scales_by_capacity() {
        let mut c = Client::new(0, 1, &record(1, &[]), None);
        c.update(&record(1, &[("video", 0, 2)]));
        c.update(&record(1, &[("video", 1_500_000_000, 2)]));

        let second = Duration::from_secs(1);
        let agg = c.busy_percent(0, second, EngineView::Aggregated).unwrap();
        let phys = c.busy_percent(0, second, EngineView::Physical).unwrap();
        assert!((agg - 75.0).abs() < 1e-9);
        assert!((phys - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_owner_sanitizes_name() {
        let mut c = Client::default();
        assert!(c.set_owner(42, "bad\u{7}name"));
        assert_eq!(c.pid_str(), "42");
        assert_eq!(c.name(), "bad\u{7}name");
        assert_eq!(c.print_name(), "bad*name");
        assert!(!c.set_owner(42, "bad\u{7}name"));
    }
}
