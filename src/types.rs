//! Data types shared by the parser, the registry and the presenters

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A caller-supplied, ordered list of engine names
///
/// When a map is in use, every engine key found in a usage record must name
/// one of its entries and the entry's position becomes the engine index.
/// Clones share the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineMap(Arc<[String]>);

impl EngineMap {
    /// Create a map from engine names in index order
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Index of an engine name, matched exactly
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| n == name)
    }
}

impl Deref for EngineMap {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

/// Busy counter for one engine as found in a usage record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSample {
    /// Engine index: position in the engine map, or first-seen order when
    /// engines are auto-detected
    pub index: usize,
    /// Engine name as it appears after the `engine-` key prefix
    pub name: String,
    /// Cumulative busy time in nanoseconds
    pub busy_ns: u64,
    /// Number of parallel instances behind this engine name (always >= 1)
    pub capacity: u32,
}

/// One parsed per-descriptor usage record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterRecord {
    /// Kernel driver name (e.g. "i915")
    pub driver: String,
    /// Device bus address, disambiguates devices driven by the same driver
    pub pdev: String,
    /// Client id, unique per device only
    pub client_id: u64,
    /// Engines with a busy counter, ordered by index
    pub engines: Vec<EngineSample>,
}

impl CounterRecord {
    /// Number of engines with a busy counter
    pub fn num_engines(&self) -> usize {
        self.engines.len()
    }

    /// Sum of all engine busy counters
    pub fn total_busy_ns(&self) -> u64 {
        self.engines
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.busy_ns))
    }

    /// Look up an engine by name
    pub fn engine(&self, name: &str) -> Option<&EngineSample> {
        self.engines.iter().find(|e| e.name == name)
    }
}

/// Lifecycle state of a registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientStatus {
    /// Unused slot
    #[default]
    Free,
    /// Client seen in the current (or last completed) scan
    Alive,
    /// Client was alive before this scan and has not been seen again yet
    Probe,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientStatus::Free => write!(f, "free"),
            ClientStatus::Alive => write!(f, "alive"),
            ClientStatus::Probe => write!(f, "probe"),
        }
    }
}

/// How engine utilisation is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineView {
    /// Each engine class normalised by its capacity, 0 - 100 %
    #[default]
    Aggregated,
    /// Raw busy percentage summed over all instances, 0 - 100 x capacity
    Physical,
}

/// Information about a DRM device node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Node name (e.g. "card0", "renderD128")
    pub name: String,
    /// DRM minor number of the node
    pub minor: u32,
    /// Device node path (e.g. /dev/dri/card0)
    pub devnode: String,
    /// Bound kernel driver if known
    pub driver: Option<String>,
    /// PCI address of the parent device if it is a PCI device
    pub pci_address: Option<String>,
    /// PCI vendor ID
    pub vendor_id: Option<u16>,
    /// PCI device ID
    pub device_id: Option<u16>,
}

impl DeviceInfo {
    /// Returns true if the filter names this device's driver, PCI address
    /// or node
    pub fn matches(&self, filter: &str) -> bool {
        self.driver.as_deref() == Some(filter)
            || self.pci_address.as_deref() == Some(filter)
            || self.name == filter
            || self.devnode == filter
    }

    /// Returns true if this is a render node rather than a primary node
    pub fn is_render_node(&self) -> bool {
        self.name.starts_with("renderD")
    }
}
