//! Linux backend: DRM clients from procfs fdinfo, devices from sysfs
//!
//! [`Monitor`] ties a client source to a [`ClientRegistry`] and turns each
//! scan into a [`Snapshot`] ready for presentation.

pub mod devices;
pub mod procfs;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::present::Snapshot;
use crate::registry::{ClientFilter, ClientRegistry};
use crate::sort::SortKey;
use crate::source::ClientSource;
use crate::types::{CounterRecord, DeviceInfo};

pub use devices::{discover_devices, discover_devices_in};
pub use procfs::{DrmMajor, FdClassifier, ProcFs};

/// Handle for controlling background sampling
pub struct SamplingHandle {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SamplingHandle {
    /// Stop the background sampling
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Check if sampling is still running
    pub fn is_running(&self) -> bool {
        !self.stop_flag.load(Ordering::SeqCst)
    }
}

impl Drop for SamplingHandle {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Restricts tracking to the clients of selected devices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    drivers: Vec<String>,
    pdevs: Vec<String>,
}

impl DeviceFilter {
    /// Match records whose driver or bus address equals `filter`
    pub fn literal(filter: &str) -> Self {
        Self {
            drivers: vec![filter.to_string()],
            pdevs: vec![filter.to_string()],
        }
    }

    /// Resolve a driver name, PCI address or device node against the
    /// devices present
    pub fn resolve(filter: &str, devices: &[DeviceInfo]) -> Result<Self> {
        let mut resolved = Self::default();

        for device in devices.iter().filter(|d| d.matches(filter)) {
            match (&device.pci_address, &device.driver) {
                (Some(pci), _) if device.driver.as_deref() != Some(filter) => {
                    push_unique(&mut resolved.pdevs, pci);
                }
                (_, Some(driver)) => push_unique(&mut resolved.drivers, driver),
                (Some(pci), None) => push_unique(&mut resolved.pdevs, pci),
                (None, None) => {}
            }
        }

        if resolved.drivers.is_empty() && resolved.pdevs.is_empty() {
            return Err(Error::DeviceNotFound {
                filter: filter.to_string(),
            });
        }
        Ok(resolved)
    }

    /// True if a usage record belongs to a selected device
    pub fn accepts(&self, record: &CounterRecord) -> bool {
        self.drivers.iter().any(|d| *d == record.driver)
            || self.pdevs.iter().any(|p| *p == record.pdev)
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Periodic DRM client monitor
pub struct Monitor {
    registry: ClientRegistry,
    source: Box<dyn ClientSource + Send>,
    filter: Option<DeviceFilter>,
    sort: SortKey,
    aggregate_pid: bool,
    last_scan: Instant,
}

impl Monitor {
    /// Monitor the system's DRM clients through `/proc`
    ///
    /// Fails if the configuration is invalid, no DRM device exists, the
    /// device filter matches nothing or the process list is unreadable.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let devices = discover_devices()?;
        info!(count = devices.len(), "found DRM devices");

        let filter = config
            .device
            .as_deref()
            .map(|f| DeviceFilter::resolve(f, &devices))
            .transpose()?;

        let procfs = ProcFs::new();
        procfs.check_access()?;

        let mut monitor = Self::with_source(config, procfs)?;
        monitor.filter = filter;
        Ok(monitor)
    }

    /// Monitor clients reported by an arbitrary source
    ///
    /// A configured device filter is matched literally against each
    /// record's driver and bus address.
    pub fn with_source<S>(config: &Config, source: S) -> Result<Self>
    where
        S: ClientSource + Send + 'static,
    {
        config.validate()?;

        let registry = match config.engine_map() {
            Some(map) => ClientRegistry::with_engine_map(map),
            None => ClientRegistry::new(),
        };

        Ok(Self {
            registry,
            source: Box::new(source),
            filter: config.device.as_deref().map(DeviceFilter::literal),
            sort: config.sort,
            aggregate_pid: config.aggregate_pid,
            last_scan: Instant::now(),
        })
    }

    /// Scan once and return the clients sorted for display
    pub fn sample(&mut self) -> Snapshot {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_scan);
        self.last_scan = now;

        let device_filter = self.filter.as_ref();
        let accepts = move |_: &ClientRegistry, record: &CounterRecord| {
            device_filter.map_or(true, |f| f.accepts(record))
        };
        let filter: ClientFilter<'_> = &accepts;

        let released = self.registry.scan(self.source.as_ref(), Some(filter));
        self.registry.sort(self.sort);
        debug!(
            alive = self.registry.active_count(),
            released,
            elapsed_ms = elapsed.as_millis() as u64,
            "scan complete"
        );

        let snapshot = self.registry.snapshot(elapsed);
        if self.aggregate_pid {
            snapshot.aggregate_by_pid(self.sort)
        } else {
            snapshot
        }
    }

    /// The underlying client registry
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Current client ordering
    pub fn sort_key(&self) -> SortKey {
        self.sort
    }

    /// Change the client ordering from the next sample on
    pub fn set_sort_key(&mut self, key: SortKey) {
        self.sort = key;
    }

    /// Start continuous sampling with a callback
    ///
    /// A baseline scan is taken immediately; the callback then receives a
    /// snapshot every `interval`. Returns a handle that can be used to stop
    /// sampling.
    pub fn start_sampling<F>(mut self, interval: Duration, mut callback: F) -> Result<SamplingHandle>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        if interval.is_zero() {
            return Err(Error::invalid_config("sampling interval must be non-zero"));
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();

        let thread = thread::spawn(move || {
            self.sample();
            while !stop_flag_clone.load(Ordering::SeqCst) {
                thread::sleep(interval);
                if stop_flag_clone.load(Ordering::SeqCst) {
                    break;
                }
                callback(self.sample());
            }
        });

        Ok(SamplingHandle {
            stop_flag,
            thread: Some(thread),
        })
    }
}
