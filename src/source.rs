//! Sources of DRM client observations

use crate::types::{CounterRecord, EngineMap};

/// One qualifying DRM file descriptor found during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedClient {
    /// PID which has the descriptor open
    pub pid: u32,
    /// Process name
    pub name: String,
    /// DRM minor of the device the descriptor refers to
    pub drm_minor: u32,
    /// Parsed fdinfo usage record
    pub record: CounterRecord,
}

/// Something that can enumerate DRM clients
///
/// Implementations skip processes and descriptors which disappear or cannot
/// be read mid-scan. The order of the returned observations is unspecified.
pub trait ClientSource {
    /// Collect one observation per qualifying descriptor
    fn scan(&self, engine_map: Option<&EngineMap>) -> Vec<ScannedClient>;
}

/// Fixed list of observations, for replaying captured data
impl ClientSource for Vec<ScannedClient> {
    fn scan(&self, _engine_map: Option<&EngineMap>) -> Vec<ScannedClient> {
        self.clone()
    }
}

impl<S: ClientSource + ?Sized> ClientSource for &S {
    fn scan(&self, engine_map: Option<&EngineMap>) -> Vec<ScannedClient> {
        (**self).scan(engine_map)
    }
}
