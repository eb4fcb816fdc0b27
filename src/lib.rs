//! Per-process GPU engine utilisation from DRM fdinfo
//!
//! DRM drivers publish per-client usage counters in the fdinfo of every
//! open device descriptor. This library scans those records, tracks each
//! client across scans and turns the cumulative busy counters into
//! per-engine utilisation, ready to print as a `top`-like dashboard or as
//! text, CSV or JSON lines.
//!
//! # Platform Support
//!
//! - **Linux**: via `/proc/<pid>/fdinfo` and `/sys/class/drm`
//!
//! The tracking core ([`ClientRegistry`], [`parse_fdinfo`], the
//! presenters) is platform independent and can be fed from any
//! [`ClientSource`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! # #[cfg(target_os = "linux")]
//! # fn main() -> gpu_clients::Result<()> {
//! use gpu_clients::{Config, Monitor};
//! use std::thread;
//!
//! let config = Config::default();
//! let mut monitor = Monitor::new(&config)?;
//!
//! // The first scan only establishes a baseline
//! monitor.sample();
//! thread::sleep(config.period());
//!
//! for client in &monitor.sample().clients {
//!     println!("{} (PID {}): {} ns", client.name(), client.pid(), client.last_runtime());
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(target_os = "linux"))]
//! # fn main() {}
//! ```
//!
//! # Permissions
//!
//! Only the descriptors of processes the caller may inspect are visible:
//! run as root to see every client on the system.
//!
//! # Replaying Captured Records
//!
//! ```rust
//! use gpu_clients::{parse_fdinfo, ClientRegistry, ScannedClient, SortKey};
//! use std::time::Duration;
//!
//! let text = "drm-driver: i915\ndrm-client-id: 3\ndrm-engine-render: 1000 ns\n";
//! let record = parse_fdinfo(text, None).unwrap();
//! let source = vec![ScannedClient { pid: 42, name: "app".into(), drm_minor: 0, record }];
//!
//! let mut registry = ClientRegistry::new();
//! registry.scan(&source, None);
//! registry.sort(SortKey::Runtime);
//!
//! let snapshot = registry.snapshot(Duration::from_secs(1));
//! assert_eq!(snapshot.clients[0].pid(), 42);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod fdinfo;
pub mod present;
pub mod registry;
pub mod sort;
pub mod source;
pub mod types;

#[cfg(target_os = "linux")]
pub mod linux;

// Re-export main types at crate root
pub use client::{busy_percent, Client, ClientEngines};
pub use config::Config;
pub use error::{Error, Result};
pub use fdinfo::parse_fdinfo;
pub use present::{OutputMode, Snapshot};
pub use registry::{ClientFilter, ClientRegistry};
pub use sort::{sort_clients, SortKey};
pub use source::{ClientSource, ScannedClient};
pub use types::*;

#[cfg(target_os = "linux")]
pub use linux::{Monitor, SamplingHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if the current platform can enumerate DRM clients
pub fn is_platform_supported() -> bool {
    cfg!(target_os = "linux")
}

/// Get a human-readable description of the current platform support status
pub fn platform_support_status() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "Linux: Supported via DRM fdinfo"
    }

    #[cfg(not(target_os = "linux"))]
    {
        "This platform is not supported"
    }
}
