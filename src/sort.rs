//! Client ordering
//!
//! Clients are always bucketed by DRM minor first so that a multi-device
//! system lists each device as one block, then ordered by the selected key
//! and finally by client id so the order is total.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::error::Error;

/// Secondary sort key within a device bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Busy time in the last scan period, descending
    #[default]
    Runtime,
    /// Busy time since the client appeared, descending
    Total,
    /// Process id, ascending
    Pid,
    /// Client id, ascending
    Id,
}

impl SortKey {
    /// Compare two clients by this key
    pub fn compare(self, a: &Client, b: &Client) -> Ordering {
        a.drm_minor()
            .cmp(&b.drm_minor())
            .then_with(|| match self {
                SortKey::Runtime => b.last_runtime().cmp(&a.last_runtime()),
                SortKey::Total => b.total_runtime().cmp(&a.total_runtime()),
                SortKey::Pid => a.pid().cmp(&b.pid()),
                SortKey::Id => Ordering::Equal,
            })
            .then_with(|| a.id().cmp(&b.id()))
    }

    /// Get the display name for this key
    pub fn name(&self) -> &'static str {
        match self {
            SortKey::Runtime => "runtime",
            SortKey::Total => "total",
            SortKey::Pid => "pid",
            SortKey::Id => "id",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "runtime" => Ok(SortKey::Runtime),
            "total" => Ok(SortKey::Total),
            "pid" => Ok(SortKey::Pid),
            "id" => Ok(SortKey::Id),
            other => Err(Error::invalid_config(format!("unknown sort key '{other}'"))),
        }
    }
}

/// Sort a slice of clients by a key
pub fn sort_clients(clients: &mut [Client], key: SortKey) {
    clients.sort_by(|a, b| key.compare(a, b));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(minor: u32, id: i64, pid: u32, last: u64, total: u64) -> Client {
        Client {
            drm_minor: minor,
            id,
            pid,
            last_runtime: last,
            total_runtime: total,
            ..Client::default()
        }
    }

    fn ids(clients: &[Client]) -> Vec<i64> {
        clients.iter().map(|c| c.id()).collect()
    }

    #[test]
    fn test_device_buckets_come_first() {
        let mut clients = vec![
            client(1, 1, 10, 900, 900),
            client(0, 2, 20, 10, 10),
            client(0, 3, 30, 500, 500),
        ];
        sort_clients(&mut clients, SortKey::Runtime);
        assert_eq!(ids(&clients), [3, 2, 1]);
    }

    #[test]
    fn test_each_key() {
        let base = vec![
            client(0, 1, 30, 5, 100),
            client(0, 2, 10, 50, 10),
            client(0, 3, 20, 20, 50),
        ];

        let mut c = base.clone();
        sort_clients(&mut c, SortKey::Runtime);
        assert_eq!(ids(&c), [2, 3, 1]);

        let mut c = base.clone();
        sort_clients(&mut c, SortKey::Total);
        assert_eq!(ids(&c), [1, 3, 2]);

        let mut c = base.clone();
        sort_clients(&mut c, SortKey::Pid);
        assert_eq!(ids(&c), [2, 3, 1]);

        let mut c = base;
        sort_clients(&mut c, SortKey::Id);
        assert_eq!(ids(&c), [1, 2, 3]);
    }

    #[test]
    fn test_ties_break_on_client_id() {
        let a = vec![client(0, 9, 1, 7, 7), client(0, 4, 1, 7, 7), client(0, 6, 1, 7, 7)];
        let mut b = a.clone();
        b.reverse();

        let mut a = a;
        sort_clients(&mut a, SortKey::Runtime);
        sort_clients(&mut b, SortKey::Runtime);
        assert_eq!(ids(&a), [4, 6, 9]);
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn test_parse_sort_key() {
        assert_eq!("total".parse::<SortKey>().unwrap(), SortKey::Total);
        assert_eq!(SortKey::Pid.to_string(), "pid");
        assert!("busiest".parse::<SortKey>().is_err());
    }
}
