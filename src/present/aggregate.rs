//! Per-process aggregation
//!
//! A process opening the same device several times shows up as several
//! clients. Folding them into one row per (device, pid) gives a per-process
//! view. Aggregated rows carry a negative id derived from the pid, which
//! can never collide with a real client id.

use crate::client::Client;
use crate::sort::SortKey;

use super::Snapshot;

impl Snapshot {
    /// Sum all clients of the same process on the same device into one row
    pub fn aggregate_by_pid(&self, key: SortKey) -> Snapshot {
        let mut rows: Vec<Client> = Vec::new();

        for c in &self.clients {
            match rows
                .iter_mut()
                .find(|row| row.drm_minor == c.drm_minor && row.pid == c.pid)
            {
                Some(row) => merge_into(row, c),
                None => {
                    let mut row = c.clone();
                    row.id = aggregate_id(c.pid);
                    if row.samples > 2 {
                        row.samples = 2;
                    }
                    if !c.has_data() {
                        clear_period(&mut row);
                    }
                    rows.push(row);
                }
            }
        }

        let mut snapshot = Snapshot {
            clients: rows,
            elapsed: self.elapsed,
            max_pid_len: self.max_pid_len,
            max_name_len: self.max_name_len,
        };
        snapshot.sort(key);
        snapshot
    }
}

/// Synthetic id for the aggregate of a process, always negative
pub fn aggregate_id(pid: u32) -> i64 {
    -1 - i64::from(pid)
}

/// A client's first sample carries its whole counter, not a period delta
fn clear_period(row: &mut Client) {
    row.val.iter_mut().for_each(|v| *v = 0);
    row.last_runtime = 0;
}

fn merge_into(row: &mut Client, c: &Client) {
    let has_data = c.has_data();

    for i in 0..c.engines.len() {
        let capacity = c.engines.capacity(i);
        if capacity == 0 {
            continue;
        }
        let Some(name) = c.engines.names().get(i) else {
            continue;
        };

        let Some(slot) = row.engines.slot(name) else {
            continue;
        };
        if slot >= row.val.len() {
            row.val.resize(slot + 1, 0);
            row.last.resize(slot + 1, 0);
        }
        row.engines
            .set_capacity(slot, row.engines.capacity(slot).max(capacity));
        if has_data {
            row.val[slot] = row.val[slot].saturating_add(c.delta_ns(i));
        }
        row.last[slot] = row.last[slot].saturating_add(c.last_busy_ns(i));
    }

    row.total_runtime = row.total_runtime.saturating_add(c.total_runtime);
    if has_data {
        row.last_runtime = row.last_runtime.saturating_add(c.last_runtime);
    }
    row.samples = if row.samples >= 2 || c.samples >= 2 {
        2
    } else {
        row.samples.max(c.samples)
    };
}
