//! DRM fdinfo usage record parser
//!
//! Drivers exposing per-client usage statistics add `key: value` lines to
//! `/proc/<pid>/fdinfo/<fd>` of every open DRM file descriptor:
//! ```text
//! drm-driver:     i915
//! drm-pdev:       0000:00:02.0
//! drm-client-id:  123
//! drm-engine-render:      12345678 ns
//! drm-engine-copy:        0 ns
//! drm-engine-video:       0 ns
//! drm-engine-capacity-video:      2
//! drm-memory-resident:    1234567
//! ```
//!
//! Keys are matched with or without the `drm-` prefix. Unknown keys are
//! ignored. Parsing is pure: no I/O and no shared state.

use crate::types::{CounterRecord, EngineMap, EngineSample};

const ENGINE_PREFIX: &str = "engine-";
const CAPACITY_PREFIX: &str = "engine-capacity-";

/// Engine key seen while walking a record, before validation
struct PendingEngine {
    name: String,
    index: Option<usize>,
    busy_ns: Option<u64>,
    capacity: Option<u32>,
}

/// Parse one fdinfo text blob into a usage record
///
/// With an engine map, engines whose name is not in the map are ignored and
/// each engine's index is its position in the map. Without one, engines are
/// indexed in first-seen order.
///
/// Returns `None` unless both `driver` and `client-id` were found and at
/// least one engine busy counter was present: anything else is not a DRM
/// usage record.
pub fn parse_fdinfo(text: &str, engine_map: Option<&EngineMap>) -> Option<CounterRecord> {
    let mut driver = None;
    let mut pdev = None;
    let mut client_id = None;
    let mut pending: Vec<PendingEngine> = Vec::new();

    for line in text.lines() {
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };
        let key = key.strip_prefix("drm-").unwrap_or(key);

        match key {
            "driver" => driver = Some(value.to_string()),
            "pdev" => pdev = Some(value.to_string()),
            "client-id" => client_id = parse_client_id(value),
            _ => {
                if let Some(name) = key.strip_prefix(CAPACITY_PREFIX) {
                    if let Some(capacity) = parse_first_u64(value) {
                        if let Some(engine) = pending_engine(&mut pending, name, engine_map) {
                            engine.capacity = Some(capacity.min(u32::MAX as u64) as u32);
                        }
                    }
                } else if let Some(name) = key.strip_prefix(ENGINE_PREFIX) {
                    if let Some(busy_ns) = parse_first_u64(value) {
                        if let Some(engine) = pending_engine(&mut pending, name, engine_map) {
                            engine.busy_ns = Some(busy_ns);
                        }
                    }
                }
            }
        }
    }

    let mut engines: Vec<EngineSample> = pending
        .into_iter()
        .filter_map(|p| {
            let busy_ns = p.busy_ns?;
            Some(EngineSample {
                index: p.index.unwrap_or(usize::MAX),
                name: p.name,
                busy_ns,
                capacity: p.capacity.unwrap_or(1).max(1),
            })
        })
        .collect();

    if engine_map.is_some() {
        engines.sort_by_key(|e| e.index);
    } else {
        for (i, engine) in engines.iter_mut().enumerate() {
            engine.index = i;
        }
    }

    if driver.is_none() || client_id.is_none() || engines.is_empty() {
        return None;
    }

    Some(CounterRecord {
        driver: driver.unwrap_or_default(),
        pdev: pdev.unwrap_or_default(),
        client_id: client_id.unwrap_or_default(),
        engines,
    })
}

/// Find or create the pending entry for an engine name
fn pending_engine<'a>(
    pending: &'a mut Vec<PendingEngine>,
    name: &str,
    engine_map: Option<&EngineMap>,
) -> Option<&'a mut PendingEngine> {
    if name.is_empty() {
        return None;
    }

    let index = match engine_map {
        Some(map) => Some(map.index_of(name)?),
        None => None,
    };

    let pos = match pending.iter().position(|p| p.name == name) {
        Some(pos) => pos,
        None => {
            pending.push(PendingEngine {
                name: name.to_string(),
                index,
                busy_ns: None,
                capacity: None,
            });
            pending.len() - 1
        }
    };

    pending.get_mut(pos)
}

/// Split "key:   value" into its parts; the value must not be empty
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() || value.is_empty() {
        None
    } else {
        Some((key, value))
    }
}

/// Parse the leading integer of a value like "12345 ns"
fn parse_first_u64(value: &str) -> Option<u64> {
    value.split_whitespace().next()?.parse().ok()
}

/// Client ids must fit a signed 64-bit id so that synthetic negative ids
/// can never collide with them
fn parse_client_id(value: &str) -> Option<u64> {
    let id = parse_first_u64(value)?;
    i64::try_from(id).ok().map(|_| id)
}
