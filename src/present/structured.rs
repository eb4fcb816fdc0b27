//! Line-oriented output for scripts: text, CSV and JSON lines

use std::io::{self, Write};

use serde::Serialize;

use crate::types::EngineView;

use super::Snapshot;

/// Non-interactive output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredFormat {
    /// `key=value` pairs, one client per line
    Text,
    /// Comma separated values with a header row
    Csv,
    /// One JSON object per client per line
    Json,
}

/// Usage of one engine by one client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineUsage {
    /// Engine name as reported by the driver
    pub name: String,
    /// Number of engine instances of this class
    pub capacity: u32,
    /// Busy time since the previous scan
    pub busy_ns: u64,
    /// `None` until the client has two samples
    pub busy_percent: Option<f64>,
}

/// Serializable view of one client in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSample<'a> {
    /// DRM minor of the device
    pub drm_minor: u32,
    /// Negative for per-process aggregates
    pub client_id: i64,
    /// Process holding the descriptor
    pub pid: u32,
    /// Process name as read from procfs
    pub name: &'a str,
    /// Process name with control characters replaced, safe for line output
    #[serde(skip)]
    pub print_name: &'a str,
    /// Driver name from fdinfo
    pub driver: &'a str,
    /// Device bus address, empty if the driver does not report one
    pub pdev: &'a str,
    /// Number of scans which updated the client
    pub samples: u32,
    /// Engines the client has reported
    pub engines: Vec<EngineUsage>,
}

/// Flatten a snapshot into per-client samples
pub fn client_samples(snapshot: &Snapshot, view: EngineView) -> Vec<ClientSample<'_>> {
    snapshot
        .clients
        .iter()
        .map(|c| {
            let engines = c.engines();
            let usage = engines
                .names()
                .iter()
                .enumerate()
                .filter(|&(i, _)| engines.capacity(i) > 0)
                .map(|(i, name)| EngineUsage {
                    name: name.clone(),
                    capacity: engines.capacity(i),
                    busy_ns: c.delta_ns(i),
                    busy_percent: c.busy_percent(i, snapshot.elapsed, view),
                })
                .collect();

            ClientSample {
                drm_minor: c.drm_minor(),
                client_id: c.id(),
                pid: c.pid(),
                name: c.name(),
                print_name: c.print_name(),
                driver: c.driver(),
                pdev: c.pdev(),
                samples: c.samples(),
                engines: usage,
            }
        })
        .collect()
}

/// Writes snapshots to any [`Write`] sink in a structured format
pub struct StructuredWriter<W: Write> {
    out: W,
    format: StructuredFormat,
    view: EngineView,
    /// Engine columns of the last CSV header, re-emitted when they change
    csv_columns: Option<Vec<String>>,
}

impl<W: Write> StructuredWriter<W> {
    /// Create a writer emitting `format` to `out`
    pub fn new(out: W, format: StructuredFormat, view: EngineView) -> Self {
        Self {
            out,
            format,
            view,
            csv_columns: None,
        }
    }

    /// Emit every client of a snapshot
    pub fn write(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        let samples = client_samples(snapshot, self.view);

        match self.format {
            StructuredFormat::Text => self.write_text(&samples)?,
            StructuredFormat::Csv => self.write_csv(&samples)?,
            StructuredFormat::Json => self.write_json(&samples)?,
        }

        self.out.flush()
    }

    /// Recover the underlying sink
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_text(&mut self, samples: &[ClientSample<'_>]) -> io::Result<()> {
        for s in samples {
            write!(
                self.out,
                "minor={} id={} pid={} name={}",
                s.drm_minor, s.client_id, s.pid, s.print_name
            )?;
            for e in &s.engines {
                match e.busy_percent {
                    Some(pct) => write!(self.out, " {}={:.2}%", e.name, pct)?,
                    None => write!(self.out, " {}=-", e.name)?,
                }
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn write_csv(&mut self, samples: &[ClientSample<'_>]) -> io::Result<()> {
        let mut columns: Vec<String> = Vec::new();
        for s in samples {
            for e in &s.engines {
                if !columns.contains(&e.name) {
                    columns.push(e.name.clone());
                }
            }
        }

        let mut wtr = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(&mut self.out);

        if self.csv_columns.as_ref() != Some(&columns) {
            let mut header: Vec<&str> = vec!["minor", "id", "pid", "name", "driver", "pdev"];
            header.extend(columns.iter().map(String::as_str));
            wtr.write_record(&header)?;
        }

        for s in samples {
            let mut row = vec![
                s.drm_minor.to_string(),
                s.client_id.to_string(),
                s.pid.to_string(),
                s.name.to_string(),
                s.driver.to_string(),
                s.pdev.to_string(),
            ];
            for col in &columns {
                let pct = s
                    .engines
                    .iter()
                    .find(|e| &e.name == col)
                    .and_then(|e| e.busy_percent);
                row.push(pct.map(|p| format!("{p:.2}")).unwrap_or_default());
            }
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        drop(wtr);

        self.csv_columns = Some(columns);
        Ok(())
    }

    fn write_json(&mut self, samples: &[ClientSample<'_>]) -> io::Result<()> {
        for s in samples {
            serde_json::to_writer(&mut self.out, s)?;
            writeln!(self.out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::ClientRegistry;
    use crate::sort::SortKey;
    use crate::source::ScannedClient;
    use crate::types::{CounterRecord, EngineSample};

    fn scanned(pid: u32, id: u64, render: u64) -> ScannedClient {
        named(pid, id, render, &format!("app{pid}"))
    }

    fn named(pid: u32, id: u64, render: u64, name: &str) -> ScannedClient {
        ScannedClient {
            pid,
            name: name.to_string(),
            drm_minor: 0,
            record: CounterRecord {
                driver: "xe".into(),
                pdev: "0000:03:00.0".into(),
                client_id: id,
                engines: vec![EngineSample {
                    index: 0,
                    name: "rcs".into(),
                    busy_ns: render,
                    capacity: 1,
                }],
            },
        }
    }

    fn snapshot() -> Snapshot {
        let mut reg = ClientRegistry::new();
        reg.scan(&vec![scanned(7, 1, 0)], None);
        reg.scan(&vec![scanned(7, 1, 250_000_000)], None);
        reg.sort(SortKey::Runtime);
        reg.snapshot(Duration::from_secs(1))
    }

    fn render(format: StructuredFormat, snap: &Snapshot) -> String {
        let mut w = StructuredWriter::new(Vec::new(), format, EngineView::Aggregated);
        w.write(snap).unwrap();
        String::from_utf8(w.into_inner()).unwrap()
    }

    #[test]
    fn test_client_samples() {
        let snap = snapshot();
        let samples = client_samples(&snap, EngineView::Aggregated);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].pid, 7);
        assert_eq!(samples[0].engines[0].busy_ns, 250_000_000);
        assert_eq!(samples[0].engines[0].busy_percent, Some(25.0));
    }

    #[test]
    fn test_text_output() {
        let out = render(StructuredFormat::Text, &snapshot());
        assert_eq!(out, "minor=0 id=1 pid=7 name=app7 rcs=25.00%\n");
    }

    #[test]
    fn test_json_output() {
        let out = render(StructuredFormat::Json, &snapshot());
        let value: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(value["pid"], 7);
        assert_eq!(value["driver"], "xe");
        assert_eq!(value["engines"][0]["name"], "rcs");
        assert_eq!(value["engines"][0]["busy_percent"], 25.0);
    }

    #[test]
    fn test_csv_header_written_once() {
        let snap = snapshot();
        let mut w = StructuredWriter::new(Vec::new(), StructuredFormat::Csv, EngineView::Aggregated);
        w.write(&snap).unwrap();
        w.write(&snap).unwrap();
        let out = String::from_utf8(w.into_inner()).unwrap();

        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "minor,id,pid,name,driver,pdev,rcs");
        assert_eq!(lines[1], "0,1,7,app7,xe,0000:03:00.0,25.00");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_first_sample_has_no_percent() {
        let mut reg = ClientRegistry::new();
        reg.scan(&vec![scanned(7, 1, 10)], None);
        let snap = reg.snapshot(Duration::from_secs(1));

        assert_eq!(render(StructuredFormat::Text, &snap), "minor=0 id=1 pid=7 name=app7 rcs=-\n");
    }

    #[test]
    fn test_text_output_masks_control_characters() {
        let name = "evil\nminor=9 id=99 pid=1 name=init";
        let mut reg = ClientRegistry::new();
        reg.scan(&vec![named(7, 1, 0, name)], None);
        reg.scan(&vec![named(7, 1, 0, name)], None);
        let snap = reg.snapshot(Duration::from_secs(1));

        let text = render(StructuredFormat::Text, &snap);
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("minor=0 id=1 pid=7 name=evil*minor=9 "));

        let json = render(StructuredFormat::Json, &snap);
        assert_eq!(json.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(json.trim()).unwrap();
        assert_eq!(value["name"], name);
        assert!(value.get("print_name").is_none());
    }
}
