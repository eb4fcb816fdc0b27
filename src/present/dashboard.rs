//! Terminal dashboard: one bar per engine per client, grouped by device

use std::fmt::Write as _;

use crate::client::Client;
use crate::types::EngineView;

use super::Snapshot;

const BARS: [&str; 9] = [" ", "▏", "▎", "▍", "▌", "▋", "▊", "▉", "█"];

const REVERSE: &str = "\x1b[7m";
const RESET: &str = "\x1b[0m";

/// Console dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleSize {
    /// Columns
    pub width: usize,
    /// Rows
    pub height: usize,
}

impl ConsoleSize {
    /// Used when the terminal size cannot be queried (e.g. serial consoles)
    pub const FALLBACK: ConsoleSize = ConsoleSize {
        width: 80,
        height: 24,
    };

    /// Build from a `(width, height)` query result
    pub fn from_query(size: Option<(usize, usize)>) -> Self {
        match size {
            Some((width, height)) if width > 0 && height > 0 => Self { width, height },
            _ => Self::FALLBACK,
        }
    }
}

impl Default for ConsoleSize {
    fn default() -> Self {
        Self::FALLBACK
    }
}

/// Dashboard renderer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dashboard {
    /// Console dimensions to fit the output into
    pub size: ConsoleSize,
    /// Aggregated or physical engine view
    pub view: EngineView,
    /// Also list clients which never used any engine
    pub show_idle: bool,
    /// Print the percentage inside each bar
    pub numbers: bool,
}

impl Dashboard {
    /// Dashboard for a console of the given size
    pub fn new(size: ConsoleSize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Render a snapshot, clipped to the console height
    ///
    /// Clients are expected in sorted order: a device header is printed
    /// whenever the DRM minor changes from one client to the next.
    pub fn render(&self, snapshot: &Snapshot) -> String {
        let mut out = String::new();
        let mut lines = 0;
        let mut columns: Vec<String> = Vec::new();
        let mut engine_w = 0;
        let mut prev_minor = None;

        let pid_w = snapshot.max_pid_len.max(3);
        let name_w = snapshot.max_name_len.max(4);

        for (pos, c) in snapshot.clients.iter().enumerate() {
            if !self.show_idle && c.has_data() && c.total_runtime() == 0 {
                continue;
            }

            if prev_minor != Some(c.drm_minor()) {
                if lines + 2 > self.size.height {
                    break;
                }
                columns = bucket_columns(&snapshot.clients[pos..], c.drm_minor());
                engine_w = self.print_header(&mut out, c, &columns, pid_w, name_w);
                lines += 2;
                prev_minor = Some(c.drm_minor());
            }

            if lines >= self.size.height {
                break;
            }

            let _ = write!(out, "{:>pid_w$} {:>name_w$} ", c.pid_str(), c.print_name());
            if c.has_data() {
                for name in &columns {
                    out.push_str(&self.engine_cell(c, name, engine_w, snapshot));
                }
            }
            out.push('\n');
            lines += 1;
        }

        if lines < self.size.height {
            out.push('\n');
        }

        out
    }

    /// Print the two header lines of a device bucket, returning the width
    /// of one engine column
    fn print_header(
        &self,
        out: &mut String,
        c: &Client,
        columns: &[String],
        pid_w: usize,
        name_w: usize,
    ) -> usize {
        let width = self.size.width;

        let mut title = format!("DRM minor {}", c.drm_minor());
        if !c.driver().is_empty() {
            let _ = write!(title, " ({}", c.driver());
            if !c.pdev().is_empty() {
                let _ = write!(title, " {}", c.pdev());
            }
            title.push(')');
        }
        out.push_str(REVERSE);
        out.push_str(&pad_to(&title, width));
        out.push('\n');

        let mut line = format!("{:>pid_w$} {:>name_w$} ", "PID", "NAME");
        let engine_w = if columns.is_empty() {
            0
        } else {
            width.saturating_sub(line.chars().count()) / columns.len()
        };

        for name in columns {
            line.push_str(&center(name, engine_w));
        }
        out.push_str(&pad_to(&line, width));
        out.push_str(RESET);
        out.push('\n');

        engine_w
    }

    fn engine_cell(&self, c: &Client, name: &str, engine_w: usize, snapshot: &Snapshot) -> String {
        let Some(index) = c.engines().index_of(name) else {
            return " ".repeat(engine_w);
        };
        let Some(pct) = c.busy_percent(index, snapshot.elapsed, EngineView::Aggregated) else {
            return " ".repeat(engine_w);
        };

        if !self.numbers {
            return percent_bar(pct, engine_w);
        }

        let shown = c
            .busy_percent(index, snapshot.elapsed, self.view)
            .unwrap_or(pct);
        overlay(&percent_bar(pct, engine_w), &format!("{shown:.1}%"))
    }
}

/// Engine columns of the device bucket starting at `clients[0]`
///
/// Union of every engine reported by the bucket's clients, in first-seen
/// order.
fn bucket_columns(clients: &[Client], minor: u32) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();

    for c in clients.iter().take_while(|c| c.drm_minor() == minor) {
        let engines = c.engines();
        for (i, name) in engines.names().iter().enumerate() {
            if engines.capacity(i) > 0 && !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }

    if let Some(first) = clients.first().filter(|c| c.engines().is_fixed()) {
        let order = first.engines().names();
        columns.sort_by_key(|name| order.iter().position(|n| n == name));
    }

    columns
}

/// Draw `|████▌   |` filling `max_len` cells, frame included
///
/// Each cell is split in eighths and partial cells round up, so any
/// non-zero utilisation is visible.
pub fn percent_bar(percent: f64, max_len: usize) -> String {
    const W: usize = 8;

    if max_len < 2 {
        return " ".repeat(max_len);
    }
    let len = max_len - 2;
    let percent = if percent.is_finite() { percent.max(0.0) } else { 0.0 };

    let bar_len = ((W * len) as f64 * percent / 100.0).ceil() as usize;
    let bar_len = bar_len.min(W * len);

    let mut out = String::with_capacity(max_len * 3);
    out.push('|');
    for _ in 0..bar_len / W {
        out.push_str(BARS[W]);
    }
    if bar_len % W != 0 {
        out.push_str(BARS[bar_len % W]);
    }
    for _ in 0..len - bar_len.div_ceil(W) {
        out.push(' ');
    }
    out.push('|');

    out
}

/// Write `text` centred over the inside of a bar
fn overlay(bar: &str, text: &str) -> String {
    let mut cells: Vec<String> = bar.chars().map(String::from).collect();
    let inner = cells.len().saturating_sub(2);
    let text_len = text.chars().count();
    if text_len > inner {
        return bar.to_string();
    }

    let start = 1 + (inner - text_len) / 2;
    for (i, ch) in text.chars().enumerate() {
        cells[start + i] = ch.to_string();
    }
    cells.concat()
}

fn center(name: &str, width: usize) -> String {
    let name: String = name.chars().take(width).collect();
    let len = name.chars().count();
    let pad = (width - len) / 2;
    format!("{}{}{}", " ".repeat(pad), name, " ".repeat(width - pad - len))
}

fn pad_to(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        s.to_string()
    } else {
        format!("{s}{}", " ".repeat(width - len))
    }
}
