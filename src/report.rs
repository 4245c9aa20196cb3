//! CSV report of the per-layer totals.
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::accumulator::Snapshot;
use crate::error::WsError;

/// Header of the CSV report.
pub const HEADER: [&str; 3] = ["Layer Name", "W=1 & S!=0", "W=-1 & S!=0"];

/// Quotes a CSV field if it contains a separator, a quote or a line break.
fn escape(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Writes the report to any writer: a header row, then one row per layer in first-observed order.
pub fn write_report<W: Write>(writer: &mut W, snapshot: &Snapshot) -> Result<(), WsError> {
    let header: Vec<String> = HEADER.iter().map(|field| escape(field)).collect();
    writeln!(writer, "{}", header.join(","))?;
    for stats in snapshot.iter() {
        writeln!(
            writer,
            "{},{},{}",
            escape(&stats.layer),
            stats.pos_total,
            stats.neg_total
        )?;
    }
    Ok(())
}

/// Writes the report to a CSV file, creating its parent directory if needed.
pub fn write_csv<P: AsRef<Path>>(path: P, snapshot: &Snapshot) -> Result<(), WsError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_report(&mut writer, snapshot)?;
    writer.flush()?;
    log::info!("Report with {} layers written to {}", snapshot.len(), path.display());
    Ok(())
}
