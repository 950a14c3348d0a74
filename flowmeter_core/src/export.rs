//! Flat tabular projection of the history, one CSV row per sample.
//!
//! `FlowFiltered` carries `flow_average`. Floats are written in their shortest
//! round-trip form, so a file read back yields the same values.

use std::io::{Read, Write};
use std::path::Path;

use eyre::{WrapErr, bail};
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::error::Result;
use crate::sample::Sample;

/// Header, in column order.
pub const COLUMNS: [&str; 6] = [
    "Time",
    "TimeDelta",
    "Mass",
    "Delta",
    "FlowPerSecond",
    "FlowFiltered",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    #[serde(rename = "Time")]
    pub time: u64,
    #[serde(rename = "TimeDelta")]
    pub time_delta: u64,
    #[serde(rename = "Mass")]
    pub mass: f64,
    #[serde(rename = "Delta")]
    pub delta: f64,
    #[serde(rename = "FlowPerSecond")]
    pub flow_per_second: f64,
    #[serde(rename = "FlowFiltered")]
    pub flow_filtered: f64,
}

impl From<&Sample> for ExportRow {
    fn from(s: &Sample) -> Self {
        Self {
            time: s.time,
            time_delta: s.time_delta,
            mass: s.mass,
            delta: s.delta,
            flow_per_second: s.flow_per_second,
            flow_filtered: s.flow_average,
        }
    }
}

/// Header plus one row per sample, in iteration order. The header is written
/// even when there are no samples.
pub fn write_csv<'a, W: Write>(w: W, samples: impl IntoIterator<Item = &'a Sample>) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(w);
    wtr.write_record(COLUMNS).wrap_err("write csv header")?;
    for s in samples {
        wtr.serialize(ExportRow::from(s)).wrap_err("write csv row")?;
    }
    wtr.flush().wrap_err("flush csv")?;
    Ok(())
}

/// Read rows back; the header must match `COLUMNS` exactly.
pub fn read_csv<R: Read>(r: R) -> Result<Vec<ExportRow>> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(r);
    let headers = rdr.headers().wrap_err("read csv header")?;
    if !headers.iter().eq(COLUMNS) {
        bail!(
            "unexpected csv header: {:?}; expected {}",
            headers.iter().collect::<Vec<_>>(),
            COLUMNS.join(",")
        );
    }
    let mut rows = Vec::new();
    for (i, rec) in rdr.deserialize::<ExportRow>().enumerate() {
        rows.push(rec.wrap_err_with(|| format!("parse csv row {}", i + 1))?);
    }
    Ok(rows)
}

/// Export to `path`, replacing it atomically.
pub fn write_csv_file<'a>(
    path: &Path,
    samples: impl IntoIterator<Item = &'a Sample>,
) -> Result<()> {
    write_atomic(path, |w| write_csv(w, samples))
        .wrap_err_with(|| format!("export {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_export_still_has_header() {
        let mut buf = Vec::new();
        write_csv(&mut buf, std::iter::empty()).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "Time,TimeDelta,Mass,Delta,FlowPerSecond,FlowFiltered\n"
        );
    }

    #[test]
    fn rejects_reordered_header() {
        let data = "TimeDelta,Time,Mass,Delta,FlowPerSecond,FlowFiltered\n0,0,1,1,0,0\n";
        let err = read_csv(data.as_bytes()).unwrap_err();
        assert!(format!("{err}").contains("unexpected csv header"));
    }
}
