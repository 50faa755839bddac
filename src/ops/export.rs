//! Pluggable export encoding. `ExportWriter` is the seam the storage engine
//! swaps encoders through without touching the scan/filter path; `jsonl` and
//! `csv` are built in here. A Parquet encoder is a pluggable `ExportWriter`
//! implementation too, but encoding it is out of this crate's scope — only
//! the trait boundary is.

use std::io::Write;

use anyhow::Result;

use crate::model::LogEntry;

pub trait ExportWriter {
    fn write_entry(&mut self, entry: &LogEntry) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

pub struct JsonlWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> ExportWriter for JsonlWriter<W> {
    fn write_entry(&mut self, entry: &LogEntry) -> Result<()> {
        serde_json::to_writer(&mut self.out, entry)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

pub struct CsvWriter<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }
}

impl<W: Write> ExportWriter for CsvWriter<W> {
    fn write_entry(&mut self, entry: &LogEntry) -> Result<()> {
        if !self.header_written {
            writeln!(self.out, "ts,labels,msg")?;
            self.header_written = true;
        }
        let labels = flatten_labels(entry);
        writeln!(
            self.out,
            "{},{},{}",
            entry.ts.to_rfc3339(),
            csv_escape(&labels),
            csv_escape(&entry.msg)
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// `k=v;k=v`, key-sorted (the label map is already a `BTreeMap`).
fn flatten_labels(entry: &LogEntry) -> String {
    entry
        .labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn export_all<W: ExportWriter>(
    reader: &crate::capture::Reader,
    filter: &crate::capture::Filter,
    writer: &mut W,
) -> Result<u64> {
    let mut count = 0u64;
    reader.scan(filter, |entry| {
        if writer.write_entry(entry).is_ok() {
            count += 1;
        }
        true
    })?;
    writer.finish()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Labels;
    use chrono::Utc;

    #[test]
    fn csv_flattens_labels_key_sorted() {
        let mut labels = Labels::new();
        labels.insert("pod".to_string(), "web-1".to_string());
        labels.insert("app".to_string(), "web".to_string());
        let entry = LogEntry::new(Utc::now(), labels, "hello, world");

        let mut buf = Vec::new();
        let mut w = CsvWriter::new(&mut buf);
        w.write_entry(&entry).unwrap();
        w.finish().unwrap();

        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("app=web;pod=web-1"));
        assert!(out.contains("\"hello, world\""));
    }

    #[test]
    fn jsonl_round_trips_through_serde() {
        let entry = LogEntry::new(Utc::now(), Labels::new(), "hi");
        let mut buf = Vec::new();
        let mut w = JsonlWriter::new(&mut buf);
        w.write_entry(&entry).unwrap();
        w.finish().unwrap();

        let line = String::from_utf8(buf).unwrap();
        let decoded: LogEntry = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(decoded, entry);
    }
}
