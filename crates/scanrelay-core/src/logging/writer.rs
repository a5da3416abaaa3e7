//! Append-only JSONL file per relay instance

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::JsonLogEntry;

/// Appends entries to `<logs_dir>/raw/<date>_<instance>.jsonl`
pub struct InstanceLogWriter {
    instance: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl InstanceLogWriter {
    /// Open (or create) today's log file for `instance`
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        let instance = instance.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, instance));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            instance,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    /// Instance name
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush
    pub fn write(&self, entry: &JsonLogEntry) -> std::io::Result<()> {
        let line = entry
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()
    }

    /// Flush buffered output
    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for InstanceLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read every entry under `<logs_dir>/raw`, oldest first.
///
/// Lines that do not parse are skipped.
pub fn read_all_entries(logs_dir: impl AsRef<Path>) -> std::io::Result<Vec<JsonLogEntry>> {
    read_matching(logs_dir.as_ref(), |_| true)
}

/// Read the entries written by one instance, oldest first
pub fn read_instance_entries(
    logs_dir: impl AsRef<Path>,
    instance: &str,
) -> std::io::Result<Vec<JsonLogEntry>> {
    let suffix = format!("_{}.jsonl", instance);
    read_matching(logs_dir.as_ref(), |name| name.ends_with(&suffix))
}

fn read_matching(
    logs_dir: &Path,
    keep: impl Fn(&str) -> bool,
) -> std::io::Result<Vec<JsonLogEntry>> {
    let raw_dir = logs_dir.join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".jsonl") || !keep(name) {
            continue;
        }

        let content = fs::read_to_string(&path)?;
        entries.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .filter_map(|line| JsonLogEntry::from_json_line(line).ok()),
        );
    }

    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writer_creates_raw_dir() {
        let temp = TempDir::new().unwrap();
        let logs_dir = temp.path().join("logs");

        let writer = InstanceLogWriter::new(&logs_dir, "node-a").unwrap();
        assert!(logs_dir.join("raw").is_dir());
        assert!(writer.path().to_string_lossy().ends_with("_node-a.jsonl"));
    }

    #[test]
    fn test_writer_appends_lines() {
        let temp = TempDir::new().unwrap();
        let writer = InstanceLogWriter::new(temp.path(), "node-a").unwrap();

        writer
            .write(&JsonLogEntry::new("info", "node-a", "scanrelay_core::cycle", "Scan done"))
            .unwrap();
        let failed = JsonLogEntry::new(
            "warn",
            "node-a",
            "scanrelay_core::transport",
            "Notify failed, aborting transfer",
        )
        .with_fields(serde_json::json!({ "offset": 16 }));
        writer.write(&failed).unwrap();

        let content = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"offset\":16"));
    }

    #[test]
    fn test_read_entries_by_instance() {
        let temp = TempDir::new().unwrap();
        let a = InstanceLogWriter::new(temp.path(), "node-a").unwrap();
        let b = InstanceLogWriter::new(temp.path(), "node-b").unwrap();
        a.write(&JsonLogEntry::new("info", a.instance(), "t", "from a")).unwrap();
        b.write(&JsonLogEntry::new("info", b.instance(), "t", "from b")).unwrap();
        drop(a);
        drop(b);

        fs::write(temp.path().join("raw").join("notes.txt"), "ignored").unwrap();

        assert_eq!(read_all_entries(temp.path()).unwrap().len(), 2);
        let only_b = read_instance_entries(temp.path(), "node-b").unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].msg, "from b");
    }

    #[test]
    fn test_read_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(read_all_entries(temp.path().join("nope")).unwrap().is_empty());
    }
}
