use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::TraceEntry;

/// Appends [`TraceEntry`] lines to `<log_dir>/<date>_<instance>.jsonl`.
pub struct NodeLogWriter {
    instance: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl NodeLogWriter {
    /// Open (or create) today's file for `instance`, creating `log_dir` if
    /// needed.
    pub fn new(log_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        let instance = instance.into();
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = log_dir.join(format!("{}_{}.jsonl", date, instance));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            instance,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one entry as a single line and flush it.
    pub fn write(&self, entry: &TraceEntry) -> std::io::Result<()> {
        let json = entry
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for NodeLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read every `.jsonl` file in `log_dir`, sorted by timestamp.
///
/// Lines that do not parse are skipped.
pub fn read_entries(log_dir: impl AsRef<Path>) -> std::io::Result<Vec<TraceEntry>> {
    let log_dir = log_dir.as_ref();
    if !log_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(log_dir)? {
        let path = dir_entry?.path();
        if path.extension().map_or(true, |ext| ext != "jsonl") {
            continue;
        }
        let content = fs::read_to_string(&path)?;
        entries.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .filter_map(|line| TraceEntry::from_json_line(line).ok()),
        );
    }

    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}
