use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Local};
use log::{debug, error, info};

use crate::config::SearchQuery;
use crate::error::{Result, ScrapeError};
use crate::record::JobRecord;

/// Append-only destination for scraped records.
///
/// `append` only buffers. `flush` persists the buffer and returns the total
/// number of records persisted so far; it can be called any number of times
/// during a run. A failed flush keeps the buffer for the next attempt.
pub trait ResultSink {
    fn append(&mut self, record: JobRecord);
    fn flush(&mut self) -> Result<usize>;
    fn persisted(&self) -> usize;

    /// Flush and close out the file format. Called once at the end of a run.
    fn finish(&mut self) -> Result<usize> {
        self.flush()
    }
}

/// `{source}_{country}_{jobTitle}_{location}_{datePosted}_{timestamp}.{ext}`
pub fn output_file_name(source: &str, query: &SearchQuery, at: DateTime<Local>, ext: &str) -> String {
    format!(
        "{}_{}_{}_{}_{}_{}.{}",
        source,
        query.country.code(),
        safe_component(&query.job_title),
        safe_component(&query.location),
        query.date_posted.as_str(),
        at.format("%Y%m%d_%H%M%S"),
        ext
    )
}

fn safe_component(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Vec<JobRecord>,
    records: Vec<JobRecord>,
    flushes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl ResultSink for MemorySink {
    fn append(&mut self, record: JobRecord) {
        self.buffer.push(record);
    }

    fn flush(&mut self) -> Result<usize> {
        self.flushes += 1;
        self.records.append(&mut self.buffer);
        Ok(self.records.len())
    }

    fn persisted(&self) -> usize {
        self.records.len()
    }
}

/// Writes a JSON array incrementally: `[` on first flush, one object per
/// record, `]` on finish. A crash leaves the closing bracket off; see
/// [`read_json_records`].
pub struct JsonFileSink {
    path: PathBuf,
    buffer: Vec<JobRecord>,
    persisted: usize,
    opened: bool,
    finished: bool,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        JsonFileSink {
            path: path.as_ref().to_path_buf(),
            buffer: Vec::new(),
            persisted: 0,
            opened: false,
            finished: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> Result<File> {
        if !self.opened {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
            file.write_all(b"[")?;
            file.flush()?;
            self.opened = true;
            return Ok(file);
        }
        Ok(OpenOptions::new().append(true).open(&self.path)?)
    }
}

impl ResultSink for JsonFileSink {
    fn append(&mut self, record: JobRecord) {
        self.buffer.push(record);
    }

    fn flush(&mut self) -> Result<usize> {
        if self.finished {
            return Err(ScrapeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "JSON output already finished",
            )));
        }
        if self.buffer.is_empty() && self.opened {
            return Ok(self.persisted);
        }

        let file = self.open()?;
        let mut writer = BufWriter::new(file);
        let mut chunk = String::new();
        for (i, record) in self.buffer.iter().enumerate() {
            if self.persisted + i > 0 {
                chunk.push(',');
            }
            chunk.push_str("\n  ");
            chunk.push_str(&serde_json::to_string(record)?);
        }
        writer.write_all(chunk.as_bytes())?;
        writer.flush()?;

        self.persisted += self.buffer.len();
        self.buffer.clear();
        debug!("JSON sink {:?}: {} records persisted", self.path, self.persisted);
        Ok(self.persisted)
    }

    fn persisted(&self) -> usize {
        self.persisted
    }

    fn finish(&mut self) -> Result<usize> {
        if self.finished {
            return Ok(self.persisted);
        }
        let count = self.flush()?;
        let mut file = self.open()?;
        file.write_all(b"\n]\n")?;
        file.flush()?;
        self.finished = true;
        info!("JSON saved: {:?} ({} records)", self.path, count);
        Ok(count)
    }
}

/// Reads a file written by [`JsonFileSink`], including one cut short before
/// its closing bracket.
pub fn read_json_records<P: AsRef<Path>>(path: P) -> Result<Vec<JobRecord>> {
    let content = fs::read_to_string(path)?;
    let trimmed = content.trim_end();
    if trimmed.ends_with(']') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let repaired = format!("{}\n]", trimmed.trim_end_matches(','));
    Ok(serde_json::from_str(&repaired)?)
}

/// CSV with header = field names; absent optionals become empty cells.
/// Appends to an existing file without repeating the header.
pub struct CsvFileSink {
    path: PathBuf,
    buffer: Vec<JobRecord>,
    persisted: usize,
}

impl CsvFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        CsvFileSink {
            path: path.as_ref().to_path_buf(),
            buffer: Vec::new(),
            persisted: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CsvFileSink {
    fn append(&mut self, record: JobRecord) {
        self.buffer.push(record);
    }

    fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(self.persisted);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file_has_rows = fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut csv_writer = csv::WriterBuilder::new()
            .has_headers(!file_has_rows)
            .from_writer(file);

        for record in &self.buffer {
            csv_writer.serialize(record)?;
        }
        csv_writer.flush()?;

        self.persisted += self.buffer.len();
        self.buffer.clear();
        debug!("CSV sink {:?}: {} records persisted", self.path, self.persisted);
        Ok(self.persisted)
    }

    fn persisted(&self) -> usize {
        self.persisted
    }

    fn finish(&mut self) -> Result<usize> {
        let count = self.flush()?;
        info!("CSV saved: {:?} ({} records)", self.path, count);
        Ok(count)
    }
}

/// Sends every record to several sinks. Reports the smallest persisted
/// count, i.e. what is safe in all of them.
pub struct FanOutSink {
    sinks: Vec<Box<dyn ResultSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Box<dyn ResultSink>>) -> Self {
        FanOutSink { sinks }
    }

    fn each(&mut self, op: impl Fn(&mut Box<dyn ResultSink>) -> Result<usize>) -> Result<usize> {
        let mut first_error = None;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = op(sink) {
                error!("Sink write failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(self.persisted()),
        }
    }
}

impl ResultSink for FanOutSink {
    fn append(&mut self, record: JobRecord) {
        if let Some((last, rest)) = self.sinks.split_last_mut() {
            for sink in rest {
                sink.append(record.clone());
            }
            last.append(record);
        }
    }

    fn flush(&mut self) -> Result<usize> {
        self.each(|s| s.flush())
    }

    fn persisted(&self) -> usize {
        self.sinks.iter().map(|s| s.persisted()).min().unwrap_or(0)
    }

    fn finish(&mut self) -> Result<usize> {
        self.each(|s| s.finish())
    }
}
