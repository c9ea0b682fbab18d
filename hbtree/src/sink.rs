//! Record sinks: where flushed heartbeat records go.
//!
//! A node hands its records to a [`RecordSink`] in batches: the full ring
//! every time the write cursor wraps, and the partial ring at teardown. Each
//! record is written exactly once.
//!
//! Two file formats are provided:
//!
//! - [`TextSink`]: a header line, then one tab-separated line per record
//!   with floats printed to six decimals. [`read_text_log`] parses it back.
//! - [`JsonLinesSink`]: one JSON object per record, no header.
//!   [`read_json_lines_log`] parses it back.
//!
//! Applications can implement [`RecordSink`] themselves and hand the sink to
//! [`HeartbeatBuilder::sink`](crate::HeartbeatBuilder::sink).

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::{LogConfig, LogFormat};
use crate::error::{ConstructionError, Result, SinkError};
use crate::record::{BeatIds, Rates, Record};
use crate::window::Delta;

/// Column names of the text log, in field order.
pub const TEXT_COLUMNS: [&str; 17] = [
    "LID",
    "SID",
    "Tag",
    "Timestamp",
    "Work",
    "Latency",
    "Global_Perf",
    "Window_Perf",
    "Instant_Perf",
    "Accuracy",
    "Global_Acc",
    "Window_Acc",
    "Instant_Acc",
    "Energy",
    "Global_Pwr",
    "Window_Pwr",
    "Instant_Pwr",
];

/// A destination for flushed heartbeat records.
pub trait RecordSink: Send {
    /// Writes whatever precedes the first record. Called once, when the node
    /// is built.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be written; the node is then
    /// not constructed.
    fn write_header(&mut self) -> std::result::Result<(), SinkError> {
        Ok(())
    }

    /// Writes a batch of records in order.
    ///
    /// # Errors
    ///
    /// Returns an error if any record cannot be written.
    fn write_records(&mut self, records: &[Record]) -> std::result::Result<(), SinkError>;

    /// Flushes buffered output. Called once, at node teardown.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered output cannot be flushed.
    fn close(&mut self) -> std::result::Result<(), SinkError> {
        Ok(())
    }
}

/// Tab-separated text log.
#[derive(Debug)]
pub struct TextSink<W> {
    writer: W,
}

impl<W: Write + Send> TextSink<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl TextSink<BufWriter<File>> {
    /// Creates (or truncates) a text log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> RecordSink for TextSink<W> {
    fn write_header(&mut self) -> std::result::Result<(), SinkError> {
        writeln!(self.writer, "{}", TEXT_COLUMNS.join("\t"))?;
        Ok(())
    }

    fn write_records(&mut self, records: &[Record]) -> std::result::Result<(), SinkError> {
        for r in records {
            writeln!(
                self.writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}",
                r.beat_number(),
                r.shared_beat_number(),
                r.user_tag(),
                r.timestamp(),
                r.work(),
                r.latency(),
                r.global_rate(),
                r.window_rate(),
                r.instant_rate(),
                r.accuracy(),
                r.global_accuracy(),
                r.window_accuracy(),
                r.instant_accuracy(),
                r.energy(),
                r.global_power(),
                r.window_power(),
                r.instant_power(),
            )?;
        }
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// JSON-lines log: one serialized [`Record`] per line.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Creates (or truncates) a JSON-lines log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn write_records(&mut self, records: &[Record]) -> std::result::Result<(), SinkError> {
        for record in records {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Opens the file sink described by `config`.
///
/// # Errors
///
/// Returns [`ConstructionError::SinkOpen`] if the file cannot be created.
pub fn open_sink(
    config: &LogConfig,
) -> std::result::Result<Box<dyn RecordSink>, ConstructionError> {
    let open_err = |source| ConstructionError::SinkOpen {
        path: config.path.clone(),
        source,
    };

    let sink: Box<dyn RecordSink> = match config.format {
        LogFormat::Text => Box::new(TextSink::create(&config.path).map_err(open_err)?),
        LogFormat::JsonLines => Box::new(JsonLinesSink::create(&config.path).map_err(open_err)?),
    };
    Ok(sink)
}

/// Reads a log written in `format` back into records.
///
/// # Errors
///
/// See [`read_text_log`] and [`read_json_lines_log`].
pub fn read_log<P: AsRef<Path>>(path: P, format: LogFormat) -> Result<Vec<Record>> {
    match format {
        LogFormat::Text => read_text_log(path),
        LogFormat::JsonLines => read_json_lines_log(path),
    }
}

/// Reads a text log back into records.
///
/// The header line is skipped if present; blank lines are ignored. Floats
/// carry only the six decimals that were logged.
///
/// # Errors
///
/// Returns [`SinkError::Open`] if the file cannot be opened,
/// [`SinkError::Read`] if it cannot be read, and [`SinkError::Parse`] with
/// the 1-based line number for the first malformed line.
pub fn read_text_log<P: AsRef<Path>>(path: P) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for (index, line) in open_lines(path.as_ref())?.enumerate() {
        let line = line.map_err(SinkError::Read)?;
        if line.trim().is_empty() || line.starts_with(TEXT_COLUMNS[0]) {
            continue;
        }
        records.push(parse_text_line(&line).map_err(|reason| SinkError::Parse {
            line: index + 1,
            reason,
        })?);
    }
    Ok(records)
}

/// Reads a JSON-lines log back into records.
///
/// # Errors
///
/// Returns [`SinkError::Open`] if the file cannot be opened,
/// [`SinkError::Read`] if it cannot be read, and [`SinkError::Parse`] with
/// the 1-based line number for the first malformed line.
pub fn read_json_lines_log<P: AsRef<Path>>(path: P) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for (index, line) in open_lines(path.as_ref())?.enumerate() {
        let line = line.map_err(SinkError::Read)?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| SinkError::Parse {
            line: index + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

fn open_lines(path: &Path) -> Result<io::Lines<BufReader<File>>> {
    let file = File::open(path).map_err(|e| SinkError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(BufReader::new(file).lines())
}

fn parse_text_line(line: &str) -> std::result::Result<Record, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != TEXT_COLUMNS.len() {
        return Err(format!(
            "expected {} fields, found {}",
            TEXT_COLUMNS.len(),
            fields.len()
        ));
    }

    let int = |i: usize| -> std::result::Result<u64, String> {
        fields[i]
            .parse()
            .map_err(|e| format!("{}: {e}", TEXT_COLUMNS[i]))
    };
    let signed = |i: usize| -> std::result::Result<i64, String> {
        fields[i]
            .parse()
            .map_err(|e| format!("{}: {e}", TEXT_COLUMNS[i]))
    };
    let float = |i: usize| -> std::result::Result<f64, String> {
        fields[i]
            .parse()
            .map_err(|e| format!("{}: {e}", TEXT_COLUMNS[i]))
    };
    let rates = |first: usize| -> std::result::Result<Rates, String> {
        Ok(Rates {
            global: float(first)?,
            window: float(first + 1)?,
            instant: float(first + 2)?,
        })
    };

    let ids = BeatIds {
        id: int(0)?,
        shared_id: int(1)?,
        user_tag: int(2)?,
    };
    let delta = Delta {
        time: signed(5)?,
        work: int(4)?,
        accuracy: float(9)?,
        energy: float(13)?,
    };

    Ok(Record::from_parts(
        ids,
        signed(3)?,
        &delta,
        rates(6)?,
        rates(10)?,
        rates(14)?,
    ))
}
