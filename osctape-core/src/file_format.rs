//! Recording file format.
//!
//! Plain csv text, one message per line:
//!
//! ```text
//! # AGAT OSC Recording                  ┐
//! # Started: Mon Oct 19 14:03:22 2026   │ header, always 4 lines
//! # Format: timestamp,address,value     │
//! time,address,value                    ┘
//! 0.000000,/mixer/fader1,0.75
//! 0.512345,/mixer/mute,true
//! 1.250000,/cue/go,
//!
//! # Duration: 1.3 seconds               footer
//! ```
//!
//! Loading always skips the header lines by count. After that, blank lines,
//! `#` comments and lines that do not parse are skipped and reported rather
//! than failing the whole file.

use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FormatError;
use crate::event::{Event, EventSequence};
use crate::value::TypedValue;

/// Number of header lines written by the recorder
pub const HEADER_LINES: usize = 4;

/// Column header line
pub const COLUMN_HEADER: &str = "time,address,value";

/// Start time format in the header, e.g. `Mon Oct 19 14:03:22 2026`
pub const STARTED_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// Timestamp format in recording file names, e.g. `261019_140322`
pub const FILENAME_TIME_FORMAT: &str = "%y%m%d_%H%M%S";

/// Name used when the configured prefix has no usable characters
pub const DEFAULT_RECORDING_NAME: &str = "recording";

/// Options for reading a recording
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Lines skipped unconditionally before data parsing starts
    pub header_lines: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            header_lines: HEADER_LINES,
        }
    }
}

/// Result of reading a recording
#[derive(Debug, Default)]
pub struct LoadReport {
    pub sequence: EventSequence,
    /// Data lines that were skipped, in file order
    pub skipped: Vec<FormatError>,
}

/// Read events from a csv source
pub fn load_from_reader<R: Read>(reader: R, options: LoadOptions) -> io::Result<LoadReport> {
    let mut reader = BufReader::new(reader);

    let mut discard = String::new();
    for _ in 0..options.header_lines {
        discard.clear();
        if reader.read_line(&mut discard)? == 0 {
            return Ok(LoadReport::default());
        }
    }

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut report = LoadReport::default();
    let mut record = csv::StringRecord::new();
    loop {
        let line = options.header_lines + csv_reader.position().line() as usize;
        match csv_reader.read_record(&mut record) {
            Ok(true) => match parse_record(&record, line) {
                Ok(Some(event)) => report.sequence.push(event),
                Ok(None) => {}
                Err(e) => report.skipped.push(e),
            },
            Ok(false) => break,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => report.skipped.push(FormatError::Csv {
                line,
                message: e.to_string(),
            }),
        }
    }

    Ok(report)
}

/// Read events from a file
pub fn load<P: AsRef<Path>>(path: P, options: LoadOptions) -> io::Result<LoadReport> {
    let file = File::open(path)?;
    load_from_reader(file, options)
}

fn parse_record(record: &csv::StringRecord, line: usize) -> Result<Option<Event>, FormatError> {
    // Whitespace-only lines come through as a single empty field
    if record.iter().all(|f| f.is_empty()) {
        return Ok(None);
    }
    if record.len() < 3 {
        return Err(FormatError::MissingFields {
            line,
            actual: record.len(),
        });
    }

    let timestamp: f64 = record[0]
        .parse()
        .ok()
        .filter(|t: &f64| t.is_finite())
        .ok_or_else(|| FormatError::InvalidTimestamp {
            line,
            value: record[0].to_string(),
        })?;

    let address = &record[1];
    if !address.starts_with('/') {
        return Err(FormatError::InvalidAddress {
            line,
            value: address.to_string(),
        });
    }

    Ok(Some(Event::new(
        timestamp,
        address,
        TypedValue::decode(&record[2]),
    )))
}

/// A recording in progress
#[derive(Debug, Clone)]
pub struct RecordingSession {
    name: String,
    started_at: DateTime<Local>,
    output_dir: PathBuf,
    buffer: EventSequence,
}

impl RecordingSession {
    pub fn new(name: &str, started_at: DateTime<Local>, output_dir: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            started_at,
            output_dir,
            buffer: EventSequence::new(),
        }
    }

    /// Add a message received `elapsed` after the session started
    pub fn append(&mut self, address: &str, value: TypedValue, elapsed: Duration) {
        self.buffer
            .push(Event::new(elapsed.as_secs_f64(), address, value));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn events(&self) -> &EventSequence {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// `{name}_{YYMMDD}_{HHMMSS}`, name reduced to filesystem safe characters
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}",
            sanitize_name(&self.name),
            self.started_at.format(FILENAME_TIME_FORMAT)
        )
    }

    /// Write header, events and footer
    pub fn save_to_writer<W: Write>(&self, writer: W, duration: Duration) -> io::Result<()> {
        let mut writer = writer;

        writeln!(writer, "# {} OSC Recording", self.name.to_uppercase())?;
        writeln!(
            writer,
            "# Started: {}",
            self.started_at.format(STARTED_FORMAT)
        )?;
        writeln!(writer, "# Format: timestamp,address,value")?;
        writeln!(writer, "{}", COLUMN_HEADER)?;

        {
            let mut csv_writer = csv::WriterBuilder::new()
                .has_headers(false)
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(&mut writer);
            for event in &self.buffer {
                csv_writer.write_record([
                    format!("{:.6}", event.timestamp),
                    event.address.clone(),
                    event.value.encode(),
                ])?;
            }
            csv_writer.flush()?;
        }

        write!(
            writer,
            "\n# Duration: {:.1} seconds\n",
            duration.as_secs_f64()
        )?;
        writer.flush()
    }

    /// Write the session to `path`, replacing any existing file
    pub fn save<P: AsRef<Path>>(&self, path: P, duration: Duration) -> io::Result<()> {
        let file = File::create(path)?;
        self.save_to_writer(BufWriter::new(file), duration)
    }
}

/// Keep alphanumerics, `-` and `_`
pub fn sanitize_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if safe.is_empty() {
        DEFAULT_RECORDING_NAME.to_string()
    } else {
        safe
    }
}
