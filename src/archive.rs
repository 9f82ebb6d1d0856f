//! Offline conversion of archived raw frames into `RunData.csv`.
//!
//! A deployment directory holds a `RunIndex.csv` naming each archived file and its
//! record type. Scan (and downward-looking) files are a concatenation of raw
//! response frames as written by the scan controller: a 12-byte header, the
//! announced number of data bytes, and one terminator byte. Orientation files
//! hold a single frame whose data region carries the head's attitude sensors.

use crate::config::SwitchParameters;
use crate::error::{SonarError, SonarResult};
use crate::protocol::{DEGREES_PER_STEP, HEAD_POSITION_ZERO};
use crate::scan::{RunIndex, RUN_INDEX_FILE};
use crate::session::CONFIG_JSON_FILE;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Output file written next to the run index.
pub const RUN_DATA_FILE: &str = "RunData.csv";

const HEADER_LEN: usize = 12;
const ORIENTATION_LEN: usize = 14;

/// Switch parameter names, in the order they are checked.
const SWITCH_FIELDS: [&str; 12] = [
    "max_range",
    "freq",
    "start_gain",
    "logf",
    "absorption",
    "train_angle",
    "sector_width",
    "step_size",
    "pulse_length",
    "min_range",
    "data_points",
    "num_sweeps",
];

/// One row of `RunData.csv`. Fields that do not apply to a record stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunDataRow {
    /// Source file name as listed in the run index.
    #[serde(rename = "File")]
    pub file: String,
    /// 1-based record number within a scan file; 0 for orientation.
    pub scan_index: Option<u32>,
    /// Head angle in degrees.
    pub headposition: Option<f64>,
    /// `" cw"` or `"ccw"`.
    pub stepdirection: Option<String>,
    /// Range code echoed by the head.
    pub range: Option<u8>,
    /// Profile range.
    pub profilerange: Option<u16>,
    /// External temperature, °C.
    #[serde(rename = "tempExternal")]
    pub temp_external: Option<f64>,
    /// Internal temperature, °C.
    #[serde(rename = "tempInternal")]
    pub temp_internal: Option<f64>,
    /// Depth in metres.
    pub depth: Option<f64>,
    /// Pitch in degrees.
    pub pitch: Option<f64>,
    /// Roll in degrees.
    pub roll: Option<f64>,
    /// Compass heading in degrees.
    pub heading: Option<f64>,
    /// Gyro heading in degrees.
    pub gyroheading: Option<f64>,
    /// Echo bytes, comma separated.
    pub pingdata: Option<String>,
}

/// What a conversion produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertSummary {
    /// Path of the written CSV.
    pub output: PathBuf,
    /// Files listed in the index that were converted.
    pub files: usize,
    /// Rows written.
    pub rows: usize,
    /// Switch parameters of the deployment, when `config.json` was present.
    pub params: Option<SwitchParameters>,
}

/// Combine a 7-bit low byte and a 6-bit high byte.
fn combine(low: u8, high: u8) -> u16 {
    (u16::from(high & 0x3F) << 7) | u16::from(low & 0x7F)
}

/// Fill `buf` as far as the reader allows, returning the number of bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> SonarResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Parse every frame of a scan or downward file.
///
/// A truncated trailing frame ends parsing; the complete frames before it are kept.
pub fn parse_scan_records<R: Read>(file_name: &str, reader: &mut R) -> SonarResult<Vec<RunDataRow>> {
    let mut rows = Vec::new();
    let mut header = [0u8; HEADER_LEN];

    loop {
        if read_up_to(reader, &mut header)? < HEADER_LEN {
            break;
        }

        let position = combine(header[5], header[6]);
        let datalength = usize::from(combine(header[10], header[11]));
        let mut data = vec![0u8; datalength];
        let got = read_up_to(reader, &mut data)?;
        if got < datalength {
            warn!(
                "Record {} in {} is short at {} bytes when it should be {}",
                rows.len() + 1,
                file_name,
                got,
                datalength
            );
            break;
        }

        // Terminator
        let mut terminator = [0u8; 1];
        read_up_to(reader, &mut terminator)?;

        let pingdata = data.iter().map(u8::to_string).collect::<Vec<_>>().join(",");
        rows.push(RunDataRow {
            file: file_name.to_string(),
            scan_index: Some(rows.len() as u32 + 1),
            headposition: Some(
                (f64::from(position) - f64::from(HEAD_POSITION_ZERO)) * DEGREES_PER_STEP,
            ),
            stepdirection: Some(if header[6] & 0x40 != 0 { " cw" } else { "ccw" }.to_string()),
            range: Some(header[7]),
            profilerange: Some(combine(header[8], header[9])),
            pingdata: Some(pingdata),
            ..RunDataRow::default()
        });
    }

    Ok(rows)
}

/// Parse the single frame of an orientation file.
pub fn parse_orientation_record<R: Read>(file_name: &str, reader: &mut R) -> SonarResult<RunDataRow> {
    let mut header = [0u8; HEADER_LEN];
    let got = read_up_to(reader, &mut header)?;
    if got < HEADER_LEN {
        return Err(SonarError::Archive(format!(
            "header data in orientation file {} is short at {} bytes",
            file_name, got
        )));
    }

    let datalength = usize::from(combine(header[10], header[11]));
    let mut data = vec![0u8; datalength];
    let got = read_up_to(reader, &mut data)?;
    if got < datalength || datalength < ORIENTATION_LEN {
        return Err(SonarError::Archive(format!(
            "data in orientation file {} is short at {} bytes",
            file_name, got
        )));
    }

    let field = |offset: usize| f64::from(combine(data[offset], data[offset + 1]));
    Ok(RunDataRow {
        file: file_name.to_string(),
        scan_index: Some(0),
        temp_external: Some(field(0) / 16.0 - 55.0),
        temp_internal: Some(field(2) / 16.0 - 55.0),
        depth: Some(field(4) / 10.0),
        pitch: Some(field(6) / 10.0 - 90.0),
        roll: Some(field(8) / 10.0 - 90.0),
        heading: Some(field(10) / 10.0),
        gyroheading: Some(field(12) / 10.0),
        ..RunDataRow::default()
    })
}

/// Read a deployment's `config.json`, requiring every switch parameter.
///
/// # Errors
///
/// Returns `MissingParameter` naming the first absent field.
pub fn load_switch_parameters(path: &Path) -> SonarResult<SwitchParameters> {
    let file = File::open(path)?;
    let map: Map<String, Value> = serde_json::from_reader(BufReader::new(file))?;
    if let Some(missing) = SWITCH_FIELDS.iter().find(|f| !map.contains_key(**f)) {
        return Err(SonarError::MissingParameter((*missing).to_string()));
    }
    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Convert every file listed in `<dir>/RunIndex.csv` into `<dir>/RunData.csv`.
pub fn convert_run(dir: &Path) -> SonarResult<ConvertSummary> {
    let index_path = dir.join(RUN_INDEX_FILE);
    if !index_path.is_file() {
        return Err(SonarError::Archive(format!(
            "no {} in {}",
            RUN_INDEX_FILE,
            dir.display()
        )));
    }

    let params = match load_switch_parameters(&dir.join(CONFIG_JSON_FILE)) {
        Ok(params) => Some(params),
        Err(SonarError::Io(_)) => None,
        Err(e) => return Err(e),
    };

    let output = dir.join(RUN_DATA_FILE);
    let mut writer = csv::Writer::from_path(&output)?;
    let mut files = 0;
    let mut rows = 0;

    for entry in RunIndex::new(dir).entries()? {
        let path = dir.join(&entry.file);
        let mut reader = BufReader::new(File::open(&path)?);
        let parsed = match entry.kind.as_str() {
            "scan" | "downward" => parse_scan_records(&entry.file, &mut reader)?,
            "orientation" => match parse_orientation_record(&entry.file, &mut reader) {
                Ok(row) => vec![row],
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            },
            other => {
                warn!("Unrecognized type in {}: {}", RUN_INDEX_FILE, other);
                continue;
            }
        };

        for row in &parsed {
            writer.serialize(row)?;
        }
        files += 1;
        rows += parsed.len();
    }

    writer.flush()?;
    info!("Converted {} file(s), {} row(s) into {}", files, rows, output.display());

    Ok(ConvertSummary {
        output,
        files,
        rows,
        params,
    })
}
