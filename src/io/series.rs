//! Tabular time-series ingest.
//!
//! The engine's inputs and outputs are column-oriented text files with no
//! explicit shape, so every read takes two passes: the first counts columns
//! and rows, the second allocates the matrix once and fills it.
//!
//! The three layouts differ in how strict they are. `Dated` and `Cbh` fail on
//! the first short row; `Remapped` files declare their own column order and
//! are known to carry stale indices, so bad cells there are skipped and
//! reported instead.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use csv::StringRecord;
use nalgebra::DMatrix;

use crate::domain::{CellSkip, SeriesLayout, TimeSeries};

#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    #[error("failed to open series file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse series file '{path}': {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("'{path}': row {row} has {found} columns, expected {expected}")]
    MalformedRow {
        path: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("'{path}': row {row}, column {column}: '{value}' is not a number")]
    InvalidValue {
        path: PathBuf,
        row: usize,
        column: usize,
        value: String,
    },

    #[error("'{path}': cannot read a base date from '{value}'")]
    InvalidBaseDate { path: PathBuf, value: String },
}

/// Shape found by the first pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shape {
    features: usize,
    timesteps: usize,
}

/// Read a series file into a `[timestep, feature]` matrix.
pub fn read_series(path: &Path, layout: SeriesLayout) -> Result<TimeSeries, SeriesError> {
    match layout {
        SeriesLayout::Dated => read_dated(path),
        SeriesLayout::Remapped => read_remapped(path),
        SeriesLayout::Cbh => read_cbh(path),
    }
}

fn csv_reader(path: &Path, layout: SeriesLayout) -> Result<csv::Reader<File>, SeriesError> {
    let file = File::open(path).map_err(|source| SeriesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(layout.delimiter())
        .from_reader(file))
}

fn next_record(
    reader: &mut csv::Reader<File>,
    path: &Path,
) -> Result<Option<StringRecord>, SeriesError> {
    let mut record = StringRecord::new();
    let more = reader.read_record(&mut record).map_err(|source| SeriesError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(more.then_some(record))
}

/// First pass for the comma-delimited layouts: header width and data rows.
fn measure_csv(path: &Path, layout: SeriesLayout) -> Result<Shape, SeriesError> {
    let mut reader = csv_reader(path, layout)?;
    let Some(header) = next_record(&mut reader, path)? else {
        return Ok(Shape {
            features: 0,
            timesteps: 0,
        });
    };
    let features = header.len().saturating_sub(layout.leading_columns());

    let mut timesteps = 0usize;
    while next_record(&mut reader, path)?.is_some() {
        timesteps += 1;
    }
    Ok(Shape {
        features,
        timesteps,
    })
}

fn read_dated(path: &Path) -> Result<TimeSeries, SeriesError> {
    let layout = SeriesLayout::Dated;
    let shape = measure_csv(path, layout)?;
    let lead = layout.leading_columns();
    let mut values = DMatrix::<f64>::zeros(shape.timesteps, shape.features);
    let mut base_date = None;

    let mut reader = csv_reader(path, layout)?;
    let _header = next_record(&mut reader, path)?;

    for row in 0..shape.timesteps {
        let Some(record) = next_record(&mut reader, path)? else {
            break;
        };
        let fields: Vec<&str> = record.iter().collect();
        if fields.len() != lead + shape.features {
            return Err(SeriesError::MalformedRow {
                path: path.to_path_buf(),
                row,
                expected: lead + shape.features,
                found: fields.len(),
            });
        }
        if row == 0 {
            base_date = Some(parse_ymd_fields(path, &fields)?);
        }
        fill_row(path, &mut values, row, &fields, lead)?;
    }

    Ok(TimeSeries::new(base_date, values))
}

fn read_remapped(path: &Path) -> Result<TimeSeries, SeriesError> {
    let layout = SeriesLayout::Remapped;
    let shape = measure_csv(path, layout)?;
    let mut values = DMatrix::<f64>::zeros(shape.timesteps, shape.features);
    let mut skipped = Vec::new();
    let mut base_date = None;

    let mut reader = csv_reader(path, layout)?;
    let index_map = match next_record(&mut reader, path)? {
        Some(header) => ColumnIndexMap::from_header(&header, shape.features),
        None => ColumnIndexMap::default(),
    };
    tracing::debug!(path = %path.display(), slots = ?index_map.slots, "column index map");

    for row in 0..shape.timesteps {
        let Some(record) = next_record(&mut reader, path)? else {
            break;
        };
        let mut cells = record.iter();
        let label = cells.next().unwrap_or_default();
        if row == 0 {
            base_date = parse_label_date(label);
            if base_date.is_none() {
                tracing::warn!(path = %path.display(), label, "first row label is not a date");
            }
        }

        for (data_col, token) in cells.enumerate() {
            let column = data_col + 1;
            let placed = index_map
                .slot(data_col)
                .and_then(|slot| parse_value(token).map(|v| (slot, v)).ok_or_else(|| {
                    format!("'{token}' is not a number")
                }));
            match placed {
                Ok((slot, value)) => values[(row, slot)] = value,
                Err(reason) => {
                    tracing::warn!(path = %path.display(), row, column, %reason, "skipping cell");
                    skipped.push(CellSkip {
                        row,
                        column,
                        reason,
                    });
                }
            }
        }
    }

    Ok(TimeSeries {
        base_date,
        values,
        skipped,
    })
}

fn read_cbh(path: &Path) -> Result<TimeSeries, SeriesError> {
    let lead = SeriesLayout::Cbh.leading_columns();
    let open = || {
        File::open(path).map(BufReader::new).map_err(|source| SeriesError::Io {
            path: path.to_path_buf(),
            source,
        })
    };
    let read_err = |source| SeriesError::Io {
        path: path.to_path_buf(),
        source,
    };

    // First pass. There is no header: the first line is already data, and
    // only the lines after it are counted, so one is added back.
    let mut lines = open()?.lines();
    let shape = match next_data_line(&mut lines).map_err(read_err)? {
        None => Shape {
            features: 0,
            timesteps: 0,
        },
        Some(first) => {
            let features = first.split_whitespace().count().saturating_sub(lead);
            let mut after_first = 0usize;
            while next_data_line(&mut lines).map_err(read_err)?.is_some() {
                after_first += 1;
            }
            Shape {
                features,
                timesteps: after_first + 1,
            }
        }
    };

    let mut values = DMatrix::<f64>::zeros(shape.timesteps, shape.features);
    let mut base_date = None;
    let mut lines = open()?.lines();
    for row in 0..shape.timesteps {
        let Some(line) = next_data_line(&mut lines).map_err(read_err)? else {
            break;
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < lead + shape.features {
            return Err(SeriesError::MalformedRow {
                path: path.to_path_buf(),
                row,
                expected: lead + shape.features,
                found: fields.len(),
            });
        }
        if row == 0 {
            base_date = Some(parse_ymd_fields(path, &fields)?);
        }
        fill_row(path, &mut values, row, &fields, lead)?;
    }

    Ok(TimeSeries::new(base_date, values))
}

fn next_data_line(
    lines: &mut std::io::Lines<BufReader<File>>,
) -> std::io::Result<Option<String>> {
    for line in lines.by_ref() {
        let line = line?;
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

fn fill_row(
    path: &Path,
    values: &mut DMatrix<f64>,
    row: usize,
    fields: &[&str],
    lead: usize,
) -> Result<(), SeriesError> {
    for feature in 0..values.ncols() {
        let column = lead + feature;
        let token = fields[column];
        values[(row, feature)] = parse_value(token).ok_or_else(|| SeriesError::InvalidValue {
            path: path.to_path_buf(),
            row,
            column,
            value: token.to_string(),
        })?;
    }
    Ok(())
}

/// Destination slot for each data column of a remapped file.
///
/// Built from the header's trailing tokens (1-based in the file). A token that
/// is not a number, or names a slot outside `[1, feature_count]`, maps to
/// `None` and every cell in that column is skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnIndexMap {
    slots: Vec<Option<usize>>,
}

impl ColumnIndexMap {
    pub fn from_header(header: &StringRecord, feature_count: usize) -> Self {
        let slots = header
            .iter()
            .skip(1)
            .map(|token| {
                token
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|idx| (1..=feature_count).contains(idx))
                    .map(|idx| idx - 1)
            })
            .collect();
        Self { slots }
    }

    /// Destination slot for 0-based data column `data_col`.
    pub fn slot(&self, data_col: usize) -> Result<usize, String> {
        match self.slots.get(data_col) {
            Some(Some(slot)) => Ok(*slot),
            Some(None) => Err(format!(
                "header index for data column {} is missing or out of range",
                data_col + 1
            )),
            None => Err(format!(
                "data column {} has no header index ({} declared)",
                data_col + 1,
                self.slots.len()
            )),
        }
    }
}

fn parse_value(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok()
}

fn parse_ymd_fields(path: &Path, fields: &[&str]) -> Result<NaiveDate, SeriesError> {
    let invalid = || SeriesError::InvalidBaseDate {
        path: path.to_path_buf(),
        value: fields.iter().take(3).copied().collect::<Vec<_>>().join(" "),
    };
    if fields.len() < 3 {
        return Err(invalid());
    }
    let year = fields[0].trim().parse::<i32>().map_err(|_| invalid())?;
    let month = fields[1].trim().parse::<u32>().map_err(|_| invalid())?;
    let day = fields[2].trim().parse::<u32>().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Date labels appear as `YYYY-MM-DD` or `YYYY/MM/DD`, sometimes with a
/// trailing time.
fn parse_label_date(label: &str) -> Option<NaiveDate> {
    let date_part = label.trim().split([' ', 'T']).next()?;
    const FMTS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];
    FMTS.iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Write a series back out in `layout`.
///
/// Date columns are derived from `base_date + i`. A remapped file is written
/// with the identity index header.
pub fn write_series(path: &Path, series: &TimeSeries, layout: SeriesLayout) -> Result<(), SeriesError> {
    let file = File::create(path).map_err(|source| SeriesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(layout.delimiter())
        .flexible(true)
        .from_writer(file);
    let csv_err = |source| SeriesError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let features = series.feature_count();
    match layout {
        SeriesLayout::Dated => {
            let mut header: Vec<String> = ["year", "month", "day", "hour", "minute", "second"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            header.extend((1..=features).map(|k| k.to_string()));
            writer.write_record(&header).map_err(csv_err)?;
        }
        SeriesLayout::Remapped => {
            let mut header = vec!["date".to_string()];
            header.extend((1..=features).map(|k| k.to_string()));
            writer.write_record(&header).map_err(csv_err)?;
        }
        SeriesLayout::Cbh => {}
    }

    for i in 0..series.timestep_count() {
        let date = series.date_of(i).ok_or_else(|| SeriesError::InvalidBaseDate {
            path: path.to_path_buf(),
            value: format!("timestep {i} has no date"),
        })?;
        let mut record = match layout {
            SeriesLayout::Remapped => vec![date.format("%Y-%m-%d").to_string()],
            SeriesLayout::Dated | SeriesLayout::Cbh => vec![
                date.year().to_string(),
                date.month().to_string(),
                date.day().to_string(),
                "0".to_string(),
                "0".to_string(),
                "0".to_string(),
            ],
        };
        record.extend(series.values.row(i).iter().map(|v| v.to_string()));
        writer.write_record(&record).map_err(csv_err)?;
    }

    writer.flush().map_err(|source| SeriesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
