//! Footprint files.
//!
//! A footprint file lists the parts of one catalog layer, one polygon per
//! row:
//!
//! ```text
//! Source,SourceName,SensorType,Resolution,Ep90,Countries,Cities,Dsc,UpdateDate,WKT
//! S1,North strip,"WV02, GE01",0.5,3.2,IL,Haifa,,2023-04-01,"POLYGON((...))"
//! ```
//!
//! `ResolutionDegree` and `ResolutionMeter` columns are read when present.
//! The first rejected row fails the whole file, so nothing is submitted.

use std::collections::HashMap;
use std::path::Path;

use crate::clients::PolygonPart;
use crate::error::{LoadError, PublishError};
use crate::geometry;
use crate::parser::{CsvInput, Delimiter, RawRow};
use crate::validation::parse_utc;

pub const SOURCE: &str = "Source";
pub const SOURCE_NAME: &str = "SourceName";
pub const SENSOR_TYPE: &str = "SensorType";
pub const RESOLUTION: &str = "Resolution";
pub const RESOLUTION_DEGREE: &str = "ResolutionDegree";
pub const RESOLUTION_METER: &str = "ResolutionMeter";
pub const EP90: &str = "Ep90";
pub const COUNTRIES: &str = "Countries";
pub const CITIES: &str = "Cities";
pub const DESCRIPTION: &str = "Dsc";
pub const UPDATE_DATE: &str = "UpdateDate";
pub const WKT: &str = "WKT";

const REQUIRED_COLUMNS: [&str; 6] = [SOURCE, SENSOR_TYPE, RESOLUTION, COUNTRIES, UPDATE_DATE, WKT];

const KNOWN_COLUMNS: [&str; 12] = [
    SOURCE,
    SOURCE_NAME,
    SENSOR_TYPE,
    RESOLUTION,
    RESOLUTION_DEGREE,
    RESOLUTION_METER,
    EP90,
    COUNTRIES,
    CITIES,
    DESCRIPTION,
    UPDATE_DATE,
    WKT,
];

/// Positions of the known columns in one file.
struct Columns {
    positions: HashMap<&'static str, usize>,
}

impl Columns {
    fn map(headers: &[String]) -> Result<Self, PublishError> {
        let positions: HashMap<&'static str, usize> = KNOWN_COLUMNS
            .iter()
            .filter_map(|&name| headers.iter().position(|h| h.trim() == name).map(|i| (name, i)))
            .collect();

        if let Some(missing) = REQUIRED_COLUMNS.iter().find(|c| !positions.contains_key(*c)) {
            return Err(LoadError::Csv {
                line: 1,
                message: format!("missing header {}", missing),
            }
            .into());
        }
        Ok(Self { positions })
    }

    /// Non-empty cell of `column`.
    fn value<'r>(&self, row: &'r RawRow, column: &str) -> Option<&'r str> {
        self.positions
            .get(column)
            .and_then(|&i| row.cells.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Read every row of a footprint file into polygon parts.
pub fn read_footprint_parts<P: AsRef<Path>>(path: P, delimiter: Delimiter) -> Result<Vec<PolygonPart>, PublishError> {
    read_parts(CsvInput::open(path, delimiter)?)
}

fn read_parts(mut input: CsvInput) -> Result<Vec<PolygonPart>, PublishError> {
    let columns = Columns::map(input.headers())?;

    let mut parts = Vec::new();
    while let Some(row) = input.next_row()? {
        let part = footprint_part(&row, &columns).map_err(|message| PublishError::Row {
            row: row.number,
            message,
        })?;
        parts.push(part);
    }
    Ok(parts)
}

fn footprint_part(row: &RawRow, columns: &Columns) -> Result<PolygonPart, String> {
    let update_date = columns.value(row, UPDATE_DATE).unwrap_or_default();
    let imaging_time = parse_utc(update_date)
        .ok_or_else(|| format!("Invalid UpdateDate. Must be a valid date. : {}", update_date))?;

    let wkt = columns
        .value(row, WKT)
        .filter(|w| geometry::leading_tag(w).eq_ignore_ascii_case("POLYGON"))
        .ok_or("Invalid WKT format. Expected a POLYGON.")?;

    let resolution = columns
        .value(row, RESOLUTION)
        .and_then(number)
        .ok_or("Invalid Resolution. Must be a number.")?;

    let countries = columns
        .value(row, COUNTRIES)
        .map(split_list)
        .ok_or("Countries field is required.")?;

    let sensors = columns
        .value(row, SENSOR_TYPE)
        .map(split_list)
        .ok_or("SensorType field is required.")?;

    let polygons = geometry::decompose(wkt, row.number).map_err(|e| e.to_string())?;
    let footprint = polygons
        .first()
        .map(geometry::to_geojson)
        .ok_or("Invalid WKT format. Expected a POLYGON.")?;

    let source_id = columns.value(row, SOURCE).unwrap_or_default().to_string();
    let source_name = columns
        .value(row, SOURCE_NAME)
        .map(str::to_string)
        .unwrap_or_else(|| source_id.clone());

    Ok(PolygonPart {
        source_id,
        source_name,
        resolution_degree: optional_number(row, columns, RESOLUTION_DEGREE)?,
        resolution_meter: optional_number(row, columns, RESOLUTION_METER)?,
        source_resolution_meter: Some(resolution),
        horizontal_accuracy_ce90: optional_number(row, columns, EP90)?,
        sensors,
        imaging_time_begin: Some(imaging_time),
        imaging_time_end: Some(imaging_time),
        footprint,
        description: columns.value(row, DESCRIPTION).map(str::to_string),
        countries,
        cities: columns.value(row, CITIES).map(split_list).unwrap_or_default(),
    })
}

fn number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn optional_number(row: &RawRow, columns: &Columns, column: &str) -> Result<Option<f64>, String> {
    match columns.value(row, column) {
        None => Ok(None),
        Some(value) => number(value)
            .map(Some)
            .ok_or_else(|| format!("Invalid {}. Must be a number.", column)),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
