//! Row validation.
//!
//! [`validate_row`] checks one data row against the header index before any
//! geometry work is done:
//!
//! 1. every required field has a non-empty cell
//! 2. closed-domain fields (`productType`, `classification`) hold a known key
//! 3. numeric and date fields parse
//! 4. the geometry cell starts with `POLYGON` or `MULTIPOLYGON`
//!
//! The check is pure: validating the same row twice gives the same verdict.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::ContentError;
use crate::fields::{Field, HeaderIndex, RowCells};
use crate::geometry;
use crate::models::{accepted_keys, Classification, ProductType};

/// Fields parsed as floating point.
pub const NUMERIC_FIELDS: [Field; 6] = [
    Field::MaxResolutionMeter,
    Field::MaxResolutionDegree,
    Field::MinResolutionMeter,
    Field::MinResolutionDegree,
    Field::MinHorizontalAccuracyCe90,
    Field::MaxHorizontalAccuracyCe90,
];

/// Fields parsed as UTC dates.
pub const DATE_FIELDS: [Field; 2] = [Field::SourceDateEndUtc, Field::SourceDateStartUtc];

/// Check one row.
///
/// # Arguments
/// * `row` - the raw cells
/// * `index` - header positions of the current file
/// * `row_number` - 1-based data row number
pub fn validate_row<R>(row: &R, index: &HeaderIndex, row_number: usize) -> Result<(), ContentError>
where
    R: RowCells + ?Sized,
{
    for field in Field::REQUIRED {
        if index.value(row, field).is_none() {
            return Err(ContentError::MissingField {
                field,
                row: row_number,
            });
        }
    }

    if let Some(value) = index.value(row, Field::ProductType) {
        if ProductType::from_key(value).is_none() {
            return Err(domain_error(Field::ProductType, row_number, value));
        }
    }

    if let Some(value) = index.value(row, Field::Classification) {
        if Classification::from_key(value).is_none() {
            return Err(domain_error(Field::Classification, row_number, value));
        }
    }

    for field in NUMERIC_FIELDS {
        if let Some(value) = index.value(row, field) {
            parse_number(field, value, row_number)?;
        }
    }

    for field in DATE_FIELDS {
        if let Some(value) = index.value(row, field) {
            parse_date(field, value, row_number)?;
        }
    }

    if let Some(geom) = index.value(row, Field::Geom) {
        if !geometry::is_supported_tag(geom) {
            return Err(ContentError::UnsupportedGeometryType {
                row: row_number,
                found: geometry::leading_tag(geom).to_string(),
            });
        }
    }

    Ok(())
}

/// Parse a numeric cell.
pub fn parse_number(field: Field, value: &str, row: usize) -> Result<f64, ContentError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ContentError::InvalidNumber {
            field,
            row,
            value: value.to_string(),
        })
}

/// Parse a date cell as UTC.
pub fn parse_date(field: Field, value: &str, row: usize) -> Result<DateTime<Utc>, ContentError> {
    parse_utc(value).ok_or_else(|| ContentError::InvalidDate {
        field,
        row,
        value: value.to_string(),
    })
}

/// Parse a date string as UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` and
/// `YYYY-MM-DD HH:MM:SS`, with `/` allowed in place of `-`.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    let normalized = value.trim().replace('/', "-");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn domain_error(field: Field, row: usize, value: &str) -> ContentError {
    ContentError::InvalidDomain {
        field,
        row,
        value: value.to_string(),
        accepted: accepted_keys(field),
    }
}
