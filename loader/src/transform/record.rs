//! Record transformer.
//!
//! Builds [`PartRecord`]s from a raw row. The row's attributes are parsed
//! once into [`RowAttributes`]; each polygon produced by the geometry
//! decomposer is then paired with a copy of them.

use chrono::{DateTime, Utc};
use geo::Polygon;

use crate::error::ContentError;
use crate::fields::{Field, HeaderIndex, RowCells};
use crate::models::{accepted_keys, Classification, PartRecord, ProductType};
use crate::validation::{parse_date, parse_number};

/// Typed attributes of one row, everything but the geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct RowAttributes {
    pub record_id: String,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub product_version: Option<String>,
    pub source_date_start: Option<DateTime<Utc>>,
    pub source_date_end: DateTime<Utc>,
    pub min_resolution_degree: Option<f64>,
    pub max_resolution_degree: f64,
    pub min_resolution_meter: Option<f64>,
    pub max_resolution_meter: f64,
    pub min_horizontal_accuracy_ce90: Option<f64>,
    pub max_horizontal_accuracy_ce90: Option<f64>,
    pub sensors: Option<String>,
    pub region: Option<String>,
    pub classification: Option<Classification>,
    pub description: Option<String>,
    pub image_name: Option<String>,
    pub product_type: ProductType,
    pub srs_name: String,
}

impl RowAttributes {
    /// Parse the attributes of `row`.
    ///
    /// Optional fields missing from the header read as `None`. When
    /// `fill_missing_bounds` is set, an unsupplied lower bound takes the value
    /// of its upper bound (and the CE90 upper bound takes the lower one).
    pub fn from_row<R>(
        row: &R,
        index: &HeaderIndex,
        row_number: usize,
        fill_missing_bounds: bool,
    ) -> Result<Self, ContentError>
    where
        R: RowCells + ?Sized,
    {
        let cells = Cells {
            row,
            index,
            row_number,
        };

        let product_type = {
            let value = cells.required(Field::ProductType)?;
            ProductType::from_key(value).ok_or_else(|| ContentError::InvalidDomain {
                field: Field::ProductType,
                row: row_number,
                value: value.to_string(),
                accepted: accepted_keys(Field::ProductType),
            })?
        };

        let classification = cells.value(Field::Classification).and_then(|value| {
            let level = Classification::from_key(value);
            if level.is_none() {
                tracing::warn!(
                    row = row_number,
                    value = %value,
                    "unknown classification, storing null"
                );
            }
            level
        });

        let max_resolution_degree = cells.required_number(Field::MaxResolutionDegree)?;
        let max_resolution_meter = cells.required_number(Field::MaxResolutionMeter)?;
        let source_date_end = parse_date(
            Field::SourceDateEndUtc,
            cells.required(Field::SourceDateEndUtc)?,
            row_number,
        )?;

        let mut attributes = Self {
            record_id: cells.required(Field::RecordId)?.to_string(),
            product_id: cells.text(Field::ProductId),
            product_name: cells.text(Field::ProductName),
            product_version: cells.text(Field::ProductVersion),
            source_date_start: cells.date(Field::SourceDateStartUtc)?,
            source_date_end,
            min_resolution_degree: cells.number(Field::MinResolutionDegree)?,
            max_resolution_degree,
            min_resolution_meter: cells.number(Field::MinResolutionMeter)?,
            max_resolution_meter,
            min_horizontal_accuracy_ce90: cells.number(Field::MinHorizontalAccuracyCe90)?,
            max_horizontal_accuracy_ce90: cells.number(Field::MaxHorizontalAccuracyCe90)?,
            sensors: cells.text(Field::Sensors),
            region: cells.text(Field::Region),
            classification,
            description: cells.text(Field::Description),
            image_name: cells.text(Field::ImageName),
            product_type,
            srs_name: cells.required(Field::SrsName)?.to_string(),
        };

        if fill_missing_bounds {
            attributes.fill_missing_bounds();
        }

        Ok(attributes)
    }

    fn fill_missing_bounds(&mut self) {
        self.min_resolution_degree.get_or_insert(self.max_resolution_degree);
        self.min_resolution_meter.get_or_insert(self.max_resolution_meter);
        self.source_date_start.get_or_insert(self.source_date_end);
        if self.max_horizontal_accuracy_ce90.is_none() {
            self.max_horizontal_accuracy_ce90 = self.min_horizontal_accuracy_ce90;
        }
    }

    /// Pair these attributes with one polygon.
    pub fn to_record(&self, geom: Polygon<f64>) -> PartRecord {
        PartRecord {
            record_id: self.record_id.clone(),
            product_id: self.product_id.clone(),
            product_name: self.product_name.clone(),
            product_version: self.product_version.clone(),
            source_date_start: self.source_date_start,
            source_date_end: self.source_date_end,
            min_resolution_degree: self.min_resolution_degree,
            max_resolution_degree: self.max_resolution_degree,
            min_resolution_meter: self.min_resolution_meter,
            max_resolution_meter: self.max_resolution_meter,
            min_horizontal_accuracy_ce90: self.min_horizontal_accuracy_ce90,
            max_horizontal_accuracy_ce90: self.max_horizontal_accuracy_ce90,
            sensors: self.sensors.clone(),
            region: self.region.clone(),
            classification: self.classification,
            description: self.description.clone(),
            geom,
            image_name: self.image_name.clone(),
            product_type: self.product_type,
            srs_name: self.srs_name.clone(),
        }
        .null_empty_optionals()
    }
}

/// Build one record for one polygon of a row.
pub fn build_record<R>(
    row: &R,
    index: &HeaderIndex,
    row_number: usize,
    geom: Polygon<f64>,
    fill_missing_bounds: bool,
) -> Result<PartRecord, ContentError>
where
    R: RowCells + ?Sized,
{
    RowAttributes::from_row(row, index, row_number, fill_missing_bounds).map(|a| a.to_record(geom))
}

struct Cells<'a, R: ?Sized> {
    row: &'a R,
    index: &'a HeaderIndex,
    row_number: usize,
}

impl<'a, R: RowCells + ?Sized> Cells<'a, R> {
    fn value(&self, field: Field) -> Option<&'a str> {
        self.index.value(self.row, field)
    }

    fn required(&self, field: Field) -> Result<&'a str, ContentError> {
        self.value(field)
            .ok_or(ContentError::MissingField {
                field,
                row: self.row_number,
            })
    }

    // The raw cell is kept, so an empty cell becomes Some("") here and is
    // nulled by `null_empty_optionals` once the record is assembled.
    fn text(&self, field: Field) -> Option<String> {
        self.index.cell(self.row, field).map(str::to_string)
    }

    fn required_number(&self, field: Field) -> Result<f64, ContentError> {
        parse_number(field, self.required(field)?, self.row_number)
    }

    fn number(&self, field: Field) -> Result<Option<f64>, ContentError> {
        self.value(field)
            .map(|v| parse_number(field, v, self.row_number))
            .transpose()
    }

    fn date(&self, field: Field) -> Result<Option<DateTime<Utc>>, ContentError> {
        self.value(field)
            .map(|v| parse_date(field, v, self.row_number))
            .transpose()
    }
}
