//! Field catalog and header mapping.
//!
//! The first line of every input file names its columns. Column order is not
//! significant: [`map_headers`] resolves each recognized name to its position
//! so later stages can look cells up by [`Field`] instead of by index.
//!
//! # Example
//!
//! ```rust,ignore
//! use parts_loader::fields::{map_headers, Field, HeaderPolicy};
//!
//! let index = map_headers(&["geom", "recordId", /* ... */], HeaderPolicy::Reject)?;
//! assert_eq!(index.position(Field::Geom), Some(0));
//! ```

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::HeaderError;

// =============================================================================
// Field Catalog
// =============================================================================

/// A recognized input column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    RecordId,
    ProductType,
    SrsName,
    MaxResolutionMeter,
    MaxResolutionDegree,
    SourceDateEndUtc,
    Geom,
    MinHorizontalAccuracyCe90,
    MaxHorizontalAccuracyCe90,
    Description,
    ImageName,
    MinResolutionMeter,
    MinResolutionDegree,
    SourceDateStartUtc,
    Region,
    ProductVersion,
    ProductId,
    Classification,
    Sensors,
    ProductName,
}

impl Field {
    /// Number of catalog members.
    pub const COUNT: usize = 20;

    /// Fields every row must carry.
    pub const REQUIRED: [Field; 7] = [
        Field::RecordId,
        Field::ProductType,
        Field::SrsName,
        Field::MaxResolutionMeter,
        Field::MaxResolutionDegree,
        Field::SourceDateEndUtc,
        Field::Geom,
    ];

    /// Fields that may be absent from the header or empty in a row.
    pub const OPTIONAL: [Field; 13] = [
        Field::MinHorizontalAccuracyCe90,
        Field::MaxHorizontalAccuracyCe90,
        Field::Description,
        Field::ImageName,
        Field::MinResolutionMeter,
        Field::MinResolutionDegree,
        Field::SourceDateStartUtc,
        Field::Region,
        Field::ProductVersion,
        Field::ProductId,
        Field::Classification,
        Field::Sensors,
        Field::ProductName,
    ];

    /// Column name as it appears in the header line.
    pub fn name(self) -> &'static str {
        match self {
            Field::RecordId => "recordId",
            Field::ProductType => "productType",
            Field::SrsName => "srsName",
            Field::MaxResolutionMeter => "maxResolutionMeter",
            Field::MaxResolutionDegree => "maxResolutionDegree",
            Field::SourceDateEndUtc => "sourceDateEndUTC",
            Field::Geom => "geom",
            Field::MinHorizontalAccuracyCe90 => "minHorizontalAccuracyCE90",
            Field::MaxHorizontalAccuracyCe90 => "maxHorizontalAccuracyCE90",
            Field::Description => "description",
            Field::ImageName => "imageName",
            Field::MinResolutionMeter => "minResolutionMeter",
            Field::MinResolutionDegree => "minResolutionDegree",
            Field::SourceDateStartUtc => "sourceDateStartUTC",
            Field::Region => "region",
            Field::ProductVersion => "productVersion",
            Field::ProductId => "productId",
            Field::Classification => "classification",
            Field::Sensors => "sensors",
            Field::ProductName => "productName",
        }
    }

    /// Look up a catalog member by its header name.
    pub fn from_name(name: &str) -> Option<Self> {
        FIELDS_BY_NAME.get(name.trim()).copied()
    }

    pub fn is_required(self) -> bool {
        Self::REQUIRED.contains(&self)
    }

    /// Iterate over every catalog member, required fields first.
    pub fn all() -> impl Iterator<Item = Field> {
        Self::REQUIRED.into_iter().chain(Self::OPTIONAL)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static FIELDS_BY_NAME: Lazy<HashMap<&'static str, Field>> =
    Lazy::new(|| Field::all().map(|field| (field.name(), field)).collect());

// =============================================================================
// Header Index
// =============================================================================

/// What to do with a header that is not in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderPolicy {
    /// Fail the run on the first unrecognized header.
    #[default]
    Reject,
    /// Skip unrecognized headers.
    Ignore,
}

/// Column positions of the catalog fields in the current file.
///
/// Built once per file by [`map_headers`]; every required field is
/// guaranteed to have a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderIndex {
    positions: [Option<usize>; Field::COUNT],
}

impl HeaderIndex {
    /// Zero-based column of `field`, if the file has it.
    pub fn position(&self, field: Field) -> Option<usize> {
        self.positions[field.slot()]
    }

    /// Cell of `field` in `row`.
    ///
    /// `None` when the column is absent from the header or the row is
    /// shorter than the header.
    pub fn cell<'r, R>(&self, row: &'r R, field: Field) -> Option<&'r str>
    where
        R: RowCells + ?Sized,
    {
        self.position(field).and_then(|i| row.cell_at(i))
    }

    /// Cell of `field`, treating an empty cell like an absent one.
    pub fn value<'r, R>(&self, row: &'r R, field: Field) -> Option<&'r str>
    where
        R: RowCells + ?Sized,
    {
        self.cell(row, field).filter(|v| !v.is_empty())
    }
}

/// Positional access to the cells of one raw row.
pub trait RowCells {
    fn cell_at(&self, index: usize) -> Option<&str>;
}

impl RowCells for csv::StringRecord {
    fn cell_at(&self, index: usize) -> Option<&str> {
        self.get(index)
    }
}

impl RowCells for [String] {
    fn cell_at(&self, index: usize) -> Option<&str> {
        self.get(index).map(String::as_str)
    }
}

impl RowCells for Vec<String> {
    fn cell_at(&self, index: usize) -> Option<&str> {
        self.as_slice().cell_at(index)
    }
}

impl<'a> RowCells for [&'a str] {
    fn cell_at(&self, index: usize) -> Option<&str> {
        self.get(index).copied()
    }
}

/// Resolve header cells to a [`HeaderIndex`].
///
/// Duplicate headers keep the last position. Blank header cells are skipped
/// under both policies.
pub fn map_headers<S: AsRef<str>>(
    headers: &[S],
    policy: HeaderPolicy,
) -> Result<HeaderIndex, HeaderError> {
    if headers.iter().all(|h| h.as_ref().trim().is_empty()) {
        return Err(HeaderError::Empty);
    }

    let mut positions = [None; Field::COUNT];

    for (i, header) in headers.iter().enumerate() {
        let name = header.as_ref().trim();
        if name.is_empty() {
            continue;
        }
        match Field::from_name(name) {
            Some(field) => positions[field.slot()] = Some(i),
            None => match policy {
                HeaderPolicy::Reject => {
                    return Err(HeaderError::Unsupported {
                        header: name.to_string(),
                    })
                }
                HeaderPolicy::Ignore => {
                    tracing::debug!(header = name, column = i, "ignoring unsupported header");
                }
            },
        }
    }

    let missing: Vec<Field> = Field::REQUIRED
        .into_iter()
        .filter(|f| positions[f.slot()].is_none())
        .collect();

    if !missing.is_empty() {
        return Err(HeaderError::Missing { fields: missing });
    }

    Ok(HeaderIndex { positions })
}
