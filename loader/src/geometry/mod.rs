//! Geometry decomposition.
//!
//! Turns the text of a `geom` cell into the simple polygons that become part
//! records. A multipolygon is split into its member polygons; members that
//! overlap each other are unioned first, so the stored parts never overlap.
//!
//! ```text
//! MULTIPOLYGON(A, B, C)   A ∩ B ≠ ∅, C disjoint
//!        │
//!        ▼  split
//!   [A, B, C]
//!        │
//!        ▼  merge overlapping
//!   [A ∪ B, C]
//! ```

use std::collections::BTreeSet;

use geo::{BooleanOps, Geometry, Intersects, MultiPolygon, Polygon};
use wkt::{ToWkt, TryFromWkt};

use crate::error::GeometryError;

/// Geometry tags accepted in the `geom` column.
pub const SUPPORTED_TAGS: [&str; 2] = ["MULTIPOLYGON", "POLYGON"];

/// Leading token of a geometry cell, up to the first space or `(`.
pub fn leading_tag(text: &str) -> &str {
    let text = text.trim_start();
    let end = text.find([' ', '(']).unwrap_or(text.len());
    &text[..end]
}

/// Whether the cell starts with a supported geometry tag.
pub fn is_supported_tag(text: &str) -> bool {
    let tag = leading_tag(text);
    SUPPORTED_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

/// Decompose one geometry cell into simple polygons.
///
/// # Arguments
/// * `text` - WKT of a polygon or multipolygon
/// * `row` - 1-based data row, for error context
///
/// # Returns
/// One polygon for a `POLYGON`; for a `MULTIPOLYGON`, its members with
/// overlapping members merged (see [`merge_overlapping_parts`]). Empty
/// geometries are rejected, so the result is never empty.
pub fn decompose(text: &str, row: usize) -> Result<Vec<Polygon<f64>>, GeometryError> {
    let geometry = parse_wkt(text, row)?;
    let kind = kind_name(&geometry);
    let polygons = split_parts(geometry, row)?;

    if polygons.is_empty() || polygons.iter().any(|p| p.exterior().0.is_empty()) {
        return Err(GeometryError::Empty {
            row,
            kind: kind.to_string(),
        });
    }
    Ok(merge_overlapping_parts(polygons))
}

/// Parse WKT into a geometry.
pub fn parse_wkt(text: &str, row: usize) -> Result<Geometry<f64>, GeometryError> {
    Geometry::<f64>::try_from_wkt_str(text.trim()).map_err(|e| GeometryError::Parse {
        row,
        message: e.to_string(),
    })
}

/// Split a polygon or multipolygon into its member polygons, without merging.
pub fn split_parts(geometry: Geometry<f64>, row: usize) -> Result<Vec<Polygon<f64>>, GeometryError> {
    match geometry {
        Geometry::Polygon(polygon) => Ok(vec![polygon]),
        Geometry::MultiPolygon(multi) => Ok(multi.0),
        other => Err(GeometryError::Unsupported {
            row,
            kind: kind_name(&other).to_string(),
        }),
    }
}

/// Union every polygon that intersects at least one other.
///
/// Every unordered pair is tested. Polygons taking part in any intersecting
/// pair are unioned together, in index order, and the union is flattened
/// back into polygons. Those come first, followed by the untouched polygons
/// in their original order.
pub fn merge_overlapping_parts(polygons: Vec<Polygon<f64>>) -> Vec<Polygon<f64>> {
    let mut overlapping = BTreeSet::new();

    for i in 0..polygons.len() {
        for j in (i + 1)..polygons.len() {
            if polygons[i].intersects(&polygons[j]) {
                overlapping.insert(i);
                overlapping.insert(j);
            }
        }
    }

    if overlapping.is_empty() {
        return polygons;
    }

    let mut merged: Option<MultiPolygon<f64>> = None;
    for &i in &overlapping {
        let part = MultiPolygon::new(vec![polygons[i].clone()]);
        merged = Some(match merged {
            Some(acc) => acc.union(&part),
            None => part,
        });
    }

    let mut parts = merged.map(|m| m.0).unwrap_or_default();
    parts.extend(
        polygons
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !overlapping.contains(i))
            .map(|(_, p)| p),
    );

    tracing::debug!(
        overlapping = overlapping.len(),
        parts = parts.len(),
        "merged overlapping multipolygon parts"
    );

    parts
}

/// Serialize a polygon as WKT.
pub fn to_wkt(polygon: &Polygon<f64>) -> String {
    polygon.wkt_string()
}

/// Convert a polygon to a GeoJSON geometry.
pub fn to_geojson(polygon: &Polygon<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(polygon))
}

fn kind_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::Line(_) => "LINE",
        Geometry::LineString(_) => "LINESTRING",
        Geometry::Polygon(_) => "POLYGON",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::MultiPolygon(_) => "MULTIPOLYGON",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        Geometry::Rect(_) => "RECT",
        Geometry::Triangle(_) => "TRIANGLE",
    }
}
