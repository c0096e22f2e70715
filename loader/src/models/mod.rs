//! Domain models for the polygon parts loader.
//!
//! - [`PartRecord`] - one normalized polygon part, ready for storage
//! - [`ProductType`] - closed set of imagery product types
//! - [`Classification`] - closed set of classification levels

use chrono::{DateTime, Utc};
use geo::Polygon;
use serde::{Deserialize, Serialize, Serializer};

use crate::fields::Field;
use crate::geometry;

// =============================================================================
// Product Type
// =============================================================================

/// Imagery product type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProductType {
    Orthophoto,
    OrthophotoHistory,
    OrthophotoBest,
    RasterMap,
    RasterMapBest,
    RasterAid,
    RasterAidBest,
    RasterVector,
    RasterVectorBest,
}

impl ProductType {
    /// Lowercase keys accepted in input files.
    ///
    /// Includes the misspellings found in legacy exports.
    pub const KEYS: [&'static str; 11] = [
        "orthophoto",
        "orthphoto",
        "orthophto",
        "orthophotohistory",
        "orthophotobest",
        "rastermap",
        "rastermapbest",
        "rasteraid",
        "rasteraidbest",
        "rastervector",
        "rastervectorbest",
    ];

    /// Map an input cell to a product type.
    ///
    /// The lookup trims and lowercases the value first.
    pub fn from_key(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "orthophoto" | "orthphoto" | "orthophto" => Some(Self::Orthophoto),
            "orthophotohistory" => Some(Self::OrthophotoHistory),
            "orthophotobest" => Some(Self::OrthophotoBest),
            "rastermap" => Some(Self::RasterMap),
            "rastermapbest" => Some(Self::RasterMapBest),
            "rasteraid" => Some(Self::RasterAid),
            "rasteraidbest" => Some(Self::RasterAidBest),
            "rastervector" => Some(Self::RasterVector),
            "rastervectorbest" => Some(Self::RasterVectorBest),
            _ => None,
        }
    }

    /// Canonical name stored in the part record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orthophoto => "Orthophoto",
            Self::OrthophotoHistory => "OrthophotoHistory",
            Self::OrthophotoBest => "OrthophotoBest",
            Self::RasterMap => "RasterMap",
            Self::RasterMapBest => "RasterMapBest",
            Self::RasterAid => "RasterAid",
            Self::RasterAidBest => "RasterAidBest",
            Self::RasterVector => "RasterVector",
            Self::RasterVectorBest => "RasterVectorBest",
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classification level of the imagery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Classification {
    Unclassified,
    Confidential,
    Secret,
    TopSecret,
}

impl Classification {
    pub const KEYS: [&'static str; 4] = ["unclassified", "confidential", "secret", "topsecret"];

    pub fn from_key(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "unclassified" => Some(Self::Unclassified),
            "confidential" => Some(Self::Confidential),
            "secret" => Some(Self::Secret),
            "topsecret" => Some(Self::TopSecret),
            _ => None,
        }
    }

    /// Numeric level persisted for this classification.
    pub fn level(&self) -> i32 {
        match self {
            Self::Unclassified => 6,
            Self::Confidential => 5,
            Self::Secret => 4,
            Self::TopSecret => 3,
        }
    }
}

/// Accepted keys of a closed-domain field, for error messages.
pub fn accepted_keys(field: Field) -> String {
    match field {
        Field::ProductType => ProductType::KEYS.join(","),
        Field::Classification => Classification::KEYS.join(","),
        _ => String::new(),
    }
}

// =============================================================================
// Part Record
// =============================================================================

/// One polygon part, normalized for storage.
///
/// Built once per (row, polygon) pair and never mutated afterwards.
/// Required attributes are plain values; optional ones are `Option`s that are
/// never `Some("")`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    pub record_id: String,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub product_version: Option<String>,
    #[serde(rename = "sourceDateStartUTC")]
    pub source_date_start: Option<DateTime<Utc>>,
    #[serde(rename = "sourceDateEndUTC")]
    pub source_date_end: DateTime<Utc>,
    pub min_resolution_degree: Option<f64>,
    pub max_resolution_degree: f64,
    pub min_resolution_meter: Option<f64>,
    pub max_resolution_meter: f64,
    #[serde(rename = "minHorizontalAccuracyCE90")]
    pub min_horizontal_accuracy_ce90: Option<f64>,
    #[serde(rename = "maxHorizontalAccuracyCE90")]
    pub max_horizontal_accuracy_ce90: Option<f64>,
    pub sensors: Option<String>,
    pub region: Option<String>,
    #[serde(serialize_with = "serialize_classification")]
    pub classification: Option<Classification>,
    pub description: Option<String>,
    #[serde(serialize_with = "serialize_geom")]
    pub geom: Polygon<f64>,
    pub image_name: Option<String>,
    #[serde(serialize_with = "serialize_product_type")]
    pub product_type: ProductType,
    pub srs_name: String,
}

impl PartRecord {
    /// Rewrite every optional text attribute holding an empty string to `None`.
    pub(crate) fn null_empty_optionals(mut self) -> Self {
        for slot in [
            &mut self.product_id,
            &mut self.product_name,
            &mut self.product_version,
            &mut self.sensors,
            &mut self.region,
            &mut self.description,
            &mut self.image_name,
        ] {
            if slot.as_deref().is_some_and(str::is_empty) {
                *slot = None;
            }
        }
        self
    }
}

fn serialize_geom<S: Serializer>(polygon: &Polygon<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    geometry::to_geojson(polygon).serialize(serializer)
}

fn serialize_product_type<S: Serializer>(value: &ProductType, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_str())
}

fn serialize_classification<S: Serializer>(
    value: &Option<Classification>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(c) => serializer.serialize_some(&c.level()),
        None => serializer.serialize_none(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use geo::polygon;

    fn sample_record() -> PartRecord {
        PartRecord {
            record_id: "A1".into(),
            product_id: Some("".into()),
            product_name: Some("North".into()),
            product_version: None,
            source_date_start: None,
            source_date_end: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            min_resolution_degree: None,
            max_resolution_degree: 0.00001,
            min_resolution_meter: Some(0.5),
            max_resolution_meter: 0.5,
            min_horizontal_accuracy_ce90: None,
            max_horizontal_accuracy_ce90: None,
            sensors: Some("".into()),
            region: None,
            classification: Some(Classification::Secret),
            description: None,
            geom: polygon![(x: 0., y: 0.), (x: 0., y: 1.), (x: 1., y: 1.), (x: 1., y: 0.)],
            image_name: None,
            product_type: ProductType::Orthophoto,
            srs_name: "EPSG:4326".into(),
        }
    }

    #[test]
    fn test_product_type_lookup() {
        assert_eq!(ProductType::from_key("Orthophoto"), Some(ProductType::Orthophoto));
        assert_eq!(ProductType::from_key("ORTHPHOTO"), Some(ProductType::Orthophoto));
        assert_eq!(ProductType::from_key(" rasterVectorBest "), Some(ProductType::RasterVectorBest));
        assert_eq!(ProductType::from_key("satellite"), None);
        for key in ProductType::KEYS {
            assert!(ProductType::from_key(key).is_some(), "{key}");
        }
    }

    #[test]
    fn test_classification_levels() {
        assert_eq!(Classification::from_key("TopSecret").map(|c| c.level()), Some(3));
        assert_eq!(Classification::from_key("unclassified").map(|c| c.level()), Some(6));
        assert_eq!(Classification::from_key("restricted"), None);
    }

    #[test]
    fn test_null_empty_optionals() {
        let record = sample_record().null_empty_optionals();
        assert_eq!(record.product_id, None);
        assert_eq!(record.sensors, None);
        assert_eq!(record.product_name.as_deref(), Some("North"));
        assert_eq!(record.record_id, "A1");
    }

    #[test]
    fn test_record_serialization() {
        let json = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(json["recordId"], "A1");
        assert_eq!(json["productType"], "Orthophoto");
        assert_eq!(json["classification"], 4);
        assert_eq!(json["geom"]["type"], "Polygon");
        assert!(json.get("sourceDateEndUTC").is_some());
        assert!(json["minHorizontalAccuracyCE90"].is_null());
    }
}
