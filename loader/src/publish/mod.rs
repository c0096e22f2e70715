//! Catalog-driven publishing.
//!
//! Reads a list of catalog ids and, for every layer not yet published,
//! submits its footprint as polygon parts and registers the feature type:
//!
//! ```text
//! catalogId ─▶ catalog lookup ─▶ published? ── yes ─▶ skip
//!                                    │
//!                                    no
//!                                    ▼
//!                      submit parts ─▶ register feature type
//! ```
//!
//! A failing layer is logged and counted; the others still run.
//!
//! A single layer can also be published from a footprint file that lists
//! its parts row by row (see [`footprints`]).

pub mod footprints;

use serde::Serialize;
use std::path::Path;

use crate::clients::{
    CatalogClient, GeoserverClient, LayerMetadata, PolygonPart, PolygonPartsClient, PolygonPartsPayload,
};
use crate::config::ClientUrls;
use crate::error::{ConfigResult, LoadError, LoadResult, PublishError};
use crate::parser::{CsvInput, Delimiter};
use crate::report::logs::{log_error, log_info, log_info_indent, log_success};

/// Header of the id column.
pub const CATALOG_ID_HEADER: &str = "catalogId";

/// Per-layer counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// What happened to one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerOutcome {
    Published,
    AlreadyPublished,
}

/// `<productId>-<productType>`
pub fn layer_name(metadata: &LayerMetadata) -> String {
    format!("{}-{}", metadata.product_id, metadata.product_type)
}

/// `<productid>_<producttype>`, the table backing the layer.
pub fn native_name(metadata: &LayerMetadata) -> String {
    format!(
        "{}_{}",
        metadata.product_id.to_lowercase(),
        metadata.product_type.to_lowercase()
    )
}

/// Build the ingestion payload of a layer.
///
/// A polygon footprint gives one part; a multipolygon footprint gives one
/// part per member polygon, unmerged.
pub fn build_payload(catalog_id: &str, metadata: &LayerMetadata) -> Result<PolygonPartsPayload, PublishError> {
    let footprint = metadata
        .footprint
        .as_ref()
        .ok_or_else(|| PublishError::MissingFootprint {
            catalog_id: catalog_id.to_string(),
        })?;

    let polygons = match &footprint.value {
        geojson::Value::Polygon(_) => vec![footprint.clone()],
        geojson::Value::MultiPolygon(polygons) => polygons
            .iter()
            .map(|rings| geojson::Geometry::new(geojson::Value::Polygon(rings.clone())))
            .collect(),
        other => {
            return Err(PublishError::UnsupportedFootprint {
                catalog_id: catalog_id.to_string(),
                kind: geojson_kind(other).to_string(),
            })
        }
    };

    let parts_data = polygons
        .into_iter()
        .map(|footprint| PolygonPart {
            source_id: metadata.product_id.clone(),
            source_name: metadata.product_id.clone(),
            resolution_degree: metadata.max_resolution_deg,
            resolution_meter: metadata.max_resolution_meter,
            source_resolution_meter: metadata.max_resolution_meter,
            horizontal_accuracy_ce90: metadata.max_horizontal_accuracy_ce90,
            sensors: metadata.sensors.clone(),
            imaging_time_begin: metadata.imaging_time_begin,
            imaging_time_end: metadata.imaging_time_end,
            footprint,
            description: metadata.description.clone(),
            countries: metadata.region.clone(),
            cities: Vec::new(),
        })
        .collect();

    Ok(layer_payload(catalog_id, metadata, parts_data))
}

/// Ingestion payload of a layer with the given parts.
pub fn layer_payload(catalog_id: &str, metadata: &LayerMetadata, parts_data: Vec<PolygonPart>) -> PolygonPartsPayload {
    PolygonPartsPayload {
        catalog_id: catalog_id.to_string(),
        product_id: metadata.product_id.clone(),
        product_type: metadata.product_type.clone(),
        product_version: metadata.product_version.clone(),
        parts_data,
    }
}

fn geojson_kind(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Read the `catalogId` column of a file.
pub fn read_catalog_ids<P: AsRef<Path>>(path: P, delimiter: Delimiter) -> LoadResult<Vec<String>> {
    let mut input = CsvInput::open(path, delimiter)?;
    let column = input
        .headers()
        .iter()
        .position(|h| h.trim() == CATALOG_ID_HEADER)
        .ok_or_else(|| LoadError::Csv {
            line: 1,
            message: format!("missing header {}", CATALOG_ID_HEADER),
        })?;

    let mut ids = Vec::new();
    while let Some(row) = input.next_row()? {
        if let Some(id) = row.cells.get(column).filter(|id| !id.is_empty()) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

// =============================================================================
// Publisher
// =============================================================================

pub struct Publisher {
    catalog: CatalogClient,
    geoserver: GeoserverClient,
    parts: PolygonPartsClient,
}

impl Publisher {
    pub fn new(catalog: CatalogClient, geoserver: GeoserverClient, parts: PolygonPartsClient) -> Self {
        Self {
            catalog,
            geoserver,
            parts,
        }
    }

    /// Build from the configured service URLs; all three are required.
    pub fn from_config(urls: &ClientUrls) -> ConfigResult<Self> {
        Ok(Self::new(
            CatalogClient::new(ClientUrls::require(&urls.raster_catalog, "RASTER_CATALOG_URL")?),
            GeoserverClient::new(ClientUrls::require(&urls.geoserver_api, "GEOSERVER_API_URL")?),
            PolygonPartsClient::new(ClientUrls::require(
                &urls.polygon_parts_manager,
                "POLYGON_PARTS_MANAGER_URL",
            )?),
        ))
    }

    /// Publish every layer listed in a file.
    pub async fn publish_file<P: AsRef<Path>>(&self, path: P, delimiter: Delimiter) -> LoadResult<PublishSummary> {
        let ids = read_catalog_ids(path, delimiter)?;
        log_info(format!("Publishing {} layers", ids.len()));
        Ok(self.publish_all(&ids).await)
    }

    /// Publish layers in order; failures are counted, not returned.
    pub async fn publish_all(&self, ids: &[String]) -> PublishSummary {
        let mut summary = PublishSummary::default();

        for id in ids {
            match self.publish_layer(id).await {
                Ok(LayerOutcome::Published) => summary.published += 1,
                Ok(LayerOutcome::AlreadyPublished) => summary.skipped += 1,
                Err(e) => {
                    log_error(format!("An error occurred while processing layer with id: {}: {}", id, e));
                    summary.failed += 1;
                }
            }
        }

        log_info("Finished iterating on all layers");
        summary
    }

    /// Publish one layer from its catalog footprint.
    pub async fn publish_layer(&self, catalog_id: &str) -> Result<LayerOutcome, PublishError> {
        self.publish_with(catalog_id, |metadata| build_payload(catalog_id, metadata))
            .await
    }

    /// Publish one layer from a footprint file listing its parts.
    ///
    /// The file is read only when the layer is not published yet; any
    /// rejected row fails the layer before anything is submitted.
    pub async fn publish_parts_file<P: AsRef<Path>>(
        &self,
        catalog_id: &str,
        path: P,
        delimiter: Delimiter,
    ) -> Result<LayerOutcome, PublishError> {
        let path = path.as_ref();
        self.publish_with(catalog_id, |metadata| {
            let parts = footprints::read_footprint_parts(path, delimiter)?;
            Ok(layer_payload(catalog_id, metadata, parts))
        })
        .await
    }

    async fn publish_with<F>(&self, catalog_id: &str, payload: F) -> Result<LayerOutcome, PublishError>
    where
        F: FnOnce(&LayerMetadata) -> Result<PolygonPartsPayload, PublishError>,
    {
        let layer = self.catalog.find_layer(catalog_id).await?;
        let name = layer_name(&layer.metadata);

        if self.geoserver.feature_type_exists(&name).await? {
            log_info_indent(format!("Layer with id: {} is already published as {}", catalog_id, name), 1);
            return Ok(LayerOutcome::AlreadyPublished);
        }

        log_info(format!("Starting insert and publish of layer {} ({})", name, catalog_id));
        let payload = payload(&layer.metadata)?;
        self.parts.submit(&payload).await?;
        self.geoserver
            .register_feature_type(&name, &native_name(&layer.metadata))
            .await?;
        log_success(format!("Published layer {} with {} parts", name, payload.parts_data.len()));

        Ok(LayerOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::stub;
    use axum::{
        extract::Path as UrlPath,
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn metadata(footprint: Value) -> LayerMetadata {
        serde_json::from_value(json!({
            "productId": "BLUE_MARBLE",
            "productType": "Orthophoto",
            "productVersion": "2.0",
            "maxResolutionDeg": 0.0001,
            "maxResolutionMeter": 0.3,
            "sensors": ["WV02", "GE01"],
            "region": ["IL"],
            "footprint": footprint
        }))
        .unwrap()
    }

    fn square(x: f64) -> Value {
        json!([[[x, 0.0], [x, 1.0], [x + 1.0, 1.0], [x + 1.0, 0.0], [x, 0.0]]])
    }

    #[test]
    fn test_names() {
        let meta = metadata(json!({"type": "Polygon", "coordinates": square(0.0)}));
        assert_eq!(layer_name(&meta), "BLUE_MARBLE-Orthophoto");
        assert_eq!(native_name(&meta), "blue_marble_orthophoto");
    }

    #[test]
    fn test_polygon_footprint_gives_one_part() {
        let meta = metadata(json!({"type": "Polygon", "coordinates": square(0.0)}));
        let payload = build_payload("c-1", &meta).unwrap();

        assert_eq!(payload.catalog_id, "c-1");
        assert_eq!(payload.parts_data.len(), 1);
        let part = &payload.parts_data[0];
        assert_eq!(part.source_id, "BLUE_MARBLE");
        assert_eq!(part.resolution_meter, Some(0.3));
        assert_eq!(part.source_resolution_meter, Some(0.3));
        assert_eq!(part.countries, vec!["IL"]);
    }

    #[test]
    fn test_multipolygon_footprint_gives_part_per_polygon() {
        // Overlapping members are not merged here.
        let meta = metadata(json!({
            "type": "MultiPolygon",
            "coordinates": [square(0.0), square(0.5), square(10.0)]
        }));
        let payload = build_payload("c-1", &meta).unwrap();

        assert_eq!(payload.parts_data.len(), 3);
        assert!(payload
            .parts_data
            .iter()
            .all(|p| matches!(p.footprint.value, geojson::Value::Polygon(_))));
    }

    #[test]
    fn test_unsupported_footprint() {
        let meta = metadata(json!({"type": "Point", "coordinates": [1.0, 2.0]}));
        let err = build_payload("c-9", &meta).unwrap_err();
        assert!(matches!(err, PublishError::UnsupportedFootprint { ref kind, .. } if kind == "Point"));

        let mut meta = meta;
        meta.footprint = None;
        assert!(matches!(
            build_payload("c-9", &meta),
            Err(PublishError::MissingFootprint { .. })
        ));
    }

    #[test]
    fn test_read_catalog_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,catalogId").unwrap();
        writeln!(file, "first,c-1").unwrap();
        writeln!(file, "blank,").unwrap();
        writeln!(file, "second,c-2").unwrap();
        file.flush().unwrap();

        let ids = read_catalog_ids(file.path(), Delimiter::Char(',')).unwrap();
        assert_eq!(ids, vec!["c-1", "c-2"]);
    }

    #[test]
    fn test_read_catalog_ids_requires_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id\nc-1").unwrap();
        file.flush().unwrap();

        let err = read_catalog_ids(file.path(), Delimiter::Char(',')).unwrap_err();
        assert!(err.to_string().contains("missing header catalogId"));
    }

    async fn find(Json(body): Json<Value>) -> Json<Value> {
        let layers = match body["id"].as_str() {
            Some("new") => json!([{"metadata": {
                "productId": "NEW", "productType": "RasterMap",
                "footprint": {"type": "MultiPolygon", "coordinates": [square(0.0), square(5.0)]}
            }}]),
            Some("existing") => json!([{"metadata": {
                "productId": "OLD", "productType": "Orthophoto",
                "footprint": {"type": "Polygon", "coordinates": square(0.0)}
            }}]),
            _ => json!([]),
        };
        Json(layers)
    }

    #[tokio::test]
    async fn test_publish_all_counts_outcomes() {
        let router = Router::new()
            .route("/records/find", post(find))
            .route(
                "/featureTypes/polygonParts/polygonParts/{name}",
                get(|UrlPath(name): UrlPath<String>| async move {
                    if name == "OLD-Orthophoto" {
                        StatusCode::OK
                    } else {
                        StatusCode::NOT_FOUND
                    }
                }),
            )
            .route(
                "/featureTypes/polygonParts/polygonParts",
                post(|| async { StatusCode::CREATED }),
            )
            .route(
                "/polygonParts",
                post(|Json(body): Json<Value>| async move {
                    if body["partsData"].as_array().map(Vec::len) == Some(2) {
                        StatusCode::OK
                    } else {
                        StatusCode::BAD_REQUEST
                    }
                }),
            );
        let url = stub::serve(router).await;

        let publisher = Publisher::new(
            CatalogClient::new(url.clone()).with_retry(stub::fast_retries()),
            GeoserverClient::new(url.clone()).with_retry(stub::fast_retries()),
            PolygonPartsClient::new(url).with_retry(stub::fast_retries()),
        );

        let ids: Vec<String> = ["new", "existing", "missing"].iter().map(|s| s.to_string()).collect();
        let summary = publisher.publish_all(&ids).await;

        assert_eq!(
            summary,
            PublishSummary {
                published: 1,
                skipped: 1,
                failed: 1
            }
        );
    }

    fn parts_router(submitted: Arc<Mutex<Vec<Value>>>) -> Router {
        Router::new()
            .route("/records/find", post(find))
            .route(
                "/featureTypes/polygonParts/polygonParts/{name}",
                get(|UrlPath(name): UrlPath<String>| async move {
                    if name == "OLD-Orthophoto" {
                        StatusCode::OK
                    } else {
                        StatusCode::NOT_FOUND
                    }
                }),
            )
            .route(
                "/featureTypes/polygonParts/polygonParts",
                post(|| async { StatusCode::CREATED }),
            )
            .route(
                "/polygonParts",
                post(move |Json(body): Json<Value>| {
                    let submitted = Arc::clone(&submitted);
                    async move {
                        submitted.lock().unwrap().push(body);
                        StatusCode::OK
                    }
                }),
            )
    }

    async fn parts_publisher(submitted: Arc<Mutex<Vec<Value>>>) -> Publisher {
        let url = stub::serve(parts_router(submitted)).await;
        Publisher::new(
            CatalogClient::new(url.clone()).with_retry(stub::fast_retries()),
            GeoserverClient::new(url.clone()).with_retry(stub::fast_retries()),
            PolygonPartsClient::new(url).with_retry(stub::fast_retries()),
        )
    }

    fn footprint_file(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Source,SourceName,SensorType,Resolution,Ep90,Countries,Cities,Dsc,UpdateDate,WKT").unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_publish_parts_file_submits_every_row() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let publisher = parts_publisher(Arc::clone(&submitted)).await;
        let file = footprint_file(&[
            "S1,North,WV02,0.5,3,IL,Haifa,,2023-04-01,\"POLYGON((34 31,34 32,35 32,35 31,34 31))\"",
            "S2,South,GE01,0.7,4,IL,,,2023-05-01,\"POLYGON((34 29,34 30,35 30,35 29,34 29))\"",
        ]);

        let outcome = publisher
            .publish_parts_file("new", file.path(), Delimiter::Char(','))
            .await
            .unwrap();
        assert_eq!(outcome, LayerOutcome::Published);

        let bodies = submitted.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["catalogId"], "new");
        assert_eq!(bodies[0]["productId"], "NEW");
        let parts = bodies[0]["partsData"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["sourceId"], "S1");
        assert_eq!(parts[0]["cities"], json!(["Haifa"]));
        assert_eq!(parts[1]["sourceResolutionMeter"], 0.7);
        assert_eq!(parts[1]["footprint"]["type"], "Polygon");
    }

    #[tokio::test]
    async fn test_publish_parts_file_bad_row_submits_nothing() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let publisher = parts_publisher(Arc::clone(&submitted)).await;
        let file = footprint_file(&[
            "S1,North,WV02,0.5,3,IL,,,2023-04-01,\"POLYGON((34 31,34 32,35 32,35 31,34 31))\"",
            "S2,South,GE01,0.7,4,,,,2023-05-01,\"POLYGON((34 29,34 30,35 30,35 29,34 29))\"",
        ]);

        let err = publisher
            .publish_parts_file("new", file.path(), Delimiter::Char(','))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Error on row 2: Countries field is required.");
        assert!(submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_parts_file_skips_published_layer() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let publisher = parts_publisher(Arc::clone(&submitted)).await;

        // The file is never opened for a published layer.
        let outcome = publisher
            .publish_parts_file("existing", "/nonexistent/parts.csv", Delimiter::Char(','))
            .await
            .unwrap();
        assert_eq!(outcome, LayerOutcome::AlreadyPublished);
        assert!(submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_from_config_requires_urls() {
        let err = Publisher::from_config(&ClientUrls::default()).err().unwrap();
        assert!(err.to_string().contains("RASTER_CATALOG_URL"));
    }
}
