//! Raster catalog client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{check_status, transport_error, with_retries, RetryPolicy};
use crate::error::{ClientError, ClientResult};

const SERVICE: &str = "raster catalog";

/// Layer metadata, as far as the publishing flow reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerMetadata {
    pub product_id: String,
    pub product_type: String,
    #[serde(default)]
    pub product_version: Option<String>,
    #[serde(default)]
    pub max_resolution_deg: Option<f64>,
    #[serde(default)]
    pub max_resolution_meter: Option<f64>,
    #[serde(default, rename = "maxHorizontalAccuracyCE90")]
    pub max_horizontal_accuracy_ce90: Option<f64>,
    #[serde(default)]
    pub sensors: Vec<String>,
    #[serde(default, rename = "imagingTimeBeginUTC")]
    pub imaging_time_begin: Option<DateTime<Utc>>,
    #[serde(default, rename = "imagingTimeEndUTC")]
    pub imaging_time_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub footprint: Option<geojson::Geometry>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub region: Vec<String>,
}

/// One catalog record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub metadata: LayerMetadata,
}

#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Find a layer by catalog id.
    ///
    /// An empty result is [`ClientError::NotFound`].
    pub async fn find_layer(&self, id: &str) -> ClientResult<LayerRecord> {
        let layers = with_retries(&self.retry, SERVICE, move || self.try_find(id)).await?;

        layers
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("Could not find catalog layer with id: {}", id)))
    }

    async fn try_find(&self, id: &str) -> ClientResult<Vec<LayerRecord>> {
        let response = self
            .http
            .post(format!("{}/records/find", self.base_url))
            .json(&serde_json::json!({ "id": id }))
            .send()
            .await
            .map_err(transport_error)?;

        check_status(SERVICE, response)
            .await?
            .json::<Vec<LayerRecord>>()
            .await
            .map_err(|e| ClientError::InvalidResponse {
                service: SERVICE,
                message: e.to_string(),
            })
    }
}
