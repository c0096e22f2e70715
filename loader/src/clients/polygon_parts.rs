//! Polygon parts manager client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{check_status, transport_error, with_retries, RetryPolicy};
use crate::error::ClientResult;

const SERVICE: &str = "polygon parts manager";

/// One part of an ingestion payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolygonPart {
    pub source_id: String,
    pub source_name: String,
    pub resolution_degree: Option<f64>,
    pub resolution_meter: Option<f64>,
    pub source_resolution_meter: Option<f64>,
    #[serde(rename = "horizontalAccuracyCE90")]
    pub horizontal_accuracy_ce90: Option<f64>,
    pub sensors: Vec<String>,
    #[serde(rename = "imagingTimeBeginUTC")]
    pub imaging_time_begin: Option<DateTime<Utc>>,
    #[serde(rename = "imagingTimeEndUTC")]
    pub imaging_time_end: Option<DateTime<Utc>>,
    pub footprint: geojson::Geometry,
    pub description: Option<String>,
    pub countries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cities: Vec<String>,
}

/// Ingestion request for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolygonPartsPayload {
    pub catalog_id: String,
    pub product_id: String,
    pub product_type: String,
    pub product_version: Option<String>,
    pub parts_data: Vec<PolygonPart>,
}

#[derive(Clone)]
pub struct PolygonPartsClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl PolygonPartsClient {
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

    /// Submit the parts of one layer.
    pub async fn submit(&self, payload: &PolygonPartsPayload) -> ClientResult<()> {
        with_retries(&self.retry, SERVICE, move || self.try_submit(payload)).await
    }

    async fn try_submit(&self, payload: &PolygonPartsPayload) -> ClientResult<()> {
        let response = self
            .http
            .post(format!("{}/polygonParts", self.base_url))
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;

        check_status(SERVICE, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::stub;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn payload() -> PolygonPartsPayload {
        PolygonPartsPayload {
            catalog_id: "c-1".into(),
            product_id: "BLUE_MARBLE".into(),
            product_type: "Orthophoto".into(),
            product_version: Some("1.0".into()),
            parts_data: vec![],
        }
    }

    #[tokio::test]
    async fn test_submit_retries_on_server_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/polygonParts",
            post(move |Json(body): Json<Value>| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else if body["productId"] == "BLUE_MARBLE" && body["partsData"].is_array() {
                        StatusCode::CREATED
                    } else {
                        StatusCode::BAD_REQUEST
                    }
                }
            }),
        );

        let client = PolygonPartsClient::new(stub::serve(router).await).with_retry(stub::fast_retries());
        client.submit(&payload()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_payload_field_names() {
        let json = serde_json::to_value(payload()).unwrap();
        assert_eq!(json["catalogId"], "c-1");
        assert_eq!(json["productVersion"], "1.0");
        assert!(json["partsData"].as_array().unwrap().is_empty());
    }
}
