//! GeoServer API client.

use reqwest::StatusCode;

use super::{check_status, transport_error, with_retries, RetryPolicy};
use crate::error::ClientResult;

const SERVICE: &str = "geoserver api";

/// Workspace and data store the polygon parts layers live in.
const FEATURE_TYPES_PATH: &str = "featureTypes/polygonParts/polygonParts";

#[derive(Clone)]
pub struct GeoserverClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GeoserverClient {
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

    fn feature_types_url(&self) -> String {
        format!("{}/{}", self.base_url, FEATURE_TYPES_PATH)
    }

    /// Whether a feature type with this name is published.
    pub async fn feature_type_exists(&self, name: &str) -> ClientResult<bool> {
        with_retries(&self.retry, SERVICE, move || self.try_exists(name)).await
    }

    async fn try_exists(&self, name: &str) -> ClientResult<bool> {
        let response = self
            .http
            .get(format!("{}/{}", self.feature_types_url(), name))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(SERVICE, response).await?;
        Ok(true)
    }

    /// Publish the table `native_name` as feature type `name`.
    pub async fn register_feature_type(&self, name: &str, native_name: &str) -> ClientResult<()> {
        with_retries(&self.retry, SERVICE, move || self.try_register(name, native_name)).await
    }

    async fn try_register(&self, name: &str, native_name: &str) -> ClientResult<()> {
        let response = self
            .http
            .post(self.feature_types_url())
            .json(&serde_json::json!({ "name": name, "nativeName": native_name }))
            .send()
            .await
            .map_err(transport_error)?;

        check_status(SERVICE, response).await?;
        Ok(())
    }
}
