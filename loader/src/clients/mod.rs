//! HTTP clients of the downstream services.
//!
//! - [`CatalogClient`] - raster catalog lookups
//! - [`GeoserverClient`] - feature type registration
//! - [`PolygonPartsClient`] - polygon parts ingestion
//!
//! Every call is retried on transport errors and 5xx responses, up to
//! [`DEFAULT_MAX_RETRIES`] attempts [`RETRY_DELAY_MS`] apart. Other
//! failures are returned at once.

pub mod catalog;
pub mod geoserver;
pub mod polygon_parts;

use std::future::Future;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

pub use catalog::{CatalogClient, LayerMetadata, LayerRecord};
pub use geoserver::GeoserverClient;
pub use polygon_parts::{PolygonPart, PolygonPartsClient, PolygonPartsPayload};

/// Default number of attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between attempts in milliseconds
pub const RETRY_DELAY_MS: u64 = 1000;

/// Attempt budget of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_MAX_RETRIES,
            delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }
}

/// Whether another attempt could succeed.
pub fn is_retryable(err: &ClientError) -> bool {
    match err {
        ClientError::RequestFailed(_) => true,
        ClientError::Status { status, .. } => *status >= 500,
        ClientError::InvalidResponse { .. } | ClientError::NotFound(_) => false,
    }
}

pub(crate) async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    service: &'static str,
    mut call: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(service, attempt, attempts, error = %e, "request failed");
                last_error = Some(e);

                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ClientError::RequestFailed("no attempt made".to_string())))
}

/// Pass a success response through; turn anything else into
/// [`ClientError::Status`].
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn transport_error(err: reqwest::Error) -> ClientError {
    ClientError::RequestFailed(err.to_string())
}
