//! HTTP client for the measurement backend.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use reqwest::{Client, Url};
use tracing::debug;

use crate::{
    error::{BackendError, TransportError},
    protocol::{
        DetectionReply, DetectionRequest, LayoutQuery, LayoutReport, OptimizationProfile,
        ProfileAck, ProfileRequest, parse_layout_reply, parse_profile_reply,
    },
};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Marker detection service consumed by the session controller.
pub trait DetectionBackend: Send + Sync + 'static {
    fn detect(&self, request: DetectionRequest)
    -> BoxFuture<'_, Result<DetectionReply, TransportError>>;
}

/// reqwest-backed client for `/detectar_aruco`, `/generar` and `/configuracion`.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base: &str) -> Result<Self, TransportError> {
        let mut base = Url::parse(base)
            .map_err(|err| TransportError::Protocol(format!("invalid backend url {base:?}: {err}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|err| TransportError::Protocol(format!("invalid endpoint {path:?}: {err}")))
    }

    async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, TransportError> {
        let status = response.status();
        let body = response.bytes().await?;
        // Error replies are JSON even on non-2xx; only bail when there is no JSON to read.
        if !status.is_success() && serde_json::from_slice::<serde_json::Value>(&body).is_err() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(body.to_vec())
    }

    pub async fn submit_detection(
        &self,
        request: &DetectionRequest,
    ) -> Result<DetectionReply, TransportError> {
        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint("detectar_aruco")?)
            .json(request)
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        metrics::histogram!("measurement_detect_seconds").record(started.elapsed().as_secs_f64());
        DetectionReply::from_json(&body)
    }

    pub async fn layout(&self, query: LayoutQuery) -> Result<LayoutReport, BackendError> {
        let response = self
            .client
            .get(self.endpoint("generar")?)
            .query(&query.query_pairs())
            .send()
            .await
            .map_err(TransportError::from)?;
        let body = Self::read_body(response).await?;
        parse_layout_reply(&body)?.map_err(BackendError::Rejected)
    }

    pub async fn set_profile(
        &self,
        profile: OptimizationProfile,
    ) -> Result<ProfileAck, BackendError> {
        let response = self
            .client
            .post(self.endpoint("configuracion")?)
            .json(&ProfileRequest {
                tipo: profile.wire_name(),
            })
            .send()
            .await
            .map_err(TransportError::from)?;
        let body = Self::read_body(response).await?;
        parse_profile_reply(&body)?.map_err(BackendError::Rejected)
    }

    /// Download an image referenced by a report, resolving relative URLs
    /// against the backend base.
    pub async fn fetch_image(&self, image_url: &str) -> Result<Vec<u8>, TransportError> {
        let url = self.endpoint(image_url)?;
        debug!("fetching {url}");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl DetectionBackend for HttpBackend {
    fn detect(
        &self,
        request: DetectionRequest,
    ) -> BoxFuture<'_, Result<DetectionReply, TransportError>> {
        Box::pin(async move { self.submit_detection(&request).await })
    }
}
