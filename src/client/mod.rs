//! Client library for talking to the manager's HTTP surface.

use crate::error::{CairnError, Result};
use crate::head::ClusterFinder;
use crate::types::{Clusters, MapType, ReservationMap};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Default connection timeout for client requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for client operations.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the manager node.
#[derive(Clone)]
pub struct ManagerClient {
    base_url: String,
    client: Client,
}

impl ManagerClient {
    /// Create a new manager client with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeouts(base_url, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a new manager client with custom timeouts.
    pub fn with_timeouts(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Claim capacity for an upload of `size` bytes.
    pub async fn reserve(&self, size: u64) -> Result<ReservationMap> {
        #[derive(Serialize)]
        struct ReserveRequest {
            size: u64,
        }

        let response = self
            .client
            .post(format!("{}/reserve", self.base_url))
            .json(&ReserveRequest { size })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => Err(Self::status_error(status, response).await),
        }
    }

    /// Commit a reservation with the deduplicated per-cluster usage.
    pub async fn commit(
        &self,
        reservation_id: &str,
        cluster_usage: &HashMap<String, u64>,
    ) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/commit/{}", self.base_url, reservation_id))
            .json(cluster_usage)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(Self::status_error(status, response).await),
        }
    }

    /// Abandon a reservation.
    pub async fn discard(&self, reservation_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/reserve/{}", self.base_url, reservation_id))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(Self::status_error(status, response).await),
        }
    }

    /// Locate a hash for a create; answers come back in response headers.
    pub async fn find(&self, hash: &str) -> Result<(String, String)> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .header("X-Action", "find")
            .header("X-Options", hash)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let cluster_id = Self::response_header(&response, "X-Cluster-Id")?;
                let address = Self::response_header(&response, "X-Address")?;
                Ok((cluster_id, address))
            }
            StatusCode::NOT_FOUND => Err(CairnError::NoAvailableActionNode),
            status => Err(Self::status_error(status, response).await),
        }
    }

    /// Bulk locate: hash to node address for the given intent.
    pub async fn map(
        &self,
        hashes: &[String],
        map_type: MapType,
    ) -> Result<HashMap<String, String>> {
        #[derive(Serialize)]
        struct MapRequest<'a> {
            hashes: &'a [String],
            map_type: MapType,
        }

        let response = self
            .client
            .post(format!("{}/map", self.base_url))
            .json(&MapRequest { hashes, map_type })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => Err(Self::status_error(status, response).await),
        }
    }

    /// Fetch the cluster listing, or one cluster when `cluster_id` is set.
    pub async fn clusters(&self, cluster_id: Option<&str>) -> Result<Clusters> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .header("X-Action", "clusters")
            .header("X-Options", cluster_id.unwrap_or(""))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => Err(Self::status_error(status, response).await),
        }
    }

    fn response_header(response: &reqwest::Response, name: &str) -> Result<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| CairnError::Protocol(format!("missing {} header", name)))
    }

    async fn status_error(status: StatusCode, response: reqwest::Response) -> CairnError {
        #[derive(serde::Deserialize)]
        struct ErrorBody {
            #[allow(dead_code)]
            code: u32,
            message: String,
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.to_string(),
        };

        match status {
            StatusCode::NOT_FOUND => CairnError::NotFound(message),
            StatusCode::SERVICE_UNAVAILABLE => CairnError::NoAvailableClusterNode(message),
            StatusCode::INSUFFICIENT_STORAGE => CairnError::NoSpace(0),
            _ => CairnError::Internal(message),
        }
    }
}

#[async_trait]
impl ClusterFinder for ManagerClient {
    /// The pipeline's lookup: a hash nobody owns resolves to "use the
    /// reserved slot".
    async fn find_cluster(&self, hash: &str) -> Result<(String, String)> {
        self.find(hash).await
    }
}
