//! Asynchronous client for the dashboard backend REST API.
//!
//! Provides the namespace-scoped list calls that seed each watch, plus the
//! websocket URL the watch transport should dial.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;
use watch_proto::{Channel, ClusterEvent, DevWorkspace, Pod, Resource, ResourceList};
use watch_sync::{ListError, ListOperation};

const WEBSOCKET_PATH: &str = "dashboard/api/websocket";

#[derive(Clone)]
pub struct DashboardClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

impl From<DashboardError> for ListError {
    fn from(err: DashboardError) -> Self {
        match err {
            DashboardError::UnexpectedStatus { status, body } => ListError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            },
            DashboardError::Http(err) if err.is_decode() => ListError::Decode(err.to_string()),
            other => ListError::Request(other.to_string()),
        }
    }
}

/// REST collection name for each resource kind.
fn collection(channel: Channel) -> &'static str {
    match channel {
        Channel::DevWorkspace => "devworkspaces",
        Channel::Pod => "pods",
        Channel::Event => "events",
    }
}

impl DashboardClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, DashboardError> {
        let mut base_url =
            Url::parse(base_url).map_err(|err| DashboardError::InvalidUrl(err.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(DashboardError::InvalidUrl(format!(
                "unsupported scheme {}",
                base_url.scheme()
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Websocket endpoint on the same host: `http` becomes `ws`, `https`
    /// becomes `wss`.
    pub fn websocket_url(&self) -> Result<Url, DashboardError> {
        let mut url = self
            .base_url
            .join(WEBSOCKET_PATH)
            .map_err(|err| DashboardError::InvalidUrl(err.to_string()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| DashboardError::InvalidUrl(format!("cannot use scheme {scheme}")))?;
        Ok(url)
    }

    pub async fn list_devworkspaces(
        &self,
        namespace: &str,
    ) -> Result<ResourceList<DevWorkspace>, DashboardError> {
        self.list_resources(namespace).await
    }

    pub async fn list_pods(&self, namespace: &str) -> Result<ResourceList<Pod>, DashboardError> {
        self.list_resources(namespace).await
    }

    pub async fn list_events(
        &self,
        namespace: &str,
    ) -> Result<ResourceList<ClusterEvent>, DashboardError> {
        self.list_resources(namespace).await
    }

    pub async fn list_resources<R>(&self, namespace: &str) -> Result<ResourceList<R>, DashboardError>
    where
        R: Resource,
    {
        let path = format!("api/namespace/{}/{}", namespace, collection(R::CHANNEL));
        self.get_json(&path).await
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, DashboardError>
    where
        T: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| DashboardError::InvalidUrl(err.to_string()))?;
        debug!(target = "dashboard.sdk", url = %url, "GET");
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let res = request.send().await?;

        if res.status().is_success() {
            Ok(res.json::<T>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(DashboardError::UnexpectedStatus { status, body })
        }
    }
}

#[async_trait]
impl<R: Resource> ListOperation<R> for DashboardClient {
    async fn list(&self, namespace: &str) -> Result<ResourceList<R>, ListError> {
        Ok(self.list_resources::<R>(namespace).await?)
    }
}
