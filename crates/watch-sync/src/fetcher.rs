use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use watch_proto::{Resource, ResourceList};

/// Version used when a listing omits `metadata.resourceVersion`.
const DEFAULT_RESOURCE_VERSION: &str = "0";

#[derive(Debug, Clone, Error)]
pub enum ListError {
    #[error("list request failed: {0}")]
    Request(String),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("failed to decode list response: {0}")]
    Decode(String),
}

/// One-shot listing of a resource kind in a namespace.
#[async_trait]
pub trait ListOperation<R>: Send + Sync {
    async fn list(&self, namespace: &str) -> Result<ResourceList<R>, ListError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing<R> {
    pub items: Vec<R>,
    pub resource_version: String,
}

/// Produces the full snapshot a watch resumes from.
pub struct CatchUpFetcher<R> {
    operation: Arc<dyn ListOperation<R>>,
}

impl<R> Clone for CatchUpFetcher<R> {
    fn clone(&self) -> Self {
        Self {
            operation: Arc::clone(&self.operation),
        }
    }
}

impl<R: Resource> CatchUpFetcher<R> {
    pub fn new(operation: Arc<dyn ListOperation<R>>) -> Self {
        Self { operation }
    }

    pub async fn fetch(&self, namespace: &str) -> Result<Listing<R>, ListError> {
        let list = self.operation.list(namespace).await?;
        let resource_version = list
            .metadata
            .resource_version
            .unwrap_or_else(|| DEFAULT_RESOURCE_VERSION.to_string());
        debug!(
            target = "watch.fetch",
            channel = %R::CHANNEL,
            namespace,
            items = list.items.len(),
            resource_version = %resource_version,
            "listing fetched"
        );
        Ok(Listing {
            items: list.items,
            resource_version,
        })
    }
}
