use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DriverError;

/// Opaque handle to a DOM element owned by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Element {
    id: String,
}

impl Element {
    pub fn new(id: impl Into<String>) -> Self {
        Element { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Browser automation primitives every scraping task is written against.
///
/// Read operations never fail: a missing or stale element is `None`/empty,
/// and it is up to the caller to decide whether absence matters. Only
/// `navigate` surfaces an error, since a failed initial load is fatal.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// First element matching `selector`, waiting up to `timeout`.
    async fn find_one(&self, selector: &str, timeout: Duration) -> Option<Element>;

    /// All elements matching `selector`, waiting up to `timeout` for at least one.
    async fn find_all(&self, selector: &str, timeout: Duration) -> Vec<Element>;

    /// Elements matching `selector` under `parent` (no waiting).
    async fn find_within(&self, parent: &Element, selector: &str) -> Vec<Element>;

    async fn text(&self, element: &Element) -> Option<String>;

    async fn attribute(&self, element: &Element, name: &str) -> Option<String>;

    async fn click(&self, element: &Element) -> bool;

    async fn refresh(&self) -> bool;

    /// Cheap probe used by the orchestrator's health check.
    async fn is_alive(&self) -> bool;

    async fn close(&self);

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Produces fresh driver sessions for the orchestrator's restart loop.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn PageDriver>, DriverError>;
}
