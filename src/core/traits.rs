//! Collaborator interfaces owned by the host application.
//!
//! The core never talks HTTP itself; reconciliation goes through [`ReadModel`],
//! which the presentation layer implements on top of its read APIs.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::CatchUpError;
use super::identity::ServerIdentity;

/// Opaque id of a sub-resource (a channel, a conversation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    /// Create a resource id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External read-model refresh operations used for reconciliation.
///
/// # Example
///
/// ```ignore
/// struct Api { http: reqwest::Client }
///
/// #[async_trait]
/// impl ReadModel for Api {
///     async fn refresh_list(&self, identity: &ServerIdentity) -> Result<(), CatchUpError> {
///         self.fetch_channels(identity).await.map_err(|e| CatchUpError::Api(e.to_string()))
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait ReadModel: Send + Sync + 'static {
    /// Refresh the authoritative list view (e.g. the channel list).
    async fn refresh_list(&self, identity: &ServerIdentity) -> Result<(), CatchUpError>;

    /// Resources with known pending changes (e.g. unread counts > 0).
    async fn pending_resources(
        &self,
        identity: &ServerIdentity,
    ) -> Result<Vec<ResourceId>, CatchUpError>;

    /// Fetch the latest page of one sub-resource.
    async fn refresh_resource(
        &self,
        identity: &ServerIdentity,
        resource: &ResourceId,
    ) -> Result<(), CatchUpError>;

    /// The resource the user is currently looking at, if any.
    fn active_resource(&self, identity: &ServerIdentity) -> Option<ResourceId>;
}
