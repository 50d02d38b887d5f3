//! Client for the hosting platform's resource API.
//!
//! The engine only talks to the platform through [`ResourceClient`]. Calls are
//! not idempotent: a create that times out may still have happened, so the
//! engine never retries creates.

use std::time::Duration;

use async_trait::async_trait;
use guildforge_core::{ResourceAttributes, ResourceId, ResourceKind, TenantId};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// A resource as currently present on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveResource {
    /// Platform identifier.
    pub id: ResourceId,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Display name.
    pub name: String,
    /// Position within the sibling set.
    pub position: u32,
    /// Permission template currently applied.
    #[serde(default)]
    pub permission_template: Option<String>,
    /// Parent category (channels only).
    #[serde(default)]
    pub parent_id: Option<ResourceId>,
    /// Set when another integration manages the resource.
    #[serde(default)]
    pub managed_by: Option<String>,
    /// The platform's implicit "everyone" role.
    #[serde(default)]
    pub is_default: bool,
}

impl LiveResource {
    /// Snapshot of the mutable attributes.
    #[must_use]
    pub fn attributes(&self) -> ResourceAttributes {
        ResourceAttributes {
            name: self.name.clone(),
            position: self.position,
            permission_template: self.permission_template.clone(),
            parent_id: self.parent_id,
        }
    }
}

/// A resource to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDraft {
    /// Kind to create.
    pub kind: ResourceKind,
    /// Initial attributes.
    #[serde(flatten)]
    pub attributes: ResourceAttributes,
}

/// Permissions the engine holds in a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// May create, update and delete roles.
    pub manage_roles: bool,
    /// May create, update, move and delete categories and channels.
    pub manage_channels: bool,
}

impl Capabilities {
    /// Every capability granted.
    pub const ALL: Self = Self {
        manage_roles: true,
        manage_channels: true,
    };

    /// Whether mutations of `kind` are permitted.
    #[must_use]
    pub const fn allows(self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Role => self.manage_roles,
            ResourceKind::Category | ResourceKind::Channel => self.manage_channels,
        }
    }

    /// Name of the capability that governs `kind`.
    #[must_use]
    pub const fn required_for(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Role => "manage_roles",
            ResourceKind::Category | ResourceKind::Channel => "manage_channels",
        }
    }
}

/// Trait for platform resource operations.
///
/// This trait abstracts the platform API, allowing for mock implementations
/// in tests.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// List all resources of a kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot be reached or refuses the call.
    async fn list(&self, tenant: TenantId, kind: ResourceKind) -> ClientResult<Vec<LiveResource>>;

    /// Create a resource and return its identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the creation.
    async fn create(&self, tenant: TenantId, draft: &ResourceDraft) -> ClientResult<ResourceId>;

    /// Overwrite the mutable attributes of a resource.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the resource is gone.
    async fn update(
        &self,
        tenant: TenantId,
        kind: ResourceKind,
        id: ResourceId,
        attributes: &ResourceAttributes,
    ) -> ClientResult<()>;

    /// Delete a resource.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the resource is already gone.
    async fn delete(&self, tenant: TenantId, kind: ResourceKind, id: ResourceId)
        -> ClientResult<()>;

    /// Move a channel under a new parent, or detach it with `None`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the channel is gone.
    async fn move_child(
        &self,
        tenant: TenantId,
        id: ResourceId,
        new_parent: Option<ResourceId>,
    ) -> ClientResult<()>;

    /// Permissions held in the tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot be reached.
    async fn capabilities(&self, tenant: TenantId) -> ClientResult<Capabilities>;

    /// Whether the engine can post into `container`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the container doesn't exist.
    async fn can_write(&self, tenant: TenantId, container: ResourceId) -> ClientResult<bool>;
}

/// HTTP client for the platform REST API.
///
/// Resources live under `/v1/tenants/{tenant}/{kind-plural}`.
#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpResourceClient {
    /// Create a new platform client with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url, token))
    }

    /// Create a platform client with a custom reqwest client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL of the platform API.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, tenant: TenantId, kind: ResourceKind) -> String {
        format!("{}/v1/tenants/{tenant}/{}", self.base_url, kind.plural())
    }

    fn resource_url(&self, tenant: TenantId, kind: ResourceKind, id: ResourceId) -> String {
        format!("{}/{id}", self.collection_url(tenant, kind))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ClientResult<reqwest::Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("platform request failed: {e}")))
    }
}

/// Error response from the platform.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: ResourceId,
}

#[derive(Debug, Serialize)]
struct MoveRequest {
    parent_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
struct WritableResponse {
    writable: bool,
}

/// Map an unsuccessful response onto a `ClientError`.
///
/// `target` names the resource the call addressed, so a 404 becomes
/// `NotFound` for it.
async fn error_from_response(
    response: reqwest::Response,
    target: Option<(ResourceKind, ResourceId)>,
) -> ClientError {
    let status = response.status();
    let message = response
        .json::<ErrorResponse>()
        .await
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("platform returned status {status}"));

    match (status, target) {
        (reqwest::StatusCode::NOT_FOUND, Some((kind, id))) => ClientError::NotFound { kind, id },
        (reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::UNAUTHORIZED, _) => {
            ClientError::Forbidden(message)
        }
        _ => ClientError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::Decode(format!("failed to parse response: {e}")))
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn list(&self, tenant: TenantId, kind: ResourceKind) -> ClientResult<Vec<LiveResource>> {
        let url = self.collection_url(tenant, kind);
        let response = self.send(self.client.get(&url)).await?;

        if response.status().is_success() {
            decode(response).await
        } else {
            Err(error_from_response(response, None).await)
        }
    }

    async fn create(&self, tenant: TenantId, draft: &ResourceDraft) -> ClientResult<ResourceId> {
        let url = self.collection_url(tenant, draft.kind);
        let response = self
            .send(self.client.post(&url).json(&draft.attributes))
            .await?;

        if response.status().is_success() {
            let created: CreatedResponse = decode(response).await?;
            tracing::debug!(
                tenant = %tenant,
                kind = %draft.kind,
                id = %created.id,
                name = %draft.attributes.name,
                "Created resource via platform API"
            );
            Ok(created.id)
        } else {
            let err = error_from_response(response, None).await;
            tracing::error!(
                tenant = %tenant,
                kind = %draft.kind,
                name = %draft.attributes.name,
                error = %err,
                "Failed to create resource"
            );
            Err(err)
        }
    }

    async fn update(
        &self,
        tenant: TenantId,
        kind: ResourceKind,
        id: ResourceId,
        attributes: &ResourceAttributes,
    ) -> ClientResult<()> {
        let url = self.resource_url(tenant, kind, id);
        let response = self.send(self.client.patch(&url).json(attributes)).await?;

        if response.status().is_success() {
            tracing::debug!(tenant = %tenant, kind = %kind, id = %id, "Updated resource");
            Ok(())
        } else {
            Err(error_from_response(response, Some((kind, id))).await)
        }
    }

    async fn delete(
        &self,
        tenant: TenantId,
        kind: ResourceKind,
        id: ResourceId,
    ) -> ClientResult<()> {
        let url = self.resource_url(tenant, kind, id);
        let response = self.send(self.client.delete(&url)).await?;

        if response.status().is_success() {
            tracing::debug!(tenant = %tenant, kind = %kind, id = %id, "Deleted resource");
            Ok(())
        } else {
            Err(error_from_response(response, Some((kind, id))).await)
        }
    }

    async fn move_child(
        &self,
        tenant: TenantId,
        id: ResourceId,
        new_parent: Option<ResourceId>,
    ) -> ClientResult<()> {
        let url = format!(
            "{}/parent",
            self.resource_url(tenant, ResourceKind::Channel, id)
        );
        let body = MoveRequest {
            parent_id: new_parent,
        };
        let response = self.send(self.client.put(&url).json(&body)).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response, Some((ResourceKind::Channel, id))).await)
        }
    }

    async fn capabilities(&self, tenant: TenantId) -> ClientResult<Capabilities> {
        let url = format!("{}/v1/tenants/{tenant}/capabilities", self.base_url);
        let response = self.send(self.client.get(&url)).await?;

        if response.status().is_success() {
            decode(response).await
        } else {
            Err(error_from_response(response, None).await)
        }
    }

    async fn can_write(&self, tenant: TenantId, container: ResourceId) -> ClientResult<bool> {
        let url = format!(
            "{}/writable",
            self.resource_url(tenant, ResourceKind::Channel, container)
        );
        let response = self.send(self.client.get(&url)).await?;

        if response.status().is_success() {
            let body: WritableResponse = decode(response).await?;
            Ok(body.writable)
        } else {
            Err(error_from_response(response, Some((ResourceKind::Channel, container))).await)
        }
    }
}

/// In-memory platform used by tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap, HashSet};

    /// A mutating call observed by the mock.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockCall {
        /// `create` with the requested name.
        Create {
            /// Kind created.
            kind: ResourceKind,
            /// Requested name.
            name: String,
        },
        /// `update` of a resource.
        Update {
            /// Kind updated.
            kind: ResourceKind,
            /// Target resource.
            id: ResourceId,
        },
        /// `delete` of a resource.
        Delete {
            /// Kind deleted.
            kind: ResourceKind,
            /// Target resource.
            id: ResourceId,
        },
        /// `move_child` of a channel.
        Move {
            /// Channel moved.
            id: ResourceId,
            /// New parent.
            parent: Option<ResourceId>,
        },
    }

    #[derive(Default)]
    struct MockState {
        next_id: u64,
        tenants: HashMap<TenantId, BTreeMap<ResourceId, LiveResource>>,
        capabilities: HashMap<TenantId, Capabilities>,
        unwritable: HashSet<ResourceId>,
        fail_create: HashSet<String>,
        fail_update: HashSet<ResourceId>,
        fail_delete: HashSet<ResourceId>,
        fail_listing: bool,
        calls: Vec<MockCall>,
    }

    /// A mock platform that stores resources in memory.
    ///
    /// Deleting a category leaves its channels in place without a parent,
    /// as the real platform does.
    #[derive(Default)]
    pub struct MockResourceClient {
        state: Mutex<MockState>,
    }

    impl MockResourceClient {
        /// Create an empty mock platform.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn insert(
            &self,
            tenant: TenantId,
            kind: ResourceKind,
            attributes: ResourceAttributes,
            managed_by: Option<String>,
            is_default: bool,
        ) -> ResourceId {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = ResourceId::new(1000 + state.next_id);
            state.tenants.entry(tenant).or_default().insert(
                id,
                LiveResource {
                    id,
                    kind,
                    name: attributes.name,
                    position: attributes.position,
                    permission_template: attributes.permission_template,
                    parent_id: attributes.parent_id,
                    managed_by,
                    is_default,
                },
            );
            id
        }

        /// Seed a resource without recording a call.
        pub fn seed(
            &self,
            tenant: TenantId,
            kind: ResourceKind,
            name: &str,
            position: u32,
            parent_id: Option<ResourceId>,
        ) -> ResourceId {
            self.insert(
                tenant,
                kind,
                ResourceAttributes {
                    name: name.to_string(),
                    position,
                    permission_template: None,
                    parent_id,
                },
                None,
                false,
            )
        }

        /// Seed the platform's implicit "everyone" role.
        pub fn seed_default_role(&self, tenant: TenantId) -> ResourceId {
            self.insert(
                tenant,
                ResourceKind::Role,
                ResourceAttributes {
                    name: "@everyone".to_string(),
                    position: 0,
                    permission_template: None,
                    parent_id: None,
                },
                None,
                true,
            )
        }

        /// Seed a resource managed by another integration.
        pub fn seed_managed(
            &self,
            tenant: TenantId,
            kind: ResourceKind,
            name: &str,
            integration: &str,
        ) -> ResourceId {
            self.insert(
                tenant,
                kind,
                ResourceAttributes {
                    name: name.to_string(),
                    position: 0,
                    permission_template: None,
                    parent_id: None,
                },
                Some(integration.to_string()),
                false,
            )
        }

        /// Fail every `create` of a resource with this name.
        pub fn fail_on_create(&self, name: &str) {
            self.state.lock().fail_create.insert(name.to_string());
        }

        /// Fail every `update` of this resource.
        pub fn fail_on_update(&self, id: ResourceId) {
            self.state.lock().fail_update.insert(id);
        }

        /// Fail every `delete` of this resource.
        pub fn fail_on_delete(&self, id: ResourceId) {
            self.state.lock().fail_delete.insert(id);
        }

        /// Make `list` fail.
        pub fn fail_listing(&self, fail: bool) {
            self.state.lock().fail_listing = fail;
        }

        /// Remove all injected failures.
        pub fn clear_failures(&self) {
            let mut state = self.state.lock();
            state.fail_create.clear();
            state.fail_update.clear();
            state.fail_delete.clear();
            state.fail_listing = false;
        }

        /// Override the capabilities reported for a tenant.
        pub fn set_capabilities(&self, tenant: TenantId, capabilities: Capabilities) {
            self.state.lock().capabilities.insert(tenant, capabilities);
        }

        /// Report `container` as not writable.
        pub fn set_unwritable(&self, container: ResourceId) {
            self.state.lock().unwritable.insert(container);
        }

        /// All resources of a tenant, in creation order.
        #[must_use]
        pub fn resources(&self, tenant: TenantId) -> Vec<LiveResource> {
            self.state
                .lock()
                .tenants
                .get(&tenant)
                .map(|r| r.values().cloned().collect())
                .unwrap_or_default()
        }

        /// Find a resource by kind and name.
        #[must_use]
        pub fn find(&self, tenant: TenantId, kind: ResourceKind, name: &str) -> Option<LiveResource> {
            self.resources(tenant)
                .into_iter()
                .find(|r| r.kind == kind && r.name == name)
        }

        /// Mutating calls in the order they were made, including failed ones.
        #[must_use]
        pub fn calls(&self) -> Vec<MockCall> {
            self.state.lock().calls.clone()
        }
    }

    #[async_trait]
    impl ResourceClient for MockResourceClient {
        async fn list(
            &self,
            tenant: TenantId,
            kind: ResourceKind,
        ) -> ClientResult<Vec<LiveResource>> {
            if self.state.lock().fail_listing {
                return Err(ClientError::Transport("listing unavailable".to_string()));
            }
            Ok(self
                .resources(tenant)
                .into_iter()
                .filter(|r| r.kind == kind)
                .collect())
        }

        async fn create(
            &self,
            tenant: TenantId,
            draft: &ResourceDraft,
        ) -> ClientResult<ResourceId> {
            {
                let mut state = self.state.lock();
                state.calls.push(MockCall::Create {
                    kind: draft.kind,
                    name: draft.attributes.name.clone(),
                });
                if state.fail_create.contains(&draft.attributes.name) {
                    return Err(ClientError::Api {
                        status: 500,
                        message: format!("cannot create {}", draft.attributes.name),
                    });
                }
            }
            Ok(self.insert(tenant, draft.kind, draft.attributes.clone(), None, false))
        }

        async fn update(
            &self,
            tenant: TenantId,
            kind: ResourceKind,
            id: ResourceId,
            attributes: &ResourceAttributes,
        ) -> ClientResult<()> {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Update { kind, id });
            if state.fail_update.contains(&id) {
                return Err(ClientError::Api {
                    status: 500,
                    message: format!("cannot update {id}"),
                });
            }
            let resource = state
                .tenants
                .get_mut(&tenant)
                .and_then(|r| r.get_mut(&id))
                .filter(|r| r.kind == kind)
                .ok_or(ClientError::NotFound { kind, id })?;
            resource.name.clone_from(&attributes.name);
            resource.position = attributes.position;
            resource
                .permission_template
                .clone_from(&attributes.permission_template);
            if kind == ResourceKind::Channel {
                resource.parent_id = attributes.parent_id;
            }
            Ok(())
        }

        async fn delete(
            &self,
            tenant: TenantId,
            kind: ResourceKind,
            id: ResourceId,
        ) -> ClientResult<()> {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Delete { kind, id });
            if state.fail_delete.contains(&id) {
                return Err(ClientError::Api {
                    status: 500,
                    message: format!("cannot delete {id}"),
                });
            }
            let resources = state
                .tenants
                .get_mut(&tenant)
                .ok_or(ClientError::NotFound { kind, id })?;
            match resources.get(&id) {
                Some(r) if r.kind == kind => {}
                _ => return Err(ClientError::NotFound { kind, id }),
            }
            resources.remove(&id);
            if kind == ResourceKind::Category {
                for child in resources.values_mut() {
                    if child.parent_id == Some(id) {
                        child.parent_id = None;
                    }
                }
            }
            Ok(())
        }

        async fn move_child(
            &self,
            tenant: TenantId,
            id: ResourceId,
            new_parent: Option<ResourceId>,
        ) -> ClientResult<()> {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Move {
                id,
                parent: new_parent,
            });
            let channel = state
                .tenants
                .get_mut(&tenant)
                .and_then(|r| r.get_mut(&id))
                .filter(|r| r.kind == ResourceKind::Channel)
                .ok_or(ClientError::NotFound {
                    kind: ResourceKind::Channel,
                    id,
                })?;
            channel.parent_id = new_parent;
            Ok(())
        }

        async fn capabilities(&self, tenant: TenantId) -> ClientResult<Capabilities> {
            Ok(self
                .state
                .lock()
                .capabilities
                .get(&tenant)
                .copied()
                .unwrap_or(Capabilities::ALL))
        }

        async fn can_write(&self, tenant: TenantId, container: ResourceId) -> ClientResult<bool> {
            let state = self.state.lock();
            let exists = state
                .tenants
                .get(&tenant)
                .is_some_and(|r| r.contains_key(&container));
            if !exists {
                return Err(ClientError::NotFound {
                    kind: ResourceKind::Channel,
                    id: container,
                });
            }
            Ok(!state.unwritable.contains(&container))
        }
    }
}
