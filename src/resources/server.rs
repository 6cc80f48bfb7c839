//! The `mailosaur_server` resource.
//!
//! `id` is assigned on create and never changes. `password` and `email` are
//! fetched lazily: only when they are unset in the state being worked on, so a
//! refresh of a healthy resource costs a single `get` call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::client::{Server, ServerCreateOptions, ServersApi};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::types::ApplyResult;

/// Type name of the resource.
pub const RESOURCE_TYPE: &str = "mailosaur_server";

/// Schema of the `mailosaur_server` resource.
pub fn server_schema() -> Schema {
    Schema::v0()
        .with_description("Virtual server")
        .with_attribute(
            "name",
            Attribute::required_string().with_description("Name of virtual server"),
        )
        .with_attribute(
            "id",
            Attribute::computed_string()
                .with_description("Id of virtual server")
                .use_state_for_unknown(),
        )
        .with_attribute(
            "email",
            Attribute::computed_string()
                .with_description("Email address for the server")
                .use_state_for_unknown(),
        )
        .with_attribute(
            "password",
            Attribute::computed_string()
                .with_description("Password for use with SMTP and POP3")
                .sensitive()
                .use_state_for_unknown(),
        )
}

/// State of a `mailosaur_server` as stored by the host.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerState {
    /// User supplied name.
    #[serde(default)]
    pub name: String,
    /// Id assigned by Mailosaur.
    #[serde(default)]
    pub id: Option<String>,
    /// SMTP/POP3 password.
    #[serde(default)]
    pub password: Option<String>,
    /// Generated email address.
    #[serde(default)]
    pub email: Option<String>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("password", &self.password.as_ref().map(|_| "<sensitive>"))
            .field("email", &self.email)
            .finish()
    }
}

impl ServerState {
    /// Decode a state object sent by the host.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        match value {
            Value::Null => Err(ProviderError::InvalidRequest(format!(
                "missing state for {}",
                RESOURCE_TYPE
            ))),
            other => Ok(serde_json::from_value(other)?),
        }
    }

    /// Encode the state for the host.
    pub fn to_value(&self) -> Result<Value, ProviderError> {
        Ok(serde_json::to_value(self)?)
    }

    /// The id, which every operation but create requires.
    fn require_id(&self) -> Result<&str, ProviderError> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidRequest(format!("{} state has no id", RESOURCE_TYPE))
            })
    }
}

fn is_unset(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

/// Lifecycle handler for `mailosaur_server`.
#[derive(Clone)]
pub struct ServerResource {
    client: Arc<dyn ServersApi>,
}

impl ServerResource {
    /// Create a handler that talks to the given API.
    pub fn new(client: Arc<dyn ServersApi>) -> Self {
        Self { client }
    }

    /// Create the server, then fetch its password and generate an address.
    ///
    /// A failed backfill does not undo the create: the state is returned with
    /// its id and an error diagnostic.
    #[instrument(skip(self, planned), fields(name = %planned.name))]
    pub async fn create(&self, planned: ServerState) -> Result<ApplyResult, ProviderError> {
        let server = self
            .client
            .create(&ServerCreateOptions::new(planned.name.clone()))
            .await
            .map_err(|e| ProviderError::client("create server", e))?;
        info!(server_id = %server.id, "Created server");

        let mut state = ServerState {
            name: server.name,
            id: Some(server.id.clone()),
            password: None,
            email: None,
        };
        let diagnostics = self.backfill(&server.id, &mut state).await;
        finish(&state, diagnostics)
    }

    /// Refresh the state from the remote server.
    #[instrument(skip(self, current), fields(server_id = ?current.id))]
    pub async fn read(&self, current: ServerState) -> Result<ApplyResult, ProviderError> {
        let id = current.require_id()?;
        let server = self
            .client
            .get(id)
            .await
            .map_err(|e| ProviderError::client("read server", e))?;
        debug!("Read server");

        let mut state = current.clone();
        state.name = server.name;
        let diagnostics = self.backfill(&server.id, &mut state).await;
        finish(&state, diagnostics)
    }

    /// Rename the server. Only `name` is pushed; other remote fields are kept.
    #[instrument(skip(self, planned), fields(server_id = ?planned.id, name = %planned.name))]
    pub async fn update(&self, planned: ServerState) -> Result<ApplyResult, ProviderError> {
        let id = planned.require_id()?.to_string();
        let mut server: Server = self
            .client
            .get(&id)
            .await
            .map_err(|e| ProviderError::client("read server", e))?;

        server.name = planned.name.clone();
        let updated = self
            .client
            .update(&id, &server)
            .await
            .map_err(|e| ProviderError::client("update server", e))?;
        info!("Updated server");

        let mut state = planned;
        state.name = updated.name;
        let diagnostics = self.backfill(&id, &mut state).await;
        finish(&state, diagnostics)
    }

    /// Delete the server.
    #[instrument(skip(self, current), fields(server_id = ?current.id))]
    pub async fn delete(&self, current: ServerState) -> Result<(), ProviderError> {
        let id = current.require_id()?;
        self.client
            .delete(id)
            .await
            .map_err(|e| ProviderError::client("delete server", e))?;
        info!("Deleted server");
        Ok(())
    }

    /// Build state for an existing server from its id.
    ///
    /// Password and email are left unset; the host's follow-up read fills them.
    #[instrument(skip(self))]
    pub async fn import(&self, id: &str) -> Result<ServerState, ProviderError> {
        let server = self
            .client
            .get(id)
            .await
            .map_err(|e| ProviderError::client("read server", e))?;
        Ok(ServerState {
            name: server.name,
            id: Some(server.id),
            password: None,
            email: None,
        })
    }

    async fn backfill(&self, id: &str, state: &mut ServerState) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if is_unset(&state.password) {
            match self.client.get_password(id).await {
                Ok(password) => state.password = Some(password),
                Err(e) => {
                    warn!(error = %e, "Unable to read server password");
                    diagnostics
                        .push(ProviderError::client("read password of server", e).to_diagnostic());
                },
            }
        }

        if is_unset(&state.email) {
            match self.client.generate_email_address(id).await {
                Ok(email) => state.email = Some(email),
                Err(e) => {
                    warn!(error = %e, "Unable to generate server email address");
                    diagnostics.push(
                        ProviderError::client("generate email address for server", e)
                            .to_diagnostic(),
                    );
                },
            }
        }

        diagnostics
    }
}

fn finish(state: &ServerState, diagnostics: Vec<Diagnostic>) -> Result<ApplyResult, ProviderError> {
    Ok(ApplyResult::with_diagnostics(state.to_value()?, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeServers, ServersOp};
    use serde_json::json;

    fn resource() -> (Arc<FakeServers>, ServerResource) {
        let fake = Arc::new(FakeServers::new());
        let resource = ServerResource::new(fake.clone());
        (fake, resource)
    }

    fn planned(name: &str) -> ServerState {
        ServerState {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_schema_shape() {
        let schema = server_schema();
        assert!(schema.attribute("name").unwrap().flags.required);
        for computed in ["id", "email", "password"] {
            let attr = schema.attribute(computed).unwrap();
            assert!(attr.flags.computed, "{} should be computed", computed);
            assert!(!attr.force_new);
        }
        assert!(schema.attribute("password").unwrap().flags.sensitive);
        assert!(!schema.attribute("email").unwrap().flags.sensitive);
    }

    #[test]
    fn test_state_decoding() {
        let state = ServerState::from_value(json!({"name": "one", "id": "abc"})).unwrap();
        assert_eq!(state.id.as_deref(), Some("abc"));
        assert!(state.password.is_none());

        assert!(ServerState::from_value(Value::Null).is_err());

        let encoded = state.to_value().unwrap();
        assert!(encoded["password"].is_null());
        assert!(encoded.get("email").is_some());
    }

    #[test]
    fn test_debug_hides_password() {
        let state = ServerState {
            password: Some("s3cret".to_string()),
            ..planned("one")
        };
        assert!(!format!("{:?}", state).contains("s3cret"));
    }

    #[tokio::test]
    async fn test_create_populates_computed_fields() {
        let (fake, resource) = resource();
        let result = resource.create(planned("one")).await.unwrap();

        assert!(!result.has_errors());
        let state = ServerState::from_value(result.state).unwrap();
        assert_eq!(state.name, "one");
        let id = state.id.clone().unwrap();
        assert!(!id.is_empty());
        assert!(!state.password.unwrap().is_empty());
        assert!(state.email.unwrap().contains(&id));
        assert!(fake.contains(&id).await);
        assert_eq!(fake.calls(ServersOp::GetPassword).await, 1);
        assert_eq!(fake.calls(ServersOp::GenerateEmailAddress).await, 1);
    }

    #[tokio::test]
    async fn test_create_failure_returns_error() {
        let (fake, resource) = resource();
        fake.fail(ServersOp::Create).await;

        let err = resource.create(planned("one")).await.unwrap_err();
        match err {
            ProviderError::Client { operation, .. } => assert_eq!(operation, "create server"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fake.calls(ServersOp::GetPassword).await, 0);
    }

    #[tokio::test]
    async fn test_create_keeps_id_when_password_fails() {
        let (fake, resource) = resource();
        fake.fail(ServersOp::GetPassword).await;

        let result = resource.create(planned("one")).await.unwrap();
        assert!(result.has_errors());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].summary, "Client Error");
        assert!(result.diagnostics[0]
            .detail
            .as_deref()
            .unwrap()
            .starts_with("Unable to read password of server"));

        let state = ServerState::from_value(result.state).unwrap();
        let id = state.id.unwrap();
        assert!(fake.contains(&id).await);
        assert!(state.password.is_none());
        assert!(state.email.is_some());
    }

    #[tokio::test]
    async fn test_create_keeps_id_when_email_generation_fails() {
        let (fake, resource) = resource();
        fake.fail(ServersOp::GenerateEmailAddress).await;

        let result = resource.create(planned("one")).await.unwrap();
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].summary, "Client Error");
        assert!(result.diagnostics[0]
            .detail
            .as_deref()
            .unwrap()
            .starts_with("Unable to generate email address for server, got error:"));

        let state = ServerState::from_value(result.state).unwrap();
        assert!(fake.contains(state.id.as_deref().unwrap()).await);
        assert!(state.password.is_some());
        assert!(state.email.is_none());
    }

    #[tokio::test]
    async fn test_read_returns_refreshed_state_when_backfill_fails() {
        let (fake, resource) = resource();
        let created = resource.create(planned("one")).await.unwrap();
        let full = ServerState::from_value(created.state).unwrap();
        fake.rename(full.id.as_deref().unwrap(), "renamed").await;
        fake.fail(ServersOp::GetPassword).await;

        let result = resource
            .read(ServerState {
                password: None,
                ..full.clone()
            })
            .await
            .unwrap();
        assert!(result.has_errors());
        assert!(result.diagnostics[0]
            .detail
            .as_deref()
            .unwrap()
            .starts_with("Unable to read password of server"));

        let state = ServerState::from_value(result.state).unwrap();
        assert_eq!(state.name, "renamed");
        assert_eq!(state.id, full.id);
        assert_eq!(state.email, full.email);
        assert!(state.password.is_none());
    }

    #[tokio::test]
    async fn test_read_backfills_only_unset_fields() {
        let (fake, resource) = resource();
        let created = resource.create(planned("one")).await.unwrap();
        let full = ServerState::from_value(created.state).unwrap();
        fake.reset_calls().await;

        let result = resource.read(full.clone()).await.unwrap();
        assert_eq!(ServerState::from_value(result.state).unwrap(), full);
        assert_eq!(fake.calls(ServersOp::Get).await, 1);
        assert_eq!(fake.calls(ServersOp::GetPassword).await, 0);
        assert_eq!(fake.calls(ServersOp::GenerateEmailAddress).await, 0);

        let bare = ServerState {
            password: None,
            email: Some(String::new()),
            ..full.clone()
        };
        let result = resource.read(bare).await.unwrap();
        let state = ServerState::from_value(result.state).unwrap();
        assert_eq!(state.password, full.password);
        assert!(!is_unset(&state.email));
        assert_eq!(fake.calls(ServersOp::GetPassword).await, 1);
        assert_eq!(fake.calls(ServersOp::GenerateEmailAddress).await, 1);
    }

    #[tokio::test]
    async fn test_read_refreshes_name() {
        let (fake, resource) = resource();
        let created = resource.create(planned("one")).await.unwrap();
        let state = ServerState::from_value(created.state).unwrap();
        fake.rename(state.id.as_deref().unwrap(), "renamed").await;

        let result = resource.read(state).await.unwrap();
        assert_eq!(result.state["name"], "renamed");
    }

    #[tokio::test]
    async fn test_read_missing_server_errors() {
        let (_fake, resource) = resource();
        let state = ServerState {
            id: Some("gone".to_string()),
            ..planned("one")
        };
        let err = resource.read(state).await.unwrap_err();
        assert!(matches!(err, ProviderError::Client { ref operation, .. } if operation == "read server"));
    }

    #[tokio::test]
    async fn test_operations_require_id() {
        let (fake, resource) = resource();
        assert!(matches!(
            resource.read(planned("one")).await.unwrap_err(),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            resource.update(planned("one")).await.unwrap_err(),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            resource.delete(planned("one")).await.unwrap_err(),
            ProviderError::InvalidRequest(_)
        ));
        assert_eq!(fake.calls(ServersOp::Get).await, 0);
        assert_eq!(fake.calls(ServersOp::Delete).await, 0);
    }

    #[tokio::test]
    async fn test_update_renames_and_preserves_computed() {
        let (fake, resource) = resource();
        let created = resource.create(planned("one")).await.unwrap();
        let before = ServerState::from_value(created.state).unwrap();
        fake.reset_calls().await;

        let result = resource
            .update(ServerState {
                name: "two".to_string(),
                ..before.clone()
            })
            .await
            .unwrap();
        let after = ServerState::from_value(result.state).unwrap();

        assert_eq!(after.name, "two");
        assert_eq!(after.id, before.id);
        assert_eq!(after.password, before.password);
        assert_eq!(after.email, before.email);
        assert_eq!(fake.calls(ServersOp::Get).await, 1);
        assert_eq!(fake.calls(ServersOp::Update).await, 1);
        assert_eq!(fake.calls(ServersOp::GetPassword).await, 0);

        let remote = fake.server(before.id.as_deref().unwrap()).await.unwrap();
        assert_eq!(remote.name, "two");
    }

    #[tokio::test]
    async fn test_update_failure_is_client_error() {
        let (fake, resource) = resource();
        let created = resource.create(planned("one")).await.unwrap();
        let state = ServerState::from_value(created.state).unwrap();
        fake.fail(ServersOp::Update).await;

        let err = resource
            .update(ServerState {
                name: "two".to_string(),
                ..state
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Client { ref operation, .. } if operation == "update server"));
    }

    #[tokio::test]
    async fn test_update_of_deleted_server_fails_on_read() {
        let (fake, resource) = resource();
        let created = resource.create(planned("one")).await.unwrap();
        let state = ServerState::from_value(created.state).unwrap();
        resource.delete(state.clone()).await.unwrap();
        fake.reset_calls().await;

        let err = resource
            .update(ServerState {
                name: "two".to_string(),
                ..state
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Client { ref operation, .. } if operation == "read server"));
        assert_eq!(fake.calls(ServersOp::Get).await, 1);
        assert_eq!(fake.calls(ServersOp::Update).await, 0);
    }

    #[tokio::test]
    async fn test_delete_removes_remote_server() {
        let (fake, resource) = resource();
        let created = resource.create(planned("one")).await.unwrap();
        let state = ServerState::from_value(created.state).unwrap();
        let id = state.id.clone().unwrap();

        resource.delete(state.clone()).await.unwrap();
        assert!(!fake.contains(&id).await);
        assert!(resource.read(state.clone()).await.is_err());

        let err = resource.delete(state).await.unwrap_err();
        assert!(matches!(err, ProviderError::Client { ref operation, .. } if operation == "delete server"));
    }

    #[tokio::test]
    async fn test_import_leaves_secrets_for_read() {
        let (fake, resource) = resource();
        let created = resource.create(planned("one")).await.unwrap();
        let id = created.state["id"].as_str().unwrap().to_string();
        fake.reset_calls().await;

        let imported = resource.import(&id).await.unwrap();
        assert_eq!(imported.name, "one");
        assert_eq!(imported.id.as_deref(), Some(id.as_str()));
        assert!(imported.password.is_none());
        assert_eq!(fake.calls(ServersOp::GetPassword).await, 0);
    }
}
