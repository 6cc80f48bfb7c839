//! The Mailosaur provider.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::{MailosaurClient, ServersApi};
use crate::config::{ProviderConfig, API_KEY_ENV};
use crate::error::ProviderError;
use crate::plan::plan_resource;
use crate::resources::server::{server_schema, ServerResource, ServerState, RESOURCE_TYPE};
use crate::schema::{Attribute, Diagnostic, ProviderSchema, Schema};
use crate::server::ProviderService;
use crate::types::{
    ApplyResult, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
};
use crate::validation::validate;

/// Builds the API client once configuration is resolved.
pub type ClientFactory =
    dyn Fn(&ProviderConfig) -> Result<Arc<dyn ServersApi>, ProviderError> + Send + Sync;

/// Environment lookup used for configuration fallbacks.
pub type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Schema of the provider block.
pub fn provider_config_schema() -> Schema {
    Schema::v0()
        .with_description("Provider for resource management in Mailosaur")
        .with_attribute(
            "api_key",
            Attribute::optional_string()
                .with_description(format!(
                    "Api key for access to Mailosaur. You can use env var {} to set this attribute",
                    API_KEY_ENV
                ))
                .sensitive(),
        )
}

fn http_client(config: &ProviderConfig) -> Result<Arc<dyn ServersApi>, ProviderError> {
    let client = MailosaurClient::builder(config.api_key.as_str())
        .base_url(config.base_url.as_str())
        .smtp_host(config.smtp_host.as_str())
        .build()
        .map_err(|e| {
            ProviderError::Configuration(format!("unable to create Mailosaur client: {}", e))
        })?;
    Ok(Arc::new(client))
}

/// Provider serving the `mailosaur_server` resource.
///
/// Holds nothing but the API client, set once by `configure` and shared
/// read-only by every resource operation afterwards.
pub struct MailosaurProvider {
    client: RwLock<Option<Arc<dyn ServersApi>>>,
    client_factory: Box<ClientFactory>,
    env: Box<EnvLookup>,
}

impl Default for MailosaurProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MailosaurProvider {
    /// A provider that talks to the Mailosaur API and reads the process environment.
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            client_factory: Box::new(http_client),
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    /// Replace how the API client is built.
    pub fn with_client_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn ServersApi>, ProviderError> + Send + Sync + 'static,
    {
        self.client_factory = Box::new(factory);
        self
    }

    /// Replace the environment lookup.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(env);
        self
    }

    /// Whether `configure` has succeeded.
    pub async fn is_configured(&self) -> bool {
        self.client.read().await.is_some()
    }

    async fn server_resource(&self, resource_type: &str) -> Result<ServerResource, ProviderError> {
        ensure_known(resource_type)?;
        let client = self.client.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration(format!(
                "provider is not configured; set api_key or {}",
                API_KEY_ENV
            ))
        })?;
        Ok(ServerResource::new(client))
    }
}

fn ensure_known(resource_type: &str) -> Result<(), ProviderError> {
    if resource_type == RESOURCE_TYPE {
        Ok(())
    } else {
        Err(ProviderError::UnknownResource(resource_type.to_string()))
    }
}

#[async_trait::async_trait]
impl ProviderService for MailosaurProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(provider_config_schema())
            .with_resource(RESOURCE_TYPE, server_schema())
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: vec![RESOURCE_TYPE.to_string()],
            data_sources: vec![],
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&provider_config_schema(), &config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut client = self.client.write().await;
        // A failed configure must not leave an earlier client in use.
        *client = None;

        let resolved = match ProviderConfig::resolve(&config, |key| (self.env)(key)) {
            Ok(resolved) => resolved,
            Err(e @ ProviderError::Configuration(_)) => {
                warn!(reason = e.message(), "Provider configuration rejected");
                return Ok(vec![Diagnostic::error(format!("Unable to find {}", API_KEY_ENV))
                    .with_detail("Api Key cannot be an empty string")
                    .with_attribute("api_key")]);
            },
            Err(e) => return Err(e),
        };

        *client = Some((self.client_factory)(&resolved)?);
        info!(base_url = %resolved.base_url, "Mailosaur client configured");
        Ok(vec![])
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        ensure_known(resource_type)?;
        Ok(validate(&server_schema(), &config))
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        ensure_known(resource_type)?;
        let current = server_schema().version as i64;
        if version > current {
            return Err(ProviderError::InvalidRequest(format!(
                "state version {} is newer than schema version {}",
                version, current
            )));
        }
        Ok(state)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        ensure_known(resource_type)?;
        plan_resource(&server_schema(), prior_state.as_ref(), &proposed_state)
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<ApplyResult, ProviderError> {
        let resource = self.server_resource(resource_type).await?;
        resource.create(ServerState::from_value(planned_state)?).await
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<ApplyResult, ProviderError> {
        let resource = self.server_resource(resource_type).await?;
        resource.read(ServerState::from_value(current_state)?).await
    }

    async fn update(
        &self,
        resource_type: &str,
        _prior_state: Value,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        let resource = self.server_resource(resource_type).await?;
        resource.update(ServerState::from_value(planned_state)?).await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.server_resource(resource_type).await?;
        resource.delete(ServerState::from_value(current_state)?).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.server_resource(resource_type).await?;
        let state = resource.import(id).await?;
        Ok(vec![ImportedResource::new(resource_type, state.to_value()?)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        assert_error_contains, assert_plan_changes_attribute, assert_plan_creates,
        assert_plan_does_not_change_attribute, assert_plan_updates_in_place, FakeServers,
        ProviderTester, ServersOp, TestError,
    };
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn fake_provider() -> (Arc<FakeServers>, ProviderTester<MailosaurProvider>) {
        let fake = Arc::new(FakeServers::new());
        let for_factory = fake.clone();
        let provider = MailosaurProvider::new()
            .with_env(no_env)
            .with_client_factory(move |_| Ok(for_factory.clone() as Arc<dyn ServersApi>));
        (fake, ProviderTester::new(provider))
    }

    async fn configured() -> (Arc<FakeServers>, ProviderTester<MailosaurProvider>) {
        let (fake, tester) = fake_provider();
        tester.configure(json!({"api_key": "test-key"})).await.unwrap();
        (fake, tester)
    }

    #[test]
    fn test_schema() {
        let provider = MailosaurProvider::new();
        let schema = provider.schema();
        assert!(schema.provider.attribute("api_key").unwrap().flags.optional);
        assert!(schema.provider.attribute("api_key").unwrap().flags.sensitive);
        assert_eq!(schema.resources.len(), 1);
        assert!(schema.resources.contains_key("mailosaur_server"));
        assert!(schema.data_sources.is_empty());
        let metadata = provider.metadata();
        assert_eq!(metadata.resources, vec!["mailosaur_server"]);
        assert!(metadata.capabilities.plan_destroy);
    }

    #[tokio::test]
    async fn test_configure_with_env_fallback() {
        let fake = Arc::new(FakeServers::new());
        let provider = MailosaurProvider::new()
            .with_env(|key| (key == API_KEY_ENV).then(|| "from-env".to_string()))
            .with_client_factory(move |config| {
                assert_eq!(config.api_key, "from-env");
                Ok(fake.clone() as Arc<dyn ServersApi>)
            });
        let tester = ProviderTester::new(provider);

        tester.configure(json!({})).await.unwrap();
        assert!(tester.provider().is_configured().await);
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_remote_calls() {
        let (fake, tester) = fake_provider();

        match tester.configure(json!({"api_key": null})).await.unwrap_err() {
            TestError::Diagnostics(diagnostics) => {
                assert_error_contains(&diagnostics, "MAILOSAUR_API_KEY");
                assert_eq!(diagnostics[0].attribute.as_deref(), Some("api_key"));
            },
            other => panic!("unexpected error: {}", other),
        }
        assert!(!tester.provider().is_configured().await);

        let err = tester
            .create("mailosaur_server", json!({"name": "one"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert_eq!(fake.total_calls().await, 0);
    }

    #[tokio::test]
    async fn test_failed_reconfigure_drops_previous_client() {
        let (fake, tester) = configured().await;
        assert!(tester.provider().is_configured().await);

        assert!(tester.configure(json!({"api_key": ""})).await.is_err());
        assert!(!tester.provider().is_configured().await);

        let err = tester
            .read("mailosaur_server", json!({"name": "one", "id": "srv0001"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert_eq!(fake.total_calls().await, 0);
    }

    #[tokio::test]
    async fn test_failed_client_factory_leaves_provider_unconfigured() {
        let fake = Arc::new(FakeServers::new());
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        let provider = MailosaurProvider::new()
            .with_env(no_env)
            .with_client_factory(move |_| {
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    Ok(fake.clone() as Arc<dyn ServersApi>)
                } else {
                    Err(ProviderError::Configuration("bad base url".to_string()))
                }
            });
        let tester = ProviderTester::new(provider);

        assert_ok!(tester.configure(json!({"api_key": "first"})).await);
        assert_err!(tester.configure(json!({"api_key": "second"})).await);
        assert!(!tester.provider().is_configured().await);
    }

    #[tokio::test]
    async fn test_validate_configs() {
        let (_fake, tester) = fake_provider();
        assert_ok!(tester.validate_provider_config(json!({})).await);
        assert_err!(tester.validate_provider_config(json!({"api_key": 42})).await);

        assert_ok!(
            tester
                .validate_resource_config("mailosaur_server", json!({"name": "one"}))
                .await
        );
        assert_err!(
            tester
                .validate_resource_config("mailosaur_server", json!({}))
                .await
        );
        assert!(matches!(
            tester
                .validate_resource_config("mailosaur_inbox", json!({"name": "one"}))
                .await
                .unwrap_err(),
            TestError::Provider(ProviderError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let (_fake, tester) = configured().await;
        let err = tester
            .create("mailosaur_inbox", json!({"name": "one"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = tester
            .plan_create("mailosaur_inbox", json!({"name": "one"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_plans() {
        let (_fake, tester) = configured().await;
        let plan = tester
            .plan_create("mailosaur_server", json!({"name": "one"}))
            .await
            .unwrap();
        assert_plan_creates(&plan);

        let prior = json!({"name": "one", "id": "a", "email": "x@a.mailosaur.net", "password": "p"});
        let plan = tester
            .plan_update("mailosaur_server", prior, json!({"name": "two"}))
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "name");
        assert_plan_does_not_change_attribute(&plan, "id");
        assert_plan_does_not_change_attribute(&plan, "password");
        assert_eq!(plan.planned_state["email"], "x@a.mailosaur.net");
    }

    #[tokio::test]
    async fn test_create_update_delete_lifecycle() {
        let (fake, tester) = configured().await;

        let created = tester
            .lifecycle_create("mailosaur_server", json!({"name": "one"}))
            .await
            .unwrap();
        assert_eq!(created["name"], "one");
        for computed in ["id", "password", "email"] {
            assert!(
                !created[computed].as_str().unwrap_or_default().is_empty(),
                "{} should be set",
                computed
            );
        }

        let updated = tester
            .lifecycle_update("mailosaur_server", created.clone(), json!({"name": "two"}))
            .await
            .unwrap();
        assert_eq!(updated["name"], "two");
        assert_eq!(updated["id"], created["id"]);
        assert_eq!(updated["password"], created["password"]);
        assert_eq!(updated["email"], created["email"]);

        let id = updated["id"].as_str().unwrap().to_string();
        tester
            .lifecycle_delete("mailosaur_server", updated.clone())
            .await
            .unwrap();
        assert!(!fake.contains(&id).await);

        let err = tester.read("mailosaur_server", updated).await.unwrap_err();
        assert!(matches!(err, ProviderError::Client { .. }));
    }

    #[tokio::test]
    async fn test_read_backfills_once() {
        let (fake, tester) = configured().await;
        let created = tester
            .create("mailosaur_server", json!({"name": "one"}))
            .await
            .unwrap();
        let mut state = created.state;
        state["password"] = Value::Null;
        state["email"] = Value::Null;
        fake.reset_calls().await;

        let refreshed = tester.read("mailosaur_server", state).await.unwrap();
        assert_eq!(fake.calls(ServersOp::GetPassword).await, 1);
        assert_eq!(fake.calls(ServersOp::GenerateEmailAddress).await, 1);

        tester
            .read("mailosaur_server", refreshed.state)
            .await
            .unwrap();
        assert_eq!(fake.calls(ServersOp::GetPassword).await, 1);
        assert_eq!(fake.calls(ServersOp::GenerateEmailAddress).await, 1);
        assert_eq!(fake.calls(ServersOp::Get).await, 2);
    }

    #[tokio::test]
    async fn test_import_then_read() {
        let (fake, tester) = configured().await;
        let created = tester
            .create("mailosaur_server", json!({"name": "one"}))
            .await
            .unwrap();
        let id = created.state["id"].as_str().unwrap().to_string();
        fake.reset_calls().await;

        let imported = tester.import_resource("mailosaur_server", &id).await.unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, "mailosaur_server");
        assert!(imported[0].state["password"].is_null());

        let read = tester
            .read("mailosaur_server", imported[0].state.clone())
            .await
            .unwrap();
        assert!(read.state["password"].is_string());
        assert_eq!(fake.calls(ServersOp::GetPassword).await, 1);
    }

    #[tokio::test]
    async fn test_upgrade_state() {
        let (_fake, tester) = configured().await;
        let state = json!({"name": "one", "id": "a"});
        let upgraded = tester
            .upgrade_resource_state("mailosaur_server", 0, state.clone())
            .await
            .unwrap();
        assert_eq!(upgraded, state);

        let err = tester
            .upgrade_resource_state("mailosaur_server", 3, state)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_no_data_sources() {
        let (_fake, tester) = configured().await;
        let err = tester
            .read_data_source("mailosaur_server", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }
}
