//! Testing utilities for the provider.
//!
//! [`ProviderTester`] drives a `ProviderService` without a gRPC server and
//! [`FakeServers`] stands in for the Mailosaur API.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hemmer_provider_mailosaur::testing::{FakeServers, ProviderTester};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_server() {
//!     let fake = Arc::new(FakeServers::new());
//!     let provider = MailosaurProvider::new()
//!         .with_client_factory(move |_| Ok(fake.clone() as Arc<dyn ServersApi>));
//!     let tester = ProviderTester::new(provider);
//!
//!     tester.configure(json!({"api_key": "test"})).await.unwrap();
//!     let state = tester
//!         .lifecycle_create("mailosaur_server", json!({"name": "inbox"}))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(state["name"], "inbox");
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::client::{
    random_local_part, MailosaurError, Server, ServerCreateOptions, ServersApi, DEFAULT_SMTP_HOST,
};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ApplyResult, ImportedResource, PlanResult};

/// A test harness for `ProviderService` implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the error diagnostics if there are any.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the error diagnostics if there are any.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Upgrade resource state from an older schema version.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    /// Read data from a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read_data_source(data_source_type, config).await
    }

    /// Run plan, create and read, failing on any error diagnostic.
    ///
    /// Returns the state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = applied(self.create(resource_type, plan.planned_state).await?)?;
        applied(self.read(resource_type, created).await?)
    }

    /// Run plan, update and read, failing on any error diagnostic.
    ///
    /// Returns the state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated = applied(
            self.update(resource_type, prior_state, plan.planned_state)
                .await?,
        )?;
        applied(self.read(resource_type, updated).await?)
    }

    /// Run a destroy plan followed by delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }
}

/// Unwrap an apply result, turning its first error diagnostic into an error.
fn applied(result: ApplyResult) -> Result<Value, ProviderError> {
    match result.diagnostics.iter().find(|d| d.is_error()) {
        Some(diag) => Err(ProviderError::InvalidRequest(match &diag.detail {
            Some(detail) => format!("{}: {}", diag.summary, detail),
            None => diag.summary.clone(),
        })),
        None => Ok(result.state),
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan creates the resource.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that a plan does not require replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes the attribute at `path`.
///
/// # Panics
///
/// Panics if no change has the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan leaves the attribute at `path` alone.
///
/// # Panics
///
/// Panics if a change has the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain an error whose summary or detail contains `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let matches = diagnostics.iter().any(|d| {
        matches!(d.severity, DiagnosticSeverity::Error)
            && (d.summary.contains(substring)
                || d.detail.as_deref().is_some_and(|detail| detail.contains(substring)))
    });

    assert!(
        matches,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

// =========================================================================
// In-memory Mailosaur
// =========================================================================

/// A call on [`ServersApi`], used to count calls and inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServersOp {
    /// `create`
    Create,
    /// `get`
    Get,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `get_password`
    GetPassword,
    /// `generate_email_address`
    GenerateEmailAddress,
}

#[derive(Default)]
struct FakeState {
    servers: BTreeMap<String, (Server, String)>,
    next_id: u32,
    calls: HashMap<ServersOp, usize>,
    failing: HashSet<ServersOp>,
}

impl FakeState {
    fn enter(&mut self, op: ServersOp) -> Result<(), MailosaurError> {
        *self.calls.entry(op).or_default() += 1;
        if self.failing.contains(&op) {
            return Err(MailosaurError::Api {
                status: 500,
                message: format!("injected {:?} failure", op),
            });
        }
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<&(Server, String), MailosaurError> {
        self.servers
            .get(id)
            .ok_or_else(|| MailosaurError::NotFound(format!("/api/servers/{}", id)))
    }
}

/// In-memory [`ServersApi`] with call counters and failure injection.
#[derive(Default)]
pub struct FakeServers {
    state: Mutex<FakeState>,
}

impl FakeServers {
    /// An empty account.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `op` fail with a 500.
    pub async fn fail(&self, op: ServersOp) {
        self.state.lock().await.failing.insert(op);
    }

    /// Number of calls of `op` since creation or the last reset.
    pub async fn calls(&self, op: ServersOp) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of calls of any kind.
    pub async fn total_calls(&self) -> usize {
        self.state.lock().await.calls.values().sum()
    }

    /// Zero the call counters.
    pub async fn reset_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Whether a server with `id` exists.
    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.servers.contains_key(id)
    }

    /// Rename a server behind the provider's back.
    pub async fn rename(&self, id: &str, name: &str) {
        if let Some((server, _)) = self.state.lock().await.servers.get_mut(id) {
            server.name = name.to_string();
        }
    }

    /// The stored server with `id`.
    pub async fn server(&self, id: &str) -> Option<Server> {
        self.state
            .lock()
            .await
            .servers
            .get(id)
            .map(|(server, _)| server.clone())
    }
}

#[async_trait]
impl ServersApi for FakeServers {
    async fn create(&self, options: &ServerCreateOptions) -> Result<Server, MailosaurError> {
        let mut state = self.state.lock().await;
        state.enter(ServersOp::Create)?;
        state.next_id += 1;
        let id = format!("srv{:04}", state.next_id);
        let server = Server {
            id: id.clone(),
            name: options.name.clone(),
            ..Default::default()
        };
        let password = format!("pw-{}", random_local_part());
        state.servers.insert(id, (server.clone(), password));
        Ok(server)
    }

    async fn get(&self, id: &str) -> Result<Server, MailosaurError> {
        let mut state = self.state.lock().await;
        state.enter(ServersOp::Get)?;
        Ok(state.lookup(id)?.0.clone())
    }

    async fn update(&self, id: &str, server: &Server) -> Result<Server, MailosaurError> {
        let mut state = self.state.lock().await;
        state.enter(ServersOp::Update)?;
        let stored = match state.servers.get_mut(id) {
            Some((stored, _)) => stored,
            None => return Err(MailosaurError::NotFound(format!("/api/servers/{}", id))),
        };
        stored.name = server.name.clone();
        stored.users = server.users.clone();
        Ok(stored.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), MailosaurError> {
        let mut state = self.state.lock().await;
        state.enter(ServersOp::Delete)?;
        state.lookup(id)?;
        state.servers.remove(id);
        Ok(())
    }

    async fn get_password(&self, id: &str) -> Result<String, MailosaurError> {
        let mut state = self.state.lock().await;
        state.enter(ServersOp::GetPassword)?;
        Ok(state.lookup(id)?.1.clone())
    }

    async fn generate_email_address(&self, id: &str) -> Result<String, MailosaurError> {
        let mut state = self.state.lock().await;
        state.enter(ServersOp::GenerateEmailAddress)?;
        Ok(format!("{}@{}.{}", random_local_part(), id, DEFAULT_SMTP_HOST))
    }
}
