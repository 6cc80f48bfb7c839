//! gRPC server and the `ProviderService` trait.
//!
//! The host talks the generated `Provider` gRPC service; this module adapts it
//! onto [`ProviderService`], which works in plain `serde_json::Value`s.
//! Provider failures never become gRPC errors: they are reported to the host
//! as error diagnostics in the response.
//!
//! # Signal Handling
//!
//! On SIGTERM or SIGINT the server stops accepting connections, waits for
//! in-flight requests up to [`ServeOptions::shutdown_timeout`], then calls
//! [`ProviderService::stop`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated as pb;
use crate::schema::{has_errors, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{
    ApplyResult, ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX,
    PROTOCOL_VERSION,
};

/// Operations a provider answers.
///
/// Create, read and update return an [`ApplyResult`] so that a partially
/// applied resource can be reported together with its diagnostics.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Return the provider's schema including all resources.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata. Derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
            capabilities: Default::default(),
        }
    }

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with credentials and settings.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade resource state from an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value)
        -> Result<ApplyResult, ProviderError>;

    /// Read the current state of a resource.
    async fn read(&self, resource_type: &str, current_state: Value)
        -> Result<ApplyResult, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::InvalidRequest(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    /// Read data from an external source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!(
            "Unknown data source type: {}",
            data_source_type
        )))
    }
}

/// Adapter from the generated gRPC trait to a [`ProviderService`].
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

fn decode(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

fn encode(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<pb::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| pb::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => pb::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => pb::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_proto(err: &ProviderError) -> Vec<pb::Diagnostic> {
    diagnostics_to_proto(vec![err.to_diagnostic()])
}

fn schema_to_proto(schema: &Schema) -> pb::Schema {
    pb::Schema {
        version: schema.version as i64,
        block: Some(pb::Block {
            attributes: schema
                .block
                .attributes
                .iter()
                .map(|(name, attr)| pb::Attribute {
                    name: name.clone(),
                    r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
                    required: attr.flags.required,
                    optional: attr.flags.optional,
                    computed: attr.flags.computed,
                    sensitive: attr.flags.sensitive,
                    description: attr.description.clone().unwrap_or_default(),
                    force_new: attr.force_new,
                    default_value: Vec::new(),
                })
                .collect(),
            block_types: Vec::new(),
            description: schema.block.description.clone().unwrap_or_default(),
        }),
    }
}

/// Log and convert the diagnostics of a validate/configure call.
fn report(operation: &str, outcome: Result<Vec<Diagnostic>, ProviderError>) -> Vec<pb::Diagnostic> {
    match outcome {
        Ok(diagnostics) => {
            if has_errors(&diagnostics) {
                warn!(diagnostics = diagnostics.len(), "{} completed with errors", operation);
            } else {
                info!("{} completed successfully", operation);
            }
            diagnostics_to_proto(diagnostics)
        },
        Err(e) => {
            error!(error = %e, "{} failed", operation);
            error_to_proto(&e)
        },
    }
}

/// Log and convert the result of a create/read/update call.
fn apply_to_proto(
    operation: &str,
    resource_type: &str,
    outcome: Result<ApplyResult, ProviderError>,
) -> (Vec<u8>, Vec<pb::Diagnostic>) {
    match outcome {
        Ok(result) => {
            if result.has_errors() {
                warn!(%resource_type, diagnostics = result.diagnostics.len(), "{} completed with errors", operation);
            } else {
                debug!(%resource_type, "{} completed successfully", operation);
            }
            (encode(&result.state), diagnostics_to_proto(result.diagnostics))
        },
        Err(e) => {
            error!(%resource_type, error = %e, "{} failed", operation);
            (Vec::new(), error_to_proto(&e))
        },
    }
}

#[tonic::async_trait]
impl<P: ProviderService> pb::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: Request<pb::GetMetadataRequest>,
    ) -> Result<Response<pb::GetMetadataResponse>, Status> {
        let metadata = self.provider.metadata();
        debug!(resources = metadata.resources.len(), "GetMetadata completed");
        Ok(Response::new(pb::GetMetadataResponse {
            server_capabilities: Some(pb::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: Request<pb::GetSchemaRequest>,
    ) -> Result<Response<pb::GetSchemaResponse>, Status> {
        let schema = self.provider.schema();
        debug!(resources = schema.resources.len(), "GetSchema completed");
        Ok(Response::new(pb::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<pb::ValidateProviderConfigRequest>,
    ) -> Result<Response<pb::ValidateProviderConfigResponse>, Status> {
        let config = decode(&request.into_inner().config);
        let outcome = self.provider.validate_provider_config(config).await;
        Ok(Response::new(pb::ValidateProviderConfigResponse {
            diagnostics: report("ValidateProviderConfig", outcome),
        }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(
        &self,
        request: Request<pb::ConfigureRequest>,
    ) -> Result<Response<pb::ConfigureResponse>, Status> {
        let config = decode(&request.into_inner().config);
        let outcome = self.provider.configure(config).await;
        Ok(Response::new(pb::ConfigureResponse {
            diagnostics: report("Configure", outcome),
        }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(
        &self,
        _request: Request<pb::StopRequest>,
    ) -> Result<Response<pb::StopResponse>, Status> {
        info!("Stop called");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(Response::new(pb::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config", fields(resource_type = tracing::field::Empty))]
    async fn validate_resource_config(
        &self,
        request: Request<pb::ValidateResourceConfigRequest>,
    ) -> Result<Response<pb::ValidateResourceConfigResponse>, Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let outcome = self
            .provider
            .validate_resource_config(&req.resource_type, decode(&req.config))
            .await;
        Ok(Response::new(pb::ValidateResourceConfigResponse {
            diagnostics: report("ValidateResourceConfig", outcome),
        }))
    }

    #[instrument(skip_all, name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: Request<pb::UpgradeResourceStateRequest>,
    ) -> Result<Response<pb::UpgradeResourceStateResponse>, Status> {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, version = req.version, "UpgradeResourceState called");

        let response = match self
            .provider
            .upgrade_resource_state(&req.resource_type, req.version, decode(&req.raw_state))
            .await
        {
            Ok(upgraded) => pb::UpgradeResourceStateResponse {
                upgraded_state: encode(&upgraded),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "UpgradeResourceState failed");
                pb::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.plan")]
    async fn plan(
        &self,
        request: Request<pb::PlanRequest>,
    ) -> Result<Response<pb::PlanResponse>, Status> {
        let req = request.into_inner();
        let prior_state = if req.prior_state.is_empty() {
            None
        } else {
            Some(decode(&req.prior_state))
        };
        debug!(resource_type = %req.resource_type, is_create = prior_state.is_none(), "Plan called");

        let response = match self
            .provider
            .plan(
                &req.resource_type,
                prior_state,
                decode(&req.proposed_state),
                decode(&req.config),
            )
            .await
        {
            Ok(result) => {
                info!(
                    resource_type = %req.resource_type,
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Plan completed"
                );
                pb::PlanResponse {
                    planned_state: encode(&result.planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Plan failed");
                pb::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create")]
    async fn create(
        &self,
        request: Request<pb::CreateRequest>,
    ) -> Result<Response<pb::CreateResponse>, Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Create called");
        let outcome = self
            .provider
            .create(&req.resource_type, decode(&req.planned_state))
            .await;
        let (state, diagnostics) = apply_to_proto("Create", &req.resource_type, outcome);
        Ok(Response::new(pb::CreateResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.read")]
    async fn read(
        &self,
        request: Request<pb::ReadRequest>,
    ) -> Result<Response<pb::ReadResponse>, Status> {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, "Read called");
        let outcome = self
            .provider
            .read(&req.resource_type, decode(&req.current_state))
            .await;
        let (state, diagnostics) = apply_to_proto("Read", &req.resource_type, outcome);
        Ok(Response::new(pb::ReadResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.update")]
    async fn update(
        &self,
        request: Request<pb::UpdateRequest>,
    ) -> Result<Response<pb::UpdateResponse>, Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Update called");
        let outcome = self
            .provider
            .update(
                &req.resource_type,
                decode(&req.prior_state),
                decode(&req.planned_state),
            )
            .await;
        let (state, diagnostics) = apply_to_proto("Update", &req.resource_type, outcome);
        Ok(Response::new(pb::UpdateResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.delete")]
    async fn delete(
        &self,
        request: Request<pb::DeleteRequest>,
    ) -> Result<Response<pb::DeleteResponse>, Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Delete called");
        let diagnostics = match self
            .provider
            .delete(&req.resource_type, decode(&req.current_state))
            .await
        {
            Ok(()) => {
                info!(resource_type = %req.resource_type, "Delete completed successfully");
                vec![]
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Delete failed");
                error_to_proto(&e)
            },
        };
        Ok(Response::new(pb::DeleteResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: Request<pb::ImportResourceStateRequest>,
    ) -> Result<Response<pb::ImportResourceStateResponse>, Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, id = %req.id, "ImportResourceState called");

        let response = match self
            .provider
            .import_resource(&req.resource_type, &req.id)
            .await
        {
            Ok(imported) => pb::ImportResourceStateResponse {
                imported: imported
                    .into_iter()
                    .map(|r| pb::ImportedResource {
                        state: encode(&r.state),
                        resource_type: r.resource_type,
                    })
                    .collect(),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, id = %req.id, error = %e, "ImportResourceState failed");
                pb::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.validate_data_source_config")]
    async fn validate_data_source_config(
        &self,
        request: Request<pb::ValidateDataSourceConfigRequest>,
    ) -> Result<Response<pb::ValidateDataSourceConfigResponse>, Status> {
        let req = request.into_inner();
        let err = ProviderError::UnknownResource(format!(
            "Unknown data source type: {}",
            req.data_source_type
        ));
        Ok(Response::new(pb::ValidateDataSourceConfigResponse {
            diagnostics: report("ValidateDataSourceConfig", Err(err)),
        }))
    }

    #[instrument(skip_all, name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: Request<pb::ReadDataSourceRequest>,
    ) -> Result<Response<pb::ReadDataSourceResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .provider
            .read_data_source(&req.data_source_type, decode(&req.config))
            .await
        {
            Ok(state) => pb::ReadDataSourceResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(data_source_type = %req.data_source_type, error = %e, "ReadDataSource failed");
                pb::ReadDataSourceResponse {
                    state: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long to wait for in-flight requests after a shutdown signal.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for SIGTERM or SIGINT (CTRL+C elsewhere).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                    _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
                }
                return;
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Unable to install signal handlers, falling back to CTRL+C");
            },
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C, initiating graceful shutdown"),
        Err(e) => {
            error!(error = %e, "Unable to listen for CTRL+C, shutdown only via Stop");
            std::future::pending::<()>().await;
        },
    }
}

/// Serve a provider as a gRPC server on an ephemeral local port.
///
/// Prints the handshake `HEMMER_PROVIDER|<version>|<address>` to stdout, then
/// serves until a shutdown signal arrives.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options. See [`serve`].
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    serve_on_listener(provider, listener, addr, options, wait_for_shutdown_signal()).await
}

/// The handshake line announced on stdout.
pub fn handshake_line(addr: SocketAddr) -> String {
    format!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr)
}

/// Serve until `shutdown` resolves, then give in-flight requests up to
/// [`ServeOptions::shutdown_timeout`] to finish.
async fn serve_on_listener<P, S>(
    provider: P,
    listener: TcpListener,
    addr: SocketAddr,
    options: ServeOptions,
    shutdown: S,
) -> Result<(), Box<dyn std::error::Error>>
where
    P: ProviderService,
    S: Future<Output = ()>,
{
    println!("{}", handshake_line(addr));
    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let grpc_service = ProviderGrpcService {
        provider: Arc::clone(&provider),
    };

    let drain = Arc::new(Notify::new());
    let drain_started = Arc::clone(&drain);
    let mut server = tokio::spawn(
        Server::builder()
            .add_service(pb::provider_server::ProviderServer::new(grpc_service))
            .serve_with_incoming_shutdown(
                tokio_stream::wrappers::TcpListenerStream::new(listener),
                async move { drain_started.notified().await },
            ),
    );

    tokio::select! {
        () = shutdown => {
            drain.notify_one();
            match tokio::time::timeout(options.shutdown_timeout, &mut server).await {
                Ok(exit) => server_exit(exit)?,
                Err(_) => {
                    warn!(
                        timeout = ?options.shutdown_timeout,
                        "Shutdown timeout exceeded, forcing shutdown"
                    );
                    server.abort();
                },
            }
        },
        exit = &mut server => server_exit(exit)?,
    }

    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}

fn server_exit(
    exit: Result<Result<(), tonic::transport::Error>, JoinError>,
) -> Result<(), Box<dyn std::error::Error>> {
    match exit {
        Ok(Ok(())) => {
            info!("Server shutdown complete");
            Ok(())
        },
        Ok(Err(e)) => {
            error!(error = %e, "Server error during shutdown");
            Err(ProviderError::from(e).into())
        },
        Err(e) => {
            error!(error = %e, "Server task failed");
            Err(e.into())
        },
    }
}
