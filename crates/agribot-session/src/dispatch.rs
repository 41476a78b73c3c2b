//! Tool dispatch: validating and executing model-issued tool calls
//!
//! Requests within one batch run concurrently across tool names but
//! sequentially within a name, so responses for the same tool keep their
//! arrival order. Each result is delivered exactly once onto the
//! orchestrator's serialized event path; a provider failure is scoped to
//! its own request and sends no tool response.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agribot_live::{GeoPoint, ToolCallRequest, ToolDeclaration, ToolPayload};

/// A failure inside an external data provider, scoped to one request
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Per-session context handed to tool invocations
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Contextual default location for weather lookups, if geolocation
    /// succeeded at session start
    pub location: Option<GeoPoint>,
    /// The farmer's home district, used when a price lookup names none
    pub district: Option<String>,
}

/// An external data provider callable by the model
#[async_trait]
pub trait DataTool: Send + Sync {
    /// Tool name as declared to the model
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments
    fn parameters_schema(&self) -> serde_json::Value;

    /// Invoke the provider.
    async fn call(
        &self,
        arguments: serde_json::Value,
        context: ToolContext,
        cancel: CancellationToken,
    ) -> Result<ToolPayload, ProviderError>;
}

/// Type alias for a shared tool
pub type BoxedDataTool = Arc<dyn DataTool>;

/// Outcome of one dispatched request, delivered back onto the serialized
/// event path
#[derive(Debug)]
pub enum ToolEvent {
    Completed {
        id: String,
        name: String,
        payload: ToolPayload,
    },
    Failed {
        id: String,
        name: String,
        message: String,
    },
}

/// Validates and executes tool-call batches
pub struct ToolDispatcher {
    tools: Vec<BoxedDataTool>,
    /// Compiled JSON schema validators keyed by tool name
    validators: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolDispatcher {
    pub fn new(tools: Vec<BoxedDataTool>) -> Self {
        let mut validators = HashMap::new();
        for tool in &tools {
            let schema = tool.parameters_schema();
            match jsonschema::validator_for(&schema) {
                Ok(validator) => {
                    validators.insert(tool.name().to_string(), Arc::new(validator));
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid parameter schema for tool '{}', skipping validation: {}",
                        tool.name(),
                        e
                    );
                }
            }
        }
        Self { tools, validators }
    }

    /// Tool declarations for the session setup message
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .iter()
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// Execute one inbound batch of requests.
    ///
    /// Spawns one task per distinct tool name; each task works through that
    /// name's requests in order. Outcomes are sent on `results`; a closed
    /// receiver (session torn down) silently discards the rest.
    pub fn dispatch_batch(
        &self,
        requests: Vec<ToolCallRequest>,
        context: ToolContext,
        results: mpsc::UnboundedSender<ToolEvent>,
        cancel: CancellationToken,
    ) {
        let mut groups: Vec<(String, Vec<ToolCallRequest>)> = Vec::new();
        for request in requests {
            match groups.iter_mut().find(|(name, _)| *name == request.name) {
                Some((_, group)) => group.push(request),
                None => groups.push((request.name.clone(), vec![request])),
            }
        }

        for (name, group) in groups {
            let tool = self.tools.iter().find(|t| t.name() == name).cloned();
            let validator = self.validators.get(&name).cloned();
            let results = results.clone();
            let cancel = cancel.clone();
            let context = context.clone();

            tokio::spawn(async move {
                for request in group {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => return,
                        event = run_request(tool.as_ref(), validator.as_deref(), request, context.clone(), &cancel) => event,
                    };
                    if results.send(event).is_err() {
                        return;
                    }
                }
            });
        }
    }
}

async fn run_request(
    tool: Option<&BoxedDataTool>,
    validator: Option<&jsonschema::Validator>,
    request: ToolCallRequest,
    context: ToolContext,
    cancel: &CancellationToken,
) -> ToolEvent {
    let ToolCallRequest { id, name, args } = request;

    let Some(tool) = tool else {
        return ToolEvent::Failed {
            id,
            name: name.clone(),
            message: format!("Tool not found: {name}"),
        };
    };

    if let Some(validator) = validator {
        if let Some(message) = validate_args(&args, validator) {
            return ToolEvent::Failed { id, name, message };
        }
    }

    match tool.call(args, context, cancel.clone()).await {
        Ok(payload) => ToolEvent::Completed { id, name, payload },
        Err(e) => ToolEvent::Failed {
            id,
            name,
            message: e.to_string(),
        },
    }
}

/// Validate arguments against a compiled schema.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_args(args: &serde_json::Value, validator: &jsonschema::Validator) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
