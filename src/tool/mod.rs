//! Tools as Tower services.
//!
//! A [`ToolSpec`] describes one tool an agent can call: a local function or a
//! hosted tool. Per agent, the specs are turned into a [`ToolRouter`], a
//! name → index dispatch over boxed tool services with an unknown-tool
//! fallback at index 0. [`dispatch`] runs the tool calls of one turn and
//! returns the outputs in issue order.
//!
//! Tool failures never surface as service errors: they are carried in
//! [`ToolOutput::result`] and fed back to the agent.

pub mod calculator;
pub mod hosted;
pub mod openai_hosted;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::{util::BoxCloneService, BoxError, Service, ServiceExt};
use tracing::{debug, warn};

use crate::error::{RunError, ToolError, ToolErrorKind};
use crate::items::ToolCall;
use crate::schema;

pub use hosted::{HostedProviders, HostedTool};
pub use openai_hosted::OpenAIHostedProvider;

type Handler = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

/// A local, synchronous function tool.
#[derive(Clone)]
pub struct FunctionTool {
    handler: Handler,
    /// Untyped tools validate arguments against the schema before the call
    validate_arguments: bool,
}

/// What executes when a tool is called.
#[derive(Clone)]
pub enum ToolKind {
    Function(FunctionTool),
    Hosted(HostedTool),
}

/// Definition of a tool an agent may call.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: Value,
    pub kind: ToolKind,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ToolKind::Function(_) => "function".to_string(),
            ToolKind::Hosted(h) => format!("{:?}", h),
        };
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("kind", &kind)
            .finish()
    }
}

impl ToolSpec {
    /// Function tool over raw JSON arguments, validated against `parameters`.
    pub fn function<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            kind: ToolKind::Function(FunctionTool {
                handler: Arc::new(handler),
                validate_arguments: true,
            }),
        }
    }

    /// Function tool over a typed argument struct; the schema is derived from `A`.
    pub fn typed<A, F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + 'static,
        F: Fn(A) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        let wrapped = move |raw: Value| {
            let args: A = serde_json::from_value(raw)?;
            handler(args)
        };
        Self {
            name: name.into(),
            description: description.into(),
            parameters: schema::parameters_for::<A>(),
            kind: ToolKind::Function(FunctionTool {
                handler: Arc::new(wrapped),
                validate_arguments: false,
            }),
        }
    }

    pub fn hosted(tool: HostedTool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: schema::parameters_for::<hosted::SearchArgs>(),
            kind: ToolKind::Hosted(tool),
        }
    }

    pub fn file_search(corpus_ids: Vec<String>, max_results: usize) -> Self {
        Self::hosted(HostedTool::FileSearch {
            corpus_ids,
            max_results,
        })
    }

    pub fn web_search() -> Self {
        Self::hosted(HostedTool::WebSearch)
    }

    /// Rename the tool, e.g. to expose two file searches on one agent.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_hosted(&self) -> bool {
        matches!(self.kind, ToolKind::Hosted(_))
    }

    /// Invoke this tool. Failures are returned inside the output.
    pub async fn invoke(&self, invocation: ToolInvocation, providers: &HostedProviders) -> ToolOutput {
        let result = match &self.kind {
            ToolKind::Function(f) => {
                let checked = if f.validate_arguments {
                    schema::validate_against_schema(&self.parameters, &invocation.arguments)
                        .map_err(ToolError::invalid_arguments)
                } else {
                    Ok(())
                };
                checked.and_then(|_| (f.handler)(invocation.arguments))
            }
            ToolKind::Hosted(h) => h.call(invocation.arguments, providers).await,
        };
        ToolOutput {
            id: invocation.id,
            name: invocation.name,
            result,
        }
    }

    /// Lift this tool into a boxed service.
    pub fn into_service(self, providers: HostedProviders) -> ToolSvc {
        let spec = Arc::new(self);
        BoxCloneService::new(tower::service_fn(move |inv: ToolInvocation| {
            let spec = spec.clone();
            let providers = providers.clone();
            async move { Ok::<_, BoxError>(spec.invoke(inv, &providers).await) }
        }))
    }
}

/// Uniform tool invocation passed to routed tool services.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl From<&ToolCall> for ToolInvocation {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

/// Result of one tool call, success or failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub id: String,
    pub name: String,
    pub result: Result<Value, ToolError>,
}

impl ToolOutput {
    pub fn failed(invocation: ToolInvocation, error: ToolError) -> Self {
        Self {
            id: invocation.id,
            name: invocation.name,
            result: Err(error),
        }
    }

    /// Text the agent sees in the tool message.
    pub fn render(&self) -> String {
        match &self.result {
            Ok(Value::String(s)) => s.clone(),
            Ok(v) => v.to_string(),
            Err(e) => format!("Error [{}]: {}", e.kind.as_str(), e.message),
        }
    }
}

/// Boxed tool service type alias.
pub type ToolSvc = BoxCloneService<ToolInvocation, ToolOutput, BoxError>;

/// Router over an agent's tools using a name → index table.
#[derive(Clone)]
pub struct ToolRouter {
    name_to_index: HashMap<String, usize>,
    services: Vec<ToolSvc>, // index 0 is the unknown-tool fallback
}

impl ToolRouter {
    pub fn new(tools: &[ToolSpec], providers: &HostedProviders) -> Self {
        let unknown = BoxCloneService::new(tower::service_fn(|inv: ToolInvocation| async move {
            let message = format!("unknown tool: {}", inv.name);
            Ok::<_, BoxError>(ToolOutput::failed(
                inv,
                ToolError::new(ToolErrorKind::UnknownTool, message),
            ))
        }));

        let mut services: Vec<ToolSvc> = vec![unknown];
        let mut name_to_index = HashMap::new();
        for (i, spec) in tools.iter().enumerate() {
            name_to_index.insert(spec.name.clone(), i + 1);
            services.push(spec.clone().into_service(providers.clone()));
        }

        Self {
            name_to_index,
            services,
        }
    }
}

impl Service<ToolInvocation> for ToolRouter {
    type Response = ToolOutput;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        // Readiness is checked per selected service inside `call`.
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ToolInvocation) -> Self::Future {
        let idx = self.name_to_index.get(req.name.as_str()).copied().unwrap_or(0);
        let svc = self.services[idx].clone();
        Box::pin(svc.oneshot(req))
    }
}

/// How the tool calls of one turn are executed.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub parallel: bool,
    pub max_concurrency: Option<usize>,
    pub timeout: Duration,
}

/// Run a batch of tool calls and return their outputs in issue order.
///
/// Only cancellation fails the batch; everything else is a per-call
/// [`ToolError`].
pub async fn dispatch<R>(
    router: R,
    invocations: Vec<ToolInvocation>,
    options: DispatchOptions,
    cancel: &CancellationToken,
) -> Result<Vec<ToolOutput>, RunError>
where
    R: Service<ToolInvocation, Response = ToolOutput, Error = BoxError> + Clone + Send + 'static,
    R::Future: Send + 'static,
{
    let limit = options.max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
    let calls = invocations.into_iter().map(|inv| {
        let router = router.clone();
        let limit = limit.clone();
        async move {
            let _permit = match &limit {
                Some(sem) => sem.clone().acquire_owned().await.ok(),
                None => None,
            };
            invoke_one(router, inv, options.timeout).await
        }
    });

    let batch = async {
        if options.parallel {
            futures::future::join_all(calls).await
        } else {
            let mut outputs = Vec::new();
            for call in calls {
                outputs.push(call.await);
            }
            outputs
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(RunError::Cancelled),
        outputs = batch => Ok(outputs),
    }
}

async fn invoke_one<R>(router: R, inv: ToolInvocation, timeout: Duration) -> ToolOutput
where
    R: Service<ToolInvocation, Response = ToolOutput, Error = BoxError>,
{
    debug!(tool = %inv.name, id = %inv.id, "invoking tool");
    let fallback = inv.clone();
    let output = match tokio::time::timeout(timeout, router.oneshot(inv)).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => ToolOutput::failed(fallback, ToolError::execution_failed(e.to_string())),
        Err(_) => ToolOutput::failed(
            fallback,
            ToolError::new(
                ToolErrorKind::Timeout,
                format!("tool call exceeded {:?}", timeout),
            ),
        ),
    };
    if let Err(e) = &output.result {
        warn!(tool = %output.name, id = %output.id, error = %e, "tool call failed");
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn inv(id: &str, name: &str, arguments: Value) -> ToolInvocation {
        ToolInvocation {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    fn options(parallel: bool) -> DispatchOptions {
        DispatchOptions {
            parallel,
            max_concurrency: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn echo_tool() -> ToolSpec {
        ToolSpec::function(
            "echo",
            "Echo the text",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
            |args| Ok(args["text"].clone()),
        )
    }

    #[tokio::test]
    async fn test_untyped_tool_validates_arguments() {
        let spec = echo_tool();
        let providers = HostedProviders::new();

        let ok = spec.invoke(inv("1", "echo", json!({"text": "hi"})), &providers).await;
        assert_eq!(ok.result, Ok(json!("hi")));

        let bad = spec.invoke(inv("2", "echo", json!({"text": 5})), &providers).await;
        assert_eq!(bad.result.unwrap_err().kind, ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn test_typed_tool_rejects_unknown_fields() {
        let spec = calculator::eval_expression_tool();
        let out = spec
            .invoke(
                inv("1", "eval_expression", json!({"expression": "1+1", "extra": true})),
                &HostedProviders::new(),
            )
            .await;
        assert_eq!(out.result.unwrap_err().kind, ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn test_router_unknown_tool_fallback() {
        let mut router = ToolRouter::new(&[echo_tool()], &HostedProviders::new());
        let out = router
            .ready()
            .await
            .unwrap()
            .call(inv("1", "nope", json!({})))
            .await
            .unwrap();
        assert_eq!(out.result.unwrap_err().kind, ToolErrorKind::UnknownTool);
    }

    #[tokio::test]
    async fn test_render() {
        let ok = ToolOutput {
            id: "1".into(),
            name: "eval_expression".into(),
            result: Ok(json!("85.33333333333333")),
        };
        assert_eq!(ok.render(), "85.33333333333333");

        let err = ToolOutput {
            id: "2".into(),
            name: "eval_expression".into(),
            result: Err(ToolError::unsupported_expression("identifier 'os' is not allowed")),
        };
        assert_eq!(
            err.render(),
            "Error [unsupported_expression]: identifier 'os' is not allowed"
        );
    }

    #[tokio::test]
    async fn test_dispatch_preserves_issue_order() {
        let router = tower::service_fn(|inv: ToolInvocation| async move {
            let delay = if inv.name == "slow" { 50 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, BoxError>(ToolOutput {
                id: inv.id,
                result: Ok(Value::String(inv.name.clone())),
                name: inv.name,
            })
        });
        let outputs = dispatch(
            router,
            vec![inv("a", "slow", Value::Null), inv("b", "fast", Value::Null)],
            options(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let ids: Vec<&str> = outputs.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_dispatch_respects_concurrency_limit() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (current.clone(), peak.clone());
        let router = tower::service_fn(move |inv: ToolInvocation| {
            let (c, p) = (c.clone(), p.clone());
            async move {
                let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                c.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, BoxError>(ToolOutput {
                    id: inv.id,
                    name: inv.name,
                    result: Ok(Value::Null),
                })
            }
        });
        let invocations = (0..6).map(|i| inv(&i.to_string(), "t", Value::Null)).collect();
        let opts = DispatchOptions {
            max_concurrency: Some(2),
            ..options(true)
        };
        let outputs = dispatch(router, invocations, opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outputs.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dispatch_timeout_is_a_tool_error() {
        let router = tower::service_fn(|inv: ToolInvocation| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BoxError>(ToolOutput {
                id: inv.id,
                name: inv.name,
                result: Ok(Value::Null),
            })
        });
        let opts = DispatchOptions {
            timeout: Duration::from_millis(10),
            ..options(false)
        };
        let outputs = dispatch(router, vec![inv("1", "t", Value::Null)], opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outputs[0].result.as_ref().unwrap_err().kind, ToolErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_dispatch_cancelled() {
        let router = tower::service_fn(|inv: ToolInvocation| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BoxError>(ToolOutput {
                id: inv.id,
                name: inv.name,
                result: Ok(Value::Null),
            })
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = dispatch(router, vec![inv("1", "t", Value::Null)], options(true), &cancel).await;
        assert!(matches!(result, Err(RunError::Cancelled)));
    }
}
