//! Deterministic model for tests and offline demos.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{BoxError, Service};

use super::{Generation, GenerationRequest, GenerationResponse};
use crate::error::GenerationError;
use crate::usage::Usage;

type Responder = Arc<dyn Fn(&GenerationRequest) -> Generation + Send + Sync>;

/// One scripted answer.
#[derive(Clone)]
pub enum ScriptStep {
    Reply(Generation),
    /// Computed from the request, e.g. echoing the last tool result
    Respond(Responder),
    Fail(GenerationError),
}

impl fmt::Debug for ScriptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptStep::Reply(g) => f.debug_tuple("Reply").field(g).finish(),
            ScriptStep::Respond(_) => f.write_str("Respond(..)"),
            ScriptStep::Fail(e) => f.debug_tuple("Fail").field(e).finish(),
        }
    }
}

impl From<Generation> for ScriptStep {
    fn from(g: Generation) -> Self {
        ScriptStep::Reply(g)
    }
}

#[derive(Default)]
struct Script {
    per_agent: HashMap<String, VecDeque<ScriptStep>>,
    shared: VecDeque<ScriptStep>,
    repeat: HashMap<String, ScriptStep>,
    latency: HashMap<String, Duration>,
    requests: Vec<GenerationRequest>,
}

/// Answers generations from a script.
///
/// For each request the next step queued for the requesting agent is used,
/// then the next shared step, then the agent's repeating step. When all are
/// empty the call fails with [`GenerationError::Malformed`].
#[derive(Clone)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
    usage: Usage,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Arc::default(),
            usage: Usage::new(10, 5),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // A panic while holding the lock leaves the script usable.
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a step for whichever agent asks next.
    pub fn then(self, step: impl Into<ScriptStep>) -> Self {
        self.script().shared.push_back(step.into());
        self
    }

    /// Queue a step for `agent`.
    pub fn then_for(self, agent: impl Into<String>, step: impl Into<ScriptStep>) -> Self {
        self.script()
            .per_agent
            .entry(agent.into())
            .or_default()
            .push_back(step.into());
        self
    }

    /// Answer `agent` with `step` whenever nothing else is queued for it.
    pub fn always_for(self, agent: impl Into<String>, step: impl Into<ScriptStep>) -> Self {
        self.script().repeat.insert(agent.into(), step.into());
        self
    }

    /// Compute `agent`'s next answer from the request.
    pub fn respond_for<F>(self, agent: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Generation + Send + Sync + 'static,
    {
        self.then_for(agent, ScriptStep::Respond(Arc::new(responder)))
    }

    /// Delay every answer to `agent`.
    pub fn with_latency_for(self, agent: impl Into<String>, latency: Duration) -> Self {
        self.script().latency.insert(agent.into(), latency);
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.script().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script().requests.len()
    }

    fn next_step(&self, req: &GenerationRequest) -> (Option<ScriptStep>, Option<Duration>) {
        let mut script = self.script();
        script.requests.push(req.clone());
        let latency = script.latency.get(&req.agent).copied();
        let step = script
            .per_agent
            .get_mut(&req.agent)
            .and_then(VecDeque::pop_front)
            .or_else(|| script.shared.pop_front())
            .or_else(|| script.repeat.get(&req.agent).cloned());
        (step, latency)
    }
}

impl Service<GenerationRequest> for ScriptedProvider {
    type Response = GenerationResponse;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GenerationRequest) -> Self::Future {
        let (step, latency) = self.next_step(&req);
        let usage = self.usage.clone();
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let generation = match step {
                Some(ScriptStep::Reply(g)) => g,
                Some(ScriptStep::Respond(f)) => f(&req),
                Some(ScriptStep::Fail(e)) => return Err(Box::new(e) as BoxError),
                None => {
                    return Err(Box::new(GenerationError::Malformed(format!(
                        "script exhausted for agent '{}'",
                        req.agent
                    ))) as BoxError)
                }
            };
            Ok(GenerationResponse { generation, usage })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ModelSettings;
    use crate::handoff::HandoffRequest;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    fn request(agent: &str) -> GenerationRequest {
        GenerationRequest {
            agent: agent.to_string(),
            model: "scripted".to_string(),
            instructions: String::new(),
            history: vec![],
            tools: vec![],
            handoffs: vec![],
            output_schema: None,
            settings: ModelSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_per_agent_before_shared() {
        let provider = ScriptedProvider::new()
            .then(Generation::Text("shared".into()))
            .then_for("Calculator", Generation::Text("calc".into()));

        let a = provider.clone().oneshot(request("Calculator")).await.unwrap();
        assert_eq!(a.generation, Generation::Text("calc".into()));
        let b = provider.clone().oneshot(request("Calculator")).await.unwrap();
        assert_eq!(b.generation, Generation::Text("shared".into()));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_repeat_and_exhaustion() {
        let provider = ScriptedProvider::new()
            .always_for("A", Generation::Handoff(HandoffRequest::new("B")));

        for _ in 0..3 {
            let r = provider.clone().oneshot(request("A")).await.unwrap();
            assert!(matches!(r.generation, Generation::Handoff(_)));
        }
        let err = provider.clone().oneshot(request("B")).await.unwrap_err();
        assert!(err.to_string().contains("script exhausted"));
    }

    #[tokio::test]
    async fn test_respond_sees_request() {
        let provider = ScriptedProvider::new()
            .respond_for("Echo", |req| Generation::Text(req.agent.to_uppercase()));
        let r = provider.oneshot(request("Echo")).await.unwrap();
        assert_eq!(r.generation, Generation::Text("ECHO".into()));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let provider = ScriptedProvider::new()
            .then(ScriptStep::Fail(GenerationError::Unavailable("503".into())));
        let err = provider.oneshot(request("A")).await.unwrap_err();
        assert!(err.downcast_ref::<GenerationError>().is_some());
    }
}
