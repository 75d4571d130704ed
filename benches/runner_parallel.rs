use agent_relay::tool::hosted::{ProviderError, WebSearchProvider, WebSearchResult};
use agent_relay::{
    AgentDefinition, AgentRegistry, ConfigBuilder, Generation, HostedProviders, RunEnv, Runner,
    ScriptedProvider, ToolCall, ToolSpec,
};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

// Web search backend that takes 10ms per query.
struct SlowSearch;

#[async_trait::async_trait]
impl WebSearchProvider for SlowSearch {
    async fn search(&self, query: &str) -> Result<WebSearchResult, ProviderError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(WebSearchResult {
            answer: Some(query.to_string()),
            hits: Vec::new(),
        })
    }
}

fn script(tool_calls: usize) -> ScriptedProvider {
    let calls = (0..tool_calls)
        .map(|i| {
            ToolCall::new(
                format!("call_{}", i),
                "web_search",
                serde_json::json!({ "query": format!("stardate {}", i) }),
            )
        })
        .collect();
    ScriptedProvider::new()
        .then(Generation::ToolCalls(calls))
        .then(Generation::Text("done".into()))
}

fn runner(provider: ScriptedProvider, parallel: bool) -> Runner {
    let registry = AgentRegistry::builder()
        .agent(AgentDefinition::simple("Bench", "Use tools").with_tool(ToolSpec::web_search()))
        .build()
        .unwrap();
    let config = ConfigBuilder::new().parallel_tools(parallel).build().unwrap();
    let env = RunEnv::new(config)
        .with_providers(HostedProviders::new().with_web_search(Arc::new(SlowSearch)));
    Runner::new(Arc::new(registry), provider, env)
}

fn bench_runner(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    // Sequential
    c.bench_function("runner_sequential_8tools", |b| {
        b.to_async(&rt).iter_batched(
            || runner(script(8), false),
            |runner| async move {
                runner.run("Bench", "run").await.unwrap();
            },
            BatchSize::SmallInput,
        )
    });

    // Parallel
    c.bench_function("runner_parallel_8tools", |b| {
        b.to_async(&rt).iter_batched(
            || runner(script(8), true),
            |runner| async move {
                runner.run("Bench", "run").await.unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_runner);
criterion_main!(benches);
