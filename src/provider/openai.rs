//! Chat-completions adapter over async-openai.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
        FunctionCall, FunctionObjectArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use serde_json::Value;
use tower::{BoxError, Service};
use tracing::{debug, warn};

use super::{Generation, GenerationRequest, GenerationResponse};
use crate::config::RuntimeConfig;
use crate::error::GenerationError;
use crate::handoff::HandoffRequest;
use crate::items::{Message, Role, ToolCall};
use crate::usage::Usage;

const TRANSFER_PREFIX: &str = "transfer_to_";

/// OpenAI-backed generation service.
#[derive(Clone)]
pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAIProvider {
    /// Client configured from the environment (`OPENAI_API_KEY`).
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Client using the credential and base URL of `config`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let mut openai = OpenAIConfig::new();
        if let Some(credential) = &config.credential {
            openai = openai.with_api_key(credential.expose());
        }
        if let Some(base) = &config.api_base {
            openai = openai.with_api_base(base);
        }
        Self {
            client: Client::with_config(openai),
        }
    }

    pub fn with_client(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn malformed(e: OpenAIError) -> GenerationError {
    GenerationError::Malformed(e.to_string())
}

fn convert_message(msg: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    Ok(match msg.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(msg.content.clone())
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(msg.content.clone())
            .build()?
            .into(),
        Role::Assistant => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            if !msg.content.is_empty() {
                builder.content(msg.content.clone());
            }
            if let Some(tool_calls) = &msg.tool_calls {
                let calls: Vec<ChatCompletionMessageToolCall> = tool_calls
                    .iter()
                    .map(|tc| ChatCompletionMessageToolCall {
                        id: tc.id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect();
                builder.tool_calls(calls);
            }
            builder.build()?.into()
        }
        Role::Tool => ChatCompletionRequestToolMessageArgs::default()
            .content(msg.content.clone())
            .tool_call_id(msg.tool_call_id.clone().unwrap_or_default())
            .build()?
            .into(),
    })
}

fn function_tool(
    name: &str,
    description: &str,
    parameters: Value,
) -> Result<ChatCompletionTool, OpenAIError> {
    let func = FunctionObjectArgs::default()
        .name(name)
        .description(description)
        .parameters(parameters)
        .build()?;
    ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(func)
        .build()
}

fn handoff_parameters() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "reason": {"type": "string", "description": "Why the conversation is handed off"}
        },
        "additionalProperties": false
    })
}

pub(crate) fn build_request(
    req: &GenerationRequest,
) -> Result<CreateChatCompletionRequest, GenerationError> {
    let mut messages = Vec::with_capacity(req.history.len() + 1);
    messages.push(convert_message(&Message::system(req.instructions.clone())).map_err(malformed)?);
    for msg in &req.history {
        messages.push(convert_message(msg).map_err(malformed)?);
    }

    let mut tools = Vec::with_capacity(req.tools.len() + req.handoffs.len());
    for t in &req.tools {
        tools.push(function_tool(&t.name, &t.description, t.parameters.clone()).map_err(malformed)?);
    }
    for h in &req.handoffs {
        tools.push(function_tool(&h.tool_name, &h.description, handoff_parameters()).map_err(malformed)?);
    }

    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(&req.model).messages(messages);
    if !tools.is_empty() {
        args.tools(tools);
    }
    if let Some(t) = req.settings.temperature {
        args.temperature(t);
    }
    if let Some(max) = req.settings.max_tokens {
        args.max_tokens(max);
    }
    if let Some(schema) = &req.output_schema {
        args.response_format(ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: schema_name(&schema.name),
                schema: Some(schema.schema.clone()),
                strict: Some(false),
            },
        });
    }
    args.build().map_err(malformed)
}

// Response format names allow only [a-zA-Z0-9_-]
fn schema_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

pub(crate) fn parse_response(
    req: &GenerationRequest,
    response: CreateChatCompletionResponse,
) -> Result<GenerationResponse, GenerationError> {
    let usage = response
        .usage
        .as_ref()
        .map(|u| Usage::new(u.prompt_tokens as usize, u.completion_tokens as usize))
        .unwrap_or_else(|| Usage {
            request_count: 1,
            ..Usage::empty()
        });

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::Malformed("no choices in response".to_string()))?;
    let message = choice.message;

    let calls: Vec<ToolCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            // Unparseable arguments reach the tool, which rejects them
            let arguments = serde_json::from_str(&tc.function.arguments)
                .unwrap_or(Value::String(tc.function.arguments));
            ToolCall::new(tc.id, tc.function.name, arguments)
        })
        .collect();

    if !calls.is_empty() {
        // Advertised handoffs resolve to their agent. Any other transfer_to_*
        // call that is not a declared tool is passed on by tool name so the
        // resolver can reject it.
        let handoff = calls.iter().find_map(|call| {
            req.handoffs
                .iter()
                .find(|h| h.tool_name == call.name)
                .map(|h| (call, h.agent.clone()))
        });
        let handoff = handoff.or_else(|| {
            calls
                .iter()
                .find(|call| {
                    call.name.starts_with(TRANSFER_PREFIX)
                        && !req.tools.iter().any(|t| t.name == call.name)
                })
                .map(|call| (call, call.name.clone()))
        });
        if let Some((call, target)) = handoff {
            if calls.len() > 1 {
                warn!(
                    agent = %req.agent,
                    ignored = calls.len() - 1,
                    "handoff issued alongside other tool calls; only the handoff is taken"
                );
            }
            let mut request = HandoffRequest::new(target).with_call_id(call.id.clone());
            if let Some(reason) = call.arguments.get("reason").and_then(Value::as_str) {
                request = request.with_reason(reason);
            }
            return Ok(GenerationResponse::new(Generation::Handoff(request), usage));
        }
        return Ok(GenerationResponse::new(Generation::ToolCalls(calls), usage));
    }

    let text = message
        .content
        .or(message.refusal)
        .ok_or_else(|| GenerationError::Malformed("empty assistant message".to_string()))?;

    let generation = if req.output_schema.is_some() {
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => Generation::Structured(v),
            Err(_) => Generation::Text(text),
        }
    } else {
        Generation::Text(text)
    };
    Ok(GenerationResponse::new(generation, usage))
}

fn classify_openai_error(e: OpenAIError) -> GenerationError {
    match e {
        OpenAIError::ApiError(api)
            if api
                .r#type
                .as_deref()
                .is_some_and(|t| t.contains("invalid_request")) =>
        {
            GenerationError::Malformed(api.message)
        }
        OpenAIError::JSONDeserialize(e) => GenerationError::Malformed(e.to_string()),
        OpenAIError::InvalidArgument(m) => GenerationError::Malformed(m),
        other => GenerationError::Unavailable(other.to_string()),
    }
}

impl Service<GenerationRequest> for OpenAIProvider {
    type Response = GenerationResponse;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GenerationRequest) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move {
            let request = build_request(&req).map_err(|e| Box::new(e) as BoxError)?;
            debug!(agent = %req.agent, model = %req.model, "requesting chat completion");
            let response = client
                .chat()
                .create(request)
                .await
                .map_err(|e| Box::new(classify_openai_error(e)) as BoxError)?;
            parse_response(&req, response).map_err(|e| Box::new(e) as BoxError)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ModelSettings;
    use crate::handoff::AdvertisedHandoff;
    use crate::provider::ToolSchema;
    use crate::schema::OutputSchema;
    use pretty_assertions::assert_eq;

    fn request() -> GenerationRequest {
        GenerationRequest {
            agent: "Data".into(),
            model: "gpt-4o".into(),
            instructions: "Answer questions".into(),
            history: vec![
                Message::user("Compute ((2*8)^2)/3"),
                Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall::new("call_1", "eval_expression", serde_json::json!({"expression": "1"}))],
                ),
                Message::tool("1", "call_1"),
            ],
            tools: vec![ToolSchema {
                name: "eval_expression".into(),
                description: "math".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            handoffs: vec![AdvertisedHandoff {
                agent: "Calculator".into(),
                tool_name: "transfer_to_calculator".into(),
                description: "Performs arithmetic".into(),
            }],
            output_schema: None,
            settings: ModelSettings {
                temperature: Some(0.0),
                ..Default::default()
            },
        }
    }

    fn response(message: Value) -> CreateChatCompletionResponse {
        serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": message, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }))
        .unwrap()
    }

    #[test]
    fn test_build_request_includes_tools_and_handoffs() {
        let built = build_request(&request()).unwrap();
        assert_eq!(built.messages.len(), 4);
        let names: Vec<String> = built
            .tools
            .unwrap()
            .into_iter()
            .map(|t| t.function.name)
            .collect();
        assert_eq!(names, vec!["eval_expression", "transfer_to_calculator"]);
        assert_eq!(built.temperature, Some(0.0));
    }

    #[test]
    fn test_build_request_with_output_schema() {
        let mut req = request();
        req.output_schema = Some(OutputSchema::new(
            "Yar Guard Output",
            serde_json::json!({"type": "object"}),
        ));
        let built = build_request(&req).unwrap();
        match built.response_format {
            Some(ResponseFormat::JsonSchema { json_schema }) => {
                assert_eq!(json_schema.name, "Yar_Guard_Output")
            }
            other => panic!("unexpected response format: {:?}", other),
        }
    }

    #[test]
    fn test_parse_handoff_call() {
        let resp = response(serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_9",
                "type": "function",
                "function": {"name": "transfer_to_calculator", "arguments": "{\"reason\":\"math\"}"}
            }]
        }));
        let parsed = parse_response(&request(), resp).unwrap();
        assert_eq!(
            parsed.generation,
            Generation::Handoff(
                HandoffRequest::new("Calculator")
                    .with_call_id("call_9")
                    .with_reason("math")
            )
        );
        assert_eq!(parsed.usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_unadvertised_transfer_is_a_handoff() {
        let mut req = request();
        req.agent = "Calculator".into();
        req.handoffs.clear();
        let resp = response(serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "c1",
                "type": "function",
                "function": {"name": "transfer_to_data", "arguments": "{}"}
            }]
        }));
        let parsed = parse_response(&req, resp).unwrap();
        assert_eq!(
            parsed.generation,
            Generation::Handoff(HandoffRequest::new("transfer_to_data").with_call_id("c1"))
        );
    }

    #[test]
    fn test_parse_declared_transfer_named_tool_stays_a_tool_call() {
        let mut req = request();
        req.handoffs.clear();
        req.tools[0].name = "transfer_to_sickbay".into();
        let resp = response(serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "t1",
                "type": "function",
                "function": {"name": "transfer_to_sickbay", "arguments": "{}"}
            }]
        }));
        let parsed = parse_response(&req, resp).unwrap();
        assert!(matches!(parsed.generation, Generation::ToolCalls(_)));
    }

    #[test]
    fn test_parse_tool_calls_keep_order() {
        let resp = response(serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {"id": "a", "type": "function", "function": {"name": "eval_expression", "arguments": "{\"expression\":\"1\"}"}},
                {"id": "b", "type": "function", "function": {"name": "eval_expression", "arguments": "not json"}}
            ]
        }));
        let parsed = parse_response(&request(), resp).unwrap();
        match parsed.generation {
            Generation::ToolCalls(calls) => {
                assert_eq!(calls[0].id, "a");
                assert_eq!(calls[1].arguments, Value::String("not json".into()));
            }
            other => panic!("unexpected generation: {:?}", other),
        }
    }

    #[test]
    fn test_parse_structured_output() {
        let mut req = request();
        req.output_schema = Some(OutputSchema::new("v", serde_json::json!({"type": "object"})));
        let resp = response(serde_json::json!({
            "role": "assistant",
            "content": "{\"is_blocked\": false, \"reasoning\": \"fine\"}"
        }));
        let parsed = parse_response(&req, resp).unwrap();
        assert_eq!(
            parsed.generation,
            Generation::Structured(serde_json::json!({"is_blocked": false, "reasoning": "fine"}))
        );
    }

    #[test]
    fn test_parse_text() {
        let resp = response(serde_json::json!({"role": "assistant", "content": "Hello"}));
        let parsed = parse_response(&request(), resp).unwrap();
        assert_eq!(parsed.generation, Generation::Text("Hello".into()));
    }
}
