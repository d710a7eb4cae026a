use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::Message;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A schema-bound action the agent may invoke. This system declares
/// exactly one (see [`crate::protocol::board_info_capability`]).
#[derive(Clone, Debug, Serialize)]
pub struct CapabilityDecl {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One request to the agent: the full conversation so far, the declared
/// capability, and whether capability use is forced on this call.
#[derive(Clone, Debug)]
pub struct AgentRequest<'a> {
    pub messages: &'a [Message],
    pub capability: &'a CapabilityDecl,
    pub force_capability: bool,
}

/// What the agent came back with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentReply {
    /// The agent invoked the declared capability; `id` correlates the
    /// eventual result message.
    CapabilityCall { id: String },
    /// Free-form text, expected to be a move in coordinate notation.
    Answer(String),
    /// Neither a capability call nor any content.
    Empty,
}

#[derive(Clone, Debug, Error)]
pub enum AgentError {
    #[error("agent request timed out after {0:?}")]
    Timeout(Duration),
    #[error("agent transport failed: {0}")]
    Transport(String),
    #[error("agent endpoint returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("agent response was not in the expected shape: {0}")]
    Malformed(String),
}

/// Move-proposing agent behind some transport. Implementations block;
/// the arbitrator issues at most one request at a time.
pub trait AgentTransport {
    fn request(&self, request: &AgentRequest<'_>) -> Result<AgentReply, AgentError>;
}

/// Agent backed by an OpenAI-compatible chat-completions endpoint.
///
/// The conversation log maps onto wire roles (system/user/assistant/tool)
/// and the capability declaration travels as a single function tool.
/// Every request is bounded by `timeout`.
pub struct HttpAgent {
    model: String,
    base_url: String,
    api_key: String,
    timeout: Duration,
    http: ureq::Agent,
}

impl HttpAgent {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        HttpAgent {
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
            http: Self::http_client(DEFAULT_TIMEOUT),
        }
    }

    /// Point at a different OpenAI-compatible endpoint.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.http = Self::http_client(timeout);
        self
    }

    fn http_client(timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(timeout).build()
    }

    fn map_error(&self, err: ureq::Error) -> AgentError {
        match err {
            ureq::Error::Status(status, response) => AgentError::Api {
                status,
                body: response.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => {
                let text = transport.to_string();
                if text.contains("timed out") || text.contains("timeout") {
                    AgentError::Timeout(self.timeout)
                } else {
                    AgentError::Transport(text)
                }
            }
        }
    }
}

impl AgentTransport for HttpAgent {
    fn request(&self, request: &AgentRequest<'_>) -> Result<AgentReply, AgentError> {
        let body = WireRequest {
            model: &self.model,
            messages: wire_messages(request.messages)?,
            tools: vec![WireTool {
                kind: "function",
                function: request.capability,
            }],
            tool_choice: if request.force_capability { "required" } else { "auto" },
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&body)
            .map_err(|e| self.map_error(e))?;

        let parsed: ChatResponse = response
            .into_json()
            .map_err(|e| AgentError::Malformed(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Malformed("response carried no choices".to_string()))?;
        Ok(interpret(choice.message))
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    tools: Vec<WireTool<'a>>,
    tool_choice: &'static str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a CapabilityDecl,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall<'a>,
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: &'static str,
}

fn wire_messages(messages: &[Message]) -> Result<Vec<WireMessage<'_>>, AgentError> {
    messages
        .iter()
        .map(|message| {
            Ok(match message {
                Message::System { text } => WireMessage {
                    role: "system",
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                Message::UserDirective { text } => WireMessage {
                    role: "user",
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                Message::AssistantProposal { text } => WireMessage {
                    role: "assistant",
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                Message::CapabilityRequest { id, capability } => WireMessage {
                    role: "assistant",
                    content: None,
                    tool_calls: Some(vec![WireToolCall {
                        id,
                        kind: "function",
                        function: WireFunctionCall {
                            name: capability,
                            arguments: "{}",
                        },
                    }]),
                    tool_call_id: None,
                },
                Message::CapabilityResult { id, info } => WireMessage {
                    role: "tool",
                    content: Some(serde_json::to_string(info).map_err(|e| {
                        AgentError::Transport(format!("payload encoding: {e}"))
                    })?),
                    tool_calls: None,
                    tool_call_id: Some(id),
                },
            })
        })
        .collect()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
}

/// A tool call wins over content; empty or whitespace content counts as
/// no answer at all.
fn interpret(message: ChoiceMessage) -> AgentReply {
    if let Some(call) = message.tool_calls.into_iter().next() {
        return AgentReply::CapabilityCall { id: call.id };
    }
    match message.content {
        Some(text) if !text.trim().is_empty() => AgentReply::Answer(text),
        _ => AgentReply::Empty,
    }
}
