//! Chat-completion collaborator: wire types, the [`ChatClient`] seam, and the
//! blocking OpenAI-compatible implementation.

use crate::config::{Config, LlmConfig};
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instruction framing the conversation
    System,
    /// The caller's prompt
    User,
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A chat-completion request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Model identifier
    pub model: String,
    /// System message followed by the user prompt
    pub messages: Vec<ChatMessage>,
    /// Completion budget
    pub max_tokens: u32,
    /// Optional constrained-output format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

impl ChatRequest {
    /// Builds the single-turn request used everywhere in this crate: the
    /// configured system instruction, then `prompt` as the user message.
    #[must_use]
    pub fn single_turn(llm: &LlmConfig, prompt: &str) -> Self {
        Self {
            model: llm.model.clone(),
            messages: vec![
                ChatMessage::system(&llm.system_prompt),
                ChatMessage::user(prompt),
            ],
            max_tokens: llm.max_output_tokens,
            response_format: None,
        }
    }

    /// Attaches a `response_format` object.
    #[must_use]
    pub fn with_response_format(mut self, format: serde_json::Value) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Returns the user prompt text.
    #[must_use]
    pub fn user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// A blocking chat-completion backend.
///
/// Implementations must be thread-safe; the crate itself only calls them from
/// one thread at a time.
pub trait ChatClient: Send + Sync {
    /// Sends one request and returns the raw completion text.
    ///
    /// # Errors
    ///
    /// Any failure to obtain a completion. Callers treat every error as
    /// transient.
    fn complete(&self, request: &ChatRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Extracts `choices[0].message.content` from a response body.
fn parse_completion(body: &str) -> Result<String> {
    let response: CompletionResponse = serde_json::from_str(body)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(Error::EmptyCompletion)
}

/// [`ChatClient`] for the OpenAI `chat/completions` endpoint and compatible
/// servers.
pub struct OpenAiClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiClient {
    /// Creates a client with the configured credential and request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredential`] without an API key, or a transport
    /// error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.api_key()?.to_string();
        let http = Client::builder()
            .timeout(config.llm.request_timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.llm.api_base),
            api_key,
        })
    }
}

impl ChatClient for OpenAiClient {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        debug!(
            "POST {} (model={}, max_tokens={})",
            self.endpoint, request.model, request.max_tokens
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        trace!("Response {}: {} bytes", status, body.len());

        if !status.is_success() {
            return Err(Error::api(status.as_u16(), body));
        }

        parse_completion(&body)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    #[test]
    fn test_single_turn_shape() {
        let llm = LlmConfig::default();
        let request = ChatRequest::single_turn(&llm, "Describe pipemem.v");

        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.max_tokens, 1_024);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("Verilog and hardware design"));
        assert_eq!(request.user_prompt(), Some("Describe pipemem.v"));
    }

    #[test]
    fn test_request_serialization() {
        let llm = LlmConfig::default();
        let request = ChatRequest::single_turn(&llm, "hi");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 1_024);
        assert!(json.get("response_format").is_none());

        let constrained = request.with_response_format(serde_json::json!({"type": "json_object"}));
        let json = serde_json::to_value(&constrained).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"  ok  "}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "  ok  ");
    }

    #[test]
    fn test_parse_completion_empty() {
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(Error::EmptyCompletion)
        ));
        assert!(matches!(
            parse_completion(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(Error::EmptyCompletion)
        ));
    }

    #[test]
    fn test_parse_completion_garbage() {
        let err = parse_completion("<html>gateway</html>").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn test_client_requires_key() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = Config::builder().base_dir(temp.path()).build().unwrap();
        assert!(matches!(
            OpenAiClient::new(&config),
            Err(Error::MissingCredential)
        ));
    }

    #[test]
    fn test_client_endpoint() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = Config::builder()
            .base_dir(temp.path())
            .api_key("sk-test")
            .api_base("http://127.0.0.1:9/v1/")
            .build()
            .unwrap();

        let client = OpenAiClient::new(&config).unwrap();
        assert_eq!(client.endpoint, "http://127.0.0.1:9/v1/chat/completions");
    }

    /// Serves one canned HTTP response on a local port and hands back the raw
    /// request it received.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/v1", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            request
        });

        (base, handle)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&raw);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn local_client(temp: &assert_fs::TempDir, base: &str) -> OpenAiClient {
        let config = Config::builder()
            .base_dir(temp.path())
            .api_key("sk-test")
            .api_base(base)
            .build()
            .unwrap();
        OpenAiClient::new(&config).unwrap()
    }

    #[test]
    fn test_complete_returns_message_content() {
        let temp = assert_fs::TempDir::new().unwrap();
        let (base, server) = serve_once("200 OK", r#"{"choices":[{"message":{"content":"hi"}}]}"#);

        let client = local_client(&temp, &base);
        let request = ChatRequest::single_turn(&LlmConfig::default(), "Describe div.v");
        let reply = client.complete(&request).unwrap();

        assert_eq!(reply, "hi");

        let received = server.join().unwrap();
        assert!(received.starts_with("POST /v1/chat/completions "));
        assert!(received
            .lines()
            .any(|line| line.eq_ignore_ascii_case("authorization: Bearer sk-test")));
        assert!(received.contains(r#""messages""#));
        assert!(received.contains("Describe div.v"));
    }

    #[test]
    fn test_complete_maps_rate_limit_status() {
        let temp = assert_fs::TempDir::new().unwrap();
        let (base, server) = serve_once(
            "429 Too Many Requests",
            r#"{"error":{"message":"Rate limit reached"}}"#,
        );

        let client = local_client(&temp, &base);
        let request = ChatRequest::single_turn(&LlmConfig::default(), "q");
        let err = client.complete(&request).unwrap_err();

        assert!(matches!(err, Error::Api { status: 429, .. }));
        assert_eq!(err.kind(), "rate-limit");
        assert!(err.to_string().contains("Rate limit reached"));
        server.join().unwrap();
    }
}
