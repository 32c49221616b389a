// 上游客户端
// 按服务商拼装请求体与鉴权头，并从两种响应格式中取出助手回复

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::Duration;

use super::catalog::{AuthShape, Candidate, Provider, WireFormat};
use crate::config::Config;
use crate::utils::ImageAttachment;

const USER_AGENT: &str = concat!("flux-gateway/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_LOG_LIMIT: usize = 512;

/// 发给上游的一次对话：系统提示 + 用户一轮
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: String,
    pub text: String,
    pub image: Option<ImageAttachment>,
}

/// 单个候选失败的原因，全部按“换下一个”处理
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("no API key configured for {0}")]
    MissingKey(Provider),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("empty assistant content")]
    EmptyContent,
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AttemptError::Timeout
        } else if e.is_decode() {
            AttemptError::Malformed(e.to_string())
        } else {
            AttemptError::Transport(e.to_string())
        }
    }
}

/// 回退循环依赖的上游能力
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn is_configured(&self, provider: Provider) -> bool;

    async fn complete(
        &self,
        candidate: &Candidate,
        prompt: &ChatPrompt,
    ) -> Result<String, AttemptError>;
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
    pub site_url: String,
    pub site_name: String,
    pub keys: HashMap<Provider, String>,
    pub base_urls: HashMap<Provider, String>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            temperature: 0.7,
            max_tokens: 2000,
            site_url: "http://localhost:3000".to_string(),
            site_name: "Flux AI".to_string(),
            keys: HashMap::new(),
            base_urls: HashMap::new(),
        }
    }
}

impl UpstreamSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.upstream_timeout(),
            site_url: config.site_url.clone(),
            site_name: config.site_name.clone(),
            keys: config.provider_keys.clone(),
            base_urls: config.provider_base_urls.clone(),
            ..Self::default()
        }
    }
}

pub struct UpstreamClient {
    client: Client,
    settings: UpstreamSettings,
}

impl UpstreamClient {
    pub fn new(settings: UpstreamSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()?;

        let configured: Vec<String> = Provider::ALL
            .iter()
            .filter(|p| settings.keys.contains_key(*p))
            .map(|p| p.to_string())
            .collect();
        tracing::info!(
            "Upstream client ready, providers with keys: [{}], timeout {:?}",
            configured.join(", "),
            settings.timeout
        );

        Ok(Self { client, settings })
    }

    fn base_url(&self, provider: Provider) -> &str {
        self.settings
            .base_urls
            .get(&provider)
            .map(|s| s.trim_end_matches('/'))
            .unwrap_or_else(|| provider.default_base_url())
    }

    fn endpoint(&self, candidate: &Candidate) -> String {
        let base = self.base_url(candidate.provider);
        match candidate.provider.wire_format() {
            WireFormat::ChatCompletions => format!("{}/chat/completions", base),
            WireFormat::GenerateContent => {
                format!("{}/models/{}:generateContent", base, candidate.model)
            }
        }
    }

    pub fn build_body(&self, candidate: &Candidate, prompt: &ChatPrompt) -> Value {
        // 只有视觉模型才附带图片
        let image = prompt.image.as_ref().filter(|_| candidate.vision);

        match candidate.provider.wire_format() {
            WireFormat::ChatCompletions => {
                let user_content = match image {
                    Some(image) => json!([
                        { "type": "text", "text": prompt.text },
                        { "type": "image_url", "image_url": { "url": image.uri } }
                    ]),
                    None => json!(prompt.text),
                };
                json!({
                    "model": candidate.model,
                    "messages": [
                        { "role": "system", "content": prompt.system },
                        { "role": "user", "content": user_content }
                    ],
                    "temperature": self.settings.temperature,
                    "max_tokens": self.settings.max_tokens,
                })
            }
            WireFormat::GenerateContent => {
                let mut parts = vec![json!({ "text": prompt.text })];
                if let Some(image) = image {
                    parts.push(json!({
                        "inline_data": { "mime_type": image.mime, "data": image.data }
                    }));
                }
                json!({
                    "systemInstruction": { "parts": [{ "text": prompt.system }] },
                    "contents": [{ "role": "user", "parts": parts }],
                    "generationConfig": {
                        "temperature": self.settings.temperature,
                        "maxOutputTokens": self.settings.max_tokens,
                    },
                })
            }
        }
    }
}

/// 从服务商响应中取出助手文本
pub fn extract_reply(format: WireFormat, body: &Value) -> Result<String, AttemptError> {
    let text = match format {
        WireFormat::ChatCompletions => {
            let content = body
                .pointer("/choices/0/message/content")
                .ok_or_else(|| AttemptError::Malformed("missing choices[0].message".into()))?;
            match content {
                Value::String(s) => s.clone(),
                Value::Array(parts) => parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(""),
                Value::Null => String::new(),
                other => {
                    return Err(AttemptError::Malformed(format!(
                        "unexpected content type: {}",
                        other
                    )));
                }
            }
        }
        WireFormat::GenerateContent => {
            let parts = body
                .pointer("/candidates/0/content/parts")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    AttemptError::Malformed("missing candidates[0].content.parts".into())
                })?;
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        }
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AttemptError::EmptyContent);
    }
    Ok(trimmed.to_string())
}

#[async_trait]
impl ChatBackend for UpstreamClient {
    fn is_configured(&self, provider: Provider) -> bool {
        self.settings
            .keys
            .get(&provider)
            .is_some_and(|k| !k.trim().is_empty())
    }

    async fn complete(
        &self,
        candidate: &Candidate,
        prompt: &ChatPrompt,
    ) -> Result<String, AttemptError> {
        let key = self
            .settings
            .keys
            .get(&candidate.provider)
            .ok_or(AttemptError::MissingKey(candidate.provider))?;

        let mut request = self
            .client
            .post(self.endpoint(candidate))
            .timeout(self.settings.timeout)
            .json(&self.build_body(candidate, prompt));

        request = match candidate.provider.auth_shape() {
            AuthShape::Bearer => request.bearer_auth(key),
            AuthShape::GoogApiKey => request.header("x-goog-api-key", key),
        };
        if candidate.provider == Provider::OpenRouter {
            request = request
                .header("HTTP-Referer", &self.settings.site_url)
                .header("X-Title", &self.settings.site_name);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(ERROR_BODY_LOG_LIMIT).collect();
            tracing::debug!(
                "Upstream {} ({}) returned {}: {}",
                candidate.provider,
                candidate.model,
                status,
                snippet
            );
            return Err(AttemptError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        extract_reply(candidate.provider.wire_format(), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::catalog::Mode;
    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode, Uri},
        response::{IntoResponse, Response},
    };
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct Seen {
        path: String,
        headers: HeaderMap,
        body: Value,
    }

    type Log = Arc<Mutex<Vec<Seen>>>;

    async fn mock_upstream(
        State(log): State<Log>,
        uri: Uri,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        log.lock().unwrap().push(Seen {
            path: uri.path().to_string(),
            headers,
            body: body.clone(),
        });

        if uri.path().ends_with(":generateContent") {
            return Json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "gemini says hi" }] } }]
            }))
            .into_response();
        }

        match body["model"].as_str().unwrap_or_default() {
            "ok" => Json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "  hello  " } }]
            }))
            .into_response(),
            "parts" => Json(json!({
                "choices": [{ "message": { "content": [{ "type": "text", "text": "a" }, { "type": "text", "text": "b" }] } }]
            }))
            .into_response(),
            "empty" => Json(json!({ "choices": [{ "message": { "content": "" } }] })).into_response(),
            "weird" => Json(json!({ "error": { "message": "no credits" } })).into_response(),
            "busy" => (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response(),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({ "choices": [{ "message": { "content": "late" } }] })).into_response()
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        }
    }

    async fn spawn_mock() -> (String, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(mock_upstream).with_state(log.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), log)
    }

    fn client_for(base: &str) -> UpstreamClient {
        let mut settings = UpstreamSettings {
            timeout: Duration::from_millis(300),
            ..UpstreamSettings::default()
        };
        for provider in [Provider::OpenRouter, Provider::Gemini, Provider::OpenAi] {
            settings.keys.insert(provider, format!("key-{}", provider));
            settings.base_urls.insert(provider, format!("{}/{}", base, provider));
        }
        UpstreamClient::new(settings).unwrap()
    }

    fn candidate(provider: Provider, model: &str, vision: bool) -> Candidate {
        Candidate::new(provider, model, model, vision, true, &[Mode::Chat])
    }

    fn prompt(image: bool) -> ChatPrompt {
        ChatPrompt {
            system: "be brief".to_string(),
            text: "what is this?".to_string(),
            image: image.then(|| ImageAttachment::parse("data:image/png;base64,AAAA").unwrap()),
        }
    }

    #[tokio::test]
    async fn openai_shape_success_is_trimmed_and_authenticated() {
        let (base, log) = spawn_mock().await;
        let client = client_for(&base);

        let reply = client
            .complete(&candidate(Provider::OpenRouter, "ok", false), &prompt(false))
            .await
            .unwrap();
        assert_eq!(reply, "hello");

        let seen = log.lock().unwrap()[0].clone();
        assert_eq!(seen.path, "/openrouter/chat/completions");
        assert_eq!(seen.headers["authorization"], "Bearer key-openrouter");
        assert_eq!(seen.headers["x-title"], "Flux AI");
        assert_eq!(seen.body["messages"][0]["role"], "system");
        assert_eq!(seen.body["messages"][1]["content"], "what is this?");
    }

    #[tokio::test]
    async fn image_parts_only_go_to_vision_models() {
        let (base, log) = spawn_mock().await;
        let client = client_for(&base);

        client
            .complete(&candidate(Provider::OpenAi, "ok", true), &prompt(true))
            .await
            .unwrap();
        client
            .complete(&candidate(Provider::OpenAi, "ok", false), &prompt(true))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        let vision_content = &log[0].body["messages"][1]["content"];
        assert_eq!(vision_content[0]["text"], "what is this?");
        assert_eq!(vision_content[1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(log[1].body["messages"][1]["content"], "what is this?");
    }

    #[tokio::test]
    async fn gemini_shape_uses_goog_key_and_inline_data() {
        let (base, log) = spawn_mock().await;
        let client = client_for(&base);

        let reply = client
            .complete(&candidate(Provider::Gemini, "gemini-2.0-flash", true), &prompt(true))
            .await
            .unwrap();
        assert_eq!(reply, "gemini says hi");

        let seen = log.lock().unwrap()[0].clone();
        assert_eq!(seen.path, "/gemini/models/gemini-2.0-flash:generateContent");
        assert_eq!(seen.headers["x-goog-api-key"], "key-gemini");
        assert!(seen.headers.get("authorization").is_none());
        let parts = &seen.body["contents"][0]["parts"];
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "AAAA");
        assert_eq!(seen.body["systemInstruction"]["parts"][0]["text"], "be brief");
    }

    #[tokio::test]
    async fn failures_are_classified() {
        let (base, _log) = spawn_mock().await;
        let client = client_for(&base);
        let run = |model: &'static str| {
            let client = &client;
            async move {
                client
                    .complete(&candidate(Provider::OpenRouter, model, false), &prompt(false))
                    .await
            }
        };

        assert!(matches!(run("busy").await, Err(AttemptError::Status(429))));
        assert!(matches!(run("broken").await, Err(AttemptError::Status(500))));
        assert!(matches!(run("empty").await, Err(AttemptError::EmptyContent)));
        assert!(matches!(run("weird").await, Err(AttemptError::Malformed(_))));
        assert!(matches!(run("slow").await, Err(AttemptError::Timeout)));
        assert_eq!(run("parts").await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn missing_key_is_reported_without_a_request() {
        let (base, log) = spawn_mock().await;
        let client = client_for(&base);

        assert!(!client.is_configured(Provider::Zenmux));
        let result = client
            .complete(&candidate(Provider::Zenmux, "ok", false), &prompt(false))
            .await;
        assert!(matches!(result, Err(AttemptError::MissingKey(Provider::Zenmux))));
        assert!(log.lock().unwrap().is_empty());
    }
}
