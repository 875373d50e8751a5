use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{self, LlmConfig};
use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged message of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Opaque text-generation capability.
///
/// Given role-tagged messages it produces text asynchronously. Readiness and
/// download progress are plain reads so UIs can poll them.
pub trait LanguageModel: Send + Sync {
    fn is_ready(&self) -> bool;

    /// Fraction in `0.0..=1.0`; only meaningful while the model is fetched.
    fn download_progress(&self) -> f32;

    /// True while a `generate` call is in flight.
    fn is_generating(&self) -> bool {
        false
    }

    fn generate(&self, messages: Vec<LlmMessage>) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LlmProvider {
    Ollama,
    OpenAI,
    Gemini,
    Anthropic,
}

/// HTTP-backed [`LanguageModel`] for Ollama, OpenAI, Anthropic and Gemini.
pub struct LlmService {
    provider: LlmProvider,
    config: LlmConfig,
    api_key: Option<String>,
    client: reqwest::Client,
    ready: AtomicBool,
    generating: AtomicBool,
    /// `f32` bit pattern of the download fraction.
    progress: AtomicU32,
}

impl std::fmt::Debug for LlmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmService")
            .field("provider", &self.provider)
            .field("model", &self.config.model)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Clears the generating flag when a request ends, error or not.
struct GeneratingGuard<'a>(&'a AtomicBool);

impl<'a> GeneratingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl LlmService {
    /// Create an LLM service from configuration.
    ///
    /// Hosted providers are ready as soon as their API key resolves. Ollama
    /// starts not ready; call [`prepare`](Self::prepare) to check for (and
    /// optionally pull) the model.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let provider = match config.provider.as_str() {
            "ollama" => LlmProvider::Ollama,
            "openai" => LlmProvider::OpenAI,
            "gemini" => LlmProvider::Gemini,
            "anthropic" | "claude" => LlmProvider::Anthropic,
            other => {
                return Err(LedgerError::Config(format!(
                    "unknown LLM provider: '{other}' (expected 'ollama', 'openai', 'gemini', or 'anthropic')"
                )));
            }
        };

        let default_env_var = match provider {
            LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
            LlmProvider::Gemini => Some("GEMINI_API_KEY"),
            LlmProvider::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmProvider::Ollama => None,
        };
        let api_key = default_env_var
            .map(|var| {
                config::resolve_api_key(
                    config.api_key.as_deref(),
                    config.env_var.as_deref(),
                    var,
                    &config.provider,
                    "llm",
                )
            })
            .transpose()?;

        let hosted = provider != LlmProvider::Ollama;
        Ok(Self {
            provider,
            config: config.clone(),
            api_key,
            client: reqwest::Client::new(),
            ready: AtomicBool::new(hosted),
            generating: AtomicBool::new(false),
            progress: AtomicU32::new(if hosted { 1.0f32 } else { 0.0f32 }.to_bits()),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn provider_name(&self) -> &str {
        &self.config.provider
    }

    fn set_progress(&self, fraction: f32) {
        self.progress
            .store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }

    fn mark_ready(&self) {
        self.set_progress(1.0);
        self.ready.store(true, Ordering::SeqCst);
    }

    fn ollama_base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/')
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| LedgerError::Config(format!("{} requires an API key", self.config.provider)))
    }

    /// Make the model usable.
    ///
    /// For Ollama this lists local models and, when the configured one is
    /// missing and `llm.auto_pull` is set, streams a pull while updating
    /// [`download_progress`](LanguageModel::download_progress).
    pub async fn prepare(&self) -> Result<()> {
        if self.provider != LlmProvider::Ollama || self.is_ready() {
            return Ok(());
        }

        let url = format!("{}/api/tags", self.ollama_base_url());
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LedgerError::Llm(format!("failed to reach Ollama at {url}: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Llm(format!("Ollama tags error {status}: {text}")));
        }
        let tags: Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Llm(format!("Ollama tags response parse error: {e}")))?;

        if model_listed(&tags, &self.config.model) {
            tracing::debug!(model = %self.config.model, "model already present");
            self.mark_ready();
            return Ok(());
        }

        if !self.config.auto_pull {
            return Err(LedgerError::Llm(format!(
                "model '{}' is not available locally; run `ollama pull {}` or set llm.auto_pull",
                self.config.model, self.config.model
            )));
        }

        self.pull().await
    }

    /// Ollama: POST {base_url}/api/pull, newline-delimited JSON progress.
    async fn pull(&self) -> Result<()> {
        let url = format!("{}/api/pull", self.ollama_base_url());
        tracing::info!(model = %self.config.model, "pulling model");

        let mut resp = self
            .client
            .post(&url)
            .json(&json!({ "model": self.config.model, "stream": true }))
            .send()
            .await
            .map_err(|e| LedgerError::Llm(format!("Ollama pull request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Llm(format!("Ollama pull error {status}: {text}")));
        }

        let mut buffer: Vec<u8> = Vec::new();
        let mut finished = false;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| LedgerError::Llm(format!("Ollama pull stream failed: {e}")))?
        {
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                finished |= self.apply_pull_line(&line)?;
            }
        }
        if !buffer.is_empty() {
            finished |= self.apply_pull_line(&buffer)?;
        }

        if !finished {
            return Err(LedgerError::Llm(format!(
                "pull of '{}' ended before completion",
                self.config.model
            )));
        }
        self.mark_ready();
        Ok(())
    }

    /// Returns `true` once the stream reports success.
    fn apply_pull_line(&self, line: &[u8]) -> Result<bool> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        let value: Value = serde_json::from_str(text)?;
        match parse_pull_event(&value) {
            PullEvent::Progress(fraction) => {
                self.set_progress(fraction);
                Ok(false)
            }
            PullEvent::Status => Ok(false),
            PullEvent::Success => Ok(true),
            PullEvent::Failed(message) => Err(LedgerError::Llm(format!("Ollama pull failed: {message}"))),
        }
    }

    /// Ollama: POST {base_url}/api/chat
    async fn generate_ollama(&self, messages: &[LlmMessage]) -> Result<String> {
        let url = format!("{}/api/chat", self.ollama_base_url());
        let body = json!({
            "model": self.config.model,
            "messages": chat_messages(messages),
            "stream": false,
            "options": {
                "num_predict": self.config.max_tokens,
            }
        });

        let json = self.post_json("Ollama", self.client.post(&url), &body).await?;
        json["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LedgerError::Llm("Ollama response missing message content".into()))
    }

    /// OpenAI: POST {base_url}/v1/chat/completions
    async fn generate_openai(&self, messages: &[LlmMessage]) -> Result<String> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com");
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));

        let body = json!({
            "model": self.config.model,
            "messages": chat_messages(messages),
            "max_tokens": self.config.max_tokens,
        });

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.key()?));
        let json = self.post_json("OpenAI", request, &body).await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LedgerError::Llm("OpenAI response missing content".into()))
    }

    /// Anthropic: POST {base_url}/v1/messages
    async fn generate_anthropic(&self, messages: &[LlmMessage]) -> Result<String> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com");
        let url = format!("{}/v1/messages", base_url.trim_end_matches('/'));

        let (system, turns) = split_system(messages);
        let turns: Vec<Value> = turns
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": turns,
        });
        if let Some(sys) = system {
            body["system"] = Value::String(sys);
        }

        let request = self
            .client
            .post(&url)
            .header("x-api-key", self.key()?)
            .header("anthropic-version", "2023-06-01");
        let json = self.post_json("Anthropic", request, &body).await?;

        // {"content": [{"type": "text", "text": "..."}]}
        json["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LedgerError::Llm("Anthropic response missing text content".into()))
    }

    /// Gemini: POST {base_url}/v1beta/models/{model}:generateContent
    async fn generate_gemini(&self, messages: &[LlmMessage]) -> Result<String> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com");
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            base_url.trim_end_matches('/'),
            self.config.model,
            self.key()?,
        );

        let (system, turns) = split_system(messages);
        let contents: Vec<Value> = turns
            .iter()
            .map(|m| {
                let role = if m.role == Role::Assistant { "model" } else { "user" };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": self.config.max_tokens,
            }
        });
        if let Some(sys) = system {
            body["systemInstruction"] = json!({"parts": [{"text": sys}]});
        }

        let json = self.post_json("Gemini", self.client.post(&url), &body).await?;
        json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LedgerError::Llm("Gemini response missing text".into()))
    }

    async fn post_json(
        &self,
        provider: &str,
        request: reqwest::RequestBuilder,
        body: &Value,
    ) -> Result<Value> {
        let resp = request
            .json(body)
            .send()
            .await
            .map_err(|e| LedgerError::Llm(format!("{provider} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Llm(format!("{provider} error {status}: {text}")));
        }

        resp.json()
            .await
            .map_err(|e| LedgerError::Llm(format!("{provider} response parse error: {e}")))
    }
}

impl LanguageModel for LlmService {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn download_progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::SeqCst))
    }

    fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    async fn generate(&self, messages: Vec<LlmMessage>) -> Result<String> {
        if !self.is_ready() {
            return Err(LedgerError::Llm(format!(
                "model '{}' is not ready",
                self.config.model
            )));
        }
        let _guard = GeneratingGuard::enter(&self.generating);
        match self.provider {
            LlmProvider::Ollama => self.generate_ollama(&messages).await,
            LlmProvider::OpenAI => self.generate_openai(&messages).await,
            LlmProvider::Gemini => self.generate_gemini(&messages).await,
            LlmProvider::Anthropic => self.generate_anthropic(&messages).await,
        }
    }
}

fn chat_messages(messages: &[LlmMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect()
}

/// Providers that take the system prompt out of band get all system
/// messages joined, in order.
fn split_system(messages: &[LlmMessage]) -> (Option<String>, Vec<&LlmMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns = messages.iter().filter(|m| m.role != Role::System).collect();
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, turns)
}

/// Whether `/api/tags` lists `model`. An untagged name matches `:latest`.
fn model_listed(tags: &Value, model: &str) -> bool {
    let Some(models) = tags["models"].as_array() else {
        return false;
    };
    let wanted_latest = if model.contains(':') {
        None
    } else {
        Some(format!("{model}:latest"))
    };
    models.iter().any(|m| {
        ["name", "model"].iter().any(|field| {
            m[*field].as_str().is_some_and(|name| {
                name == model || wanted_latest.as_deref() == Some(name)
            })
        })
    })
}

#[derive(Debug, PartialEq)]
enum PullEvent {
    Progress(f32),
    Status,
    Success,
    Failed(String),
}

fn parse_pull_event(value: &Value) -> PullEvent {
    if let Some(error) = value["error"].as_str() {
        return PullEvent::Failed(error.to_string());
    }
    if value["status"].as_str() == Some("success") {
        return PullEvent::Success;
    }
    match (value["completed"].as_f64(), value["total"].as_f64()) {
        (Some(completed), Some(total)) if total > 0.0 => {
            PullEvent::Progress((completed / total) as f32)
        }
        _ => PullEvent::Status,
    }
}
