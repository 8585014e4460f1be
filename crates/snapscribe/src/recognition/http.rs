//! OpenAI-compatible chat-completions client, used both to read code out of
//! screenshots and for the merge pass.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use super::prompts::{fragment_header, strip_code_fences, MERGE_PROMPT, RECOGNITION_PROMPT};
use super::{MergeError, Merger, RecognitionError, Recognizer};
use crate::store::ImageData;

const USER_AGENT: &str = concat!("snapscribe/", env!("CARGO_PKG_VERSION"));
/// Response bodies quoted in error messages are cut to this many chars.
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Clone)]
pub struct VisionClientSettings {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    pub model: String,
    pub merge_model: String,
    /// `None` for local endpoints that take no bearer token.
    pub api_key: Option<SecretString>,
    pub request_timeout: Duration,
    pub max_tokens: u32,
}

pub struct VisionClient {
    http: reqwest::Client,
    settings: VisionClientSettings,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl VisionClient {
    pub fn new(settings: VisionClientSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.endpoint.trim_end_matches('/')
        )
    }

    /// One round trip. Errors come back as plain messages that start with
    /// the HTTP status when there was one.
    async fn complete(&self, body: Value) -> Result<String, String> {
        let mut request = self.http.post(self.completions_url()).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let response = request.send().await.map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&text, MAX_ERROR_BODY)
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("malformed completion response: {}", e))?;
        Ok(first_content(parsed))
    }
}

fn recognition_request(model: &str, max_tokens: u32, image: &ImageData) -> Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": 0,
        "messages": [
            { "role": "system", "content": RECOGNITION_PROMPT },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": "Transcribe the code in this screenshot." },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{}", image.mime_type, encoded) }
                    }
                ]
            }
        ]
    })
}

fn merge_request(model: &str, max_tokens: u32, fragments: &[String]) -> Value {
    let mut listing = String::new();
    for (index, fragment) in fragments.iter().enumerate() {
        listing.push_str(&fragment_header(index, fragments.len()));
        listing.push('\n');
        listing.push_str(fragment);
        if !fragment.ends_with('\n') {
            listing.push('\n');
        }
    }

    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": 0,
        "messages": [
            { "role": "system", "content": MERGE_PROMPT },
            { "role": "user", "content": listing }
        ]
    })
}

fn first_content(response: ChatResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default()
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match single.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &single[..cut]),
        None => single,
    }
}

#[async_trait]
impl Recognizer for VisionClient {
    async fn recognize(&self, image: &ImageData) -> Result<String, RecognitionError> {
        let body = recognition_request(&self.settings.model, self.settings.max_tokens, image);
        let text = self
            .complete(body)
            .await
            .map_err(|message| RecognitionError::classify(&message))?;
        Ok(strip_code_fences(&text))
    }
}

#[async_trait]
impl Merger for VisionClient {
    async fn merge(&self, fragments: &[String]) -> Result<String, MergeError> {
        let body = merge_request(
            &self.settings.merge_model,
            self.settings.max_tokens,
            fragments,
        );
        let text = self.complete(body).await.map_err(MergeError::Failed)?;
        let merged = strip_code_fences(&text);
        if merged.trim().is_empty() {
            return Err(MergeError::EmptyOutput);
        }
        Ok(merged)
    }
}
