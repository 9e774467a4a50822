use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::studio::image::{EncodedImage, ImageError};
use crate::studio::prompt::{ModelRequest, RequestPart};
use crate::utils::formatting::truncate_for_log;
use crate::utils::http::get_http_client;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyProfile {
    #[default]
    Permissive,
    Standard,
}

impl SafetyProfile {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "permissive" | "off" | "none" => Some(SafetyProfile::Permissive),
            "standard" => Some(SafetyProfile::Standard),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SafetyProfile::Permissive => "permissive",
            SafetyProfile::Standard => "standard",
        }
    }

    const fn threshold(self) -> &'static str {
        match self {
            SafetyProfile::Permissive => "OFF",
            SafetyProfile::Standard => "BLOCK_MEDIUM_AND_ABOVE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiImageConfig {
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
    grounding_metadata: Option<GeminiGroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
        #[serde(default)]
        thought: bool,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGroundingMetadata {
    grounding_chunks: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

impl GeminiResponse {
    fn first_candidate_parts(&self) -> &[GeminiPart] {
        self.candidates
            .as_deref()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.content.as_ref())
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[])
    }

    /// The first part carrying inline image data, decoded.
    pub fn first_image(&self) -> Option<Result<EncodedImage, ImageError>> {
        self.first_candidate_parts().iter().find_map(|part| match part {
            GeminiPart::InlineData { inline_data } => Some(EncodedImage::from_base64(
                inline_data.mime_type.as_deref(),
                &inline_data.data,
            )),
            _ => None,
        })
    }

    /// Concatenated answer text of the first candidate, thought parts excluded.
    pub fn text(&self) -> String {
        self.first_candidate_parts()
            .iter()
            .filter_map(|part| match part {
                GeminiPart::Text { text, thought } if !*thought => Some(text.as_str()),
                _ => None,
            })
            .collect::<String>()
    }

    pub fn has_search_grounding(&self) -> bool {
        self.candidates
            .as_deref()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.grounding_metadata.as_ref())
            .and_then(|metadata| metadata.grounding_chunks.as_ref())
            .is_some_and(|chunks| !chunks.is_empty())
    }

    /// Why the model produced nothing usable, when it says so.
    pub fn refusal_reason(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.clone())
        {
            return Some(format!("prompt blocked: {reason}"));
        }
        self.candidates
            .as_deref()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.finish_reason.clone())
            .filter(|reason| reason != "STOP")
            .map(|reason| format!("finish reason: {reason}"))
    }
}

/// Sends one `generateContent` call. Implemented over HTTP for the bot and by
/// in-memory fakes in tests.
pub trait GeminiTransport: Send + Sync {
    fn generate_content(
        &self,
        model: &str,
        payload: Value,
    ) -> impl Future<Output = Result<GeminiResponse>> + Send;
}

pub fn build_safety_settings(profile: SafetyProfile) -> Vec<Value> {
    let threshold = profile.threshold();
    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": threshold }),
    ]
}

fn build_image_config(config: Option<&GeminiImageConfig>) -> Option<Value> {
    let config = config?;
    let mut map = Map::new();

    if let Some(aspect_ratio) = config.aspect_ratio.as_deref() {
        let trimmed = aspect_ratio.trim();
        if !trimmed.is_empty() {
            map.insert("aspectRatio".to_string(), json!(trimmed));
        }
    }

    if let Some(image_size) = config.image_size.as_deref() {
        let trimmed = image_size.trim();
        if !trimmed.is_empty() {
            map.insert("imageSize".to_string(), json!(trimmed));
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

fn build_parts(request: &ModelRequest) -> Vec<Value> {
    request
        .parts
        .iter()
        .map(|part| match part {
            RequestPart::Text(text) => json!({ "text": text }),
            RequestPart::Image(image) => json!({
                "inlineData": {
                    "mimeType": image.mime_type(),
                    "data": image.to_base64()
                }
            }),
        })
        .collect()
}

/// Serialises a studio request into the REST body. `image_config` switches the
/// call into image-output mode.
pub fn build_payload(
    request: &ModelRequest,
    safety: SafetyProfile,
    image_config: Option<&GeminiImageConfig>,
) -> Value {
    let mut payload = Map::new();

    if let Some(system_instruction) = request.system_instruction.as_deref() {
        payload.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system_instruction }] }),
        );
    }

    payload.insert(
        "contents".to_string(),
        json!([{ "role": "user", "parts": build_parts(request) }]),
    );

    if let Some(image_config) = image_config {
        let mut generation_config = json!({ "responseModalities": ["TEXT", "IMAGE"] });
        if let Some(config) = build_image_config(Some(image_config)) {
            if let Some(config_object) = generation_config.as_object_mut() {
                config_object.insert("imageConfig".to_string(), config);
            }
        }
        payload.insert("generationConfig".to_string(), generation_config);
    }

    if request.search_grounding {
        payload.insert("tools".to_string(), json!([{ "google_search": {} }]));
    }

    payload.insert(
        "safetySettings".to_string(),
        Value::Array(build_safety_settings(safety)),
    );

    Value::Object(payload)
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

pub fn summarize_gemini_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if payload.pointer("/systemInstruction").is_some() {
        summary.insert("systemInstruction".to_string(), json!(true));
    }

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let summarized: Vec<Value> = contents
            .iter()
            .map(|content| {
                let parts = content
                    .get("parts")
                    .and_then(|value| value.as_array())
                    .map(|parts| summarize_gemini_parts(parts))
                    .unwrap_or_default();
                json!({ "parts": parts })
            })
            .collect();
        summary.insert("contents".to_string(), Value::Array(summarized));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    if let Some(tools) = payload.get("tools") {
        summary.insert("tools".to_string(), tools.clone());
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut other_parts = 0usize;

    for part in response.first_candidate_parts() {
        match part {
            GeminiPart::Text { .. } => text_parts += 1,
            GeminiPart::InlineData { .. } => image_parts += 1,
            GeminiPart::Other(_) => other_parts += 1,
        }
    }

    json!({
        "candidates": response.candidates.as_ref().map(|candidates| candidates.len()).unwrap_or(0),
        "textParts": text_parts,
        "imageParts": image_parts,
        "otherParts": other_parts,
        "grounded": response.has_search_grounding(),
        "refusal": response.refusal_reason(),
        "textPreview": truncate_for_log(&response.text(), 200),
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

/// REST transport against the Generative Language API.
#[derive(Debug, Clone)]
pub struct HttpGeminiTransport {
    api_key: String,
    api_base: String,
    timeout: Duration,
}

impl HttpGeminiTransport {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn redact(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_base, model)
    }
}

impl GeminiTransport for HttpGeminiTransport {
    async fn generate_content(&self, model: &str, payload: Value) -> Result<GeminiResponse> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("GEMINI_API_KEY is not configured"));
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload);
            debug!(target: "llm.gemini", model = model, payload = %payload_summary);
        }

        let response = match get_http_client()
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err_text = self.redact(&err.to_string());
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={}, status={:?})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    err.status()
                );
                return Err(anyhow!("Gemini request failed: {}", err_text));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("Gemini API error: status={}, body={}", status, body_summary);
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                detail
            ));
        }

        let value = response.json::<GeminiResponse>().await?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let response_summary = summarize_gemini_response(&value);
            debug!(target: "llm.gemini", model = model, response = %response_summary);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio::prompt::build_link_analysis_request;

    fn response(value: Value) -> GeminiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn first_image_skips_text_parts() {
        let parsed = response(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here is your room" },
                    { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } },
                    { "inlineData": { "mimeType": "image/png", "data": "d29ybGQ=" } }
                ]}
            }]
        }));
        let image = parsed.first_image().unwrap().unwrap();
        assert_eq!(image.bytes(), b"hello");
        assert_eq!(image.mime_type(), "image/png");
    }

    #[test]
    fn text_ignores_thoughts_and_unknown_parts() {
        let parsed = response(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "planning...", "thought": true },
                    { "functionCall": { "name": "noop" } },
                    { "text": "**Vision** " },
                    { "text": "Warm oak." }
                ]}
            }]
        }));
        assert_eq!(parsed.text(), "**Vision** Warm oak.");
        assert!(parsed.first_image().is_none());
    }

    #[test]
    fn grounding_requires_chunks() {
        let grounded = response(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "A chair" }] },
                "groundingMetadata": { "groundingChunks": [{ "web": { "uri": "https://x" } }] }
            }]
        }));
        assert!(grounded.has_search_grounding());

        let empty = response(json!({
            "candidates": [{ "groundingMetadata": { "groundingChunks": [] } }]
        }));
        assert!(!empty.has_search_grounding());
        assert!(!response(json!({})).has_search_grounding());
    }

    #[test]
    fn refusal_reason_reports_blocks() {
        let blocked = response(json!({ "promptFeedback": { "blockReason": "SAFETY" } }));
        assert_eq!(blocked.refusal_reason().as_deref(), Some("prompt blocked: SAFETY"));

        let finished = response(json!({
            "candidates": [{ "finishReason": "STOP", "content": { "parts": [] } }]
        }));
        assert!(finished.refusal_reason().is_none());
    }

    #[test]
    fn payload_includes_search_tool_and_safety() {
        let request = build_link_analysis_request("https://shop.example/lamp");
        let payload = build_payload(&request, SafetyProfile::Standard, None);
        assert_eq!(payload["tools"][0], json!({ "google_search": {} }));
        assert_eq!(
            payload["safetySettings"][0]["threshold"],
            json!("BLOCK_MEDIUM_AND_ABOVE")
        );
        assert!(payload.get("generationConfig").is_none());
        assert!(payload.get("systemInstruction").is_none());
        assert_eq!(payload["contents"][0]["role"], json!("user"));
    }

    #[test]
    fn image_config_requests_image_modality() {
        let request = ModelRequest {
            system_instruction: Some("be brief".to_string()),
            parts: vec![
                RequestPart::Text("prompt".to_string()),
                RequestPart::Image(
                    EncodedImage::from_model_output(Some("image/jpeg"), b"hello".to_vec()).unwrap(),
                ),
            ],
            search_grounding: false,
        };
        let config = GeminiImageConfig {
            aspect_ratio: Some("16:9".to_string()),
            image_size: Some("  ".to_string()),
        };
        let payload = build_payload(&request, SafetyProfile::Permissive, Some(&config));
        assert_eq!(
            payload["generationConfig"],
            json!({ "responseModalities": ["TEXT", "IMAGE"], "imageConfig": { "aspectRatio": "16:9" } })
        );
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], json!("be brief"));
        let parts = payload["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[1]["inlineData"]["data"], json!("aGVsbG8="));

        let summary = summarize_gemini_payload(&payload);
        assert_eq!(summary["contents"][0]["parts"][1]["inlineData"]["dataLen"], json!(8));
    }

    #[test]
    fn error_body_summary_prefers_api_message() {
        let (message, _) = summarize_error_body(r#"{"error":{"message":"API key not valid"}}"#);
        assert_eq!(message.as_deref(), Some("API key not valid"));
        let (message, summary) = summarize_error_body("   ");
        assert!(message.is_none());
        assert_eq!(summary, "empty response body");
    }

    #[test]
    fn transport_redacts_api_key() {
        let transport = HttpGeminiTransport::new(
            "secret-key",
            "https://example.test/v1beta/",
            Duration::from_secs(5),
        );
        assert_eq!(
            transport.redact("url?key=secret-key failed"),
            "url?key=[redacted] failed"
        );
        assert_eq!(
            transport.endpoint("gemini-3-pro-preview"),
            "https://example.test/v1beta/models/gemini-3-pro-preview:generateContent"
        );
    }
}
