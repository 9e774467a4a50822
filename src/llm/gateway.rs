use serde_json::json;
use tracing::{error, info, warn};

use crate::llm::gemini::{
    build_payload, GeminiImageConfig, GeminiResponse, GeminiTransport, SafetyProfile,
};
use crate::studio::image::EncodedImage;
use crate::studio::prompt::{
    build_advice_request, build_blueprint_request, build_link_analysis_request,
    build_visualization_request, BlueprintBrief, ModelRequest, VisualizationBrief,
};
use crate::studio::session::AdviceContext;
use crate::utils::formatting::truncate_for_log;
use crate::utils::timing::log_llm_timing;

pub const ADVICE_EMPTY_FALLBACK: &str = "Analyzing spatial potential...";
pub const ADVICE_ERROR_FALLBACK: &str =
    "I am currently recalibrating my design sensors. Please try again.";
pub const REPORT_EMPTY_FALLBACK: &str = "<p>Report generation unavailable.</p>";
pub const REPORT_ERROR_FALLBACK: &str = "<p>Could not generate report text.</p>";
pub const LINK_EMPTY_FALLBACK: &str = "Could not analyze link.";
pub const LINK_ERROR_FALLBACK: &str = "A modern furniture piece found online.";
pub const LINK_VERIFIED_SUFFIX: &str = " (Verified via Google Search)";

const PROVIDER: &str = "gemini";

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub image_model: String,
    pub reasoning_model: String,
    pub safety: SafetyProfile,
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            image_model: "gemini-3-pro-image-preview".to_string(),
            reasoning_model: "gemini-3-pro-preview".to_string(),
            safety: SafetyProfile::default(),
            aspect_ratio: Some("16:9".to_string()),
            image_size: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VisualizationError {
    #[error("image model request failed: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("{model} returned no image{}", detail_suffix(.detail))]
    NoImage {
        model: String,
        detail: Option<String>,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|detail| format!(" ({detail})"))
        .unwrap_or_default()
}

/// Text produced by an enrichment call. Always usable; `Fallback` marks a
/// placeholder substituted for a failed or empty answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    Generated(String),
    Fallback { text: String, reason: String },
}

impl Enrichment {
    pub fn text(&self) -> &str {
        match self {
            Enrichment::Generated(text) => text,
            Enrichment::Fallback { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Enrichment::Generated(text) => text,
            Enrichment::Fallback { text, .. } => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Enrichment::Fallback { .. })
    }
}

/// Routes studio requests to the image and reasoning models.
pub struct DesignGateway<T> {
    transport: T,
    settings: GatewaySettings,
}

impl<T: GeminiTransport> DesignGateway<T> {
    pub fn new(transport: T, settings: GatewaySettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    async fn call(
        &self,
        model: &str,
        operation: &str,
        request: &ModelRequest,
        image_config: Option<&GeminiImageConfig>,
    ) -> anyhow::Result<GeminiResponse> {
        let payload = build_payload(request, self.settings.safety, image_config);
        let metadata = json!({
            "images": request.image_count(),
            "search": request.search_grounding,
        });
        log_llm_timing(PROVIDER, model, operation, Some(metadata), || {
            self.transport.generate_content(model, payload)
        })
        .await
    }

    async fn reason(
        &self,
        operation: &str,
        request: &ModelRequest,
    ) -> Result<GeminiResponse, anyhow::Error> {
        let model = self.settings.reasoning_model.clone();
        self.call(&model, operation, request, None).await
    }

    pub async fn generate_visualization(
        &self,
        brief: &VisualizationBrief,
    ) -> Result<EncodedImage, VisualizationError> {
        let request = build_visualization_request(brief);
        let image_config = GeminiImageConfig {
            aspect_ratio: self.settings.aspect_ratio.clone(),
            image_size: self.settings.image_size.clone(),
        };
        let model = self.settings.image_model.as_str();
        info!(
            "Generating visualization: mode={} budget={} format={:?} references={}",
            brief.options.mode,
            brief.options.budget.value(),
            brief.options.format,
            brief.references.len()
        );

        let response = self
            .call(model, "visualize", &request, Some(&image_config))
            .await
            .map_err(|err| {
                error!(model = model, "Visualization request failed: {err:#}");
                VisualizationError::Transport(err)
            })?;

        match response.first_image() {
            Some(Ok(image)) => Ok(image),
            Some(Err(err)) => {
                error!(model = model, "Visualization image was unreadable: {err}");
                Err(VisualizationError::NoImage {
                    model: model.to_string(),
                    detail: Some(err.to_string()),
                })
            }
            None => {
                let detail = response.refusal_reason().or_else(|| {
                    let text = response.text();
                    (!text.trim().is_empty()).then(|| truncate_for_log(text.trim(), 200))
                });
                error!(
                    model = model,
                    "Visualization response carried no image: {}",
                    detail.as_deref().unwrap_or("no detail")
                );
                Err(VisualizationError::NoImage {
                    model: model.to_string(),
                    detail,
                })
            }
        }
    }

    pub async fn advise(&self, context: &AdviceContext) -> Enrichment {
        let request = build_advice_request(&context.turns, context.image.as_ref());
        match self.reason("advise", &request).await {
            Ok(response) => non_empty_or(response.text(), ADVICE_EMPTY_FALLBACK),
            Err(err) => {
                warn!("Advice request failed: {err:#}");
                fallback(ADVICE_ERROR_FALLBACK, &err)
            }
        }
    }

    pub async fn write_blueprint(&self, brief: &BlueprintBrief) -> Enrichment {
        let request = build_blueprint_request(brief);
        match self.reason("blueprint", &request).await {
            Ok(response) => non_empty_or(response.text(), REPORT_EMPTY_FALLBACK),
            Err(err) => {
                warn!("Blueprint report request failed: {err:#}");
                fallback(REPORT_ERROR_FALLBACK, &err)
            }
        }
    }

    pub async fn analyze_link(&self, url: &str) -> Enrichment {
        let request = build_link_analysis_request(url);
        match self.reason("analyze_link", &request).await {
            Ok(response) => {
                // Only generated text is marked verified; the empty-answer
                // placeholder never carries the suffix.
                let grounded = response.has_search_grounding();
                match non_empty_or(response.text(), LINK_EMPTY_FALLBACK) {
                    Enrichment::Generated(text) if grounded => {
                        Enrichment::Generated(format!("{text}{LINK_VERIFIED_SUFFIX}"))
                    }
                    other => other,
                }
            }
            Err(err) => {
                warn!("Link analysis failed for {url}: {err:#}");
                fallback(LINK_ERROR_FALLBACK, &err)
            }
        }
    }
}

fn non_empty_or(text: String, placeholder: &str) -> Enrichment {
    if text.trim().is_empty() {
        Enrichment::Fallback {
            text: placeholder.to_string(),
            reason: "empty response".to_string(),
        }
    } else {
        Enrichment::Generated(text)
    }
}

fn fallback(text: &str, err: &anyhow::Error) -> Enrichment {
    Enrichment::Fallback {
        text: text.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use anyhow::anyhow;
    use parking_lot::Mutex;
    use serde_json::Value;

    use crate::studio::assets::{ReferenceAsset, ReferenceKind};
    use crate::studio::conversation::Conversation;
    use crate::studio::options::{BudgetIndex, DesignMode, DesignOptions};

    /// Replays canned responses and records every payload it was sent.
    #[derive(Default)]
    struct FakeTransport {
        responses: Mutex<VecDeque<anyhow::Result<Value>>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl FakeTransport {
        fn replying(responses: Vec<anyhow::Result<Value>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl GeminiTransport for FakeTransport {
        async fn generate_content(&self, model: &str, payload: Value) -> anyhow::Result<GeminiResponse> {
            self.calls.lock().push((model.to_string(), payload));
            let next = self
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no canned response")));
            Ok(serde_json::from_value(next?)?)
        }
    }

    fn gateway(responses: Vec<anyhow::Result<Value>>) -> DesignGateway<FakeTransport> {
        DesignGateway::new(FakeTransport::replying(responses), GatewaySettings::default())
    }

    fn text_response(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    fn image(tag: u8) -> EncodedImage {
        EncodedImage::from_model_output(Some("image/jpeg"), vec![0xFF, 0xD8, tag]).unwrap()
    }

    fn brief(reference_count: usize) -> VisualizationBrief {
        VisualizationBrief {
            base_image: image(0),
            options: DesignOptions::default(),
            directive: "add a reading nook".to_string(),
            references: (0..reference_count)
                .map(|index| ReferenceAsset {
                    id: format!("r{index}"),
                    image: image(index as u8 + 1),
                    kind: ReferenceKind::Style,
                })
                .collect(),
            external_items: Vec::new(),
            recent_user_turns: Vec::new(),
        }
    }

    fn blueprint_brief() -> BlueprintBrief {
        BlueprintBrief {
            before: image(1),
            after: image(2),
            mode: DesignMode::Redesign,
            budget: BudgetIndex::default(),
            location: String::new(),
            directive: String::new(),
        }
    }

    #[tokio::test]
    async fn visualization_returns_first_image_and_caps_references() {
        let gateway = gateway(vec![Ok(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "done" },
                { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } }
            ]}}]
        }))]);

        let result = gateway.generate_visualization(&brief(10)).await.unwrap();
        assert_eq!(result.bytes(), b"hello");

        let calls = gateway.transport.calls.lock();
        let (model, payload) = &calls[0];
        assert_eq!(model, "gemini-3-pro-image-preview");
        let parts = payload["contents"][0]["parts"].as_array().unwrap();
        let images = parts.iter().filter(|part| part.get("inlineData").is_some()).count();
        assert_eq!(images, 9);
        assert_eq!(
            payload["generationConfig"]["imageConfig"]["aspectRatio"],
            json!("16:9")
        );
    }

    #[tokio::test]
    async fn visualization_distinguishes_no_image_from_transport_failure() {
        let gateway = gateway(vec![
            Ok(text_response("I cannot draw that.")),
            Err(anyhow!("connection reset")),
        ]);

        match gateway.generate_visualization(&brief(0)).await {
            Err(VisualizationError::NoImage { model, detail }) => {
                assert_eq!(model, "gemini-3-pro-image-preview");
                assert_eq!(detail.as_deref(), Some("I cannot draw that."));
            }
            other => panic!("expected NoImage, got {other:?}"),
        }

        match gateway.generate_visualization(&brief(0)).await {
            Err(VisualizationError::Transport(err)) => {
                assert!(err.to_string().contains("connection reset"));
            }
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn advice_replays_last_five_turns() {
        let gateway = gateway(vec![Ok(text_response("Try **linen** curtains."))]);
        let mut log = Conversation::new();
        for index in 0..6 {
            log.push_user(format!("message {index}"));
        }
        let context = AdviceContext {
            turns: log.recent(5).to_vec(),
            image: None,
        };

        let answer = gateway.advise(&context).await;
        assert_eq!(answer, Enrichment::Generated("Try **linen** curtains.".to_string()));

        let calls = gateway.transport.calls.lock();
        let (model, payload) = &calls[0];
        assert_eq!(model, "gemini-3-pro-preview");
        let lines: Vec<&str> = payload["contents"][0]["parts"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|part| part["text"].as_str())
            .collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Client: message 1");
        assert!(payload.get("systemInstruction").is_some());
    }

    #[tokio::test]
    async fn advice_falls_back_on_failure_and_empty_text() {
        let gateway = gateway(vec![Err(anyhow!("quota exceeded")), Ok(text_response("  "))]);
        let context = AdviceContext {
            turns: Vec::new(),
            image: Some(image(3)),
        };

        let failed = gateway.advise(&context).await;
        assert!(failed.is_fallback());
        assert_eq!(failed.text(), ADVICE_ERROR_FALLBACK);

        let empty = gateway.advise(&context).await;
        assert_eq!(empty.text(), ADVICE_EMPTY_FALLBACK);
    }

    #[tokio::test]
    async fn blueprint_sends_both_images() {
        let gateway = gateway(vec![Ok(text_response("<h3>The Vision</h3>")), Err(anyhow!("500"))]);

        let report = gateway.write_blueprint(&blueprint_brief()).await;
        assert_eq!(report.into_text(), "<h3>The Vision</h3>");
        {
            let calls = gateway.transport.calls.lock();
            let parts = calls[0].1["contents"][0]["parts"].as_array().unwrap();
            assert_eq!(parts.len(), 3);
        }

        let failed = gateway.write_blueprint(&blueprint_brief()).await;
        assert_eq!(failed.text(), REPORT_ERROR_FALLBACK);
    }

    #[tokio::test]
    async fn link_analysis_never_raises() {
        let gateway = gateway(vec![Err(anyhow!("timeout"))]);
        let result = gateway.analyze_link("https://shop.example/chair").await;
        assert_eq!(
            result,
            Enrichment::Fallback {
                text: LINK_ERROR_FALLBACK.to_string(),
                reason: "timeout".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn link_analysis_marks_grounded_answers() {
        let gateway = gateway(vec![
            Ok(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Walnut lounge chair, 80cm wide." }] },
                    "groundingMetadata": { "groundingChunks": [{ "web": { "uri": "https://a" } }] }
                }]
            })),
            Ok(text_response("Oak side table.")),
            Ok(json!({ "candidates": [] })),
        ]);

        let grounded = gateway.analyze_link("https://a").await;
        assert_eq!(
            grounded.text(),
            "Walnut lounge chair, 80cm wide. (Verified via Google Search)"
        );
        let plain = gateway.analyze_link("https://b").await;
        assert_eq!(plain.text(), "Oak side table.");
        let empty = gateway.analyze_link("https://c").await;
        assert_eq!(empty.text(), LINK_EMPTY_FALLBACK);

        let calls = gateway.transport.calls.lock();
        assert_eq!(calls[0].1["tools"][0], json!({ "google_search": {} }));
    }

    #[tokio::test]
    async fn link_placeholder_is_never_marked_verified() {
        let gateway = gateway(vec![
            Ok(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "  " }] },
                    "groundingMetadata": { "groundingChunks": [{ "web": { "uri": "https://a" } }] }
                }]
            })),
            Ok(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Rattan pendant lamp." }] },
                    "groundingMetadata": { "groundingChunks": [] }
                }]
            })),
        ]);

        let placeholder = gateway.analyze_link("https://a").await;
        assert!(placeholder.is_fallback());
        assert_eq!(placeholder.text(), LINK_EMPTY_FALLBACK);
        assert!(!placeholder.text().contains("Verified"));

        let ungrounded = gateway.analyze_link("https://b").await;
        assert_eq!(ungrounded.text(), "Rattan pendant lamp.");
    }
}
