use rand::Rng;

use crate::studio::assets::{ExternalLinkItem, ReferenceAsset, ReferenceKind, MAX_REFERENCE_ASSETS};
use crate::studio::conversation::{Conversation, ConversationTurn, ADVICE_CONTEXT_TURNS, VISUALIZATION_CONTEXT_TURNS};
use crate::studio::image::EncodedImage;
use crate::studio::options::{BudgetIndex, DesignMode, DesignOptions, GenerationFormat};
use crate::studio::prompt::{BlueprintBrief, VisualizationBrief};
use crate::studio::PRODUCT_NAME;

const PROJECT_ID_PREFIX: &str = "AU";
const PROJECT_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const PROJECT_ID_SUFFIX_LEN: usize = 6;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("upload a room photo before generating")]
    MissingBaseImage,
    #[error("a visualization is already being generated")]
    AlreadyGenerating,
    #[error("reference limit reached ({max} images)", max = MAX_REFERENCE_ASSETS)]
    ReferenceLimitReached,
    #[error("no reference at position {0}")]
    NoSuchReference(usize),
    #[error("no linked item at position {0}")]
    NoSuchLink(usize),
    #[error("nothing has been generated yet")]
    NothingGenerated,
}

pub fn generate_project_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..PROJECT_ID_SUFFIX_LEN)
        .map(|_| {
            let index = rng.gen_range(0..PROJECT_ID_ALPHABET.len());
            PROJECT_ID_ALPHABET[index] as char
        })
        .collect();
    format!("{PROJECT_ID_PREFIX}{suffix}")
}

/// Output of the last successful generation, replaced wholesale each time.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub before: EncodedImage,
    pub image: EncodedImage,
    pub report: String,
    pub mode: DesignMode,
    pub budget: BudgetIndex,
    pub location: String,
    pub directive: String,
}

/// Conversation window and current photo for an advice call.
#[derive(Debug, Clone)]
pub struct AdviceContext {
    pub turns: Vec<ConversationTurn>,
    pub image: Option<EncodedImage>,
}

/// One project: options, chat log, assets and the latest result.
#[derive(Debug, Clone)]
pub struct Session {
    project_id: String,
    options: DesignOptions,
    conversation: Conversation,
    references: Vec<ReferenceAsset>,
    external_links: Vec<ExternalLinkItem>,
    base_image: Option<EncodedImage>,
    result: Option<GenerationResult>,
    generating: bool,
    next_asset_id: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let project_id = generate_project_id();
        let mut session = Self::blank(project_id.clone());
        session.conversation.push_model(format!(
            "**Welcome to {PRODUCT_NAME}.** Project ID: #{project_id} \n\nI am your design architect. Upload a photo of your space, and I will help you re-envision it."
        ));
        session
    }

    fn blank(project_id: String) -> Self {
        Self {
            project_id,
            options: DesignOptions::default(),
            conversation: Conversation::new(),
            references: Vec::new(),
            external_links: Vec::new(),
            base_image: None,
            result: None,
            generating: false,
            next_asset_id: 0,
        }
    }

    /// Clears the whole project and starts a new one under a fresh ID.
    pub fn reset(&mut self) {
        let project_id = generate_project_id();
        *self = Self::blank(project_id.clone());
        self.conversation.push_model(format!(
            "**New Project Started (#{project_id}).** \nReady for your next transformation."
        ));
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn options(&self) -> &DesignOptions {
        &self.options
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn references(&self) -> &[ReferenceAsset] {
        &self.references
    }

    pub fn external_links(&self) -> &[ExternalLinkItem] {
        &self.external_links
    }

    pub fn base_image(&self) -> Option<&EncodedImage> {
        self.base_image.as_ref()
    }

    pub fn result(&self) -> Option<&GenerationResult> {
        self.result.as_ref()
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn set_mode(&mut self, mode: DesignMode) {
        self.options.mode = mode;
    }

    pub fn set_budget(&mut self, budget: BudgetIndex) {
        self.options.budget = budget;
    }

    pub fn set_format(&mut self, format: GenerationFormat) {
        self.options.format = format;
    }

    pub fn set_location(&mut self, location: &str) {
        self.options.location = location.trim().to_string();
    }

    pub fn set_structure_locked(&mut self, locked: bool) {
        self.options.structure_locked = locked;
    }

    pub fn toggle_structure_lock(&mut self) -> bool {
        self.options.structure_locked = !self.options.structure_locked;
        self.options.structure_locked
    }

    /// A new room photo invalidates the previous result.
    pub fn set_base_image(&mut self, image: EncodedImage) {
        self.base_image = Some(image);
        self.result = None;
    }

    fn mint_asset_id(&mut self, prefix: &str) -> String {
        self.next_asset_id += 1;
        format!("{}-{}-{}", self.project_id, prefix, self.next_asset_id)
    }

    pub fn add_reference(
        &mut self,
        image: EncodedImage,
        kind: ReferenceKind,
    ) -> Result<&ReferenceAsset, SessionError> {
        if self.references.len() >= MAX_REFERENCE_ASSETS {
            return Err(SessionError::ReferenceLimitReached);
        }
        let id = self.mint_asset_id("ref");
        self.references.push(ReferenceAsset { id, image, kind });
        Ok(&self.references[self.references.len() - 1])
    }

    /// `position` is 1-based, as shown to the user.
    pub fn remove_reference(&mut self, position: usize) -> Result<ReferenceAsset, SessionError> {
        if position == 0 || position > self.references.len() {
            return Err(SessionError::NoSuchReference(position));
        }
        Ok(self.references.remove(position - 1))
    }

    pub fn clear_references(&mut self) -> usize {
        let removed = self.references.len();
        self.references.clear();
        removed
    }

    pub fn add_external_link(&mut self, url: &str, analysis: String) -> &ExternalLinkItem {
        let id = self.mint_asset_id("link");
        let label = format!("Item #{}", self.external_links.len() + 1);
        self.external_links.push(ExternalLinkItem {
            id,
            url: url.trim().to_string(),
            analysis,
            label,
        });
        &self.external_links[self.external_links.len() - 1]
    }

    /// `position` is 1-based. Remaining items keep their labels.
    pub fn remove_external_link(&mut self, position: usize) -> Result<ExternalLinkItem, SessionError> {
        if position == 0 || position > self.external_links.len() {
            return Err(SessionError::NoSuchLink(position));
        }
        Ok(self.external_links.remove(position - 1))
    }

    pub fn push_user_turn(&mut self, text: impl Into<String>) {
        self.conversation.push_user(text);
    }

    pub fn push_model_turn(&mut self, text: impl Into<String>) {
        self.conversation.push_model(text);
    }

    pub fn push_error_turn(&mut self, text: impl Into<String>) {
        self.conversation.push_error(text);
    }

    pub fn advice_context(&self) -> AdviceContext {
        AdviceContext {
            turns: self.conversation.recent(ADVICE_CONTEXT_TURNS).to_vec(),
            image: self.base_image.clone(),
        }
    }

    /// Claims the single image-generation slot and snapshots the inputs.
    pub fn begin_generation(&mut self, directive: &str) -> Result<VisualizationBrief, SessionError> {
        let Some(base_image) = self.base_image.clone() else {
            return Err(SessionError::MissingBaseImage);
        };
        if self.generating {
            return Err(SessionError::AlreadyGenerating);
        }
        self.generating = true;

        Ok(VisualizationBrief {
            base_image,
            options: self.options.clone(),
            directive: directive.trim().to_string(),
            references: self.references.clone(),
            external_items: self.external_links.clone(),
            recent_user_turns: self
                .conversation
                .recent_user_texts(VISUALIZATION_CONTEXT_TURNS),
        })
    }

    /// Releases the generation slot. Results for a project that has since been
    /// reset are dropped. Returns whether `result` was stored.
    pub fn finish_generation(&mut self, project_id: &str, result: Option<GenerationResult>) -> bool {
        if self.project_id != project_id {
            return false;
        }
        self.generating = false;
        match result {
            Some(result) => {
                self.result = Some(result);
                true
            }
            None => false,
        }
    }

    pub fn blueprint_brief(&self) -> Result<BlueprintBrief, SessionError> {
        self.result
            .as_ref()
            .map(GenerationResult::blueprint_brief)
            .ok_or(SessionError::NothingGenerated)
    }
}

impl GenerationResult {
    pub fn from_brief(brief: &VisualizationBrief, image: EncodedImage, report: String) -> Self {
        Self {
            before: brief.base_image.clone(),
            image,
            report,
            mode: brief.options.mode,
            budget: brief.options.budget,
            location: brief.options.location.clone(),
            directive: brief.directive.clone(),
        }
    }

    pub fn blueprint_brief(&self) -> BlueprintBrief {
        BlueprintBrief {
            before: self.before.clone(),
            after: self.image.clone(),
            mode: self.mode,
            budget: self.budget,
            location: self.location.clone(),
            directive: self.directive.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(tag: u8) -> EncodedImage {
        EncodedImage::from_model_output(Some("image/jpeg"), vec![0xFF, 0xD8, tag]).unwrap()
    }

    #[test]
    fn project_ids_have_prefix_and_base36_suffix() {
        let id = generate_project_id();
        assert_eq!(id.len(), 8);
        assert!(id.starts_with("AU"));
        assert!(id[2..]
            .chars()
            .all(|ch| ch.is_ascii_digit() || ch.is_ascii_uppercase()));
    }

    #[test]
    fn new_session_opens_with_welcome_turn() {
        let session = Session::new();
        let turns = session.conversation().turns();
        assert_eq!(turns.len(), 1);
        assert!(turns[0].text.contains(session.project_id()));
        assert!(turns[0].text.starts_with("**Welcome to Aura.**"));
    }

    #[test]
    fn reference_collection_is_capped() {
        let mut session = Session::new();
        for index in 0..MAX_REFERENCE_ASSETS {
            session
                .add_reference(photo(index as u8), ReferenceKind::Style)
                .unwrap();
        }
        assert_eq!(
            session.add_reference(photo(99), ReferenceKind::Element).unwrap_err(),
            SessionError::ReferenceLimitReached
        );

        let removed = session.remove_reference(1).unwrap();
        assert_eq!(removed.image, photo(0));
        assert!(session.add_reference(photo(99), ReferenceKind::Element).is_ok());
        assert_eq!(session.references().last().unwrap().image, photo(99));
        assert_eq!(
            session.remove_reference(0).unwrap_err(),
            SessionError::NoSuchReference(0)
        );
        assert_eq!(session.clear_references(), MAX_REFERENCE_ASSETS);
    }

    #[test]
    fn asset_ids_are_unique() {
        let mut session = Session::new();
        let first = session
            .add_reference(photo(1), ReferenceKind::Style)
            .unwrap()
            .id
            .clone();
        session.remove_reference(1).unwrap();
        let second = session
            .add_reference(photo(1), ReferenceKind::Style)
            .unwrap()
            .id
            .clone();
        assert_ne!(first, second);
    }

    #[test]
    fn external_links_are_labelled_in_order() {
        let mut session = Session::new();
        session.add_external_link("https://a.example", "Oak chair".to_string());
        let second = session.add_external_link(" https://b.example ", "Brass lamp".to_string());
        assert_eq!(second.label, "Item #2");
        assert_eq!(second.url, "https://b.example");

        let removed = session.remove_external_link(1).unwrap();
        assert_eq!(removed.analysis, "Oak chair");
        assert_eq!(session.external_links()[0].label, "Item #2");
        assert_eq!(
            session.remove_external_link(5).unwrap_err(),
            SessionError::NoSuchLink(5)
        );
    }

    #[test]
    fn generation_requires_a_base_image() {
        let mut session = Session::new();
        assert_eq!(
            session.begin_generation("anything").unwrap_err(),
            SessionError::MissingBaseImage
        );
        assert!(!session.is_generating());
    }

    #[test]
    fn generation_is_single_flight() {
        let mut session = Session::new();
        session.set_base_image(photo(1));
        session.push_user_turn("one");
        session.push_model_turn("ok");
        session.push_user_turn("two");
        session.push_user_turn("three");
        session.push_user_turn("four");

        let brief = session.begin_generation("  brighter  ").unwrap();
        assert_eq!(brief.directive, "brighter");
        assert_eq!(brief.recent_user_turns, vec!["two", "three", "four"]);
        assert_eq!(
            session.begin_generation("again").unwrap_err(),
            SessionError::AlreadyGenerating
        );

        let project_id = session.project_id().to_string();
        let result = GenerationResult::from_brief(&brief, photo(2), "<p>ok</p>".to_string());
        assert!(session.finish_generation(&project_id, Some(result)));
        assert!(!session.is_generating());
        assert_eq!(session.result().unwrap().image, photo(2));
        assert!(session.begin_generation("again").is_ok());
    }

    #[test]
    fn failed_generation_releases_the_slot() {
        let mut session = Session::new();
        session.set_base_image(photo(1));
        session.begin_generation("").unwrap();
        let project_id = session.project_id().to_string();
        assert!(!session.finish_generation(&project_id, None));
        assert!(!session.is_generating());
        assert!(session.result().is_none());
    }

    #[test]
    fn reset_discards_late_results() {
        let mut session = Session::new();
        session.set_base_image(photo(1));
        session.set_location("Kyoto");
        let brief = session.begin_generation("").unwrap();
        let old_project = session.project_id().to_string();

        session.reset();
        assert_ne!(session.project_id(), old_project);
        assert!(session.base_image().is_none());
        assert!(session.options().location.is_empty());
        assert_eq!(session.conversation().len(), 1);
        assert!(session.conversation().turns()[0]
            .text
            .starts_with("**New Project Started"));

        let late = GenerationResult::from_brief(&brief, photo(2), String::new());
        assert!(!session.finish_generation(&old_project, Some(late)));
        assert!(session.result().is_none());
    }

    #[test]
    fn new_base_image_clears_previous_result() {
        let mut session = Session::new();
        session.set_base_image(photo(1));
        let brief = session.begin_generation("").unwrap();
        let project_id = session.project_id().to_string();
        let result = GenerationResult::from_brief(&brief, photo(2), String::new());
        session.finish_generation(&project_id, Some(result));
        assert!(session.blueprint_brief().is_ok());

        session.set_base_image(photo(3));
        assert!(session.result().is_none());
        assert_eq!(
            session.blueprint_brief().unwrap_err(),
            SessionError::NothingGenerated
        );
    }

    #[test]
    fn advice_context_uses_last_five_turns_and_current_photo() {
        let mut session = Session::new();
        for index in 0..6 {
            session.push_user_turn(format!("turn {index}"));
        }
        let context = session.advice_context();
        assert_eq!(context.turns.len(), 5);
        assert_eq!(context.turns[0].text, "turn 1");
        assert!(context.image.is_none());

        session.set_base_image(photo(4));
        assert_eq!(session.advice_context().image, Some(photo(4)));
    }
}
