//! Request construction for every model call the studio makes.
//!
//! All builders are pure: they take an owned snapshot of the session and return
//! a [`ModelRequest`]. Clause order in the visualization instruction matters,
//! later clauses refine earlier ones and the user directive always comes last.

use crate::studio::assets::{ExternalLinkItem, ReferenceAsset, ReferenceKind, MAX_REFERENCE_ASSETS};
use crate::studio::conversation::{ConversationTurn, Role};
use crate::studio::image::EncodedImage;
use crate::studio::options::{BudgetIndex, BudgetTier, DesignMode, DesignOptions, GenerationFormat};
use crate::studio::ASSISTANT_NAME;

pub const STRUCTURE_LOCK_CLAUSE: &str = " CRITICAL: ARCHITECTURAL LOCK IS ACTIVE. You MUST preserve the exact perspective, room size, window placement, door placement, and ceiling height of the original image. Do not hallucinate a new room shape. Do not remove pillars or beams. ";

pub const CREATIVE_FREEDOM_CLAUSE: &str = " CREATIVE FREEDOM: You may change the walls, windows, and structure if necessary to achieve the design vision. This is a renovation. ";

pub const STYLE_SUFFIX: &str = " Photorealistic, Architectural Digest style, 8k resolution, volumetric lighting. IMPERATIVE: The output image MUST have a 16:9 aspect ratio. ";

pub const FORMAT_SINGLE_CLAUSE: &str = " OUTPUT FORMAT: Single high-quality 16:9 wide-angle shot. ";
pub const FORMAT_GRID_ANGLES_CLAUSE: &str = " OUTPUT FORMAT: Create a 2x2 grid collage. All 4 individual panels must be 16:9 cinematic aspect ratio. Show the room from different angles. ";
pub const FORMAT_GRID_VARIANTS_CLAUSE: &str = " OUTPUT FORMAT: Create a 2x2 grid collage. All 4 individual panels must be 16:9 cinematic aspect ratio. Show 4 completely different design options. ";

pub const ELEMENT_REFERENCE_CLAUSE: &str = " \n\nREQUIRED FURNITURE FROM IMAGES: Integrate the specific furniture items provided in the reference images into the room naturalistically. Match the reference items exactly.";

pub const DIRECTIVE_PREFIX: &str = "USER DIRECTIVE: ";

pub const ADVICE_SYSTEM_INSTRUCTION: &str = "You are Aura, an elite Design Intelligence.

TONE & FORMATTING:
1. Professional, concise, visionary.
2. Use **Bold** for mini-headers.
3. Use *Italics* for emphasis.
4. Keep responses short (max 3-4 sentences).

GOAL:
Help the user refine their vision. If they talk about budget, suggest cost-effective changes.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Text(String),
    Image(EncodedImage),
}

/// One multimodal call, independent of which model it is routed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRequest {
    pub system_instruction: Option<String>,
    pub parts: Vec<RequestPart>,
    pub search_grounding: bool,
}

impl ModelRequest {
    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, RequestPart::Image(_)))
            .count()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                RequestPart::Text(text) => Some(text.as_str()),
                RequestPart::Image(_) => None,
            })
            .collect()
    }
}

/// Everything the image prompt depends on, captured when generation starts.
#[derive(Debug, Clone)]
pub struct VisualizationBrief {
    pub base_image: EncodedImage,
    pub options: DesignOptions,
    pub directive: String,
    pub references: Vec<ReferenceAsset>,
    pub external_items: Vec<ExternalLinkItem>,
    pub recent_user_turns: Vec<String>,
}

fn task_clause(mode: DesignMode, structure_locked: bool) -> String {
    match mode {
        DesignMode::Clean => format!(
            "TASK: DEEP CLEAN & DECLUTTER. {STRUCTURE_LOCK_CLAUSE} STRICTLY KEEP ALL FURNITURE (sofas, tables, beds, cabinets) in their EXACT current positions. DO NOT MOVE THEM. ONLY remove trash, clothes, paper, and clutter. Make surfaces spotless and minimal."
        ),
        DesignMode::Seasonal => format!(
            "TASK: SEASONAL DECOR. {STRUCTURE_LOCK_CLAUSE} STRICTLY KEEP ALL FURNITURE in their EXACT current positions. Add sophisticated holiday decorations: garland, lights, tree. The room structure and furniture layout must match the input image exactly."
        ),
        DesignMode::StyleTransfer => format!(
            "TASK: STYLE TRANSFER. {STRUCTURE_LOCK_CLAUSE} RETAIN THE CURRENT FURNITURE LAYOUT. Apply the visual style/texture/colors of the reference images to the existing items. e.g. Turn the existing fabric sofa into a leather sofa, but do not move it."
        ),
        DesignMode::Redesign if structure_locked => format!(
            "TASK: INTERIOR REDESIGN. {STRUCTURE_LOCK_CLAUSE} You may replace furniture and lighting to match the user's vision. However, KEEP the room's architectural footprint exactly as is. "
        ),
        DesignMode::Redesign => format!("TASK: INTERIOR REDESIGN. {CREATIVE_FREEDOM_CLAUSE}"),
    }
}

pub fn budget_clause(budget: BudgetIndex) -> String {
    let label = budget.label();
    match budget.tier() {
        BudgetTier::Zero => " CONSTRAINT: STRICT ZERO BUDGET ($0). ABSOLUTELY NO NEW FURNITURE. Reuse existing items only. Rearrange, declutter, and clean only. Do not add anything that costs money. ".to_string(),
        BudgetTier::Low => format!(
            " CONSTRAINT: LOW BUDGET ({label}). Focus on cost-effective updates: Paint, small plants, textiles, and inexpensive accessories. No new large furniture. "
        ),
        BudgetTier::Moderate => format!(
            " CONSTRAINT: MODERATE BUDGET ({label}). You may replace key outdated pieces (rugs, coffee table, lighting) with standard retail items. Keep the most expensive furniture (sofa/bed) unless it ruins the design. "
        ),
        BudgetTier::High => format!(
            " CONSTRAINT: HIGH BUDGET ({label}). High-end renovation. New designer furniture, luxury lighting, premium materials. "
        ),
        BudgetTier::Unlimited => " CONSTRAINT: UNLIMITED BUDGET. No financial constraints. Use the finest materials and design pieces. Dream big. ".to_string(),
    }
}

pub const fn format_clause(format: GenerationFormat) -> &'static str {
    match format {
        GenerationFormat::Single => FORMAT_SINGLE_CLAUSE,
        GenerationFormat::GridAngles => FORMAT_GRID_ANGLES_CLAUSE,
        GenerationFormat::GridVariants => FORMAT_GRID_VARIANTS_CLAUSE,
    }
}

pub fn compose_visualization_instruction(brief: &VisualizationBrief) -> String {
    let options = &brief.options;
    let mut prompt = task_clause(options.mode, options.structure_locked);

    prompt.push(' ');
    prompt.push_str(&budget_clause(options.budget));
    prompt.push_str(format_clause(options.format));
    prompt.push_str(STYLE_SUFFIX);

    let location = options.location.trim();
    if !location.is_empty() {
        prompt.push_str(&format!(
            " \n\nLOCATION CONTEXT: The home is located in {location}. Ensure lighting and materials reflect this local environment/climate. "
        ));
    }

    if !brief.recent_user_turns.is_empty() {
        prompt.push_str(" \n\nIMPORTANT CONTEXT FROM USER CHAT: ");
        prompt.push_str(&brief.recent_user_turns.join(" "));
    }

    if brief
        .references
        .iter()
        .any(|reference| reference.kind == ReferenceKind::Element)
    {
        prompt.push_str(ELEMENT_REFERENCE_CLAUSE);
    }

    if !brief.external_items.is_empty() {
        prompt.push_str(" \n\nREQUIRED REALITY ANCHORS (Retail Items): Integrate these specific items based on their description: ");
        for (index, item) in brief.external_items.iter().enumerate() {
            prompt.push_str(&format!("\n {}. {}", index + 1, item.analysis));
        }
    }

    let directive = brief.directive.trim();
    if !directive.is_empty() {
        prompt.push_str(" \n\n");
        prompt.push_str(DIRECTIVE_PREFIX);
        prompt.push_str(directive);
    }

    prompt
}

/// Instruction, base photo, then at most eight references in insertion order.
pub fn build_visualization_request(brief: &VisualizationBrief) -> ModelRequest {
    let mut parts = vec![
        RequestPart::Text(compose_visualization_instruction(brief)),
        RequestPart::Image(brief.base_image.clone()),
    ];
    parts.extend(
        brief
            .references
            .iter()
            .take(MAX_REFERENCE_ASSETS)
            .map(|reference| RequestPart::Image(reference.image.clone())),
    );

    ModelRequest {
        system_instruction: None,
        parts,
        search_grounding: false,
    }
}

fn speaker_label(role: Role) -> &'static str {
    match role {
        Role::User => "Client",
        Role::Model => ASSISTANT_NAME,
    }
}

/// `turns` should already be trimmed to the replay window.
pub fn build_advice_request(
    turns: &[ConversationTurn],
    current_image: Option<&EncodedImage>,
) -> ModelRequest {
    let mut parts = Vec::with_capacity(turns.len() + 1);
    if let Some(image) = current_image {
        parts.push(RequestPart::Image(image.clone()));
    }
    for turn in turns {
        parts.push(RequestPart::Text(format!(
            "{}: {}",
            speaker_label(turn.role),
            turn.text
        )));
    }

    ModelRequest {
        system_instruction: Some(ADVICE_SYSTEM_INSTRUCTION.to_string()),
        parts,
        search_grounding: false,
    }
}

#[derive(Debug, Clone)]
pub struct BlueprintBrief {
    pub before: EncodedImage,
    pub after: EncodedImage,
    pub mode: DesignMode,
    pub budget: BudgetIndex,
    pub location: String,
    pub directive: String,
}

pub fn compose_blueprint_instruction(brief: &BlueprintBrief) -> String {
    let location = match brief.location.trim() {
        "" => "Global/Universal",
        value => value,
    };
    format!(
        "I have transformed a room.
Mode: {mode}
Budget Constraint: {budget}
Location: {location}
Prompt: {directive}

Write a \"Design Strategy Blueprint\" for the client.
Include:
1. **The Vision**: Psychological shift of the new design.
2. **Execution Plan**: What changed (flooring, lighting, etc).
3. **Item List**: Generic list of 3-5 key items suitable for this budget.

Format with HTML tags <h3>, <p>, <ul>, <li>.",
        mode = brief.mode.label(),
        budget = brief.budget.label(),
        directive = brief.directive.trim(),
    )
}

pub fn build_blueprint_request(brief: &BlueprintBrief) -> ModelRequest {
    ModelRequest {
        system_instruction: None,
        parts: vec![
            RequestPart::Text(compose_blueprint_instruction(brief)),
            RequestPart::Image(brief.before.clone()),
            RequestPart::Image(brief.after.clone()),
        ],
        search_grounding: false,
    }
}

pub fn build_link_analysis_request(url: &str) -> ModelRequest {
    let text = format!(
        "I have this URL for a furniture piece or design element: {}.
Please search for it, find its dimensions, style, color, and key characteristics.
Summarize this in a concise visual description I can use for an image generation prompt.",
        url.trim()
    );
    ModelRequest {
        system_instruction: None,
        parts: vec![RequestPart::Text(text)],
        search_grounding: true,
    }
}
