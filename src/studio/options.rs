use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesignMode {
    #[default]
    Redesign,
    StyleTransfer,
    Clean,
    Seasonal,
}

impl DesignMode {
    pub const ALL: [DesignMode; 4] = [
        DesignMode::Redesign,
        DesignMode::StyleTransfer,
        DesignMode::Clean,
        DesignMode::Seasonal,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            DesignMode::Redesign => "Re-Imagine",
            DesignMode::StyleTransfer => "Style Transfer",
            DesignMode::Clean => "Deep Clean",
            DesignMode::Seasonal => "Seasonal",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            DesignMode::Redesign => "Complete makeover. Option to lock walls/windows.",
            DesignMode::StyleTransfer => "New texture/color, same layout.",
            DesignMode::Clean => "Remove clutter, keep furniture.",
            DesignMode::Seasonal => "Holiday decor, same layout.",
        }
    }

    /// Stable key used in callback payloads.
    pub const fn key(self) -> &'static str {
        match self {
            DesignMode::Redesign => "redesign",
            DesignMode::StyleTransfer => "style",
            DesignMode::Clean => "clean",
            DesignMode::Seasonal => "seasonal",
        }
    }

    pub fn from_key(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "redesign" | "reimagine" | "re-imagine" => Some(DesignMode::Redesign),
            "style" | "style_transfer" | "styletransfer" => Some(DesignMode::StyleTransfer),
            "clean" | "deep_clean" => Some(DesignMode::Clean),
            "seasonal" | "christmas" | "holiday" => Some(DesignMode::Seasonal),
            _ => None,
        }
    }

    /// Modes that always run under the architectural lock regardless of the toggle.
    pub const fn forces_structure_lock(self) -> bool {
        !matches!(self, DesignMode::Redesign)
    }
}

impl fmt::Display for DesignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationFormat {
    #[default]
    Single,
    GridAngles,
    GridVariants,
}

impl GenerationFormat {
    pub const ALL: [GenerationFormat; 3] = [
        GenerationFormat::Single,
        GenerationFormat::GridAngles,
        GenerationFormat::GridVariants,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            GenerationFormat::Single => "Single View",
            GenerationFormat::GridAngles => "4 Angles",
            GenerationFormat::GridVariants => "4 Variations",
        }
    }

    pub const fn key(self) -> &'static str {
        match self {
            GenerationFormat::Single => "single",
            GenerationFormat::GridAngles => "grid_angles",
            GenerationFormat::GridVariants => "grid_variants",
        }
    }

    pub fn from_key(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "single" => Some(GenerationFormat::Single),
            "grid_angles" | "angles" => Some(GenerationFormat::GridAngles),
            "grid_variants" | "variants" | "variations" => Some(GenerationFormat::GridVariants),
            _ => None,
        }
    }
}

/// Instruction severity selected by the budget slider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BudgetTier {
    Zero,
    Low,
    Moderate,
    High,
    Unlimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLevel {
    pub label: &'static str,
    pub description: &'static str,
    pub tier: BudgetTier,
}

pub const BUDGET_LEVELS: [BudgetLevel; 9] = [
    BudgetLevel {
        label: "$0",
        description: "Strict Zero Spend. Clean & Rearrange only.",
        tier: BudgetTier::Zero,
    },
    BudgetLevel {
        label: "$200",
        description: "Paint, Plants & Declutter.",
        tier: BudgetTier::Low,
    },
    BudgetLevel {
        label: "$500",
        description: "Small accessories, textiles, and lamps.",
        tier: BudgetTier::Low,
    },
    BudgetLevel {
        label: "$1,000",
        description: "Light Refresh: Rugs and Decor.",
        tier: BudgetTier::Moderate,
    },
    BudgetLevel {
        label: "$5,000",
        description: "Moderate Update: Key furniture replacements.",
        tier: BudgetTier::Moderate,
    },
    BudgetLevel {
        label: "$10,000",
        description: "Major Update: Quality furniture.",
        tier: BudgetTier::High,
    },
    BudgetLevel {
        label: "$25,000",
        description: "Full Renovation.",
        tier: BudgetTier::High,
    },
    BudgetLevel {
        label: "$50,000",
        description: "High-End Luxury Overhaul.",
        tier: BudgetTier::High,
    },
    BudgetLevel {
        label: "Unlimited",
        description: "Dream Budget. No constraints.",
        tier: BudgetTier::Unlimited,
    },
];

pub const DEFAULT_BUDGET_INDEX: u8 = 4;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BudgetIndexError {
    #[error("budget index {0} is out of range (expected 0-{max})", max = BUDGET_LEVELS.len() - 1)]
    OutOfRange(i64),
    #[error("'{0}' is not a budget index (expected a number 0-{max})", max = BUDGET_LEVELS.len() - 1)]
    NotANumber(String),
}

/// Position on the nine-step budget slider. Always a valid index into [`BUDGET_LEVELS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetIndex(u8);

impl BudgetIndex {
    pub fn new(value: i64) -> Result<Self, BudgetIndexError> {
        if (0..BUDGET_LEVELS.len() as i64).contains(&value) {
            Ok(BudgetIndex(value as u8))
        } else {
            Err(BudgetIndexError::OutOfRange(value))
        }
    }

    pub fn parse(value: &str) -> Result<Self, BudgetIndexError> {
        let trimmed = value.trim();
        let parsed = trimmed
            .parse::<i64>()
            .map_err(|_| BudgetIndexError::NotANumber(trimmed.to_string()))?;
        Self::new(parsed)
    }

    pub fn all() -> impl Iterator<Item = BudgetIndex> {
        (0..BUDGET_LEVELS.len() as u8).map(BudgetIndex)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub fn level(self) -> &'static BudgetLevel {
        &BUDGET_LEVELS[self.0 as usize]
    }

    pub fn label(self) -> &'static str {
        self.level().label
    }

    pub fn tier(self) -> BudgetTier {
        self.level().tier
    }
}

impl Default for BudgetIndex {
    fn default() -> Self {
        BudgetIndex(DEFAULT_BUDGET_INDEX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignOptions {
    pub mode: DesignMode,
    pub budget: BudgetIndex,
    pub format: GenerationFormat,
    pub location: String,
    pub structure_locked: bool,
}

impl Default for DesignOptions {
    fn default() -> Self {
        Self {
            mode: DesignMode::default(),
            budget: BudgetIndex::default(),
            format: GenerationFormat::default(),
            location: String::new(),
            structure_locked: true,
        }
    }
}

impl DesignOptions {
    /// Whether the architectural lock block ends up in the instruction.
    pub fn structure_lock_applies(&self) -> bool {
        self.mode.forces_structure_lock() || self.structure_locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_index_rejects_out_of_range_values() {
        assert!(BudgetIndex::new(-1).is_err());
        assert!(BudgetIndex::new(9).is_err());
        assert_eq!(BudgetIndex::new(8).map(|b| b.label()), Ok("Unlimited"));
        assert_eq!(BudgetIndex::parse(" 3 ").map(|b| b.label()), Ok("$1,000"));
        assert_eq!(
            BudgetIndex::parse("12"),
            Err(BudgetIndexError::OutOfRange(12))
        );
    }

    #[test]
    fn non_numeric_budget_is_reported_as_such() {
        let err = BudgetIndex::parse(" abc ").unwrap_err();
        assert_eq!(err, BudgetIndexError::NotANumber("abc".to_string()));
        assert_eq!(
            err.to_string(),
            "'abc' is not a budget index (expected a number 0-8)"
        );
        assert!(!err.to_string().contains("-1"));
    }

    #[test]
    fn every_budget_index_maps_to_a_tier() {
        let tiers: Vec<BudgetTier> = BudgetIndex::all().map(|b| b.tier()).collect();
        assert_eq!(tiers.len(), 9);
        assert_eq!(tiers[0], BudgetTier::Zero);
        assert_eq!(&tiers[1..3], &[BudgetTier::Low, BudgetTier::Low]);
        assert_eq!(&tiers[3..5], &[BudgetTier::Moderate, BudgetTier::Moderate]);
        assert_eq!(
            &tiers[5..8],
            &[BudgetTier::High, BudgetTier::High, BudgetTier::High]
        );
        assert_eq!(tiers[8], BudgetTier::Unlimited);
    }

    #[test]
    fn defaults_match_the_studio_start_state() {
        let options = DesignOptions::default();
        assert_eq!(options.mode, DesignMode::Redesign);
        assert_eq!(options.budget.label(), "$5,000");
        assert_eq!(options.format, GenerationFormat::Single);
        assert!(options.location.is_empty());
        assert!(options.structure_locked);
    }

    #[test]
    fn lock_is_forced_outside_redesign() {
        let mut options = DesignOptions {
            structure_locked: false,
            ..DesignOptions::default()
        };
        assert!(!options.structure_lock_applies());
        for mode in [DesignMode::Clean, DesignMode::Seasonal, DesignMode::StyleTransfer] {
            options.mode = mode;
            assert!(options.structure_lock_applies());
        }
    }

    #[test]
    fn keys_round_trip() {
        for mode in DesignMode::ALL {
            assert_eq!(DesignMode::from_key(mode.key()), Some(mode));
        }
        for format in GenerationFormat::ALL {
            assert_eq!(GenerationFormat::from_key(format.key()), Some(format));
        }
    }
}
