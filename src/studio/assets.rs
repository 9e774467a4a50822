use crate::studio::image::EncodedImage;

pub const MAX_REFERENCE_ASSETS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Steers materials, colours and mood.
    Style,
    /// A specific furniture item that must appear in the result.
    Element,
}

impl ReferenceKind {
    pub const fn label(self) -> &'static str {
        match self {
            ReferenceKind::Style => "style",
            ReferenceKind::Element => "element",
        }
    }

    /// Reads a photo caption such as `#element` or `Style`.
    pub fn from_caption(caption: &str) -> Option<Self> {
        let word = caption
            .split_whitespace()
            .next()?
            .trim_start_matches('#')
            .to_lowercase();
        match word.as_str() {
            "style" => Some(ReferenceKind::Style),
            "element" | "item" | "furniture" => Some(ReferenceKind::Element),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceAsset {
    pub id: String,
    pub image: EncodedImage,
    pub kind: ReferenceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLinkItem {
    pub id: String,
    pub url: String,
    pub analysis: String,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_tags_select_reference_kind() {
        assert_eq!(ReferenceKind::from_caption("#style"), Some(ReferenceKind::Style));
        assert_eq!(
            ReferenceKind::from_caption("Element this armchair"),
            Some(ReferenceKind::Element)
        );
        assert_eq!(ReferenceKind::from_caption("my living room"), None);
        assert_eq!(ReferenceKind::from_caption("   "), None);
    }
}
