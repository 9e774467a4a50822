pub mod artifacts;
pub mod assets;
pub mod conversation;
pub mod image;
pub mod options;
pub mod prompt;
pub mod session;

/// Brand used in file names and chat copy.
pub const PRODUCT_NAME: &str = "Aura";
/// Speaker name of the design assistant in replayed conversations.
pub const ASSISTANT_NAME: &str = "Aura";

pub use assets::{ExternalLinkItem, ReferenceAsset, ReferenceKind, MAX_REFERENCE_ASSETS};
pub use image::EncodedImage;
pub use options::{BudgetIndex, DesignMode, DesignOptions, GenerationFormat};
pub use session::{GenerationResult, Session, SessionError};
