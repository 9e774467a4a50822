pub mod gateway;
pub mod gemini;
pub mod media;

pub use gateway::{DesignGateway, Enrichment, GatewaySettings, VisualizationError};
pub use gemini::HttpGeminiTransport;
