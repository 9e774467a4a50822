use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, ImageFormat};

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image payload is empty")]
    Empty,
    #[error("unsupported image type: {0}")]
    Unsupported(String),
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image decoding failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Raw image bytes plus the mime type they are sent and displayed with.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime_type: String,
    bytes: Vec<u8>,
}

/// JPEG rendition with its pixel size.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub jpeg: EncodedImage,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn detect_image_mime(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data)
        .map(|kind| kind.mime_type().to_string())
        .filter(|mime| mime.starts_with("image/"))
}

fn normalize_image_mime(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        _ => lowered,
    }
}

fn is_supported_mime(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "image/png" | "image/jpeg" | "image/webp" | "image/heic" | "image/heif"
    )
}

impl EncodedImage {
    /// Wraps uploaded bytes, sniffing the mime type from the content.
    pub fn from_upload(bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        let mime_type = detect_image_mime(&bytes)
            .map(|mime| normalize_image_mime(&mime))
            .ok_or_else(|| ImageError::Unsupported("unknown".to_string()))?;
        if !is_supported_mime(&mime_type) {
            return Err(ImageError::Unsupported(mime_type));
        }
        Ok(Self { mime_type, bytes })
    }

    /// Wraps model output. The declared mime type wins; PNG when absent.
    pub fn from_model_output(mime_type: Option<&str>, bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        let mime_type = mime_type
            .map(normalize_image_mime)
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or_else(|| "image/png".to_string());
        Ok(Self { mime_type, bytes })
    }

    pub fn from_base64(mime_type: Option<&str>, data: &str) -> Result<Self, ImageError> {
        let bytes = general_purpose::STANDARD.decode(data.trim())?;
        Self::from_model_output(mime_type, bytes)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/heic" | "image/heif" => "heic",
            _ => "png",
        }
    }

    /// RGB JPEG bounded by `max_side`, for embedding in the blueprint. Never enlarges.
    pub fn thumbnail(&self, max_side: u32) -> Result<Thumbnail, ImageError> {
        let decoded = image::load_from_memory(&self.bytes)?;
        let side = max_side.min(decoded.width().max(decoded.height()));
        let rgb = DynamicImage::ImageRgb8(decoded.thumbnail(side, side).to_rgb8());
        let mut buffer = Cursor::new(Vec::new());
        rgb.write_to(&mut buffer, ImageFormat::Jpeg)?;
        Ok(Thumbnail {
            jpeg: EncodedImage {
                mime_type: "image/jpeg".to_string(),
                bytes: buffer.into_inner(),
            },
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    /// PNG copy of the image; PNG input is returned unchanged.
    pub fn to_png(&self) -> Result<EncodedImage, ImageError> {
        if self.mime_type == "image/png" {
            return Ok(self.clone());
        }
        let decoded = image::load_from_memory(&self.bytes)?;
        let mut buffer = Cursor::new(Vec::new());
        decoded.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(EncodedImage {
            mime_type: "image/png".to_string(),
            bytes: buffer.into_inner(),
        })
    }
}

#[cfg(test)]
impl EncodedImage {
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_uri(uri: &str) -> Result<Self, ImageError> {
        let malformed = || ImageError::Unsupported("malformed data URI".to_string());
        let rest = uri.trim().strip_prefix("data:").ok_or_else(malformed)?;
        let (header, payload) = rest.split_once(',').ok_or_else(malformed)?;
        let mime_type = header.strip_suffix(";base64").ok_or_else(malformed)?;
        let bytes = general_purpose::STANDARD.decode(payload)?;
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self {
            mime_type: normalize_image_mime(mime_type),
            bytes,
        })
    }
}
