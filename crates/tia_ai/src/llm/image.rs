use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tia_core::error::AppError;

/// A photo attached to a question, carried inline as base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    media_type: String,
    data_base64: String,
}

fn media_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

impl ImageInput {
    pub fn from_bytes(media_type: &str, bytes: &[u8]) -> Result<Self, AppError> {
        if bytes.is_empty() {
            return Err(AppError::new("IMAGE_EMPTY", "Image is required"));
        }
        if !media_type.starts_with("image/") {
            return Err(AppError::new("IMAGE_UNSUPPORTED_TYPE", "Unsupported image type")
                .with_details(format!("media_type={media_type}")));
        }
        Ok(Self {
            media_type: media_type.to_string(),
            data_base64: STANDARD.encode(bytes),
        })
    }

    /// The media type comes from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let media_type = media_type_for(path).ok_or_else(|| {
            AppError::new("IMAGE_UNSUPPORTED_TYPE", "Unsupported image type")
                .with_details(format!("path={}", path.display()))
        })?;
        let bytes = fs::read(path).map_err(|e| {
            AppError::new("IMAGE_READ_FAILED", "Failed to read image")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Self::from_bytes(media_type, &bytes)
    }

    /// Accepts `data:<media type>;base64,<payload>` as produced by browsers.
    pub fn from_data_url(url: &str) -> Result<Self, AppError> {
        let invalid = || {
            AppError::new("IMAGE_DATA_INVALID", "Image is not a base64 data URL")
                .with_details(format!("prefix={}", url.chars().take(32).collect::<String>()))
        };
        let rest = url.trim().strip_prefix("data:").ok_or_else(invalid)?;
        let (media_type, payload) = rest.split_once(";base64,").ok_or_else(invalid)?;
        let bytes = STANDARD.decode(payload.trim()).map_err(|_| invalid())?;
        Self::from_bytes(media_type, &bytes)
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn data_base64(&self) -> &str {
        &self.data_base64
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data_base64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn data_url_is_accepted_and_rebuilt() {
        let image = ImageInput::from_bytes("image/png", b"\x89PNG").expect("image");
        assert_eq!(image.data_url(), "data:image/png;base64,iVBORw==");

        let parsed = ImageInput::from_data_url(&image.data_url()).expect("parse");
        assert_eq!(parsed, image);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert_eq!(
            ImageInput::from_bytes("image/png", b"").expect_err("empty").code,
            "IMAGE_EMPTY"
        );
        assert_eq!(
            ImageInput::from_bytes("text/plain", b"hi").expect_err("type").code,
            "IMAGE_UNSUPPORTED_TYPE"
        );
        assert_eq!(
            ImageInput::from_data_url("https://example.org/leaf.png").expect_err("url").code,
            "IMAGE_DATA_INVALID"
        );
        assert_eq!(
            ImageInput::from_data_url("data:image/png;base64,@@@").expect_err("payload").code,
            "IMAGE_DATA_INVALID"
        );
    }

    #[test]
    fn file_extension_sets_media_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Leaf.JPG");
        fs::write(&path, b"jpeg bytes").expect("write");
        assert_eq!(ImageInput::from_path(&path).expect("image").media_type(), "image/jpeg");

        let other = dir.path().join("leaf.bmp");
        fs::write(&other, b"bmp").expect("write");
        assert_eq!(
            ImageInput::from_path(&other).expect_err("bmp").code,
            "IMAGE_UNSUPPORTED_TYPE"
        );
    }
}
