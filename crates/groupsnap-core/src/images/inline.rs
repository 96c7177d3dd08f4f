//! Self-describing encoded images exchanged between fetcher and compositor.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Content type assumed when neither the source nor the bytes say otherwise.
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Encoded image bytes tagged with their content type.
#[derive(Clone, PartialEq, Eq)]
pub struct InlineImage {
    mime_type: String,
    bytes: Vec<u8>,
}

impl InlineImage {
    /// Builds an inline image, falling back to sniffing and then to
    /// [`DEFAULT_IMAGE_MIME`] when `mime_type` is missing or not an image type.
    pub fn new(mime_type: Option<&str>, bytes: Vec<u8>) -> Self {
        let declared = mime_type
            .map(|mime| mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase())
            .filter(|mime| mime.starts_with("image/"));
        let mime_type = declared
            .or_else(|| detect_image_mime(&bytes).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
        Self { mime_type, bytes }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Renders `data:<mime>;base64,<payload>`.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.bytes))
    }
}

impl fmt::Debug for InlineImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineImage")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Sniffs the image type from magic bytes.
pub fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    (kind.matcher_type() == infer::MatcherType::Image).then(|| kind.mime_type())
}
