use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;
use uuid::Uuid;

use crate::presets;

pub const MIN_BATCH_SIZE: u8 = 1;
pub const MAX_BATCH_SIZE: u8 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceImageError {
    #[error("not a base64 data URL")]
    NotDataUrl,
    #[error("data URL has no mime type")]
    MissingMimeType,
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
    #[error("unrecognised image format")]
    UnknownFormat,
}

/// An encoded image kept as base64 alongside its mime type.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub mime_type: String,
    pub data: String,
}

impl SourceImage {
    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Result<Self, SourceImageError> {
        let rest = url.strip_prefix("data:").ok_or(SourceImageError::NotDataUrl)?;
        let (header, data) = rest.split_once(',').ok_or(SourceImageError::NotDataUrl)?;
        let mime_type = header.strip_suffix(";base64").ok_or(SourceImageError::NotDataUrl)?;
        if mime_type.is_empty() {
            return Err(SourceImageError::MissingMimeType);
        }
        let image = Self { mime_type: mime_type.to_string(), data: data.to_string() };
        image.bytes()?;
        Ok(image)
    }

    /// Decoded image bytes.
    pub fn bytes(&self) -> Result<Vec<u8>, SourceImageError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| SourceImageError::InvalidBase64(e.to_string()))
    }

    /// File extension from the mime subtype, e.g. `png` for `image/png`, `svg` for `image/svg+xml`.
    pub fn extension(&self) -> &str {
        self.mime_type
            .split_once('/')
            .map(|(_, sub)| sub.split('+').next().unwrap_or(sub))
            .filter(|ext| !ext.is_empty())
            .unwrap_or("jpeg")
    }

    /// Wraps raw uploaded bytes, sniffing the mime type from the content.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SourceImageError> {
        let format = image::guess_format(bytes).map_err(|_| SourceImageError::UnknownFormat)?;
        Ok(Self {
            mime_type: format.to_mime_type().to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Process-wide generation settings. Never persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub style: String,
    pub layout: String,
    pub model: String,
    pub batch_size: u8,
    pub uploaded_image: Option<SourceImage>,
    /// Model selected before an image upload forced a switch to the editing model.
    pub previous_model: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            style: presets::default_style().key.to_string(),
            layout: presets::DEFAULT_LAYOUT.to_string(),
            model: presets::default_model().key.to_string(),
            batch_size: 3,
            uploaded_image: None,
            previous_model: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageState {
    Pending,
    Ready { data: String },
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptionState {
    Generating,
    Ready { text: String },
    Error,
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Output {
    pub id: Uuid,
    pub model: String,
    pub prompt: String,
    pub output_mode: String,
    pub image: ImageState,
    pub started_at: DateTime<Utc>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default)]
    pub total_time: Option<Duration>,
    #[serde(default)]
    pub is_editing: bool,
    pub caption: CaptionState,
    /// Bumped on every dispatch; write-backs from an older attempt are discarded.
    #[serde(default)]
    pub attempt: u32,
}

impl Output {
    pub fn pending(model: &str, output_mode: &str, prompt: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            output_mode: output_mode.to_string(),
            image: ImageState::Pending,
            started_at: Utc::now(),
            total_time: None,
            is_editing: false,
            caption: CaptionState::Generating,
            attempt: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.image, ImageState::Pending)
    }

    pub fn output_data(&self) -> Option<&str> {
        match &self.image {
            ImageState::Ready { data } => Some(data),
            _ => None,
        }
    }

    /// Stamps `total_time` from `started_at`.
    pub fn finish_timing(&mut self) {
        let elapsed = Utc::now() - self.started_at;
        self.total_time = Some(elapsed.to_std().unwrap_or_default());
    }

    /// Turns anything still in flight into an error. Used when in-flight work can no longer
    /// write back (archived or rehydrated rounds). Settling bumps `attempt`, so the tasks that
    /// were running stay locked out even if the round comes back into the feed.
    pub fn interrupt(&mut self) {
        let mut settled = false;
        if self.is_busy() {
            self.image = ImageState::Error;
            self.finish_timing();
            settled = true;
        }
        if matches!(self.caption, CaptionState::Generating) {
            self.caption = CaptionState::Error;
            settled = true;
        }
        if settled {
            self.attempt = self.attempt.wrapping_add(1);
        }
        self.is_editing = false;
    }
}

#[cfg(test)]
impl Output {
    pub fn got_error(&self) -> bool {
        matches!(self.image, ImageState::Error)
    }

    pub fn caption_text(&self) -> Option<&str> {
        match &self.caption {
            CaptionState::Ready { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Round {
    pub id: Uuid,
    pub prompt: String,
    /// Resolved once at creation and reused by every regeneration of this round.
    pub system_instruction: String,
    pub created_at: DateTime<Utc>,
    pub output_mode: String,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub uploaded_image: Option<SourceImage>,
    pub outputs: Vec<Output>,
}

impl Round {
    pub fn output(&self, output_id: Uuid) -> Option<&Output> {
        self.outputs.iter().find(|o| o.id == output_id)
    }

    pub fn output_mut(&mut self, output_id: Uuid) -> Option<&mut Output> {
        self.outputs.iter_mut().find(|o| o.id == output_id)
    }
}

/// An open "keep editing this image" flow.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AiEditSession {
    pub round_id: Uuid,
    pub output_id: Uuid,
    pub image: String,
}

// --- HTTP payloads ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptionRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyzeImageRequest {
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PromptRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SettingsPatch {
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub batch_size: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UploadImageRequest {
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EditingRequest {
    pub editing: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiEditRequest {
    pub round_id: Uuid,
    pub output_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionView {
    pub revision: u64,
    pub settings: Settings,
    pub feed: Vec<Round>,
    pub ai_edit: Option<AiEditSession>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_data_urls() {
        let image = SourceImage::from_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(image, SourceImage { mime_type: "image/png".into(), data: "aGVsbG8=".into() });
        assert_eq!(image.to_data_url(), "data:image/png;base64,aGVsbG8=");
        assert_eq!(image.bytes().unwrap(), b"hello");
        assert_eq!(image.extension(), "png");
        let svg = SourceImage { mime_type: "image/svg+xml".into(), data: String::new() };
        assert_eq!(svg.extension(), "svg");
    }

    #[test]
    fn rejects_malformed_data_urls() {
        assert_eq!(SourceImage::from_data_url("aGVsbG8="), Err(SourceImageError::NotDataUrl));
        assert_eq!(SourceImage::from_data_url("data:;base64,aGVsbG8="), Err(SourceImageError::MissingMimeType));
        assert!(matches!(
            SourceImage::from_data_url("data:image/png;base64,@@@"),
            Err(SourceImageError::InvalidBase64(_))
        ));
    }

    #[test]
    fn sniffs_png_bytes() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let image = SourceImage::from_bytes(&png_header).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(SourceImage::from_bytes(b"plain text"), Err(SourceImageError::UnknownFormat));
    }

    #[test]
    fn output_flags_are_mutually_exclusive() {
        let mut output = Output::pending("imagen_4", "anime", "A red car");
        assert!(output.is_busy() && !output.got_error() && output.output_data().is_none());

        output.image = ImageState::Ready { data: "data:image/jpeg;base64,AA==".into() };
        assert!(!output.is_busy() && !output.got_error());
        assert_eq!(output.output_data(), Some("data:image/jpeg;base64,AA=="));

        output.image = ImageState::Error;
        assert!(!output.is_busy() && output.got_error() && output.output_data().is_none());
    }

    #[test]
    fn interrupt_settles_in_flight_work() {
        let mut output = Output::pending("imagen_4", "anime", "A red car");
        output.is_editing = true;
        output.interrupt();
        assert!(output.got_error());
        assert_eq!(output.caption, CaptionState::Error);
        assert!(output.total_time.is_some());
        assert!(!output.is_editing);
        assert_eq!(output.attempt, 1);

        let mut done = Output::pending("imagen_4", "anime", "A red car");
        done.image = ImageState::Ready { data: "x".into() };
        done.caption = CaptionState::Ready { text: "caption".into() };
        done.interrupt();
        assert_eq!(done.output_data(), Some("x"));
        assert_eq!(done.caption_text(), Some("caption"));
        assert_eq!(done.attempt, 0);
    }
}
