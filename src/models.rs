// Common data models for the download client

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::ClientError;
use crate::format::{format_bytes, format_duration, format_grouped, trim_decimal};

/// Metadata record for one video, as returned by the service's `get_info`
/// endpoint. Replaced wholesale on every successful fetch, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoDescriptor {
    /// 11-character platform video id, when one is known
    #[serde(default)]
    pub id: Option<String>,
    /// Canonical URL the descriptor was fetched for (filled client-side)
    #[serde(default)]
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    /// Duration in seconds; absent or zero means "unknown"
    #[serde(rename = "duration")]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub video_formats: Vec<VideoVariant>,
    #[serde(default)]
    pub audio_formats: Vec<AudioVariant>,
}

impl VideoDescriptor {
    /// Check the descriptor invariants: a well-formed id (when present),
    /// format-id uniqueness across both variant lists, a positive height on
    /// every video variant and a non-negative bitrate on every audio one.
    pub fn validate(&self) -> Result<(), ClientError> {
        if let Some(id) = &self.id {
            if !is_valid_video_id(id) {
                return Err(ClientError::Upstream(format!(
                    "Service returned a malformed video id: {}",
                    id
                )));
            }
        }

        if let Some(v) = self.video_formats.iter().find(|v| v.height == 0) {
            return Err(ClientError::Upstream(format!(
                "Service returned a video format without a height: {}",
                v.format_id
            )));
        }
        // NaN fails the comparison too
        if let Some(a) = self
            .audio_formats
            .iter()
            .find(|a| !(a.abr >= 0.0 && a.abr.is_finite()))
        {
            return Err(ClientError::Upstream(format!(
                "Service returned an audio format with a bad bitrate: {}",
                a.format_id
            )));
        }

        let mut seen = HashSet::new();
        let ids = self
            .video_formats
            .iter()
            .map(|v| v.format_id.as_str())
            .chain(self.audio_formats.iter().map(|a| a.format_id.as_str()));
        for format_id in ids {
            if !seen.insert(format_id) {
                return Err(ClientError::Upstream(format!(
                    "Service returned a duplicate format id: {}",
                    format_id
                )));
            }
        }

        Ok(())
    }

    /// Look up a format id in either variant list.
    pub fn find_format(&self, format_id: &str) -> Option<StreamFormat> {
        if let Some(v) = self.video_formats.iter().find(|v| v.format_id == format_id) {
            return Some(StreamFormat::Video(v.clone()));
        }
        self.audio_formats
            .iter()
            .find(|a| a.format_id == format_id)
            .map(|a| StreamFormat::Audio(a.clone()))
    }

    /// Duration ready for display ("1:01:01", or "N/A" when unknown)
    pub fn duration_text(&self) -> String {
        format_duration(self.duration_seconds)
    }

    /// View count badge text ("1,234,567 views", empty when unknown)
    pub fn view_count_text(&self) -> String {
        match self.view_count {
            Some(n) => format!("{} views", format_grouped(n)),
            None => String::new(),
        }
    }
}

/// 11 characters from the platform id alphabet.
pub fn is_valid_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// A video encoding (possibly carrying its own audio track).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoVariant {
    /// Opaque format id, unique within one descriptor
    pub format_id: String,
    /// Container extension, when the service declares one
    #[serde(default)]
    pub ext: Option<String>,
    /// Frame height in pixels
    pub height: u32,
    /// Frames per second
    #[serde(default)]
    pub fps: Option<f32>,
    /// Video codec (avc1, vp9, av01, ...)
    #[serde(default)]
    pub vcodec: Option<String>,
    /// Whether this encoding already includes an audio track
    #[serde(default)]
    pub has_audio: bool,
    /// File size in bytes, when known
    #[serde(default)]
    pub filesize: Option<u64>,
}

impl VideoVariant {
    /// Display label in the shape the service UI uses,
    /// e.g. "720p 30fps avc1 with audio 50 MB".
    pub fn display_label(&self) -> String {
        let mut parts = vec![format!("{}p", self.height)];
        if let Some(fps) = self.fps {
            parts.push(format!("{}fps", trim_decimal(fps as f64)));
        }
        if let Some(vcodec) = &self.vcodec {
            parts.push(codec_base(vcodec).to_string());
        }
        if self.has_audio {
            parts.push("with audio".to_string());
        }
        parts.push(size_label(self.filesize));
        parts.join(" ")
    }
}

/// An audio-only encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioVariant {
    /// Opaque format id, unique within one descriptor
    pub format_id: String,
    /// Container extension (mp3, m4a, ...)
    pub ext: String,
    /// Average bitrate in kbps
    pub abr: f32,
    /// Audio codec (mp4a, opus, ...)
    #[serde(default)]
    pub acodec: Option<String>,
    /// File size in bytes, when known
    #[serde(default)]
    pub filesize: Option<u64>,
}

impl AudioVariant {
    /// Display label, e.g. "MP3 128kbps mp4a 4.77 MB".
    pub fn display_label(&self) -> String {
        let mut parts = vec![format!(
            "{} {}kbps",
            self.ext.to_uppercase(),
            trim_decimal(self.abr as f64)
        )];
        if let Some(acodec) = &self.acodec {
            parts.push(codec_base(acodec).to_string());
        }
        parts.push(size_label(self.filesize));
        parts.join(" ")
    }
}

fn codec_base(codec: &str) -> &str {
    // "avc1.4d401f" -> "avc1"
    codec.split('.').next().unwrap_or(codec)
}

fn size_label(filesize: Option<u64>) -> String {
    match filesize {
        Some(b) if b > 0 => format_bytes(Some(b)),
        _ => "Unknown size".to_string(),
    }
}

/// One selectable encoding of a video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamFormat {
    Video(VideoVariant),
    Audio(AudioVariant),
}

impl StreamFormat {
    pub fn format_id(&self) -> &str {
        match self {
            Self::Video(v) => &v.format_id,
            Self::Audio(a) => &a.format_id,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_))
    }

    /// Extension declared by the variant itself, when there is one.
    pub fn declared_ext(&self) -> Option<&str> {
        match self {
            Self::Video(v) => v.ext.as_deref(),
            Self::Audio(a) => Some(a.ext.as_str()),
        }
    }

    /// Container extension to fall back on when the variant declares none.
    pub fn default_ext(&self) -> &'static str {
        match self {
            Self::Video(_) => "mp4",
            Self::Audio(_) => "mp3",
        }
    }

    pub fn display_label(&self) -> String {
        match self {
            Self::Video(v) => v.display_label(),
            Self::Audio(a) => a.display_label(),
        }
    }
}

/// Lifecycle state of a download session.
///
/// `Idle` is the empty slot; `Completed`, `Failed` and `Stopped` are
/// terminal, no transition leaves them without starting a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Requested,
    Polling,
    Completed,
    Failed,
    Stopped,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Active states hold the single session slot and block a new `start`.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Requested | Self::Polling)
    }
}

/// Last-known progress of a session, built from one poll response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Numeric percent, clamped to 0..=100
    pub percent: f32,
    /// Percent exactly as the service formatted it ("42.3%")
    pub percent_text: String,
    /// Transfer rate with normalized unit labels ("420.30KB/s")
    pub speed: String,
    /// Estimated time remaining, opaque display text ("12:32", "--:--")
    pub eta: String,
}

/// One in-flight or completed download, tracked by the service-issued token.
/// The controller owns at most one of these at a time.
#[derive(Debug, Clone)]
pub struct DownloadSession {
    /// Token issued by the service when the download was accepted
    pub client_id: String,
    /// The format the user picked for this session
    pub format: StreamFormat,
    /// Title captured at start time, used for the suggested filename
    pub title: String,
    pub state: SessionState,
    pub last_progress: Option<ProgressSnapshot>,
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Success,
    Warning,
    Danger,
}

/// A visible, dismissible notification for the user. The core returns these
/// as plain data so any UI layer can render them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn danger(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Danger,
            message: message.into(),
        }
    }

    /// Every error surfaces to the user; none are silently swallowed.
    /// User-correctable problems rate a warning, everything else a danger.
    pub fn for_error(error: &ClientError) -> Self {
        match error {
            ClientError::InvalidInput(_) | ClientError::Precondition(_) => {
                Self::warning(error.to_string())
            }
            _ => Self::danger(error.to_string()),
        }
    }
}
