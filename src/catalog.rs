// Metadata & format catalog: input normalization, descriptor loading and
// format selection. Pure data holder; all retrieval goes through the
// service trait.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::errors::ClientError;
use crate::models::{is_valid_video_id, StreamFormat, VideoDescriptor};
use crate::service::DownloadService;

lazy_static! {
    // Id token as it appears in the supported URL forms: watch links
    // (watch?v=, &v=), short links (youtu.be/), embed links (embed/),
    // and the legacy /v/ and /u/<x>/ paths. The whole token is captured;
    // only an exactly-11-character token is a valid id, so an over-long
    // token must not be truncated into one.
    static ref URL_ID_RE: Regex =
        Regex::new(r"(?:youtu\.be/|/v/|/u/\w/|embed/|watch\?v=|&v=)([A-Za-z0-9_-]+)").unwrap();
}

/// Extract the 11-character video id from any supported URL form; a bare id
/// is accepted as itself.
pub fn extract_video_id(input: &str) -> Option<&str> {
    if is_valid_video_id(input) {
        return Some(input);
    }
    URL_ID_RE
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|token| is_valid_video_id(token))
}

/// Canonical watch URL for a video id.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Holds the last-fetched descriptor and the user's format selection.
///
/// The descriptor is replaced wholesale on every successful load and the
/// selection never survives a new fetch.
#[derive(Debug, Default)]
pub struct Catalog {
    descriptor: Option<VideoDescriptor>,
    selected: Option<StreamFormat>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptor(&self) -> Option<&VideoDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn selected(&self) -> Option<&StreamFormat> {
        self.selected.as_ref()
    }

    /// Normalize the input to a canonical URL and fetch its descriptor.
    ///
    /// Fails with `InvalidInput` before any service call when no 11-character
    /// id can be extracted; fails with `Upstream` when the service reports an
    /// error. On success the previous descriptor and selection are dropped.
    pub async fn load_descriptor<S>(
        &mut self,
        service: &S,
        raw: &str,
    ) -> Result<&VideoDescriptor, ClientError>
    where
        S: DownloadService + ?Sized,
    {
        let input = raw.trim();
        if input.is_empty() {
            return Err(ClientError::InvalidInput(
                "Please enter a video URL or id".to_string(),
            ));
        }

        let video_id = match extract_video_id(input) {
            Some(id) => id.to_string(),
            None => {
                return Err(ClientError::InvalidInput(format!(
                    "No video id found in \"{}\"",
                    input
                )))
            }
        };

        // Full URLs go to the service as typed; bare ids get the canonical
        // watch URL built for them.
        let url = if input.starts_with("http") {
            input.to_string()
        } else {
            watch_url(&video_id)
        };

        debug!(%url, %video_id, "fetching video info");
        let mut descriptor = service.get_info(&url).await?;
        descriptor.url = url;
        if descriptor.id.is_none() {
            descriptor.id = Some(video_id);
        }
        descriptor.validate()?;

        self.selected = None;
        Ok(self.descriptor.insert(descriptor))
    }

    /// Select a format by id from the current descriptor.
    ///
    /// Idempotent: reselecting the same id returns the same format and
    /// changes nothing.
    pub fn select_format(&mut self, format_id: &str) -> Result<StreamFormat, ClientError> {
        let descriptor = self.descriptor.as_ref().ok_or_else(|| {
            ClientError::Precondition("No video loaded yet".to_string())
        })?;

        let format = descriptor
            .find_format(format_id)
            .ok_or_else(|| ClientError::FormatNotFound(format_id.to_string()))?;

        debug!(format_id, label = %format.display_label(), "format selected");
        self.selected = Some(format.clone());
        Ok(format)
    }
}
