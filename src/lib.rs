// Client core for a video-download web service.
//
// Two layers: the metadata & format catalog (pure data plus validation) and
// the download session controller (one session at a time through request,
// progress polling and terminal resolution). The service itself sits behind
// the `DownloadService` trait; `HttpService` is the production
// implementation over its HTTP routes.

pub mod catalog;
pub mod errors;
pub mod format;
pub mod models;
pub mod service;
pub mod session;

pub use catalog::{extract_video_id, watch_url, Catalog};
pub use errors::ClientError;
pub use models::{
    AudioVariant, DownloadSession, Notice, NoticeLevel, ProgressSnapshot, SessionState,
    StreamFormat, VideoDescriptor, VideoVariant,
};
pub use service::{ControlAction, DownloadService, HttpService, ProgressUpdate, ServiceConfig};
pub use session::{NullObserver, SessionController, SessionObserver, POLL_INTERVAL};
