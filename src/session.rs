// Download session controller: drives one download at a time through
// request, progress polling and terminal resolution, then hands the
// finished artifact to the caller.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::format::sanitize_filename;
use crate::models::{
    DownloadSession, Notice, ProgressSnapshot, SessionState, StreamFormat, VideoDescriptor,
};
use crate::service::{ControlAction, DownloadService};

/// Fixed wait between polls; the only timing contract in the client.
/// No backoff, no jitter, no retry cutoff.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Receives progress snapshots and user-facing notices from the controller.
///
/// The controller never renders anything itself; it describes effects
/// through this trait and any UI layer decides what they look like.
pub trait SessionObserver {
    fn on_progress(&mut self, _snapshot: &ProgressSnapshot) {}
    fn on_notice(&mut self, _notice: Notice) {}
}

/// A do-nothing observer for callers that only want the return values.
pub struct NullObserver;

impl SessionObserver for NullObserver {}

/// Owns the single session slot.
///
/// State machine: `Idle -> Requested -> Polling -> {Completed, Failed,
/// Stopped}`. Only one session may be active (`Requested` or `Polling`) at a
/// time; terminal sessions are replaced by the next `start`.
pub struct SessionController<S: DownloadService> {
    service: S,
    session: Option<DownloadSession>,
}

impl<S: DownloadService> SessionController<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            session: None,
        }
    }

    /// Current lifecycle state; an empty slot reads as `Idle`.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn session(&self) -> Option<&DownloadSession> {
        self.session.as_ref()
    }

    /// Start a download for the selected format.
    ///
    /// `selection` is the catalog's current selection; `None` means the user
    /// has not picked a format yet. Fails with `Precondition` on a missing
    /// selection or while another session is active. On service refusal the
    /// slot returns to `Idle` and the error propagates.
    pub async fn start(
        &mut self,
        descriptor: &VideoDescriptor,
        selection: Option<&StreamFormat>,
    ) -> Result<(), ClientError> {
        let format = selection.ok_or_else(|| {
            ClientError::Precondition("Please select a format first".to_string())
        })?;

        if self.state().is_active() {
            return Err(ClientError::Precondition(
                "A download is already in progress".to_string(),
            ));
        }

        // Take the slot before the request goes out so the machine is in
        // `Requested` for the duration of the exchange.
        self.session = Some(DownloadSession {
            client_id: String::new(),
            format: format.clone(),
            title: descriptor.title.clone(),
            state: SessionState::Requested,
            last_progress: None,
        });

        match self
            .service
            .start_download(&descriptor.url, format.format_id(), &descriptor.title)
            .await
        {
            Ok(client_id) => {
                debug!(%client_id, format_id = format.format_id(), "download accepted");
                if let Some(session) = self.session.as_mut() {
                    session.client_id = client_id;
                    session.state = SessionState::Polling;
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "download request refused");
                self.session = None;
                Err(e)
            }
        }
    }

    /// Issue one progress poll and apply the reported status.
    ///
    /// Status mapping: `completed -> Completed`, `error -> Failed`,
    /// `stopped -> Stopped`, anything else stays `Polling`. A transport
    /// failure leaves the state untouched and propagates; the caller decides
    /// whether to retry.
    pub async fn poll(&mut self) -> Result<ProgressSnapshot, ClientError> {
        let client_id = match self.session.as_ref() {
            Some(s) if s.state == SessionState::Polling => s.client_id.clone(),
            _ => {
                return Err(ClientError::Precondition(
                    "No download is being polled".to_string(),
                ))
            }
        };

        let update = self.service.progress(&client_id).await?;
        let next = map_status(&update.status);
        let snapshot = update.snapshot();
        debug!(status = %update.status, percent = snapshot.percent, "progress");

        if let Some(session) = self.session.as_mut() {
            session.last_progress = Some(snapshot.clone());
            session.state = next;
        }
        Ok(snapshot)
    }

    /// Poll at the fixed 1-second cadence until a terminal status arrives.
    ///
    /// Polls are strictly sequential, never overlapping, and continue
    /// indefinitely while the status is non-terminal. The first transport
    /// failure ends the loop (after surfacing a notice); re-polling is then
    /// the caller's decision.
    pub async fn run_to_terminal<O: SessionObserver>(
        &mut self,
        observer: &mut O,
    ) -> Result<SessionState, ClientError> {
        loop {
            let snapshot = match self.poll().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    observer.on_notice(Notice::for_error(&e));
                    return Err(e);
                }
            };
            observer.on_progress(&snapshot);

            let state = self.state();
            match state {
                SessionState::Completed => {
                    observer.on_notice(Notice::success("Download completed!"));
                    return Ok(state);
                }
                SessionState::Failed => {
                    observer.on_notice(Notice::danger("Download error"));
                    return Ok(state);
                }
                SessionState::Stopped => {
                    observer.on_notice(Notice::danger("Download stopped"));
                    return Ok(state);
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    /// Retrieve the finished file of a completed session.
    ///
    /// Returns the artifact bytes and a suggested filename: the sanitized
    /// title plus the variant's declared extension, falling back to the
    /// container default (`mp4` for video, `mp3` for audio). Delivery clears
    /// the slot back to `Idle`.
    pub async fn retrieve_artifact(&mut self) -> Result<(Bytes, String), ClientError> {
        let (client_id, filename) = match self.session.as_ref() {
            Some(s) if s.state == SessionState::Completed => {
                (s.client_id.clone(), suggested_filename(&s.title, &s.format))
            }
            _ => {
                return Err(ClientError::Precondition(
                    "Download is not completed yet".to_string(),
                ))
            }
        };

        let bytes = self.service.fetch_file(&client_id).await?;
        debug!(%client_id, %filename, size = bytes.len(), "artifact delivered");

        self.session = None;
        Ok((bytes, filename))
    }

    /// Ask the service to pause the active download.
    pub async fn pause(&mut self) -> Result<(), ClientError> {
        self.control(ControlAction::Pause).await
    }

    /// Ask the service to resume a paused download.
    pub async fn resume(&mut self) -> Result<(), ClientError> {
        self.control(ControlAction::Resume).await
    }

    /// Ask the service to stop the active download. The session then reaches
    /// `Stopped` through the normal poll path.
    pub async fn stop(&mut self) -> Result<(), ClientError> {
        self.control(ControlAction::Stop).await
    }

    async fn control(&mut self, action: ControlAction) -> Result<(), ClientError> {
        let client_id = match self.session.as_ref() {
            Some(s) if s.state.is_active() => s.client_id.clone(),
            _ => {
                return Err(ClientError::Precondition(
                    "No active download to control".to_string(),
                ))
            }
        };
        self.service.control(&client_id, action).await
    }

    /// Clear a terminal session whose outcome has been reported, returning
    /// the slot to `Idle`. A no-op on an already empty slot.
    pub fn acknowledge(&mut self) -> Result<(), ClientError> {
        match self.session.as_ref() {
            Some(s) if s.state.is_terminal() => {
                self.session = None;
                Ok(())
            }
            Some(_) => Err(ClientError::Precondition(
                "Session is still active".to_string(),
            )),
            None => Ok(()),
        }
    }
}

fn map_status(status: &str) -> SessionState {
    match status {
        "completed" => SessionState::Completed,
        "error" => SessionState::Failed,
        "stopped" => SessionState::Stopped,
        // starting, downloading, paused, and anything the service adds later
        _ => SessionState::Polling,
    }
}

fn suggested_filename(title: &str, format: &StreamFormat) -> String {
    let ext = format.declared_ext().unwrap_or_else(|| format.default_ext());
    format!("{}.{}", sanitize_filename(title), ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioVariant, VideoVariant};
    use crate::service::ProgressUpdate;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn make_descriptor() -> VideoDescriptor {
        VideoDescriptor {
            id: Some("dQw4w9WgXcQ".to_string()),
            url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            title: "What? A \"Video\": Part 1/2".to_string(),
            thumbnail: String::new(),
            duration_seconds: Some(212),
            uploader: None,
            view_count: None,
            video_formats: vec![VideoVariant {
                format_id: "v1".to_string(),
                ext: None,
                height: 720,
                fps: Some(30.0),
                vcodec: Some("avc1".to_string()),
                has_audio: true,
                filesize: Some(52_428_800),
            }],
            audio_formats: vec![AudioVariant {
                format_id: "a1".to_string(),
                ext: "mp3".to_string(),
                abr: 128.0,
                acodec: None,
                filesize: None,
            }],
        }
    }

    fn downloading(percent: &str) -> ProgressUpdate {
        ProgressUpdate {
            status: "downloading".to_string(),
            percent: percent.to_string(),
            speed: "420.30KiB/s".to_string(),
            eta: "0:42".to_string(),
        }
    }

    fn terminal(status: &str) -> ProgressUpdate {
        ProgressUpdate {
            status: status.to_string(),
            percent: "100%".to_string(),
            speed: "0 KiB/s".to_string(),
            eta: "0:00".to_string(),
        }
    }

    /// Scripted service: replays a fixed sequence of progress reports and
    /// records everything the controller sends.
    #[derive(Default)]
    struct ScriptedService {
        updates: Mutex<VecDeque<Result<ProgressUpdate, ClientError>>>,
        started: Mutex<Vec<(String, String, String)>>,
        controls: Mutex<Vec<ControlAction>>,
        poll_count: Mutex<usize>,
    }

    impl ScriptedService {
        fn with_updates(
            updates: impl IntoIterator<Item = Result<ProgressUpdate, ClientError>>,
        ) -> Self {
            Self {
                updates: Mutex::new(updates.into_iter().collect()),
                ..Self::default()
            }
        }

        fn polls(&self) -> usize {
            *self.poll_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl DownloadService for ScriptedService {
        async fn get_info(&self, _url: &str) -> Result<VideoDescriptor, ClientError> {
            Ok(make_descriptor())
        }

        async fn start_download(
            &self,
            url: &str,
            format_id: &str,
            title: &str,
        ) -> Result<String, ClientError> {
            self.started.lock().unwrap().push((
                url.to_string(),
                format_id.to_string(),
                title.to_string(),
            ));
            Ok("client-1".to_string())
        }

        async fn progress(&self, _client_id: &str) -> Result<ProgressUpdate, ClientError> {
            *self.poll_count.lock().unwrap() += 1;
            self.updates
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(terminal("completed")))
        }

        async fn fetch_file(&self, _client_id: &str) -> Result<Bytes, ClientError> {
            Ok(Bytes::from_static(b"artifact"))
        }

        async fn control(
            &self,
            _client_id: &str,
            action: ControlAction,
        ) -> Result<(), ClientError> {
            self.controls.lock().unwrap().push(action);
            Ok(())
        }
    }

    /// Collects everything the controller reports.
    #[derive(Default)]
    struct Recorder {
        snapshots: Vec<ProgressSnapshot>,
        notices: Vec<Notice>,
    }

    impl SessionObserver for Recorder {
        fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
            self.snapshots.push(snapshot.clone());
        }
        fn on_notice(&mut self, notice: Notice) {
            self.notices.push(notice);
        }
    }

    #[tokio::test]
    async fn test_start_requires_a_selection() {
        let mut controller = SessionController::new(ScriptedService::default());
        let err = controller
            .start(&make_descriptor(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Precondition(_)));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_transitions_to_polling_and_sends_request_fields() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();
        let mut controller = SessionController::new(ScriptedService::default());

        controller.start(&descriptor, Some(&format)).await.unwrap();
        assert_eq!(controller.state(), SessionState::Polling);
        assert_eq!(controller.session().unwrap().client_id, "client-1");

        let started = controller.service.started.lock().unwrap().clone();
        assert_eq!(
            started,
            vec![(
                descriptor.url.clone(),
                "v1".to_string(),
                descriptor.title.clone()
            )]
        );
    }

    #[tokio::test]
    async fn test_single_slot_rejects_a_second_start() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();
        let mut controller = SessionController::new(ScriptedService::default());

        controller.start(&descriptor, Some(&format)).await.unwrap();
        let err = controller
            .start(&descriptor, Some(&format))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Precondition(_)));
        // The active session is untouched by the rejected start
        assert_eq!(controller.state(), SessionState::Polling);
    }

    #[tokio::test]
    async fn test_start_is_allowed_again_from_every_terminal_state() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();

        for status in ["completed", "error", "stopped"] {
            let service = ScriptedService::with_updates([Ok(terminal(status))]);
            let mut controller = SessionController::new(service);

            controller.start(&descriptor, Some(&format)).await.unwrap();
            controller.poll().await.unwrap();
            assert!(controller.state().is_terminal());

            // The slot is single-use per session, not locked forever
            controller.start(&descriptor, Some(&format)).await.unwrap();
            assert_eq!(controller.state(), SessionState::Polling);
        }
    }

    #[tokio::test]
    async fn test_refused_start_returns_the_slot_to_idle() {
        struct RefusingService;

        #[async_trait]
        impl DownloadService for RefusingService {
            async fn get_info(&self, _url: &str) -> Result<VideoDescriptor, ClientError> {
                unreachable!()
            }
            async fn start_download(
                &self,
                _url: &str,
                _format_id: &str,
                _title: &str,
            ) -> Result<String, ClientError> {
                Err(ClientError::Upstream("Missing URL or format_id".to_string()))
            }
            async fn progress(&self, _client_id: &str) -> Result<ProgressUpdate, ClientError> {
                unreachable!()
            }
            async fn fetch_file(&self, _client_id: &str) -> Result<Bytes, ClientError> {
                unreachable!()
            }
            async fn control(
                &self,
                _client_id: &str,
                _action: ControlAction,
            ) -> Result<(), ClientError> {
                unreachable!()
            }
        }

        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();
        let mut controller = SessionController::new(RefusingService);

        let err = controller
            .start(&descriptor, Some(&format))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Upstream(_)));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_poll_outside_polling_is_a_precondition_error() {
        let mut controller = SessionController::new(ScriptedService::default());
        let err = controller.poll().await.unwrap_err();
        assert!(matches!(err, ClientError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_the_state_polling() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();
        let service = ScriptedService::with_updates([
            Err(ClientError::Transport("connection reset".to_string())),
            Ok(terminal("completed")),
        ]);
        let mut controller = SessionController::new(service);

        controller.start(&descriptor, Some(&format)).await.unwrap();

        let err = controller.poll().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(controller.state(), SessionState::Polling);

        // Manual retry works
        controller.poll().await.unwrap();
        assert_eq!(controller.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_end_to_end_download_and_artifact_delivery() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();
        let service = ScriptedService::with_updates([
            Ok(downloading("33.0%")),
            Ok(downloading("66.0%")),
            Ok(terminal("completed")),
        ]);
        let mut controller = SessionController::new(service);

        controller.start(&descriptor, Some(&format)).await.unwrap();
        assert_eq!(controller.state(), SessionState::Polling);

        let mut states = Vec::new();
        for _ in 0..3 {
            controller.poll().await.unwrap();
            states.push(controller.state());
        }
        assert_eq!(
            states,
            vec![
                SessionState::Polling,
                SessionState::Polling,
                SessionState::Completed
            ]
        );

        let snapshot = controller.session().unwrap().last_progress.clone().unwrap();
        assert_eq!(snapshot.percent, 100.0);
        assert_eq!(snapshot.speed, "0 KB/s");

        let (bytes, filename) = controller.retrieve_artifact().await.unwrap();
        assert_eq!(&bytes[..], b"artifact");
        // VideoVariant declares no extension, so the container default wins,
        // and the forbidden characters are gone from the title
        assert_eq!(filename, "What A Video Part 12.mp4");
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_audio_artifact_uses_declared_extension() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("a1").unwrap();
        let service = ScriptedService::with_updates([Ok(terminal("completed"))]);
        let mut controller = SessionController::new(service);

        controller.start(&descriptor, Some(&format)).await.unwrap();
        controller.poll().await.unwrap();

        let (_, filename) = controller.retrieve_artifact().await.unwrap();
        assert!(filename.ends_with(".mp3"));
    }

    #[tokio::test]
    async fn test_artifact_requires_completed_state() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();
        let service = ScriptedService::with_updates([Ok(downloading("10%"))]);
        let mut controller = SessionController::new(service);

        controller.start(&descriptor, Some(&format)).await.unwrap();
        let err = controller.retrieve_artifact().await.unwrap_err();
        assert!(matches!(err, ClientError::Precondition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_cadence_polling_until_terminal() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();

        // Ten non-terminal cycles, then completion
        let mut updates: Vec<Result<ProgressUpdate, ClientError>> = (0..10)
            .map(|i| Ok(downloading(&format!("{}%", i * 10))))
            .collect();
        updates.push(Ok(terminal("completed")));
        let mut controller = SessionController::new(ScriptedService::with_updates(updates));

        controller.start(&descriptor, Some(&format)).await.unwrap();

        let began = tokio::time::Instant::now();
        let mut recorder = Recorder::default();
        let state = controller.run_to_terminal(&mut recorder).await.unwrap();

        assert_eq!(state, SessionState::Completed);
        // 11 sequential polls, one fixed 1s wait after each of the 10
        // non-terminal ones
        assert_eq!(controller.service.polls(), 11);
        assert_eq!(began.elapsed(), Duration::from_secs(10));
        assert_eq!(recorder.snapshots.len(), 11);
        assert!(recorder
            .notices
            .iter()
            .any(|n| n.message == "Download completed!"));
    }

    #[tokio::test]
    async fn test_run_to_terminal_reports_failures_as_notices() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();
        let service = ScriptedService::with_updates([Err(ClientError::Transport(
            "connection reset".to_string(),
        ))]);
        let mut controller = SessionController::new(service);

        controller.start(&descriptor, Some(&format)).await.unwrap();

        let mut recorder = Recorder::default();
        let err = controller.run_to_terminal(&mut recorder).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(recorder.notices.len(), 1);
        assert!(recorder.notices[0].message.contains("connection reset"));
        // Automatic re-polling halted, but the session is still retryable
        assert_eq!(controller.state(), SessionState::Polling);
    }

    #[tokio::test]
    async fn test_stop_sends_the_control_action() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();
        let service = ScriptedService::with_updates([Ok(terminal("stopped"))]);
        let mut controller = SessionController::new(service);

        controller.start(&descriptor, Some(&format)).await.unwrap();
        controller.stop().await.unwrap();
        assert_eq!(
            controller.service.controls.lock().unwrap().clone(),
            vec![ControlAction::Stop]
        );

        // The stop lands through the normal poll path
        controller.poll().await.unwrap();
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_acknowledge_clears_only_terminal_sessions() {
        let descriptor = make_descriptor();
        let format = descriptor.find_format("v1").unwrap();
        let service = ScriptedService::with_updates([Ok(terminal("error"))]);
        let mut controller = SessionController::new(service);

        assert!(controller.acknowledge().is_ok()); // empty slot, no-op

        controller.start(&descriptor, Some(&format)).await.unwrap();
        assert!(controller.acknowledge().is_err());

        controller.poll().await.unwrap();
        assert_eq!(controller.state(), SessionState::Failed);
        controller.acknowledge().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_status_mapping_keeps_unknown_values_polling() {
        assert_eq!(map_status("completed"), SessionState::Completed);
        assert_eq!(map_status("error"), SessionState::Failed);
        assert_eq!(map_status("stopped"), SessionState::Stopped);
        assert_eq!(map_status("downloading"), SessionState::Polling);
        assert_eq!(map_status("paused"), SessionState::Polling);
        assert_eq!(map_status("starting"), SessionState::Polling);
        assert_eq!(map_status("something-new"), SessionState::Polling);
    }
}
