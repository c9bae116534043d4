//! Call controller: drives one live voice call from connect to hang-up.
//!
//! [`CallController`] owns the [`PlaybackScheduler`], the [`CapturePipeline`]
//! and the [`LiveLink`], and reacts to [`CallEvent`]s received over a single
//! `tokio::sync::mpsc` channel.  Because every input funnels through that one
//! channel, scheduler state has exactly one owner and needs no lock.
//!
//! # Call flow
//!
//! ```text
//! open()
//!   └─▶ spawn connector.connect(setup)                      [Connecting]
//!
//! CallEvent::Connected(link)
//!   └─▶ spawn_blocking capture.start(mic, link.audio_sender())
//! CallEvent::CaptureReady(Ok)                               [Connected]
//! CallEvent::CaptureReady(Err) → close link                  [Error]
//! CallEvent::ConnectFailed(e)                                [Error]
//!
//! CallEvent::Link(Message(serverContent))
//!   └─▶ decode each audio part → scheduler.enqueue(now)
//!   └─▶ interrupted → scheduler.interrupt()
//! CallEvent::Link(Closed { clean: true })                    [Closed]
//! CallEvent::Link(Closed { clean: false }) / Link(Failed)    [Error]
//!
//! CallEvent::UnitEnded(id)  → scheduler.on_unit_ended(id)
//! CallEvent::Hangup         → close()                       [Closed]
//! ```
//!
//! Opening the mic can block on a permission prompt, so it never runs on the
//! controller's task; a hang-up during the prompt is handled at once and the
//! late pipeline is released when it arrives.
//!
//! The UI never touches the controller; it holds a [`CallHandle`] and reads
//! the [`SharedCallStatus`] snapshot the controller publishes after every
//! event.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::capture::{CaptureError, CapturePipeline, CaptureSettings, MicSource};
use crate::audio::codec::{self, PLAYBACK_SAMPLE_RATE};
use crate::audio::output::OutputEngine;
use crate::audio::scheduler::{AudioOutput, PlaybackScheduler, UnitId};

use super::messages::{ServerContent, ServerMessage, SessionSetup};
use super::state::{lock_status, new_shared_call_status, CallStatus, SessionState, SharedCallStatus};
use super::transport::{EventSink, LinkEvent, LiveConnector, LiveLink, TransportError};

// ---------------------------------------------------------------------------
// CallEvent
// ---------------------------------------------------------------------------

/// Every input the controller reacts to.
pub enum CallEvent {
    /// The connect task finished and the server accepted the setup.
    Connected(LiveLink),
    ConnectFailed(TransportError),
    /// The mic was opened (or refused) off the runtime.
    CaptureReady(Result<CapturePipeline, CaptureError>),
    /// Traffic or closure on the open link.
    Link(LinkEvent),
    /// The output finished playing a unit.
    UnitEnded(UnitId),
    /// The user ended the call.
    Hangup,
}

// ---------------------------------------------------------------------------
// CallHandle
// ---------------------------------------------------------------------------

/// The UI's side of a running call.
#[derive(Clone)]
pub struct CallHandle {
    events_tx: mpsc::UnboundedSender<CallEvent>,
    status: SharedCallStatus,
}

impl CallHandle {
    /// Ask the controller to end the call.  No-op once it has exited.
    pub fn hang_up(&self) {
        let _ = self.events_tx.send(CallEvent::Hangup);
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> CallStatus {
        lock_status(&self.status).clone()
    }
}

/// Audio formats for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSettings {
    pub capture: CaptureSettings,
    /// Rate assumed for model audio whose MIME type carries none.
    pub playback_sample_rate: u32,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
        }
    }
}

/// Start a call on the default speaker and microphone.
///
/// Must be called from inside a tokio runtime.  If the speaker cannot be
/// opened the returned handle already reports [`SessionState::Error`].
pub fn start_call(
    setup: SessionSetup,
    connector: Arc<dyn LiveConnector>,
    mic: Arc<dyn MicSource>,
    settings: CallSettings,
) -> CallHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let status = new_shared_call_status();
    let handle = CallHandle {
        events_tx: events_tx.clone(),
        status: Arc::clone(&status),
    };

    let ended_tx = events_tx.clone();
    let output = match OutputEngine::start(move |id| {
        let _ = ended_tx.send(CallEvent::UnitEnded(id));
    }) {
        Ok(output) => output,
        Err(e) => {
            log::error!("call: speaker unavailable: {e}");
            let mut st = lock_status(&status);
            st.state = SessionState::Error;
            st.error_message = Some(format!("Speaker unavailable: {e}"));
            return handle;
        }
    };

    let controller = CallController::new(setup, connector, mic, output, settings, events_tx, status);
    tokio::spawn(controller.run(events_rx));
    handle
}

// ---------------------------------------------------------------------------
// CallController
// ---------------------------------------------------------------------------

/// State machine for a single call.
pub struct CallController<O: AudioOutput> {
    setup: SessionSetup,
    connector: Arc<dyn LiveConnector>,
    mic: Arc<dyn MicSource>,
    scheduler: PlaybackScheduler<O>,
    settings: CallSettings,
    /// Present once the mic is open.
    capture: Option<CapturePipeline>,
    events_tx: mpsc::UnboundedSender<CallEvent>,
    status: SharedCallStatus,
    state: SessionState,
    link: Option<LiveLink>,
    connect_task: Option<JoinHandle<()>>,
    skipped_chunks: u64,
}

impl<O: AudioOutput + 'static> CallController<O> {
    pub fn new(
        setup: SessionSetup,
        connector: Arc<dyn LiveConnector>,
        mic: Arc<dyn MicSource>,
        output: O,
        settings: CallSettings,
        events_tx: mpsc::UnboundedSender<CallEvent>,
        status: SharedCallStatus,
    ) -> Self {
        Self {
            setup,
            connector,
            mic,
            scheduler: PlaybackScheduler::new(output),
            settings,
            capture: None,
            events_tx,
            status,
            state: SessionState::Connecting,
            link: None,
            connect_task: None,
            skipped_chunks: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Open the call and process events until it ends.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<CallEvent>) {
        self.open();

        while let Some(event) = events.recv().await {
            self.handle(event);
            if self.state.is_terminal() {
                break;
            }
        }

        self.close();
        log::info!("call: controller exiting in state {:?}", self.state);
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Enter `Connecting` and start connecting in a spawned task.
    pub fn open(&mut self) {
        if self.connect_task.is_some() || self.state.is_terminal() {
            return;
        }

        self.state = SessionState::Connecting;
        self.publish();
        log::info!("call: connecting (voice {})", self.setup.voice_name);

        let connector = Arc::clone(&self.connector);
        let setup = self.setup.clone();
        let tx = self.events_tx.clone();
        let link_tx = self.events_tx.clone();
        let sink: EventSink = Arc::new(move |event| {
            let _ = link_tx.send(CallEvent::Link(event));
        });

        self.connect_task = Some(tokio::spawn(async move {
            let event = match connector.connect(setup, sink).await {
                Ok(link) => CallEvent::Connected(link),
                Err(e) => CallEvent::ConnectFailed(e),
            };
            // If the controller is gone the link is dropped here, which closes it.
            let _ = tx.send(event);
        }));
    }

    /// Dispatch one event.
    pub fn handle(&mut self, event: CallEvent) {
        match event {
            CallEvent::Connected(link) => self.on_connected(link),
            CallEvent::ConnectFailed(e) => {
                self.connect_task = None;
                self.fail(format!("Could not connect: {e}"));
            }
            CallEvent::CaptureReady(result) => self.on_capture_ready(result),
            CallEvent::Link(LinkEvent::Message(msg)) => self.on_inbound_message(msg),
            CallEvent::Link(LinkEvent::Closed { clean: true, .. }) => {
                log::info!("call: remote ended the session");
                self.close();
            }
            CallEvent::Link(LinkEvent::Closed { clean: false, reason }) => {
                self.fail(format!("Connection lost: {reason}"));
            }
            CallEvent::Link(LinkEvent::Failed(e)) => self.fail(format!("Connection lost: {e}")),
            CallEvent::UnitEnded(id) => {
                self.scheduler.on_unit_ended(id);
                self.publish();
            }
            CallEvent::Hangup => self.close(),
        }
    }

    /// Keep the link and open the mic on the blocking pool.
    ///
    /// The call stays `Connecting` until [`CallEvent::CaptureReady`].
    fn on_connected(&mut self, mut link: LiveLink) {
        self.connect_task = None;

        if self.state != SessionState::Connecting || self.link.is_some() {
            log::debug!("call: late connect result ignored");
            link.close();
            return;
        }

        let Some(outbound) = link.audio_sender() else {
            self.fail("Session closed before audio could start".into());
            return;
        };
        self.link = Some(link);
        log::info!("call: session open, acquiring microphone");

        let mic = Arc::clone(&self.mic);
        let settings = self.settings.capture;
        let tx = self.events_tx.clone();
        tokio::task::spawn_blocking(move || {
            let mut pipeline = CapturePipeline::new(settings);
            let result = pipeline.start(mic, outbound).map(|()| pipeline);
            // With the controller gone the pipeline drops here and releases the mic.
            let _ = tx.send(CallEvent::CaptureReady(result));
        });
    }

    fn on_capture_ready(&mut self, result: Result<CapturePipeline, CaptureError>) {
        match result {
            Ok(mut pipeline) if self.state != SessionState::Connecting || self.link.is_none() => {
                log::debug!("call: microphone opened after close, releasing it");
                pipeline.stop();
            }
            Ok(pipeline) => {
                self.capture = Some(pipeline);
                self.state = SessionState::Connected;
                self.publish();
                log::info!("call: connected");
            }
            Err(e) => self.fail(format!("Microphone unavailable: {e}")),
        }
    }

    /// Schedule inbound model audio and honour interruption.
    ///
    /// Audio parts are enqueued before an `interrupted` flag in the same
    /// message is applied.
    pub fn on_inbound_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Content(content) => {
                if self.state != SessionState::Connected {
                    log::debug!("call: inbound content after close ignored");
                    return;
                }
                self.play_content(content);
                self.publish();
            }
            ServerMessage::GoAway => log::info!("call: server announced disconnect"),
            ServerMessage::SetupComplete | ServerMessage::Other => {}
        }
    }

    fn play_content(&mut self, content: ServerContent) {
        for part in content.audio {
            let rate = part.sample_rate_or(self.settings.playback_sample_rate);
            match codec::decode(&part.data, rate, 1) {
                Ok(buffer) => {
                    let now = self.scheduler.output().current_time();
                    let unit = self.scheduler.enqueue(buffer, now);
                    log::debug!(
                        "call: unit {} at {:.3}s for {:.3}s",
                        unit.id,
                        unit.start_time,
                        unit.duration
                    );
                }
                Err(e) => {
                    self.skipped_chunks += 1;
                    log::warn!("call: skipping corrupt audio chunk: {e}");
                }
            }
        }

        if content.interrupted {
            let stopped = self.scheduler.interrupt();
            log::debug!("call: interrupted, {stopped} unit(s) stopped");
        }
    }

    /// End the call.  Valid in every state; a failed call stays `Error`.
    pub fn close(&mut self) {
        let was_terminal = self.state.is_terminal();
        self.teardown();
        if self.state != SessionState::Error {
            self.state = SessionState::Closed;
        }
        if !was_terminal {
            log::info!("call: closed");
        }
        self.publish();
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn fail(&mut self, message: String) {
        if self.state.is_terminal() {
            return;
        }
        log::error!("call error: {message}");
        self.teardown();
        self.state = SessionState::Error;
        lock_status(&self.status).error_message = Some(message);
        self.publish();
    }

    /// Release the mic, the link and any playing audio.
    fn teardown(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.stop();
        }
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.scheduler.interrupt();
    }

    fn publish(&self) {
        let mut st = lock_status(&self.status);
        st.state = self.state;
        st.speaking = self.scheduler.is_speaking();
        st.dropped_frames = self
            .capture
            .as_ref()
            .map_or(0, CapturePipeline::dropped_frames);
        st.skipped_chunks = self.skipped_chunks;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<O> {
        &self.scheduler
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
