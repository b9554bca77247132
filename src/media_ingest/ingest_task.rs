//! The media ingest task: one run turns a stream address into decoded frames.
//!
//! A run walks `Connecting -> Negotiating -> AwaitingKeyFrame -> Streaming -> Stopped`.
//! Stopping is cooperative: the owner raises the stop request on [`IngestControl`] and the run
//! notices it at its next check, at most one poll interval later unless it is inside a decode
//! call. The `stopped` flag is raised exactly once per run, by a guard dropped on the way out,
//! including when the run panics.

use super::decoder::{DecoderFactory, FrameDecoder};
use super::frame_slot::FrameSlot;
use super::transport::{MediaConnection, MediaTransport};
use super::types::{AccessUnit, CodecFamily, CodecParameters, DecodedFrame, IngestState};
use crate::device_control::redact_uri;
use crate::error_handling::types::{DecodeError, IngestError};
use image::RgbImage;
use log::{debug, error, info, trace, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Stop request / stop confirmation pair shared by a session and its ingest runs.
///
/// Both flags only ever go from `false` to `true`, except through [`IngestControl::reset`],
/// which the owner calls once it has observed `stopped` and before starting the next run.
#[derive(Debug, Default)]
pub struct IngestControl {
    stop_requested: AtomicBool,
    stopped: AtomicBool,
    stop_notify: Notify,
    stopped_notify: Notify,
}

impl IngestControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Clears both flags. Only valid once the previous run is known to have stopped.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stopped_notify.notify_waiters();
    }

    /// Resolves once the current run has stopped, checking at least every `poll`.
    pub async fn wait_stopped(&self, poll: Duration) {
        loop {
            let notified = self.stopped_notify.notified();
            if self.is_stopped() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = sleep(poll) => {}
            }
        }
    }

    /// Resolves once a stop has been requested, checking at least every `poll`.
    pub async fn wait_stop_requested(&self, poll: Duration) {
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let notified = self.stop_notify.notified();
            if self.is_stop_requested() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = ticker.tick() => {}
            }
        }
    }
}

/// Transport and decoder implementations used by every ingest run.
#[derive(Clone)]
pub struct MediaBackend {
    pub transport: Arc<dyn MediaTransport>,
    pub decoders: Arc<dyn DecoderFactory>,
}

impl MediaBackend {
    pub fn new(transport: Arc<dyn MediaTransport>, decoders: Arc<dyn DecoderFactory>) -> Self {
        Self {
            transport,
            decoders,
        }
    }
}

/// Everything one ingest run needs.
///
/// # Fields Overview
///
/// - `tag`: log prefix, the owning session's identifier
/// - `generation`: sequence number of the run within its session, stamped on every frame
/// - `uri`: stream address, credentials included
/// - `backend`: transport and decoder factory
/// - `frame_slot`: where decoded frames are published
/// - `control`: stop request and stop confirmation
/// - `state`: observable progress of the run
/// - `stop_poll`: period of the stop check
pub struct IngestRun {
    pub tag: String,
    pub generation: u64,
    pub uri: String,
    pub backend: MediaBackend,
    pub frame_slot: Arc<FrameSlot>,
    pub control: Arc<IngestControl>,
    pub state: Arc<watch::Sender<IngestState>>,
    pub stop_poll: Duration,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A stop was requested and honoured.
    Stopped,
    Failed(IngestError),
}

/// Raises `stopped` when the run is over, whichever way it ends.
struct StoppedGuard {
    control: Arc<IngestControl>,
    state: Arc<watch::Sender<IngestState>>,
}

impl Drop for StoppedGuard {
    fn drop(&mut self) {
        self.state.send_replace(IngestState::Stopped);
        self.control.mark_stopped();
    }
}

impl IngestRun {
    pub fn spawn(self) -> JoinHandle<IngestOutcome> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> IngestOutcome {
        let _guard = StoppedGuard {
            control: self.control.clone(),
            state: self.state.clone(),
        };
        let tag = format!("{}#{}", self.tag, self.generation);
        info!("[{}] Ingest starting on {}", tag, redact_uri(&self.uri));

        let outcome = match self.stream(&tag).await {
            Ok(()) => {
                info!("[{}] Ingest stopped on request", tag);
                IngestOutcome::Stopped
            }
            Err(e) => {
                error!("[{}] Ingest run ended: {}", tag, e);
                IngestOutcome::Failed(e)
            }
        };
        // connection and decoder are released before the guard confirms the stop
        outcome
    }

    fn enter(&self, tag: &str, state: IngestState) {
        debug!("[{}] -> {}", tag, state);
        self.state.send_replace(state);
    }

    /// Awaits `fut` unless a stop is requested first, in which case `None` is returned and
    /// `fut` is dropped.
    async fn unless_stopped<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.control.is_stop_requested() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.control.wait_stop_requested(self.stop_poll) => None,
            output = fut => Some(output),
        }
    }

    /// Runs the state machine. `Ok(())` means a requested stop.
    async fn stream(&self, tag: &str) -> Result<(), IngestError> {
        self.enter(tag, IngestState::Connecting);
        let connecting = self.backend.transport.connect(&self.uri);
        let mut connection = match self.unless_stopped(connecting).await {
            None => return Ok(()),
            Some(connection) => connection?,
        };

        self.enter(tag, IngestState::Negotiating);
        let codec = negotiate(connection.offered_codecs())?;
        info!("[{}] Negotiated {} on track {}", tag, codec.family, codec.track);
        let mut decoder = self.backend.decoders.create(&codec)?;
        match self.unless_stopped(connection.start(&codec)).await {
            None => return Ok(()),
            Some(started) => started?,
        }

        self.enter(tag, IngestState::AwaitingKeyFrame);
        let mut dropped = 0u64;
        let first = loop {
            let unit = self.next_unit(&mut connection).await?;
            match unit {
                None => return Ok(()),
                Some(unit) if unit.family == codec.family && unit.contains_key_frame() => break unit,
                Some(_) => dropped += 1,
            }
        };
        debug!("[{}] Key frame found after {} dropped unit(s)", tag, dropped);

        self.enter(tag, IngestState::Streaming);
        let mut unit = first;
        let mut decoded = 0u64;
        loop {
            let (returned, result) = decode_blocking(decoder, unit).await?;
            decoder = returned;
            if self.control.is_stop_requested() {
                return Ok(());
            }
            match result {
                Ok(Some(image)) => {
                    decoded += 1;
                    trace!(
                        "[{}] Frame {} decoded ({}x{})",
                        tag,
                        decoded,
                        image.width(),
                        image.height()
                    );
                    self.frame_slot.publish(DecodedFrame::new(image, self.generation));
                }
                Ok(None) => {}
                Err(DecodeError::InvalidData(e)) => debug!("[{}] Dropped unit: {}", tag, e),
                Err(DecodeError::DecoderGone(e)) => return Err(IngestError::DecoderFailure(e)),
            }

            unit = match self.next_unit(&mut connection).await? {
                Some(unit) => unit,
                None => return Ok(()),
            };
        }
    }

    /// Next inbound unit; `Ok(None)` when a stop was requested while waiting.
    async fn next_unit(
        &self,
        connection: &mut Box<dyn MediaConnection>,
    ) -> Result<Option<AccessUnit>, IngestError> {
        match self.unless_stopped(connection.next_access_unit()).await {
            None => Ok(None),
            Some(Ok(Some(unit))) => Ok(Some(unit)),
            Some(Ok(None)) => Err(IngestError::StreamEnded),
            Some(Err(e)) => Err(e),
        }
    }
}

/// Picks the first supported family, in preference order, among the offered codecs.
pub fn negotiate(offered: Vec<CodecParameters>) -> Result<CodecParameters, IngestError> {
    for family in CodecFamily::PREFERENCE {
        if let Some(codec) = offered.iter().find(|c| c.family == family) {
            return Ok(codec.clone());
        }
    }
    Err(IngestError::CodecNegotiationFailed(String::from(
        "stream offers neither H.264 nor H.265",
    )))
}

type DecodeResult = (Box<dyn FrameDecoder>, Result<Option<RgbImage>, DecodeError>);

/// Decodes on the blocking pool; a panicking decoder ends the run instead of the process.
async fn decode_blocking(
    mut decoder: Box<dyn FrameDecoder>,
    unit: AccessUnit,
) -> Result<DecodeResult, IngestError> {
    tokio::task::spawn_blocking(move || {
        let result = decoder.decode(&unit);
        (decoder, result)
    })
    .await
    .map_err(|e| {
        warn!("Decoder task aborted: {}", e);
        IngestError::DecoderFailure(format!("decoder panicked: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{key_unit, plain_unit, MockDecoderFactory, ScriptedTransport, StreamScript};

    fn run_for(
        uri: &str,
        transport: Arc<ScriptedTransport>,
        decoders: Arc<MockDecoderFactory>,
    ) -> (IngestRun, Arc<FrameSlot>, Arc<IngestControl>, watch::Receiver<IngestState>) {
        let slot = Arc::new(FrameSlot::new());
        let control = Arc::new(IngestControl::new());
        let (state_tx, state_rx) = watch::channel(IngestState::Stopped);
        let run = IngestRun {
            tag: String::from("test"),
            generation: 1,
            uri: uri.to_string(),
            backend: MediaBackend::new(transport, decoders),
            frame_slot: slot.clone(),
            control: control.clone(),
            state: Arc::new(state_tx),
            stop_poll: Duration::from_millis(10),
        };
        (run, slot, control, state_rx)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn negotiation_prefers_h264_then_h265() {
        let h265 = CodecParameters::new(CodecFamily::H265, 0);
        let h264 = CodecParameters::new(CodecFamily::H264, 1);
        assert_eq!(negotiate(vec![h265.clone(), h264.clone()]).unwrap(), h264);
        assert_eq!(negotiate(vec![h265.clone()]).unwrap(), h265);
        assert!(matches!(
            negotiate(Vec::new()),
            Err(IngestError::CodecNegotiationFailed(_))
        ));
    }

    #[tokio::test]
    async fn waiters_wake_on_their_flag() {
        let control = IngestControl::new();

        let mut requested = tokio_test::task::spawn(control.wait_stop_requested(Duration::from_secs(60)));
        tokio_test::assert_pending!(requested.poll());
        control.request_stop();
        assert!(requested.is_woken());
        tokio_test::assert_ready!(requested.poll());

        let mut stopped = tokio_test::task::spawn(control.wait_stopped(Duration::from_secs(60)));
        tokio_test::assert_pending!(stopped.poll());
        control.mark_stopped();
        assert!(stopped.is_woken());
        tokio_test::assert_ready!(stopped.poll());
        drop(stopped);

        control.reset();
        assert!(!control.is_stop_requested());
        assert!(!control.is_stopped());
    }

    #[tokio::test]
    async fn frames_published_after_key_frame_only() {
        let _ = env_logger::builder().is_test(true).try_init();
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(
            "rtsp://cam/a",
            StreamScript::endless(vec![plain_unit(10, 10)], key_unit(32, 24), plain_unit(32, 24)),
        );
        let decoders = Arc::new(MockDecoderFactory::new());
        let (run, slot, control, state) = run_for("rtsp://cam/a", transport.clone(), decoders.clone());
        let handle = run.spawn();

        wait_for(|| slot.latest().is_some()).await;
        let frame = slot.latest().unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 24));
        assert_eq!(frame.generation, 1);
        assert_eq!(*state.borrow(), IngestState::Streaming);
        // the leading non-key unit never reached the decoder
        assert!(decoders.decoded_sizes().iter().all(|&size| size == (32, 24)));

        control.request_stop();
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(outcome, IngestOutcome::Stopped);
        assert!(control.is_stopped());
        assert_eq!(*state.borrow(), IngestState::Stopped);
        assert_eq!(transport.open_connections(), 0);
    }

    #[tokio::test]
    async fn stop_is_honoured_on_a_stalled_stream() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script("rtsp://cam/stall", StreamScript::stalled());
        let (run, slot, control, _state) =
            run_for("rtsp://cam/stall", transport.clone(), Arc::new(MockDecoderFactory::new()));
        let handle = run.spawn();

        wait_for(|| transport.open_connections() == 1).await;
        control.request_stop();
        let outcome = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(outcome, IngestOutcome::Stopped);
        assert!(control.is_stopped());
        assert!(slot.is_empty());
    }

    #[tokio::test]
    async fn connection_failure_ends_the_run_only() {
        let transport = Arc::new(ScriptedTransport::new());
        let (run, slot, control, state) =
            run_for("rtsp://cam/unknown", transport, Arc::new(MockDecoderFactory::new()));
        let outcome = run.run().await;
        assert!(matches!(outcome, IngestOutcome::Failed(IngestError::TransportFailure(_))));
        assert!(control.is_stopped());
        assert!(!control.is_stop_requested());
        assert!(slot.is_empty());
        assert_eq!(*state.borrow(), IngestState::Stopped);
    }

    #[tokio::test]
    async fn unsupported_codec_fails_negotiation() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script("rtsp://cam/mjpeg", StreamScript::without_codecs());
        let (run, _slot, control, _state) =
            run_for("rtsp://cam/mjpeg", transport.clone(), Arc::new(MockDecoderFactory::new()));
        let outcome = run.run().await;
        assert!(matches!(
            outcome,
            IngestOutcome::Failed(IngestError::CodecNegotiationFailed(_))
        ));
        assert!(control.is_stopped());
        assert_eq!(transport.open_connections(), 0);
    }

    #[tokio::test]
    async fn end_of_stream_is_a_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(
            "rtsp://cam/short",
            StreamScript::finite(vec![key_unit(8, 8), plain_unit(8, 8)]),
        );
        let (run, slot, _control, _state) =
            run_for("rtsp://cam/short", transport, Arc::new(MockDecoderFactory::new()));
        let outcome = run.run().await;
        assert_eq!(outcome, IngestOutcome::Failed(IngestError::StreamEnded));
        assert_eq!(slot.latest().map(|f| f.width()), Some(8));
    }

    #[tokio::test]
    async fn invalid_units_are_dropped_and_panics_are_contained() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(
            "rtsp://cam/bad",
            StreamScript::finite(vec![key_unit(8, 8), MockDecoderFactory::garbage_unit(), plain_unit(16, 8)]),
        );
        let (run, slot, _control, _state) =
            run_for("rtsp://cam/bad", transport.clone(), Arc::new(MockDecoderFactory::new()));
        assert_eq!(run.run().await, IngestOutcome::Failed(IngestError::StreamEnded));
        assert_eq!(slot.latest().map(|f| f.width()), Some(16));

        transport.script(
            "rtsp://cam/panic",
            StreamScript::finite(vec![key_unit(8, 8), MockDecoderFactory::panic_unit()]),
        );
        let (run, _slot, control, _state) =
            run_for("rtsp://cam/panic", transport, Arc::new(MockDecoderFactory::new()));
        let outcome = run.run().await;
        assert!(matches!(outcome, IngestOutcome::Failed(IngestError::DecoderFailure(_))));
        assert!(control.is_stopped());
    }

    #[tokio::test]
    async fn wait_stopped_returns_once_flag_is_raised() {
        let control = Arc::new(IngestControl::new());
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_stopped(Duration::from_millis(50)).await })
        };
        sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        control.mark_stopped();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();

        control.reset();
        assert!(!control.is_stopped());
        assert!(!control.is_stop_requested());
    }
}
