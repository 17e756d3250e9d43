//! Stimulus player
//!
//! Schedules mono buffers with their gain envelopes against the backend's
//! monotonic playback clock. Every scheduled source is routed through the
//! two-channel ear stage and recorded in a shared [`HandleRegistry`] until it
//! completes or is stopped.
//!
//! ## Timing
//!
//! All start and stop times are absolute clock values computed before anything
//! is handed to the backend. Two-interval trials place interval B at
//! `stop(A) + isi` directly instead of waiting for A to end, so backend
//! callback jitter never accumulates into the interval spacing.

use crate::audio::envelope::Envelope;
use crate::audio::routing::EarMode;
use crate::audio::signal::Buffer;
use crate::error::{HearingTestError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Identifier of one scheduled source
pub type SourceId = u64;

/// A fully prepared source handed to the backend
///
/// Samples are mono, already shaped by the envelope and gain, and already at
/// the backend's sample rate.
#[derive(Debug, Clone)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// Absolute clock time of the first sample
    pub start_time: f64,
    /// `[left, right]` gains resolved from the ear mode at schedule time
    pub channel_gains: [f32; 2],
}

impl ScheduledSource {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Nominal clock time just after the last sample
    pub fn stop_time(&self) -> f64 {
        self.start_time + self.duration()
    }
}

/// Playback context the player schedules into
///
/// A backend starts suspended and must be resumed before sources are
/// accepted. `schedule` returns a receiver that yields the actual stop time
/// once the source has finished; dropping the sender (for instance on
/// [`PlaybackBackend::stop`]) signals cancellation.
#[async_trait(?Send)]
pub trait PlaybackBackend {
    /// Obtain or resume the playback context
    async fn resume(&self) -> Result<()>;

    /// Whether the context is running and accepts sources
    fn is_running(&self) -> bool;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Current playback clock in seconds
    fn current_time(&self) -> f64;

    /// Queue a prepared source
    ///
    /// # Errors
    /// `PlaybackUnavailable` if the backend refuses the source. Nothing of the
    /// source is played in that case.
    fn schedule(&self, source: ScheduledSource) -> Result<oneshot::Receiver<f64>>;

    /// Stop and discard a source; unknown ids are ignored
    fn stop(&self, id: SourceId);
}

/// Shared set of in-flight sources
///
/// Every source is registered before it reaches the backend and deregistered
/// on natural completion or explicit stop.
#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    active: Arc<Mutex<HashSet<SourceId>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<SourceId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, id: SourceId) {
        self.lock().insert(id);
    }

    /// Remove an id, returning whether it was still registered
    pub fn deregister(&self, id: SourceId) -> bool {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return every registered id
    pub fn drain(&self) -> Vec<SourceId> {
        let mut ids: Vec<SourceId> = self.lock().drain().collect();
        ids.sort_unstable();
        ids
    }
}

/// Handle to one scheduled source
#[derive(Debug)]
pub struct PlaybackHandle {
    id: SourceId,
    start_time: f64,
    stop_time: f64,
    completion: oneshot::Receiver<f64>,
    registry: HandleRegistry,
}

impl PlaybackHandle {
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Absolute start time on the playback clock
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Nominal stop time on the playback clock
    pub fn stop_time(&self) -> f64 {
        self.stop_time
    }

    /// Wait for the source to finish
    ///
    /// Resolves once, at or after the nominal stop time, with the stop time
    /// reported by the backend. The source is deregistered either way.
    ///
    /// # Errors
    /// `Cancelled` if the source was stopped before it finished.
    pub async fn finished(self) -> Result<f64> {
        let outcome = self.completion.await;
        self.registry.deregister(self.id);
        match outcome {
            Ok(actual) => Ok(actual.max(self.stop_time)),
            Err(_) => Err(HearingTestError::Cancelled),
        }
    }
}

/// Schedules stimuli on a [`PlaybackBackend`]
pub struct StimulusPlayer<B: PlaybackBackend> {
    backend: B,
    ear_mode: EarMode,
    registry: HandleRegistry,
    next_id: AtomicU64,
}

impl<B: PlaybackBackend> StimulusPlayer<B> {
    /// Create a player with its own handle registry
    pub fn new(backend: B, ear_mode: EarMode) -> Self {
        Self::with_registry(backend, ear_mode, HandleRegistry::new())
    }

    /// Create a player that records handles in an existing registry
    pub fn with_registry(backend: B, ear_mode: EarMode, registry: HandleRegistry) -> Self {
        Self {
            backend,
            ear_mode,
            registry,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn ear_mode(&self) -> EarMode {
        self.ear_mode
    }

    /// Switch the ear mode for sources scheduled from now on
    pub fn set_ear_mode(&mut self, mode: EarMode) {
        tracing::debug!(from = %self.ear_mode, to = %mode, "Ear mode changed");
        self.ear_mode = mode;
    }

    /// Current playback clock
    pub fn now(&self) -> f64 {
        self.backend.current_time()
    }

    /// Resume the backend; must complete before the first `schedule`
    pub async fn resume(&self) -> Result<()> {
        self.backend.resume().await
    }

    /// Schedule one buffer shaped by `envelope`
    ///
    /// # Arguments
    /// * `buffer` - Mono source samples
    /// * `envelope` - Gain envelope, relative to the buffer start
    /// * `start_time` - Absolute clock time; times in the past start immediately
    /// * `gain` - Linear gain applied on top of the envelope
    /// * `routing` - Ear mode override; `None` uses the player's mode
    ///
    /// # Errors
    /// `InvalidParameter` for a non-finite start or a negative gain;
    /// `PlaybackUnavailable` if the backend is suspended or refuses the source.
    pub fn schedule(
        &self,
        buffer: &Buffer,
        envelope: &Envelope,
        start_time: f64,
        gain: f32,
        routing: Option<EarMode>,
    ) -> Result<PlaybackHandle> {
        self.ensure_running()?;
        let samples = self.prepare(buffer, envelope, gain)?;
        let start = self.clamp_start(start_time)?;
        self.submit(samples, start, routing.unwrap_or(self.ear_mode))
    }

    /// Schedule two intervals with B starting `isi_sec` after A's nominal stop
    ///
    /// If B cannot be scheduled, A is stopped before the error is returned.
    pub fn schedule_two_intervals(
        &self,
        interval_a: (&Buffer, &Envelope),
        interval_b: (&Buffer, &Envelope),
        isi_sec: f64,
        start_time: f64,
        gain: f32,
    ) -> Result<(PlaybackHandle, PlaybackHandle)> {
        if !(isi_sec.is_finite() && isi_sec >= 0.0) {
            return Err(HearingTestError::invalid(format!(
                "inter-stimulus interval must be non-negative, got {isi_sec}"
            )));
        }
        self.ensure_running()?;

        let samples_a = self.prepare(interval_a.0, interval_a.1, gain)?;
        let samples_b = self.prepare(interval_b.0, interval_b.1, gain)?;

        let start_a = self.clamp_start(start_time)?;
        let stop_a = start_a + samples_a.len() as f64 / self.backend.sample_rate() as f64;
        let start_b = stop_a + isi_sec;

        let handle_a = self.submit(samples_a, start_a, self.ear_mode)?;
        match self.submit(samples_b, start_b, self.ear_mode) {
            Ok(handle_b) => {
                tracing::debug!(
                    start_a,
                    stop_a,
                    start_b,
                    isi = isi_sec,
                    "Two-interval trial scheduled"
                );
                Ok((handle_a, handle_b))
            }
            Err(e) => {
                self.stop(handle_a.id());
                Err(e)
            }
        }
    }

    /// Stop one source
    pub fn stop(&self, id: SourceId) {
        self.backend.stop(id);
        self.registry.deregister(id);
    }

    /// Stop every registered source, returning how many were stopped
    pub fn stop_all(&self) -> usize {
        let ids = self.registry.drain();
        for &id in &ids {
            self.backend.stop(id);
        }
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Stopped in-flight playback");
        }
        ids.len()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.backend.is_running() {
            Ok(())
        } else {
            Err(HearingTestError::PlaybackUnavailable(
                "backend is suspended; resume it before scheduling".to_string(),
            ))
        }
    }

    fn clamp_start(&self, start_time: f64) -> Result<f64> {
        if !start_time.is_finite() {
            return Err(HearingTestError::invalid(format!(
                "start time must be finite, got {start_time}"
            )));
        }
        let now = self.backend.current_time();
        if start_time < now {
            tracing::warn!(requested = start_time, now, "Start time already passed, starting now");
            Ok(now)
        } else {
            Ok(start_time)
        }
    }

    /// Apply envelope and gain, then convert to the backend rate
    fn prepare(&self, buffer: &Buffer, envelope: &Envelope, gain: f32) -> Result<Arc<[f32]>> {
        if !(gain.is_finite() && gain >= 0.0) {
            return Err(HearingTestError::invalid(format!(
                "gain must be non-negative, got {gain}"
            )));
        }
        if buffer.is_empty() {
            return Err(HearingTestError::invalid("cannot schedule an empty buffer"));
        }

        let mut shaped = buffer.clone();
        let source_rate = shaped.sample_rate();
        envelope.apply(shaped.samples_mut(), source_rate);
        shaped.scale(gain);

        let target_rate = self.backend.sample_rate();
        let shaped = if shaped.sample_rate() == target_rate {
            shaped
        } else {
            shaped.resampled(target_rate)
        };
        Ok(Arc::from(shaped.into_samples()))
    }

    fn submit(&self, samples: Arc<[f32]>, start_time: f64, mode: EarMode) -> Result<PlaybackHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let source = ScheduledSource {
            id,
            samples,
            sample_rate: self.backend.sample_rate(),
            start_time,
            channel_gains: mode.channel_gains(),
        };
        let stop_time = source.stop_time();

        self.registry.register(id);
        let completion = match self.backend.schedule(source) {
            Ok(rx) => rx,
            Err(e) => {
                self.registry.deregister(id);
                tracing::error!(id, error = %e, "Backend refused source");
                return Err(e);
            }
        };

        tracing::trace!(id, start_time, stop_time, ear = %mode, "Source scheduled");

        Ok(PlaybackHandle {
            id,
            start_time,
            stop_time,
            completion,
            registry: self.registry.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::envelope::build_simple_envelope;
    use crate::audio::offline::OfflineBackend;
    use crate::audio::signal::make_tone;
    use approx::assert_relative_eq;

    fn tone(dur: f64) -> (Buffer, Envelope) {
        let buffer = make_tone(1000.0, dur, 48000, 0.5).unwrap();
        let envelope = build_simple_envelope(dur, 5.0).unwrap();
        (buffer, envelope)
    }

    async fn resumed_player(mode: EarMode) -> StimulusPlayer<OfflineBackend> {
        let player = StimulusPlayer::new(OfflineBackend::new(48000), mode);
        player.resume().await.unwrap();
        player
    }

    #[tokio::test]
    async fn test_schedule_requires_resume() {
        let player = StimulusPlayer::new(OfflineBackend::new(48000), EarMode::Both);
        let (buffer, envelope) = tone(0.1);
        let err = player.schedule(&buffer, &envelope, 0.0, 1.0, None).unwrap_err();
        assert!(matches!(err, HearingTestError::PlaybackUnavailable(_)));
        assert!(player.registry().is_empty());
    }

    #[tokio::test]
    async fn test_handle_reports_nominal_times() {
        let player = resumed_player(EarMode::Both).await;
        let (buffer, envelope) = tone(0.25);
        let handle = player.schedule(&buffer, &envelope, 1.0, 1.0, None).unwrap();
        assert_relative_eq!(handle.start_time(), 1.0);
        assert_relative_eq!(handle.stop_time(), 1.25, epsilon = 1e-9);
        assert!(player.registry().contains(handle.id()));

        let stop = handle.finished().await.unwrap();
        assert!(stop >= 1.25 - 1e-9);
        assert!(player.registry().is_empty());
    }

    #[tokio::test]
    async fn test_two_intervals_spacing() {
        let player = resumed_player(EarMode::Both).await;
        let (buffer, envelope) = tone(0.5);
        let (a, b) = player
            .schedule_two_intervals((&buffer, &envelope), (&buffer, &envelope), 0.5, 0.2, 0.1)
            .unwrap();
        assert_relative_eq!(a.start_time(), 0.2);
        assert_relative_eq!(b.start_time(), a.stop_time() + 0.5, epsilon = 1e-9);
        assert_eq!(player.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_second_interval_failure_stops_first() {
        let backend = OfflineBackend::new(48000).refuse_after(1);
        let player = StimulusPlayer::new(backend, EarMode::Both);
        player.resume().await.unwrap();
        let (buffer, envelope) = tone(0.1);

        let err = player
            .schedule_two_intervals((&buffer, &envelope), (&buffer, &envelope), 0.5, 0.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, HearingTestError::PlaybackUnavailable(_)));
        assert!(player.registry().is_empty());
        let records = player.backend().records();
        assert_eq!(records.len(), 1);
        assert!(records[0].stopped_at.is_some());
    }

    #[tokio::test]
    async fn test_past_start_clamped_to_now() {
        let player = resumed_player(EarMode::Both).await;
        player.backend().advance_to(2.0);
        let (buffer, envelope) = tone(0.1);
        let handle = player.schedule(&buffer, &envelope, 1.0, 1.0, None).unwrap();
        assert_relative_eq!(handle.start_time(), 2.0);
    }

    #[tokio::test]
    async fn test_ear_mode_resolved_at_schedule_time() {
        let mut player = resumed_player(EarMode::Left).await;
        let (buffer, envelope) = tone(0.1);
        player.schedule(&buffer, &envelope, 0.0, 1.0, None).unwrap();
        player.set_ear_mode(EarMode::Right);
        player.schedule(&buffer, &envelope, 0.5, 1.0, None).unwrap();

        let records = player.backend().records();
        assert_eq!(records[0].channel_gains, [1.0, 0.0]);
        assert_eq!(records[1].channel_gains, [0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_stop_all_cancels_pending_handles() {
        let backend = OfflineBackend::new(48000).hold_completions();
        let player = StimulusPlayer::new(backend, EarMode::Both);
        player.resume().await.unwrap();
        let (buffer, envelope) = tone(0.1);
        let handle = player.schedule(&buffer, &envelope, 0.0, 1.0, None).unwrap();

        assert_eq!(player.stop_all(), 1);
        assert!(player.registry().is_empty());
        assert_eq!(handle.finished().await, Err(HearingTestError::Cancelled));
    }

    #[tokio::test]
    async fn test_rejects_negative_gain() {
        let player = resumed_player(EarMode::Both).await;
        let (buffer, envelope) = tone(0.1);
        let err = player.schedule(&buffer, &envelope, 0.0, -1.0, None).unwrap_err();
        assert!(matches!(err, HearingTestError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_resamples_to_backend_rate() {
        let player = resumed_player(EarMode::Both).await;
        let buffer = make_tone(500.0, 0.5, 50000, 0.5).unwrap();
        let envelope = build_simple_envelope(0.5, 1.0).unwrap();
        let handle = player.schedule(&buffer, &envelope, 0.0, 1.0, None).unwrap();
        assert_relative_eq!(handle.stop_time(), 0.5, epsilon = 1e-3);
        assert_eq!(player.backend().records()[0].sample_rate, 48000);
    }

    #[tokio::test]
    async fn test_envelope_applied_before_resampling() {
        let player = resumed_player(EarMode::Both).await;
        let buffer = make_tone(500.0, 0.5, 50000, 0.5).unwrap();
        let envelope =
            crate::audio::envelope::build_gapped_envelope(0.5, 0.2, 0.1, 5.0, true).unwrap();
        player.schedule(&buffer, &envelope, 0.0, 1.0, None).unwrap();

        let record = &player.backend().records()[0];
        assert_eq!(record.sample_rate, 48000);
        // 0.2 s to 0.3 s at 48 kHz, inside the fades
        let gap = &record.samples[9840..14160];
        assert!(gap.iter().all(|s| s.abs() < 1e-3));
        let sounding = &record.samples[2400..7200];
        assert!(sounding.iter().any(|s| s.abs() > 0.4));
    }
}
