//! Trial sequencer
//!
//! Drives one session end-to-end on a single logical thread:
//!
//! ```text
//! AwaitingStimulus -> Presenting -> AwaitingResponse -> Updating -+-> AwaitingStimulus
//!                        ^               |                        |
//!                        +--- replay ----+                        +-> Terminated
//! ```
//!
//! The sequencer resumes the backend, asks the procedure for the next
//! stimulus, synthesizes and schedules it, waits for playback to finish and
//! only then reads input. Answers given during the stimulus are dropped.
//! It is the only writer to the trial log and to estimator state.
//!
//! Every wait is raced against the session's [`CancellationToken`]; on
//! cancellation all registered playback is stopped and the session ends with
//! [`HearingTestError::Cancelled`].

use crate::audio::assets::{fit_to_duration, DigitSource, SyntheticDigits};
use crate::audio::envelope::{build_gapped_envelope, build_simple_envelope};
use crate::audio::player::{PlaybackBackend, PlaybackHandle, StimulusPlayer};
use crate::audio::signal::{make_bandlimited_noise_with, make_tone};
use crate::config::SessionConfig;
use crate::error::{HearingTestError, Result};
use crate::session::input::{InputEvent, Interval, ResponseSource};
use crate::session::procedure::{Disposition, Procedure, Stimulus, StimulusPlan};
use crate::session::result::{ResultSink, SessionRecord};
use crate::session::trial::TrialLog;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Where the current trial stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    AwaitingStimulus,
    Presenting,
    AwaitingResponse,
    Updating,
    Terminated,
}

/// How a trial ended
enum TrialEnd {
    Answered,
    Quit,
}

/// Runs test procedures against a player and a response source
pub struct Sequencer<B: PlaybackBackend, R: ResponseSource> {
    player: StimulusPlayer<B>,
    responses: R,
    config: SessionConfig,
    cancel: CancellationToken,
    rng: StdRng,
    digits: Option<Box<dyn DigitSource>>,
    log: TrialLog,
    phase: TrialPhase,
    /// Clock time after the last completed stimulus
    timeline: f64,
    ignored: u32,
    replays: u32,
}

impl<B: PlaybackBackend, R: ResponseSource> Sequencer<B, R> {
    /// Create a sequencer; the player takes its ear mode from `config`
    pub fn new(backend: B, responses: R, config: SessionConfig) -> Self {
        Self {
            player: StimulusPlayer::new(backend, config.ear_mode),
            responses,
            config,
            cancel: CancellationToken::new(),
            rng: StdRng::from_entropy(),
            digits: None,
            log: TrialLog::new(),
            phase: TrialPhase::AwaitingStimulus,
            timeline: 0.0,
            ignored: 0,
            replays: 0,
        }
    }

    /// Seed the generator behind triplets, interval order and noise
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Use `source` for digit triplets and masking noise
    pub fn with_digits(mut self, source: Box<dyn DigitSource>) -> Self {
        self.digits = Some(source);
        self
    }

    /// Token that cancels the session when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn player(&self) -> &StimulusPlayer<B> {
        &self.player
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    /// Trials answered in the current or last session
    pub fn log(&self) -> &TrialLog {
        &self.log
    }

    /// Run `procedure` to the end and publish its record to `sink`
    ///
    /// A failing sink is logged and does not fail the session.
    ///
    /// # Errors
    /// `PlaybackUnavailable` if the backend cannot be resumed or refuses a
    /// stimulus; the in-flight trial is discarded. `Cancelled` if the token
    /// fires. `InvalidParameter` or `Asset` if a stimulus cannot be built.
    pub async fn run(
        &mut self,
        procedure: &mut dyn Procedure,
        sink: &mut dyn ResultSink,
    ) -> Result<SessionRecord> {
        let started_at = Utc::now();
        self.log = TrialLog::new();
        self.ignored = 0;
        self.replays = 0;
        self.phase = TrialPhase::AwaitingStimulus;
        tracing::info!(
            kind = %procedure.kind(),
            ear = %self.player.ear_mode(),
            "Session started"
        );

        let outcome = self.drive(procedure).await;
        self.phase = TrialPhase::Terminated;
        let completed = match outcome {
            Ok(completed) => completed,
            Err(e) => {
                let stopped = self.player.stop_all();
                tracing::error!(error = %e, stopped, trials = self.log.len(), "Session aborted");
                return Err(e);
            }
        };

        let record = SessionRecord {
            kind: procedure.kind(),
            ear_mode: self.player.ear_mode(),
            trials: self.log.trials().to_vec(),
            estimate: procedure.estimate(),
            interpretation: procedure.interpretation(),
            ignored_inputs: self.ignored,
            replays: self.replays,
            completed,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            kind = %record.kind,
            trials = record.trials.len(),
            estimate = %record.estimate,
            completed,
            "Session finished"
        );

        if let Err(e) = sink.publish(&record) {
            tracing::error!(error = %e, "Failed to publish session record");
        }
        Ok(record)
    }

    /// Trial loop; returns whether the procedure reached its own stopping rule
    async fn drive(&mut self, procedure: &mut dyn Procedure) -> Result<bool> {
        until_cancelled(&self.cancel, self.player.resume()).await?;
        self.timeline = self.timeline.max(self.player.now());

        while !procedure.is_finished() {
            let Some(plan) = procedure.next_stimulus(&mut self.rng) else {
                break;
            };
            match self.trial(procedure, &plan).await? {
                TrialEnd::Quit => return Ok(false),
                TrialEnd::Answered => {}
            }
            if !procedure.is_finished() && self.config.inter_trial_pause_ms > 0 {
                let pause = tokio::time::sleep(self.config.inter_trial_pause());
                until_cancelled(&self.cancel, async {
                    pause.await;
                    Ok::<(), HearingTestError>(())
                })
                .await?;
            }
        }
        Ok(true)
    }

    async fn trial(&mut self, procedure: &mut dyn Procedure, plan: &StimulusPlan) -> Result<TrialEnd> {
        loop {
            self.set_phase(TrialPhase::Presenting);
            let finished_at = self.present(plan).await?;
            self.timeline = self.timeline.max(finished_at);

            self.set_phase(TrialPhase::AwaitingResponse);
            let dropped = self.responses.discard_pending();
            if dropped > 0 {
                self.ignored += dropped as u32;
                tracing::debug!(dropped, "Ignored input received during stimulus");
            }

            match self.await_answer(procedure, plan).await? {
                Some(end) => return Ok(end),
                None => {
                    self.replays += 1;
                    tracing::info!(parameter = plan.parameter, "Replaying stimulus");
                }
            }
        }
    }

    /// Read input until the procedure records an answer; `None` means replay
    async fn await_answer(
        &mut self,
        procedure: &mut dyn Procedure,
        plan: &StimulusPlan,
    ) -> Result<Option<TrialEnd>> {
        loop {
            let cancel = self.cancel.clone();
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HearingTestError::Cancelled),
                event = self.responses.next_event() => event,
            };

            let response = match event {
                Some(InputEvent::Response(response)) => response,
                Some(InputEvent::Replay) => return Ok(None),
                Some(InputEvent::Quit) | None => {
                    tracing::info!(trials = self.log.len(), "Session ended by subject");
                    procedure.stop_early();
                    return Ok(Some(TrialEnd::Quit));
                }
            };

            self.set_phase(TrialPhase::Updating);
            match procedure.respond(plan, &response) {
                Disposition::Recorded(outcome) => {
                    let trial = self.log.record(
                        outcome.parameter,
                        plan.interval_order(),
                        response,
                        outcome.correct,
                    );
                    tracing::debug!(
                        trial = trial.index,
                        value = trial.parameter,
                        correct = trial.correct,
                        "Trial recorded"
                    );
                    self.set_phase(TrialPhase::AwaitingStimulus);
                    return Ok(Some(TrialEnd::Answered));
                }
                Disposition::Ignored(reason) => {
                    self.ignored += 1;
                    tracing::debug!(?reason, ?response, "Response ignored");
                    self.set_phase(TrialPhase::AwaitingResponse);
                }
            }
        }
    }

    /// Synthesize and schedule `plan`, returning when playback has finished
    async fn present(&mut self, plan: &StimulusPlan) -> Result<f64> {
        let start = self.player.now().max(self.timeline);
        let handles = match &plan.stimulus {
            Stimulus::Tone {
                frequency_hz,
                duration_sec,
                gain,
                fade_ms,
            } => {
                let tone = make_tone(*frequency_hz, *duration_sec, self.config.sample_rate, 1.0)?;
                let envelope = build_simple_envelope(*duration_sec, *fade_ms)?;
                let handle = self.player.schedule(
                    &tone,
                    &envelope,
                    start + self.config.lead_in_sec,
                    *gain,
                    None,
                )?;
                vec![handle]
            }
            Stimulus::DigitsInNoise {
                triplet,
                noise_gain,
                lead_sec,
                tail_sec,
                fade_ms,
            } => {
                let digits = self.digit_source();
                let speech = digits.triplet(triplet)?;
                let noise = fit_to_duration(&digits.noise()?, speech.duration() + lead_sec + tail_sec)?;
                let noise_envelope = build_simple_envelope(noise.duration(), *fade_ms)?;
                let speech_envelope = build_simple_envelope(speech.duration(), *fade_ms)?;

                let t0 = start + self.config.lead_in_sec;
                let noise_handle = self.player.schedule(&noise, &noise_envelope, t0, *noise_gain, None)?;
                let speech_handle =
                    match self.player.schedule(&speech, &speech_envelope, t0 + lead_sec, 1.0, None) {
                        Ok(handle) => handle,
                        Err(e) => {
                            self.player.stop(noise_handle.id());
                            return Err(e);
                        }
                    };
                vec![speech_handle, noise_handle]
            }
            Stimulus::TwoInterval {
                gap_ms,
                gap_in,
                interval_sec,
                isi_sec,
                fade_ms,
                gap_position,
                use_fades,
                noise_sample_rate,
                cutoff_hz,
                gain,
                lead_in_sec,
            } => {
                let noise_a =
                    make_bandlimited_noise_with(&mut self.rng, *interval_sec, *noise_sample_rate, *cutoff_hz)?;
                let noise_b =
                    make_bandlimited_noise_with(&mut self.rng, *interval_sec, *noise_sample_rate, *cutoff_hz)?;

                let gap_sec = gap_ms / 1000.0;
                let plain = build_simple_envelope(*interval_sec, *fade_ms)?;
                let gapped = build_gapped_envelope(
                    *interval_sec,
                    interval_sec * gap_position - gap_sec / 2.0,
                    gap_sec,
                    *fade_ms,
                    *use_fades,
                )?;
                let (env_a, env_b) = match gap_in {
                    Interval::First => (&gapped, &plain),
                    Interval::Second => (&plain, &gapped),
                };

                let (a, b) = self.player.schedule_two_intervals(
                    (&noise_a, env_a),
                    (&noise_b, env_b),
                    *isi_sec,
                    start + lead_in_sec,
                    *gain,
                )?;
                tracing::debug!(
                    gap_ms = *gap_ms,
                    gap_in = gap_in.number(),
                    start_a = a.start_time(),
                    start_b = b.start_time(),
                    "Two-interval trial presented"
                );
                vec![a, b]
            }
        };

        self.await_completion(handles).await
    }

    /// Wait for every handle; the latest stop time is when the stimulus ended
    async fn await_completion(&self, handles: Vec<PlaybackHandle>) -> Result<f64> {
        let mut finished_at = self.timeline;
        for handle in handles {
            let stop = until_cancelled(&self.cancel, handle.finished()).await?;
            finished_at = finished_at.max(stop);
        }
        Ok(finished_at)
    }

    fn digit_source(&mut self) -> &mut Box<dyn DigitSource> {
        let config = &self.config;
        self.digits.get_or_insert_with(|| {
            tracing::warn!("No digit recordings configured, using synthetic digits");
            Box::new(SyntheticDigits::new(
                config.sample_rate,
                config.snr.schedule.signal_rms_dbfs,
                config.snr.schedule.noise_rms_dbfs,
                0,
            ))
        })
    }

    fn set_phase(&mut self, phase: TrialPhase) {
        if self.phase != phase {
            tracing::trace!(from = ?self.phase, to = ?phase, "Trial phase");
            self.phase = phase;
        }
    }
}

async fn until_cancelled<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HearingTestError::Cancelled),
        result = fut => result,
    }
}
