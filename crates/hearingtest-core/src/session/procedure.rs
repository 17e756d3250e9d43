//! Test procedures
//!
//! A [`Procedure`] couples one estimator with the stimulus it needs. It plans
//! the next stimulus as plain data and interprets the subject's answer; the
//! sequencer does the synthesis, the scheduling and the bookkeeping.

use crate::audio::assets::is_triplet;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::estimator::gap::GapStaircase;
use crate::estimator::interpret::{
    db_hl_band, frequency_ceiling_advice, gap_threshold_advice, speech_in_noise_category,
    Interpretation,
};
use crate::estimator::level::LevelStaircase;
use crate::estimator::snr::SnrRun;
use crate::estimator::sweep::FrequencySweep;
use crate::estimator::ThresholdEstimate;
use crate::session::input::{Interval, Response, SweepControl};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four self-tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Level,
    SpeechInNoise,
    FrequencySweep,
    GapDetection,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestKind::Level => "dbhl",
            TestKind::SpeechInNoise => "din",
            TestKind::FrequencySweep => "freq",
            TestKind::GapDetection => "gap",
        };
        f.write_str(name)
    }
}

impl FromStr for TestKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dbhl" | "level" => Ok(TestKind::Level),
            "din" | "snr" => Ok(TestKind::SpeechInNoise),
            "freq" | "sweep" => Ok(TestKind::FrequencySweep),
            "gap" => Ok(TestKind::GapDetection),
            other => Err(format!("unknown test: {other} (expected dbhl, din, freq or gap)")),
        }
    }
}

/// What to play for one trial
#[derive(Debug, Clone, PartialEq)]
pub enum Stimulus {
    /// Single sine tone
    Tone {
        frequency_hz: f64,
        duration_sec: f64,
        gain: f32,
        fade_ms: f64,
    },
    /// Spoken triplet over masking noise
    DigitsInNoise {
        triplet: String,
        noise_gain: f32,
        lead_sec: f64,
        tail_sec: f64,
        fade_ms: f64,
    },
    /// Two noise bursts, one carrying a silent gap
    TwoInterval {
        gap_ms: f64,
        gap_in: Interval,
        interval_sec: f64,
        isi_sec: f64,
        fade_ms: f64,
        gap_position: f64,
        use_fades: bool,
        noise_sample_rate: u32,
        cutoff_hz: f64,
        gain: f32,
        lead_in_sec: f64,
    },
}

/// A planned trial: the stimulus and the estimator parameter it presents
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusPlan {
    pub parameter: f64,
    pub stimulus: Stimulus,
}

impl StimulusPlan {
    /// Interval carrying the signal, for two-interval trials
    pub fn interval_order(&self) -> Option<Interval> {
        match self.stimulus {
            Stimulus::TwoInterval { gap_in, .. } => Some(gap_in),
            _ => None,
        }
    }
}

/// Why a response did not count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Arrived while no response was expected
    OutOfPhase,
    /// Not the kind of answer this test takes
    WrongKind,
    /// Right kind, unusable content
    Malformed,
}

/// A response the procedure accepted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialOutcome {
    pub parameter: f64,
    pub correct: bool,
}

/// What happened to a response
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Disposition {
    Ignored(IgnoreReason),
    Recorded(TrialOutcome),
}

/// One test, driven trial by trial by the sequencer
pub trait Procedure {
    fn kind(&self) -> TestKind;

    /// Plan the next trial; `None` once the run is over
    fn next_stimulus(&mut self, rng: &mut dyn RngCore) -> Option<StimulusPlan>;

    /// Feed the answer to the trial planned as `plan`
    ///
    /// Only responses that return `Recorded` touch estimator state.
    fn respond(&mut self, plan: &StimulusPlan, response: &Response) -> Disposition;

    fn is_finished(&self) -> bool;

    /// End the run before its own stopping rule fires
    fn stop_early(&mut self);

    fn estimate(&self) -> ThresholdEstimate;

    fn interpretation(&self) -> Option<Interpretation>;
}

/// Build the procedure for `kind` from the session configuration
pub fn procedure_for(kind: TestKind, config: &SessionConfig) -> Result<Box<dyn Procedure>> {
    let procedure: Box<dyn Procedure> = match kind {
        TestKind::Level => Box::new(LevelProcedure::new(config)?),
        TestKind::SpeechInNoise => Box::new(SnrProcedure::new(config)?),
        TestKind::FrequencySweep => Box::new(SweepProcedure::new(config)?),
        TestKind::GapDetection => Box::new(GapProcedure::new(config)?),
    };
    Ok(procedure)
}

/// dB HL search with a yes/no tone
pub struct LevelProcedure {
    staircase: LevelStaircase,
    frequency_hz: f64,
    duration_sec: f64,
    fade_ms: f64,
    stopped: bool,
}

impl LevelProcedure {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let level = &config.level;
        Ok(Self {
            staircase: LevelStaircase::new(
                level.start_spl,
                level.step_db,
                config.calibration_or_default(),
            )?,
            frequency_hz: level.frequency_hz,
            duration_sec: level.tone_duration_sec,
            fade_ms: level.fade_ms,
            stopped: false,
        })
    }

    pub fn staircase(&self) -> &LevelStaircase {
        &self.staircase
    }
}

impl Procedure for LevelProcedure {
    fn kind(&self) -> TestKind {
        TestKind::Level
    }

    fn next_stimulus(&mut self, _rng: &mut dyn RngCore) -> Option<StimulusPlan> {
        if self.is_finished() {
            return None;
        }
        Some(StimulusPlan {
            parameter: self.staircase.current_spl(),
            stimulus: Stimulus::Tone {
                frequency_hz: self.frequency_hz,
                duration_sec: self.duration_sec,
                gain: self.staircase.current_amplitude() as f32,
                fade_ms: self.fade_ms,
            },
        })
    }

    fn respond(&mut self, plan: &StimulusPlan, response: &Response) -> Disposition {
        match response {
            Response::Heard(heard) => {
                self.staircase.respond(*heard);
                Disposition::Recorded(TrialOutcome {
                    parameter: plan.parameter,
                    correct: *heard,
                })
            }
            _ => Disposition::Ignored(IgnoreReason::WrongKind),
        }
    }

    fn is_finished(&self) -> bool {
        self.stopped || self.staircase.is_finished()
    }

    fn stop_early(&mut self) {
        self.stopped = true;
    }

    fn estimate(&self) -> ThresholdEstimate {
        self.staircase.estimate()
    }

    fn interpretation(&self) -> Option<Interpretation> {
        self.estimate()
            .value
            .map(|v| Interpretation::Level(db_hl_band(v)))
    }
}

/// Digits-in-noise on the fixed noise schedule
pub struct SnrProcedure {
    run: SnrRun,
    lead_sec: f64,
    tail_sec: f64,
    fade_ms: f64,
}

impl SnrProcedure {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let snr = &config.snr;
        Ok(Self {
            run: SnrRun::new(snr.schedule)?,
            lead_sec: snr.noise_lead_sec,
            tail_sec: snr.noise_tail_sec,
            fade_ms: snr.fade_ms,
        })
    }

    pub fn run(&self) -> &SnrRun {
        &self.run
    }
}

impl Procedure for SnrProcedure {
    fn kind(&self) -> TestKind {
        TestKind::SpeechInNoise
    }

    fn next_stimulus(&mut self, rng: &mut dyn RngCore) -> Option<StimulusPlan> {
        let gain = self.run.current_gain()?;
        let triplet = format!("{:03}", rng.gen_range(0..1000u32));
        Some(StimulusPlan {
            parameter: gain,
            stimulus: Stimulus::DigitsInNoise {
                triplet,
                noise_gain: gain as f32,
                lead_sec: self.lead_sec,
                tail_sec: self.tail_sec,
                fade_ms: self.fade_ms,
            },
        })
    }

    fn respond(&mut self, plan: &StimulusPlan, response: &Response) -> Disposition {
        let (Response::Digits(entered), Stimulus::DigitsInNoise { triplet, .. }) =
            (response, &plan.stimulus)
        else {
            return Disposition::Ignored(IgnoreReason::WrongKind);
        };
        let entered = entered.trim();
        if !is_triplet(entered) {
            return Disposition::Ignored(IgnoreReason::Malformed);
        }
        match self.run.record(triplet, entered) {
            Some(result) => Disposition::Recorded(TrialOutcome {
                parameter: result.noise_gain,
                correct: result.correct,
            }),
            None => Disposition::Ignored(IgnoreReason::OutOfPhase),
        }
    }

    fn is_finished(&self) -> bool {
        self.run.is_finished()
    }

    fn stop_early(&mut self) {
        self.run.stop_early();
    }

    fn estimate(&self) -> ThresholdEstimate {
        self.run.estimate()
    }

    fn interpretation(&self) -> Option<Interpretation> {
        self.run
            .best_snr()
            .map(|snr| Interpretation::SpeechInNoise {
                category: speech_in_noise_category(snr),
            })
    }
}

/// Subject-driven high-frequency sweep
pub struct SweepProcedure {
    sweep: FrequencySweep,
    gain: f32,
    duration_sec: f64,
    fade_ms: f64,
    stopped: bool,
}

impl SweepProcedure {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let sweep = &config.sweep;
        Ok(Self {
            sweep: FrequencySweep::new(sweep.params)?,
            gain: sweep.tone_gain,
            duration_sec: sweep.tone_duration_sec,
            fade_ms: sweep.fade_ms,
            stopped: false,
        })
    }

    pub fn sweep(&self) -> &FrequencySweep {
        &self.sweep
    }
}

impl Procedure for SweepProcedure {
    fn kind(&self) -> TestKind {
        TestKind::FrequencySweep
    }

    fn next_stimulus(&mut self, _rng: &mut dyn RngCore) -> Option<StimulusPlan> {
        if self.is_finished() {
            return None;
        }
        let hz = self.sweep.current_hz();
        Some(StimulusPlan {
            parameter: hz,
            stimulus: Stimulus::Tone {
                frequency_hz: hz,
                duration_sec: self.duration_sec,
                gain: self.gain,
                fade_ms: self.fade_ms,
            },
        })
    }

    fn respond(&mut self, plan: &StimulusPlan, response: &Response) -> Disposition {
        let Response::Sweep(control) = response else {
            return Disposition::Ignored(IgnoreReason::WrongKind);
        };
        match control {
            SweepControl::Up => {
                self.sweep.advance();
            }
            SweepControl::Down => {
                self.sweep.retreat();
            }
            SweepControl::Inaudible => {
                self.sweep.mark_inaudible();
            }
        }
        Disposition::Recorded(TrialOutcome {
            parameter: plan.parameter,
            correct: *control != SweepControl::Inaudible,
        })
    }

    fn is_finished(&self) -> bool {
        self.stopped || self.sweep.is_finished()
    }

    fn stop_early(&mut self) {
        self.stopped = true;
    }

    fn estimate(&self) -> ThresholdEstimate {
        self.sweep.estimate()
    }

    fn interpretation(&self) -> Option<Interpretation> {
        self.sweep
            .estimate_hz()
            .map(|hz| Interpretation::FrequencyCeiling {
                advice: frequency_ceiling_advice(hz),
            })
    }
}

/// Two-interval forced-choice gap detection
pub struct GapProcedure {
    staircase: GapStaircase,
    template: Stimulus,
    stopped: bool,
}

impl GapProcedure {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let gap = &config.gap;
        Ok(Self {
            staircase: GapStaircase::new(gap.params)?,
            template: Stimulus::TwoInterval {
                gap_ms: gap.params.start_ms,
                gap_in: Interval::First,
                interval_sec: gap.interval_sec,
                isi_sec: gap.isi_sec,
                fade_ms: gap.fade_ms,
                gap_position: gap.gap_position,
                use_fades: gap.use_fades,
                noise_sample_rate: gap.noise_sample_rate,
                cutoff_hz: gap.noise_cutoff_hz,
                gain: gap.gain,
                lead_in_sec: gap.lead_in_sec,
            },
            stopped: false,
        })
    }

    pub fn staircase(&self) -> &GapStaircase {
        &self.staircase
    }
}

impl Procedure for GapProcedure {
    fn kind(&self) -> TestKind {
        TestKind::GapDetection
    }

    fn next_stimulus(&mut self, rng: &mut dyn RngCore) -> Option<StimulusPlan> {
        if self.is_finished() {
            return None;
        }
        let current = self.staircase.current_gap_ms();
        let order = if rng.gen_bool(0.5) {
            Interval::First
        } else {
            Interval::Second
        };
        let mut stimulus = self.template.clone();
        if let Stimulus::TwoInterval { gap_ms, gap_in, .. } = &mut stimulus {
            *gap_ms = current;
            *gap_in = order;
        }
        Some(StimulusPlan {
            parameter: current,
            stimulus,
        })
    }

    fn respond(&mut self, plan: &StimulusPlan, response: &Response) -> Disposition {
        let (Response::Choice(choice), Some(gap_in)) = (response, plan.interval_order()) else {
            return Disposition::Ignored(IgnoreReason::WrongKind);
        };
        let correct = *choice == gap_in;
        self.staircase.respond(correct);
        Disposition::Recorded(TrialOutcome {
            parameter: plan.parameter,
            correct,
        })
    }

    fn is_finished(&self) -> bool {
        self.stopped || self.staircase.is_finished()
    }

    fn stop_early(&mut self) {
        self.stopped = true;
    }

    fn estimate(&self) -> ThresholdEstimate {
        self.staircase.estimate()
    }

    fn interpretation(&self) -> Option<Interpretation> {
        self.estimate().value.map(|ms| Interpretation::Gap {
            advice: gap_threshold_advice(ms),
        })
    }
}
