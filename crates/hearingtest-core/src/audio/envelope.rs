//! Piecewise-linear gain envelopes
//!
//! An [`Envelope`] is an ordered list of breakpoints. Each breakpoint states the
//! gain reached at `offset_sec` and how long the linear ramp leading up to it
//! lasts; a ramp of zero is an instantaneous step. Before the first breakpoint
//! the gain is 0, and between breakpoints the gain holds at the previous target.
//!
//! ```text
//!  gain
//!   1 ┤   ┌───────┐     ┌───────┐
//!     │  /         \   /         \
//!   0 ┼─┘           └─┘           └─
//!     0  fade   gapStart gapEnd     T
//! ```
//!
//! Envelopes are expressed in seconds relative to the stimulus start, so the
//! same envelope applies at any sample rate.
//!
//! ## Clamp rule
//!
//! Every ramp lives inside one sounding segment (`[0, gapStart]` or
//! `[gapEnd, T]`) and is clamped to half of that segment's length, so the
//! ramp in and the ramp out of a segment can touch but never overlap. A gap
//! window is truncated to `[0, T]`: a window starting before 0 keeps its end,
//! one running past `T` is cut at `T`, and one lying wholly outside is dropped.

use crate::error::{HearingTestError, Result};
use serde::{Deserialize, Serialize};

/// One gain target with the ramp that leads to it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Time (s from stimulus start) at which `target_gain` is reached
    pub offset_sec: f64,
    /// Gain at `offset_sec`, within [0, 1]
    pub target_gain: f32,
    /// Length of the linear ramp ending at `offset_sec` (0 = step)
    pub ramp_sec: f64,
}

/// Validated gain envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    total_duration_sec: f64,
    breakpoints: Vec<Breakpoint>,
}

impl Envelope {
    /// Build an envelope from raw breakpoints, checking every invariant
    ///
    /// # Errors
    /// `InvalidParameter` if offsets are not strictly increasing, lie outside
    /// `[0, total_duration_sec]`, a gain is outside [0, 1], two ramps overlap,
    /// or the final gain is not 0.
    pub fn new(total_duration_sec: f64, breakpoints: Vec<Breakpoint>) -> Result<Self> {
        check_duration(total_duration_sec)?;

        let mut prev_offset = f64::NEG_INFINITY;
        for bp in &breakpoints {
            if !(0.0..=1.0).contains(&bp.target_gain) {
                return Err(HearingTestError::invalid(format!(
                    "gain {} outside [0, 1]",
                    bp.target_gain
                )));
            }
            if !(bp.ramp_sec.is_finite() && bp.ramp_sec >= 0.0) {
                return Err(HearingTestError::invalid("ramp must be non-negative"));
            }
            if bp.offset_sec - bp.ramp_sec < -1e-12 || bp.offset_sec > total_duration_sec + 1e-12 {
                return Err(HearingTestError::invalid(format!(
                    "breakpoint at {}s (ramp {}s) outside stimulus of {}s",
                    bp.offset_sec, bp.ramp_sec, total_duration_sec
                )));
            }
            if bp.offset_sec <= prev_offset {
                return Err(HearingTestError::invalid("breakpoint offsets must increase"));
            }
            if bp.offset_sec - bp.ramp_sec < prev_offset - 1e-12 {
                return Err(HearingTestError::invalid(format!(
                    "ramp ending at {}s overlaps the previous breakpoint",
                    bp.offset_sec
                )));
            }
            prev_offset = bp.offset_sec;
        }

        if breakpoints.last().is_some_and(|bp| bp.target_gain != 0.0) {
            return Err(HearingTestError::invalid("envelope must end at gain 0"));
        }

        Ok(Self {
            total_duration_sec,
            breakpoints,
        })
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration_sec
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Gain at time `t` (seconds from stimulus start)
    pub fn gain_at(&self, t: f64) -> f32 {
        let mut current = 0.0f32;
        for bp in &self.breakpoints {
            if t >= bp.offset_sec {
                current = bp.target_gain;
                continue;
            }
            let ramp_start = bp.offset_sec - bp.ramp_sec;
            if bp.ramp_sec > 0.0 && t > ramp_start {
                let frac = ((t - ramp_start) / bp.ramp_sec) as f32;
                return current + (bp.target_gain - current) * frac;
            }
            return current;
        }
        current
    }

    /// Per-sample gain curve for `len` samples at `sample_rate`
    pub fn render(&self, sample_rate: u32, len: usize) -> Vec<f32> {
        let sr = sample_rate as f64;
        (0..len).map(|i| self.gain_at(i as f64 / sr)).collect()
    }

    /// Multiply `samples` in place by the envelope
    pub fn apply(&self, samples: &mut [f32], sample_rate: u32) {
        let sr = sample_rate as f64;
        for (i, s) in samples.iter_mut().enumerate() {
            *s *= self.gain_at(i as f64 / sr);
        }
    }
}

fn check_duration(total_duration_sec: f64) -> Result<()> {
    if !(total_duration_sec.is_finite() && total_duration_sec > 0.0) {
        return Err(HearingTestError::invalid(format!(
            "total duration must be positive, got {total_duration_sec}"
        )));
    }
    Ok(())
}

fn check_fade(fade_ms: f64) -> Result<f64> {
    if !(fade_ms.is_finite() && fade_ms >= 0.0) {
        return Err(HearingTestError::invalid(format!(
            "fade must be non-negative, got {fade_ms} ms"
        )));
    }
    Ok(fade_ms / 1000.0)
}

/// Sounding segment `[start, end]` with its edge ramps
struct Segment {
    start: f64,
    end: f64,
    ramp_in: f64,
    ramp_out: f64,
}

impl Segment {
    fn new(start: f64, end: f64, fade_in: f64, fade_out: f64) -> Self {
        let half = (end - start) / 2.0;
        Self {
            start,
            end,
            ramp_in: fade_in.min(half),
            ramp_out: fade_out.min(half),
        }
    }

    fn push_breakpoints(&self, out: &mut Vec<Breakpoint>) {
        out.push(Breakpoint {
            offset_sec: self.start + self.ramp_in,
            target_gain: 1.0,
            ramp_sec: self.ramp_in,
        });
        out.push(Breakpoint {
            offset_sec: self.end,
            target_gain: 0.0,
            ramp_sec: self.ramp_out,
        });
    }
}

/// Fade in over `fade_ms`, hold at 1, fade out over `fade_ms`
///
/// Fades longer than half the stimulus are clamped to half.
///
/// # Example
/// ```
/// use hearingtest_core::audio::envelope::build_simple_envelope;
///
/// let env = build_simple_envelope(1.0, 5.0).unwrap();
/// assert_eq!(env.gain_at(0.0), 0.0);
/// assert_eq!(env.gain_at(0.5), 1.0);
/// assert_eq!(env.gain_at(1.0), 0.0);
/// ```
pub fn build_simple_envelope(total_duration_sec: f64, fade_ms: f64) -> Result<Envelope> {
    check_duration(total_duration_sec)?;
    let fade = check_fade(fade_ms)?;

    let mut breakpoints = Vec::with_capacity(2);
    Segment::new(0.0, total_duration_sec, fade, fade).push_breakpoints(&mut breakpoints);
    Envelope::new(total_duration_sec, breakpoints)
}

/// Simple envelope with a silent window `[gap_start_sec, gap_start_sec + gap_len_sec)`
///
/// With `use_fades` the transitions into and out of the gap ramp over
/// `fade_ms`; otherwise they are instantaneous steps. The outer fade in and
/// fade out always ramp. See the module docs for the clamp rule.
pub fn build_gapped_envelope(
    total_duration_sec: f64,
    gap_start_sec: f64,
    gap_len_sec: f64,
    fade_ms: f64,
    use_fades: bool,
) -> Result<Envelope> {
    check_duration(total_duration_sec)?;
    let fade = check_fade(fade_ms)?;
    if !(gap_start_sec.is_finite() && gap_len_sec.is_finite()) {
        return Err(HearingTestError::invalid("gap window must be finite"));
    }
    if gap_len_sec < 0.0 {
        return Err(HearingTestError::invalid(format!(
            "gap length must be non-negative, got {gap_len_sec}"
        )));
    }

    let gap_start = gap_start_sec.clamp(0.0, total_duration_sec);
    let gap_end = (gap_start_sec + gap_len_sec).clamp(0.0, total_duration_sec);
    if gap_start_sec < 0.0 || gap_start_sec + gap_len_sec > total_duration_sec {
        tracing::debug!(
            gap_start = gap_start_sec,
            gap_len = gap_len_sec,
            total = total_duration_sec,
            "Gap window truncated to the stimulus"
        );
    }

    if gap_end <= gap_start {
        return build_simple_envelope(total_duration_sec, fade_ms);
    }

    let gap_fade = if use_fades { fade } else { 0.0 };
    let mut breakpoints = Vec::with_capacity(4);

    if gap_start > 0.0 {
        Segment::new(0.0, gap_start, fade, gap_fade).push_breakpoints(&mut breakpoints);
    }
    if gap_end < total_duration_sec {
        Segment::new(gap_end, total_duration_sec, gap_fade, fade).push_breakpoints(&mut breakpoints);
    }

    Envelope::new(total_duration_sec, breakpoints)
}
