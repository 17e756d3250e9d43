//! Stimulus signal synthesis
//!
//! Produces mono sample buffers for pure tones and band-limited noise, plus the
//! level conversions shared by the estimators.

use crate::error::{HearingTestError, Result};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use rand::Rng;
use std::f64::consts::PI;

/// Mono sample buffer at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Buffer {
    /// Wrap raw samples
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Silent buffer covering `duration_sec`
    pub fn silence(duration_sec: f64, sample_rate: u32) -> Result<Self> {
        let len = sample_count(duration_sec, sample_rate)?;
        Ok(Self::from_samples(vec![0.0; len], sample_rate))
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root-mean-square amplitude
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / self.samples.len() as f64).sqrt() as f32
    }

    /// Peak absolute amplitude
    pub fn peak(&self) -> f32 {
        self.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }

    /// Scale every sample by a linear gain
    pub fn scale(&mut self, gain: f32) {
        for s in self.samples.iter_mut() {
            *s *= gain;
        }
    }

    /// Convert to another sample rate by linear interpolation
    ///
    /// Returns a clone when the rates already match.
    pub fn resampled(&self, target_rate: u32) -> Buffer {
        if target_rate == self.sample_rate || self.samples.is_empty() {
            return Buffer::from_samples(self.samples.clone(), target_rate.max(1));
        }

        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = ((self.samples.len() as f64) / ratio).round().max(1.0) as usize;
        let last = self.samples.len() - 1;

        let samples = (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = pos.floor() as usize;
                if idx >= last {
                    return self.samples[last];
                }
                let frac = (pos - idx as f64) as f32;
                self.samples[idx] * (1.0 - frac) + self.samples[idx + 1] * frac
            })
            .collect();

        Buffer::from_samples(samples, target_rate)
    }
}

/// Number of samples covering `duration_sec` (at least one)
fn sample_count(duration_sec: f64, sample_rate: u32) -> Result<usize> {
    if !(duration_sec.is_finite() && duration_sec > 0.0) {
        return Err(HearingTestError::invalid(format!(
            "duration must be positive, got {duration_sec}"
        )));
    }
    if sample_rate == 0 {
        return Err(HearingTestError::invalid("sample rate must be positive"));
    }
    Ok(((duration_sec * sample_rate as f64).floor() as usize).max(1))
}

/// Generate a sine tone `amplitude * sin(2π f t)`
///
/// # Errors
/// `InvalidParameter` if the frequency or duration is not positive, or the
/// amplitude lies outside [0, 1].
///
/// # Example
/// ```
/// use hearingtest_core::audio::signal::make_tone;
///
/// let tone = make_tone(1000.0, 0.5, 48000, 0.25).unwrap();
/// assert_eq!(tone.len(), 24000);
/// assert!(tone.peak() <= 0.25);
/// ```
pub fn make_tone(
    frequency_hz: f64,
    duration_sec: f64,
    sample_rate: u32,
    amplitude: f32,
) -> Result<Buffer> {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return Err(HearingTestError::invalid(format!(
            "frequency must be positive, got {frequency_hz}"
        )));
    }
    if !(0.0..=1.0).contains(&amplitude) {
        return Err(HearingTestError::invalid(format!(
            "amplitude must be within [0, 1], got {amplitude}"
        )));
    }
    let len = sample_count(duration_sec, sample_rate)?;

    let two_pi_f = 2.0 * PI * frequency_hz;
    let sr = sample_rate as f64;
    let samples = (0..len)
        .map(|i| amplitude * (two_pi_f * (i as f64 / sr)).sin() as f32)
        .collect();

    Ok(Buffer::from_samples(samples, sample_rate))
}

/// Generate low-pass filtered white noise using the thread RNG
///
/// See [`make_bandlimited_noise_with`].
pub fn make_bandlimited_noise(duration_sec: f64, sample_rate: u32, cutoff_hz: f64) -> Result<Buffer> {
    make_bandlimited_noise_with(&mut rand::thread_rng(), duration_sec, sample_rate, cutoff_hz)
}

/// Generate low-pass filtered white noise from the given RNG
///
/// Uniform samples in [-1, 1] are passed through two cascaded second-order
/// Butterworth low-pass sections (Q = 1/√2) at `cutoff_hz`, giving a
/// fourth-order rolloff above the cutoff.
///
/// # Errors
/// `InvalidParameter` if the duration is not positive or the cutoff is not
/// strictly between 0 and Nyquist.
pub fn make_bandlimited_noise_with<R: Rng + ?Sized>(
    rng: &mut R,
    duration_sec: f64,
    sample_rate: u32,
    cutoff_hz: f64,
) -> Result<Buffer> {
    let len = sample_count(duration_sec, sample_rate)?;
    let nyquist = sample_rate as f64 / 2.0;
    if !(cutoff_hz.is_finite() && cutoff_hz > 0.0 && cutoff_hz < nyquist) {
        return Err(HearingTestError::invalid(format!(
            "cutoff must be within (0, {nyquist}) Hz, got {cutoff_hz}"
        )));
    }

    let coeffs = Coefficients::<f32>::from_params(
        Type::LowPass,
        (sample_rate as f32).hz(),
        (cutoff_hz as f32).hz(),
        Q_BUTTERWORTH_F32,
    )
    .map_err(|e| HearingTestError::invalid(format!("low-pass design failed: {e:?}")))?;

    let mut stages = [
        DirectForm2Transposed::<f32>::new(coeffs),
        DirectForm2Transposed::<f32>::new(coeffs),
    ];

    let samples = (0..len)
        .map(|_| {
            let white: f32 = rng.gen_range(-1.0..=1.0);
            stages.iter_mut().fold(white, |x, stage| stage.run(x))
        })
        .collect();

    Ok(Buffer::from_samples(samples, sample_rate))
}

/// Convert a linear amplitude to dBFS (`-inf` for non-positive input)
pub fn amp_to_dbfs(amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        return f64::NEG_INFINITY;
    }
    20.0 * amplitude.log10()
}

/// Convert dBFS to a linear amplitude
pub fn dbfs_to_amp(dbfs: f64) -> f64 {
    10f64.powf(dbfs / 20.0)
}

/// RMS level of a buffer in dBFS
///
/// Used to pre-measure the fixed signal and noise levels of recorded assets.
pub fn measure_rms_dbfs(buffer: &Buffer) -> f64 {
    amp_to_dbfs(buffer.rms() as f64)
}
