//! Digit-triplet stimuli for the digits-in-noise test
//!
//! A [`DigitSource`] supplies the spoken triplet and the masking noise.
//! [`WavDigitLibrary`] reads recordings from a directory laid out as
//! `<dir>/000.wav` .. `<dir>/999.wav` plus `<dir>/noise.wav`, downmixes them
//! to mono and caches each decoded buffer by its content key.
//! [`SyntheticDigits`] stands in when no recordings are available.

use crate::audio::signal::{dbfs_to_amp, make_bandlimited_noise_with, make_tone, Buffer};
use crate::error::{HearingTestError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Cache key for the masking noise
const NOISE_KEY: &str = "noise";

/// Provider of triplet and noise buffers
pub trait DigitSource {
    /// Buffer for a three-digit code such as `"042"`
    fn triplet(&mut self, digits: &str) -> Result<Buffer>;

    /// Masking noise buffer
    fn noise(&mut self) -> Result<Buffer>;
}

/// Check that `digits` is exactly three ASCII digits
pub fn is_triplet(digits: &str) -> bool {
    digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Digit recordings loaded from WAV files
pub struct WavDigitLibrary {
    root: PathBuf,
    cache: HashMap<String, Buffer>,
}

impl WavDigitLibrary {
    /// Use recordings under `root`
    ///
    /// # Errors
    /// `Asset` if `root` is not a directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(HearingTestError::Asset(format!(
                "digit directory not found: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            cache: HashMap::new(),
        })
    }

    /// Number of decoded buffers held in the cache
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn load(&mut self, key: &str) -> Result<Buffer> {
        if let Some(buffer) = self.cache.get(key) {
            return Ok(buffer.clone());
        }
        let path = self.root.join(format!("{key}.wav"));
        let buffer = read_wav_mono(&path)?;
        tracing::debug!(key, samples = buffer.len(), "Loaded digit asset");
        self.cache.insert(key.to_string(), buffer.clone());
        Ok(buffer)
    }
}

impl DigitSource for WavDigitLibrary {
    fn triplet(&mut self, digits: &str) -> Result<Buffer> {
        if !is_triplet(digits) {
            return Err(HearingTestError::invalid(format!(
                "expected three digits, got {digits:?}"
            )));
        }
        self.load(digits)
    }

    fn noise(&mut self) -> Result<Buffer> {
        self.load(NOISE_KEY)
    }
}

/// Read a WAV file and average its channels into one
///
/// # Errors
/// `Asset` if the file is missing, unreadable or empty.
pub fn read_wav_mono(path: &Path) -> Result<Buffer> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| HearingTestError::Asset(format!("{}: {e}", path.display())))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| HearingTestError::Asset(format!("{}: {e}", path.display())))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| HearingTestError::Asset(format!("{}: {e}", path.display())))?
        }
    };

    if interleaved.is_empty() {
        return Err(HearingTestError::Asset(format!(
            "{}: no samples",
            path.display()
        )));
    }

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(Buffer::from_samples(mono, spec.sample_rate))
}

/// Tone-coded digits and filtered noise, scaled to fixed RMS levels
///
/// Each digit `d` is a 0.3 s tone at `400 + 100·d` Hz followed by 0.1 s of
/// silence. The triplet is scaled to `signal_rms_dbfs` and the noise to
/// `noise_rms_dbfs` so the SNR arithmetic of the test holds.
pub struct SyntheticDigits {
    sample_rate: u32,
    signal_rms_dbfs: f64,
    noise_rms_dbfs: f64,
    rng: StdRng,
    noise: Option<Buffer>,
}

impl SyntheticDigits {
    const DIGIT_SEC: f64 = 0.3;
    const PAUSE_SEC: f64 = 0.1;
    const NOISE_SEC: f64 = 4.0;
    const NOISE_CUTOFF_HZ: f64 = 8000.0;

    pub fn new(sample_rate: u32, signal_rms_dbfs: f64, noise_rms_dbfs: f64, seed: u64) -> Self {
        Self {
            sample_rate,
            signal_rms_dbfs,
            noise_rms_dbfs,
            rng: StdRng::seed_from_u64(seed),
            noise: None,
        }
    }
}

fn scale_to_rms(buffer: &mut Buffer, target_dbfs: f64) {
    let rms = buffer.rms();
    if rms > 0.0 {
        buffer.scale((dbfs_to_amp(target_dbfs) / rms as f64) as f32);
    }
}

impl DigitSource for SyntheticDigits {
    fn triplet(&mut self, digits: &str) -> Result<Buffer> {
        if !is_triplet(digits) {
            return Err(HearingTestError::invalid(format!(
                "expected three digits, got {digits:?}"
            )));
        }

        let mut samples = Vec::new();
        for d in digits.bytes().map(|b| (b - b'0') as f64) {
            let tone = make_tone(400.0 + 100.0 * d, Self::DIGIT_SEC, self.sample_rate, 0.5)?;
            samples.extend_from_slice(tone.samples());
            let pause = Buffer::silence(Self::PAUSE_SEC, self.sample_rate)?;
            samples.extend_from_slice(pause.samples());
        }

        let mut buffer = Buffer::from_samples(samples, self.sample_rate);
        scale_to_rms(&mut buffer, self.signal_rms_dbfs);
        Ok(buffer)
    }

    fn noise(&mut self) -> Result<Buffer> {
        if let Some(noise) = &self.noise {
            return Ok(noise.clone());
        }
        let mut noise = make_bandlimited_noise_with(
            &mut self.rng,
            Self::NOISE_SEC,
            self.sample_rate,
            Self::NOISE_CUTOFF_HZ.min(0.45 * self.sample_rate as f64),
        )?;
        scale_to_rms(&mut noise, self.noise_rms_dbfs);
        self.noise = Some(noise.clone());
        Ok(noise)
    }
}

/// Repeat or truncate `buffer` to cover exactly `duration_sec`
pub fn fit_to_duration(buffer: &Buffer, duration_sec: f64) -> Result<Buffer> {
    if buffer.is_empty() {
        return Err(HearingTestError::invalid("cannot fit an empty buffer"));
    }
    let target = Buffer::silence(duration_sec, buffer.sample_rate())?.len();
    let samples = buffer.samples().iter().copied().cycle().take(target).collect();
    Ok(Buffer::from_samples(samples, buffer.sample_rate()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::signal::measure_rms_dbfs;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    fn write_wav(path: &Path, channels: u16, frames: &[[i16; 2]]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame.iter().take(channels as usize) {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_is_triplet() {
        assert!(is_triplet("042"));
        assert!(!is_triplet("42"));
        assert!(!is_triplet("4a2"));
        assert!(!is_triplet("0421"));
    }

    #[test]
    fn test_wav_library_downmixes_and_caches() {
        let dir = tempdir().unwrap();
        write_wav(&dir.path().join("123.wav"), 2, &[[16384, 0], [16384, 16384]]);
        write_wav(&dir.path().join("noise.wav"), 1, &[[8192, 0]; 4]);

        let mut lib = WavDigitLibrary::open(dir.path()).unwrap();
        let triplet = lib.triplet("123").unwrap();
        assert_eq!(triplet.sample_rate(), 16000);
        assert_eq!(triplet.len(), 2);
        assert_abs_diff_eq!(triplet.samples()[0], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(triplet.samples()[1], 0.5, epsilon = 1e-6);

        let noise = lib.noise().unwrap();
        assert_eq!(noise.len(), 4);
        lib.triplet("123").unwrap();
        assert_eq!(lib.cached(), 2);
    }

    #[test]
    fn test_wav_library_missing_file() {
        let dir = tempdir().unwrap();
        let mut lib = WavDigitLibrary::open(dir.path()).unwrap();
        assert!(matches!(lib.triplet("999"), Err(HearingTestError::Asset(_))));
        assert!(matches!(lib.triplet("99"), Err(HearingTestError::InvalidParameter(_))));
    }

    #[test]
    fn test_open_rejects_missing_dir() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(WavDigitLibrary::open(missing).is_err());
    }

    #[test]
    fn test_synthetic_levels() {
        let mut digits = SyntheticDigits::new(16000, -20.0, -29.29, 7);
        let triplet = digits.triplet("305").unwrap();
        assert_abs_diff_eq!(measure_rms_dbfs(&triplet), -20.0, epsilon = 0.01);
        assert_abs_diff_eq!(triplet.duration(), 1.2, epsilon = 1e-3);

        let noise = digits.noise().unwrap();
        assert_abs_diff_eq!(measure_rms_dbfs(&noise), -29.29, epsilon = 0.01);
        assert_eq!(digits.noise().unwrap(), noise);
    }

    #[test]
    fn test_synthetic_noise_at_low_sample_rates() {
        for rate in [8000, 16000] {
            let mut digits = SyntheticDigits::new(rate, -20.0, -29.29, 3);
            let noise = digits.noise().unwrap();
            assert_eq!(noise.sample_rate(), rate);
            assert_abs_diff_eq!(measure_rms_dbfs(&noise), -29.29, epsilon = 0.01);
        }
    }

    #[test]
    fn test_fit_to_duration_loops() {
        let buffer = Buffer::from_samples(vec![1.0, 2.0, 3.0], 4);
        let fitted = fit_to_duration(&buffer, 1.75).unwrap();
        assert_eq!(fitted.samples(), &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
    }
}
