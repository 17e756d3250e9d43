//! Audio output engine for device management and stream handling
//!
//! Provides high-level interface for:
//! - Enumerating output devices
//! - Opening an output stream on the selected or default device
//! - Mixing scheduled sources sample-accurately inside the audio callback
//!
//! ## Clock
//!
//! The playback clock is a frame counter advanced by the output callback, so
//! `current_time` is exactly the position of the next frame to be rendered.
//! Sources are handed to the callback through a lock-free crossbeam channel
//! and start on the frame nearest to their scheduled time.

use crate::audio::player::{PlaybackBackend, ScheduledSource, SourceId};
use crate::error::{HearingTestError, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Capacity of the command channel into the audio callback
const COMMAND_CAPACITY: usize = 256;

/// Audio output device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Whether this is the default output device
    pub is_default: bool,
    /// Supported sample rates
    pub sample_rates: Vec<u32>,
    /// Number of output channels
    pub output_channels: u16,
}

/// Audio engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine is stopped
    Stopped,
    /// Engine is running and rendering audio
    Running,
    /// Engine encountered an error
    Error,
}

/// Source being mixed by the callback
struct Voice {
    id: SourceId,
    samples: Arc<[f32]>,
    start_frame: u64,
    gains: [f32; 2],
    done: Option<oneshot::Sender<f64>>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Messages from the scheduling side to the audio callback
enum EngineCommand {
    Play(Voice),
    Stop(SourceId),
}

struct EngineInner {
    state: EngineState,
    sample_rate: u32,
    stream: Option<Stream>,
    commands: Option<crossbeam_channel::Sender<EngineCommand>>,
}

/// cpal output engine implementing [`PlaybackBackend`]
pub struct AudioEngine {
    device_name: Option<String>,
    frame_counter: Arc<AtomicU64>,
    inner: Mutex<EngineInner>,
}

impl AudioEngine {
    /// Create a stopped engine that will open the default output device
    pub fn new(sample_rate: u32) -> Self {
        Self {
            device_name: None,
            frame_counter: Arc::new(AtomicU64::new(0)),
            inner: Mutex::new(EngineInner {
                state: EngineState::Stopped,
                sample_rate,
                stream: None,
                commands: None,
            }),
        }
    }

    /// Open the named output device instead of the default one
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get current engine state
    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    /// Get the selected device name
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// List available output devices
    ///
    /// # Returns
    /// Vector of device information for every device with output channels
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        let devices = host
            .output_devices()
            .map_err(|e| HearingTestError::PlaybackUnavailable(e.to_string()))?;

        let common_rates = [44100, 48000, 88200, 96000, 176400, 192000];
        let mut infos = Vec::new();

        for device in devices {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_output.as_deref() == Some(name.as_str());

            let output_channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(0);

            let mut sample_rates = Vec::new();
            if let Ok(configs) = device.supported_output_configs() {
                for config in configs {
                    for &rate in &common_rates {
                        if (config.min_sample_rate().0..=config.max_sample_rate().0).contains(&rate)
                            && !sample_rates.contains(&rate)
                        {
                            sample_rates.push(rate);
                        }
                    }
                }
            }
            sample_rates.sort();

            infos.push(DeviceInfo {
                name,
                is_default,
                sample_rates,
                output_channels,
            });
        }

        Ok(infos)
    }

    fn open_device(&self) -> Result<Device> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| HearingTestError::PlaybackUnavailable(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| {
                    HearingTestError::PlaybackUnavailable(format!("device not found: {name}"))
                }),
            None => host.default_output_device().ok_or_else(|| {
                HearingTestError::PlaybackUnavailable("no default output device".to_string())
            }),
        }
    }

    /// Open and start the output stream
    fn start(&self) -> Result<()> {
        let device = self.open_device()?;
        let default_output = device
            .default_output_config()
            .map_err(|e| HearingTestError::PlaybackUnavailable(e.to_string()))?;

        let channels = default_output.channels().max(1);
        let device_rate = default_output.sample_rate().0;
        let configured_rate = self.lock().sample_rate;

        tracing::info!(
            "Device default output config: {} Hz, {} channels",
            device_rate,
            channels
        );

        let rates_to_try = if device_rate != configured_rate {
            vec![configured_rate, device_rate]
        } else {
            vec![configured_rate]
        };

        let mut last_error = String::new();

        for rate in rates_to_try {
            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let (command_tx, command_rx) =
                crossbeam_channel::bounded::<EngineCommand>(COMMAND_CAPACITY);
            let mut mixer = Mixer::new(command_rx, Arc::clone(&self.frame_counter), channels, rate);

            match device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.process(data),
                |err| tracing::error!("Output stream error: {}", err),
                None,
            ) {
                Ok(stream) => {
                    stream
                        .play()
                        .map_err(|e| HearingTestError::PlaybackUnavailable(e.to_string()))?;
                    if rate != configured_rate {
                        tracing::warn!(
                            "Configured rate {} Hz failed, using device default {} Hz",
                            configured_rate,
                            rate
                        );
                    }
                    let mut inner = self.lock();
                    inner.sample_rate = rate;
                    inner.stream = Some(stream);
                    inner.commands = Some(command_tx);
                    inner.state = EngineState::Running;
                    tracing::info!(
                        "Audio engine started: {} @ {}Hz",
                        self.device_name.as_deref().unwrap_or("default"),
                        rate
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Sample rate {} Hz failed: {}", rate, e);
                    last_error = e.to_string();
                }
            }
        }

        self.lock().state = EngineState::Error;
        Err(HearingTestError::PlaybackUnavailable(last_error))
    }

    /// Stop audio output, cancelling every scheduled source
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.commands = None;
        inner.stream = None;
        inner.state = EngineState::Stopped;
        tracing::info!("Audio engine stopped");
    }
}

/// Callback-side mixer, owned by the output stream closure
struct Mixer {
    commands: crossbeam_channel::Receiver<EngineCommand>,
    frame_counter: Arc<AtomicU64>,
    channels: usize,
    sample_rate: u32,
    voices: Vec<Voice>,
}

impl Mixer {
    fn new(
        commands: crossbeam_channel::Receiver<EngineCommand>,
        frame_counter: Arc<AtomicU64>,
        channels: u16,
        sample_rate: u32,
    ) -> Self {
        Self {
            commands,
            frame_counter,
            channels: channels.max(1) as usize,
            sample_rate,
            voices: Vec::with_capacity(32),
        }
    }

    /// Render one interleaved block and advance the clock
    fn process(&mut self, data: &mut [f32]) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                EngineCommand::Play(voice) => self.voices.push(voice),
                EngineCommand::Stop(id) => self.voices.retain(|v| v.id != id),
            }
        }

        let block_start = self.frame_counter.load(Ordering::Acquire);
        data.fill(0.0);

        for voice in &self.voices {
            for (i, frame) in data.chunks_mut(self.channels).enumerate() {
                let position = block_start + i as u64;
                if position < voice.start_frame || position >= voice.end_frame() {
                    continue;
                }
                let sample = voice.samples[(position - voice.start_frame) as usize];
                if frame.len() == 1 {
                    frame[0] += sample * 0.5 * (voice.gains[0] + voice.gains[1]);
                } else {
                    frame[0] += sample * voice.gains[0];
                    frame[1] += sample * voice.gains[1];
                }
            }
        }

        let block_end = block_start + (data.len() / self.channels) as u64;
        let sample_rate = self.sample_rate as f64;
        self.voices.retain_mut(|voice| {
            if voice.end_frame() > block_end {
                return true;
            }
            if let Some(done) = voice.done.take() {
                let _ = done.send(voice.end_frame() as f64 / sample_rate);
            }
            false
        });

        self.frame_counter.store(block_end, Ordering::Release);
    }
}

#[async_trait(?Send)]
impl PlaybackBackend for AudioEngine {
    async fn resume(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.start()
    }

    fn is_running(&self) -> bool {
        self.lock().state == EngineState::Running
    }

    fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    fn current_time(&self) -> f64 {
        let frames = self.frame_counter.load(Ordering::Acquire);
        frames as f64 / self.sample_rate() as f64
    }

    fn schedule(&self, source: ScheduledSource) -> Result<oneshot::Receiver<f64>> {
        let inner = self.lock();
        let commands = inner.commands.as_ref().ok_or_else(|| {
            HearingTestError::PlaybackUnavailable("audio engine is not running".to_string())
        })?;

        let (tx, rx) = oneshot::channel();
        let voice = Voice {
            id: source.id,
            start_frame: (source.start_time * inner.sample_rate as f64).round() as u64,
            samples: source.samples,
            gains: source.channel_gains,
            done: Some(tx),
        };

        commands
            .try_send(EngineCommand::Play(voice))
            .map_err(|e| HearingTestError::PlaybackUnavailable(e.to_string()))?;
        Ok(rx)
    }

    fn stop(&self, id: SourceId) {
        if let Some(commands) = self.lock().commands.as_ref() {
            let _ = commands.try_send(EngineCommand::Stop(id));
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
