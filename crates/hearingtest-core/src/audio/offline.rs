//! Deterministic playback backend on a virtual clock
//!
//! Nothing is sent to a device. Scheduled sources are kept so they can be
//! inspected or mixed down into a stereo render, which makes timing and
//! routing observable in tests and lets the CLI run without audio hardware.
//!
//! The clock only moves when [`OfflineBackend::advance_to`] is called.
//! Completions are delivered as soon as a source is scheduled, carrying the
//! source's nominal stop time, unless completions are held.

use crate::audio::player::{PlaybackBackend, ScheduledSource, SourceId};
use crate::error::{HearingTestError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// What the backend knows about one scheduled source
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: SourceId,
    pub start_time: f64,
    pub stop_time: f64,
    pub sample_rate: u32,
    pub channel_gains: [f32; 2],
    /// Clock time at which the source was stopped early, if it was
    pub stopped_at: Option<f64>,
    pub samples: Arc<[f32]>,
}

/// Two-channel mixdown of everything scheduled
#[derive(Debug, Clone, Default)]
pub struct StereoRender {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

impl StereoRender {
    /// Index of the first frame whose absolute value in `channel` exceeds `threshold`
    pub fn first_above(channel: &[f32], threshold: f32) -> Option<usize> {
        channel.iter().position(|s| s.abs() > threshold)
    }

    /// Peak absolute value of a channel
    pub fn peak(channel: &[f32]) -> f32 {
        channel.iter().map(|s| s.abs()).fold(0.0, f32::max)
    }
}

#[derive(Debug)]
struct OfflineState {
    running: bool,
    clock: f64,
    records: Vec<SourceRecord>,
    held: Vec<(SourceId, f64, oneshot::Sender<f64>)>,
    hold_completions: bool,
    refuse_after: Option<usize>,
}

/// Virtual-clock backend
#[derive(Debug)]
pub struct OfflineBackend {
    sample_rate: u32,
    state: Mutex<OfflineState>,
}

impl OfflineBackend {
    /// Create a suspended backend at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            state: Mutex::new(OfflineState {
                running: false,
                clock: 0.0,
                records: Vec::new(),
                held: Vec::new(),
                hold_completions: false,
                refuse_after: None,
            }),
        }
    }

    /// Keep completions pending until [`release_completions`](Self::release_completions)
    pub fn hold_completions(self) -> Self {
        self.lock().hold_completions = true;
        self
    }

    /// Refuse every source after the first `count` have been accepted
    pub fn refuse_after(self, count: usize) -> Self {
        self.lock().refuse_after = Some(count);
        self
    }

    fn lock(&self) -> MutexGuard<'_, OfflineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the virtual clock forward; earlier times are ignored
    pub fn advance_to(&self, time: f64) {
        let mut state = self.lock();
        if time > state.clock {
            state.clock = time;
        }
    }

    /// Deliver every held completion, returning how many were delivered
    pub fn release_completions(&self) -> usize {
        let held = std::mem::take(&mut self.lock().held);
        let count = held.len();
        for (_, stop_time, tx) in held {
            let _ = tx.send(stop_time);
        }
        count
    }

    /// Snapshot of every source scheduled so far, in scheduling order
    pub fn records(&self) -> Vec<SourceRecord> {
        self.lock().records.clone()
    }

    /// Mix every scheduled source into left/right channels from clock time 0
    pub fn render(&self) -> StereoRender {
        let state = self.lock();
        let sr = self.sample_rate as f64;

        let end_frame = state
            .records
            .iter()
            .map(|r| (r.stopped_at.unwrap_or(r.stop_time).min(r.stop_time) * sr).ceil() as usize)
            .max()
            .unwrap_or(0);

        let mut left = vec![0.0f32; end_frame];
        let mut right = vec![0.0f32; end_frame];

        for record in &state.records {
            let start_frame = (record.start_time * sr).round() as usize;
            let mut len = record.samples.len();
            if let Some(stopped) = record.stopped_at {
                let played = ((stopped - record.start_time).max(0.0) * sr).round() as usize;
                len = len.min(played);
            }
            for (i, &sample) in record.samples[..len].iter().enumerate() {
                let frame = start_frame + i;
                if frame >= end_frame {
                    break;
                }
                left[frame] += sample * record.channel_gains[0];
                right[frame] += sample * record.channel_gains[1];
            }
        }

        StereoRender {
            left,
            right,
            sample_rate: self.sample_rate,
        }
    }
}

#[async_trait(?Send)]
impl PlaybackBackend for OfflineBackend {
    async fn resume(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.running {
            state.running = true;
            tracing::debug!(sample_rate = self.sample_rate, "Offline backend resumed");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lock().running
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.lock().clock
    }

    fn schedule(&self, source: ScheduledSource) -> Result<oneshot::Receiver<f64>> {
        let mut state = self.lock();
        if !state.running {
            return Err(HearingTestError::PlaybackUnavailable(
                "offline backend is suspended".to_string(),
            ));
        }
        if let Some(limit) = state.refuse_after {
            if state.records.len() >= limit {
                return Err(HearingTestError::PlaybackUnavailable(format!(
                    "offline backend refuses sources after {limit}"
                )));
            }
        }
        if source.sample_rate != self.sample_rate {
            return Err(HearingTestError::PlaybackUnavailable(format!(
                "source rate {} does not match backend rate {}",
                source.sample_rate, self.sample_rate
            )));
        }

        let stop_time = source.stop_time();
        let (tx, rx) = oneshot::channel();
        if state.hold_completions {
            state.held.push((source.id, stop_time, tx));
        } else {
            let _ = tx.send(stop_time);
        }

        state.records.push(SourceRecord {
            id: source.id,
            start_time: source.start_time,
            stop_time,
            sample_rate: source.sample_rate,
            channel_gains: source.channel_gains,
            stopped_at: None,
            samples: source.samples,
        });

        Ok(rx)
    }

    fn stop(&self, id: SourceId) {
        let mut state = self.lock();
        let clock = state.clock;
        if let Some(record) = state.records.iter_mut().find(|r| r.id == id) {
            if record.stopped_at.is_none() {
                record.stopped_at = Some(clock.max(record.start_time));
            }
        }
        // Dropping the sender resolves the handle as cancelled
        state.held.retain(|(held_id, _, _)| *held_id != id);
    }
}
