//! Response input
//!
//! Subjects answer through discrete events. The sequencer only reads events
//! once a stimulus has finished; answers that arrived earlier are discarded
//! through [`ResponseSource::discard_pending`]. Replay and quit requests are
//! kept and delivered next.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// One of the two intervals of a two-interval trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    First,
    Second,
}

impl Interval {
    /// 1-based position
    pub fn number(self) -> u8 {
        match self {
            Interval::First => 1,
            Interval::Second => 2,
        }
    }
}

/// Control in the frequency sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepControl {
    Up,
    Down,
    Inaudible,
}

/// A subject's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Response {
    Heard(bool),
    Choice(Interval),
    Digits(String),
    Sweep(SweepControl),
}

/// Anything the subject can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Response(Response),
    /// Play the last stimulus again
    Replay,
    /// End the session now
    Quit,
}

impl InputEvent {
    /// Parse one line of text input
    ///
    /// `y`/`n` answer yes/no, `1`/`2` pick an interval, `+`/`-`/`x` drive the
    /// sweep, `r` replays and `q` quits. Anything else is passed on as a digit
    /// string. Returns `None` for blank lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let text = line.trim();
        let event = match text.to_ascii_lowercase().as_str() {
            "" => return None,
            "y" | "yes" => InputEvent::Response(Response::Heard(true)),
            "n" | "no" => InputEvent::Response(Response::Heard(false)),
            "1" => InputEvent::Response(Response::Choice(Interval::First)),
            "2" => InputEvent::Response(Response::Choice(Interval::Second)),
            "+" | "up" => InputEvent::Response(Response::Sweep(SweepControl::Up)),
            "-" | "down" => InputEvent::Response(Response::Sweep(SweepControl::Down)),
            "x" | "gone" => InputEvent::Response(Response::Sweep(SweepControl::Inaudible)),
            "r" | "replay" => InputEvent::Replay,
            "q" | "quit" => InputEvent::Quit,
            _ => InputEvent::Response(Response::Digits(text.to_string())),
        };
        Some(event)
    }
}

/// Source of subject input
#[async_trait(?Send)]
pub trait ResponseSource {
    /// Wait for the next event; `None` once input is closed
    async fn next_event(&mut self) -> Option<InputEvent>;

    /// Drop answers that arrived while no response was expected
    ///
    /// Replay and quit requests survive. Returns how many answers were dropped.
    fn discard_pending(&mut self) -> usize;
}

/// Pre-recorded input for tests and scripted runs
///
/// Events added with [`early`](Self::early) model input that arrives while a
/// stimulus is still playing; early answers are dropped by `discard_pending`.
#[derive(Debug, Default)]
pub struct ScriptedResponses {
    queue: VecDeque<(bool, InputEvent)>,
}

impl ScriptedResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event delivered when a response is expected
    pub fn then(mut self, event: InputEvent) -> Self {
        self.queue.push_back((false, event));
        self
    }

    /// Queue a response delivered when a response is expected
    pub fn respond(self, response: Response) -> Self {
        self.then(InputEvent::Response(response))
    }

    /// Queue an event that arrives during the stimulus
    pub fn early(mut self, event: InputEvent) -> Self {
        self.queue.push_back((true, event));
        self
    }

    /// Events not consumed yet
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl FromIterator<Response> for ScriptedResponses {
    fn from_iter<I: IntoIterator<Item = Response>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ScriptedResponses::new(), ScriptedResponses::respond)
    }
}

#[async_trait(?Send)]
impl ResponseSource for ScriptedResponses {
    async fn next_event(&mut self) -> Option<InputEvent> {
        self.queue.pop_front().map(|(_, event)| event)
    }

    fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        let mut kept = Vec::new();
        while self.queue.front().is_some_and(|(early, _)| *early) {
            match self.queue.pop_front() {
                Some((_, InputEvent::Response(_))) => dropped += 1,
                Some((_, event)) => kept.push(event),
                None => break,
            }
        }
        for event in kept.into_iter().rev() {
            self.queue.push_front((false, event));
        }
        dropped
    }
}

/// Live input delivered over a tokio channel
#[derive(Debug)]
pub struct ChannelResponses {
    rx: mpsc::Receiver<InputEvent>,
    /// Control events that arrived during a stimulus
    held: VecDeque<InputEvent>,
}

impl ChannelResponses {
    pub fn new(rx: mpsc::Receiver<InputEvent>) -> Self {
        Self {
            rx,
            held: VecDeque::new(),
        }
    }

    /// Create a connected sender/source pair
    pub fn channel(capacity: usize) -> (mpsc::Sender<InputEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait(?Send)]
impl ResponseSource for ChannelResponses {
    async fn next_event(&mut self) -> Option<InputEvent> {
        if let Some(event) = self.held.pop_front() {
            return Some(event);
        }
        self.rx.recv().await
    }

    fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                InputEvent::Response(_) => dropped += 1,
                other => self.held.push_back(other),
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(
            InputEvent::parse_line(" Y "),
            Some(InputEvent::Response(Response::Heard(true)))
        );
        assert_eq!(
            InputEvent::parse_line("2"),
            Some(InputEvent::Response(Response::Choice(Interval::Second)))
        );
        assert_eq!(
            InputEvent::parse_line("x"),
            Some(InputEvent::Response(Response::Sweep(SweepControl::Inaudible)))
        );
        assert_eq!(
            InputEvent::parse_line("042"),
            Some(InputEvent::Response(Response::Digits("042".into())))
        );
        assert_eq!(InputEvent::parse_line("r"), Some(InputEvent::Replay));
        assert_eq!(InputEvent::parse_line("q"), Some(InputEvent::Quit));
        assert_eq!(InputEvent::parse_line("   "), None);
    }

    #[tokio::test]
    async fn test_scripted_discards_only_early_answers() {
        let mut source = ScriptedResponses::new()
            .early(InputEvent::Response(Response::Heard(true)))
            .respond(Response::Heard(false))
            .early(InputEvent::Replay)
            .early(InputEvent::Response(Response::Heard(true)))
            .early(InputEvent::Quit);

        assert_eq!(source.discard_pending(), 1);
        assert_eq!(
            source.next_event().await,
            Some(InputEvent::Response(Response::Heard(false)))
        );
        assert_eq!(source.discard_pending(), 1);
        assert_eq!(source.next_event().await, Some(InputEvent::Replay));
        assert_eq!(source.next_event().await, Some(InputEvent::Quit));
        assert_eq!(source.next_event().await, None);
    }

    #[tokio::test]
    async fn test_channel_keeps_control_events_during_stimulus() {
        let (tx, mut source) = ChannelResponses::channel(8);
        tx.send(InputEvent::Response(Response::Heard(true))).await.unwrap();
        tx.send(InputEvent::Replay).await.unwrap();
        tx.send(InputEvent::Response(Response::Digits("123".into())))
            .await
            .unwrap();
        assert_eq!(source.discard_pending(), 2);

        tx.send(InputEvent::Quit).await.unwrap();
        drop(tx);
        assert_eq!(source.next_event().await, Some(InputEvent::Replay));
        assert_eq!(source.next_event().await, Some(InputEvent::Quit));
        assert_eq!(source.next_event().await, None);
    }

    #[test]
    fn test_response_serde_shape() {
        let json = serde_json::to_value(Response::Choice(Interval::First)).unwrap();
        assert_eq!(json["type"], "choice");
        assert_eq!(json["value"], "first");
    }
}
