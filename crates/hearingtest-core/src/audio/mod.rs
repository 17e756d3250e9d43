//! Audio processing module
//!
//! This module contains all stimulus-related functionality including:
//! - Tone and band-limited noise synthesis ([`signal`])
//! - Piecewise gain envelopes with fades and gaps ([`envelope`])
//! - Left/right ear routing ([`routing`])
//! - Sample-accurate scheduling against a playback clock ([`player`])
//! - A deterministic virtual-clock backend ([`offline`])
//! - Real output through cpal ([`engine`], feature `device`)
//! - Recorded digit-triplet assets ([`assets`])

pub mod assets;
#[cfg(feature = "device")]
pub mod engine;
pub mod envelope;
pub mod offline;
pub mod player;
pub mod routing;
pub mod signal;
