//! E2E tests for gain envelopes
//!
//! Sampling an envelope at its own breakpoints must give back the requested
//! gains, and every envelope stays within [0, 1] and ends silent.

use approx::assert_abs_diff_eq;
use hearingtest::audio::envelope::{build_gapped_envelope, build_simple_envelope, Envelope};

fn assert_round_trip(envelope: &Envelope) {
    for bp in envelope.breakpoints() {
        assert_abs_diff_eq!(envelope.gain_at(bp.offset_sec), bp.target_gain, epsilon = 1e-5);
    }
}

fn assert_bounded_and_silent_at_end(envelope: &Envelope) {
    let rendered = envelope.render(48000, (envelope.total_duration() * 48000.0) as usize + 1);
    assert!(rendered.iter().all(|g| (0.0..=1.0).contains(g)));
    assert_eq!(envelope.gain_at(envelope.total_duration()), 0.0);
}

#[test]
fn test_gapped_envelope_round_trip() {
    let cases = [
        (0.5, 0.2375, 0.025, 1.0, true),
        (0.5, 0.2375, 0.025, 1.0, false),
        (0.5, 0.249, 0.002, 5.0, true),
        (1.0, 0.0, 0.1, 5.0, true),
        (1.0, 0.95, 0.2, 5.0, false),
        (0.3, 0.1, 0.05, 0.0, true),
    ];
    for (total, gap_start, gap_len, fade_ms, use_fades) in cases {
        let envelope = build_gapped_envelope(total, gap_start, gap_len, fade_ms, use_fades).unwrap();
        assert_round_trip(&envelope);
        assert_bounded_and_silent_at_end(&envelope);
    }
}

#[test]
fn test_simple_envelope_round_trip() {
    for (total, fade_ms) in [(1.0, 5.0), (0.01, 20.0), (0.5, 0.0)] {
        let envelope = build_simple_envelope(total, fade_ms).unwrap();
        assert_round_trip(&envelope);
        assert_bounded_and_silent_at_end(&envelope);
    }
}

#[test]
fn test_gap_is_silent_inside_window() {
    let envelope = build_gapped_envelope(0.5, 0.2, 0.05, 1.0, true).unwrap();
    for i in 0..50 {
        let t = 0.2 + 0.05 * i as f64 / 50.0;
        assert_eq!(envelope.gain_at(t), 0.0, "gain inside gap at {t}s");
    }
    assert_eq!(envelope.gain_at(0.1), 1.0);
    assert_eq!(envelope.gain_at(0.4), 1.0);
}

#[test]
fn test_stepped_gap_has_no_ramps_at_gap_edges() {
    let envelope = build_gapped_envelope(0.5, 0.2, 0.05, 5.0, false).unwrap();
    assert_eq!(envelope.gain_at(0.1999), 1.0);
    assert_eq!(envelope.gain_at(0.2501), 1.0);
}
