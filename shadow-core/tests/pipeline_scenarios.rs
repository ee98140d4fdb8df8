//! End-to-end segmentation on synthetic audio.
//!
//! Speech is stood in for by a loud sine tone; silence is digital zero.

use shadow_core::{
    segment::SEARCH_WINDOW_MS, segment_pcm, Preset, SegmentationMode, SegmentationPolicy,
    ShadowError,
};

const RATE: u32 = 16_000;

/// Frame size plus confirm window: how far a boundary may sit from the
/// true edge of a tone.
const EDGE_TOLERANCE_MS: u64 = 120;

fn tone(ms: u64) -> Vec<i16> {
    (0..ms * 16)
        .map(|i| ((i as f32 * 0.2).sin() * 12_000.0) as i16)
        .collect()
}

fn silence(ms: u64) -> Vec<i16> {
    vec![0; (ms * 16) as usize]
}

/// Concatenate (is_speech, ms) parts.
fn track(parts: &[(bool, u64)]) -> Vec<i16> {
    parts
        .iter()
        .flat_map(|&(speech, ms)| if speech { tone(ms) } else { silence(ms) })
        .collect()
}

fn assert_well_formed(pcm: &[i16], policy: &SegmentationPolicy) {
    let seg = segment_pcm(pcm, RATE, policy).unwrap();
    let duration_ms = pcm.len() as u64 * 1_000 / u64::from(RATE);
    let mut prev_end = 0;
    for (i, s) in seg.segments.iter().enumerate() {
        assert_eq!(s.order_index as usize, i);
        assert!(s.start_ms < s.end_ms, "{s:?}");
        assert!(s.start_ms >= prev_end, "overlap at {s:?}");
        assert!(s.end_ms <= duration_ms, "{s:?} past {duration_ms}");
        prev_end = s.end_ms;
    }
}

#[test]
fn ten_seconds_of_silence_yields_no_speech() {
    let pcm = silence(10_000);
    let policy = SegmentationPolicy::preset(Preset::Sentences);
    let seg = segment_pcm(&pcm, RATE, &policy).unwrap();
    assert!(seg.is_empty());
    assert_eq!(seg.stats.raw_spans, 0);

    let err = seg.into_result().unwrap_err();
    assert!(matches!(
        err,
        ShadowError::NoSpeechDetected { raw_spans: 0, .. }
    ));
}

#[test]
fn three_bursts_become_three_padded_segments() {
    let pcm = track(&[
        (false, 1_000),
        (true, 1_500),
        (false, 1_500),
        (true, 1_500),
        (false, 1_500),
        (true, 1_500),
        (false, 1_000),
    ]);
    let policy = SegmentationPolicy::preset(Preset::Sentences);
    let seg = segment_pcm(&pcm, RATE, &policy).unwrap();
    assert_eq!(seg.len(), 3, "{:?}", seg.boundaries());

    let bursts = [(1_000u64, 2_500u64), (4_000, 5_500), (7_000, 8_500)];
    for (s, &(start, end)) in seg.segments.iter().zip(bursts.iter()) {
        let want_start = start - policy.padding_ms();
        let want_end = end + policy.padding_ms();
        assert!(
            s.start_ms.abs_diff(want_start) <= EDGE_TOLERANCE_MS,
            "start {} vs {want_start}",
            s.start_ms
        );
        assert!(
            s.end_ms.abs_diff(want_end) <= EDGE_TOLERANCE_MS,
            "end {} vs {want_end}",
            s.end_ms
        );
    }
    assert!(seg.warnings.is_empty());
}

#[test]
fn word_mode_splits_continuous_speech() {
    let pcm = track(&[(false, 500), (true, 15_000), (false, 500)]);
    let policy = SegmentationPolicy::builder(SegmentationMode::Word)
        .min_duration_ms(300)
        .max_duration_ms(2_000)
        .silence_threshold_ms(400)
        .padding_ms(150)
        .build()
        .unwrap();
    let seg = segment_pcm(&pcm, RATE, &policy).unwrap();

    assert!(seg.len() >= 7, "only {} segments", seg.len());
    assert!(seg.stats.split_added > 0);
    for s in &seg.segments {
        assert!(
            s.duration_ms() <= policy.max_duration_ms() + SEARCH_WINDOW_MS,
            "{s:?} too long"
        );
        assert!(s.duration_ms() >= policy.min_duration_ms(), "{s:?} too short");
    }
    assert_well_formed(&pcm, &policy);
}

#[test]
fn sentence_mode_keeps_long_span_whole() {
    let pcm = track(&[(false, 500), (true, 15_000), (false, 1_000)]);
    let policy = SegmentationPolicy::preset(Preset::Short);
    let seg = segment_pcm(&pcm, RATE, &policy).unwrap();
    assert_eq!(seg.len(), 1);
    assert!(seg.segments[0].duration_ms() > policy.max_duration_ms());
}

#[test]
fn short_dip_does_not_split_a_segment() {
    // 200 ms of silence is well under the 700 ms sentence threshold.
    let pcm = track(&[
        (false, 800),
        (true, 1_000),
        (false, 200),
        (true, 1_000),
        (false, 1_500),
    ]);
    let policy = SegmentationPolicy::preset(Preset::Sentences);
    let seg = segment_pcm(&pcm, RATE, &policy).unwrap();
    assert_eq!(seg.len(), 1, "{:?}", seg.boundaries());
    assert!(seg.segments[0].duration_ms() >= 2_200);
}

#[test]
fn isolated_blip_is_dropped_with_warning() {
    let pcm = track(&[(false, 2_000), (true, 150), (false, 3_000)]);
    let policy = SegmentationPolicy::preset(Preset::Long);
    let seg = segment_pcm(&pcm, RATE, &policy).unwrap();
    assert!(seg.is_empty());
    assert_eq!(seg.stats.raw_spans, 1);
    assert_eq!(seg.stats.dropped, 1);
    assert_eq!(seg.warnings.len(), 1);
    assert!(matches!(
        seg.into_result(),
        Err(ShadowError::NoSpeechDetected { raw_spans: 1, dropped: 1 })
    ));
}

#[test]
fn speech_running_to_the_end_closes_at_source_end() {
    let pcm = track(&[(false, 1_000), (true, 2_000)]);
    let policy = SegmentationPolicy::preset(Preset::Sentences);
    let seg = segment_pcm(&pcm, RATE, &policy).unwrap();
    assert_eq!(seg.len(), 1);
    assert_eq!(seg.segments[0].end_ms, 3_000);
}

#[test]
fn segmentation_is_deterministic() {
    let pcm = track(&[
        (false, 700),
        (true, 2_300),
        (false, 900),
        (true, 600),
        (false, 400),
        (true, 4_100),
        (false, 1_200),
    ]);
    for preset in Preset::ALL {
        let policy = SegmentationPolicy::preset(preset);
        let a = segment_pcm(&pcm, RATE, &policy).unwrap();
        let b = segment_pcm(&pcm, RATE, &policy).unwrap();
        assert_eq!(a.segments, b.segments, "preset {preset}");
        assert_eq!(a.stats, b.stats, "preset {preset}");
        assert_well_formed(&pcm, &policy);
    }
}
