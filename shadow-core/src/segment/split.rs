//! Word-mode splitting of over-long spans.
//!
//! Cut points are spread evenly so no piece exceeds the maximum, then each
//! cut is moved to the quietest frame within ±[`SEARCH_WINDOW_MS`] of its
//! nominal position. Without a clear quiet frame the nominal point is used.

use crate::analysis::EnergyProfile;

use super::Span;

/// Half-width of the low-energy search window around a nominal cut.
pub const SEARCH_WINDOW_MS: u64 = 300;

/// Minimum spread between the loudest and quietest frame in a window for the
/// quietest frame to count as a real pause.
pub const MIN_CONTRAST: f32 = 0.1;

/// Split `span` into pieces of at most `max_ms` (allowing the search window's
/// slack), keeping at least `min_ms` on each side of a cut. Word-mode
/// policies require `max_ms >= 2 * min_ms`, which keeps every even share
/// above `min_ms`.
pub(crate) fn split_span(
    span: Span,
    min_ms: u64,
    max_ms: u64,
    profile: Option<&EnergyProfile>,
) -> Vec<Span> {
    let mut pieces = Vec::new();
    let mut cursor = span.start_ms;

    while span.end_ms - cursor > max_ms {
        let remaining = span.end_ms - cursor;
        let count = remaining.div_ceil(max_ms);
        let nominal = cursor + remaining / count;

        let lo = nominal.saturating_sub(SEARCH_WINDOW_MS).max(cursor + min_ms);
        let hi = (nominal + SEARCH_WINDOW_MS).min(span.end_ms.saturating_sub(min_ms));

        let cut = if lo <= hi {
            profile
                .and_then(|p| quietest_point(p, lo, hi, nominal))
                .unwrap_or(nominal)
        } else {
            nominal
        };
        let cut = cut.clamp(cursor + 1, span.end_ms - 1);

        pieces.push(Span::new(cursor, cut));
        cursor = cut;
    }

    pieces.push(Span::new(cursor, span.end_ms));
    pieces
}

/// Centre of the lowest-scoring frame in `[lo, hi]`, if the window holds a
/// clear dip. Ties go to the frame nearest `nominal`, then the earlier one.
fn quietest_point(profile: &EnergyProfile, lo: u64, hi: u64, nominal: u64) -> Option<u64> {
    let frames = profile.frames_between(lo, hi);
    let (min, max) = frames
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(mn, mx), &(_, s)| {
            (mn.min(s), mx.max(s))
        });
    if frames.is_empty() || max - min < MIN_CONTRAST {
        return None;
    }

    frames
        .iter()
        .filter(|&&(_, s)| s <= min + f32::EPSILON)
        .map(|&(centre, _)| centre)
        .min_by_key(|&centre| (centre.abs_diff(nominal), centre))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FrameScore;

    fn profile(scores: &[f32]) -> EnergyProfile {
        let mut p = EnergyProfile::new(160, 16_000); // 10 ms frames
        for (i, &s) in scores.iter().enumerate() {
            p.push(&FrameScore {
                frame_index: i as u64,
                start_sample: i as u64 * 160,
                sample_count: 160,
                is_speech_candidate: s >= 0.5,
                score: s,
            });
        }
        p
    }

    #[test]
    fn short_span_is_untouched() {
        let pieces = split_span(Span::new(0, 1_500), 300, 2_000, None);
        assert_eq!(pieces, vec![Span::new(0, 1_500)]);
    }

    #[test]
    fn uniform_energy_cuts_at_even_points() {
        let flat = profile(&vec![0.9; 1_500]);
        let pieces = split_span(Span::new(0, 15_000), 300, 2_000, Some(&flat));
        assert_eq!(pieces.len(), 8);
        assert!(pieces.iter().all(|p| p.len() <= 2_000));
        assert_eq!(pieces[0], Span::new(0, 1_875));
        assert_eq!(pieces.last().unwrap().end_ms, 15_000);
    }

    #[test]
    fn tight_bounds_keep_both_pieces_above_min() {
        // max = 2 * min, the tightest word-mode policy accepted
        let mut scores = vec![0.9; 210];
        scores[125] = 0.0; // 1255 ms would leave 845 ms after the cut
        let pieces = split_span(Span::new(0, 2_100), 1_000, 2_000, Some(&profile(&scores)));
        assert_eq!(pieces.len(), 2);
        assert!(pieces.iter().all(|p| (1_000..=2_000).contains(&p.len())), "{pieces:?}");
    }

    #[test]
    fn cut_moves_to_nearby_dip() {
        // 4 s span, max 2 s → nominal cut at 2000 ms; dip at frame 215 (2155 ms)
        let mut scores = vec![0.9; 400];
        scores[215] = 0.1;
        let pieces = split_span(Span::new(0, 4_000), 300, 2_000, Some(&profile(&scores)));
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].end_ms, 2_155);
    }

    #[test]
    fn dip_outside_window_is_ignored() {
        let mut scores = vec![0.9; 400];
        scores[100] = 0.0; // 1005 ms, far from nominal 2000
        let pieces = split_span(Span::new(0, 4_000), 300, 2_000, Some(&profile(&scores)));
        assert_eq!(pieces[0].end_ms, 2_000);
    }

    #[test]
    fn equal_dips_prefer_the_one_nearest_nominal() {
        let mut scores = vec![0.9; 400];
        scores[185] = 0.2; // 1855 ms, 145 from nominal
        scores[205] = 0.2; // 2055 ms, 55 from nominal
        let pieces = split_span(Span::new(0, 4_000), 300, 2_000, Some(&profile(&scores)));
        assert_eq!(pieces[0].end_ms, 2_055);
    }

    #[test]
    fn pieces_are_contiguous() {
        let pieces = split_span(Span::new(1_000, 9_700), 300, 2_000, None);
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].end_ms, pair[1].start_ms);
        }
        assert_eq!(pieces[0].start_ms, 1_000);
        assert_eq!(pieces.last().unwrap().end_ms, 9_700);
    }
}
