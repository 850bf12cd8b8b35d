//! Overlap deduplication: chunks are decoded with deliberate overlap so nothing at a chunk
//! boundary gets cut off mid-word, which means consecutive chunks' segment lists repeat
//! whatever fell inside the overlap. This merges that repetition back out.

use crate::segment::TranscriptionSegment;

const MAX_SEARCH_WORDS: usize = 10;
const JACCARD_THRESHOLD: f64 = 0.8;

/// Join segments from consecutive overlapping chunks into one timeline, trimming the
/// duplicated words at each boundary.
///
/// `overlap_seconds` is the chunker's configured overlap; a boundary is only a dedup candidate
/// if the two segments' absolute times actually overlap within that window, matching
/// `_remove_overlap_duplicates`'s `overlap_start < overlap_end` gate.
///
/// Idempotent: running this again on its own output is a no-op. Never increases the total
/// word count relative to the naive concatenation of its inputs.
pub fn dedup_overlap(chunks: &[Vec<TranscriptionSegment>], overlap_seconds: f32) -> Vec<TranscriptionSegment> {
    let mut merged: Vec<TranscriptionSegment> = Vec::new();

    for chunk_segments in chunks {
        if merged.is_empty() {
            merged.extend(chunk_segments.iter().cloned());
            continue;
        }

        let Some(next_head) = chunk_segments.first() else {
            continue;
        };
        let prev_tail = merged.last().expect("checked non-empty above");

        if overlap_window_is_empty(prev_tail, next_head, overlap_seconds) {
            merged.extend(chunk_segments.iter().cloned());
            continue;
        }

        if let Some(overlap_words) = find_overlap(&prev_tail.text, &next_head.text) {
            if overlap_words > 0 {
                let trimmed = drop_leading_words(&next_head.text, overlap_words);
                if trimmed.is_empty() && chunk_segments.len() > 1 {
                    merged.extend(chunk_segments[1..].iter().cloned());
                    continue;
                }

                let mut first = next_head.clone();
                first.text = trimmed;
                merged.push(first);
                merged.extend(chunk_segments[1..].iter().cloned());
                continue;
            }
        }

        merged.extend(chunk_segments.iter().cloned());
    }

    merged
}

/// `[max(cur.start, next.start − overlap), min(cur.end, next.start + overlap)]`; empty means
/// the two segments don't actually share any boundary window, so dedup must not run.
fn overlap_window_is_empty(cur: &TranscriptionSegment, next: &TranscriptionSegment, overlap_seconds: f32) -> bool {
    let window_start = cur.start_seconds.max(next.start_seconds - overlap_seconds);
    let window_end = cur.end_seconds.min(next.start_seconds + overlap_seconds);
    window_start >= window_end
}

/// Returns how many of `next`'s leading words duplicate `prev`'s trailing words, searching
/// from the largest plausible overlap down to 1 and preferring the longest match: at each
/// length, an exact match or a Jaccard match both settle it before a shorter length is tried.
fn find_overlap(prev: &str, next: &str) -> Option<usize> {
    let prev_words: Vec<&str> = prev.split_whitespace().collect();
    let next_words: Vec<&str> = next.split_whitespace().collect();
    if prev_words.is_empty() || next_words.is_empty() {
        return None;
    }

    let max_len = prev_words.len().min(next_words.len()).min(MAX_SEARCH_WORDS);

    for len in (1..=max_len).rev() {
        let tail = &prev_words[prev_words.len() - len..];
        let head = &next_words[..len];

        if words_match_exact(tail, head) || jaccard_similarity(tail, head) >= JACCARD_THRESHOLD {
            return Some(len);
        }
    }

    None
}

fn words_match_exact(a: &[&str], b: &[&str]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.eq_ignore_ascii_case(y))
}

fn jaccard_similarity(a: &[&str], b: &[&str]) -> f64 {
    use std::collections::HashSet;

    let set_a: HashSet<String> = a.iter().map(|w| w.to_ascii_lowercase()).collect();
    let set_b: HashSet<String> = b.iter().map(|w| w.to_ascii_lowercase()).collect();

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 { 0.0 } else { intersection as f64 / union as f64 }
}

fn drop_leading_words(text: &str, count: usize) -> String {
    text.split_whitespace().skip(count).collect::<Vec<_>>().join(" ")
}
