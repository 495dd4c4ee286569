//! Playlist operations
//!
//! Pure data operations on ordered track lists: circular rotation,
//! circular next/prev indexing, collection enrichment, and validation.
//! No I/O; the playback controller owns the list these operate on.

use tonbeat_common::track::Track;

/// Circular left-rotation making `start` index 0
///
/// Finds `start` by identity; if absent the input is returned unchanged.
/// Relative order of the remaining tracks is preserved and no track is
/// mutated.
pub fn rotate(tracks: &[Track], start: &Track) -> Vec<Track> {
    let Some(pos) = tracks.iter().position(|t| t.same_entity(start)) else {
        return tracks.to_vec();
    };

    let mut rotated = Vec::with_capacity(tracks.len());
    rotated.extend_from_slice(&tracks[pos..]);
    rotated.extend_from_slice(&tracks[..pos]);
    rotated
}

/// Circular successor index; -1 when the list is empty
pub fn next_index(i: i64, n: usize) -> i64 {
    if n == 0 {
        return -1;
    }
    (i + 1).rem_euclid(n as i64)
}

/// Circular predecessor index; -1 when the list is empty
pub fn prev_index(i: i64, n: usize) -> i64 {
    if n == 0 {
        return -1;
    }
    (i - 1).rem_euclid(n as i64)
}

/// Copy the reference track's collection onto tracks lacking one
///
/// Only missing collection data is filled; present data is never
/// overwritten. Idempotent.
pub fn enrich_with_collection(tracks: &mut [Track], reference: &Track) {
    let Some(collection) = &reference.collection else {
        return;
    };
    if collection.address.is_empty() {
        return;
    }

    for track in tracks.iter_mut() {
        let missing = track
            .collection
            .as_ref()
            .map(|c| c.address.is_empty())
            .unwrap_or(true);
        if missing {
            track.collection = Some(collection.clone());
        }
    }
}

/// Non-empty sequence of identifiable tracks
pub fn validate(tracks: &[Track]) -> bool {
    !tracks.is_empty() && tracks.iter().all(|t| t.key().is_some())
}
