//! Playlist traversal rules shared by explicit navigation and natural track ends.

use crate::protocol::RepeatMode;

/// Where playback goes after the current entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// Move to another index and start from the beginning.
    To(usize),
    /// Restart the same index from the beginning.
    Restart(usize),
    /// End of playlist; stop without moving the cursor.
    Stop,
}

/// Next index for an explicit `PLAY_NEXT` request.
///
/// Repeat-one only affects natural track ends; an explicit skip at the last
/// row wraps like repeat-all.
pub fn next_for_skip(len: usize, current: Option<usize>, repeat_mode: RepeatMode) -> Advance {
    if len == 0 {
        return Advance::Stop;
    }
    let Some(current) = current else {
        return Advance::To(0);
    };
    let next_index = current + 1;
    if next_index < len {
        Advance::To(next_index)
    } else if repeat_mode == RepeatMode::None {
        // End of playlist and repeat is off
        Advance::Stop
    } else {
        Advance::To(0)
    }
}

/// Next index after the owner reported a natural end of the current entry.
pub fn next_for_ended(len: usize, current: Option<usize>, repeat_mode: RepeatMode) -> Advance {
    match (repeat_mode, current) {
        (RepeatMode::One, Some(current)) if current < len => Advance::Restart(current),
        _ => next_for_skip(len, current, repeat_mode),
    }
}

/// Previous index for an explicit `PLAY_PREVIOUS` request.
pub fn previous_for_skip(len: usize, current: Option<usize>, repeat_mode: RepeatMode) -> Advance {
    if len == 0 {
        return Advance::Stop;
    }
    match current {
        None => Advance::To(0),
        Some(0) if repeat_mode == RepeatMode::All && len > 1 => Advance::To(len - 1),
        Some(0) => Advance::Restart(0),
        Some(current) => Advance::To((current - 1).min(len - 1)),
    }
}

/// Current index after removing `removed` from a playlist of `len_before` rows.
///
/// Returns `None` when the playlist becomes empty.
pub fn index_after_removal(len_before: usize, current: usize, removed: usize) -> Option<usize> {
    let len_after = len_before.saturating_sub(1);
    if len_after == 0 {
        return None;
    }
    if removed < current {
        Some(current - 1)
    } else {
        Some(current.min(len_after - 1))
    }
}
