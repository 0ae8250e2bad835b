//! Playlist and transport commands applied to the canonical state.

use log::{debug, info};

use super::{Coordinator, Outcome};
use crate::playlist::{self, Advance};
use crate::protocol::{Command, PersistedState, PlaylistEntry, PlaybackStatus};

impl Coordinator {
    pub(super) fn apply_playback_command(&mut self, command: Command) -> Outcome {
        match command {
            Command::ReplacePlaylist {
                entries,
                start_index,
            } => self.replace_playlist(entries, start_index),
            Command::AddToPlaylist { entries } => self.add_to_playlist(entries),
            Command::RemoveFromPlaylist { entry_id } => self.remove_from_playlist(&entry_id),
            Command::ClearPlaylist => self.clear_playlist(),
            Command::PlayEntry { entry } => self.play_entry(entry),
            Command::TogglePlayPause => self.toggle_play_pause(),
            Command::PlayNext => {
                let advance = playlist::next_for_skip(
                    self.state.playlist.len(),
                    self.state.current_position(),
                    self.state.repeat_mode,
                );
                self.apply_advance(advance)
            }
            Command::PlayPrevious => {
                let advance = playlist::previous_for_skip(
                    self.state.playlist.len(),
                    self.state.current_position(),
                    self.state.repeat_mode,
                );
                self.apply_advance(advance)
            }
            Command::ReportEnded => {
                let advance = playlist::next_for_ended(
                    self.state.playlist.len(),
                    self.state.current_position(),
                    self.state.repeat_mode,
                );
                debug!("Coordinator: entry ended, advancing with {:?}", advance);
                self.apply_advance(advance)
            }
            Command::SeekTo { time } => self.seek_to(time),
            Command::ChangeVolume { volume } => {
                if !volume.is_finite() {
                    return Outcome::Rejected(format!("invalid volume {}", volume));
                }
                let volume = volume.clamp(0.0, 1.0);
                if volume == self.state.volume {
                    return Outcome::Unchanged;
                }
                self.state.volume = volume;
                Outcome::Changed
            }
            Command::CycleRepeatMode => {
                self.state.repeat_mode = self.state.repeat_mode.cycled();
                info!("Coordinator: repeat mode is now {:?}", self.state.repeat_mode);
                Outcome::Changed
            }
            Command::SetPanelState { visible, collapsed } => {
                if self.state.panel_visible == visible && self.state.panel_collapsed == collapsed {
                    return Outcome::Unchanged;
                }
                self.state.panel_visible = visible;
                self.state.panel_collapsed = collapsed;
                Outcome::Changed
            }
            Command::ReportTime { time } => self.report_time(time),
            Command::ReportDuration { duration } => {
                if !duration.is_finite() || duration < 0.0 {
                    return Outcome::Rejected(format!("invalid duration {}", duration));
                }
                self.awaiting_duration_report = false;
                if self.state.duration == Some(duration) {
                    return Outcome::Unchanged;
                }
                self.state.duration = Some(duration);
                if self.state.current_time > duration {
                    self.state.current_time = duration;
                }
                Outcome::Changed
            }
            other => Outcome::Rejected(format!("{} is not a playback command", other.name())),
        }
    }

    /// Playback is requested or running, possibly waiting for an owner.
    pub(super) fn intends_play(&self) -> bool {
        self.state.is_playing || self.resume_on_election
    }

    pub(super) fn begin_playback(&mut self) {
        if self.state.active_owner_id.is_some() {
            self.resume_on_election = false;
            self.state.is_playing = true;
            self.state.status = PlaybackStatus::Loading;
        } else {
            debug!("Coordinator: playback requested without an owner, holding");
            self.resume_on_election = true;
            self.state.is_playing = false;
            self.state.status = PlaybackStatus::Paused;
        }
    }

    fn pause_playback(&mut self) {
        self.resume_on_election = false;
        self.state.is_playing = false;
        self.state.status = PlaybackStatus::Paused;
    }

    pub(super) fn stop_playback(&mut self) {
        self.resume_on_election = false;
        self.state.is_playing = false;
        self.state.status = PlaybackStatus::Stopped;
        self.state.current_time = 0.0;
        self.state.seek_serial += 1;
    }

    /// Moves the cursor. Always bumps `seek_serial` so re-selecting the same
    /// row restarts it on the owner.
    fn select_index(&mut self, index: usize) {
        let entry_id = self.state.playlist[index].id.clone();
        // The owner only rebinds, and reports a duration, for a different entry.
        if self.state.current_entry_id.as_deref() != Some(entry_id.as_str()) {
            self.awaiting_duration_report = true;
        }
        self.state.current_index = index as i64;
        self.state.current_entry_id = Some(entry_id);
        self.state.current_time = 0.0;
        self.state.duration = self.state.playlist[index].metadata.duration_hint;
        self.state.seek_serial += 1;
    }

    fn clear_selection(&mut self) {
        self.state.current_index = -1;
        self.state.current_entry_id = None;
        self.state.duration = None;
        self.stop_playback();
    }

    fn restart_current(&mut self) {
        self.state.current_time = 0.0;
        self.state.seek_serial += 1;
    }

    fn apply_advance(&mut self, advance: Advance) -> Outcome {
        if self.state.playlist.is_empty() {
            return Outcome::Rejected("playlist is empty".to_string());
        }
        let keep_playing = self.intends_play();
        match advance {
            Advance::To(index) => {
                self.select_index(index);
                if keep_playing {
                    self.begin_playback();
                }
            }
            Advance::Restart(index) => {
                if self.state.current_position() == Some(index) {
                    self.restart_current();
                } else {
                    self.select_index(index);
                }
                if keep_playing {
                    self.begin_playback();
                }
            }
            Advance::Stop => {
                info!("Coordinator: reached end of playlist");
                self.stop_playback();
            }
        }
        Outcome::Changed
    }

    fn play_entry(&mut self, entry: PlaylistEntry) -> Outcome {
        match self.state.index_of(&entry.id) {
            Some(index) if self.state.current_position() == Some(index) => {
                if self.intends_play() {
                    return Outcome::Unchanged;
                }
                if self.state.status == PlaybackStatus::Stopped {
                    self.restart_current();
                }
            }
            Some(index) => self.select_index(index),
            None => {
                debug!("Coordinator: appending entry {} before playing it", entry.id);
                self.state.playlist.push(entry);
                self.select_index(self.state.playlist.len() - 1);
            }
        }
        self.begin_playback();
        Outcome::Changed
    }

    fn toggle_play_pause(&mut self) -> Outcome {
        if self.intends_play() {
            self.pause_playback();
            return Outcome::Changed;
        }
        if self.state.current_position().is_none() {
            if self.state.playlist.is_empty() {
                return Outcome::Rejected("nothing to play".to_string());
            }
            self.select_index(0);
        }
        self.begin_playback();
        Outcome::Changed
    }

    fn seek_to(&mut self, time: f64) -> Outcome {
        if !time.is_finite() {
            return Outcome::Rejected(format!("invalid seek target {}", time));
        }
        if self.state.current_position().is_none() {
            return Outcome::Rejected("no current entry".to_string());
        }
        let upper = self.state.duration.unwrap_or(f64::MAX);
        self.state.current_time = time.clamp(0.0, upper.max(0.0));
        self.state.seek_serial += 1;
        Outcome::Changed
    }

    fn report_time(&mut self, time: f64) -> Outcome {
        if !time.is_finite() {
            return Outcome::Rejected(format!("invalid time {}", time));
        }
        if self.awaiting_duration_report {
            // Samples from the previous binding can still be in flight.
            debug!("Coordinator: ignoring time report before the owner bound the entry");
            return Outcome::Unchanged;
        }
        let upper = self.state.duration.unwrap_or(f64::MAX);
        let time = time.clamp(0.0, upper.max(0.0));
        let mut changed = false;
        if self.state.is_playing && self.state.status == PlaybackStatus::Loading {
            self.state.status = PlaybackStatus::Playing;
            changed = true;
        }
        if self.state.current_time != time {
            self.state.current_time = time;
            changed = true;
            if self.state.is_playing {
                self.maybe_save_position();
            }
        }
        if changed {
            Outcome::Changed
        } else {
            Outcome::Unchanged
        }
    }

    fn replace_playlist(
        &mut self,
        entries: Vec<PlaylistEntry>,
        start_index: Option<usize>,
    ) -> Outcome {
        let mut deduped: Vec<PlaylistEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if deduped.iter().any(|existing| existing.id == entry.id) {
                debug!("Coordinator: dropping duplicate entry {}", entry.id);
                continue;
            }
            deduped.push(entry);
        }
        info!("Coordinator: playlist replaced with {} entries", deduped.len());
        self.state.playlist = deduped;

        if let Some(index) = start_index.filter(|index| *index < self.state.playlist.len()) {
            self.select_index(index);
            self.begin_playback();
            return Outcome::Changed;
        }

        let kept = self
            .state
            .current_entry_id
            .clone()
            .and_then(|id| self.state.index_of(&id));
        match kept {
            Some(index) => self.state.current_index = index as i64,
            None => self.clear_selection(),
        }
        Outcome::Changed
    }

    fn add_to_playlist(&mut self, entries: Vec<PlaylistEntry>) -> Outcome {
        let mut added = 0;
        for entry in entries {
            if self.state.index_of(&entry.id).is_some() {
                continue;
            }
            self.state.playlist.push(entry);
            added += 1;
        }
        if added == 0 {
            return Outcome::Unchanged;
        }
        debug!("Coordinator: appended {} entries", added);
        Outcome::Changed
    }

    fn remove_from_playlist(&mut self, entry_id: &str) -> Outcome {
        let Some(removed) = self.state.index_of(entry_id) else {
            return Outcome::Rejected(format!("entry {} is not in the playlist", entry_id));
        };
        let len_before = self.state.playlist.len();
        let current = self.state.current_position();
        self.state.playlist.remove(removed);

        match current {
            Some(current) if current == removed => {
                self.stop_playback();
                match playlist::index_after_removal(len_before, current, removed) {
                    Some(index) => self.select_index(index),
                    None => self.clear_selection(),
                }
            }
            Some(current) if removed < current => {
                self.state.current_index = current as i64 - 1;
            }
            _ => {}
        }
        Outcome::Changed
    }

    fn clear_playlist(&mut self) -> Outcome {
        if self.state.playlist.is_empty() && self.state.current_entry_id.is_none() {
            return Outcome::Unchanged;
        }
        self.state.playlist.clear();
        self.clear_selection();
        Outcome::Changed
    }

    /// Replaces the persisted subset of the canonical state. Playback is left
    /// paused at the stored position.
    pub(super) fn apply_persisted(&mut self, persisted: PersistedState, position: Option<f64>) {
        self.state.playlist = persisted.playlist;
        self.state.volume = if persisted.volume.is_finite() {
            persisted.volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.state.repeat_mode = persisted.repeat_mode;
        self.state.panel_visible = persisted.panel_visible;
        self.state.panel_collapsed = persisted.panel_collapsed;

        let by_id = persisted
            .current_entry_id
            .as_deref()
            .and_then(|id| self.state.index_of(id));
        let by_index = usize::try_from(persisted.current_index)
            .ok()
            .filter(|index| *index < self.state.playlist.len());
        self.resume_on_election = false;
        self.state.is_playing = false;
        match by_id.or(by_index) {
            Some(index) => {
                self.select_index(index);
                self.state.status = PlaybackStatus::Paused;
                let upper = self.state.duration.unwrap_or(f64::MAX);
                self.state.current_time = position
                    .filter(|position| position.is_finite())
                    .unwrap_or(0.0)
                    .clamp(0.0, upper.max(0.0));
            }
            None => self.clear_selection(),
        }
    }
}
