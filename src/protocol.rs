//! Message contract shared by the coordinator and every client adapter.
//!
//! This module defines the canonical playback state, playlist entries, and the
//! two message directions: `Command` (client to coordinator) and
//! `ClientMessage` (coordinator to client). Both directions have a JSON wire
//! form tagged by message name.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::ProtocolError;

/// Stable identifier of one connected client window.
pub type ClientId = String;
/// Stable identifier of one playlist entry.
pub type EntryId = String;

/// Repeat behavior applied when navigating beyond the current entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    None, // Stop after reaching the end of playlist
    One,  // Repeat current entry
    All,  // Repeat playlist from the beginning
}

impl RepeatMode {
    /// Next mode in the user-facing cycle order.
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::None => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::None,
        }
    }
}

/// Explicit playback lifecycle of the canonical state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    /// Playback requested; the owner has not reported progress yet.
    Loading,
    Playing,
    Paused,
}

/// Whether a client is currently able to emit audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Not detected yet, or blocked until a user interaction happens.
    #[default]
    Unknown,
    Capable,
    Incapable,
}

/// File-level metadata carried with a playlist entry.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EntryMetadata {
    /// Duration in seconds, when known before playback.
    pub duration_hint: Option<f64>,
    /// File size in bytes.
    pub size: u64,
    pub mime_type: String,
    /// Last modification time in milliseconds since the Unix epoch.
    pub last_modified: u64,
}

/// One playlist row. Never carries a playable resource.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaylistEntry {
    pub id: EntryId,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

/// Client-local resource needed to actually emit sound for one entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct LocalHandle {
    pub entry_id: EntryId,
    /// Resolved location of the media resource.
    pub location: PathBuf,
    /// Provider-assigned acquisition counter, bumped on every re-acquisition.
    pub generation: u64,
}

/// Entry metadata paired with its freshly resolved handle.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ResolvedEntry {
    pub entry: PlaylistEntry,
    pub handle: LocalHandle,
}

/// Canonical playback state owned by the coordinator.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackState {
    pub current_entry_id: Option<EntryId>,
    pub is_playing: bool,
    pub status: PlaybackStatus,
    /// Playback position in seconds.
    pub current_time: f64,
    /// Duration in seconds once reported by the owner.
    pub duration: Option<f64>,
    pub volume: f32,
    pub repeat_mode: RepeatMode,
    pub playlist: Vec<PlaylistEntry>,
    /// `-1` when nothing is selected, otherwise a valid index into `playlist`.
    pub current_index: i64,
    pub active_owner_id: Option<ClientId>,
    pub panel_visible: bool,
    pub panel_collapsed: bool,
    /// Incremented on every explicit seek so the owner can tell user seeks
    /// apart from its own progress reports.
    pub seek_serial: u64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_entry_id: None,
            is_playing: false,
            status: PlaybackStatus::Stopped,
            current_time: 0.0,
            duration: None,
            volume: 1.0,
            repeat_mode: RepeatMode::None,
            playlist: Vec::new(),
            current_index: -1,
            active_owner_id: None,
            panel_visible: true,
            panel_collapsed: false,
            seek_serial: 0,
        }
    }
}

impl PlaybackState {
    /// Current playlist position, if one is selected.
    pub fn current_position(&self) -> Option<usize> {
        usize::try_from(self.current_index)
            .ok()
            .filter(|index| *index < self.playlist.len())
    }

    pub fn index_of(&self, entry_id: &str) -> Option<usize> {
        self.playlist.iter().position(|entry| entry.id == entry_id)
    }
}

/// Persisted subset of the canonical state. Handles and ownership are excluded.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PersistedState {
    pub playlist: Vec<PlaylistEntry>,
    pub current_index: i64,
    pub current_entry_id: Option<EntryId>,
    pub volume: f32,
    pub repeat_mode: RepeatMode,
    #[serde(default = "default_true")]
    pub panel_visible: bool,
    #[serde(default)]
    pub panel_collapsed: bool,
}

fn default_true() -> bool {
    true
}

impl From<&PlaybackState> for PersistedState {
    fn from(state: &PlaybackState) -> Self {
        Self {
            playlist: state.playlist.clone(),
            current_index: state.current_index,
            current_entry_id: state.current_entry_id.clone(),
            volume: state.volume,
            repeat_mode: state.repeat_mode,
            panel_visible: state.panel_visible,
            panel_collapsed: state.panel_collapsed,
        }
    }
}

/// Client-to-coordinator commands. The sender is identified by its connection.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Register {
        can_emit_audio: Capability,
    },
    Unregister,
    Heartbeat,
    ReplacePlaylist {
        entries: Vec<PlaylistEntry>,
        #[serde(default)]
        start_index: Option<usize>,
    },
    AddToPlaylist {
        entries: Vec<PlaylistEntry>,
    },
    RemoveFromPlaylist {
        entry_id: EntryId,
    },
    ClearPlaylist,
    PlayEntry {
        entry: PlaylistEntry,
    },
    TogglePlayPause,
    PlayNext,
    PlayPrevious,
    SeekTo {
        time: f64,
    },
    ChangeVolume {
        volume: f32,
    },
    CycleRepeatMode,
    SetPanelState {
        visible: bool,
        collapsed: bool,
    },
    RequestOwnership,
    ReportCapability {
        can_emit_audio: Capability,
    },
    ReportTime {
        time: f64,
    },
    ReportDuration {
        duration: f64,
    },
    ReportEnded,
    ReportPlaybackError {
        entry_id: EntryId,
        reason: String,
    },
    RequestSpecificEntries {
        ids: Vec<EntryId>,
    },
    UnloadEntries {
        ids: Vec<EntryId>,
    },
    SaveState,
    LoadState,
}

impl Command {
    /// Short tag used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "REGISTER",
            Command::Unregister => "UNREGISTER",
            Command::Heartbeat => "HEARTBEAT",
            Command::ReplacePlaylist { .. } => "REPLACE_PLAYLIST",
            Command::AddToPlaylist { .. } => "ADD_TO_PLAYLIST",
            Command::RemoveFromPlaylist { .. } => "REMOVE_FROM_PLAYLIST",
            Command::ClearPlaylist => "CLEAR_PLAYLIST",
            Command::PlayEntry { .. } => "PLAY_ENTRY",
            Command::TogglePlayPause => "TOGGLE_PLAY_PAUSE",
            Command::PlayNext => "PLAY_NEXT",
            Command::PlayPrevious => "PLAY_PREVIOUS",
            Command::SeekTo { .. } => "SEEK_TO",
            Command::ChangeVolume { .. } => "CHANGE_VOLUME",
            Command::CycleRepeatMode => "CYCLE_REPEAT_MODE",
            Command::SetPanelState { .. } => "SET_PANEL_STATE",
            Command::RequestOwnership => "REQUEST_OWNERSHIP",
            Command::ReportCapability { .. } => "REPORT_CAPABILITY",
            Command::ReportTime { .. } => "REPORT_TIME",
            Command::ReportDuration { .. } => "REPORT_DURATION",
            Command::ReportEnded => "REPORT_ENDED",
            Command::ReportPlaybackError { .. } => "REPORT_PLAYBACK_ERROR",
            Command::RequestSpecificEntries { .. } => "REQUEST_SPECIFIC_ENTRIES",
            Command::UnloadEntries { .. } => "UNLOAD_ENTRIES",
            Command::SaveState => "SAVE_STATE",
            Command::LoadState => "LOAD_STATE",
        }
    }

    /// Telemetry only the elected owner may send.
    pub fn is_owner_telemetry(&self) -> bool {
        matches!(
            self,
            Command::ReportTime { .. }
                | Command::ReportDuration { .. }
                | Command::ReportEnded
                | Command::ReportPlaybackError { .. }
        )
    }
}

/// Coordinator-to-client messages.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    StateUpdate {
        state: PlaybackState,
        active_owner_id: Option<ClientId>,
    },
    /// Sent to the incoming owner only.
    StartAudio {
        state: PlaybackState,
    },
    /// Sent to the outgoing owner only.
    StopAudio,
    EntriesAvailable {
        entries: Vec<ResolvedEntry>,
        missing: Vec<EntryId>,
    },
    LoadStateResponse {
        state: PlaybackState,
    },
    PlaybackError {
        entry_id: EntryId,
        reason: String,
    },
}

pub fn decode_command(payload: &str) -> Result<Command, ProtocolError> {
    Ok(serde_json::from_str(payload)?)
}

pub fn encode_command(command: &Command) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(command)?)
}

pub fn decode_client_message(payload: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(payload)?)
}

pub fn encode_client_message(message: &ClientMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}
