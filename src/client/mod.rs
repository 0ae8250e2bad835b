//! Client adapter: one window's view of the shared player.
//!
//! Every adapter keeps a projection of the canonical state and turns user
//! actions into commands. The adapter the coordinator elected as owner also
//! drives its `AudioOutput` from that projection and reports playback
//! progress back.

mod output;
mod telemetry;

use std::collections::HashMap;
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::ClientConfig;
use crate::coordinator::ClientLink;
use crate::error::OutputError;
use crate::protocol::{
    Capability, ClientId, ClientMessage, Command, EntryId, LocalHandle, PlaybackState,
    PlaybackStatus, PlaylistEntry, ResolvedEntry,
};

pub use output::{AudioOutput, OutputEvent, VirtualOutput};
use telemetry::{EntryRequestDebouncer, TimeReporter};

/// Notifications for whatever renders this client.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    OwnershipGained,
    OwnershipLost,
    EntryBound { entry_id: EntryId },
    PlaybackError { entry_id: EntryId, reason: String },
    StateLoaded,
    CoordinatorGone,
}

struct Binding {
    entry_id: EntryId,
    generation: u64,
}

pub struct ClientAdapter {
    client_id: ClientId,
    link: ClientLink,
    output: Box<dyn AudioOutput>,
    config: ClientConfig,
    projection: PlaybackState,
    is_owner: bool,
    handles: HashMap<EntryId, LocalHandle>,
    binding: Option<Binding>,
    /// No duration reported yet for the binding; seeks and play wait for it.
    awaiting_metadata: bool,
    pending_seek: Option<f64>,
    applied_seek_serial: u64,
    applied_volume: Option<f32>,
    output_playing: bool,
    /// Entry whose handle was already re-acquired once.
    retried_entry: Option<EntryId>,
    /// Entry given up on; not rebound until the selection changes.
    failed_entry: Option<EntryId>,
    time_reporter: TimeReporter,
    entry_requests: EntryRequestDebouncer,
    events: Vec<AdapterEvent>,
    last_heartbeat: Option<Instant>,
    coordinator_gone: bool,
}

impl ClientAdapter {
    pub fn new(
        client_id: ClientId,
        link: ClientLink,
        output: Box<dyn AudioOutput>,
        config: ClientConfig,
    ) -> Self {
        Self {
            time_reporter: TimeReporter::new(config.report_time_coalesce()),
            entry_requests: EntryRequestDebouncer::new(config.entry_request_debounce()),
            client_id,
            link,
            output,
            config,
            projection: PlaybackState::default(),
            is_owner: false,
            handles: HashMap::new(),
            binding: None,
            awaiting_metadata: false,
            pending_seek: None,
            applied_seek_serial: 0,
            applied_volume: None,
            output_playing: false,
            retried_entry: None,
            failed_entry: None,
            events: Vec::new(),
            last_heartbeat: None,
            coordinator_gone: false,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn projection(&self) -> &PlaybackState {
        &self.projection
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub fn has_local_handle(&self, entry_id: &str) -> bool {
        self.handles.contains_key(entry_id)
    }

    pub fn take_events(&mut self) -> Vec<AdapterEvent> {
        std::mem::take(&mut self.events)
    }

    /// Registers with the coordinator using the detected capability.
    pub fn start(&mut self) {
        let capability = self.output.detect_capability();
        info!(
            "ClientAdapter[{}]: registering with capability {:?}",
            self.client_id, capability
        );
        self.send(Command::Register {
            can_emit_audio: capability,
        });
        self.last_heartbeat = Some(Instant::now());
    }

    /// Runs one iteration. Returns `false` once the coordinator is gone.
    pub fn pump(&mut self) -> bool {
        while let Some(message) = self.link.try_recv() {
            self.handle_message(message);
        }
        if self.link.is_closed() {
            self.mark_coordinator_gone();
        }
        if self.coordinator_gone {
            return false;
        }

        if self.is_owner {
            for event in self.output.poll_events() {
                self.handle_output_event(event);
            }
        }
        self.flush_outbound(Instant::now());
        !self.coordinator_gone
    }

    /// Pumps until the coordinator goes away.
    pub fn run(&mut self) {
        let idle = self.config.idle_loop_sleep();
        while self.pump() {
            thread::sleep(idle);
        }
        debug!("ClientAdapter[{}]: run loop exited", self.client_id);
    }

    /// Unregisters and releases the output.
    pub fn shutdown(mut self) {
        self.release_binding();
        self.send(Command::Unregister);
    }

    // User actions.

    pub fn replace_playlist(&mut self, entries: Vec<PlaylistEntry>, start_index: Option<usize>) {
        self.send(Command::ReplacePlaylist {
            entries,
            start_index,
        });
    }

    pub fn add_to_playlist(&mut self, entries: Vec<PlaylistEntry>) {
        self.send(Command::AddToPlaylist { entries });
    }

    pub fn remove_from_playlist(&mut self, entry_id: &str) {
        self.send(Command::RemoveFromPlaylist {
            entry_id: entry_id.to_string(),
        });
    }

    pub fn clear_playlist(&mut self) {
        self.send(Command::ClearPlaylist);
    }

    pub fn play_entry(&mut self, entry: PlaylistEntry) {
        self.send(Command::PlayEntry { entry });
    }

    pub fn toggle_play_pause(&mut self) {
        self.send(Command::TogglePlayPause);
    }

    pub fn play_next(&mut self) {
        self.send(Command::PlayNext);
    }

    pub fn play_previous(&mut self) {
        self.send(Command::PlayPrevious);
    }

    pub fn seek_to(&mut self, time: f64) {
        self.send(Command::SeekTo { time });
    }

    pub fn change_volume(&mut self, volume: f32) {
        self.send(Command::ChangeVolume { volume });
    }

    pub fn cycle_repeat_mode(&mut self) {
        self.send(Command::CycleRepeatMode);
    }

    pub fn set_panel_state(&mut self, visible: bool, collapsed: bool) {
        self.send(Command::SetPanelState { visible, collapsed });
    }

    pub fn save_state(&mut self) {
        self.send(Command::SaveState);
    }

    pub fn load_state(&mut self) {
        self.send(Command::LoadState);
    }

    pub fn request_ownership(&mut self) {
        self.send(Command::RequestOwnership);
    }

    /// Re-checks the output after a user interaction and reports the result.
    pub fn notify_user_gesture(&mut self) {
        self.output.on_user_gesture();
        let capability = self.output.detect_capability();
        self.send(Command::ReportCapability {
            can_emit_audio: capability,
        });
        if capability == Capability::Capable
            && self.config.claim_ownership_on_gesture
            && !self.is_owner
        {
            self.send(Command::RequestOwnership);
        }
    }

    fn send(&mut self, command: Command) {
        if self.coordinator_gone {
            return;
        }
        if !self.link.send(command) {
            self.mark_coordinator_gone();
        }
    }

    fn mark_coordinator_gone(&mut self) {
        if self.coordinator_gone {
            return;
        }
        warn!(
            "ClientAdapter[{}]: coordinator connection closed",
            self.client_id
        );
        self.coordinator_gone = true;
        self.release_binding();
        self.is_owner = false;
        self.events.push(AdapterEvent::CoordinatorGone);
    }

    fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::StateUpdate {
                state,
                active_owner_id,
            } => {
                let owned = active_owner_id.as_deref() == Some(self.client_id.as_str());
                if self.is_owner && !owned {
                    self.lose_ownership();
                }
                self.apply_projection(state);
                if owned && !self.is_owner {
                    self.gain_ownership();
                }
                self.sync_output();
            }
            ClientMessage::StartAudio { state } => {
                self.apply_projection(state);
                self.gain_ownership();
                self.sync_output();
            }
            ClientMessage::StopAudio => {
                if self.is_owner {
                    self.lose_ownership();
                }
            }
            ClientMessage::EntriesAvailable { entries, missing } => {
                self.accept_entries(entries, missing);
                self.sync_output();
            }
            ClientMessage::LoadStateResponse { state } => {
                self.apply_projection(state);
                self.events.push(AdapterEvent::StateLoaded);
                self.sync_output();
            }
            ClientMessage::PlaybackError { entry_id, reason } => {
                if !self.is_owner {
                    self.events
                        .push(AdapterEvent::PlaybackError { entry_id, reason });
                }
            }
        }
    }

    fn apply_projection(&mut self, state: PlaybackState) {
        let entry_changed = state.current_entry_id != self.projection.current_entry_id;
        let restarted = state.is_playing && !self.projection.is_playing;
        if entry_changed || restarted {
            self.retried_entry = None;
            self.failed_entry = None;
        }
        self.projection = state;
    }

    fn gain_ownership(&mut self) {
        if self.is_owner {
            return;
        }
        info!("ClientAdapter[{}]: now the output owner", self.client_id);
        self.is_owner = true;
        self.binding = None;
        self.events.push(AdapterEvent::OwnershipGained);
    }

    /// Releases the binding before anything else from the new state is applied.
    fn lose_ownership(&mut self) {
        info!("ClientAdapter[{}]: output ownership lost", self.client_id);
        self.release_binding();
        self.is_owner = false;
        self.entry_requests.clear();
        if !self.handles.is_empty() {
            let ids: Vec<EntryId> = self.handles.drain().map(|(id, _)| id).collect();
            self.send(Command::UnloadEntries { ids });
        }
        self.events.push(AdapterEvent::OwnershipLost);
    }

    fn release_binding(&mut self) {
        if self.binding.take().is_some() || self.output_playing {
            self.output.release();
        }
        self.output_playing = false;
        self.awaiting_metadata = false;
        self.pending_seek = None;
        self.applied_volume = None;
        self.time_reporter.clear();
    }

    fn accept_entries(&mut self, entries: Vec<ResolvedEntry>, missing: Vec<EntryId>) {
        self.entry_requests
            .settle(entries.iter().map(|resolved| &resolved.entry.id));
        self.entry_requests.settle(missing.iter());
        for resolved in entries {
            debug!(
                "ClientAdapter[{}]: handle for {} (generation {})",
                self.client_id, resolved.entry.id, resolved.handle.generation
            );
            self.handles.insert(resolved.entry.id, resolved.handle);
        }
        if !self.is_owner {
            return;
        }
        let current = self.projection.current_entry_id.clone();
        if let Some(entry_id) = current.filter(|id| missing.contains(id)) {
            self.give_up(&entry_id, "entry could not be resolved".to_string());
        }
    }

    /// Drives the output from the projection. Owner only.
    fn sync_output(&mut self) {
        if !self.is_owner {
            return;
        }
        let Some(entry_id) = self.projection.current_entry_id.clone() else {
            self.release_binding();
            return;
        };
        if self.failed_entry.as_deref() == Some(entry_id.as_str()) {
            return;
        }

        let bound_current = match (&self.binding, self.handles.get(&entry_id)) {
            (Some(binding), Some(handle)) => {
                binding.entry_id == entry_id && binding.generation == handle.generation
            }
            _ => false,
        };
        if !bound_current {
            self.release_binding();
            if !self.handles.contains_key(&entry_id) {
                debug!(
                    "ClientAdapter[{}]: no local handle for {}, requesting it",
                    self.client_id, entry_id
                );
                self.entry_requests.queue(&entry_id, Instant::now());
                return;
            }
            if !self.bind(&entry_id) {
                return;
            }
        }

        self.apply_transport();
    }

    fn bind(&mut self, entry_id: &str) -> bool {
        let Some(handle) = self.handles.get(entry_id).cloned() else {
            return false;
        };
        let entry = self
            .projection
            .playlist
            .iter()
            .find(|entry| entry.id == entry_id)
            .cloned()
            .unwrap_or_else(|| PlaylistEntry {
                id: entry_id.to_string(),
                ..PlaylistEntry::default()
            });

        match self.output.load(&entry, &handle) {
            Ok(()) => {
                debug!(
                    "ClientAdapter[{}]: bound {} from {}",
                    self.client_id,
                    entry_id,
                    handle.location.display()
                );
                self.binding = Some(Binding {
                    entry_id: entry_id.to_string(),
                    generation: handle.generation,
                });
                self.awaiting_metadata = true;
                let resume_at = self.projection.current_time;
                self.pending_seek = (resume_at > 0.0).then_some(resume_at);
                self.applied_seek_serial = self.projection.seek_serial;
                self.events.push(AdapterEvent::EntryBound {
                    entry_id: entry_id.to_string(),
                });
                self.prune_handles();
                true
            }
            Err(err) => {
                self.handle_failure(entry_id, err);
                false
            }
        }
    }

    /// Applies volume, seek and play state to an existing binding.
    fn apply_transport(&mut self) {
        if self.binding.is_none() {
            return;
        }
        if self.applied_volume != Some(self.projection.volume) {
            self.output.set_volume(self.projection.volume);
            self.applied_volume = Some(self.projection.volume);
        }

        if self.projection.seek_serial != self.applied_seek_serial {
            self.applied_seek_serial = self.projection.seek_serial;
            if self.awaiting_metadata {
                self.pending_seek = Some(self.projection.current_time);
            } else {
                self.output.seek(self.projection.current_time);
                self.time_reporter.clear();
            }
        }

        if self.awaiting_metadata {
            return;
        }
        let wants_playing = self.projection.is_playing
            && matches!(
                self.projection.status,
                PlaybackStatus::Loading | PlaybackStatus::Playing
            );
        if wants_playing && !self.output_playing {
            self.output.play();
            self.output_playing = true;
        } else if !wants_playing && self.output_playing {
            self.output.pause();
            self.output_playing = false;
        }
    }

    fn handle_output_event(&mut self, event: OutputEvent) {
        if self.binding.is_none() {
            return;
        }
        match event {
            OutputEvent::Duration(duration) => {
                self.send(Command::ReportDuration { duration });
                self.awaiting_metadata = false;
                if let Some(time) = self.pending_seek.take() {
                    debug!(
                        "ClientAdapter[{}]: resuming at {:.2}s",
                        self.client_id, time
                    );
                    self.output.seek(time.min(duration));
                }
                self.apply_transport();
            }
            OutputEvent::Progress(time) => self.time_reporter.record(time),
            OutputEvent::Ended => {
                self.output_playing = false;
                self.time_reporter.clear();
                self.send(Command::ReportEnded);
            }
            OutputEvent::Failed(err) => {
                if let Some(entry_id) = self.binding.as_ref().map(|b| b.entry_id.clone()) {
                    self.handle_failure(&entry_id, err);
                }
            }
        }
    }

    /// Re-acquires the handle once, then reports the entry as unplayable.
    fn handle_failure(&mut self, entry_id: &str, err: OutputError) {
        self.release_binding();
        self.handles.remove(entry_id);
        if self.retried_entry.as_deref() == Some(entry_id) {
            self.give_up(entry_id, err.to_string());
            return;
        }
        warn!(
            "ClientAdapter[{}]: {} failed ({}), re-acquiring handle",
            self.client_id, entry_id, err
        );
        self.retried_entry = Some(entry_id.to_string());
        self.entry_requests.queue(entry_id, Instant::now());
    }

    fn give_up(&mut self, entry_id: &str, reason: String) {
        warn!(
            "ClientAdapter[{}]: giving up on {}: {}",
            self.client_id, entry_id, reason
        );
        self.release_binding();
        self.failed_entry = Some(entry_id.to_string());
        self.events.push(AdapterEvent::PlaybackError {
            entry_id: entry_id.to_string(),
            reason: reason.clone(),
        });
        self.send(Command::ReportPlaybackError {
            entry_id: entry_id.to_string(),
            reason,
        });
    }

    /// Drops handles for entries far from the current one.
    fn prune_handles(&mut self) {
        let Some(center) = self.projection.current_position() else {
            return;
        };
        let radius = self.config.handle_keep_radius;
        let bound = self.binding.as_ref().map(|binding| binding.entry_id.clone());
        let mut released: Vec<EntryId> = self
            .handles
            .keys()
            .filter(|id| Some(*id) != bound.as_ref())
            .filter(|id| match self.projection.index_of(id) {
                Some(index) => index.abs_diff(center) > radius,
                None => true,
            })
            .cloned()
            .collect();
        if released.is_empty() {
            return;
        }
        released.sort();
        for id in &released {
            self.handles.remove(id);
        }
        debug!(
            "ClientAdapter[{}]: releasing {} distant handles",
            self.client_id,
            released.len()
        );
        self.send(Command::UnloadEntries { ids: released });
    }

    fn flush_outbound(&mut self, now: Instant) {
        if let Some(time) = self.time_reporter.take_ready() {
            if self.is_owner {
                self.send(Command::ReportTime { time });
            }
        }
        if let Some(ids) = self.entry_requests.take_due(now) {
            if !ids.is_empty() {
                self.send(Command::RequestSpecificEntries { ids });
            }
        }
        let heartbeat_due = self
            .last_heartbeat
            .map(|last| now.saturating_duration_since(last) >= self.config.heartbeat_interval())
            .unwrap_or(false);
        if heartbeat_due {
            self.send(Command::Heartbeat);
            self.last_heartbeat = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{spawn_coordinator, Inbound};
    use crate::db_manager::DbManager;
    use crate::file_provider::PathFileProvider;
    use crate::config::{CoordinatorConfig, PersistenceConfig};
    use std::path::PathBuf;
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

    #[derive(Debug, Clone, PartialEq)]
    enum OutputCall {
        Load(String),
        Play,
        Pause,
        Seek(f64),
        SetVolume(f32),
        Release,
    }

    struct RecordingOutput {
        capability: Capability,
        gesture_capability: Capability,
        fail_loads: bool,
        auto_duration: Option<f64>,
        calls: Arc<Mutex<Vec<OutputCall>>>,
        queued_events: Arc<Mutex<Vec<OutputEvent>>>,
    }

    impl RecordingOutput {
        fn new(capability: Capability) -> Self {
            Self {
                capability,
                gesture_capability: capability,
                fail_loads: false,
                auto_duration: None,
                calls: Arc::new(Mutex::new(Vec::new())),
                queued_events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn record(&self, call: OutputCall) {
            self.calls.lock().expect("calls lock").push(call);
        }
    }

    impl AudioOutput for RecordingOutput {
        fn detect_capability(&mut self) -> Capability {
            self.capability
        }

        fn on_user_gesture(&mut self) {
            self.capability = self.gesture_capability;
        }

        fn load(&mut self, entry: &PlaylistEntry, _handle: &LocalHandle) -> Result<(), OutputError> {
            self.record(OutputCall::Load(entry.id.clone()));
            if self.fail_loads {
                return Err(OutputError::HandleInvalid {
                    entry_id: entry.id.clone(),
                });
            }
            if let Some(duration) = self.auto_duration {
                self.queued_events
                    .lock()
                    .expect("events lock")
                    .push(OutputEvent::Duration(duration));
            }
            Ok(())
        }

        fn play(&mut self) {
            self.record(OutputCall::Play);
        }

        fn pause(&mut self) {
            self.record(OutputCall::Pause);
        }

        fn seek(&mut self, time: f64) {
            self.record(OutputCall::Seek(time));
        }

        fn set_volume(&mut self, volume: f32) {
            self.record(OutputCall::SetVolume(volume));
        }

        fn release(&mut self) {
            self.record(OutputCall::Release);
        }

        fn poll_events(&mut self) -> Vec<OutputEvent> {
            std::mem::take(&mut *self.queued_events.lock().expect("events lock"))
        }
    }

    struct Fixture {
        adapter: ClientAdapter,
        commands: mpsc::Receiver<Inbound>,
        messages: UnboundedSender<ClientMessage>,
        calls: Arc<Mutex<Vec<OutputCall>>>,
        output_events: Arc<Mutex<Vec<OutputEvent>>>,
    }

    impl Fixture {
        fn new(output: RecordingOutput, config: ClientConfig) -> Self {
            let (inbox, commands) = mpsc::channel();
            let (messages, receiver) = unbounded_channel();
            let link = ClientLink::from_channels("a".to_string(), inbox, receiver);
            let calls = Arc::clone(&output.calls);
            let output_events = Arc::clone(&output.queued_events);
            Self {
                adapter: ClientAdapter::new("a".to_string(), link, Box::new(output), config),
                commands,
                messages,
                calls,
                output_events,
            }
        }

        fn owner() -> Self {
            Self::new(RecordingOutput::new(Capability::Capable), test_config())
        }

        fn deliver(&mut self, message: ClientMessage) {
            self.messages.send(message).expect("adapter inbox open");
            self.adapter.pump();
        }

        fn emit(&mut self, event: OutputEvent) {
            self.output_events.lock().expect("events lock").push(event);
            self.adapter.pump();
        }

        fn sent(&self) -> Vec<Command> {
            let mut sent = Vec::new();
            while let Ok(inbound) = self.commands.try_recv() {
                if let Inbound::Command { command, .. } = inbound {
                    sent.push(command);
                }
            }
            sent
        }

        fn calls(&self) -> Vec<OutputCall> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn clear_calls(&self) {
            self.calls.lock().expect("calls lock").clear();
        }

        /// Owner with `x` bound, metadata known and the output playing.
        fn playing_owner() -> Self {
            Self::playing_owner_with(RecordingOutput::new(Capability::Capable))
        }

        fn playing_owner_with(output: RecordingOutput) -> Self {
            let mut fixture = Self::new(output, test_config());
            fixture.deliver(ClientMessage::StartAudio {
                state: state("a", &["x", "y"], 0, 0.0),
            });
            fixture.deliver(entries_available(&["x"], &[]));
            fixture.emit(OutputEvent::Duration(180.0));
            fixture.sent();
            fixture.clear_calls();
            fixture
        }
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            entry_request_debounce_ms: 0,
            ..ClientConfig::default()
        }
    }

    fn entry(id: &str) -> PlaylistEntry {
        PlaylistEntry {
            id: id.to_string(),
            name: format!("{}.mp3", id),
            ..PlaylistEntry::default()
        }
    }

    fn state(owner: &str, ids: &[&str], index: i64, time: f64) -> PlaybackState {
        PlaybackState {
            current_entry_id: Some(ids[index as usize].to_string()),
            is_playing: true,
            status: PlaybackStatus::Loading,
            current_time: time,
            playlist: ids.iter().map(|id| entry(id)).collect(),
            current_index: index,
            active_owner_id: Some(owner.to_string()),
            ..PlaybackState::default()
        }
    }

    fn entries_available(resolved: &[&str], missing: &[&str]) -> ClientMessage {
        ClientMessage::EntriesAvailable {
            entries: resolved
                .iter()
                .map(|id| ResolvedEntry {
                    entry: entry(id),
                    handle: LocalHandle {
                        entry_id: id.to_string(),
                        location: PathBuf::from(format!("/music/{}.mp3", id)),
                        generation: 1,
                    },
                })
                .collect(),
            missing: missing.iter().map(|id| id.to_string()).collect(),
        }
    }

    fn state_update(state: PlaybackState) -> ClientMessage {
        ClientMessage::StateUpdate {
            active_owner_id: state.active_owner_id.clone(),
            state,
        }
    }

    #[test]
    fn test_start_registers_with_detected_capability() {
        let mut fixture = Fixture::new(RecordingOutput::new(Capability::Incapable), test_config());
        fixture.adapter.start();
        assert_eq!(
            fixture.sent(),
            vec![Command::Register {
                can_emit_audio: Capability::Incapable
            }]
        );
    }

    #[test]
    fn test_owner_requests_missing_handle_and_plays_after_metadata() {
        let mut fixture = Fixture::owner();
        fixture.deliver(ClientMessage::StartAudio {
            state: state("a", &["x", "y"], 0, 0.0),
        });

        assert!(fixture.adapter.is_owner());
        assert_eq!(
            fixture.sent(),
            vec![Command::RequestSpecificEntries {
                ids: vec!["x".to_string()]
            }]
        );
        assert!(fixture.calls().is_empty());

        fixture.deliver(entries_available(&["x"], &[]));
        assert!(fixture.adapter.has_local_handle("x"));
        assert_eq!(
            fixture.calls(),
            vec![OutputCall::Load("x".to_string()), OutputCall::SetVolume(1.0)]
        );

        fixture.emit(OutputEvent::Duration(180.0));
        assert_eq!(fixture.calls().last(), Some(&OutputCall::Play));
        assert!(fixture
            .sent()
            .contains(&Command::ReportDuration { duration: 180.0 }));
    }

    #[test]
    fn test_new_owner_seeks_to_handed_over_time_once_metadata_is_known() {
        let mut fixture = Fixture::owner();
        fixture.deliver(ClientMessage::StartAudio {
            state: state("a", &["x"], 0, 17.0),
        });
        fixture.deliver(entries_available(&["x"], &[]));
        assert!(!fixture
            .calls()
            .iter()
            .any(|call| matches!(call, OutputCall::Seek(_))));

        fixture.emit(OutputEvent::Duration(180.0));

        let calls = fixture.calls();
        let seek = calls
            .iter()
            .position(|call| *call == OutputCall::Seek(17.0))
            .expect("seek to handed over time");
        let play = calls
            .iter()
            .position(|call| *call == OutputCall::Play)
            .expect("play after seek");
        assert!(seek < play);
    }

    #[test]
    fn test_stop_audio_releases_binding_before_later_state() {
        let mut fixture = Fixture::playing_owner();

        fixture.deliver(ClientMessage::StopAudio);
        assert_eq!(fixture.calls(), vec![OutputCall::Release]);
        assert!(!fixture.adapter.is_owner());
        assert!(fixture
            .sent()
            .contains(&Command::UnloadEntries {
                ids: vec!["x".to_string()]
            }));
        assert!(fixture
            .adapter
            .take_events()
            .contains(&AdapterEvent::OwnershipLost));

        fixture.deliver(state_update(state("b", &["x", "y"], 1, 0.0)));
        assert_eq!(fixture.calls(), vec![OutputCall::Release]);
    }

    #[test]
    fn test_state_naming_another_owner_releases_binding() {
        let mut fixture = Fixture::playing_owner();
        fixture.deliver(state_update(state("b", &["x", "y"], 0, 3.0)));
        assert_eq!(fixture.calls(), vec![OutputCall::Release]);
        assert!(!fixture.adapter.is_owner());
    }

    #[test]
    fn test_seek_serial_change_seeks_bound_output() {
        let mut fixture = Fixture::playing_owner();
        let mut seeked = state("a", &["x", "y"], 0, 42.0);
        seeked.status = PlaybackStatus::Playing;
        seeked.seek_serial = 1;

        fixture.deliver(state_update(seeked.clone()));
        assert_eq!(fixture.calls(), vec![OutputCall::Seek(42.0)]);

        seeked.current_time = 43.5;
        fixture.deliver(state_update(seeked));
        assert_eq!(fixture.calls(), vec![OutputCall::Seek(42.0)]);
        assert_eq!(fixture.adapter.projection().current_time, 43.5);
    }

    #[test]
    fn test_volume_change_reaches_bound_output() {
        let mut fixture = Fixture::playing_owner();
        let mut quieter = state("a", &["x", "y"], 0, 5.0);
        quieter.volume = 0.3;
        fixture.deliver(state_update(quieter));
        assert_eq!(fixture.calls(), vec![OutputCall::SetVolume(0.3)]);
    }

    #[test]
    fn test_pause_follows_projection() {
        let mut fixture = Fixture::playing_owner();
        let mut paused = state("a", &["x", "y"], 0, 5.0);
        paused.is_playing = false;
        paused.status = PlaybackStatus::Paused;
        fixture.deliver(state_update(paused));
        assert_eq!(fixture.calls(), vec![OutputCall::Pause]);
    }

    #[test]
    fn test_progress_reports_keep_only_latest_sample() {
        let mut fixture = Fixture::new(
            RecordingOutput::new(Capability::Capable),
            ClientConfig {
                entry_request_debounce_ms: 0,
                report_time_coalesce_ms: 60_000,
                ..ClientConfig::default()
            },
        );
        fixture.deliver(ClientMessage::StartAudio {
            state: state("a", &["x"], 0, 0.0),
        });
        fixture.deliver(entries_available(&["x"], &[]));
        fixture.emit(OutputEvent::Duration(180.0));
        fixture.sent();

        {
            let mut queued = fixture.output_events.lock().expect("events lock");
            queued.extend([
                OutputEvent::Progress(1.0),
                OutputEvent::Progress(2.0),
                OutputEvent::Progress(3.0),
            ]);
        }
        fixture.adapter.pump();
        let reports: Vec<Command> = fixture
            .sent()
            .into_iter()
            .filter(|command| matches!(command, Command::ReportTime { .. }))
            .collect();
        assert_eq!(reports, vec![Command::ReportTime { time: 3.0 }]);

        fixture.emit(OutputEvent::Progress(4.0));
        assert!(!fixture
            .sent()
            .iter()
            .any(|command| matches!(command, Command::ReportTime { .. })));
    }

    #[test]
    fn test_ended_is_reported() {
        let mut fixture = Fixture::playing_owner();
        fixture.emit(OutputEvent::Ended);
        assert!(fixture.sent().contains(&Command::ReportEnded));
    }

    #[test]
    fn test_failed_handle_is_reacquired_once_then_reported() {
        let mut output = RecordingOutput::new(Capability::Capable);
        output.fail_loads = true;
        let mut fixture = Fixture::new(output, test_config());
        fixture.deliver(ClientMessage::StartAudio {
            state: state("a", &["x"], 0, 0.0),
        });
        fixture.sent();

        fixture.deliver(entries_available(&["x"], &[]));
        assert_eq!(
            fixture.sent(),
            vec![Command::RequestSpecificEntries {
                ids: vec!["x".to_string()]
            }]
        );
        assert!(!fixture.adapter.has_local_handle("x"));

        fixture.deliver(entries_available(&["x"], &[]));
        let sent = fixture.sent();
        assert!(sent
            .iter()
            .any(|command| matches!(command, Command::ReportPlaybackError { entry_id, .. } if entry_id == "x")));
        assert!(!sent
            .iter()
            .any(|command| matches!(command, Command::RequestSpecificEntries { .. })));
        assert!(fixture
            .adapter
            .take_events()
            .iter()
            .any(|event| matches!(event, AdapterEvent::PlaybackError { .. })));

        let loads = fixture
            .calls()
            .iter()
            .filter(|call| matches!(call, OutputCall::Load(_)))
            .count();
        assert_eq!(loads, 2);
    }

    #[test]
    fn test_runtime_handle_failure_requests_fresh_handle() {
        let mut fixture = Fixture::playing_owner();
        fixture.emit(OutputEvent::Failed(OutputError::HandleInvalid {
            entry_id: "x".to_string(),
        }));
        assert_eq!(
            fixture.sent(),
            vec![Command::RequestSpecificEntries {
                ids: vec!["x".to_string()]
            }]
        );
        assert_eq!(fixture.calls(), vec![OutputCall::Release]);
    }

    #[test]
    fn test_missing_current_entry_is_reported() {
        let mut fixture = Fixture::owner();
        fixture.deliver(ClientMessage::StartAudio {
            state: state("a", &["x"], 0, 0.0),
        });
        fixture.sent();

        fixture.deliver(entries_available(&[], &["x"]));

        assert_eq!(
            fixture.sent(),
            vec![Command::ReportPlaybackError {
                entry_id: "x".to_string(),
                reason: "entry could not be resolved".to_string()
            }]
        );
        assert!(fixture.calls().is_empty());
    }

    #[test]
    fn test_distant_handles_are_released() {
        let mut fixture = Fixture::new(
            RecordingOutput::new(Capability::Capable),
            ClientConfig {
                entry_request_debounce_ms: 0,
                handle_keep_radius: 1,
                ..ClientConfig::default()
            },
        );
        let ids = ["e0", "e1", "e2", "e3", "e4"];
        fixture.deliver(ClientMessage::StartAudio {
            state: state("a", &ids, 0, 0.0),
        });
        fixture.sent();

        fixture.deliver(entries_available(&ids, &[]));

        assert!(fixture.sent().contains(&Command::UnloadEntries {
            ids: vec!["e2".to_string(), "e3".to_string(), "e4".to_string()]
        }));
        assert!(fixture.adapter.has_local_handle("e0"));
        assert!(fixture.adapter.has_local_handle("e1"));
        assert!(!fixture.adapter.has_local_handle("e3"));
    }

    #[test]
    fn test_user_gesture_reports_capability_and_claims_output() {
        let mut output = RecordingOutput::new(Capability::Unknown);
        output.gesture_capability = Capability::Capable;
        let mut fixture = Fixture::new(output, test_config());
        fixture.adapter.start();
        fixture.sent();

        fixture.adapter.notify_user_gesture();

        assert_eq!(
            fixture.sent(),
            vec![
                Command::ReportCapability {
                    can_emit_audio: Capability::Capable
                },
                Command::RequestOwnership
            ]
        );
    }

    #[test]
    fn test_owner_reporting_incapable_keeps_output_until_stop_audio() {
        let mut output = RecordingOutput::new(Capability::Capable);
        output.gesture_capability = Capability::Incapable;
        let mut fixture = Fixture::playing_owner_with(output);

        fixture.adapter.notify_user_gesture();

        assert_eq!(
            fixture.sent(),
            vec![Command::ReportCapability {
                can_emit_audio: Capability::Incapable
            }]
        );
        assert!(fixture.adapter.is_owner());
        assert!(fixture.calls().is_empty());

        fixture.deliver(ClientMessage::StopAudio);
        assert_eq!(fixture.calls(), vec![OutputCall::Release]);
        assert!(!fixture.adapter.is_owner());
        assert!(fixture.sent().contains(&Command::UnloadEntries {
            ids: vec!["x".to_string()]
        }));
    }

    #[test]
    fn test_non_owner_never_drives_output() {
        let mut fixture = Fixture::owner();
        fixture.deliver(state_update(state("b", &["x"], 0, 9.0)));
        fixture.deliver(entries_available(&["x"], &[]));
        assert!(fixture.calls().is_empty());
        assert!(!fixture.adapter.is_owner());
        assert_eq!(fixture.adapter.projection().current_time, 9.0);
    }

    #[test]
    fn test_pump_stops_when_coordinator_goes_away() {
        let Fixture {
            mut adapter,
            messages,
            ..
        } = Fixture::owner();
        drop(messages);
        assert!(!adapter.pump());
        assert_eq!(adapter.take_events(), vec![AdapterEvent::CoordinatorGone]);
    }

    fn pump_until(
        first: &mut ClientAdapter,
        second: &mut ClientAdapter,
        done: impl Fn(&ClientAdapter, &ClientAdapter) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !done(first, second) {
            assert!(Instant::now() < deadline, "adapters did not converge");
            first.pump();
            second.pump();
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_adapters_converge_through_running_coordinator() {
        let media = std::env::temp_dir().join(format!("playhub-client-{}.mp3", uuid::Uuid::new_v4()));
        std::fs::write(&media, b"mp3").expect("write temp media");
        let provider = Arc::new(PathFileProvider::new());
        provider.insert("x".to_string(), media.clone());
        let handle = spawn_coordinator(
            CoordinatorConfig::default(),
            &PersistenceConfig::default(),
            Box::new(DbManager::new_in_memory().expect("in-memory db")),
            provider,
        )
        .expect("spawn coordinator");

        let mut viewer = ClientAdapter::new(
            "viewer".to_string(),
            handle.connect("viewer".to_string()),
            Box::new(VirtualOutput::gesture_locked()),
            ClientConfig::default(),
        );
        let mut speaker_output = RecordingOutput::new(Capability::Capable);
        speaker_output.auto_duration = Some(180.0);
        let speaker_calls = Arc::clone(&speaker_output.calls);
        let mut speaker = ClientAdapter::new(
            "speaker".to_string(),
            handle.connect("speaker".to_string()),
            Box::new(speaker_output),
            ClientConfig::default(),
        );

        viewer.start();
        speaker.start();
        pump_until(&mut viewer, &mut speaker, |viewer, speaker| {
            speaker.is_owner()
                && viewer.projection().active_owner_id.as_deref() == Some("speaker")
        });

        viewer.replace_playlist(vec![entry("x")], Some(0));
        let calls = Arc::clone(&speaker_calls);
        pump_until(&mut viewer, &mut speaker, move |_, _| {
            calls.lock().expect("calls lock").contains(&OutputCall::Play)
        });

        viewer.seek_to(42.0);
        let calls = Arc::clone(&speaker_calls);
        pump_until(&mut viewer, &mut speaker, move |viewer, _| {
            calls
                .lock()
                .expect("calls lock")
                .contains(&OutputCall::Seek(42.0))
                && viewer.projection().current_time == 42.0
        });

        viewer.change_volume(0.3);
        let calls = Arc::clone(&speaker_calls);
        pump_until(&mut viewer, &mut speaker, move |_, speaker| {
            speaker.projection().volume == 0.3
                && calls
                    .lock()
                    .expect("calls lock")
                    .contains(&OutputCall::SetVolume(0.3))
        });

        handle.shutdown();
        let _ = std::fs::remove_file(media);
    }
}
