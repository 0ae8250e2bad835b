//! Coordinator process: the single writer of canonical playback state.
//!
//! The coordinator runs as an actor on its own thread and is reachable only
//! through its inbox. Each inbound message is handled to completion before the
//! next one is read, so every command produces at most one state mutation and
//! one `STATE_UPDATE` broadcast. Output ownership changes are sequenced on the
//! same thread: `STOP_AUDIO` to the old owner, then `START_AUDIO` to the new one.

mod election;
mod playback;
mod registry;

use std::num::NonZeroU32;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};
use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::config::{CoordinatorConfig, PersistenceConfig};
use crate::file_provider::FileProvider;
use crate::protocol::{
    self, Capability, ClientId, ClientMessage, Command, PersistedState, PlaybackState,
    PlaybackStatus,
};
use crate::state_store::{PersistenceWorker, StateStore};

use registry::{ClientRegistry, Outbox};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Messages accepted by the coordinator inbox.
#[derive(Debug)]
pub enum Inbound {
    /// A new connection; registration still requires `REGISTER`.
    Attach { client_id: ClientId, outbox: Outbox },
    /// The connection was torn down without `UNREGISTER`.
    Detach { client_id: ClientId },
    Command {
        client_id: ClientId,
        command: Command,
    },
    /// Command in JSON wire form; decoded by the coordinator.
    Wire { client_id: ClientId, payload: String },
    Shutdown,
}

/// Why a registration was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossReason {
    Unregistered,
    Disconnected,
    LivenessTimeout,
    SendFailed,
}

/// Observer notifications published by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    ClientRegistered {
        client_id: ClientId,
        capability: Capability,
    },
    ClientLost {
        client_id: ClientId,
        reason: LossReason,
    },
    StopAudioSent {
        client_id: ClientId,
    },
    StartAudioSent {
        client_id: ClientId,
    },
    OwnerChanged {
        previous: Option<ClientId>,
        current: Option<ClientId>,
    },
    CommandIgnored {
        client_id: ClientId,
        command: String,
        reason: String,
    },
    StateBroadcast {
        recipients: usize,
    },
    PlaybackError {
        entry_id: String,
        reason: String,
    },
    PersistenceFailed(String),
}

/// Result of one command handler.
#[derive(Debug, PartialEq)]
enum Outcome {
    Changed,
    Unchanged,
    Rejected(String),
}

/// Canonical state owner and command dispatcher.
pub struct Coordinator {
    config: CoordinatorConfig,
    state: PlaybackState,
    registry: ClientRegistry,
    persistence: PersistenceWorker,
    file_provider: Arc<dyn FileProvider>,
    events: broadcast::Sender<CoordinatorEvent>,
    /// Playback was requested while no client could emit audio.
    resume_on_election: bool,
    /// The owner has not reported a duration for the current selection yet.
    awaiting_duration_report: bool,
    /// Clients whose outbox failed; reaped after the current message.
    pending_losses: Vec<ClientId>,
    /// Targeted replies sent after the broadcast for the current command.
    deferred_replies: Vec<(ClientId, ClientMessage)>,
    position_save_limiter:
        RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        persistence_config: &PersistenceConfig,
        store: Box<dyn StateStore + Send>,
        file_provider: Arc<dyn FileProvider>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let persistence =
            PersistenceWorker::spawn(store, persistence_config.load_timeout(), events.clone());
        let position_quota = Quota::with_period(config.position_save_interval())
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        let mut coordinator = Self {
            state: PlaybackState::default(),
            registry: ClientRegistry::new(),
            persistence,
            file_provider,
            events,
            resume_on_election: false,
            awaiting_duration_report: false,
            pending_losses: Vec::new(),
            deferred_replies: Vec::new(),
            position_save_limiter: RateLimiter::direct(position_quota),
            config,
        };
        if coordinator.config.restore_on_start {
            coordinator.restore_persisted_state();
        }
        coordinator
    }

    #[cfg(test)]
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    #[cfg(test)]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    fn event_sender(&self) -> broadcast::Sender<CoordinatorEvent> {
        self.events.clone()
    }

    fn publish(&self, event: CoordinatorEvent) {
        let _ = self.events.send(event);
    }

    /// Handles one inbound message. Returns `false` when the actor should stop.
    pub fn handle_inbound(&mut self, inbound: Inbound) -> bool {
        match inbound {
            Inbound::Attach { client_id, outbox } => {
                debug!("Coordinator: connection attached for {}", client_id);
                self.registry.attach(client_id, outbox);
            }
            Inbound::Detach { client_id } => {
                if self.registry.is_registered(&client_id) {
                    self.handle_loss(&client_id, LossReason::Disconnected);
                } else {
                    self.registry.remove(&client_id);
                }
            }
            Inbound::Command { client_id, command } => {
                self.handle_command(&client_id, command);
            }
            Inbound::Wire { client_id, payload } => match protocol::decode_command(&payload) {
                Ok(command) => self.handle_command(&client_id, command),
                Err(err) => {
                    warn!(
                        "Coordinator: ignoring malformed command from {}: {}",
                        client_id, err
                    );
                    self.publish(CoordinatorEvent::CommandIgnored {
                        client_id,
                        command: "<malformed>".to_string(),
                        reason: err.to_string(),
                    });
                }
            },
            Inbound::Shutdown => {
                info!("Coordinator: shutting down");
                return false;
            }
        }
        self.reap_pending_losses();
        true
    }

    /// Drops registrations that stopped sending heartbeats.
    pub fn sweep_stale(&mut self, now: Instant) {
        for client_id in self.registry.stale(now, self.config.liveness_timeout()) {
            warn!("Coordinator: client {} missed its liveness window", client_id);
            self.handle_loss(&client_id, LossReason::LivenessTimeout);
        }
        self.reap_pending_losses();
    }

    fn handle_command(&mut self, client_id: &str, command: Command) {
        let name = command.name();
        if !matches!(command, Command::Register { .. }) && !self.registry.is_registered(client_id)
        {
            self.ignore(client_id, name, "client is not registered");
            return;
        }
        self.registry.touch(client_id, Instant::now());
        if command.is_owner_telemetry()
            && self.state.active_owner_id.as_deref() != Some(client_id)
        {
            self.ignore(client_id, name, "only the active owner reports playback");
            return;
        }

        let persists = affects_persisted_state(&command);
        let outcome = match command {
            Command::Register { can_emit_audio } => self.register(client_id, can_emit_audio),
            Command::Unregister => {
                if self.handle_loss(client_id, LossReason::Unregistered) {
                    Outcome::Changed
                } else {
                    Outcome::Unchanged
                }
            }
            Command::Heartbeat => Outcome::Unchanged,
            Command::RequestOwnership => self.request_ownership(client_id),
            Command::ReportCapability { can_emit_audio } => {
                self.report_capability(client_id, can_emit_audio)
            }
            Command::RequestSpecificEntries { ids } => {
                self.resolve_entries(client_id, ids);
                Outcome::Unchanged
            }
            Command::UnloadEntries { ids } => {
                let orphaned = self.registry.unhold(client_id, &ids);
                debug!(
                    "Coordinator: {} released {} handles, {} no longer held",
                    client_id,
                    ids.len(),
                    orphaned.len()
                );
                self.file_provider.release(&orphaned);
                Outcome::Unchanged
            }
            Command::SaveState => {
                self.save_state();
                Outcome::Unchanged
            }
            Command::LoadState => self.load_state(client_id),
            Command::ReportPlaybackError { entry_id, reason } => {
                self.report_playback_error(entry_id, reason)
            }
            playback_command => self.apply_playback_command(playback_command),
        };

        match outcome {
            Outcome::Changed => {
                debug!("Coordinator: {} from {} changed state", name, client_id);
                self.broadcast_state();
                if persists && self.config.autosave {
                    self.save_state();
                }
            }
            Outcome::Unchanged => {}
            Outcome::Rejected(reason) => self.ignore(client_id, name, &reason),
        }
        for (recipient, message) in std::mem::take(&mut self.deferred_replies) {
            self.send_to(&recipient, message);
        }
    }

    fn ignore(&self, client_id: &str, command: &str, reason: &str) {
        warn!(
            "Coordinator: ignoring {} from {}: {}",
            command, client_id, reason
        );
        self.publish(CoordinatorEvent::CommandIgnored {
            client_id: client_id.to_string(),
            command: command.to_string(),
            reason: reason.to_string(),
        });
    }

    fn register(&mut self, client_id: &str, capability: Capability) -> Outcome {
        let Some(first_registration) = self.registry.register(client_id, capability, Instant::now())
        else {
            return Outcome::Rejected("no attached connection".to_string());
        };
        if first_registration {
            info!(
                "Coordinator: registered {} (capability {:?}, {} clients)",
                client_id,
                capability,
                self.registry.len()
            );
        }
        self.publish(CoordinatorEvent::ClientRegistered {
            client_id: client_id.to_string(),
            capability,
        });
        if self.run_election() {
            Outcome::Changed
        } else {
            // The registrant still needs its first projection.
            self.deferred_replies
                .push((client_id.to_string(), self.state_update_message()));
            Outcome::Unchanged
        }
    }

    fn request_ownership(&mut self, client_id: &str) -> Outcome {
        let capability = self
            .registry
            .get(client_id)
            .map(|registration| registration.capability)
            .unwrap_or_default();
        match capability {
            Capability::Incapable => {
                return Outcome::Rejected("client reported it cannot emit audio".to_string());
            }
            Capability::Unknown => {
                // An explicit request comes from a user interaction on that client.
                self.registry.set_capability(client_id, Capability::Capable);
            }
            Capability::Capable => {}
        }
        if self.transfer_ownership(Some(client_id.to_string())) {
            Outcome::Changed
        } else {
            Outcome::Unchanged
        }
    }

    fn report_capability(&mut self, client_id: &str, capability: Capability) -> Outcome {
        self.registry.set_capability(client_id, capability);
        debug!(
            "Coordinator: {} reported capability {:?}",
            client_id, capability
        );
        if self.run_election() {
            Outcome::Changed
        } else {
            Outcome::Unchanged
        }
    }

    /// Removes a registration. Returns `true` when ownership changed.
    fn handle_loss(&mut self, client_id: &str, reason: LossReason) -> bool {
        let Some(removed) = self.registry.remove(client_id) else {
            return false;
        };
        let orphaned = self.registry.unheld(removed.held);
        if !orphaned.is_empty() {
            self.file_provider.release(&orphaned);
        }
        info!("Coordinator: client {} lost ({:?})", client_id, reason);
        self.publish(CoordinatorEvent::ClientLost {
            client_id: client_id.to_string(),
            reason,
        });
        if self.state.active_owner_id.as_deref() != Some(client_id) {
            return false;
        }
        let changed = self.run_election();
        if changed && reason != LossReason::Unregistered {
            // Unregister broadcasts through the regular command path.
            self.broadcast_state();
        }
        changed
    }

    fn reap_pending_losses(&mut self) {
        while let Some(client_id) = self.pending_losses.pop() {
            if self.registry.is_registered(&client_id) {
                self.handle_loss(&client_id, LossReason::SendFailed);
            } else {
                self.registry.remove(&client_id);
            }
        }
    }

    /// Re-evaluates ownership. Returns `true` when the owner changed.
    fn run_election(&mut self) -> bool {
        let previous = self.state.active_owner_id.clone();
        let elected = election::elect(previous.as_deref(), self.registry.registrations());
        self.transfer_ownership(elected)
    }

    /// Moves output ownership. `STOP_AUDIO` for the outgoing owner is always
    /// issued before `START_AUDIO` for the incoming one.
    fn transfer_ownership(&mut self, next: Option<ClientId>) -> bool {
        let previous = self.state.active_owner_id.clone();
        if previous == next {
            return false;
        }

        if let Some(outgoing) = previous.as_deref() {
            if self.registry.is_registered(outgoing) {
                self.send_to(outgoing, ClientMessage::StopAudio);
                self.publish(CoordinatorEvent::StopAudioSent {
                    client_id: outgoing.to_string(),
                });
            }
        }

        self.state.active_owner_id = next.clone();
        match next.as_deref() {
            Some(incoming) => {
                self.awaiting_duration_report = self.state.current_position().is_some();
                if self.resume_on_election && self.state.current_position().is_some() {
                    info!("Coordinator: resuming recorded playback on {}", incoming);
                    self.resume_on_election = false;
                    self.state.is_playing = true;
                }
                if self.state.is_playing {
                    // The new owner has to load the entry before it plays.
                    self.state.status = PlaybackStatus::Loading;
                }
                let start = ClientMessage::StartAudio {
                    state: self.state.clone(),
                };
                self.send_to(incoming, start);
                self.publish(CoordinatorEvent::StartAudioSent {
                    client_id: incoming.to_string(),
                });
            }
            None => {
                if self.state.is_playing {
                    info!("Coordinator: no client can emit audio, holding playback");
                    self.resume_on_election = true;
                    self.state.is_playing = false;
                    self.state.status = PlaybackStatus::Paused;
                }
            }
        }

        info!(
            "Coordinator: output owner {:?} -> {:?}",
            previous, self.state.active_owner_id
        );
        self.publish(CoordinatorEvent::OwnerChanged {
            previous,
            current: next,
        });
        true
    }

    fn state_update_message(&self) -> ClientMessage {
        ClientMessage::StateUpdate {
            state: self.state.clone(),
            active_owner_id: self.state.active_owner_id.clone(),
        }
    }

    fn broadcast_state(&mut self) {
        let recipients = self.registry.registered_ids();
        for client_id in &recipients {
            let message = self.state_update_message();
            self.send_to(client_id, message);
        }
        self.publish(CoordinatorEvent::StateBroadcast {
            recipients: recipients.len(),
        });
    }

    fn send_to(&mut self, client_id: &str, message: ClientMessage) {
        if !self.registry.send(client_id, message) {
            debug!("Coordinator: outbox for {} is closed", client_id);
            self.pending_losses.push(client_id.to_string());
        }
    }

    fn resolve_entries(&mut self, client_id: &str, ids: Vec<String>) {
        let mut requested: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !requested.contains(&id) {
                requested.push(id);
            }
        }
        let known: Vec<String> = requested
            .iter()
            .filter(|id| self.state.index_of(id).is_some())
            .cloned()
            .collect();
        let handles = self.file_provider.resolve(&known);
        self.registry.hold(
            client_id,
            handles.iter().map(|handle| handle.entry_id.clone()),
        );

        let mut entries = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(index) = self.state.index_of(&handle.entry_id) {
                entries.push(protocol::ResolvedEntry {
                    entry: self.state.playlist[index].clone(),
                    handle,
                });
            }
        }
        let missing: Vec<String> = requested
            .into_iter()
            .filter(|id| !entries.iter().any(|resolved| &resolved.entry.id == id))
            .collect();
        if !missing.is_empty() {
            debug!(
                "Coordinator: {} entries could not be resolved for {}",
                missing.len(),
                client_id
            );
        }
        self.send_to(
            client_id,
            ClientMessage::EntriesAvailable { entries, missing },
        );
    }

    fn report_playback_error(&mut self, entry_id: String, reason: String) -> Outcome {
        warn!(
            "Coordinator: playback error for entry {}: {}",
            entry_id, reason
        );
        self.publish(CoordinatorEvent::PlaybackError {
            entry_id: entry_id.clone(),
            reason: reason.clone(),
        });
        for client_id in self.registry.registered_ids() {
            self.send_to(
                &client_id,
                ClientMessage::PlaybackError {
                    entry_id: entry_id.clone(),
                    reason: reason.clone(),
                },
            );
        }
        if self.state.current_entry_id.as_deref() == Some(entry_id.as_str()) {
            self.stop_playback();
            Outcome::Changed
        } else {
            Outcome::Unchanged
        }
    }

    fn save_state(&mut self) {
        self.persistence
            .save_state(PersistedState::from(&self.state));
        self.persistence.save_position(self.state.current_time);
    }

    fn maybe_save_position(&mut self) {
        if self.position_save_limiter.check().is_ok() {
            self.persistence.save_position(self.state.current_time);
        }
    }

    fn load_state(&mut self, client_id: &str) -> Outcome {
        let outcome = match self.persistence.load() {
            Ok(loaded) => match loaded.state {
                Some(persisted) => {
                    self.apply_persisted(persisted, loaded.position);
                    Outcome::Changed
                }
                None => {
                    debug!("Coordinator: nothing persisted yet");
                    Outcome::Unchanged
                }
            },
            Err(err) => {
                warn!("Coordinator: failed to load persisted state: {}", err);
                self.publish(CoordinatorEvent::PersistenceFailed(err.to_string()));
                Outcome::Unchanged
            }
        };
        self.deferred_replies.push((
            client_id.to_string(),
            ClientMessage::LoadStateResponse {
                state: self.state.clone(),
            },
        ));
        outcome
    }

    fn restore_persisted_state(&mut self) {
        match self.persistence.load() {
            Ok(loaded) => {
                if let Some(persisted) = loaded.state {
                    info!(
                        "Coordinator: restoring {} playlist entries",
                        persisted.playlist.len()
                    );
                    self.apply_persisted(persisted, loaded.position);
                }
            }
            Err(err) => {
                warn!("Coordinator: starting with default state: {}", err);
            }
        }
    }
}

fn affects_persisted_state(command: &Command) -> bool {
    matches!(
        command,
        Command::ReplacePlaylist { .. }
            | Command::AddToPlaylist { .. }
            | Command::RemoveFromPlaylist { .. }
            | Command::ClearPlaylist
            | Command::PlayEntry { .. }
            | Command::PlayNext
            | Command::PlayPrevious
            | Command::ChangeVolume { .. }
            | Command::CycleRepeatMode
            | Command::SetPanelState { .. }
            | Command::ReportEnded
    )
}

/// Inbound side of one connection, matching the `Outbox` the coordinator holds.
enum Incoming {
    Typed(UnboundedReceiver<ClientMessage>),
    Wire(UnboundedReceiver<String>),
}

/// Client-side end of one coordinator connection. Dropping it detaches.
pub struct ClientLink {
    client_id: ClientId,
    inbox: mpsc::Sender<Inbound>,
    incoming: Incoming,
    closed: bool,
}

impl ClientLink {
    pub(crate) fn from_channels(
        client_id: ClientId,
        inbox: mpsc::Sender<Inbound>,
        messages: UnboundedReceiver<ClientMessage>,
    ) -> Self {
        Self {
            client_id,
            inbox,
            incoming: Incoming::Typed(messages),
            closed: false,
        }
    }

    fn from_wire_channels(
        client_id: ClientId,
        inbox: mpsc::Sender<Inbound>,
        payloads: UnboundedReceiver<String>,
    ) -> Self {
        Self {
            client_id,
            inbox,
            incoming: Incoming::Wire(payloads),
            closed: false,
        }
    }

    #[cfg(test)]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Fire-and-forget. Returns `false` when the coordinator is gone.
    pub fn send(&self, command: Command) -> bool {
        let client_id = self.client_id.clone();
        let inbound = match self.incoming {
            Incoming::Typed(_) => Inbound::Command { client_id, command },
            Incoming::Wire(_) => match protocol::encode_command(&command) {
                Ok(payload) => Inbound::Wire { client_id, payload },
                Err(err) => {
                    warn!(
                        "Client {}: failed to encode {}: {}",
                        client_id,
                        command.name(),
                        err
                    );
                    return true;
                }
            },
        };
        self.inbox.send(inbound).is_ok()
    }

    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        loop {
            let received = match &mut self.incoming {
                Incoming::Typed(messages) => messages.try_recv(),
                Incoming::Wire(payloads) => match payloads.try_recv() {
                    Ok(payload) => match protocol::decode_client_message(&payload) {
                        Ok(message) => Ok(message),
                        Err(err) => {
                            warn!(
                                "Client {}: skipping malformed message: {}",
                                self.client_id, err
                            );
                            continue;
                        }
                    },
                    Err(err) => Err(err),
                },
            };
            return match received {
                Ok(message) => Some(message),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    None
                }
            };
        }
    }

    /// The coordinator dropped this connection or stopped.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ClientLink {
    fn drop(&mut self) {
        let _ = self.inbox.send(Inbound::Detach {
            client_id: self.client_id.clone(),
        });
    }
}

/// Owner-side handle to a running coordinator thread.
pub struct CoordinatorHandle {
    inbox: mpsc::Sender<Inbound>,
    events: broadcast::Sender<CoordinatorEvent>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CoordinatorHandle {
    pub fn connect(&self, client_id: ClientId) -> ClientLink {
        let (outbox, messages) = unbounded_channel();
        let _ = self.inbox.send(Inbound::Attach {
            client_id: client_id.clone(),
            outbox: Outbox::Typed(outbox),
        });
        ClientLink::from_channels(client_id, self.inbox.clone(), messages)
    }

    /// Like `connect`, but both directions travel as JSON text.
    pub fn connect_wire(&self, client_id: ClientId) -> ClientLink {
        let (outbox, payloads) = unbounded_channel();
        let _ = self.inbox.send(Inbound::Attach {
            client_id: client_id.clone(),
            outbox: Outbox::Wire(outbox),
        });
        ClientLink::from_wire_channels(client_id, self.inbox.clone(), payloads)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(mut self) {
        let _ = self.inbox.send(Inbound::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Coordinator: thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.inbox.send(Inbound::Shutdown);
        }
    }
}

/// Runs a coordinator on a dedicated thread.
pub fn spawn_coordinator(
    config: CoordinatorConfig,
    persistence_config: &PersistenceConfig,
    store: Box<dyn StateStore + Send>,
    file_provider: Arc<dyn FileProvider>,
) -> std::io::Result<CoordinatorHandle> {
    let sweep_interval = config.sweep_interval().max(Duration::from_millis(1));
    let mut coordinator = Coordinator::new(config, persistence_config, store, file_provider);
    let events = coordinator.event_sender();
    let (inbox, inbox_receiver) = mpsc::channel::<Inbound>();

    let thread = thread::Builder::new()
        .name("coordinator".to_string())
        .spawn(move || {
            let mut last_sweep = Instant::now();
            loop {
                match inbox_receiver.recv_timeout(sweep_interval) {
                    Ok(inbound) => {
                        if !coordinator.handle_inbound(inbound) {
                            break;
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
                if last_sweep.elapsed() >= sweep_interval {
                    coordinator.sweep_stale(Instant::now());
                    last_sweep = Instant::now();
                }
            }
            debug!("Coordinator: actor loop exited");
        })?;

    Ok(CoordinatorHandle {
        inbox,
        events,
        thread: Some(thread),
    })
}
