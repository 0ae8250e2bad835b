//! Persistent state store seam and the background worker that drives it.
//!
//! Saves are fire-and-forget so a slow or failing store never delays command
//! handling. Loads wait for the worker with a bounded timeout.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::broadcast;

use crate::coordinator::CoordinatorEvent;
use crate::error::PersistenceError;
use crate::protocol::PersistedState;

/// Durable key/value storage for canonical state and current position.
pub trait StateStore {
    fn get_state(&mut self) -> Result<Option<PersistedState>, PersistenceError>;
    fn set_state(&mut self, state: &PersistedState) -> Result<(), PersistenceError>;
    fn get_position(&mut self) -> Result<Option<f64>, PersistenceError>;
    fn set_position(&mut self, position: f64) -> Result<(), PersistenceError>;
}

/// Result of one load round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedState {
    pub state: Option<PersistedState>,
    pub position: Option<f64>,
}

enum PersistenceJob {
    SaveState(PersistedState),
    SavePosition(f64),
    Load(mpsc::Sender<Result<LoadedState, PersistenceError>>),
}

/// Handle to the persistence thread. Dropping it stops the thread once queued
/// jobs are drained.
pub struct PersistenceWorker {
    jobs: mpsc::Sender<PersistenceJob>,
    load_timeout: Duration,
}

impl PersistenceWorker {
    pub fn spawn(
        mut store: Box<dyn StateStore + Send>,
        load_timeout: Duration,
        events: broadcast::Sender<CoordinatorEvent>,
    ) -> Self {
        let (jobs, job_receiver) = mpsc::channel::<PersistenceJob>();
        let spawn_result = thread::Builder::new()
            .name("persistence".to_string())
            .spawn(move || {
                while let Ok(job) = job_receiver.recv() {
                    match job {
                        PersistenceJob::SaveState(state) => {
                            if let Err(err) = store.set_state(&state) {
                                warn!("PersistenceWorker: failed to save state: {}", err);
                                let _ = events.send(CoordinatorEvent::PersistenceFailed(
                                    err.to_string(),
                                ));
                            } else {
                                debug!(
                                    "PersistenceWorker: saved state with {} entries",
                                    state.playlist.len()
                                );
                            }
                        }
                        PersistenceJob::SavePosition(position) => {
                            if let Err(err) = store.set_position(position) {
                                warn!("PersistenceWorker: failed to save position: {}", err);
                                let _ = events.send(CoordinatorEvent::PersistenceFailed(
                                    err.to_string(),
                                ));
                            }
                        }
                        PersistenceJob::Load(reply) => {
                            let loaded = store.get_state().and_then(|state| {
                                let position = store.get_position()?;
                                Ok(LoadedState { state, position })
                            });
                            let _ = reply.send(loaded);
                        }
                    }
                }
                debug!("PersistenceWorker: job channel closed, exiting");
            });
        if let Err(err) = spawn_result {
            warn!("PersistenceWorker: failed to spawn thread: {}", err);
        }

        Self { jobs, load_timeout }
    }

    pub fn save_state(&self, state: PersistedState) {
        if self.jobs.send(PersistenceJob::SaveState(state)).is_err() {
            warn!("PersistenceWorker: dropping state save, worker unavailable");
        }
    }

    pub fn save_position(&self, position: f64) {
        if self.jobs.send(PersistenceJob::SavePosition(position)).is_err() {
            warn!("PersistenceWorker: dropping position save, worker unavailable");
        }
    }

    /// Loads state and position. Queued saves are applied first.
    pub fn load(&self) -> Result<LoadedState, PersistenceError> {
        let (reply, reply_receiver) = mpsc::channel();
        self.jobs
            .send(PersistenceJob::Load(reply))
            .map_err(|_| PersistenceError::WorkerUnavailable)?;
        match reply_receiver.recv_timeout(self.load_timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(PersistenceError::Timeout(self.load_timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(PersistenceError::WorkerUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_manager::DbManager;
    use crate::protocol::RepeatMode;

    struct FailingStore;

    impl StateStore for FailingStore {
        fn get_state(&mut self) -> Result<Option<PersistedState>, PersistenceError> {
            Err(PersistenceError::WorkerUnavailable)
        }
        fn set_state(&mut self, _state: &PersistedState) -> Result<(), PersistenceError> {
            Err(PersistenceError::WorkerUnavailable)
        }
        fn get_position(&mut self) -> Result<Option<f64>, PersistenceError> {
            Err(PersistenceError::WorkerUnavailable)
        }
        fn set_position(&mut self, _position: f64) -> Result<(), PersistenceError> {
            Err(PersistenceError::WorkerUnavailable)
        }
    }

    fn persisted(volume: f32) -> PersistedState {
        PersistedState {
            playlist: Vec::new(),
            current_index: -1,
            current_entry_id: None,
            volume,
            repeat_mode: RepeatMode::One,
            panel_visible: true,
            panel_collapsed: false,
        }
    }

    #[test]
    fn test_load_observes_previously_queued_saves() {
        let (events, _) = broadcast::channel(16);
        let worker = PersistenceWorker::spawn(
            Box::new(DbManager::new_in_memory().expect("in-memory db")),
            Duration::from_secs(1),
            events,
        );
        worker.save_state(persisted(0.25));
        worker.save_position(12.5);

        let loaded = worker.load().expect("load should succeed");
        assert_eq!(loaded.state, Some(persisted(0.25)));
        assert_eq!(loaded.position, Some(12.5));
    }

    #[test]
    fn test_failed_save_is_published_not_propagated() {
        let (events, mut receiver) = broadcast::channel(16);
        let worker =
            PersistenceWorker::spawn(Box::new(FailingStore), Duration::from_secs(1), events);
        worker.save_state(persisted(1.0));

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        loop {
            match receiver.try_recv() {
                Ok(CoordinatorEvent::PersistenceFailed(_)) => break,
                Ok(_) => {}
                Err(_) if std::time::Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(5))
                }
                Err(err) => panic!("expected PersistenceFailed event, got {:?}", err),
            }
        }
        assert!(worker.load().is_err());
    }
}
