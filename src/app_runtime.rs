//! Application runtime bootstrap: config, persistence and the demo session.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    client::{AdapterEvent, ClientAdapter, VirtualOutput},
    config::{sanitize_config, Config},
    coordinator::{spawn_coordinator, CoordinatorEvent, CoordinatorHandle},
    db_manager::DbManager,
    file_provider::PathFileProvider,
    media_file_discovery::discover_playlist_entries,
    protocol::{Capability, PlaybackStatus},
};

const APP_DIR_NAME: &str = "playhub";

/// Owns startup wiring for one coordinator and its local clients.
pub(crate) struct AppRuntime {
    config: Config,
    config_file: PathBuf,
    database_path: PathBuf,
    media_paths: Vec<PathBuf>,
}

impl AppRuntime {
    /// Loads (or creates) the config file and resolves the database path.
    pub(crate) fn build(media_paths: Vec<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let config_root = dirs::config_dir()
            .ok_or("no config directory on this platform")?
            .join(APP_DIR_NAME);
        let config_file = config_root.join("config.toml");
        let config = load_or_create_config(&config_file)?;

        let database_path = match config.persistence.database_path.clone() {
            Some(path) => path,
            None => dirs::data_dir()
                .ok_or("no data directory on this platform")?
                .join(APP_DIR_NAME)
                .join("state.db"),
        };

        Ok(Self {
            config,
            config_file,
            database_path,
            media_paths,
        })
    }

    /// Runs a coordinator with one audio-capable client and one gesture-locked
    /// client, playing through the discovered files until the playlist ends.
    /// The gesture-locked client talks JSON and takes the output over once it
    /// sees playback running.
    pub(crate) fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!(
            "AppRuntime: config={} database={}",
            self.config_file.display(),
            self.database_path.display()
        );
        let store = DbManager::open(&self.database_path)?;
        let provider = Arc::new(PathFileProvider::new());
        let discovered = discover_playlist_entries(&self.media_paths);
        for (entry, location) in &discovered {
            provider.insert(entry.id.clone(), location.clone());
        }
        info!("AppRuntime: discovered {} audio files", discovered.len());

        let coordinator = spawn_coordinator(
            self.config.coordinator.clone(),
            &self.config.persistence,
            Box::new(store),
            provider,
        )?;
        log_coordinator_events(&coordinator);

        let speaker_id = uuid::Uuid::new_v4().to_string();
        let speaker = ClientAdapter::new(
            speaker_id.clone(),
            coordinator.connect(speaker_id),
            Box::new(VirtualOutput::new(Capability::Capable).with_rate(20.0)),
            self.config.client.clone(),
        );
        let remote_id = uuid::Uuid::new_v4().to_string();
        let mut remote = ClientAdapter::new(
            remote_id.clone(),
            coordinator.connect_wire(remote_id),
            Box::new(VirtualOutput::gesture_locked().with_rate(20.0)),
            self.config.client.clone(),
        );
        let speaker_thread = spawn_adapter("speaker", speaker)?;

        remote.start();
        let entries: Vec<_> = discovered.into_iter().map(|(entry, _)| entry).collect();
        let mut finished = entries.is_empty();
        if finished {
            warn!("AppRuntime: no audio files found, nothing to play");
        } else {
            remote.replace_playlist(entries, Some(0));
        }

        let idle = self.config.client.idle_loop_sleep();
        let mut seen_playing = false;
        let mut gesture_sent = false;
        while !finished && remote.pump() {
            for event in remote.take_events() {
                if let AdapterEvent::PlaybackError { entry_id, reason } = event {
                    warn!("AppRuntime: {} could not be played: {}", entry_id, reason);
                }
            }
            let projection = remote.projection();
            seen_playing |= projection.is_playing;
            finished = seen_playing && projection.status == PlaybackStatus::Stopped;
            if !gesture_sent && projection.status == PlaybackStatus::Playing {
                gesture_sent = true;
                info!("AppRuntime: {} unlocked its output", remote.client_id());
                remote.notify_user_gesture();
            }
            thread::sleep(idle);
        }

        remote.save_state();
        remote.pump();
        remote.shutdown();
        // Give the coordinator a moment to hand queued saves to the store.
        thread::sleep(Duration::from_millis(50));
        coordinator.shutdown();
        if speaker_thread.join().is_err() {
            warn!("AppRuntime: speaker thread panicked");
        }
        info!("AppRuntime: session finished");
        Ok(())
    }
}

fn load_or_create_config(config_file: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(config_root) = config_file.parent() {
        std::fs::create_dir_all(config_root).map_err(|err| {
            format!(
                "Failed to create config directory {}: {}",
                config_root.display(),
                err
            )
        })?;
    }

    if !config_file.exists() {
        let default_config = sanitize_config(Config::default());
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        std::fs::write(config_file, toml::to_string(&default_config)?)?;
    }

    let config_content = std::fs::read_to_string(config_file)?;
    let config = match toml::from_str::<Config>(&config_content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Config file {} is invalid, using defaults: {}",
                config_file.display(),
                err
            );
            Config::default()
        }
    };
    Ok(sanitize_config(config))
}

fn spawn_adapter(
    name: &str,
    mut adapter: ClientAdapter,
) -> std::io::Result<thread::JoinHandle<()>> {
    let name = name.to_string();
    thread::Builder::new()
        .name(format!("client-{}", name))
        .spawn(move || {
            debug!("AppRuntime: {} running as {}", name, adapter.client_id());
            adapter.start();
            adapter.run();
        })
}

fn log_coordinator_events(coordinator: &CoordinatorHandle) {
    let mut events = coordinator.subscribe_events();
    let spawn_result = thread::Builder::new()
        .name("coordinator-events".to_string())
        .spawn(move || {
            loop {
                match events.blocking_recv() {
                    Ok(CoordinatorEvent::OwnerChanged { previous, current }) => {
                        info!("AppRuntime: owner {:?} -> {:?}", previous, current)
                    }
                    Ok(CoordinatorEvent::PersistenceFailed(reason)) => {
                        warn!("AppRuntime: persistence failed: {}", reason)
                    }
                    Ok(CoordinatorEvent::PlaybackError { entry_id, reason }) => {
                        warn!("AppRuntime: playback error on {}: {}", entry_id, reason)
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("AppRuntime: event logger skipped {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    if let Err(err) = spawn_result {
        warn!("AppRuntime: event logger unavailable: {}", err);
    }
}
