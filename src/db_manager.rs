use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::PersistenceError;
use crate::protocol::PersistedState;
use crate::state_store::StateStore;

const STATE_KEY: &str = "playback_state";
const POSITION_KEY: &str = "playback_position";

/// SQLite-backed key/value store for canonical state and position.
pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    pub fn open(db_path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn get_value(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

impl StateStore for DbManager {
    fn get_state(&mut self) -> Result<Option<PersistedState>, PersistenceError> {
        match self.get_value(STATE_KEY)? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn set_state(&mut self, state: &PersistedState) -> Result<(), PersistenceError> {
        let text = serde_json::to_string(state)?;
        self.set_value(STATE_KEY, &text)?;
        Ok(())
    }

    fn get_position(&mut self) -> Result<Option<f64>, PersistenceError> {
        match self.get_value(POSITION_KEY)? {
            Some(text) => Ok(text.parse::<f64>().ok().filter(|value| value.is_finite())),
            None => Ok(None),
        }
    }

    fn set_position(&mut self, position: f64) -> Result<(), PersistenceError> {
        self.set_value(POSITION_KEY, &position.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PlaylistEntry, RepeatMode};

    fn sample_state() -> PersistedState {
        PersistedState {
            playlist: vec![
                PlaylistEntry {
                    id: "a".to_string(),
                    name: "Alpha".to_string(),
                    ..PlaylistEntry::default()
                },
                PlaylistEntry {
                    id: "b".to_string(),
                    name: "Beta".to_string(),
                    ..PlaylistEntry::default()
                },
            ],
            current_index: 1,
            current_entry_id: Some("b".to_string()),
            volume: 0.4,
            repeat_mode: RepeatMode::All,
            panel_visible: false,
            panel_collapsed: true,
        }
    }

    #[test]
    fn test_empty_store_returns_none() {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        assert!(db.get_state().expect("get_state").is_none());
        assert!(db.get_position().expect("get_position").is_none());
    }

    #[test]
    fn test_set_state_overwrites_previous_value() {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        let mut state = sample_state();
        db.set_state(&state).expect("first save");
        state.volume = 0.9;
        db.set_state(&state).expect("second save");

        let loaded = db.get_state().expect("load").expect("state present");
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_position_is_stored_separately_from_state() {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        db.set_position(17.25).expect("save position");
        assert_eq!(db.get_position().expect("load"), Some(17.25));
        assert!(db.get_state().expect("load state").is_none());
    }

    #[test]
    fn test_open_creates_missing_parent_directory() {
        let dir = std::env::temp_dir().join(format!("playhub-db-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("state.db");
        {
            let mut db = DbManager::open(&path).expect("open on disk");
            db.set_state(&sample_state()).expect("save");
        }
        let mut reopened = DbManager::open(&path).expect("reopen");
        assert_eq!(
            reopened.get_state().expect("load"),
            Some(sample_state())
        );
        let _ = std::fs::remove_dir_all(dir);
    }
}
