mod app_runtime;
mod client;
mod config;
mod coordinator;
mod db_manager;
mod error;
mod file_provider;
mod media_file_discovery;
mod playlist;
mod protocol;
mod state_store;

use std::path::PathBuf;

use app_runtime::AppRuntime;
use log::info;

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        let location = panic_info
            .location()
            .map(|location| format!("{}:{}", location.file(), location.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        log::error!(
            "panic in thread '{}' at {}: {}",
            thread_name,
            location,
            panic_payload_to_string(panic_info.payload())
        );
    }));

    let media_paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    let media_paths = if media_paths.is_empty() {
        let fallback = dirs::audio_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        info!("No media paths given, scanning {}", fallback.display());
        vec![fallback]
    } else {
        media_paths
    };

    AppRuntime::build(media_paths)?.run()
}
