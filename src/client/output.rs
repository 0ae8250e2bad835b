//! Physical output seam driven by the elected owner.

use std::time::Instant;

use log::{debug, warn};

use crate::error::OutputError;
use crate::protocol::{Capability, EntryId, LocalHandle, PlaylistEntry};

/// Signals produced by an output binding.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Current position in seconds.
    Progress(f64),
    /// Metadata is available; seeking is now meaningful.
    Duration(f64),
    Ended,
    Failed(OutputError),
}

/// A device that can emit the audio of one bound entry at a time.
pub trait AudioOutput: Send {
    /// Reports whether audio can be emitted right now.
    fn detect_capability(&mut self) -> Capability;
    /// Called when a user interaction may have unlocked audio.
    fn on_user_gesture(&mut self) {}
    /// Binds `entry`, replacing any previous binding. Starts paused at 0.
    fn load(&mut self, entry: &PlaylistEntry, handle: &LocalHandle) -> Result<(), OutputError>;
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, time: f64);
    fn set_volume(&mut self, volume: f32);
    /// Stops and drops the current binding.
    fn release(&mut self);
    fn poll_events(&mut self) -> Vec<OutputEvent>;
}

const FALLBACK_DURATION_SECS: f64 = 180.0;

struct VirtualBinding {
    entry_id: EntryId,
    duration: f64,
    duration_reported: bool,
    position: f64,
    playing_since: Option<Instant>,
}

impl VirtualBinding {
    fn position_at(&self, now: Instant, rate: f64) -> f64 {
        match self.playing_since {
            Some(since) => {
                let elapsed = now.saturating_duration_since(since).as_secs_f64() * rate;
                (self.position + elapsed).min(self.duration)
            }
            None => self.position,
        }
    }
}

/// Clock-driven output that "plays" files by advancing a position counter.
///
/// Useful headless: it validates handles like a real device would, reports
/// duration from the entry metadata and ends entries on time.
pub struct VirtualOutput {
    capability: Capability,
    /// Capability reached after the first user gesture.
    gesture_capability: Capability,
    rate: f64,
    volume: f32,
    binding: Option<VirtualBinding>,
    invalidated: bool,
}

impl VirtualOutput {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            gesture_capability: capability,
            rate: 1.0,
            volume: 1.0,
            binding: None,
            invalidated: false,
        }
    }

    /// An output that reports `Unknown` until a user gesture unlocks it.
    pub fn gesture_locked() -> Self {
        Self {
            gesture_capability: Capability::Capable,
            ..Self::new(Capability::Unknown)
        }
    }

    /// Plays faster than real time, e.g. `10.0` for demos.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate.max(0.0);
        self
    }

    #[cfg(test)]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Simulates the device losing access to the bound file.
    #[cfg(test)]
    pub fn invalidate_binding(&mut self) {
        self.invalidated = true;
    }
}

impl AudioOutput for VirtualOutput {
    fn detect_capability(&mut self) -> Capability {
        self.capability
    }

    fn on_user_gesture(&mut self) {
        if self.capability != self.gesture_capability {
            debug!("VirtualOutput: unlocked by user gesture");
            self.capability = self.gesture_capability;
        }
    }

    fn load(&mut self, entry: &PlaylistEntry, handle: &LocalHandle) -> Result<(), OutputError> {
        self.binding = None;
        self.invalidated = false;
        if !handle.location.is_file() {
            warn!(
                "VirtualOutput: {} is not readable",
                handle.location.display()
            );
            return Err(OutputError::HandleInvalid {
                entry_id: entry.id.clone(),
            });
        }
        let duration = entry
            .metadata
            .duration_hint
            .filter(|duration| duration.is_finite() && *duration > 0.0)
            .unwrap_or(FALLBACK_DURATION_SECS);
        self.binding = Some(VirtualBinding {
            entry_id: entry.id.clone(),
            duration,
            duration_reported: false,
            position: 0.0,
            playing_since: None,
        });
        Ok(())
    }

    fn play(&mut self) {
        if let Some(binding) = self.binding.as_mut() {
            if binding.playing_since.is_none() {
                binding.playing_since = Some(Instant::now());
            }
        }
    }

    fn pause(&mut self) {
        let rate = self.rate;
        if let Some(binding) = self.binding.as_mut() {
            binding.position = binding.position_at(Instant::now(), rate);
            binding.playing_since = None;
        }
    }

    fn seek(&mut self, time: f64) {
        if let Some(binding) = self.binding.as_mut() {
            binding.position = time.clamp(0.0, binding.duration);
            if binding.playing_since.is_some() {
                binding.playing_since = Some(Instant::now());
            }
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn release(&mut self) {
        if let Some(binding) = self.binding.take() {
            debug!("VirtualOutput: released {}", binding.entry_id);
        }
    }

    fn poll_events(&mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        let rate = self.rate;
        let Some(binding) = self.binding.as_mut() else {
            return events;
        };
        if self.invalidated {
            self.invalidated = false;
            let entry_id = binding.entry_id.clone();
            self.binding = None;
            events.push(OutputEvent::Failed(OutputError::HandleInvalid { entry_id }));
            return events;
        }
        if !binding.duration_reported {
            binding.duration_reported = true;
            events.push(OutputEvent::Duration(binding.duration));
        }
        if binding.playing_since.is_some() {
            let now = Instant::now();
            let position = binding.position_at(now, rate);
            events.push(OutputEvent::Progress(position));
            if position >= binding.duration {
                binding.position = binding.duration;
                binding.playing_since = None;
                events.push(OutputEvent::Ended);
            }
        }
        events
    }
}
