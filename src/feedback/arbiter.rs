// PriorityArbiter - decides which cue groups may sound right now

use std::collections::HashSet;
use std::sync::RwLock;

use log::{debug, error};
use serde::{Deserialize, Serialize};

use super::{SoundCategory, SoundGroup};

/// Focused activities that silence non-training cues while active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    ChordTraining,
    EarTraining,
}

#[derive(Default)]
pub struct PriorityArbiter {
    active: RwLock<HashSet<AudioMode>>,
}

impl PriorityArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode_active(&self, mode: AudioMode, active: bool) {
        match self.active.write() {
            Ok(mut modes) => {
                let changed = if active {
                    modes.insert(mode)
                } else {
                    modes.remove(&mode)
                };
                if changed {
                    debug!("[PriorityArbiter] {:?} active={}", mode, active);
                }
            }
            Err(_) => error!("[PriorityArbiter] Mode lock poisoned, {:?} not updated", mode),
        }
    }

    pub fn is_mode_active(&self, mode: AudioMode) -> bool {
        self.active
            .read()
            .map(|modes| modes.contains(&mode))
            .unwrap_or(false)
    }

    /// Active modes, sorted
    pub fn active_modes(&self) -> Vec<AudioMode> {
        let mut modes: Vec<AudioMode> = self
            .active
            .read()
            .map(|modes| modes.iter().copied().collect())
            .unwrap_or_default();
        modes.sort();
        modes
    }

    /// Training cues are always admitted; interface and gamification cues
    /// only when no high-priority mode is active
    pub fn can_play_sound(&self, category: SoundCategory) -> bool {
        if category.group() == SoundGroup::Training {
            return true;
        }
        match self.active.read() {
            Ok(modes) => modes.is_empty(),
            Err(_) => false,
        }
    }
}
