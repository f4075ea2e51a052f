//! Plugin lifecycle state machine.
//!
//! ```text
//! UNLOADED -> LOADING -> LOADED -> INITIALIZING -> ACTIVE <-> PAUSED
//!                                       |            |
//!                                       +-> ERROR <--+
//! any state except UNLOADED -> UNLOADING -> UNLOADED
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Initializing,
    Active,
    Paused,
    Error,
    Unloading,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Unloading => "unloading",
        }
    }

    /// Whether `initialize` has already run (successfully or not), so
    /// `shutdown` is owed on unload.
    pub fn was_initialized(self) -> bool {
        matches!(self, Self::Active | Self::Paused | Self::Error)
    }

    pub fn can_transition_to(self, target: LifecycleState) -> bool {
        use LifecycleState::*;

        match (self, target) {
            (Unloaded, Loading)
            | (Loading, Loaded)
            | (Loaded, Initializing)
            | (Initializing, Active | Error)
            | (Active, Paused | Error)
            | (Paused, Active)
            | (Unloading, Unloaded) => true,
            (Unloaded | Unloading, Unloading) => false,
            (_, Unloading) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{LifecycleState::*, *};

    const ALL: [LifecycleState; 8] = [
        Unloaded,
        Loading,
        Loaded,
        Initializing,
        Active,
        Paused,
        Error,
        Unloading,
    ];

    #[test]
    fn happy_path_is_allowed() {
        let path = [Unloaded, Loading, Loaded, Initializing, Active];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn transitions_are_one_directional_except_pause() {
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(!Active.can_transition_to(Initializing));
        assert!(!Loaded.can_transition_to(Loading));
        assert!(!Error.can_transition_to(Active));
        assert!(!Paused.can_transition_to(Error));
    }

    #[test]
    fn every_loaded_state_can_start_unloading() {
        for state in ALL {
            let expected = !matches!(state, Unloaded | Unloading);
            assert_eq!(state.can_transition_to(Unloading), expected, "{state}");
        }
        assert!(Unloading.can_transition_to(Unloaded));
        assert!(!Active.can_transition_to(Unloaded));
    }
}
