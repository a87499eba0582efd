//! Kernel types: NodeState and its transition table.

use serde::{Deserialize, Serialize};

/// Node lifecycle state.
///
/// State transitions:
/// ```text
/// INITIALIZING → LOADING → {INVALID | INITIALIZED}
///                   ↑              ↓        ↓
///                   └──────────────┴────────┘   (repeated reloads)
///
/// any → DISPOSED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum NodeState {
    Initializing = 0,
    Loading = 1,
    Invalid = 2,
    Initialized = 3,
    Disposed = 4,
}

impl From<u8> for NodeState {
    fn from(v: u8) -> Self {
        match v {
            0 => NodeState::Initializing,
            1 => NodeState::Loading,
            2 => NodeState::Invalid,
            3 => NodeState::Initialized,
            _ => NodeState::Disposed,
        }
    }
}

impl NodeState {
    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        self == NodeState::Disposed
    }

    /// Check if the node is serving with an activated declaration.
    pub fn is_active(self) -> bool {
        self == NodeState::Initialized
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: NodeState) -> bool {
        match (self, to) {
            // DISPOSED is terminal
            (NodeState::Disposed, _) => false,
            (_, NodeState::Disposed) => true,
            // INITIALIZING
            (NodeState::Initializing, NodeState::Loading) => true,
            // LOADING
            (NodeState::Loading, NodeState::Initialized) => true,
            (NodeState::Loading, NodeState::Invalid) => true,
            // Repeated reloads
            (NodeState::Initialized, NodeState::Loading) => true,
            (NodeState::Invalid, NodeState::Loading) => true,
            // All other transitions invalid
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Initializing => "initializing",
            NodeState::Loading => "loading",
            NodeState::Invalid => "invalid",
            NodeState::Initialized => "initialized",
            NodeState::Disposed => "disposed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_activation_path() {
        assert!(NodeState::Initializing.can_transition_to(NodeState::Loading));
        assert!(NodeState::Loading.can_transition_to(NodeState::Initialized));
        assert!(!NodeState::Initializing.can_transition_to(NodeState::Initialized));
    }

    #[test]
    fn test_reload_cycle() {
        assert!(NodeState::Initialized.can_transition_to(NodeState::Loading));
        assert!(NodeState::Loading.can_transition_to(NodeState::Invalid));
        assert!(NodeState::Invalid.can_transition_to(NodeState::Loading));
    }

    #[test]
    fn test_disposed_is_terminal() {
        assert!(NodeState::Disposed.is_terminal());
        for to in [
            NodeState::Initializing,
            NodeState::Loading,
            NodeState::Invalid,
            NodeState::Initialized,
            NodeState::Disposed,
        ] {
            assert!(!NodeState::Disposed.can_transition_to(to));
        }
        assert!(NodeState::Initializing.can_transition_to(NodeState::Disposed));
    }

    #[test]
    fn test_u8_round_trip() {
        assert_eq!(NodeState::from(NodeState::Invalid as u8), NodeState::Invalid);
        assert_eq!(NodeState::from(200), NodeState::Disposed);
    }
}
