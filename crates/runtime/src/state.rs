//! Membership lifecycle state machine.

use std::fmt;

/// Lifecycle of one node.
///
/// ```text
/// INIT --create_ring()--> STANDALONE
/// INIT --join()---------> JOINED <--recovery done--+
///                           |                      |
///                           +--hints found--> RECOVERING
/// any --shutdown()--> TERMINATED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Constructed, listener up, not yet part of any ring.
    Init,
    /// Founder of a fresh ring: successor is self, no predecessor.
    Standalone,
    /// Member of a ring.
    Joined,
    /// Rejoined after an outage and pulling hinted handoffs back in.
    Recovering,
    /// Shut down; terminal.
    Terminated,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Init => "INIT",
            NodeState::Standalone => "STANDALONE",
            NodeState::Joined => "JOINED",
            NodeState::Recovering => "RECOVERING",
            NodeState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}
