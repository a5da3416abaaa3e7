//! Peer link management
//!
//! - [`state`]: pure connection/subscription state machine
//! - [`peer_link`]: shared handle that applies events and restarts advertising

pub mod peer_link;
pub mod state;

pub use peer_link::PeerLink;
pub use state::{
    ConnectionState, LinkEvent, LinkPhase, LinkSnapshot, PushTarget, Transition,
    DEFAULT_ATT_MTU,
};
