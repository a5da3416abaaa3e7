//! Connection/subscription state machine for the single peer
//!
//! ```text
//!                   start / re-advertise
//!  Disconnected ───────────────────────────► Advertising
//!       ▲                                      │   ▲
//!       │ disconnect,                connect ok│   │ connect failed
//!       │ failed connect                       ▼   │
//!       │                          ConnectedUnsubscribed
//!       │                              │           ▲
//!       │                     subscribe│           │unsubscribe
//!       │                              ▼           │
//!       └───────────────────────── ConnectedSubscribed
//! ```
//!
//! `ConnectionState` is pure bookkeeping; it never calls the advertiser. A
//! [`Transition`] with `restart_advertising` set tells the caller to bring
//! advertising back up and then call [`ConnectionState::mark_advertising`].

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::types::{AttrHandle, ConnHandle};

/// ATT MTU every connection starts with
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Observable phase of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkPhase {
    /// Not connected and not advertising
    Disconnected,
    /// Waiting for a peer to connect
    Advertising,
    /// Peer connected but not receiving notifications
    ConnectedUnsubscribed,
    /// Peer connected and subscribed to the delivery characteristic
    ConnectedSubscribed,
}

impl LinkPhase {
    /// Whether a peer is connected
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            LinkPhase::ConnectedUnsubscribed | LinkPhase::ConnectedSubscribed
        )
    }
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkPhase::Disconnected => write!(f, "Disconnected"),
            LinkPhase::Advertising => write!(f, "Advertising"),
            LinkPhase::ConnectedUnsubscribed => write!(f, "Connected (unsubscribed)"),
            LinkPhase::ConnectedSubscribed => write!(f, "Connected (subscribed)"),
        }
    }
}

/// Events reported by the link layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Connection attempt finished; `status` 0 means success
    Connected {
        /// Handle assigned by the stack
        conn: ConnHandle,
        /// Stack status code
        status: i32,
    },
    /// Connection dropped for any reason
    Disconnected {
        /// Handle of the dropped connection
        conn: ConnHandle,
        /// Stack reason code
        reason: i32,
    },
    /// Peer changed its notification subscription
    Subscribe {
        /// Connection the request came in on
        conn: ConnHandle,
        /// Attribute the subscription targets
        attr: AttrHandle,
        /// Whether notifications are now enabled
        notify: bool,
    },
    /// ATT MTU renegotiated
    MtuUpdated {
        /// Connection the exchange happened on
        conn: ConnHandle,
        /// New MTU
        mtu: u16,
    },
    /// The link-layer host reset itself
    HostReset {
        /// Stack reason code
        reason: i32,
    },
}

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Phase before the event
    pub from: LinkPhase,
    /// Phase after the event
    pub to: LinkPhase,
    /// Caller must start advertising again
    pub restart_advertising: bool,
}

impl Transition {
    fn unchanged(phase: LinkPhase) -> Self {
        Self {
            from: phase,
            to: phase,
            restart_advertising: false,
        }
    }

    /// Whether the phase changed
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Everything the delivery path needs to push frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushTarget {
    /// Connection to push on
    pub conn: ConnHandle,
    /// Delivery characteristic value handle
    pub attr: AttrHandle,
    /// Negotiated MTU
    pub mtu: u16,
}

/// Point-in-time copy of the connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    /// Current phase
    pub phase: LinkPhase,
    /// Active connection, if any
    pub conn: Option<ConnHandle>,
    /// Negotiated MTU (default when disconnected)
    pub mtu: u16,
    /// Whether the peer is subscribed
    pub subscribed: bool,
}

/// State of the single peer connection
#[derive(Debug, Clone)]
pub struct ConnectionState {
    conn: Option<ConnHandle>,
    mtu: u16,
    subscribed: bool,
    advertising: bool,
    default_mtu: u16,
    delivery_attr: AttrHandle,
}

impl ConnectionState {
    /// Fresh state in `Disconnected`
    pub fn new(delivery_attr: AttrHandle, default_mtu: u16) -> Self {
        Self {
            conn: None,
            mtu: default_mtu,
            subscribed: false,
            advertising: false,
            default_mtu,
            delivery_attr,
        }
    }

    /// Current phase, derived from the fields
    pub fn phase(&self) -> LinkPhase {
        match (self.conn, self.subscribed, self.advertising) {
            (Some(_), true, _) => LinkPhase::ConnectedSubscribed,
            (Some(_), false, _) => LinkPhase::ConnectedUnsubscribed,
            (None, _, true) => LinkPhase::Advertising,
            (None, _, false) => LinkPhase::Disconnected,
        }
    }

    /// Point-in-time copy for logging and delivery decisions
    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            phase: self.phase(),
            conn: self.conn,
            mtu: self.mtu,
            subscribed: self.subscribed,
        }
    }

    /// Where to push frames, if the peer is connected and subscribed
    pub fn push_target(&self) -> Option<PushTarget> {
        match self.conn {
            Some(conn) if self.subscribed => Some(PushTarget {
                conn,
                attr: self.delivery_attr,
                mtu: self.mtu,
            }),
            _ => None,
        }
    }

    /// Delivery characteristic value handle
    pub fn delivery_attr(&self) -> AttrHandle {
        self.delivery_attr
    }

    /// Record that advertising is running. Ignored while connected.
    pub fn mark_advertising(&mut self) -> Transition {
        let from = self.phase();
        if self.conn.is_none() {
            self.advertising = true;
        }
        Transition {
            from,
            to: self.phase(),
            restart_advertising: false,
        }
    }

    /// Apply a link-layer event
    pub fn apply(&mut self, event: &LinkEvent) -> Transition {
        let from = self.phase();
        match *event {
            LinkEvent::Connected { conn, status } => {
                if status != 0 {
                    info!(status, "Peer connect failed");
                    self.advertising = false;
                    return Transition {
                        from,
                        to: self.phase(),
                        restart_advertising: self.conn.is_none(),
                    };
                }
                if let Some(existing) = self.conn {
                    warn!(%existing, %conn, "Connect while already connected, ignoring");
                    return Transition::unchanged(from);
                }
                self.conn = Some(conn);
                self.mtu = self.default_mtu;
                self.subscribed = false;
                self.advertising = false;
                info!(%conn, "Peer connected");
            }
            LinkEvent::Disconnected { conn, reason } => {
                if self.conn != Some(conn) {
                    debug!(%conn, "Disconnect for unknown connection, ignoring");
                    return Transition::unchanged(from);
                }
                info!(%conn, reason, "Peer disconnected");
                self.conn = None;
                self.subscribed = false;
                self.mtu = self.default_mtu;
                self.advertising = false;
                return Transition {
                    from,
                    to: self.phase(),
                    restart_advertising: true,
                };
            }
            LinkEvent::Subscribe { conn, attr, notify } => {
                if self.conn != Some(conn) {
                    debug!(%conn, "Subscribe without active connection, ignoring");
                    return Transition::unchanged(from);
                }
                if attr != self.delivery_attr {
                    debug!(%attr, "Subscribe for other attribute, ignoring");
                    return Transition::unchanged(from);
                }
                self.subscribed = notify;
                info!(%conn, "Notify {}", if notify { "enabled" } else { "disabled" });
            }
            LinkEvent::MtuUpdated { conn, mtu } => {
                if self.conn != Some(conn) {
                    debug!(%conn, mtu, "MTU update without active connection, ignoring");
                    return Transition::unchanged(from);
                }
                self.mtu = mtu;
                info!(%conn, mtu, "MTU updated");
            }
            LinkEvent::HostReset { reason } => {
                error!(reason, "Link host reset");
            }
        }
        Transition {
            from,
            to: self.phase(),
            restart_advertising: false,
        }
    }
}
