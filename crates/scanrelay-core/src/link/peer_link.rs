//! Shared handle to the peer connection state
//!
//! [`PeerLink`] is the only way the rest of the relay touches
//! [`ConnectionState`]. Link-layer events arrive on the event-loop task while
//! the scan cycle reads push targets from the worker thread, so the state sits
//! behind a mutex. The lock is never held across a driver call.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{ConnectionState, LinkEvent, LinkPhase, LinkSnapshot, PushTarget, Transition};
use crate::config::LinkConfig;
use crate::error::RelayResult;
use crate::events::RelayEvent;
use crate::port::{AdvertisingParams, Advertiser};
use crate::types::AttrHandle;

/// Cloneable handle to the single peer link
#[derive(Clone)]
pub struct PeerLink {
    state: Arc<Mutex<ConnectionState>>,
    advertiser: Arc<dyn Advertiser>,
    params: AdvertisingParams,
    event_tx: broadcast::Sender<RelayEvent>,
}

impl PeerLink {
    /// Create a link handle in `Disconnected`
    pub fn new(
        config: &LinkConfig,
        delivery_attr: AttrHandle,
        advertiser: Arc<dyn Advertiser>,
        event_tx: broadcast::Sender<RelayEvent>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::new(
                delivery_attr,
                config.default_mtu,
            ))),
            advertiser,
            params: config.advertising_params(),
            event_tx,
        }
    }

    /// Start advertising for the first time.
    ///
    /// A failure here means the peer can never connect, so it is returned
    /// to the caller instead of being logged.
    pub fn start(&self) -> RelayResult<()> {
        self.advertiser.start_advertising(&self.params)?;
        let transition = self.state.lock().mark_advertising();
        info!(name = %self.params.device_name, "Advertising started");
        self.publish(transition);
        Ok(())
    }

    /// Apply one link-layer event and return the resulting phase
    pub fn handle_event(&self, event: LinkEvent) -> LinkPhase {
        let transition = self.state.lock().apply(&event);
        self.publish(transition);

        if !transition.restart_advertising {
            return transition.to;
        }

        match self.advertiser.start_advertising(&self.params) {
            Ok(()) => {
                let transition = self.state.lock().mark_advertising();
                debug!("Advertising restarted");
                self.publish(transition);
                transition.to
            }
            Err(e) => {
                error!(error = %e, "Failed to restart advertising");
                transition.to
            }
        }
    }

    /// Point-in-time copy of the link state
    pub fn snapshot(&self) -> LinkSnapshot {
        self.state.lock().snapshot()
    }

    /// Current phase
    pub fn phase(&self) -> LinkPhase {
        self.state.lock().phase()
    }

    /// Where to push frames, if the peer is connected and subscribed
    pub fn push_target(&self) -> Option<PushTarget> {
        self.state.lock().push_target()
    }

    /// Delivery characteristic value handle
    pub fn delivery_attr(&self) -> AttrHandle {
        self.state.lock().delivery_attr()
    }

    fn publish(&self, transition: Transition) {
        if transition.changed() {
            // No subscribers is fine
            let _ = self.event_tx.send(RelayEvent::LinkChanged {
                from: transition.from,
                to: transition.to,
            });
        }
    }

    /// Drive the state machine from a stream of link events until shutdown
    /// is signalled or every event sender is dropped.
    pub fn spawn_event_loop(
        self,
        mut events: mpsc::Receiver<LinkEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => {
                            let phase = self.handle_event(event);
                            debug!(%phase, "Link event applied");
                        }
                        None => {
                            warn!("Link event channel closed");
                            break;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Link event loop shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("state", &*self.state.lock())
            .field("params", &self.params)
            .finish()
    }
}
