//! # iplchat-broker
//!
//! The server side of the protocol (C4/C7/C8/C9):
//! the session registry, the per-connection packet dispatcher, the
//! best-effort notification pusher, and the operator admin console.

pub mod admin;
pub mod dispatch;
pub mod push;
pub mod session;

use iplchat_db::engine::Engine;
use session::SessionRegistry;
use std::sync::Arc;

/// The one shared state handle passed to every connection task and to the
/// admin console, grounded on the reference stack's single-`Arc`-per-server
/// pattern (`nexus_gateway::GatewayState`).
pub struct BrokerState {
    pub sessions: SessionRegistry,
    pub engine: Arc<Engine>,
}

impl BrokerState {
    pub fn new(engine: Engine) -> Arc<Self> {
        Arc::new(Self {
            sessions: SessionRegistry::new(),
            engine: Arc::new(engine),
        })
    }
}
