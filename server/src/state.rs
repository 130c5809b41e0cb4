use std::sync::Arc;
use std::time::Duration;

use crate::auth::Authenticator;
use crate::db::{ResourceStore, UserDirectory};
use crate::ws::broadcast::BroadcastEngine;
use crate::ws::gateway::SessionGateway;
use crate::ws::registry::RoomRegistry;

/// Tunables for live sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Upper bound for the whole handshake (token, user and sheet checks).
    pub handshake_timeout: Duration,
    /// Frames a connection may have queued before it is considered dead.
    pub outbound_queue_capacity: usize,
    /// Time between server pings on an idle or busy connection.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered before the connection is closed.
    pub pong_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            outbound_queue_capacity: 256,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Live rooms. Constructed once here and shared with the broadcast engine.
    pub rooms: RoomRegistry,
    pub broadcast: BroadcastEngine,
    pub gateway: SessionGateway,
    /// Verifies bearer tokens on REST routes
    pub authenticator: Arc<dyn Authenticator>,
    /// Sheet lookups for REST routes
    pub resources: Arc<dyn ResourceStore>,
    pub settings: SessionSettings,
}

impl AppState {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        users: Arc<dyn UserDirectory>,
        resources: Arc<dyn ResourceStore>,
        settings: SessionSettings,
    ) -> Self {
        let rooms = RoomRegistry::new();
        Self {
            broadcast: BroadcastEngine::new(rooms.clone()),
            gateway: SessionGateway::new(authenticator.clone(), users, resources.clone()),
            rooms,
            authenticator,
            resources,
            settings,
        }
    }
}
