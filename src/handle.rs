use std::net::SocketAddr;
use std::sync::Arc;

use codec::{CubeAddress, Payload};
use engine::{InboxEntry, ProtocolPolicy};

use crate::config::Config;
use crate::dispatcher::{self, Command};
use crate::shared::Shared;

/// The application-facing surface of a running node (spec section 4.8).
/// Every method is a thin, synchronous wrapper that hands a `Command` to
/// the dispatcher thread and, where the operation has a result, blocks on
/// the shared condition variable for it — the dispatcher thread itself
/// never blocks on anything but I/O.
#[derive(Clone)]
pub struct Handle {
    commands: tokio::sync::mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Handle {
    pub fn spawn(config: Config, policy: Box<dyn ProtocolPolicy>) -> Self {
        let shared = Arc::new(Shared::default());
        let commands = dispatcher::spawn(config, policy, shared.clone());
        Self { commands, shared }
    }

    /// Bootstraps into the cube through `peer`. Blocks until the admission
    /// protocol resolves to either this node's new address or a refusal.
    pub fn connect(&self, peer: SocketAddr) -> Result<CubeAddress, String> {
        self.commands
            .send(Command::Connect { peer })
            .map_err(|_| "dispatcher is not running".to_string())?;
        self.shared.take_connect_outcome()
    }

    /// Routes `payload` to `dst`. Non-blocking: a routing failure surfaces
    /// as an `InboxEntry::Invalid` through `recv`/`recv_now` rather than a
    /// return value, since the route may need to cross several hops before
    /// failing.
    pub fn send(&self, dst: CubeAddress, payload: Payload) {
        let _ = self.commands.send(Command::Send { dst, payload });
    }

    pub fn broadcast(&self, payload: Payload) {
        let _ = self.commands.send(Command::Broadcast { payload });
    }

    /// Blocks until the next inbox entry is available.
    pub fn recv(&self) -> InboxEntry {
        self.shared.recv()
    }

    /// Non-blocking poll of the inbox.
    pub fn recv_now(&self) -> Option<InboxEntry> {
        self.shared.recv_now()
    }

    pub fn inbox_len(&self) -> usize {
        self.shared.available()
    }

    /// This node's current cube address (`Invalid` before admission
    /// completes).
    pub fn cube_address(&self) -> CubeAddress {
        self.query().addr
    }

    /// This node's current dimension.
    pub fn dimension(&self) -> u32 {
        self.query().dim
    }

    /// The cube address reached through each dimension-link, `None` where
    /// that link has no live neighbor.
    pub fn neighbors(&self) -> Vec<Option<CubeAddress>> {
        self.query().neighbors
    }

    /// Sends `payload` back to whoever an inbox entry came from, the way an
    /// application replies to a `recv()`/`recv_now()` result without having
    /// to track the sender separately. A no-op for an `Invalid` entry: there
    /// is no sender to reply to.
    pub fn reply(&self, received: &InboxEntry, payload: Payload) {
        if let InboxEntry::Data { src, .. } = received {
            self.send(*src, payload);
        }
    }

    fn query(&self) -> crate::shared::NodeSnapshot {
        let _ = self.commands.send(Command::Query);
        self.shared.take_snapshot()
    }

    /// Broadcasts `NODE_SHUTDOWN` and tells the dispatcher to tear down.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}
