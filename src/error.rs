use std::net::SocketAddr;

/// Transport/process-boundary error kinds (spec section 7): failures the
/// dispatcher hits before a message ever reaches the engine. The engine's
/// own §7 kinds (`FormatError`/`StateError`/`DataError`/`AddressError`/
/// `AdmissionFailure`) are surfaced directly as `EngineAction`s — an
/// `error_reply` message to send, or an `InboxEntry::Invalid` for the local
/// application — rather than through a separate error type.
#[derive(Debug)]
pub enum NodeError {
    TransportFailure { peer: SocketAddr, reason: String },
    Config(String),
}

impl std::error::Error for NodeError {}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
