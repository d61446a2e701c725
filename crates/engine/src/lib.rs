//! Pure protocol logic for the incomplete-hypercube overlay: the admission
//! state machine, the router, and node-local state. No sockets, no
//! threads — `cube-node` drives this with a real dispatcher.

pub mod action;
pub mod admission;
pub mod policy;
pub mod router;
pub mod state;

pub use action::EngineAction;
pub use admission::AdmissionEngine;
pub use policy::{OpenPolicy, ProtocolPolicy};
pub use router::{RouteOutcome, Router};
pub use state::{CubeState, InboxEntry, LinkId};
