//! Wire format for the incomplete-hypercube overlay.
//!
//! This crate is transport-agnostic: it only knows how to turn a
//! [`Message`] into bytes and back (spec section 6) plus the small set of
//! value types (`CubeAddress`, `TravelVector`) the protocol routes on. No
//! socket, no state machine — those live in `cube-node-engine`.

pub mod address;
pub mod error;
pub mod message;
pub mod travel;
pub mod validate;
pub mod wire;

pub use address::CubeAddress;
pub use error::Error;
pub use message::{Message, MessageType, Payload};
pub use travel::TravelVector;
pub use wire::{Framer, decode_message, encode_frame, encode_message};
