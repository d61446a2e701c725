pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod observer;
pub mod shared;
pub mod transport;

use self::{config::Config, observer::Observer};

pub use handle::Handle;

/// Starts a node's dispatcher thread and returns the `Handle` an embedding
/// application drives it with (spec section 4.4/4.8). Mirrors the teacher's
/// `startup(config) -> Result<...>` entry point, generalized to return a
/// value instead of blocking forever, since a cube node's lifetime is
/// driven by `connect`/`send`/`recv`/`shutdown` calls rather than by
/// accepting and relaying on its own.
pub fn startup(config: Config) -> anyhow::Result<Handle> {
    let policy = Box::new(Observer::new(&config));
    Ok(Handle::spawn(config, policy))
}
