#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use cube_node::config::Config;

/// Not `#[tokio::main]`: the dispatcher owns its own single-threaded
/// runtime on a dedicated thread (spec section 4.4), so the process's main
/// thread stays free to block on the inbox.
fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    let handle = cube_node::startup(config)?;

    loop {
        match handle.recv() {
            engine::InboxEntry::Data { src, payload } => {
                log::info!("delivered: src={:?}, payload={:?}", src, payload);
            }
            engine::InboxEntry::Invalid { attempted_dst } => {
                log::warn!("undeliverable: dst={:?}", attempted_dst);
            }
        }
    }
}
