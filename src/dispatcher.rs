//! The dispatcher thread (spec section 4.4): one dedicated OS thread running
//! a single-threaded tokio runtime. A single engine task is the only owner
//! of `CubeState`/`AdmissionEngine`; every other task (acceptor, per-link
//! reader/writer, outbound connect) only ever talks to it through the
//! `Event` channel, so admission state never needs a lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use codec::{CubeAddress, Message, MessageType, Payload};
use engine::{AdmissionEngine, CubeState, EngineAction, LinkId, ProtocolPolicy};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::shared::{NodeSnapshot, Shared};
use crate::transport::{self, LinkEntry};

/// Requests from `Handle` methods into the engine task.
pub enum Command {
    Connect { peer: SocketAddr },
    Send { dst: CubeAddress, payload: Payload },
    Broadcast { payload: Payload },
    /// `cube_address()`/`dimension()`/`neighbors()` (spec section 6): a
    /// read-only snapshot of `CubeState`, answered the same way
    /// `Command::Connect`'s outcome is — posted to `Shared` and blocked on.
    Query,
    Shutdown,
}

/// Everything that can wake the engine task up.
pub enum Event {
    Accepted { peer: SocketAddr, socket: TcpStream },
    Connected { link: LinkId, peer: SocketAddr, socket: TcpStream },
    OpenFailed { link: LinkId, peer: SocketAddr },
    Inbound { link: LinkId, message: Message },
    LinkClosed { link: LinkId, peer: SocketAddr },
    Command(Command),
}

/// Spawns the dispatcher thread and returns the command channel a `Handle`
/// uses to drive it.
pub fn spawn(config: Config, policy: Box<dyn ProtocolPolicy>, shared: Arc<Shared>) -> mpsc::UnboundedSender<Command> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

    std::thread::Builder::new()
        .name("cube-dispatcher".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build dispatcher runtime");

            runtime.block_on(run(config, policy, shared, event_tx, event_rx, cmd_rx));
        })
        .expect("spawn dispatcher thread");

    cmd_tx
}

async fn run(
    config: Config,
    policy: Box<dyn ProtocolPolicy>,
    shared: Arc<Shared>,
    event_tx: mpsc::UnboundedSender<Event>,
    mut events: mpsc::UnboundedReceiver<Event>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let forward = event_tx.clone();
    tokio::spawn(async move {
        while let Some(cmd) = commands.recv().await {
            if forward.send(Event::Command(cmd)).is_err() {
                break;
            }
        }
    });

    let listener = match TcpListener::bind(config.node.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("cube-node listen failed: addr={}, err={}", config.node.listen, e);
            return;
        }
    };

    log::info!("cube-node listening: addr={}, external={}", config.node.listen, config.node.external);

    {
        let accept_tx = event_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        log::info!("link accepted: peer={}", peer);
                        if accept_tx.send(Event::Accepted { peer, socket }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("accept failed: err={}", e);
                        break;
                    }
                }
            }
        });
    }

    let mut engine = AdmissionEngine::new(policy);
    let mut state = CubeState::new_root();
    let mut links: HashMap<LinkId, LinkEntry> = HashMap::new();
    let mut pending_open: HashMap<LinkId, Message> = HashMap::new();
    let mut next_link: LinkId = 0;

    while let Some(event) = events.recv().await {
        match event {
            Event::Accepted { peer, socket } => {
                next_link += 1;
                let link = next_link;
                let entry = transport::spawn_link(link, peer, socket, event_tx.clone());
                links.insert(link, entry);
                engine.on_link_accepted(link, peer);
            }

            Event::Connected { link, peer, socket } => {
                let entry = transport::spawn_link(link, peer, socket, event_tx.clone());
                let queued = pending_open.remove(&link);
                let bootstrap = queued.as_ref().is_some_and(|m| m.kind == MessageType::ConnExtInnAttach);
                links.insert(link, entry);

                if let Some(message) = queued {
                    if let Some(entry) = links.get(&link) {
                        let _ = entry.tx.send(message);
                    }
                }

                if bootstrap {
                    engine.on_connect_link_opened(link);
                } else {
                    engine.on_link_opened(peer, link);
                }
            }

            Event::OpenFailed { link, peer } => {
                pending_open.remove(&link);
                let actions = engine.on_link_open_failed(&mut state, peer);
                apply(actions, &mut engine, &mut state, &mut links, &mut pending_open, &mut next_link, &event_tx, &shared);
            }

            Event::Inbound { link, message } => {
                let actions = engine.handle(&mut state, link, message);
                apply(actions, &mut engine, &mut state, &mut links, &mut pending_open, &mut next_link, &event_tx, &shared);
            }

            Event::LinkClosed { link, peer } => {
                log::info!("link closed: peer={}", peer);
                if let Some(entry) = links.remove(&link) {
                    entry.reader.abort();
                }
                let actions = engine.on_link_closed(&mut state, link);
                apply(actions, &mut engine, &mut state, &mut links, &mut pending_open, &mut next_link, &event_tx, &shared);
            }

            Event::Command(Command::Connect { peer }) => {
                let actions = engine.cmd_connect(peer);
                apply(actions, &mut engine, &mut state, &mut links, &mut pending_open, &mut next_link, &event_tx, &shared);
            }

            Event::Command(Command::Send { dst, payload }) => {
                let (_, actions) = engine.cmd_send(&mut state, dst, payload);
                apply(actions, &mut engine, &mut state, &mut links, &mut pending_open, &mut next_link, &event_tx, &shared);
            }

            Event::Command(Command::Broadcast { payload }) => {
                let actions = engine.cmd_broadcast(&mut state, payload);
                apply(actions, &mut engine, &mut state, &mut links, &mut pending_open, &mut next_link, &event_tx, &shared);
            }

            Event::Command(Command::Query) => {
                shared.set_snapshot(snapshot(&state));
            }

            Event::Command(Command::Shutdown) => {
                let actions = engine.cmd_shutdown(&mut state);
                apply(actions, &mut engine, &mut state, &mut links, &mut pending_open, &mut next_link, &event_tx, &shared);
                break;
            }
        }

        drain_inbox(&mut state, &shared);
    }

    for entry in links.values() {
        entry.reader.abort();
    }
}

#[allow(clippy::too_many_arguments)]
fn apply(
    actions: Vec<EngineAction>,
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    links: &mut HashMap<LinkId, LinkEntry>,
    pending_open: &mut HashMap<LinkId, Message>,
    next_link: &mut LinkId,
    event_tx: &mpsc::UnboundedSender<Event>,
    shared: &Arc<Shared>,
) {
    for action in actions {
        match action {
            EngineAction::SendOnLink { link, message } => {
                if let Some(entry) = links.get(&link) {
                    let _ = entry.tx.send(message);
                }
            }

            EngineAction::OpenAndSend { peer, message } => {
                *next_link += 1;
                let link = *next_link;
                pending_open.insert(link, message);
                transport::spawn_connect(link, peer, event_tx.clone());
            }

            EngineAction::CloseLink { link } => {
                if let Some(entry) = links.remove(&link) {
                    entry.reader.abort();
                }
                let more = engine.on_link_closed(state, link);
                apply(more, engine, state, links, pending_open, next_link, event_tx, shared);
            }

            EngineAction::AdoptNeighbor { link, dim_link } => {
                state.add_neighbor(dim_link, link);
                log::info!("neighbor adopted: addr={}, dim_link={}", state.addr, dim_link);
            }

            EngineAction::Deliver(entry) => shared.push_inbox(entry),

            EngineAction::ConnectOutcome(outcome) => shared.set_connect_outcome(outcome),
        }
    }
}

fn drain_inbox(state: &mut CubeState, shared: &Arc<Shared>) {
    while let Some(entry) = state.inbox.pop_front() {
        shared.push_inbox(entry);
    }
}

fn snapshot(state: &CubeState) -> NodeSnapshot {
    let neighbors = (0..state.dim as usize)
        .map(|i| state.link_for_dim(i).and_then(|_| state.addr.follow_link(i)))
        .collect();
    NodeSnapshot { addr: state.addr, dim: state.dim, neighbors }
}
