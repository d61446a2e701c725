use std::net::SocketAddr;

use bytes::BytesMut;
use codec::{Framer, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use engine::LinkId;

use crate::dispatcher::Event;
use crate::error::NodeError;

/// Per-link handle the engine task writes through: `try_send` never blocks
/// the single-threaded engine task on a slow peer (spec section 5: "a slow
/// or malicious peer must never stall the rest of the cube").
pub type LinkSender = mpsc::UnboundedSender<Message>;

/// A live link as the dispatcher tracks it: the channel to its writer task,
/// plus a handle to abort its reader task on `CloseLink`.
pub struct LinkEntry {
    pub tx: LinkSender,
    pub reader: AbortHandle,
}

/// Split `socket` into a reader task feeding `events` and a writer task
/// draining its own channel, mirroring the one-task-per-direction split the
/// teacher uses per accepted socket (see `server.rs`'s `tcp_server`).
pub fn spawn_link(link: LinkId, peer: SocketAddr, socket: TcpStream, events: mpsc::UnboundedSender<Event>) -> LinkEntry {
    socket.set_nodelay(true).ok();
    let (mut read_half, mut write_half) = socket.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let reader = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        let mut framer = Framer::default();

        loop {
            let n = match read_half.read_buf(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };

            framer.push(&buf[..n]);
            buf.clear();

            loop {
                match framer.next_frame() {
                    Some(Ok(message)) => {
                        if events.send(Event::Inbound { link, message }).is_err() {
                            return;
                        }
                    }
                    Some(Err(_)) => {
                        let _ = events.send(Event::LinkClosed { link, peer });
                        return;
                    }
                    None => break,
                }
            }
        }

        let _ = events.send(Event::LinkClosed { link, peer });
    });

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let mut out = BytesMut::new();
            codec::encode_frame(&mut out, &message);
            if write_half.write_all(&out).await.is_err() {
                break;
            }
        }
    });

    LinkEntry { tx, reader: reader.abort_handle() }
}

/// Connect to `peer` in the background and report the outcome on `events`.
/// The socket itself travels back through the event so that only the
/// engine task ever calls [`spawn_link`] — it is the sole owner of the
/// engine and must be the one to decide what a freshly opened link means.
pub fn spawn_connect(link: LinkId, peer: SocketAddr, events: mpsc::UnboundedSender<Event>) {
    tokio::spawn(async move {
        match TcpStream::connect(peer).await {
            Ok(socket) => {
                let _ = events.send(Event::Connected { link, peer, socket });
            }
            Err(e) => {
                let err = NodeError::TransportFailure { peer, reason: e.to_string() };
                log::warn!("{err}");
                let _ = events.send(Event::OpenFailed { link, peer });
            }
        }
    });
}
