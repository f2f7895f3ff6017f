//! Live reload over WebSocket.
//!
//! Pages served by the dev server connect to this endpoint. After each
//! finalize step the server pushes
//! `{"command":"reload","kind":"css|js|html"}` to every connected page;
//! clients that cannot be written to are dropped.

use crate::{log, pipeline::finalize::ArtifactKind, serve::bind_first_free};
use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    net::{IpAddr, TcpListener, TcpStream},
    sync::LazyLock,
    thread,
    time::Duration,
};
use tungstenite::{Message, WebSocket};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connected live reload clients. Empty unless `start` was called.
static CLIENTS: LazyLock<Mutex<Vec<WebSocket<TcpStream>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

#[derive(Debug, Serialize)]
struct ReloadMessage<'a> {
    command: &'a str,
    kind: &'a str,
}

impl ReloadMessage<'_> {
    fn for_kind(kind: ArtifactKind) -> ReloadMessage<'static> {
        ReloadMessage {
            command: "reload",
            kind: kind.name(),
        }
    }
}

/// Listen for live reload clients on the first free port at or after `port`.
///
/// Returns the bound port. Connections are accepted on a background thread.
pub fn start(interface: IpAddr, port: u16) -> Result<u16> {
    let (listener, port) = bind_first_free(port, |p| TcpListener::bind((interface, p)))?;
    log!("reload"; "ws://{interface}:{port}");

    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                // A client stuck in its handshake must not hold up the others
                Ok(stream) => {
                    thread::spawn(move || accept(stream));
                }
                Err(e) => log!("reload"; "accept failed: {e}"),
            }
        }
    });

    Ok(port)
}

/// Complete the WebSocket handshake and register the client.
fn accept(stream: TcpStream) {
    if let Err(e) = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)) {
        log!("reload"; "{e}");
        return;
    }
    match tungstenite::accept(stream) {
        Ok(socket) => {
            // Sockets are only written to from here on
            let _ = socket.get_ref().set_read_timeout(None);
            CLIENTS.lock().push(socket);
        }
        Err(e) => log!("reload"; "handshake failed: {e}"),
    }
}

/// Ask every connected page to reload `kind`.
pub fn notify(kind: ArtifactKind) {
    let mut clients = CLIENTS.lock();
    if clients.is_empty() {
        return;
    }

    let message = match serde_json::to_string(&ReloadMessage::for_kind(kind)) {
        Ok(message) => message,
        Err(e) => {
            log!("reload"; "{e}");
            return;
        }
    };

    clients.retain_mut(|socket| socket.send(Message::text(message.clone())).is_ok());
    log!("reload"; "{} ({} client(s))", kind.name(), clients.len());
}
