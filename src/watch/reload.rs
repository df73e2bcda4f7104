//! Live-reload broadcast.
//!
//! Messages are JSON text frames pushed to every connected browser session:
//!
//! * `{"kind":"reload"}` reloads the page.
//! * `{"kind":"inject","paths":["/css/"]}` re-fetches every stylesheet whose
//!   URL starts with one of the paths, without reloading the page.
//! * `{"kind":"error","task":"styles","message":"..."}` is printed to the
//!   browser console.

use std::sync::mpsc::{Receiver, Sender};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Reload {
    #[serde(rename = "reload")]
    Page,
    Inject { paths: Vec<String> },
    Error { task: String, message: String },
}

impl Reload {
    /// Style injection for everything under `/css/`.
    pub fn styles() -> Self {
        Reload::Inject {
            paths: vec![format!("/{}/", crate::config::layout::OUT_STYLES)],
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"kind":"reload"}"#))
    }
}

/// Sending half of the live-reload channel. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct Reloader {
    tx: Sender<Reload>,
}

impl Reloader {
    pub fn channel() -> (Self, Receiver<Reload>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: Reload) {
        if self.tx.send(message).is_err() {
            tracing::debug!("live reload channel closed");
        }
    }
}

/// Client script appended to pages in dev mode.
pub fn client_script(port: u16) -> String {
    format!(
        r#"<script>(function(){{
var ws=new WebSocket("ws://"+location.hostname+":{port}/");
ws.onmessage=function(e){{
var m=JSON.parse(e.data);
if(m.kind==="reload"){{location.reload();}}
else if(m.kind==="inject"){{document.querySelectorAll('link[rel="stylesheet"]').forEach(function(l){{
var u=new URL(l.href);if(m.paths.some(function(p){{return u.pathname.indexOf(p)===0;}})){{u.searchParams.set("livereload",Date.now());l.href=u.toString();}}}});}}
else if(m.kind==="error"){{console.error("["+m.task+"] "+m.message);}}
}};
}})();</script>"#
    )
}

#[cfg(feature = "live")]
pub(crate) use sockets::{reserve_port, spawn};

#[cfg(feature = "live")]
mod sockets {
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc::Receiver;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread::JoinHandle;

    use tungstenite::WebSocket;

    use super::Reload;

    const MAX_CLIENTS: usize = 10;

    type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

    /// Bind the preferred port, or any free port when it is taken.
    pub(crate) fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
        let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
            Ok(sock) => sock,
            Err(_) => TcpListener::bind("127.0.0.1:0")?,
        };

        let port = listener.local_addr()?.port();
        Ok((listener, port))
    }

    /// Accept browser sessions on `listener` and broadcast every message from
    /// `rx` to them.
    pub(crate) fn spawn(listener: TcpListener, rx: Receiver<Reload>) -> (JoinHandle<()>, JoinHandle<()>) {
        let clients = Clients::default();
        let incoming = new_thread_ws_incoming(listener, clients.clone());
        let outgoing = new_thread_ws_reload(rx, clients);
        (incoming, outgoing)
    }

    fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
        std::thread::spawn(move || {
            for stream in server.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::debug!("live reload accept failed: {e}");
                        continue;
                    }
                };

                match tungstenite::accept(stream) {
                    Ok(socket) => {
                        clients
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(socket);
                    }
                    Err(e) => tracing::debug!("live reload handshake failed: {e}"),
                }
            }
        })
    }

    fn new_thread_ws_reload(rx: Receiver<Reload>, clients: Clients) -> JoinHandle<()> {
        std::thread::spawn(move || {
            while let Ok(message) = rx.recv() {
                let text = message.to_json();
                let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
                let mut broken = vec![];

                for (i, socket) in clients.iter_mut().enumerate() {
                    match socket.send(text.clone().into()) {
                        Ok(_) => {}
                        Err(
                            tungstenite::Error::Io(_)
                            | tungstenite::Error::ConnectionClosed
                            | tungstenite::Error::AlreadyClosed,
                        ) => broken.push(i),
                        Err(e) => tracing::warn!("live reload send failed: {e}"),
                    }
                }

                for i in broken.into_iter().rev() {
                    clients.remove(i);
                }

                // Close all but the most recent sessions
                let len = clients.len();
                if len > MAX_CLIENTS {
                    for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                        socket.close(None).ok();
                    }
                }

                tracing::debug!(sessions = clients.len(), "sent {text}");
            }
        })
    }
}
