//! Development server: a static file server for the output directory and a
//! live-reload WebSocket channel.
//!
//! HTML pages get a small client script injected. The script connects to the
//! WebSocket listener and either reloads the page or swaps the changed
//! stylesheet in place, depending on the message it receives.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use axum::Router;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use tower_http::services::ServeDir;
use tungstenite::WebSocket;

use crate::config::ServerOptions;
use crate::error::ServeError;
use crate::live::{LiveMessage, Reload, classify};

const CLIENT_PATH: &str = "/__kumade/client.js";
const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Handle to a running dev server. Dropping it stops nothing: the listeners
/// live as long as the process.
pub struct DevServer {
    dist: Utf8PathBuf,
    url: String,
    live_port: u16,
    tx: Sender<LiveMessage>,
}

impl DevServer {
    /// Binds both listeners and starts serving `dist`. Must be called from
    /// within a tokio runtime.
    pub async fn start(
        dist: impl Into<Utf8PathBuf>,
        options: &ServerOptions,
    ) -> Result<Self, ServeError> {
        let dist = dist.into();

        let (ws, live_port) = reserve_port(options.live_port)?;
        let clients = Clients::default();
        let _thread_i = new_thread_ws_incoming(ws, clients.clone());
        let (tx, _thread_o) = new_thread_ws_broadcast(clients);

        let listener = bind_http(options.port).await?;
        let port = listener.local_addr()?.port();
        let url = format!("http://localhost:{port}/");

        let app = router(&dist, live_port);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP server stopped: {e}");
            }
        });

        tracing::info!(url = %style(&url).yellow(), "starting a HTTP server");

        Ok(Self {
            dist,
            url,
            live_port,
            tx,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn live_port(&self) -> u16 {
        self.live_port
    }

    /// Pushes the right message for a set of written files (absolute paths
    /// under the served directory) to every connected client.
    pub fn notify_clients(&self, written: &[Utf8PathBuf]) {
        for message in classify(&self.dist, written) {
            self.send(message);
        }
    }

    fn send(&self, message: LiveMessage) {
        if self.tx.send(message).is_err() {
            tracing::warn!("live-reload channel is closed");
        }
    }
}

impl Reload for DevServer {
    fn stream(&self, written: &[Utf8PathBuf]) {
        self.notify_clients(written);
    }

    fn reload(&self) {
        self.send(LiveMessage::Reload);
    }
}

fn reserve_port(port: u16) -> Result<(TcpListener, u16), ServeError> {
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

async fn bind_http(port: u16) -> Result<tokio::net::TcpListener, ServeError> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    match tokio::net::TcpListener::bind(address).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            tracing::warn!("port {port} is taken ({e}), picking a free one");
            let address = SocketAddr::from(([127, 0, 0, 1], 0));
            Ok(tokio::net::TcpListener::bind(address).await?)
        }
    }
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let socket = match stream.map(tungstenite::accept) {
                Ok(Ok(socket)) => socket,
                Ok(Err(e)) => {
                    tracing::debug!("WebSocket handshake failed: {e}");
                    continue;
                }
                Err(e) => {
                    tracing::debug!("WebSocket connection failed: {e}");
                    continue;
                }
            };

            match clients.lock() {
                Ok(mut clients) => clients.push(socket),
                Err(_) => break,
            }
        }
    })
}

fn new_thread_ws_broadcast(clients: Clients) -> (Sender<LiveMessage>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel::<LiveMessage>();

    let thread = std::thread::spawn(move || {
        while let Ok(message) = rx.recv() {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("couldn't encode {message:?}: {e}");
                    continue;
                }
            };

            let Ok(mut clients) = clients.lock() else {
                break;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(text.as_str().into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e))
                        if e.kind() == std::io::ErrorKind::BrokenPipe =>
                    {
                        broken.push(i)
                    }
                    Err(
                        tungstenite::error::Error::ConnectionClosed
                        | tungstenite::error::Error::AlreadyClosed,
                    ) => broken.push(i),
                    Err(e) => tracing::error!("Error: {e:?}"),
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the most recent connections
            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }

            tracing::debug!("sent {text} to {} client(s)", clients.len());
        }
    });

    (tx, thread)
}

fn router(dist: &Utf8Path, live_port: u16) -> Router {
    let script = client_script(live_port);

    Router::new()
        .route(
            CLIENT_PATH,
            get(move || {
                let script = script.clone();
                async move { ([(header::CONTENT_TYPE, "text/javascript")], script) }
            }),
        )
        // path to the output directory with the built website
        .fallback_service(ServeDir::new(dist))
        .layer(axum::middleware::map_response(inject_client))
}

async fn inject_client(response: Response) -> Response {
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if response.status() != StatusCode::OK || !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("couldn't read response body: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Adds the client script tag before `</body>`, or at the end when the page
/// has no body tag.
fn inject_script(html: &str) -> String {
    let tag = format!(r#"<script src="{CLIENT_PATH}"></script>"#);

    match html.rfind("</body>") {
        Some(index) => format!("{}{tag}{}", &html[..index], &html[index..]),
        None => format!("{html}{tag}"),
    }
}

fn client_script(port: u16) -> String {
    format!(
        r#"
const socket = new WebSocket(`ws://${{location.hostname}}:{port}`);
socket.addEventListener("message", event => {{
    const message = JSON.parse(event.data);
    if (message.type !== "inject") {{
        window.location.reload();
        return;
    }}
    const link = [...document.querySelectorAll('link[rel="stylesheet"]')]
        .find(link => new URL(link.href, location.href).pathname === message.path);
    if (!link) {{
        window.location.reload();
        return;
    }}
    const url = new URL(link.href, location.href);
    url.searchParams.set("v", Date.now());
    link.href = url.toString();
}});
"#
    )
}
