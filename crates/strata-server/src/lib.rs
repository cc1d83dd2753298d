//! HTTP diagnostics endpoint for a Strata engine.
//!
//! Routes:
//! - `GET /v1/debug`: JSON [`DebugInfo`](strata_core::DebugInfo) (version,
//!   commit, memory figures, thread dump, engine counters)
//! - `GET /v1/health`: `{"status":"ok"}`
//!
//! Anything else under a known path answers 405, unknown paths 404. The
//! server never mutates the store.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use strata_core::{CancelToken, Diagnostics};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info};

pub const DEBUG_PATH: &str = "/v1/debug";
pub const HEALTH_PATH: &str = "/v1/health";

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Debug,
    Health,
}

/// Map a request target to a route, ignoring any query string.
pub fn parse_route(url: &str) -> Option<Route> {
    let path = url.split_once('?').map_or(url, |(p, _)| p);
    match path.trim_end_matches('/') {
        DEBUG_PATH => Some(Route::Debug),
        HEALTH_PATH => Some(Route::Health),
        _ => None,
    }
}

fn respond_json(req: Request, code: u16, body: Vec<u8>) {
    let mut resp = Response::from_data(body).with_status_code(StatusCode(code));
    if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
        resp.add_header(header);
    }
    let _ = req.respond(resp);
}

fn respond_err(req: Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

/// Handle a single HTTP request.
pub fn handle_request(diagnostics: &dyn Diagnostics, req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    let Some(route) = parse_route(&url) else {
        respond_err(req, 404, "not found");
        return;
    };
    if method != Method::Get {
        respond_err(req, 405, "method not allowed");
        return;
    }

    let body = match route {
        Route::Debug => serde_json::to_vec(&diagnostics.collect()),
        Route::Health => serde_json::to_vec(&Health { status: "ok" }),
    };
    match body {
        Ok(body) => respond_json(req, 200, body),
        Err(e) => {
            error!("{url}: encoding response: {e}");
            respond_err(req, 500, "encoding error");
        }
    }
}

/// Serve requests until `stop` is cancelled.
pub fn serve(server: &Server, diagnostics: &dyn Diagnostics, stop: &CancelToken) {
    while !stop.is_cancelled() {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(req)) => handle_request(diagnostics, req),
            Ok(None) => {}
            Err(e) => {
                error!("accept failed: {e}");
                break;
            }
        }
    }
    info!("diagnostics server stopped");
}

/// Bind `addr` and serve until `stop` is cancelled, blocking the current thread.
pub fn run_server(
    diagnostics: &dyn Diagnostics,
    addr: &str,
    stop: &CancelToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let server = Server::http(addr)?;
    info!("listening on {addr}");
    serve(&server, diagnostics, stop);
    Ok(())
}

/// A test helper that serves diagnostics on a random port in a background thread.
///
/// Drop the `TestServer` to stop the server.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    stop: CancelToken,
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Binds to `127.0.0.1:0`.
    pub fn start(diagnostics: Arc<dyn Diagnostics>) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let stop = CancelToken::new();
        let srv = Arc::clone(&server);
        let token = stop.clone();
        let handle = std::thread::spawn(move || serve(&srv, diagnostics.as_ref(), &token));

        Self {
            url,
            port,
            stop,
            server,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.cancel();
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
