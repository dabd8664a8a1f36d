//! HTTP media gateway
//!
//! Serves the files of one [`Session`] as plain HTTP resources on localhost:
//!
//! - `GET|HEAD /` → the default file chosen at startup
//! - `GET|HEAD /<index>` → file at that 0-based index
//! - `GET /.m3u` → playlist of every file
//! - `OPTIONS` with `Access-Control-Request-Headers` → CORS preflight
//!
//! Byte ranges follow RFC 7233 for a single range: 206 with `Content-Range`,
//! 416 when unsatisfiable. Every request gets its own engine reader, so a
//! stalled player connection never blocks other requests or the monitor.
//!
//! Readers are owned by pump tasks tracked by the gateway, never by the
//! connection. [`GatewayHandle::join`] only returns once every pump has
//! finished, so no reader outlives the gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{
    ACCEPT_RANGES, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
    CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HOST, ORIGIN, RANGE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::engine::FileReader;
use super::range::parse_range;
use super::session::Session;
use crate::models::ByteRange;

const TRANSFER_MODE_DLNA: HeaderName = HeaderName::from_static("transfermode.dlna.org");
const CONTENT_FEATURES_DLNA: HeaderName = HeaderName::from_static("contentfeatures.dlna.org");
const DLNA_FEATURES: &str =
    "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

const PREFLIGHT_MAX_AGE: &str = "1728000";
const PLAYLIST_CONTENT_TYPE: &str = "application/x-mpegurl; charset=utf-8";

/// How long in-flight responses may keep the server alive after shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Chunks buffered between a reader and its connection
const BODY_BUFFER_CHUNKS: usize = 4;

/// Errors from the gateway's listener
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

struct GatewayState {
    session: Arc<Session>,
    default_index: usize,
    port: u16,
    /// Cancelled once the grace period is over; ends every body
    streams: CancellationToken,
    /// Pump tasks and requests that are opening a reader
    pumps: TaskTracker,
}

/// A bound, not yet serving, gateway
pub struct Gateway {
    listener: TcpListener,
    addr: SocketAddr,
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Bind the listener. `default_index` is what `/` serves; `-1` means the
    /// first file.
    pub async fn bind(
        addr: SocketAddr,
        session: Arc<Session>,
        default_index: i64,
    ) -> Result<Self, GatewayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| GatewayError::Bind { addr, source })?;

        let state = Arc::new(GatewayState {
            session,
            default_index: usize::try_from(default_index).unwrap_or(0),
            port: addr.port(),
            streams: CancellationToken::new(),
            pumps: TaskTracker::new(),
        });

        Ok(Self {
            listener,
            addr,
            state,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Player-facing URL for file `index` (`-1` for the default route)
    pub fn url(&self, index: i64) -> String {
        stream_url(self.addr.port(), index)
    }

    /// Start serving on a background task
    pub fn spawn(self) -> GatewayHandle {
        let token = CancellationToken::new();
        let addr = self.addr;
        let streams = self.state.streams.clone();
        let pumps = self.state.pumps.clone();
        let app = router(self.state);
        let listener = self.listener;
        let shutdown = token.clone();

        info!("Gateway listening on http://{}", addr);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(GatewayError::Serve)
        });

        GatewayHandle {
            token,
            streams,
            pumps,
            task,
            addr,
        }
    }
}

/// URL a player should open for file `index` on a gateway at `port`
pub fn stream_url(port: u16, index: i64) -> String {
    if index < 0 {
        format!("http://localhost:{}", port)
    } else {
        format!("http://localhost:{}/{}", port, index)
    }
}

/// Stop switch and join handle of a running gateway
pub struct GatewayHandle {
    token: CancellationToken,
    streams: CancellationToken,
    pumps: TaskTracker,
    task: JoinHandle<Result<(), GatewayError>>,
    addr: SocketAddr,
}

impl GatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Close the listener. In-flight responses get [`SHUTDOWN_GRACE`] to end.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Wait for the serve loop and every response body to finish.
    ///
    /// A shutdown is a clean exit. Bodies still streaming after the grace
    /// period are cut off and their readers closed before this returns.
    pub async fn join(self) -> Result<(), GatewayError> {
        let GatewayHandle {
            token,
            streams,
            pumps,
            mut task,
            ..
        } = self;
        let deadline = async {
            token.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        };

        let served = tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) => {
                    error!("Gateway task failed: {}", e);
                    Ok(())
                }
            },
            _ = deadline => {
                warn!(
                    streams = pumps.len(),
                    "Gateway connections still open after shutdown, closing"
                );
                task.abort();
                Ok(())
            }
        };

        streams.cancel();
        pumps.close();
        pumps.wait().await;
        debug!("Gateway streams closed");
        served
    }
}

fn router(state: Arc<GatewayState>) -> Router {
    Router::new().fallback(handle).with_state(state)
}

async fn handle(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let origin = headers.get(ORIGIN).cloned();

    if method == Method::OPTIONS {
        if let Some(requested) = headers.get(ACCESS_CONTROL_REQUEST_HEADERS) {
            return preflight(origin, requested.clone());
        }
    }

    let mut response = route(&state, &method, &uri, &headers).await;
    if let Some(origin) = origin {
        response
            .headers_mut()
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }

    debug!(
        %method,
        path = %uri.path(),
        range = ?headers.get(RANGE),
        status = %response.status(),
        "Gateway request"
    );
    response
}

fn preflight(origin: Option<HeaderValue>, requested: HeaderValue) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(origin) = origin {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, requested);
    headers.insert(
        ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    (StatusCode::OK, headers).into_response()
}

async fn route(state: &GatewayState, method: &Method, uri: &Uri, headers: &HeaderMap) -> Response {
    let path = match uri.path() {
        "" | "/" => format!("/{}", state.default_index),
        p => p.to_string(),
    };

    if path == "/favicon.ico" {
        return StatusCode::NOT_FOUND.into_response();
    }

    if path == "/.m3u" {
        return playlist(state, method, headers);
    }

    let raw = &path[1..];
    let name = urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string());

    match resolve(&state.session, &name) {
        Some(index) => serve_file(state, index, method, headers).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Map a request path (sans leading slash) to a file index
fn resolve(session: &Session, name: &str) -> Option<usize> {
    let files = session.files();
    if files.is_empty() {
        return None;
    }
    if name == session.name() {
        return Some(0);
    }
    if let Some(file) = files.iter().find(|f| f.path == name) {
        return Some(file.index);
    }
    name.parse::<usize>().ok().filter(|&i| i < files.len())
}

fn playlist(state: &GatewayState, method: &Method, headers: &HeaderMap) -> Response {
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(host_without_port)
        .filter(|h| !h.is_empty())
        .unwrap_or("localhost");

    let body = build_playlist(state.session.files().iter().map(|f| f.path.as_str()), host, state.port);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static(PLAYLIST_CONTENT_TYPE));
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    if *method == Method::HEAD {
        return (StatusCode::OK, response_headers).into_response();
    }
    (StatusCode::OK, response_headers, body).into_response()
}

/// `#EXTM3U` playlist with one entry per file, in enumeration order
pub fn build_playlist<'a>(paths: impl IntoIterator<Item = &'a str>, host: &str, port: u16) -> String {
    let mut playlist = String::from("#EXTM3U\n");
    for (index, path) in paths.into_iter().enumerate() {
        playlist.push_str(&format!(
            "#EXTINF:-1,{}\nhttp://{}:{}/{}\n",
            path, host, port, index
        ));
    }
    playlist
}

fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [::1]:3001
        return host.find(']').map(|end| &host[..=end]).unwrap_or(host);
    }
    host.split(':').next().unwrap_or(host)
}

async fn serve_file(
    state: &GatewayState,
    index: usize,
    method: &Method,
    headers: &HeaderMap,
) -> Response {
    let Some(file) = state.session.file(index) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let range_header = match headers.get(RANGE).map(|v| v.to_str()) {
        None => None,
        Some(Ok(value)) => Some(value),
        Some(Err(_)) => return StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
    };
    let range = match parse_range(range_header, file.length) {
        Ok(range) => range,
        Err(e) => {
            debug!(file = %file.path, "{}", e);
            return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
        }
    };

    let mime = mime_guess::from_path(&file.path).first_or_octet_stream();
    let mut response_headers = HeaderMap::new();
    response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        response_headers.insert(CONTENT_TYPE, value);
    }
    response_headers.insert(TRANSFER_MODE_DLNA, HeaderValue::from_static("Streaming"));
    response_headers.insert(CONTENT_FEATURES_DLNA, HeaderValue::from_static(DLNA_FEATURES));

    let (status, window) = match range {
        None => {
            response_headers.insert(CONTENT_LENGTH, HeaderValue::from(file.length));
            (StatusCode::OK, None)
        }
        Some(range) => {
            response_headers.insert(CONTENT_LENGTH, HeaderValue::from(range.len()));
            if let Ok(value) = HeaderValue::from_str(&range.content_range(file.length)) {
                response_headers.insert(CONTENT_RANGE, value);
            }
            (StatusCode::PARTIAL_CONTENT, Some(range))
        }
    };

    if *method == Method::HEAD {
        return (status, response_headers).into_response();
    }

    match open_body(state, index, file.length, window).await {
        Ok(body) => (status, response_headers, body).into_response(),
        Err(e) => {
            error!(file = %file.path, "Failed to open stream: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Reader for exactly the bytes to send, as a streaming body.
///
/// The reader is moved into a pump task on the gateway's tracker; the body
/// only sees a channel, so cutting the pump closes the reader even when the
/// client has stopped reading.
async fn open_body(
    state: &GatewayState,
    index: usize,
    length: u64,
    window: Option<ByteRange>,
) -> std::io::Result<Body> {
    // Held until the pump is spawned so `join` waits for this request too
    let _opening = state.pumps.token();
    if state.streams.is_cancelled() {
        return Err(shutting_down());
    }

    let (start, len) = match window {
        Some(range) => (range.start, range.len()),
        None => (0, length),
    };

    let reader = tokio::select! {
        biased;
        _ = state.streams.cancelled() => return Err(shutting_down()),
        opened = open_at(&state.session, index, start) => opened?,
    };

    let (tx, rx) = mpsc::channel(BODY_BUFFER_CHUNKS);
    let streams = state.streams.clone();
    state.pumps.spawn(async move {
        tokio::select! {
            _ = streams.cancelled() => debug!(index, "Stream cut off by shutdown"),
            _ = pump(reader, len, tx) => {}
        }
    });

    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    Ok(Body::from_stream(chunks))
}

async fn open_at(
    session: &Session,
    index: usize,
    start: u64,
) -> std::io::Result<Box<dyn FileReader>> {
    let mut reader = session
        .open_reader(index)
        .await
        .map_err(std::io::Error::other)?;
    if start > 0 {
        reader.seek(std::io::SeekFrom::Start(start)).await?;
    }
    Ok(reader)
}

/// Copy `len` bytes from `reader` into the body channel until either side ends
async fn pump(
    reader: Box<dyn FileReader>,
    len: u64,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
) {
    let mut chunks = ReaderStream::new(reader.take(len));
    while let Some(chunk) = chunks.next().await {
        let failed = chunk.is_err();
        if tx.send(chunk).await.is_err() || failed {
            // Client went away or the read failed
            break;
        }
    }
}

fn shutting_down() -> std::io::Error {
    std::io::Error::other("gateway is shutting down")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        assert_eq!(stream_url(3001, -1), "http://localhost:3001");
        assert_eq!(stream_url(3001, 4), "http://localhost:3001/4");
    }

    #[test]
    fn test_build_playlist() {
        let playlist = build_playlist(["a.mkv", "b.mkv"], "localhost", 3001);
        assert_eq!(
            playlist,
            "#EXTM3U\n#EXTINF:-1,a.mkv\nhttp://localhost:3001/0\n#EXTINF:-1,b.mkv\nhttp://localhost:3001/1\n"
        );
    }

    #[test]
    fn test_host_without_port() {
        assert_eq!(host_without_port("localhost:3001"), "localhost");
        assert_eq!(host_without_port("127.0.0.1"), "127.0.0.1");
        assert_eq!(host_without_port("[::1]:3001"), "[::1]");
    }
}
