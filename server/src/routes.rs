//! HTTP surface: WebSocket viewers, the viewer page, and the stats endpoint.

use std::path::Path;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::services::ServeDir;
use tracing::{debug, info, instrument, warn};

use relay_hub::{CodedUnit, Hub, HubStats};

const INDEX_HTML: &str = include_str!("../web/index.html");
const VIEWER_JS: &str = include_str!("../web/viewer.js");

/// State shared with request handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    /// Per-viewer queue depth.
    pub queue_capacity: usize,
    /// Path viewers connect to.
    pub ws_path: String,
}

/// Build the router: viewers on the WebSocket path, counters on `/stats`.
///
/// Everything else comes from `static_dir` when given, otherwise from the
/// built-in viewer page at `/`.
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let ws_path = state.ws_path.clone();
    let routes = Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/stats", get(stats));

    let routes = match static_dir {
        Some(dir) => routes.fallback_service(ServeDir::new(dir)),
        None => routes
            .route("/", get(viewer_page))
            .route("/viewer.js", get(viewer_script)),
    };
    routes.with_state(state)
}

async fn viewer_page(State(state): State<AppState>) -> Html<String> {
    Html(INDEX_HTML.replace("__WS_PATH__", &state.ws_path))
}

async fn viewer_script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript; charset=utf-8")], VIEWER_JS)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| viewer_session(socket, state))
}

async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}

/// Serve one viewer until either side goes away.
async fn viewer_session(socket: WebSocket, state: AppState) {
    let (unit_tx, unit_rx) = mpsc::channel(state.queue_capacity);
    let id = state.hub.attach(unit_tx);
    if !state.hub.is_attached(id) {
        warn!(viewer = %id, "Viewer rejected, closing connection");
        return;
    }
    info!(viewer = %id, viewers = state.hub.viewer_count(), "Viewer connected");

    let (ws_tx, mut ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_units(unit_rx, ws_tx));

    // Inbound messages are ignored; the loop only watches for the peer leaving
    let reader = async {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    tokio::select! {
        _ = reader => debug!(viewer = %id, "Viewer closed the connection"),
        result = &mut writer => match result {
            Ok(Ok(())) => debug!(viewer = %id, "Viewer released by hub"),
            Ok(Err(e)) => debug!(viewer = %id, error = %e, "Viewer write failed"),
            Err(e) => debug!(viewer = %id, error = %e, "Viewer writer aborted"),
        },
    }

    state.hub.detach(id);
    writer.abort();
    info!(viewer = %id, viewers = state.hub.viewer_count(), "Viewer disconnected");
}

/// Forward queued units as binary messages until the hub drops the queue.
#[instrument(level = "debug", skip_all)]
pub async fn write_units<S>(mut units: mpsc::Receiver<CodedUnit>, mut ws_tx: S) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    while let Some(unit) = units.recv().await {
        ws_tx.send(Message::Binary(unit.into_bytes())).await?;
    }
    ws_tx.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use relay_hub::HubConfig;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xCE];
    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88];
    const START: &[u8] = &[0, 0, 0, 1];

    /// Sink that records every message it is given.
    fn recording_sink() -> (
        impl Sink<Message, Error = Infallible> + Unpin,
        std::sync::mpsc::Receiver<Message>,
    ) {
        let (tx, rx) = std::sync::mpsc::channel();
        let sink = futures_util::sink::unfold(tx, |tx, msg: Message| async move {
            let _ = tx.send(msg);
            Ok::<_, Infallible>(tx)
        });
        (Box::pin(sink), rx)
    }

    fn state() -> AppState {
        AppState {
            hub: Arc::new(Hub::new(HubConfig::default())),
            queue_capacity: 16,
            ws_path: "/live".to_string(),
        }
    }

    /// Serve `app` on a loopback port and return the raw response to one GET.
    async fn http_get(app: Router, path: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        server.abort();
        response
    }

    #[tokio::test]
    async fn test_write_units_sends_binary_frames_in_order() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(CodedUnit::new(Bytes::from_static(SPS))).await.unwrap();
        tx.send(CodedUnit::new(Bytes::from_static(IDR))).await.unwrap();
        drop(tx);

        let (sink, recorded) = recording_sink();
        write_units(rx, sink).await.unwrap();

        let sent: Vec<Message> = recorded.try_iter().collect();
        assert_eq!(
            sent,
            vec![
                Message::Binary(Bytes::from_static(SPS)),
                Message::Binary(Bytes::from_static(IDR)),
            ]
        );
    }

    #[tokio::test]
    async fn test_viewer_queue_receives_replay_then_live() {
        let state = state();
        state.hub.ingest(&[SPS, PPS, IDR, START].concat());

        let (tx, rx) = mpsc::channel(state.queue_capacity);
        let id = state.hub.attach(tx);
        state.hub.ingest(&[0x41, 0x9A]);
        state.hub.ingest(START);
        state.hub.detach(id);

        let (sink, recorded) = recording_sink();
        write_units(rx, sink).await.unwrap();

        let payloads: Vec<Bytes> = recorded
            .try_iter()
            .map(|m| match m {
                Message::Binary(b) => b,
                other => panic!("unexpected message {:?}", other),
            })
            .collect();
        assert_eq!(payloads.len(), 4);
        assert_eq!(&payloads[0][..], SPS);
        assert_eq!(&payloads[1][..], PPS);
        assert_eq!(&payloads[2][..], IDR);
        assert_eq!(&payloads[3][..], &[0, 0, 0, 1, 0x41, 0x9A]);
    }

    #[tokio::test]
    async fn test_slow_viewer_queue_is_dropped() {
        let state = state();
        let (tx, _rx) = mpsc::channel(1);
        let id = state.hub.attach(tx);

        state.hub.ingest(&[SPS, PPS, START].concat());

        assert!(!state.hub.is_attached(id));
        assert_eq!(state.hub.stats().sinks_dropped, 1);
    }

    #[tokio::test]
    async fn test_stats_handler_reports_hub() {
        let state = state();
        state.hub.ingest(&[SPS, PPS, IDR, START].concat());

        let Json(report) = stats(State(state.clone())).await;
        assert_eq!(report.viewers, 0);
        assert_eq!(report.cached_units, 3);
        assert_eq!(report.key_units, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cache_generation"], 1);
    }

    #[tokio::test]
    async fn test_viewer_page_points_at_ws_path() {
        let app = router(state(), None);

        let page = http_get(app.clone(), "/").await;
        assert!(page.starts_with("HTTP/1.1 200"), "{}", page);
        assert!(page.contains(r#"data-ws-path="/live""#));

        let script = http_get(app.clone(), "/viewer.js").await;
        assert!(script.contains("text/javascript"));
        assert!(script.contains("VideoDecoder"));

        let stats = http_get(app, "/stats").await;
        assert!(stats.contains(r#""viewers":0"#), "{}", stats);
    }

    #[tokio::test]
    async fn test_static_dir_replaces_viewer_page() {
        let dir = std::env::temp_dir().join(format!("h264-relay-web-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<p>custom viewer</p>").unwrap();

        let app = router(state(), Some(&dir));
        let page = http_get(app.clone(), "/").await;
        let missing = http_get(app.clone(), "/viewer.js").await;
        let stats = http_get(app, "/stats").await;
        std::fs::remove_dir_all(&dir).ok();

        assert!(page.starts_with("HTTP/1.1 200"), "{}", page);
        assert!(page.contains("custom viewer"));
        assert!(missing.starts_with("HTTP/1.1 404"), "{}", missing);
        assert!(stats.contains(r#""cache_generation":0"#), "{}", stats);
    }
}
