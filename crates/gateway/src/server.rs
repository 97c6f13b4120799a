use crate::config::GatewayConfig;
use crate::state::{AppState, FramePacket};
use axum::{
    Router,
    extract::{State, WebSocketUpgrade, ws::Message, ws::WebSocket},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/snapshot.jpg", get(snapshot))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server<F>(config: GatewayConfig, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    tracing::info!("Display server listening on {}", config.addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Display server stopped");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn snapshot(State(state): State<AppState>) -> Response {
    let packet = state.packets.borrow().clone();
    match packet {
        Some(packet) => (
            [(header::CONTENT_TYPE, "image/jpeg")],
            packet.jpeg_data.clone(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no frame yet").into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state.packets))
}

async fn handle_socket(
    mut socket: WebSocket,
    mut packets: watch::Receiver<Option<Arc<FramePacket>>>,
) {
    tracing::info!("New WebSocket connection established");

    while packets.changed().await.is_ok() {
        let latest = packets.borrow_and_update().clone();
        let Some(packet) = latest else {
            continue;
        };

        let binary_msg = match packet.to_binary() {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("JSON serialization error: {}", e);
                continue;
            }
        };

        if socket.send(Message::Binary(binary_msg)).await.is_err() {
            tracing::info!("WebSocket client disconnected");
            return;
        }
    }

    tracing::info!("Frame source closed, ending WebSocket stream");
}
