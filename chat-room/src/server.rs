//! HTTP front end: the chat page, the `/room` WebSocket and a stats endpoint.

use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{Html, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{config::RoomConfig, connection::Connection, hub::HubHandle, transport};

const CHAT_PAGE: &str = include_str!("../static/chat.html");

#[derive(Debug, Clone)]
pub struct AppState {
    hub: HubHandle,
    config: RoomConfig,
}

impl AppState {
    pub fn new(hub: HubHandle, config: RoomConfig) -> Self {
        Self { hub, config }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub members: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(chat_page))
        .route("/chat", get(chat_page))
        .route("/room", get(room_socket))
        .route("/stats", get(stats))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub struct HttpServer {
    listener: TcpListener,
    state: AppState,
}

impl HttpServer {
    pub fn new(listener: TcpListener, state: AppState) -> Self {
        Self { listener, state }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let HttpServer { listener, state } = self;
        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown)
            .await
            .context("http server failed")?;

        info!("http server stopped");
        Ok(())
    }
}

async fn chat_page() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn stats(State(state): State<AppState>) -> Result<Json<Stats>, StatusCode> {
    match state.hub.member_count().await {
        Ok(members) => Ok(Json(Stats { members })),
        Err(err) => {
            warn!(error = ?err, "failed to read room stats");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn room_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| admit_websocket(socket, state))
}

async fn admit_websocket(socket: WebSocket, state: AppState) {
    let (reader, writer) = transport::websocket(socket);

    let connection = match Connection::join(state.hub, state.config.queue_capacity).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(error = ?err, "failed to admit websocket client");
            return;
        }
    };
    let id = connection.id();
    info!(%id, "websocket client joined");

    if let Err(err) = connection.serve(reader, writer).await {
        warn!(%id, error = ?err, "websocket client closed with error");
        return;
    }
    info!(%id, "websocket client disconnected");
}
