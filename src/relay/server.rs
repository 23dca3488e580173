//! HTTP surface: the websocket endpoint plus the operational routes.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /ws` | websocket upgrade; one relay connection per socket |
//! | `GET /health` | room, connection and tracker counts |
//! | `GET /client-config` | values the client apps need (map tile URL) |

use crate::config::{AllowedOrigins, Config};
use crate::protocol::{decode, encode};
use crate::relay::Relay;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub config: Arc<Config>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub map_tile_url: Option<String>,
}

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/client-config", get(client_config))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origins {
        AllowedOrigins::Any => layer.allow_origin(Any),
        AllowedOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect();
            layer.allow_origin(AllowOrigin::list(values))
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Response {
    match state.relay.health().await {
        Ok(health) => Json(health).into_response(),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

pub async fn client_config(State(state): State<AppState>) -> Json<ClientConfig> {
    Json(ClientConfig {
        map_tile_url: state.config.map_tile_url.clone(),
    })
}

pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.config.allowed_origins.allows(origin) {
        warn!(?origin, "Websocket upgrade from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }
    let Some(ws) = ws else {
        return StatusCode::UPGRADE_REQUIRED.into_response();
    };
    ws.on_upgrade(move |socket| serve_socket(socket, state.relay))
}

/// Pump one socket: outbound events are written by a dedicated task, inbound frames
/// are decoded and handled in arrival order.
async fn serve_socket(socket: WebSocket, relay: Relay) {
    let (connection, mut outbound) = match relay.connect().await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "Rejecting socket");
            return;
        }
    };
    info!(%connection, "Socket open");

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match encode(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(%connection, error = %e, "Cannot encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut writer_done = false;
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            result = &mut writer => {
                // The registry evicted this connection and its queue ran dry.
                writer_done = true;
                if let Err(e) = result {
                    error!(%connection, error = ?e, "Socket writer failed");
                }
                debug!(%connection, "Outbound queue closed, dropping socket");
                break;
            }
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => continue,
        };
        match decode(&text) {
            Ok(event) => {
                if let Err(e) = relay.handle(connection, event).await {
                    debug!(%connection, error = %e, "Event not applied");
                }
            }
            Err(e) => warn!(%connection, error = %e, "Malformed event dropped"),
        }
    }

    if let Err(e) = relay.disconnect(connection).await {
        warn!(%connection, error = %e, "Disconnect cleanup failed");
    }
    // The registry dropped this connection's queue, so the writer drains and stops.
    if !writer_done {
        if let Err(e) = writer.await {
            error!(%connection, error = ?e, "Socket writer failed");
        }
    }
    info!(%connection, "Socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::RelaySystem;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let system = RelaySystem::in_memory(Config::default());
        let (_conn, _rx) = system.relay.connect().await.unwrap();
        let app = build_app(system.app_state());

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"status": "ok", "activeRooms": 0, "connectedClients": 1, "activeTrackers": 0})
        );

        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_config_passes_tile_url_through() {
        let config = Config {
            map_tile_url: Some("https://tiles.example.com/{z}/{x}/{y}.png".into()),
            ..Config::default()
        };
        let system = RelaySystem::in_memory(config);
        let app = build_app(system.app_state());

        let response = app
            .oneshot(Request::get("/client-config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"mapTileUrl": "https://tiles.example.com/{z}/{x}/{y}.png"})
        );

        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_websocket_rejects_disallowed_origin() {
        let config = Config {
            allowed_origins: AllowedOrigins::List(vec!["https://admin.example.com".into()]),
            ..Config::default()
        };
        let system = RelaySystem::in_memory(config);
        let app = build_app(system.app_state());

        let request = Request::get("/ws")
            .header(header::ORIGIN, "https://evil.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let request = Request::get("/ws")
            .header(header::ORIGIN, "https://admin.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);

        system.shutdown().await.unwrap();
    }
}
