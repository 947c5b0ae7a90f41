mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use stockroom_api::middleware::decode_claims;
use stockroom_api::{AppState, AppStateInner};
use stockroom_engine::{Conflict, Engine, EngineError};
use stockroom_gateway::BroadcastHub;

use crate::config::ServerConfig;

#[derive(Clone)]
struct GatewayState {
    hub: BroadcastHub,
    engine: Arc<Engine>,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockroom=debug,tower_http=debug".into()),
        )
        .init();

    // Engine events flow straight into the hub
    let hub = BroadcastHub::new(config.session_queue);
    let engine = Arc::new(Engine::new(config.engine.clone(), Arc::new(hub.clone())));

    for seed in &config.seed_rooms {
        match engine
            .seed_room(&seed.name, seed.kind, seed.symbol.as_deref())
            .await
        {
            Ok(room) => info!("Seeded room {} ({:?})", room.id, room.kind),
            Err(EngineError::Conflict(Conflict::RoomExists(id))) => {
                warn!("Seed room {} listed twice, skipping", id)
            }
            Err(e) => return Err(anyhow::anyhow!("seeding room '{}': {}", seed.name, e)),
        }
    }

    let app_state: AppState = Arc::new(AppStateInner {
        engine: engine.clone(),
        jwt_secret: config.jwt_secret.clone(),
        request_timeout: config.request_timeout,
    });

    let gateway_state = GatewayState {
        hub,
        engine,
        jwt_secret: config.jwt_secret.clone(),
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let app = Router::new()
        .merge(stockroom_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Stockroom server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also come as `?token=`.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let Some(claims) = query
        .token
        .or(bearer)
        .and_then(|token| decode_claims(&token, &state.jwt_secret))
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let actor = claims.actor();
    ws.on_upgrade(move |socket| {
        stockroom_gateway::handle_connection(socket, state.hub, state.engine, actor)
    })
}
