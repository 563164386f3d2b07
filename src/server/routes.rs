//! HTTP routes + WebSocket feeds for the link/relay protocol.
//!
//! Thin adaptation over `Linker`: JSON in/out, client identity carried in the
//! `ct` cookie (15-day window, refreshed on issuance — transport policy, not
//! core policy), and two streaming endpoints that replay a feed from a read
//! id and then live-tail it.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::{HeaderMap, SET_COOKIE, USER_AGENT};
use axum::http::StatusCode;
use axum::response::{AppendHeaders, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::LinkerError;
use crate::linker::Linker;
use crate::relay::Subscription;

const CLIENT_TOKEN_COOKIE: &str = "ct";

#[derive(Clone)]
pub struct AppState {
    pub linker: Arc<Linker>,
    pub app_name: String,
}

impl AppState {
    pub fn new(linker: Arc<Linker>, app_name: impl Into<String>) -> Self {
        Self { linker, app_name: app_name.into() }
    }
}

pub fn create_router(linker: Arc<Linker>) -> Router {
    create_router_with_name(linker, "linkrelay")
}

pub fn create_router_with_name(linker: Arc<Linker>, app_name: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate-code", post(generate_code))
        .route("/link-info/:code", get(link_info))
        .route("/call-wallet/:session_token", post(call_wallet))
        .route("/wallet-called/:wallet_token", post(wallet_called))
        .route("/link-wallet/:wallet_token", post(link_wallet))
        .route("/wallet-links/:wallet_token", get(wallet_links))
        .route("/unlink", post(unlink))
        .route("/unlink-wallet/:wallet_token", post(unlink_wallet))
        .route("/linked-messages/:session_token/:read_id", get(linked_messages))
        .route("/wallet-messages/:wallet_token/:read_id", get(wallet_messages))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(linker, app_name))
}

// Cookie glue. The corpus carries no cookie crate; parsing one pair out of
// the Cookie header and emitting one Set-Cookie is all the transport needs.

fn client_token_from(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get("cookie")?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == CLIENT_TOKEN_COOKIE).then(|| value.to_string())
    })
}

fn client_cookie(token: &str, days: i64) -> String {
    format!(
        "{CLIENT_TOKEN_COOKIE}={token}; Max-Age={}; Path=/; HttpOnly",
        days * 24 * 3600
    )
}

fn error_status(err: &LinkerError) -> StatusCode {
    match err {
        LinkerError::NotFound | LinkerError::Expired => StatusCode::NOT_FOUND,
        LinkerError::AlreadyConsumed => StatusCode::CONFLICT,
        LinkerError::NotLinked => StatusCode::BAD_REQUEST,
        LinkerError::Unauthorized => StatusCode::FORBIDDEN,
        LinkerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_json(err: LinkerError) -> (StatusCode, Json<Value>) {
    (error_status(&err), Json(json!({"success": false, "error": err.to_string()})))
}

async fn health(State(s): State<AppState>) -> impl IntoResponse {
    Json(json!({"status": "ok", "service": s.app_name}))
}

#[derive(Deserialize)]
struct GenerateCodeRequest {
    return_url: Option<String>,
    session_token: Option<String>,
    pending_call: Option<Value>,
}

async fn generate_code(
    State(s): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GenerateCodeRequest>,
) -> impl IntoResponse {
    let client_token = client_token_from(&headers);
    let app_info = json!({
        "user_agent": headers.get(USER_AGENT).and_then(|v| v.to_str().ok()),
        "return_url": body.return_url,
    });
    match s.linker.generate_code(
        client_token,
        body.session_token,
        app_info,
        body.return_url,
        body.pending_call,
    ) {
        Ok(grant) => {
            let cookie = client_cookie(grant.client_token.as_str(), s.linker.config().cookie_days);
            (
                StatusCode::OK,
                AppendHeaders([(SET_COOKIE, cookie)]),
                Json(json!({
                    "session_token": grant.session_token,
                    "link_code": grant.link_code,
                    "linked": grant.linked,
                })),
            )
                .into_response()
        }
        Err(err) => error_json(err).into_response(),
    }
}

async fn link_info(State(s): State<AppState>, Path(code): Path<String>) -> impl IntoResponse {
    match s.linker.get_link_info(&code) {
        Ok(info) => (
            StatusCode::OK,
            Json(json!({"app_info": info.app_info, "link_id": info.link_id})),
        )
            .into_response(),
        Err(err) => error_json(err).into_response(),
    }
}

#[derive(Deserialize)]
struct CallWalletRequest {
    account: Option<String>,
    call_id: String,
    call: Value,
    return_url: Option<String>,
}

async fn call_wallet(
    State(s): State<AppState>,
    Path(session_token): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CallWalletRequest>,
) -> impl IntoResponse {
    let Some(client_token) = client_token_from(&headers) else {
        return error_json(LinkerError::Unauthorized).into_response();
    };
    match s
        .linker
        .call_wallet(
            &client_token,
            &session_token,
            body.account,
            body.call_id,
            body.call,
            body.return_url,
        )
        .await
    {
        Ok(success) => Json(json!({"success": success})).into_response(),
        Err(err) => error_json(err).into_response(),
    }
}

#[derive(Deserialize)]
struct WalletCalledRequest {
    call_id: String,
    link_id: String,
    session_token: String,
    result: Value,
}

async fn wallet_called(
    State(s): State<AppState>,
    Path(wallet_token): Path<String>,
    Json(body): Json<WalletCalledRequest>,
) -> impl IntoResponse {
    match s
        .linker
        .wallet_called(
            &wallet_token,
            &body.call_id,
            &body.link_id,
            &body.session_token,
            body.result,
        )
        .await
    {
        Ok(success) => Json(json!({"success": success})).into_response(),
        Err(err) => error_json(err).into_response(),
    }
}

#[derive(Deserialize)]
struct LinkWalletRequest {
    code: String,
    current_rpc: Option<String>,
    #[serde(default)]
    current_accounts: Vec<String>,
}

async fn link_wallet(
    State(s): State<AppState>,
    Path(wallet_token): Path<String>,
    Json(body): Json<LinkWalletRequest>,
) -> impl IntoResponse {
    let presented = (!wallet_token.is_empty() && wallet_token != "-").then_some(wallet_token);
    match s
        .linker
        .link_wallet(presented, &body.code, body.current_rpc, body.current_accounts)
    {
        Ok(grant) => Json(json!({
            "linked": grant.linked,
            "wallet_token": grant.wallet_token.as_str(),
            "pending_call_context": grant.pending_call_context,
            "app_info": grant.app_info,
            "link_id": grant.link_id,
            "linked_at": grant.linked_at,
        }))
        .into_response(),
        Err(err) => error_json(err).into_response(),
    }
}

async fn wallet_links(State(s): State<AppState>, Path(wallet_token): Path<String>) -> impl IntoResponse {
    match s.linker.wallet_links(&wallet_token) {
        Ok(links) => {
            let out: Vec<Value> = links
                .iter()
                .map(|l| {
                    json!({
                        "linked": true,
                        "app_info": l.app_info,
                        "link_id": l.link_id,
                        "linked_at": l.linked_at,
                    })
                })
                .collect();
            Json(out).into_response()
        }
        Err(err) => error_json(err).into_response(),
    }
}

async fn unlink(State(s): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(client_token) = client_token_from(&headers) else {
        return error_json(LinkerError::Unauthorized).into_response();
    };
    match s.linker.unlink(&client_token) {
        Ok(success) => Json(json!({"success": success})).into_response(),
        Err(err) => error_json(err).into_response(),
    }
}

#[derive(Deserialize)]
struct UnlinkWalletRequest {
    link_id: String,
}

async fn unlink_wallet(
    State(s): State<AppState>,
    Path(wallet_token): Path<String>,
    Json(body): Json<UnlinkWalletRequest>,
) -> impl IntoResponse {
    match s.linker.unlink_wallet(&wallet_token, &body.link_id) {
        Ok(success) => Json(json!({"success": success})).into_response(),
        Err(err) => error_json(err).into_response(),
    }
}

// Streaming endpoints. Each delivered unit is {"msg": .., "msg_id": n};
// closing the socket releases the subscription.

async fn linked_messages(
    State(s): State<AppState>,
    Path((session_token, read_id)): Path<(String, u64)>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        match s.linker.handle_session_messages(&session_token, read_id).await {
            Ok(sub) => stream_feed(socket, sub).await,
            Err(err) => {
                debug!(%err, "session feed rejected");
                let _ = socket.close().await;
            }
        }
    })
}

async fn wallet_messages(
    State(s): State<AppState>,
    Path((wallet_token, read_id)): Path<(String, u64)>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        match s.linker.handle_wallet_messages(&wallet_token, read_id).await {
            Ok(sub) => stream_feed(socket, sub).await,
            Err(err) => {
                debug!(%err, "wallet feed rejected");
                let _ = socket.close().await;
            }
        }
    })
}

/// Pump a subscription into a socket until either side goes away. Peer drop
/// is normal termination, not an error; the consumer reconnects with its last
/// acknowledged read id.
async fn stream_feed(socket: WebSocket, mut sub: Subscription) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            msg = sub.next() => match msg {
                Some(m) => {
                    let frame = json!({"msg": m.payload, "msg_id": m.seq}).to_string();
                    if let Err(err) = sink.send(Message::Text(frame)).await {
                        warn!(%err, "feed socket send failed");
                        break;
                    }
                }
                // Displaced by a newer connection, or relay shutdown.
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    sub.close().await;
}
