use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use blockpost_shared::constants::{
    APP_NAME, DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_DAYS,
};
use blockpost_shared::identity::public_key_from_pem;
use blockpost_shared::{ChatId, UserId};
use blockpost_store::{ChatMember, ChatRole, Database, User};

use crate::chain::{self, ChainReport};
use crate::config::ServerConfig;
use crate::credentials;
use crate::error::ServerError;
use crate::fanout::{self, Delivery, DirectMessage, SendReceipt};
use crate::history::{self, DecryptedMessage, HistoryMessage};
use crate::locks::KeyedLocks;
use crate::membership::{self, ChatView, NewChat};
use crate::notify::{ClientRegistry, Event, EventPublisher};
use crate::session::{SessionManager, TokenPair, TokenSigner};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub sessions: Arc<SessionManager>,
    pub clients: ClientRegistry,
    pub user_locks: KeyedLocks<UserId>,
    pub chat_locks: KeyedLocks<ChatId>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        let signer = match config.token_signing_key {
            Some(seed) => TokenSigner::from_seed(&seed),
            None => {
                tracing::warn!("TOKEN_SIGNING_KEY not set, access tokens will not survive a restart");
                TokenSigner::generate()
            }
        };
        let access_ttl = Duration::try_seconds(config.access_token_ttl_secs)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS));
        let refresh_ttl = Duration::try_days(config.refresh_token_ttl_days)
            .unwrap_or_else(|| Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS));
        let sessions = SessionManager::new(signer, access_ttl, refresh_ttl);

        Self {
            db: Arc::new(Mutex::new(db)),
            sessions: Arc::new(sessions),
            clients: ClientRegistry::new(),
            user_locks: KeyedLocks::new(),
            chat_locks: KeyedLocks::new(),
            config: Arc::new(config),
        }
    }

    /// Lock the database. Never hold the guard across an `.await`.
    pub fn db(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        self.db
            .lock()
            .map_err(|e| ServerError::Internal(format!("Lock poisoned: {e}")))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/users/me", get(get_me).patch(update_me))
        .route("/users/me/key", put(set_my_key))
        .route("/users/:id", get(get_user))
        .route("/users/:id/key", get(get_user_key))
        .route("/chats", post(create_chat).get(list_chats))
        .route("/chats/:id", get(chat_info))
        .route("/chats/:id/members", get(list_members).post(add_member))
        .route("/chats/:id/members/:user_id", delete(remove_member))
        .route("/chats/:id/members/:user_id/role", put(set_member_role))
        .route("/chats/:id/send", post(send_chat_message))
        .route("/chats/:id/messages", get(get_chat_messages))
        .route("/chats/:id/messages/decrypted", get(get_decrypted_messages))
        .route("/messages/send", post(send_direct_message))
        .route("/messages/inbox", get(get_inbox))
        .route("/ledger/verify", get(verify_ledger))
        .route("/events", get(event_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Extraction and auth ───

/// `Json` whose rejections render as our `{"error": ...}` 400s.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ServerError::Validation(rejection.body_text())),
        }
    }
}

/// Resolve the caller from `Authorization: Bearer <access token>`.
fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<UserId, ServerError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ServerError::Unauthorized("missing bearer token".into()))?;

    Ok(state.sessions.verify_access(token.trim())?.sub)
}

fn require_non_empty<'a>(value: &'a str, field: &str) -> Result<&'a str, ServerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServerError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

// ─── Server ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    app: &'static str,
    name: String,
    version: &'static str,
    registration_open: bool,
    debug_decrypt: bool,
    online: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        app: APP_NAME,
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        registration_open: state.config.registration_open,
        debug_decrypt: state.config.debug_decrypt,
        online: state.clients.online_count().await,
    })
}

// ─── Auth ───

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ServerError> {
    if !state.config.registration_open {
        return Err(ServerError::Forbidden("registration is closed".into()));
    }
    let username = require_non_empty(&req.username, "username")?.to_string();
    let email = require_non_empty(&req.email, "email")?.to_lowercase();
    if !email.contains('@') {
        return Err(ServerError::Validation("email is not valid".into()));
    }
    require_non_empty(&req.password, "password")?;

    let password_hash = credentials::hash_password_blocking(req.password).await?;
    let user = {
        let db = state.db()?;
        db.create_user(&username, &email, &password_hash)?
    };

    info!(user = %user.id, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<TokenPair>, ServerError> {
    let email = req.email.trim().to_lowercase();
    let candidate = {
        let db = state.db()?;
        db.get_user_by_email(&email)?
    };
    let user = credentials::check_login(candidate, req.password).await?;

    let db = state.db()?;
    Ok(Json(state.sessions.issue_for(&db, &user)?))
}

async fn refresh(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<TokenPair>, ServerError> {
    let mut db = state.db()?;
    Ok(Json(state.sessions.refresh(&mut db, req.refresh_token.trim())?))
}

async fn logout(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let db = state.db()?;
    state.sessions.logout(&db, req.refresh_token.trim())?;
    Ok(Json(serde_json::json!({ "logged_out": true })))
}

async fn logout_all(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let db = state.db()?;
    let revoked = state.sessions.logout_all(&db, user)?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

// ─── Users ───

#[derive(Serialize)]
struct PublicProfile {
    user_id: UserId,
    username: String,
    last_seen: DateTime<Utc>,
    has_public_key: bool,
}

#[derive(Deserialize)]
struct UpdateProfileRequest {
    username: String,
}

#[derive(Deserialize)]
struct SetKeyRequest {
    public_key: String,
}

#[derive(Serialize)]
struct PublicKeyResponse {
    user_id: UserId,
    public_key: String,
}

async fn get_me(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<User>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let db = state.db()?;
    Ok(Json(db.get_user(user)?))
}

async fn update_me(
    headers: HeaderMap,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> Result<Json<User>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let username = require_non_empty(&req.username, "username")?;

    let _guard = state.user_locks.acquire(user).await;
    let db = state.db()?;
    db.update_username(user, username)?;
    Ok(Json(db.get_user(user)?))
}

async fn set_my_key(
    headers: HeaderMap,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SetKeyRequest>,
) -> Result<Json<PublicKeyResponse>, ServerError> {
    let user = authenticate(&headers, &state)?;
    public_key_from_pem(&req.public_key).map_err(|e| ServerError::Validation(e.to_string()))?;
    let public_key = req.public_key.trim().to_string();

    let _guard = state.user_locks.acquire(user).await;
    let db = state.db()?;
    db.set_public_key(user, &public_key)?;

    info!(user = %user, "Public key published");
    Ok(Json(PublicKeyResponse {
        user_id: user,
        public_key,
    }))
}

async fn get_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<PublicProfile>, ServerError> {
    authenticate(&headers, &state)?;
    let db = state.db()?;
    let user = db.get_user(id)?;
    Ok(Json(PublicProfile {
        user_id: user.id,
        username: user.username,
        last_seen: user.last_seen,
        has_public_key: db.get_public_key(id)?.is_some(),
    }))
}

async fn get_user_key(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<PublicKeyResponse>, ServerError> {
    authenticate(&headers, &state)?;
    let db = state.db()?;
    let public_key = db
        .get_public_key(id)?
        .ok_or_else(|| ServerError::NotFound(format!("user {id} has no public key")))?;
    Ok(Json(PublicKeyResponse {
        user_id: id,
        public_key,
    }))
}

// ─── Chats ───

/// `null` demotes to a plain member.
#[derive(Deserialize)]
struct SetRoleRequest {
    role: Option<ChatRole>,
}

#[derive(Serialize)]
struct MemberRoleResponse {
    chat_id: ChatId,
    user_id: UserId,
    role: Option<ChatRole>,
}

#[derive(Deserialize)]
struct AddMemberRequest {
    user_id: UserId,
    display_name: Option<String>,
}

async fn create_chat(
    headers: HeaderMap,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewChat>,
) -> Result<(StatusCode, Json<ChatView>), ServerError> {
    let creator = authenticate(&headers, &state)?;
    let (chat, members) = {
        let mut db = state.db()?;
        let chat = membership::create_chat(&mut db, creator, &req)?;
        let members = db.list_member_ids(chat.chat.id)?;
        (chat, members)
    };

    publish_chat_update(&state.clients, chat.chat.id, members, creator).await;
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn list_chats(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatView>>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let db = state.db()?;
    Ok(Json(membership::list_chats(&db, user)?))
}

async fn chat_info(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(chat): Path<ChatId>,
) -> Result<Json<ChatView>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let db = state.db()?;
    Ok(Json(membership::chat_info(&db, chat, user)?))
}

async fn list_members(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(chat): Path<ChatId>,
) -> Result<Json<Vec<ChatMember>>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let db = state.db()?;
    Ok(Json(membership::list_members(&db, chat, user)?))
}

async fn add_member(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(chat): Path<ChatId>,
    ApiJson(req): ApiJson<AddMemberRequest>,
) -> Result<(StatusCode, Json<ChatMember>), ServerError> {
    let requester = authenticate(&headers, &state)?;

    let _guard = state.chat_locks.acquire(chat).await;
    let (member, members) = {
        let db = state.db()?;
        let member = membership::add_member(
            &db,
            chat,
            requester,
            req.user_id,
            req.display_name.as_deref(),
        )?;
        (member, db.list_member_ids(chat)?)
    };

    publish_chat_update(&state.clients, chat, members, requester).await;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn remove_member(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((chat, user)): Path<(ChatId, UserId)>,
) -> Result<StatusCode, ServerError> {
    let requester = authenticate(&headers, &state)?;

    let _guard = state.chat_locks.acquire(chat).await;
    let mut notify = {
        let db = state.db()?;
        membership::remove_member(&db, chat, requester, user)?;
        db.list_member_ids(chat)?
    };
    notify.push(user);

    publish_chat_update(&state.clients, chat, notify, requester).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_member_role(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((chat, user)): Path<(ChatId, UserId)>,
    ApiJson(req): ApiJson<SetRoleRequest>,
) -> Result<Json<MemberRoleResponse>, ServerError> {
    let requester = authenticate(&headers, &state)?;

    let _guard = state.chat_locks.acquire(chat).await;
    let (role, members) = {
        let mut db = state.db()?;
        let role = membership::set_role(&mut db, chat, requester, user, req.role)?;
        (role, db.list_member_ids(chat)?)
    };

    publish_chat_update(&state.clients, chat, members, requester).await;
    Ok(Json(MemberRoleResponse {
        chat_id: chat,
        user_id: user,
        role,
    }))
}

async fn publish_chat_update<P: EventPublisher>(
    publisher: &P,
    chat: ChatId,
    users: Vec<UserId>,
    actor: UserId,
) {
    for user in users.into_iter().filter(|u| *u != actor) {
        publisher
            .publish(user, Event::ChatUpdated { chat_id: chat })
            .await;
    }
}

// ─── Messages ───

async fn send_chat_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(chat): Path<ChatId>,
    ApiJson(deliveries): ApiJson<Vec<Delivery>>,
) -> Result<Json<SendReceipt>, ServerError> {
    let sender = authenticate(&headers, &state)?;
    let receipt = {
        let mut db = state.db()?;
        fanout::send(&mut db, sender, chat, &deliveries)?
    };

    fanout::announce(&state.clients, sender, Some(chat), &receipt).await;
    Ok(Json(receipt))
}

async fn get_chat_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(chat): Path<ChatId>,
) -> Result<Json<Vec<HistoryMessage>>, ServerError> {
    let reader = authenticate(&headers, &state)?;
    let db = state.db()?;
    Ok(Json(history::get_messages(&db, chat, reader)?))
}

/// Debug only: the caller sends its PKCS#8 PEM, base64-encoded, in
/// `X-Private-Key`.
async fn get_decrypted_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(chat): Path<ChatId>,
) -> Result<Json<Vec<DecryptedMessage>>, ServerError> {
    if !state.config.debug_decrypt {
        return Err(ServerError::NotFound("debug decryption is disabled".into()));
    }
    let reader = authenticate(&headers, &state)?;

    let encoded = headers
        .get("x-private-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Validation("missing X-Private-Key header".into()))?;
    let pem = BASE64
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| ServerError::Validation("X-Private-Key must be base64 PEM".into()))?;

    let messages = {
        let db = state.db()?;
        history::get_messages(&db, chat, reader)?
    };
    Ok(Json(history::decrypt_history(messages, &pem)?))
}

async fn send_direct_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    ApiJson(message): ApiJson<DirectMessage>,
) -> Result<Json<SendReceipt>, ServerError> {
    let sender = authenticate(&headers, &state)?;
    let receipt = {
        let mut db = state.db()?;
        fanout::send_direct(&mut db, sender, &message)?
    };

    fanout::announce(&state.clients, sender, None, &receipt).await;
    Ok(Json(receipt))
}

async fn get_inbox(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryMessage>>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let db = state.db()?;
    Ok(Json(history::inbox(&db, user)?))
}

async fn verify_ledger(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<ChainReport>, ServerError> {
    authenticate(&headers, &state)?;
    let db = state.db()?;
    Ok(Json(chain::verify_chain(&db)?))
}

// ─── Live events ───

async fn event_stream(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ServerError> {
    let user = authenticate(&headers, &state)?;
    let rx = state.clients.connect(user).await;

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let data = serde_json::to_string(&event).unwrap_or_default();
        Some((Ok(SseEvent::default().event(event.name()).data(data)), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use blockpost_shared::crypto::encrypt_for_recipient;
    use blockpost_shared::Identity;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Harness {
        _dir: tempfile::TempDir,
        app: Router,
    }

    fn harness(config: ServerConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("api.db")).unwrap();
        let app = build_router(AppState::new(db, config));
        Harness { _dir: dir, app }
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Register, log in and publish a key. Returns (id, access, refresh, identity).
    async fn onboard(app: &Router, name: &str) -> (i64, String, String, Identity) {
        let (status, user) = call(
            app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": name, "email": format!("{name}@example.org"), "password": "pw-123456" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, tokens) = call(
            app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": format!("{name}@example.org"), "password": "pw-123456" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let access = tokens["access_token"].as_str().unwrap().to_string();
        let refresh = tokens["refresh_token"].as_str().unwrap().to_string();

        let identity = Identity::generate();
        let (status, _) = call(
            app,
            "PUT",
            "/users/me/key",
            Some(&access),
            Some(json!({ "public_key": identity.public_key_pem().unwrap() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        (user["id"].as_i64().unwrap(), access, refresh, identity)
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(ServerConfig::default());
        let (status, body) = call(&h.app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_requests_without_token_are_unauthorized() {
        let h = harness(ServerConfig::default());
        let (status, body) = call(&h.app, "GET", "/chats", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = call(&h.app, "GET", "/chats", Some("a.b"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_conflict_and_closed_registration() {
        let h = harness(ServerConfig::default());
        onboard(&h.app, "ann").await;
        let (status, _) = call(
            &h.app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "ann2", "email": "ann@example.org", "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let closed = harness(ServerConfig {
            registration_open: false,
            ..ServerConfig::default()
        });
        let (status, _) = call(
            &closed.app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "bob", "email": "bob@example.org", "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_refresh_rotation_over_http() {
        let h = harness(ServerConfig::default());
        let (_, _, refresh, _) = onboard(&h.app, "ann").await;

        let (status, pair) = call(
            &h.app,
            "POST",
            "/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &h.app,
            "POST",
            "/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let newest = pair["refresh_token"].as_str().unwrap();
        for _ in 0..2 {
            let (status, _) = call(
                &h.app,
                "POST",
                "/auth/logout",
                None,
                Some(json!({ "refresh_token": newest })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_chat_send_and_read() {
        let h = harness(ServerConfig::default());
        let (a, a_token, _, a_id) = onboard(&h.app, "ann").await;
        let (b, b_token, _, b_id) = onboard(&h.app, "bob").await;
        let (c, c_token, _, c_id) = onboard(&h.app, "cid").await;

        let (status, chat) = call(
            &h.app,
            "POST",
            "/chats",
            Some(&a_token),
            Some(json!({ "kind": "group", "name": "team", "members": [b] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let chat_id = chat["id"].as_i64().unwrap();

        let copy = |to: i64, identity: &Identity| {
            json!({
                "receiver_id": to,
                "ciphertext": encrypt_for_recipient(b"hi", &identity.public_key_pem().unwrap()).unwrap(),
                "signature": a_id.sign(b"hi"),
            })
        };
        let (status, receipt) = call(
            &h.app,
            "POST",
            &format!("/chats/{chat_id}/send"),
            Some(&a_token),
            Some(json!([copy(a, &a_id), copy(b, &b_id), copy(c, &c_id)])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["sent_count"], 2);

        let (status, history) = call(
            &h.app,
            "GET",
            &format!("/chats/{chat_id}/messages"),
            Some(&b_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["from_username"], "ann");

        let (status, _) = call(
            &h.app,
            "GET",
            &format!("/chats/{chat_id}/messages"),
            Some(&c_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, report) = call(&h.app, "GET", "/ledger/verify", Some(&c_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["valid"], true);
        assert_eq!(report["blocks"], 1);
    }

    #[tokio::test]
    async fn test_send_requires_array_body() {
        let h = harness(ServerConfig::default());
        let (_, token, _, _) = onboard(&h.app, "ann").await;
        let (_, chat) = call(
            &h.app,
            "POST",
            "/chats",
            Some(&token),
            Some(json!({ "kind": "group", "name": "solo" })),
        )
        .await;
        let chat_id = chat["id"].as_i64().unwrap();

        let (status, body) = call(
            &h.app,
            "POST",
            &format!("/chats/{chat_id}/send"),
            Some(&token),
            Some(json!({ "receiver_id": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, receipt) = call(
            &h.app,
            "POST",
            &format!("/chats/{chat_id}/send"),
            Some(&token),
            Some(json!([])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["sent_count"], 0);
    }

    #[tokio::test]
    async fn test_channel_roles_over_http() {
        let h = harness(ServerConfig::default());
        let (a, a_token, _, _) = onboard(&h.app, "ann").await;
        let (b, b_token, _, _) = onboard(&h.app, "bob").await;
        let (c, _, _, _) = onboard(&h.app, "cid").await;

        let (_, chat) = call(
            &h.app,
            "POST",
            "/chats",
            Some(&a_token),
            Some(json!({ "kind": "channel", "name": "news", "members": [b] })),
        )
        .await;
        let chat_id = chat["id"].as_i64().unwrap();
        let members = format!("/chats/{chat_id}/members");

        let (status, _) = call(&h.app, "POST", &members, Some(&b_token), Some(json!({ "user_id": c }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            &h.app,
            "PUT",
            &format!("{members}/{b}/role"),
            Some(&a_token),
            Some(json!({ "role": "admin" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "admin");

        let (status, _) = call(&h.app, "POST", &members, Some(&b_token), Some(json!({ "user_id": c }))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = call(&h.app, "DELETE", &format!("{members}/{a}"), Some(&a_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_logout_all_revokes_refresh_tokens() {
        let h = harness(ServerConfig::default());
        let (_, access, refresh, _) = onboard(&h.app, "ann").await;

        let (status, body) = call(&h.app, "POST", "/auth/logout-all", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["revoked"], 1);

        let (status, _) = call(
            &h.app,
            "POST",
            "/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_debug_decryption_is_opt_in() {
        let h = harness(ServerConfig::default());
        let (_, token, _, _) = onboard(&h.app, "ann").await;
        let (status, _) = call(&h.app, "GET", "/chats/1/messages/decrypted", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let h = harness(ServerConfig {
            debug_decrypt: true,
            ..ServerConfig::default()
        });
        let (a, token, _, identity) = onboard(&h.app, "ann").await;
        let (_, chat) = call(
            &h.app,
            "POST",
            "/chats",
            Some(&token),
            Some(json!({ "kind": "group", "name": "notes" })),
        )
        .await;
        let chat_id = chat["id"].as_i64().unwrap();
        let pem = identity.public_key_pem().unwrap();
        call(
            &h.app,
            "POST",
            &format!("/chats/{chat_id}/send"),
            Some(&token),
            Some(json!([{
                "receiver_id": a,
                "ciphertext": encrypt_for_recipient(b"note to self", &pem).unwrap(),
                "signature": identity.sign(b"note to self"),
            }])),
        )
        .await;

        let req = axum::http::Request::builder()
            .uri(format!("/chats/{chat_id}/messages/decrypted"))
            .header("authorization", format!("Bearer {token}"))
            .header(
                "x-private-key",
                BASE64.encode(identity.private_key_pem().unwrap()),
            )
            .body(Body::empty())
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body[0]["plaintext"], "note to self");
    }
}
