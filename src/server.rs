//! Login/callback HTTP surface
//!
//! Minimal axum front end over the session core: each browser gets an opaque
//! cookie that selects its own `SessionManager`.

use crate::error::AuthError;
use crate::oidc::{authorize::random_token, OidcClient};
use crate::session::{CallbackParams, SessionManager};
use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use http::{header, HeaderMap, StatusCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const SESSION_COOKIE: &str = "oidc_login_sid";

type SharedSession = Arc<tokio::sync::Mutex<SessionManager>>;

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Sessions unused for this long are dropped
    pub idle_timeout: Duration,
    /// Upper bound on live sessions; the least recently used goes first
    pub max_sessions: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(3600),
            max_sessions: 10_000,
        }
    }
}

struct Entry {
    session: SharedSession,
    last_seen: Instant,
}

impl Entry {
    fn new(session: SharedSession) -> Self {
        Self {
            session,
            last_seen: Instant::now(),
        }
    }
}

/// Live sessions keyed by cookie value. The map lock is never held across an await.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    options: RegistryOptions,
}

impl SessionRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            inner: Arc::default(),
            options,
        }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        let mut map = self.map();
        let entry = map.get_mut(id)?;
        if entry.last_seen.elapsed() >= self.options.idle_timeout {
            map.remove(id);
            return None;
        }
        entry.last_seen = Instant::now();
        Some(entry.session.clone())
    }

    pub fn create(&self, client: Arc<OidcClient>) -> (String, SharedSession) {
        let id = random_token();
        let session = Arc::new(tokio::sync::Mutex::new(SessionManager::new(client)));

        let mut map = self.map();
        self.evict(&mut map);
        map.insert(id.clone(), Entry::new(session.clone()));
        (id, session)
    }

    /// Make room for one more session
    fn evict(&self, map: &mut HashMap<String, Entry>) {
        let idle_timeout = self.options.idle_timeout;
        let before = map.len();
        map.retain(|_, entry| entry.last_seen.elapsed() < idle_timeout);

        while !map.is_empty() && map.len() >= self.options.max_sessions {
            let oldest = map
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                map.remove(&id);
            }
        }

        if map.len() < before {
            tracing::debug!("Evicted {} session(s)", before - map.len());
        }
    }

    /// Move the session under `id` to a fresh id
    pub fn rotate(&self, id: &str) -> Option<String> {
        let mut map = self.map();
        let entry = map.remove(id)?;
        let new_id = random_token();
        map.insert(new_id.clone(), Entry::new(entry.session));
        Some(new_id)
    }

    pub fn remove(&self, id: &str) {
        self.map().remove(id);
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct AppState {
    client: Arc<OidcClient>,
    sessions: SessionRegistry,
    secure_cookies: bool,
}

impl AppState {
    pub fn new(client: Arc<OidcClient>) -> Self {
        Self::with_sessions(client, SessionRegistry::default())
    }

    pub fn with_sessions(client: Arc<OidcClient>, sessions: SessionRegistry) -> Self {
        let secure_cookies = client.config().redirect_uri.starts_with("https://");
        Self {
            client,
            sessions,
            secure_cookies,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn session_from(&self, headers: &HeaderMap) -> Option<(String, SharedSession)> {
        let id = cookie_value(headers, SESSION_COOKIE)?;
        let session = self.sessions.get(&id)?;
        Some((id, session))
    }

    fn session_cookie(&self, id: &str) -> String {
        let secure = if self.secure_cookies { "; Secure" } else { "" };
        format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax{secure}")
    }

    fn expired_cookie(&self) -> String {
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}

fn escape_html(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#39;".to_string(),
            c => c.to_string(),
        })
        .collect()
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<html>
    <head><title>{title}</title></head>
    <body>
        <h1>{title}</h1>
        {body}
    </body>
</html>"#
    ))
}

/// Router with `/`, `/login`, `/me`, `/logout` and the redirect URI's path
pub fn router(state: AppState) -> Router {
    let callback_path = url::Url::parse(&state.client.config().redirect_uri)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| "/auth/callback".to_string());

    Router::new()
        .route("/", get(index))
        .route("/login", get(login))
        .route(&callback_path, get(callback))
        .route("/me", get(me))
        .route("/logout", get(logout).post(logout))
        .with_state(state)
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    let profile = match state.session_from(&headers) {
        Some((_, session)) => {
            let session = session.lock().await;
            session.profile().cloned()
        }
        None => None,
    };

    match profile {
        Some(user) => {
            let shown = user.name.as_deref().or(user.email.as_deref()).unwrap_or(&user.sub);
            page(
                "Signed in",
                &format!(
                    r#"<p>Signed in: {}</p><p>Email: {} &bull; Verified: {}</p><p><a href="/logout">Log out</a></p>"#,
                    escape_html(shown),
                    escape_html(user.email.as_deref().unwrap_or("-")),
                    user.email_verified
                ),
            )
        }
        None => page(
            "Not signed in",
            r#"<p>You're not signed in.</p><p><a href="/login">Sign in</a></p>"#,
        ),
    }
}

async fn login(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (id, session, is_new) = match state.session_from(&headers) {
        Some((id, session)) => (id, session, false),
        None => {
            let (id, session) = state.sessions.create(state.client.clone());
            (id, session, true)
        }
    };

    let url = match session.lock().await.login_url() {
        Ok(url) => url,
        Err(e) => {
            tracing::error!("Failed to build login URL: {}", e);
            return failure_response(&e);
        }
    };

    if is_new {
        ([(header::SET_COOKIE, state.session_cookie(&id))], Redirect::to(&url)).into_response()
    } else {
        Redirect::to(&url).into_response()
    }
}

async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some((id, session)) = state.session_from(&headers) else {
        tracing::warn!("Callback without a session cookie");
        return failure_response(&AuthError::CsrfMismatch);
    };

    let (result, authenticated) = {
        let mut session = session.lock().await;
        let result = session.handle_callback(&params).await;
        (result, session.is_authenticated())
    };

    match result {
        Ok(()) => {
            // A pre-login id never becomes an authenticated one.
            let Some(new_id) = state.sessions.rotate(&id) else {
                return failure_response(&AuthError::CsrfMismatch);
            };
            // Drop code and state from the address bar.
            (
                [(header::SET_COOKIE, state.session_cookie(&new_id))],
                Redirect::to("/"),
            )
                .into_response()
        }
        Err(e) if authenticated => failure_response(&e),
        Err(e) => {
            state.sessions.remove(&id);
            let mut response = failure_response(&e);
            if let Ok(cookie) = state.expired_cookie().parse() {
                response.headers_mut().insert(header::SET_COOKIE, cookie);
            }
            response
        }
    }
}

fn failure_response(err: &AuthError) -> Response {
    let status = if err.is_retryable() {
        StatusCode::BAD_GATEWAY
    } else if matches!(err, AuthError::Config(_) | AuthError::UrlParse(_)) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::UNAUTHORIZED
    };

    (
        status,
        page(
            "Authentication Failed",
            &format!(
                r#"<p>{}</p><p><a href="/login">Try again</a></p>"#,
                err.user_message()
            ),
        ),
    )
        .into_response()
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let current = match state.session_from(&headers) {
        Some((_, session)) => {
            let session = session.lock().await;
            Some(session.current())
        }
        None => None,
    };

    match current {
        Some(session) if session.user.is_some() => Json(session).into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "status": "Anonymous", "user": null })),
        )
            .into_response(),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some((id, session)) = state.session_from(&headers) {
        session.lock().await.logout();
        state.sessions.remove(&id);
    }

    (
        [(header::SET_COOKIE, state.expired_cookie())],
        Redirect::to("/"),
    )
        .into_response()
}

/// Serve until the future completes or the listener fails
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Login surface listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
