// Request-gating middleware
//
// Per request, in this order:
// 1. Exempt path -> pass through unchecked
// 2. Debug mode with skip_installation_check -> pass through
// 3. Installation complete -> pass through; incomplete -> stash the path, redirect to /setup/
// 4. Check failed -> redirect to /setup/ (debug mode: log and pass through)
//
// The gate depends on `InstallationGate` rather than the concrete service so the ordering can be
// tested against a fake.

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use log::{debug, error, info};
use std::sync::Arc;

use crate::api::session::{SessionHandle, SessionStore};
use crate::error::SetupResult;
use crate::installation::InstallationService;
use crate::models::state::AppState;
use crate::utils::validation::is_local_redirect;

pub const SETUP_ENTRY: &str = "/setup/";

pub const INSTALLATION_HEADER: HeaderName = HeaderName::from_static("x-installation-complete");

const EXEMPT_PREFIXES: &[&str] = &[
    "/setup/",
    "/admin/",
    "/static/",
    "/media/",
    "/api/",
    "/health/",
    "/readiness/",
    "/liveness/",
    "/__debug__/",
    "/favicon.ico",
    "/accounts/",
];

const EXEMPT_EXACT: &[&str] = &["/admin/login/", "/admin/logout/"];

const EXEMPT_SUFFIXES: &[&str] = &[".json", ".xml", ".txt"];

pub fn is_exempt_path(path: &str) -> bool {
    EXEMPT_EXACT.contains(&path)
        || EXEMPT_PREFIXES.iter().any(|p| path.starts_with(p))
        || EXEMPT_SUFFIXES.iter().any(|s| path.ends_with(s))
}

#[async_trait]
pub trait InstallationGate: Send + Sync {
    async fn check_installation(&self) -> SetupResult<bool>;
}

#[async_trait]
impl InstallationGate for InstallationService {
    async fn check_installation(&self) -> SetupResult<bool> {
        InstallationService::check_installation(self).await
    }
}

#[derive(Clone)]
pub struct GateState {
    pub gate: Arc<dyn InstallationGate>,
    pub sessions: SessionStore,
    pub cookie_name: String,
    pub debug: bool,
    pub skip_check: bool,
}

impl GateState {
    pub fn from_app(state: &AppState) -> Self {
        Self {
            gate: state.service.clone(),
            sessions: state.sessions.clone(),
            cookie_name: state.settings.session_cookie.clone(),
            debug: state.settings.debug,
            skip_check: state.settings.skip_installation_check,
        }
    }

    /// Stash `target` for after setup and send the browser to the setup entry.
    ///
    /// The site root and targets that are not local paths are not worth a session.
    async fn redirect_to_setup(&self, jar: CookieJar, target: String) -> Response {
        if target == "/" || !is_local_redirect(&target) {
            return Redirect::to(SETUP_ENTRY).into_response();
        }
        let session = SessionHandle::resolve(jar, &self.cookie_name);
        self.sessions
            .update(&session.id, |data| data.post_setup_redirect = Some(target))
            .await;
        (session.jar, Redirect::to(SETUP_ENTRY)).into_response()
    }

    /// Debug-only `X-Installation-Complete` header.
    async fn annotate(&self, mut response: Response, known: Option<bool>) -> Response {
        if !self.debug {
            return response;
        }
        let state = match known {
            Some(v) => Some(v),
            None => self.gate.check_installation().await.ok(),
        };
        let value = match state {
            Some(true) => "true",
            Some(false) => "false",
            None => "unknown",
        };
        response
            .headers_mut()
            .insert(INSTALLATION_HEADER, HeaderValue::from_static(value));
        response
    }
}

/// Global gate; install with `axum::middleware::from_fn_with_state`.
pub async fn installation_gate(State(state): State<GateState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();

    if is_exempt_path(&path) {
        let response = next.run(req).await;
        return state.annotate(response, None).await;
    }

    if state.debug && state.skip_check {
        debug!(
            "[PHASE: middleware] [STEP: gate] Installation check skipped (debug) for {}",
            path
        );
        let response = next.run(req).await;
        return state.annotate(response, None).await;
    }

    check_and_forward(&state, req, next).await
}

/// Per-route guard: same redirect semantics as the global gate, without exemptions.
pub async fn setup_required(State(state): State<GateState>, req: Request, next: Next) -> Response {
    check_and_forward(&state, req, next).await
}

async fn check_and_forward(state: &GateState, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    match state.gate.check_installation().await {
        Ok(true) => {
            let response = next.run(req).await;
            state.annotate(response, Some(true)).await
        }
        Ok(false) => {
            info!(
                "[PHASE: middleware] [STEP: gate] Installation incomplete, redirecting {} to setup",
                path
            );
            let jar = CookieJar::from_headers(req.headers());
            state.redirect_to_setup(jar, target).await
        }
        Err(e) if state.debug => {
            error!(
                "[PHASE: middleware] [STEP: gate] Installation check failed (debug, passing through): {}",
                e
            );
            let response = next.run(req).await;
            state.annotate(response, None).await
        }
        Err(e) => {
            error!(
                "[PHASE: middleware] [STEP: gate] Installation check failed, redirecting to setup: {}",
                e
            );
            let jar = CookieJar::from_headers(req.headers());
            state.redirect_to_setup(jar, target).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SetupError;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    enum Answer {
        Complete,
        Incomplete,
        Broken,
    }

    struct FakeGate {
        answer: Answer,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InstallationGate for FakeGate {
        async fn check_installation(&self) -> SetupResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Answer::Complete => Ok(true),
                Answer::Incomplete => Ok(false),
                Answer::Broken => Err(SetupError::Database("disk on fire".into())),
            }
        }
    }

    fn app(answer: Answer, debug: bool, skip_check: bool) -> (Router, Arc<FakeGate>, SessionStore) {
        let gate = Arc::new(FakeGate {
            answer,
            calls: AtomicUsize::new(0),
        });
        let sessions = SessionStore::default();
        let state = GateState {
            gate: gate.clone(),
            sessions: sessions.clone(),
            cookie_name: "barody_session".into(),
            debug,
            skip_check,
        };
        let router = Router::new()
            .route("/some/random/page", get(|| async { "operational" }))
            .route("/setup/status/", get(|| async { "status" }))
            .route("/feed.xml", get(|| async { "feed" }))
            .layer(axum::middleware::from_fn_with_state(state, installation_gate));
        (router, gate, sessions)
    }

    async fn get_path(router: Router, path: &str) -> Response {
        router
            .oneshot(Request::builder().uri(path).body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    #[test]
    fn exemptions() {
        for path in [
            "/setup/",
            "/setup/status/",
            "/admin/login/",
            "/admin/logout/",
            "/static/site.css",
            "/media/a.png",
            "/api/v1/posts",
            "/health/",
            "/readiness/",
            "/liveness/",
            "/__debug__/sql",
            "/favicon.ico",
            "/accounts/login/",
            "/sitemap.xml",
            "/robots.txt",
            "/data.json",
        ] {
            assert!(is_exempt_path(path), "{path} should be exempt");
        }
        for path in ["/", "/some/random/page", "/posts/1/", "/setup", "/adminx/"] {
            assert!(!is_exempt_path(path), "{path} should be gated");
        }
    }

    #[tokio::test]
    async fn incomplete_install_redirects_and_stashes_target() {
        let (router, _, sessions) = app(Answer::Incomplete, false, false);
        let response = get_path(router, "/some/random/page?x=1").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], SETUP_ENTRY);

        let cookie = response.headers()[header::SET_COOKIE]
            .to_str()
            .expect("cookie header")
            .to_string();
        let id = cookie
            .trim_start_matches("barody_session=")
            .split(';')
            .next()
            .expect("id")
            .to_string();
        assert_eq!(
            sessions.load(&id).await.post_setup_redirect.as_deref(),
            Some("/some/random/page?x=1")
        );
    }

    #[tokio::test]
    async fn root_and_off_site_targets_are_not_stashed() {
        let (router, _, sessions) = app(Answer::Incomplete, false, false);
        for path in ["/", "//evil.example/x"] {
            let response = get_path(router.clone(), path).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{path}");
            assert_eq!(response.headers()[header::LOCATION], SETUP_ENTRY);
            assert!(response.headers().get(header::SET_COOKIE).is_none(), "{path}");
        }
        assert!(sessions.is_empty().await);
    }

    #[tokio::test]
    async fn cookieless_requests_do_not_grow_the_store_past_its_cap() {
        let gate = Arc::new(FakeGate {
            answer: Answer::Incomplete,
            calls: AtomicUsize::new(0),
        });
        let sessions = SessionStore::with_limits(std::time::Duration::from_secs(60), 50);
        let state = GateState {
            gate,
            sessions: sessions.clone(),
            cookie_name: "barody_session".into(),
            debug: false,
            skip_check: false,
        };
        let router = Router::new()
            .route("/some/random/page", get(|| async { "operational" }))
            .layer(axum::middleware::from_fn_with_state(state, installation_gate));

        for _ in 0..500 {
            let response = get_path(router.clone(), "/some/random/page").await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
        }
        assert_eq!(sessions.len().await, 50);
    }

    #[tokio::test]
    async fn exempt_paths_pass_without_checking() {
        let (router, gate, _) = app(Answer::Incomplete, false, false);
        let response = get_path(router.clone(), "/setup/status/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = get_path(router, "/feed.xml").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn complete_install_passes_through() {
        let (router, _, _) = app(Answer::Complete, false, false);
        let response = get_path(router, "/some/random/page").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(INSTALLATION_HEADER).is_none());
    }

    #[tokio::test]
    async fn check_errors_fail_safe_outside_debug() {
        let (router, _, _) = app(Answer::Broken, false, false);
        let response = get_path(router, "/some/random/page").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn check_errors_pass_in_debug_with_unknown_header() {
        let (router, _, _) = app(Answer::Broken, true, false);
        let response = get_path(router, "/some/random/page").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[INSTALLATION_HEADER], "unknown");
    }

    #[tokio::test]
    async fn skip_flag_only_applies_in_debug() {
        let (router, gate, _) = app(Answer::Incomplete, true, true);
        let response = get_path(router, "/some/random/page").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[INSTALLATION_HEADER], "false");
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1, "header lookup only");

        let (router, _, _) = app(Answer::Incomplete, false, true);
        let response = get_path(router, "/some/random/page").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
}
