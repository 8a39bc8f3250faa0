// End-to-end setup flows driven through the router in-process.

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;

use barody_setup::api;
use barody_setup::cli::prompt::{PromptError, Prompter};
use barody_setup::cli::{SetupWizard, SetupWizardArgs, WizardOutcome};
use barody_setup::config::Settings;
use barody_setup::database::accounts::{AccountStore, SqlAccountStore};
use barody_setup::installation::admin::AdminProvisioner;
use barody_setup::installation::{InstallationService, StatePaths};
use barody_setup::models::requests::NewAdmin;
use barody_setup::models::state::AppState;
use barody_setup::security::password::PasswordPolicy;

struct TestApp {
    _dir: tempfile::TempDir,
    settings: Settings,
    service: Arc<InstallationService>,
    state: AppState,
}

impl TestApp {
    async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = Settings::rooted_at(dir.path()).expect("settings");
        settings.database_url = format!("sqlite://{}?mode=rwc", dir.path().join("app.db").display());

        let store = SqlAccountStore::connect(&settings.database_url)
            .await
            .expect("connect");
        store.apply_migrations().await.expect("migrate");
        let accounts: Arc<dyn AccountStore> = Arc::new(store);

        let admins = AdminProvisioner::new(accounts.clone(), PasswordPolicy::default())
            .with_bcrypt_cost(4);
        let service = InstallationService::new(StatePaths::from_settings(&settings), accounts)
            .with_admin_provisioner(admins);

        let service = Arc::new(service);
        let state = AppState::new(service.clone(), settings.clone());
        Self {
            _dir: dir,
            settings,
            service,
            state,
        }
    }

    /// Requests share one session store, like a running server.
    fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.expect("response")
    }

    async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).expect("request"))
            .await
    }

    async fn get_with_cookie(&self, uri: &str, cookie: &str) -> Response<Body> {
        self.send(
            Request::get(uri)
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .expect("request"),
        )
        .await
    }

    async fn seed_admin(&self) {
        self.service
            .create_admin_user(&NewAdmin::new("existing", "existing@example.com", "CorrectHorse9!"), false)
            .await
            .expect("seed admin");
    }

    async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> Response<Body> {
        let body: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .expect("request"),
        )
        .await
    }

    /// Runs `setup-wizard --headless` and returns the printed token.
    async fn headless_token(&self) -> String {
        let mut out = Vec::new();
        let mut prompter = NoPrompts;
        let args = SetupWizardArgs {
            headless: true,
            ..SetupWizardArgs::default()
        };
        let outcome = SetupWizard::new(&self.service, &self.settings, &mut out, &mut prompter)
            .run(&args)
            .await
            .expect("headless run");
        assert_eq!(outcome, WizardOutcome::TokenIssued);

        String::from_utf8(out)
            .expect("utf8")
            .lines()
            .find_map(|l| l.trim().strip_prefix("Token:").map(|t| t.trim().to_string()))
            .expect("token printed")
    }

    fn expire_token(&self) {
        let path = &self.settings.setup_config_path;
        let raw = std::fs::read_to_string(path).expect("read setup config");
        let mut config: serde_json::Value = serde_json::from_str(&raw).expect("json");
        config["setup_token"]["expires_at"] =
            serde_json::json!((chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339());
        std::fs::write(path, config.to_string()).expect("write setup config");
    }
}

struct NoPrompts;

impl Prompter for NoPrompts {
    fn input(&mut self, prompt: &str, _allow_empty: bool) -> Result<String, PromptError> {
        panic!("unexpected prompt {prompt:?}")
    }

    fn password(&mut self, prompt: &str) -> Result<String, PromptError> {
        panic!("unexpected prompt {prompt:?}")
    }

    fn confirm(&mut self, prompt: &str, _default: bool) -> Result<bool, PromptError> {
        panic!("unexpected prompt {prompt:?}")
    }
}

fn location(response: &Response<Body>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// `name=value` from the response's Set-Cookie header.
fn session_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("session cookie")
        .to_string()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

fn admin_fields(token: &str) -> Vec<(&'static str, String)> {
    vec![
        ("username", "admin".to_string()),
        ("email", "admin@example.com".to_string()),
        ("first_name", "Ada".to_string()),
        ("last_name", "".to_string()),
        ("password", "CorrectHorse9!".to_string()),
        ("password_confirm", "CorrectHorse9!".to_string()),
        ("token", token.to_string()),
    ]
}

async fn submit_admin(app: &TestApp, token: &str) -> Response<Body> {
    let fields = admin_fields(token);
    let pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
    app.post_form("/setup/create-admin/", &pairs).await
}

#[tokio::test]
async fn headless_token_completes_setup_through_the_web_flow() {
    let app = TestApp::new().await;

    let token = app.headless_token().await;
    assert!(token.len() >= 40);
    assert!(app.service.validate_setup_token(&token).await);

    let form = app.get(&format!("/setup/create-admin/?token={}", token)).await;
    assert_eq!(form.status(), StatusCode::OK);
    let html = body_text(form).await;
    assert!(html.contains(r#"name="password_confirm""#));

    let submitted = submit_admin(&app, &token).await;
    assert_eq!(submitted.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&submitted), "/setup/complete/");

    assert!(!app.service.validate_setup_token(&token).await);
    assert!(app.service.is_installation_complete().await);
    let admins = app.service.list_admins().await.expect("admins");
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].username, "admin");

    // Operational now: the gate lets unknown paths through to the app.
    let page = app.get("/some/random/page").await;
    assert_eq!(page.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_form_re_renders_without_consuming_the_token() {
    let app = TestApp::new().await;
    let token = app.headless_token().await;

    let response = app
        .post_form(
            "/setup/create-admin/",
            &[
                ("username", "admin"),
                ("email", "not-an-email"),
                ("password", "CorrectHorse9!"),
                ("password_confirm", "CorrectHorse9?"),
                ("token", token.as_str()),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Enter a valid email address."));
    assert!(html.contains("didn&#x27;t match"));
    assert!(html.contains(r#"value="admin""#));
    assert!(!html.contains("CorrectHorse9!"));
    assert!(app.service.validate_setup_token(&token).await);
    assert!(app.service.list_admins().await.expect("admins").is_empty());
}

#[tokio::test]
async fn expired_token_is_rejected_without_creating_an_account() {
    let app = TestApp::new().await;
    let token = app.headless_token().await;
    app.expire_token();

    assert!(!app.service.validate_setup_token(&token).await);

    let form = app.get(&format!("/setup/create-admin/?token={}", token)).await;
    assert_eq!(form.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&form), "/setup/");

    let submitted = submit_admin(&app, &token).await;
    assert_eq!(submitted.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&submitted), "/setup/");
    assert!(app.service.list_admins().await.expect("admins").is_empty());
    assert!(!app.service.is_installation_complete().await);
}

#[tokio::test]
async fn consumed_token_cannot_be_used_again() {
    let app = TestApp::new().await;
    let token = app.headless_token().await;

    assert!(app.service.consume_setup_token(&token).await.expect("consume"));
    assert!(!app.service.consume_setup_token(&token).await.expect("consume"));

    let submitted = submit_admin(&app, &token).await;
    assert_eq!(submitted.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&submitted), "/setup/");
    assert!(app.service.list_admins().await.expect("admins").is_empty());
}

#[tokio::test]
async fn gate_redirects_until_installation_is_complete() {
    let app = TestApp::new().await;

    let page = app.get("/some/random/page").await;
    assert_eq!(page.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&page), "/setup/");
    assert!(page.headers().contains_key(header::SET_COOKIE));

    let status = app.get("/setup/status/").await;
    assert_eq!(status.status(), StatusCode::OK);
    let payload: serde_json::Value =
        serde_json::from_str(&body_text(status).await).expect("status json");
    assert_eq!(payload["success"], true);
    assert_eq!(payload["data"]["installationComplete"], false);
    assert_eq!(payload["data"]["progress"]["readyForAdminCreation"], true);
    assert_eq!(payload["data"]["installationInfo"]["installationComplete"], false);
    assert!(payload["data"]["installationInfo"].get("installationId").is_none());

    let health = app.get("/setup/health/").await;
    assert_eq!(health.status(), StatusCode::OK);

    let wizard = app.get("/setup/").await;
    assert_eq!(wizard.status(), StatusCode::OK);
    assert!(body_text(wizard).await.contains("setup-wizard --headless"));
}

#[tokio::test]
async fn completed_installation_redirects_setup_pages_to_admin() {
    let app = TestApp::new().await;
    let token = app.headless_token().await;
    submit_admin(&app, &token).await;

    let wizard = app.get("/setup/").await;
    assert_eq!(wizard.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&wizard), "/admin/");

    let admin = app.get("/admin/").await;
    assert_eq!(admin.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_admin_is_refused_while_an_admin_exists_and_keeps_the_token() {
    let app = TestApp::new().await;
    let token = app.headless_token().await;
    app.seed_admin().await;
    assert!(!app.service.get_setup_progress().await.ready_for_admin_creation);

    let form = app.get(&format!("/setup/create-admin/?token={}", token)).await;
    assert_eq!(form.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&form), "/setup/");

    let submitted = submit_admin(&app, &token).await;
    assert_eq!(submitted.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&submitted), "/setup/");
    assert!(app.service.validate_setup_token(&token).await);
    assert_eq!(app.service.list_admins().await.expect("admins").len(), 1);

    let wizard = app
        .get_with_cookie("/setup/", &session_cookie(&submitted))
        .await;
    assert!(body_text(wizard)
        .await
        .contains("An administrator account already exists."));
}

#[tokio::test]
async fn admin_area_requires_completed_setup() {
    let app = TestApp::new().await;

    let admin = app.get("/admin/").await;
    assert_eq!(admin.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&admin), "/setup/");
}

#[tokio::test]
async fn pasted_token_is_checked_before_redirecting_to_the_form() {
    let app = TestApp::new().await;
    let token = app.headless_token().await;

    let malformed = app.post_form("/setup/", &[("token", "not a token!")]).await;
    assert_eq!(malformed.status(), StatusCode::OK);
    assert!(body_text(malformed).await.contains("Invalid token format."));

    let unknown = app.post_form("/setup/", &[("token", "abcDEF123_-")]).await;
    assert_eq!(unknown.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&unknown), "/setup/");

    let accepted = app.post_form("/setup/", &[("token", token.as_str())]).await;
    assert_eq!(accepted.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&accepted),
        format!("/setup/create-admin/?token={}", token)
    );
    assert!(app.service.validate_setup_token(&token).await);
}

#[tokio::test]
async fn wizard_remembers_the_token_for_the_session() {
    let app = TestApp::new().await;
    let token = app.headless_token().await;

    let first = app.get(&format!("/setup/?token={}", token)).await;
    assert_eq!(first.status(), StatusCode::OK);
    let cookie = session_cookie(&first);

    let again = app.get_with_cookie("/setup/", &cookie).await;
    assert_eq!(again.status(), StatusCode::OK);
    let html = body_text(again).await;
    assert!(html.contains(&format!("/setup/create-admin/?token={}", token)));

    let fresh = body_text(app.get("/setup/").await).await;
    assert!(!fresh.contains("/setup/create-admin/"));
}

#[tokio::test]
async fn redirect_view_resolves_the_token_from_session_or_cookie() {
    let app = TestApp::new().await;
    let token = app.headless_token().await;
    let form_url = format!("/setup/create-admin/?token={}", token);

    let wizard = app.get(&format!("/setup/?token={}", token)).await;
    let from_session = app
        .get_with_cookie("/setup/redirect/", &session_cookie(&wizard))
        .await;
    assert_eq!(from_session.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&from_session), form_url);

    let from_cookie = app
        .get_with_cookie("/setup/redirect/", &format!("setup_token={}", token))
        .await;
    assert_eq!(from_cookie.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&from_cookie), form_url);

    let without = app.get("/setup/redirect/").await;
    assert_eq!(without.status(), StatusCode::OK);
    assert!(body_text(without).await.contains("Setup token required"));
}

#[tokio::test]
async fn completion_page_waits_for_setup_then_shows_the_record() {
    let app = TestApp::new().await;

    let early = app.get("/setup/complete/").await;
    assert_eq!(early.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&early), "/setup/");

    let token = app.headless_token().await;
    let submitted = submit_admin(&app, &token).await;
    let page = app
        .get_with_cookie("/setup/complete/", &session_cookie(&submitted))
        .await;
    assert_eq!(page.status(), StatusCode::OK);

    let info = app.service.get_installation_info().await;
    let installation_id = info.installation_id.expect("installation id");
    let html = body_text(page).await;
    assert!(html.contains("Signed in as <strong>admin</strong>"));
    assert!(html.contains(&installation_id));

    let status = app.get("/setup/status/").await;
    let payload: serde_json::Value =
        serde_json::from_str(&body_text(status).await).expect("status json");
    assert_eq!(payload["data"]["installationComplete"], true);
    assert_eq!(payload["data"]["installationInfo"]["installationId"], installation_id);
    assert_eq!(payload["data"]["installationInfo"]["adminExists"], true);
}

#[tokio::test]
async fn debug_mode_marks_exempt_responses_with_installation_state() {
    let app = TestApp::new().await;
    let mut settings = app.settings.clone();
    settings.debug = true;
    let router = api::router(AppState::new(app.service.clone(), settings));

    let response = router
        .oneshot(Request::get("/setup/status/").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-installation-complete"], "false");

    let plain = app.get("/setup/status/").await;
    assert!(plain.headers().get("x-installation-complete").is_none());
}
