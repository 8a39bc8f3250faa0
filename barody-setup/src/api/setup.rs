// Setup web entry points
//
// All state changes go through `InstallationService`. Every failure path ends in a redirect with
// a flash message, a re-rendered form, or a JSON payload; handlers never return a bare 500.

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use log::{error, info, warn};

use crate::api::forms::{AdminCreationForm, TokenEntryForm};
use crate::api::middleware::SETUP_ENTRY;
use crate::api::pages::{self, WizardView};
use crate::api::session::{FlashLevel, SessionHandle, SETUP_TOKEN_COOKIE};
use crate::error::ValidationErrors;
use crate::models::requests::TokenQuery;
use crate::models::responses::{ApiResponse, SetupStatusReport};
use crate::models::state::AppState;

pub const ADMIN_HOME: &str = "/admin/";
pub const COMPLETE_PAGE: &str = "/setup/complete/";

fn create_admin_url(token: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    format!("/setup/create-admin/?token={}", encoded)
}

async fn flash_redirect(
    state: &AppState,
    session: SessionHandle,
    level: FlashLevel,
    text: &str,
    to: &str,
) -> Response {
    state
        .sessions
        .update(&session.id, |data| data.flash(level, text))
        .await;
    (session.jar, Redirect::to(to)).into_response()
}

/// Admin creation is allowed only while `ready_for_admin_creation` holds. Checked before the
/// form is shown and again before the token is consumed.
async fn require_ready(state: &AppState, session: SessionHandle) -> Result<SessionHandle, Response> {
    let progress = state.service.get_setup_progress().await;
    if progress.ready_for_admin_creation {
        return Ok(session);
    }

    warn!(
        "[PHASE: web] [STEP: create_admin] Not ready for administrator creation: {:?}",
        progress
    );
    let text = if progress.admin_exists {
        "An administrator account already exists. Finish the installation with `barody-setup setup-wizard --force` on the server."
    } else {
        "The system is not ready for administrator creation. Check the setup status."
    };
    Err(flash_redirect(state, session, FlashLevel::Error, text, SETUP_ENTRY).await)
}

// =========================
// Wizard
// =========================

/// GET /setup/
pub async fn wizard(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<TokenQuery>,
) -> Response {
    let session = SessionHandle::resolve(jar, state.cookie_name());
    if state.service.is_installation_complete().await {
        return (session.jar, Redirect::to(ADMIN_HOME)).into_response();
    }

    let mut view = WizardView {
        progress: state.service.get_setup_progress().await,
        ..WizardView::default()
    };

    let from_query = query.token().map(str::to_string);
    let candidate = match from_query.clone() {
        Some(t) => Some(t),
        None => state.sessions.load(&session.id).await.setup_token,
    };

    if let Some(token) = candidate {
        if state.service.validate_setup_token(&token).await {
            state
                .sessions
                .update(&session.id, |data| data.setup_token = Some(token.clone()))
                .await;
            view.valid_token = Some(token);
        } else {
            state
                .sessions
                .update(&session.id, |data| {
                    data.setup_token = None;
                    if from_query.is_some() {
                        data.flash(FlashLevel::Error, "Invalid or expired setup token.");
                    }
                })
                .await;
        }
    }

    view.messages = state.sessions.take_messages(&session.id).await;
    (session.jar, pages::wizard_page(&view)).into_response()
}

/// POST /setup/ (token pasted into the landing page)
pub async fn submit_token(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<TokenEntryForm>,
) -> Response {
    let session = SessionHandle::resolve(jar, state.cookie_name());
    if state.service.is_installation_complete().await {
        return (session.jar, Redirect::to(ADMIN_HOME)).into_response();
    }

    let token = match form.clean() {
        Ok(token) => token,
        Err(failure) => {
            let view = WizardView {
                progress: state.service.get_setup_progress().await,
                messages: state.sessions.take_messages(&session.id).await,
                valid_token: None,
                token_error: Some(failure.reason),
            };
            return (session.jar, pages::wizard_page(&view)).into_response();
        }
    };

    if !state.service.validate_setup_token(&token).await {
        warn!("[PHASE: web] [STEP: token_entry] Rejected pasted setup token");
        return flash_redirect(
            &state,
            session,
            FlashLevel::Error,
            "Invalid or expired setup token.",
            SETUP_ENTRY,
        )
        .await;
    }

    state
        .sessions
        .update(&session.id, |data| data.setup_token = Some(token.clone()))
        .await;
    (session.jar, Redirect::to(&create_admin_url(&token))).into_response()
}

// =========================
// Create admin
// =========================

/// GET /setup/create-admin/?token=...
pub async fn create_admin_form(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<TokenQuery>,
) -> Response {
    let session = SessionHandle::resolve(jar, state.cookie_name());
    if state.service.is_installation_complete().await {
        return (session.jar, Redirect::to(ADMIN_HOME)).into_response();
    }

    let Some(token) = query.token().map(str::to_string) else {
        return flash_redirect(
            &state,
            session,
            FlashLevel::Error,
            "A setup token is required to create the administrator account.",
            SETUP_ENTRY,
        )
        .await;
    };
    if !state.service.validate_setup_token(&token).await {
        return flash_redirect(
            &state,
            session,
            FlashLevel::Error,
            "Invalid or expired setup token.",
            SETUP_ENTRY,
        )
        .await;
    }
    let session = match require_ready(&state, session).await {
        Ok(session) => session,
        Err(redirect) => return redirect,
    };

    let form = AdminCreationForm {
        token,
        ..AdminCreationForm::default()
    };
    let messages = state.sessions.take_messages(&session.id).await;
    (
        session.jar,
        pages::create_admin_page(&form, &ValidationErrors::new(), &messages),
    )
        .into_response()
}

/// POST /setup/create-admin/
///
/// The token is consumed before the account is created: a token can be burned by a failed
/// creation, but two submissions can never both create an administrator.
pub async fn create_admin_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<TokenQuery>,
    Form(mut form): Form<AdminCreationForm>,
) -> Response {
    let session = SessionHandle::resolve(jar, state.cookie_name());
    if state.service.is_installation_complete().await {
        return (session.jar, Redirect::to(ADMIN_HOME)).into_response();
    }

    if form.token.trim().is_empty() {
        if let Some(t) = query.token() {
            form.token = t.to_string();
        }
    }
    let token = form.token.trim().to_string();
    if token.is_empty() || !state.service.validate_setup_token(&token).await {
        warn!("[PHASE: web] [STEP: create_admin] Missing or invalid setup token on submit");
        return flash_redirect(
            &state,
            session,
            FlashLevel::Error,
            "Invalid or expired setup token.",
            SETUP_ENTRY,
        )
        .await;
    }
    let session = match require_ready(&state, session).await {
        Ok(session) => session,
        Err(redirect) => return redirect,
    };

    let errors = match form.validate(&state.service).await {
        Ok(errors) => errors,
        Err(e) => {
            error!("[PHASE: web] [STEP: create_admin] Form validation failed: {}", e);
            return flash_redirect(
                &state,
                session,
                FlashLevel::Error,
                "The system is not ready for administrator creation. Check the setup status.",
                SETUP_ENTRY,
            )
            .await;
        }
    };
    if !errors.is_empty() {
        let messages = state.sessions.take_messages(&session.id).await;
        return (
            session.jar,
            pages::create_admin_page(&form.without_passwords(), &errors, &messages),
        )
            .into_response();
    }

    match state.service.redeem_setup_token(&token).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => {
            warn!("[PHASE: web] [STEP: create_admin] {}", e);
            return flash_redirect(
                &state,
                session,
                FlashLevel::Error,
                "This setup token has already been used or has expired.",
                SETUP_ENTRY,
            )
            .await;
        }
        Err(e) => {
            error!("[PHASE: web] [STEP: create_admin] Token consumption failed: {}", e);
            return flash_redirect(
                &state,
                session,
                FlashLevel::Error,
                "Could not record token use. Please try again.",
                SETUP_ENTRY,
            )
            .await;
        }
    }

    let admin = match state
        .service
        .create_admin_user(&form.to_new_admin(), false)
        .await
    {
        Ok(admin) => admin,
        Err(e) => {
            error!("[PHASE: web] [STEP: create_admin] Admin creation failed after token use: {}", e);
            let text = if e.is_conflict() {
                format!("{}.", e)
            } else {
                format!(
                    "Administrator creation failed ({}). The setup token has been used; generate a new one with `barody-setup setup-wizard --headless`.",
                    e
                )
            };
            return flash_redirect(&state, session, FlashLevel::Error, &text, SETUP_ENTRY).await;
        }
    };

    if let Err(e) = state.service.mark_installation_complete(Some(admin.id)).await {
        error!("[PHASE: web] [STEP: create_admin] Could not mark installation complete: {}", e);
        return flash_redirect(
            &state,
            session,
            FlashLevel::Error,
            "The administrator was created but installation could not be finalized. Run `barody-setup setup-wizard --force` on the server.",
            SETUP_ENTRY,
        )
        .await;
    }

    info!(
        "[PHASE: web] [STEP: create_admin] Setup completed through the web flow (admin_id={})",
        admin.id
    );
    state
        .sessions
        .update(&session.id, |data| {
            data.user_id = Some(admin.id);
            data.setup_token = None;
            data.flash(FlashLevel::Success, "Administrator account created. Welcome!");
        })
        .await;
    (session.jar, Redirect::to(COMPLETE_PAGE)).into_response()
}

// =========================
// Status / health
// =========================

/// GET /setup/status/ (always 200 with a JSON payload)
pub async fn status(State(state): State<AppState>) -> Json<ApiResponse<SetupStatusReport>> {
    let report = SetupStatusReport {
        status: state.service.get_installation_status().await,
        installation_info: state.service.get_installation_info().await,
    };
    let problem = report
        .status
        .error
        .clone()
        .or_else(|| report.installation_info.error.clone());
    match problem {
        Some(problem) => Json(ApiResponse::ok_with_message(report, problem)),
        None => Json(ApiResponse::ok(report)),
    }
}

/// GET /setup/health/ (200 healthy/degraded, 503 when the database is unreachable)
pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.service.database_health().await;
    let code = if report.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report)).into_response()
}

// =========================
// Completion / redirect
// =========================

/// GET /setup/complete/
pub async fn complete(State(state): State<AppState>, jar: CookieJar) -> Response {
    let session = SessionHandle::resolve(jar, state.cookie_name());
    if !state.service.is_installation_complete().await {
        return (session.jar, Redirect::to(SETUP_ENTRY)).into_response();
    }

    let data = state.sessions.load(&session.id).await;
    let admin = match data.user_id {
        Some(id) => state.service.find_admin(id).await.ok().flatten(),
        None => None,
    };
    let next_url = match data.post_setup_redirect {
        Some(_) => {
            state
                .sessions
                .update(&session.id, |d| d.post_setup_redirect.take())
                .await
        }
        None => None,
    };
    let messages = state.sessions.take_messages(&session.id).await;
    let info = state.service.get_installation_info().await;

    (
        session.jar,
        pages::complete_page(admin.as_ref(), &info, next_url.as_deref(), &messages),
    )
        .into_response()
}

/// GET /setup/redirect/ (token carried by the session or a `setup_token` cookie)
pub async fn setup_redirect(State(state): State<AppState>, jar: CookieJar) -> Response {
    let cookie_token = jar
        .get(SETUP_TOKEN_COOKIE)
        .map(|c| c.value().trim().to_string())
        .filter(|t| !t.is_empty());
    let session = SessionHandle::resolve(jar, state.cookie_name());

    if state.service.is_installation_complete().await {
        return (session.jar, Redirect::to(ADMIN_HOME)).into_response();
    }

    let token = match state.sessions.load(&session.id).await.setup_token {
        Some(t) => Some(t),
        None => cookie_token,
    };
    match token {
        Some(t) if state.service.validate_setup_token(&t).await => {
            (session.jar, Redirect::to(&create_admin_url(&t))).into_response()
        }
        _ => (session.jar, pages::redirect_help_page()).into_response(),
    }
}

// =========================
// Operational pages
// =========================

/// GET /admin/ (behind `setup_required`)
pub async fn admin_home(State(state): State<AppState>, jar: CookieJar) -> Response {
    let session = SessionHandle::resolve(jar, state.cookie_name());
    let data = state.sessions.load(&session.id).await;
    let admin = match data.user_id {
        Some(id) => state.service.find_admin(id).await.ok().flatten(),
        None => None,
    };
    let messages = state.sessions.take_messages(&session.id).await;
    (
        session.jar,
        pages::admin_landing_page(admin.as_ref(), &messages),
    )
        .into_response()
}

/// GET /
pub async fn index() -> Response {
    pages::index_page().into_response()
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, pages::not_found_page()).into_response()
}
