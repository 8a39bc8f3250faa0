// HTTP surface: setup routes, a minimal operational surface, and the installation gate.

pub mod forms;
pub mod middleware;
pub mod pages;
pub mod session;
pub mod setup;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::models::state::AppState;
use middleware::{installation_gate, setup_required, GateState};

/// Build the application router with the gate installed in front of every route.
pub fn router(state: AppState) -> Router {
    let gate = GateState::from_app(&state);

    let setup_routes = Router::new()
        .route("/setup/", get(setup::wizard).post(setup::submit_token))
        .route(
            "/setup/create-admin/",
            get(setup::create_admin_form).post(setup::create_admin_submit),
        )
        .route("/setup/status/", get(setup::status))
        .route("/setup/health/", get(setup::health))
        .route("/setup/complete/", get(setup::complete))
        .route("/setup/redirect/", get(setup::setup_redirect));

    Router::new()
        .merge(setup_routes)
        .route(
            "/admin/",
            get(setup::admin_home).route_layer(from_fn_with_state(gate.clone(), setup_required)),
        )
        .route("/", get(setup::index))
        .fallback(setup::not_found)
        .with_state(state)
        .layer(from_fn_with_state(gate, installation_gate))
        .layer(TraceLayer::new_for_http())
}
