//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (intentionally unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/auth/whoami", get(handlers::whoami))
        // Admin endpoints (all require the admin flag)
        .route("/v1/admin/users", post(handlers::create_user))
        .route(
            "/v1/admin/users/{username}/tokens",
            get(handlers::list_user_tokens),
        )
        .route(
            "/v1/admin/tokens/{token_id}",
            delete(handlers::revoke_token),
        )
        .route("/v1/admin/preauth/purge", post(handlers::purge_preauth))
        .route("/v1/admin/nodes/{id}/reload", post(handlers::reload_node));

    let node_routes = Router::new()
        .route(
            "/node",
            get(handlers::list_nodes).post(handlers::create_node),
        )
        .route(
            "/node/{id}",
            get(handlers::get_node)
                .put(handlers::update_node)
                .delete(handlers::delete_node),
        )
        .route("/node/{id}/acl", get(handlers::get_acl))
        .route(
            "/node/{id}/acl/{acl_type}",
            get(handlers::acl_category)
                .post(handlers::acl_category)
                .put(handlers::acl_category)
                .delete(handlers::acl_category),
        )
        .route("/preauth/{preauth_id}", get(handlers::redeem_preauth));

    let mut router = Router::new().merge(api_routes).merge(node_routes);

    // Conditionally add metrics endpoint based on config.
    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    let body_limit = usize::try_from(state.config.server.max_upload_size).unwrap_or(usize::MAX);

    // Middleware layers are applied in reverse order (outermost first).
    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .layer(DefaultBodyLimit::max(body_limit))
        // Auth middleware (validates token and sets AuthenticatedUser extension)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
