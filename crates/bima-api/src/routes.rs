//! API route definitions

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};

use crate::handlers;
use crate::middleware::{logging_middleware, request_id_middleware, session_auth_middleware};
use crate::state::AppState;

/// Create the full API router with application state
pub fn create_router_with_state(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::liveness))
        .route("/health/ready", get(handlers::readiness))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .with_state(state.clone());

    let authenticated = Router::new()
        .nest("/api/v1", api_v1_routes())
        .layer(from_fn_with_state(state.clone(), session_auth_middleware))
        .with_state(state);

    public
        .merge(authenticated)
        .layer(from_fn(logging_middleware))
        .layer(from_fn(request_id_middleware))
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Session
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        // Platform administration (super admin)
        .route(
            "/tenants",
            post(handlers::tenants::create_tenant).get(handlers::tenants::list_tenants),
        )
        .route(
            "/tenants/{id}",
            get(handlers::tenants::get_tenant).put(handlers::tenants::update_tenant),
        )
        .route(
            "/tenants/{id}/reset-admin-password",
            post(handlers::tenants::reset_admin_password),
        )
        // Tenant users
        .route(
            "/users",
            post(handlers::users::create_user).get(handlers::users::list_users),
        )
        // Customers
        .route(
            "/customers",
            post(handlers::customers::create_customer).get(handlers::customers::list_customers),
        )
        .route(
            "/customers/{id}",
            get(handlers::customers::get_customer)
                .put(handlers::customers::update_customer)
                .delete(handlers::customers::delete_customer),
        )
        .route(
            "/customers/{id}/fields",
            put(handlers::customers::set_field_value).get(handlers::customers::list_field_values),
        )
        // Vehicles
        .route(
            "/vehicles",
            post(handlers::vehicles::create_vehicle).get(handlers::vehicles::list_vehicles),
        )
        .route(
            "/vehicles/{id}",
            get(handlers::vehicles::get_vehicle)
                .put(handlers::vehicles::update_vehicle)
                .delete(handlers::vehicles::delete_vehicle),
        )
        .route(
            "/vehicles/{id}/ownership",
            post(handlers::vehicles::transfer_ownership)
                .get(handlers::vehicles::ownership_history),
        )
        .route(
            "/vehicles/{id}/compliance",
            get(handlers::vehicles::compliance_status),
        )
        // Policies
        .route(
            "/policies",
            post(handlers::policies::create_policy).get(handlers::policies::list_policies),
        )
        .route(
            "/policies/{id}",
            get(handlers::policies::get_policy)
                .put(handlers::policies::edit_policy)
                .delete(handlers::policies::delete_policy),
        )
        .route("/policies/{id}/submit", post(handlers::policies::submit_policy))
        .route("/policies/{id}/activate", post(handlers::policies::activate_policy))
        .route("/policies/{id}/cancel", post(handlers::policies::cancel_policy))
        .route("/policies/{id}/renew", post(handlers::policies::renew_policy))
        .route(
            "/policies/{id}/payments",
            post(handlers::policies::record_payment).get(handlers::policies::list_payments),
        )
        .route(
            "/policies/{id}/payments/{payment_id}/verify",
            post(handlers::policies::verify_payment),
        )
        // Permits
        .route(
            "/permits",
            post(handlers::permits::create_permit).get(handlers::permits::list_permits),
        )
        .route(
            "/permits/{id}",
            get(handlers::permits::get_permit)
                .put(handlers::permits::edit_permit)
                .delete(handlers::permits::delete_permit),
        )
        .route("/permits/{id}/activate", post(handlers::permits::activate_permit))
        .route("/permits/{id}/cancel", post(handlers::permits::cancel_permit))
        .route(
            "/permit-types",
            get(handlers::permits::list_permit_types).put(handlers::permits::upsert_permit_type),
        )
        // Dynamic fields
        .route(
            "/dynamic-fields",
            post(handlers::dynamic_fields::create_definition)
                .get(handlers::dynamic_fields::list_definitions),
        )
        .route(
            "/dynamic-fields/{id}",
            put(handlers::dynamic_fields::update_definition),
        )
        // Notifications
        .route(
            "/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/notifications/{id}/read",
            post(handlers::notifications::mark_read),
        )
        // Reports
        .route("/reports/policies/active", get(handlers::reports::active_policies))
        .route("/reports/policies/expired", get(handlers::reports::expired_policies))
        .route("/reports/policies/ending", get(handlers::reports::policies_ending))
        .route("/reports/registrations", get(handlers::reports::registrations))
        .route(
            "/reports/compliance-summary",
            get(handlers::reports::compliance_summary),
        )
        // Audit trail
        .route("/audit", get(handlers::audit::query_audit))
        .route("/history/{kind}/{id}", get(handlers::audit::entity_history))
}
