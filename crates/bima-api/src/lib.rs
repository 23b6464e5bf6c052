//! Bima API - HTTP surface of the vehicle compliance platform
//!
//! Handlers stay thin: session + CSRF middleware authenticates the actor,
//! the tenant context is bound per request, and the engine/repositories do
//! the rest.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod password;
pub mod routes;
pub mod session;
pub mod state;
pub mod validation;

pub use routes::create_router_with_state;
pub use session::AuthService;
pub use state::AppState;
