//! E-Sign API - HTTP adapter for the multi-party signing workflow
//!
//! Provides REST endpoints for:
//! - Document creation and dispatch
//! - Recipient view, sign and decline
//! - Final documents, completion certificates and verification
//! - Audit trail, timeline and integrity checks

pub mod error;
pub mod files;
pub mod handlers;
pub mod models;
pub mod sqlite;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Sender endpoints
        .route("/api/documents", post(handlers::create_document))
        .route("/api/documents/:id", get(handlers::get_document))
        .route("/api/documents/:id/send", post(handlers::send_document))
        .route("/api/documents/:id/expire", post(handlers::expire_document))
        // Recipient endpoints
        .route("/api/recipients/:id/view", post(handlers::view_document))
        .route("/api/recipients/:id/sign", post(handlers::sign_document))
        .route("/api/recipients/:id/decline", post(handlers::decline_document))
        // Completion
        .route("/api/documents/:id/final", get(handlers::final_document))
        .route(
            "/api/documents/:id/certificate",
            post(handlers::generate_certificate).get(handlers::download_certificate),
        )
        .route(
            "/api/certificates/:id/verify",
            get(handlers::verify_certificate),
        )
        .route("/api/documents/:id/protect", post(handlers::protect_document))
        .route("/api/documents/:id/password", post(handlers::reveal_password))
        // Audit
        .route("/api/documents/:id/audit", get(handlers::audit_trail))
        .route("/api/documents/:id/timeline", get(handlers::timeline))
        .route("/api/documents/:id/integrity", get(handlers::verify_integrity))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
