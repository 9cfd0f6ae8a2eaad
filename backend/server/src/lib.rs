//! HTTP surface of the voting wizard.
//!
//! Each voter session id owns one [`wizard::Wizard`]. Requests for the same
//! session are serialised on that wizard, different sessions never share state.
//!
//!
//!
//! # Routes
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | GET | `/elections` | |
//! | POST | `/sessions/{id}/login` | `{"contact": {"kind": "phone", "address": "..."}}` |
//! | POST | `/sessions/{id}/logout` | |
//! | GET | `/sessions/{id}/wizard?constituencyQuery=&candidateQuery=` | |
//! | POST | `/sessions/{id}/election` | `{"electionId": "ge2024"}` |
//! | POST | `/sessions/{id}/constituency` | `{"constituency": "Mumbai North"}` |
//! | POST | `/sessions/{id}/candidate` | `{"candidateId": "c6"}` |
//! | POST | `/sessions/{id}/next`, `/back`, `/reload` | |
//! | POST | `/sessions/{id}/otp/send` | |
//! | POST | `/sessions/{id}/otp/verify` | `{"code": "123456"}` |
//! | POST | `/sessions/{id}/confirm`, `/reset` | |
//!
//! Every wizard route answers with the full view of the session, or with the
//! error text and a status code when the action was rejected. While another
//! request is still working on the session, `GET .../wizard` answers with the
//! last published view and `busy` set to what is running.
//!
//! Sessions without a request for `SESSION_TTL_SECS` are signed out.
//!
//!
//!
//! # Session Stores
//!
//! - `memory` (default): lost on restart
//! - `file`: JSON files under `SESSION_DIR`
//! - `redis`: shared between instances, expires after `SESSION_TTL_SECS`
//!
//!
//!
//! # Setup
//!
//! Run with the built-in elections.
//! ```sh
//! RUST_LOG=info cargo run -p vote
//! ```
//!
//! Run with Redis sessions and a catalog file.
//! ```sh
//! SESSION_BACKEND=redis REDIS_URL=redis://127.0.0.1:6379 CATALOG_PATH=./catalog.json cargo run -p vote
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal, time::interval};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod routes;
pub mod state;

use routes::{
    back_handler, candidate_handler, confirm_handler, constituency_handler, election_handler,
    elections_handler, login_handler, logout_handler, next_handler, reload_handler, reset_handler,
    send_code_handler, verify_code_handler, wizard_handler,
};
use state::State;

pub fn app(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/elections", get(elections_handler))
        .route("/sessions/{id}/login", post(login_handler))
        .route("/sessions/{id}/logout", post(logout_handler))
        .route("/sessions/{id}/wizard", get(wizard_handler))
        .route("/sessions/{id}/election", post(election_handler))
        .route("/sessions/{id}/constituency", post(constituency_handler))
        .route("/sessions/{id}/candidate", post(candidate_handler))
        .route("/sessions/{id}/next", post(next_handler))
        .route("/sessions/{id}/back", post(back_handler))
        .route("/sessions/{id}/reload", post(reload_handler))
        .route("/sessions/{id}/otp/send", post(send_code_handler))
        .route("/sessions/{id}/otp/verify", post(verify_code_handler))
        .route("/sessions/{id}/confirm", post(confirm_handler))
        .route("/sessions/{id}/reset", post(reset_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await;

    info!("Starting server...");

    tokio::spawn(evict_idle_sessions(state.clone()));

    let address = format!("0.0.0.0:{}", state.config.port);
    let app = app(state);

    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .expect("Failed to bind address");
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    info!("Server shut down");
}

async fn evict_idle_sessions(state: Arc<State>) {
    let mut ticker = interval(Duration::from_secs(60));

    loop {
        ticker.tick().await;

        let evicted = state.evict_idle().await;
        if evicted > 0 {
            info!("Signed out {evicted} idle sessions");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
