//! The backend role: runs beside the agent, owns the Unix-socket broker,
//! and exposes the `/cb/*` RPC surface plus browser-fallback decision pages.

pub mod dirs;
pub mod html;
pub mod launcher;
pub mod notify;
pub mod register;
pub mod routes;
pub mod state;

pub use {routes::router, state::BackendState};

use std::{sync::Arc, time::Duration};

use tracing::{error, info};

use {
    larkin_broker::LocalSocketServer,
    larkin_config::LarkinConfig,
    larkin_protocol::EXPIRY_SWEEP_INTERVAL_SECS,
};

/// Boot the backend: socket server, broker cleanup, store sweep,
/// auto-registration, HTTP surface. Runs until the process dies.
pub async fn run(config: LarkinConfig) -> anyhow::Result<()> {
    let state = Arc::new(BackendState::new(config)?);

    let socket = LocalSocketServer::bind(
        state.config.socket_path.clone(),
        Arc::clone(&state.broker),
    )?;
    tokio::spawn(socket.run());

    {
        let broker = Arc::clone(&state.broker);
        tokio::spawn(async move { broker.run_cleanup().await });
    }

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(EXPIRY_SWEEP_INTERVAL_SECS));
            loop {
                tick.tick().await;
                if let Err(e) = state.session_chats.cleanup_expired() {
                    error!(error = %e, "session chat sweep failed");
                }
            }
        });
    }

    register::spawn_auto_register(Arc::clone(&state));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.callback_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "backend HTTP surface listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
