//! The gateway role: Internet-facing Feishu event endpoint, registration
//! flow, card composition, and routing back to per-owner backends.

pub mod backend_rpc;
pub mod cards;
pub mod commands;
pub mod events;
pub mod register;
pub mod routes;
pub mod send;
pub mod state;

pub use {routes::router, state::GatewayState};

use std::{sync::Arc, time::Duration};

use tracing::{error, info};

use {larkin_config::LarkinConfig, larkin_protocol::EXPIRY_SWEEP_INTERVAL_SECS};

/// Boot the gateway: store sweep plus the HTTP surface.
pub async fn run(config: LarkinConfig) -> anyhow::Result<()> {
    let state = Arc::new(GatewayState::new(config)?);

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(EXPIRY_SWEEP_INTERVAL_SECS));
            loop {
                tick.tick().await;
                if let Err(e) = state.message_sessions.cleanup_expired() {
                    error!(error = %e, "message session sweep failed");
                }
            }
        });
    }

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.gateway_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway HTTP surface listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
