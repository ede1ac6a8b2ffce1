//! The decision broker: holds each blocked hook's socket open until exactly
//! one decision frame has been delivered for it.

pub mod broker;
pub mod decision;
pub mod rules;
pub mod server;

pub use {
    broker::{BrokerStats, RequestBroker, RequestStatus, ResolveError},
    decision::handle_decision,
    server::LocalSocketServer,
};
