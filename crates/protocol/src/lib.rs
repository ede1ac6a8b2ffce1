//! Wire protocol definitions shared by the backend, the gateway, and the
//! hook-side socket client.
//!
//! Three surfaces:
//! - `socket`: JSON messages on the local Unix socket (hook ↔ backend)
//! - `framing`: the 4-byte big-endian length prefix used for decision frames
//! - `rpc`: HTTP request/response bodies for backend ↔ gateway calls
//! - `events`: Feishu event envelopes and card-action values

pub mod events;
pub mod framing;
pub mod rpc;
pub mod socket;

// ── Timing constants ─────────────────────────────────────────────────────────

/// Deadline for the hook to deliver a complete register payload.
pub const SOCKET_RECEIVE_TIMEOUT_SECS: u64 = 5;
/// Broker dead-peer / timeout scan interval.
pub const CLEANUP_INTERVAL_SECS: u64 = 5;
/// How long resolved/disconnected requests stay visible for debugging.
pub const TERMINAL_RETENTION_SECS: u64 = 60;
/// Store expiry sweep interval.
pub const EXPIRY_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Gateway → backend decision forwarding deadline, inside Feishu's 3 s budget.
pub const DECISION_FORWARD_TIMEOUT_SECS: u64 = 2;
/// Directory browsing RPC deadline.
pub const BROWSE_TIMEOUT_SECS: u64 = 5;
/// Registration and notification RPC deadline.
pub const REGISTER_TIMEOUT_SECS: u64 = 10;
/// Session-continue forwarding deadline (covers the 2 s startup check).
pub const CONTINUE_TIMEOUT_SECS: u64 = 30;

/// Request body cap on both HTTP surfaces.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Largest decision frame the socket client will accept.
pub const MAX_FRAME_BYTES: u32 = 1024 * 1024;
