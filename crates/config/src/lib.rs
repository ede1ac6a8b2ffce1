//! Environment-driven configuration for both larkin roles.
//!
//! Every knob is an environment variable (optionally seeded from a `.env`
//! file by the CLI before the loader runs). The backend and the gateway read
//! the same schema; each role ignores the other's fields.

pub mod loader;
pub mod schema;

pub use {
    loader::from_env,
    schema::{FeishuConfig, LarkinConfig, SendMode},
};
