//! HTTP intake and status surface
//!
//! `POST /jobs/export` and `POST /jobs/batch-export` publish onto the durable
//! queue and answer 202 with the message id; `GET /jobs/{id}` reads the
//! ledger; `GET /dead-letters` lists messages that gave up; `GET /health`
//! reports components and counters.

mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;
pub(crate) mod utils;
mod validation;

pub use error::ApiError;
pub use server::router;
pub use state::AppState;
