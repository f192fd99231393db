//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod accounts;
pub mod audit;
pub mod auth;
pub mod categories;
pub mod documents;
pub mod merchants;
pub mod proposals;
pub mod reports;
pub mod transactions;

// Re-export all handlers for use in router
pub use accounts::*;
pub use audit::*;
pub use auth::*;
pub use categories::*;
pub use documents::*;
pub use merchants::*;
pub use proposals::*;
pub use reports::*;
pub use transactions::*;

use serde::Deserialize;

/// `skip`/`limit` query parameters; the database clamps both
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub skip: i64,
    pub limit: Option<i64>,
}
