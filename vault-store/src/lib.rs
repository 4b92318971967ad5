//! PostgreSQL persistence layer for the authorization credential vault.
//!
//! Keeps row shapes (`models`) separate from the domain types in
//! `vault_core`; conversions happen at the boundary via `into_domain()`.

pub mod error;
pub mod models;
pub mod postgres;

pub use error::{Result, StoreError};
pub use models::{
    AuditEventRow, AuthorizationFilter, AuthorizationRow, InboundEventRow, NewAuthorization,
    SearchPage, SortField, TenantRow, WebhookDeliveryRow, WebhookSubscriptionRow,
};
pub use postgres::{Database, DbConfig};
