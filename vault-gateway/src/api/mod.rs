//! HTTP route modules, one per resource, following
//! `cyxcloud-gateway::{auth_api, s3_api}`'s per-resource `routes()`
//! convention.

pub mod acp;
pub mod authorizations;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/authorizations", authorizations::routes())
        .nest("/webhooks", webhooks::routes())
        .nest("/acp", acp::routes())
}
