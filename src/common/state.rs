// Application state shared across all modules

use std::sync::Arc;

use crate::auth::service::AuthService;

/// Application state handed to every handler
///
/// Immutable after start-up; everything mutable lives in the database the
/// services hold a pool for.
#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
}
