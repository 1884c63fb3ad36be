pub mod handlers;
pub mod identity;
pub mod routes;

pub use routes::build_router;

use std::sync::Arc;

use crate::app::Reporting;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub reporting: Arc<Reporting>,
}

impl AppState {
    pub fn new(reporting: Arc<Reporting>) -> Self {
        Self { reporting }
    }
}
