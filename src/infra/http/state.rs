use std::sync::Arc;

use crate::application::contacts::ContactService;

use super::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub contacts: ContactService,
    pub rate_limiter: Arc<RateLimiter>,
}
