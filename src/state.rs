//! Shared application state, constructor-injected at the server root rather
//! than held in global singletons (§9 re-architecture note: "Global
//! singletons for store connections become constructor-injected handles
//! owned by the server root; teardown is explicit").

use std::sync::Arc;

use crate::config::Config;
use crate::durable_store::DurableStore;
use crate::fast_store::FastStore;
use crate::queue::Queue;
use crate::threshold_store::ThresholdStore;

#[derive(Clone)]
pub struct AppState {
    pub fast_store: Arc<FastStore>,
    pub durable_store: Arc<DurableStore>,
    pub queue: Arc<Queue>,
    pub threshold_store: Arc<ThresholdStore>,
    pub config: Arc<Config>,
}
