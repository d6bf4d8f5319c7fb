//! Lag source fed by hand, for tests and transports without a lag API.

use crate::error::{EventBusError, EventBusResult};
use crate::ports::outbound::LagSource;
use async_trait::async_trait;
use bus_types::LagSample;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
struct TopicLag {
    sample: LagSample,
    failing: bool,
}

/// [`LagSource`] whose samples are set directly. Unknown topics report zero lag.
#[derive(Debug, Default)]
pub struct ManualLagSource {
    topics: RwLock<HashMap<String, TopicLag>>,
}

impl ManualLagSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lag(&self, topic: &str, count_lag: i64, time_lag: Duration) {
        let mut topics = self.topics.write();
        let entry = topics.entry(topic.to_string()).or_default();
        entry.sample = LagSample::new(count_lag, time_lag);
        entry.failing = false;
    }

    /// Make reads for `topic` fail until the next `set_lag` or `set_failing(false)`.
    pub fn set_failing(&self, topic: &str, failing: bool) {
        self.topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .failing = failing;
    }
}

#[async_trait]
impl LagSource for ManualLagSource {
    async fn get_lag(&self, topic: &str, _consumer_group: &str) -> EventBusResult<LagSample> {
        match self.topics.read().get(topic) {
            Some(lag) if lag.failing => Err(EventBusError::LagRead {
                topic: topic.to_string(),
                reason: "lag source unavailable".to_string(),
            }),
            Some(lag) => Ok(lag.sample),
            None => Ok(LagSample::default()),
        }
    }
}
