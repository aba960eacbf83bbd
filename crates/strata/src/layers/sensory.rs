//! Sensory layer: raw input that expires after a short TTL

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::layers::{LayerPolicy, LayerStore, OverflowPolicy};
use crate::memory::decay::DecayConfig;
use crate::memory::types::{MemoryItem, MemoryLayer};

pub type SensoryLayer = LayerStore<SensoryPolicy>;

#[derive(Debug, Clone)]
pub struct SensoryPolicy {
    pub ttl: Duration,
    pub max_capacity: usize,
    pub decay: DecayConfig,
}

impl SensoryPolicy {
    pub fn new(ttl: Duration, max_capacity: usize) -> Self {
        Self {
            ttl,
            max_capacity,
            decay: DecayConfig::for_layer(MemoryLayer::Sensory),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: Duration::from_secs(config.layers.sensory.ttl_seconds),
            max_capacity: config.layers.sensory.max_capacity,
            decay: config.decay.sensory,
        }
    }
}

impl Default for SensoryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LayerPolicy for SensoryPolicy {
    fn layer(&self) -> MemoryLayer {
        MemoryLayer::Sensory
    }

    fn default_importance(&self, _layer: MemoryLayer) -> f64 {
        0.3
    }

    fn admit(&self, item: &mut MemoryItem, now: DateTime<Utc>) -> Result<()> {
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                StrataError::Validation(format!("sensory ttl {:?} is out of range", self.ttl))
            })?;
        item.expires_at = Some(expires_at);
        Ok(())
    }

    fn overflow(&self) -> OverflowPolicy {
        OverflowPolicy::SweepExpired {
            max_capacity: self.max_capacity,
        }
    }

    fn decay(&self, _layer: MemoryLayer) -> Option<DecayConfig> {
        Some(self.decay)
    }
}
