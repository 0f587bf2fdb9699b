//! Tunables for the lag compensation engine.

use crate::error::ConfigError;
use crate::snapshot::SimTime;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RETENTION_WINDOW_MS: u32 = 1000;
pub const DEFAULT_SUB_QUERY_BUDGET: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LagCompConfig {
    /// How far back history is kept.
    pub retention_window_ms: u32,
    /// Ricochet segments the worker may trace per tick. First segments are free.
    pub per_tick_sub_query_budget: u32,
    /// Debug only: every request targets `now - override` instead.
    pub simulated_latency_override_ms: Option<u32>,
    /// When false, queries trace the live world on the caller thread.
    pub enabled: bool,
    pub debug_draw: bool,
    /// Broadphase misses closer than this are always kept.
    pub bypass_tolerance: f32,
    /// Broadphase misses closer than this are kept when a heuristic agrees.
    pub bypass_margin: f32,
    /// Motion below this across a bracket counts as stationary.
    pub stationary_epsilon: f32,
}

impl Default for LagCompConfig {
    fn default() -> Self {
        Self {
            retention_window_ms: DEFAULT_RETENTION_WINDOW_MS,
            per_tick_sub_query_budget: DEFAULT_SUB_QUERY_BUDGET,
            simulated_latency_override_ms: None,
            enabled: true,
            debug_draw: false,
            bypass_tolerance: 0.05,
            bypass_margin: 0.5,
            stationary_epsilon: 0.01,
        }
    }
}

impl LagCompConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_window_ms == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        if self.per_tick_sub_query_budget == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        for (name, value) in [
            ("bypass_tolerance", self.bypass_tolerance),
            ("bypass_margin", self.bypass_margin),
            ("stationary_epsilon", self.stationary_epsilon),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidDistance { name, value });
            }
        }
        if self.bypass_margin < self.bypass_tolerance {
            return Err(ConfigError::MarginBelowTolerance {
                tolerance: self.bypass_tolerance,
                margin: self.bypass_margin,
            });
        }
        Ok(())
    }

    pub fn retention_window(&self) -> SimTime {
        SimTime::from(self.retention_window_ms) / 1000.0
    }

    pub fn latency_override(&self) -> Option<SimTime> {
        self.simulated_latency_override_ms
            .map(|ms| SimTime::from(ms) / 1000.0)
    }
}
