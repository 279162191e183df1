#![allow(dead_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::trace;
use types::{LogicalState, Site};

#[derive(Debug, Clone)]
pub struct DebounceConfig {
    /// Minimum uninterrupted window of opposite-to-default samples before
    /// a site's published state flips away from its default.
    pub fill_debounce: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            fill_debounce: Duration::from_millis(2_000),
        }
    }
}

struct DebounceState {
    opposite_since: Option<Instant>,
    effective: LogicalState,
}

/// Per-site default-biased hysteresis. A raw sample that agrees with a
/// site's configured default snaps the published state back to default
/// immediately; a disagreeing sample only flips the published state once
/// it has disagreed continuously for at least `fill_debounce`.
pub struct Debouncer {
    config: DebounceConfig,
    states: HashMap<String, DebounceState>,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Feed one raw sample for `site` and return its (possibly unchanged)
    /// published state.
    pub fn update(&mut self, site: &Site, raw_bit: bool, now: Instant) -> LogicalState {
        let default_bit = site.default.as_bit();
        let state = self
            .states
            .entry(site.site_id.clone())
            .or_insert_with(|| DebounceState {
                opposite_since: None,
                effective: site.default,
            });

        if raw_bit == default_bit {
            state.opposite_since = None;
            state.effective = site.default;
        } else {
            match state.opposite_since {
                None => {
                    state.opposite_since = Some(now);
                }
                Some(since) => {
                    if now.saturating_duration_since(since) >= self.config.fill_debounce {
                        if state.effective == site.default {
                            trace!(site_id = %site.site_id, "debounce threshold reached, flipping");
                        }
                        state.effective = site.default.opposite();
                    }
                }
            }
        }

        state.effective
    }

    /// Delete `site_id`'s debounce state so its next `update` starts fresh
    /// from default. Called after a Modbus error or a missing sample.
    pub fn reset(&mut self, site_id: &str) {
        self.states.remove(site_id);
    }
}
