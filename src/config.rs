use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Money;

/// Tunables for the charge protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Per-transaction ceiling, enforced at the coordinator and not just
    /// in the client.
    pub max_charge: Money,

    /// Bound on every remote call the coordinator makes.
    pub call_timeout_ms: u64,

    /// How long a journal entry may stay pending before the recovery
    /// sweep resolves it.
    pub pending_ttl_secs: u64,

    /// Cadence of the background sweep.
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_charge: Money::from_cents(500_00),
            call_timeout_ms: 3_000,
            pending_ttl_secs: 120,
            sweep_interval_secs: 30,
        }
    }
}

impl Config {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
