use serde::{Deserialize, Serialize};
use std::fs;

use crate::core_types::RateScaled;
use crate::fees::{DEFAULT_CASH_OUT_FEE_RATE, DEFAULT_LOAN_FEE_RATE};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Ledger tuning knobs
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Bounded wait for a wallet row lock before failing with Conflict
    pub lock_wait_ms: u64,
    /// Minimum spacing between optimistic transfer attempts per client
    pub debounce_ms: u64,
    /// How long settled optimistic entries linger before purge
    pub grace_ms: u64,
    /// Cash-out fee rate, 10^6 precision
    pub cash_out_fee_rate: RateScaled,
    /// Loan processing fee rate, 10^6 precision
    pub loan_processing_fee_rate: RateScaled,
    /// Cadence of the expired-loan sweep task
    pub sweep_interval_secs: u64,
    /// Change feed buffer (events dropped for lagging subscribers)
    pub feed_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: 250,
            debounce_ms: 500,
            grace_ms: 2_000,
            cash_out_fee_rate: DEFAULT_CASH_OUT_FEE_RATE,
            loan_processing_fee_rate: DEFAULT_LOAN_FEE_RATE,
            sweep_interval_secs: 60,
            feed_capacity: 256,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
