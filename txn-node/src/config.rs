//! Runtime configuration for a node.
//!
//! The binary fills this in from the command line (see [`crate::cli`]);
//! tests build it directly.

use crate::executor::ExecutorConfig;
use crate::store::{FaultConfig, IsolationLevel};

/// What a `read` of an absent key replies with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum MissingKeyPolicy {
    /// `error` with code 20 (key-does-not-exist).
    #[default]
    Error,
    /// `read_ok` with `value: null`.
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub max_attempts: u32,
    pub missing_key: MissingKeyPolicy,
    pub isolation: IsolationLevel,
    pub allow_negative_balances: bool,
    pub faults: FaultConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            missing_key: MissingKeyPolicy::default(),
            isolation: IsolationLevel::default(),
            allow_negative_balances: false,
            faults: FaultConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_attempts: self.max_attempts,
            missing_key: self.missing_key,
            allow_negative_balances: self.allow_negative_balances,
        }
    }
}
