use std::path::PathBuf;

use clap::{Parser, ValueHint};

use crate::config::{MissingKeyPolicy, NodeConfig};
use crate::store::{FaultConfig, IsolationLevel};
use crate::workload::Account;

/// A Maelstrom node serving lin-kv, bank and txn workloads from an in-memory
/// transactional store. Requests arrive on stdin, replies leave on stdout and
/// logs go to stderr.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Attempts per request before replying with txn-conflict.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Reply to reads of absent keys with an error or with `null`.
    #[arg(long, value_enum, default_value_t = MissingKeyPolicy::Error)]
    pub missing_key: MissingKeyPolicy,

    /// Isolation level of the storage engine.
    #[arg(long, value_enum, default_value_t = IsolationLevel::Snapshot)]
    pub isolation: IsolationLevel,

    /// Let transfers overdraw the source account.
    #[arg(long)]
    pub allow_negative_balances: bool,

    /// Opening bank balances as KEY=BALANCE. Repeat or separate with commas.
    #[arg(long = "account", value_name = "KEY=BALANCE", value_delimiter = ',', value_parser = parse_account)]
    pub accounts: Vec<Account>,

    /// Probability that a commit fails with a spurious conflict.
    #[arg(long, default_value_t = 0.0, value_parser = parse_rate)]
    pub conflict_rate: f64,

    /// Probability that a commit's outcome is reported as unknown.
    #[arg(long, default_value_t = 0.0, value_parser = parse_rate)]
    pub indeterminate_rate: f64,

    /// Seed for fault injection, for reproducible runs.
    #[arg(long)]
    pub fault_seed: Option<u64>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Append logs to this file instead of stderr.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            max_attempts: self.max_attempts,
            missing_key: self.missing_key,
            isolation: self.isolation,
            allow_negative_balances: self.allow_negative_balances,
            faults: FaultConfig {
                conflict_rate: self.conflict_rate,
                indeterminate_rate: self.indeterminate_rate,
                seed: self.fault_seed,
            },
        }
    }
}

fn parse_account(raw: &str) -> Result<Account, String> {
    raw.parse().map_err(|err| format!("{err}"))
}

fn parse_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("rate must be between 0 and 1, got {rate}"))
    }
}
