//! Runs workload operations as storage transactions.
//!
//! Each request gets at most `max_attempts` attempts. Every attempt opens a
//! fresh transaction, applies the whole operation and tries to commit, ending
//! in exactly one [`AttemptOutcome`]:
//!
//! ```text
//! Started ─┬─> Committed                       terminal, reply *_ok
//!          ├─> Conflict       ─(budget left)─> Started
//!          │                  ─(exhausted)───> txn-conflict error
//!          ├─> Aborted        terminal, definite error
//!          └─> Indeterminate  terminal, indefinite error
//! ```
//!
//! Indeterminate attempts are never retried: the first attempt may have
//! applied, and running it again could apply it twice.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::MissingKeyPolicy;
use crate::error::NodeError;
use crate::message::MicroOp;
use crate::store::{CommitOutcome, Engine, StoreError, Transaction};
use crate::workload::{Completion, Key, Operation, TxnStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
    pub missing_key: MissingKeyPolicy,
    pub allow_negative_balances: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            missing_key: MissingKeyPolicy::Error,
            allow_negative_balances: false,
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Committed(Completion),
    /// Definitely not committed, and worth retrying.
    Conflict(String),
    /// Definitely not committed, and retrying would not help.
    Aborted(NodeError),
    Indeterminate(String),
}

/// Why an attempt stopped before reaching commit.
enum Abort {
    Store(StoreError),
    Domain(NodeError),
}

impl From<StoreError> for Abort {
    fn from(err: StoreError) -> Self {
        Abort::Store(err)
    }
}

impl From<NodeError> for Abort {
    fn from(err: NodeError) -> Self {
        Abort::Domain(err)
    }
}

impl From<Abort> for AttemptOutcome {
    fn from(abort: Abort) -> Self {
        match abort {
            Abort::Store(StoreError::Conflict(reason)) => AttemptOutcome::Conflict(reason),
            Abort::Store(StoreError::Failure(reason)) => {
                AttemptOutcome::Aborted(NodeError::Storage(reason))
            }
            Abort::Domain(err) => AttemptOutcome::Aborted(err),
        }
    }
}

pub struct TxnExecutor<E> {
    engine: Arc<E>,
    config: ExecutorConfig,
}

impl<E> Clone for TxnExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: self.config,
        }
    }
}

impl<E: Engine> TxnExecutor<E> {
    pub fn new(engine: Arc<E>, config: ExecutorConfig) -> Self {
        Self { engine, config }
    }

    /// Runs `operation` on the blocking pool, since engine calls may block.
    pub async fn execute(&self, operation: Operation) -> Result<Completion, NodeError> {
        let executor = self.clone();
        tokio::task::spawn_blocking(move || executor.execute_blocking(&operation))
            .await
            .map_err(|err| NodeError::Storage(format!("transaction task failed: {err}")))?
    }

    /// The bounded retry loop.
    pub fn execute_blocking(&self, operation: &Operation) -> Result<Completion, NodeError> {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.attempt(operation) {
                AttemptOutcome::Committed(completion) => {
                    if attempt > 1 {
                        debug!(op = operation.kind(), attempt, "committed after retry");
                    }
                    return Ok(completion);
                }
                AttemptOutcome::Conflict(reason) => {
                    debug!(op = operation.kind(), attempt, %reason, "transaction conflicted");
                }
                AttemptOutcome::Aborted(err) => return Err(err),
                AttemptOutcome::Indeterminate(reason) => {
                    warn!(op = operation.kind(), attempt, %reason, "commit outcome unknown");
                    return Err(NodeError::Indeterminate(reason));
                }
            }
        }
        warn!(
            op = operation.kind(),
            attempts = max_attempts,
            "retry budget exhausted"
        );
        Err(NodeError::TxnConflictExhausted {
            attempts: max_attempts,
        })
    }

    /// One attempt: begin, apply, commit.
    pub fn attempt(&self, operation: &Operation) -> AttemptOutcome {
        let mut txn = match self.engine.begin() {
            Ok(txn) => txn,
            Err(err) => return Abort::Store(err).into(),
        };

        let completion = match self.apply(&mut txn, operation) {
            Ok(completion) => completion,
            Err(abort) => {
                txn.abort();
                return abort.into();
            }
        };

        match txn.commit() {
            CommitOutcome::Committed => AttemptOutcome::Committed(completion),
            CommitOutcome::Conflict => {
                AttemptOutcome::Conflict("commit validation failed".to_string())
            }
            CommitOutcome::Indeterminate => {
                AttemptOutcome::Indeterminate("engine could not confirm the commit".to_string())
            }
        }
    }

    fn apply(&self, txn: &mut E::Txn, operation: &Operation) -> Result<Completion, Abort> {
        match operation {
            Operation::Read { key } => match txn.get(key.as_storage())? {
                Some(value) => Ok(Completion::Read(value)),
                None => match self.config.missing_key {
                    MissingKeyPolicy::Error => Err(NodeError::KeyNotFound(key.to_string()).into()),
                    MissingKeyPolicy::Null => Ok(Completion::Read(Value::Null)),
                },
            },
            Operation::Write { key, value } => {
                txn.put(key.as_storage(), value.clone())?;
                Ok(Completion::Write)
            }
            Operation::Cas {
                key,
                from,
                to,
                create_if_not_exists,
            } => {
                match txn.get(key.as_storage())? {
                    Some(current) if current == *from => {}
                    Some(current) => {
                        return Err(NodeError::CasMismatch {
                            expected: from.to_string(),
                            actual: current.to_string(),
                        }
                        .into())
                    }
                    // A null `from` on an absent key is put-if-absent.
                    None if *create_if_not_exists || from.is_null() => {}
                    None => return Err(NodeError::KeyNotFound(key.to_string()).into()),
                }
                txn.put(key.as_storage(), to.clone())?;
                Ok(Completion::Cas)
            }
            Operation::Transfer { from, to, amount } => {
                self.transfer(txn, from, to, *amount)?;
                Ok(Completion::Transfer)
            }
            Operation::Txn { steps } => {
                let mut completed = Vec::with_capacity(steps.len());
                for step in steps {
                    completed.push(apply_step(txn, step)?);
                }
                Ok(Completion::Txn(completed))
            }
        }
    }

    fn transfer(&self, txn: &mut E::Txn, from: &Key, to: &Key, amount: i64) -> Result<(), Abort> {
        let source = balance(txn, from)?;
        let remaining = source.checked_sub(amount).ok_or_else(|| {
            NodeError::MalformedMessage(format!("transfer of {amount} overflows account {from}"))
        })?;
        if remaining < 0 && !self.config.allow_negative_balances {
            return Err(NodeError::InsufficientFunds {
                account: from.to_string(),
                balance: source,
                amount,
            }
            .into());
        }
        if from == to {
            return Ok(());
        }

        let target = balance(txn, to)?;
        let credited = target.checked_add(amount).ok_or_else(|| {
            NodeError::MalformedMessage(format!("transfer of {amount} overflows account {to}"))
        })?;
        txn.put(from.as_storage(), Value::from(remaining))?;
        txn.put(to.as_storage(), Value::from(credited))?;
        Ok(())
    }
}

/// Absent accounts hold zero.
fn balance<T: Transaction>(txn: &mut T, account: &Key) -> Result<i64, Abort> {
    match txn.get(account.as_storage())? {
        None => Ok(0),
        Some(value) => value.as_i64().ok_or_else(|| {
            NodeError::MalformedMessage(format!(
                "account {account} holds {value}, not an integer balance"
            ))
            .into()
        }),
    }
}

fn apply_step<T: Transaction>(txn: &mut T, step: &TxnStep) -> Result<MicroOp, Abort> {
    match step {
        TxnStep::Read(key) => {
            let value = txn.get(key.as_storage())?.unwrap_or(Value::Null);
            Ok(MicroOp("r".to_string(), key.raw().clone(), value))
        }
        TxnStep::Write(key, value) => {
            txn.put(key.as_storage(), value.clone())?;
            Ok(MicroOp("w".to_string(), key.raw().clone(), value.clone()))
        }
        TxnStep::Append(key, element) => {
            let mut list = match txn.get(key.as_storage())? {
                None => Vec::new(),
                Some(Value::Array(list)) => list,
                Some(other) => {
                    return Err(NodeError::MalformedMessage(format!(
                        "cannot append to {key}, which holds {other}"
                    ))
                    .into())
                }
            };
            list.push(element.clone());
            txn.put(key.as_storage(), Value::Array(list))?;
            Ok(MicroOp("append".to_string(), key.raw().clone(), element.clone()))
        }
    }
}
