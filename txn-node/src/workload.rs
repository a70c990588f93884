//! Typed workload operations.
//!
//! Wire payloads are validated into [`Operation`]s before anything touches
//! the store, so the executor only ever sees well-formed requests.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::NodeError;
use crate::message::{MicroOp, Payload};

/// A workload key.
///
/// Maelstrom sends keys as strings or integers and expects them echoed back
/// in the same form. The storage key is the key's plain text, so `1` and
/// `"1"` name the same entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    raw: Value,
    storage: String,
}

impl Key {
    pub fn new(raw: Value) -> Result<Self, NodeError> {
        match &raw {
            Value::String(text) => Ok(Self {
                storage: text.clone(),
                raw,
            }),
            Value::Number(number) => Ok(Self {
                storage: number.to_string(),
                raw,
            }),
            other => Err(NodeError::MalformedMessage(format!(
                "keys must be strings or numbers, got {other}"
            ))),
        }
    }

    pub fn as_storage(&self) -> &str {
        &self.storage
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage)
    }
}

/// Integer-looking text becomes an integer key, anything else a string key.
impl FromStr for Key {
    type Err = NodeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(NodeError::MalformedMessage("empty key".to_string()));
        }
        match text.parse::<i64>() {
            Ok(number) => Self::new(Value::from(number)),
            Err(_) => Self::new(Value::String(text.to_string())),
        }
    }
}

/// One step of a multi-key `txn` request.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnStep {
    Read(Key),
    Write(Key, Value),
    Append(Key, Value),
}

impl TryFrom<MicroOp> for TxnStep {
    type Error = NodeError;

    fn try_from(MicroOp(function, key, value): MicroOp) -> Result<Self, Self::Error> {
        let key = Key::new(key)?;
        match function.as_str() {
            "r" => Ok(TxnStep::Read(key)),
            "w" => Ok(TxnStep::Write(key, value)),
            "append" => Ok(TxnStep::Append(key, value)),
            other => Err(NodeError::MalformedMessage(format!(
                "unknown micro-op `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Read {
        key: Key,
    },
    Write {
        key: Key,
        value: Value,
    },
    Cas {
        key: Key,
        from: Value,
        to: Value,
        create_if_not_exists: bool,
    },
    Transfer {
        from: Key,
        to: Key,
        amount: i64,
    },
    Txn {
        steps: Vec<TxnStep>,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Read { .. } => "read",
            Operation::Write { .. } => "write",
            Operation::Cas { .. } => "cas",
            Operation::Transfer { .. } => "transfer",
            Operation::Txn { .. } => "txn",
        }
    }

    /// Writes each account's opening balance in one transaction.
    pub fn seed_accounts(accounts: &[Account]) -> Self {
        Operation::Txn {
            steps: accounts
                .iter()
                .map(|account| TxnStep::Write(account.key.clone(), Value::from(account.balance)))
                .collect(),
        }
    }
}

/// Validates a workload payload. Non-workload payloads are unsupported.
impl TryFrom<Payload> for Operation {
    type Error = NodeError;

    fn try_from(payload: Payload) -> Result<Self, Self::Error> {
        match payload {
            Payload::Read { key } => Ok(Operation::Read { key: Key::new(key)? }),
            Payload::Write { key, value } => Ok(Operation::Write {
                key: Key::new(key)?,
                value,
            }),
            Payload::Cas {
                key,
                from,
                to,
                create_if_not_exists,
            } => Ok(Operation::Cas {
                key: Key::new(key)?,
                from,
                to,
                create_if_not_exists,
            }),
            Payload::Transfer { from, to, amount } => {
                if amount <= 0 {
                    return Err(NodeError::MalformedMessage(format!(
                        "transfer amount must be positive, got {amount}"
                    )));
                }
                Ok(Operation::Transfer {
                    from: Key::new(from)?,
                    to: Key::new(to)?,
                    amount,
                })
            }
            Payload::Txn { txn } => Ok(Operation::Txn {
                steps: txn
                    .into_iter()
                    .map(TxnStep::try_from)
                    .collect::<Result<_, _>>()?,
            }),
            other => Err(NodeError::UnsupportedOperation(other.kind().to_string())),
        }
    }
}

/// Result of a committed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Read(Value),
    Write,
    Cas,
    Transfer,
    Txn(Vec<MicroOp>),
}

impl Completion {
    pub fn into_payload(self) -> Payload {
        match self {
            Completion::Read(value) => Payload::ReadOk { value },
            Completion::Write => Payload::WriteOk,
            Completion::Cas => Payload::CasOk,
            Completion::Transfer => Payload::TransferOk,
            Completion::Txn(txn) => Payload::TxnOk { txn },
        }
    }
}

/// Opening balance for a bank account, given as `KEY=BALANCE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub key: Key,
    pub balance: i64,
}

impl FromStr for Account {
    type Err = NodeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (key, balance) = text.split_once('=').ok_or_else(|| {
            NodeError::MalformedMessage(format!("expected KEY=BALANCE, got `{text}`"))
        })?;
        let balance = balance.trim().parse().map_err(|_| {
            NodeError::MalformedMessage(format!("invalid balance in `{text}`"))
        })?;
        Ok(Account {
            key: key.parse()?,
            balance,
        })
    }
}
