//! Maelstrom envelope codec.
//!
//! Every line on the wire is one JSON envelope:
//!
//! ```json
//! {"src":"c1","dest":"n1","body":{"type":"read","msg_id":3,"key":"x"}}
//! ```
//!
//! The body is an internally tagged union on `type`. Requests carry
//! `msg_id`; replies carry `in_reply_to` (and their own `msg_id`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub type MsgId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: String,
    pub dest: String,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<MsgId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MsgId>,
    #[serde(flatten)]
    pub payload: Payload,
}

/// `[f, k, v]` micro-operation as it appears inside `txn` bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroOp(pub String, pub Value, pub Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Init {
        node_id: String,
        node_ids: Vec<String>,
    },
    InitOk,
    Read {
        key: Value,
    },
    ReadOk {
        value: Value,
    },
    Write {
        key: Value,
        value: Value,
    },
    WriteOk,
    Cas {
        key: Value,
        from: Value,
        to: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        create_if_not_exists: bool,
    },
    CasOk,
    Transfer {
        from: Value,
        to: Value,
        amount: i64,
    },
    TransferOk,
    Txn {
        txn: Vec<MicroOp>,
    },
    TxnOk {
        txn: Vec<MicroOp>,
    },
    Error {
        code: u32,
        text: String,
    },
}

impl Payload {
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "init",
        "init_ok",
        "read",
        "read_ok",
        "write",
        "write_ok",
        "cas",
        "cas_ok",
        "transfer",
        "transfer_ok",
        "txn",
        "txn_ok",
        "error",
    ];

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Init { .. } => "init",
            Payload::InitOk => "init_ok",
            Payload::Read { .. } => "read",
            Payload::ReadOk { .. } => "read_ok",
            Payload::Write { .. } => "write",
            Payload::WriteOk => "write_ok",
            Payload::Cas { .. } => "cas",
            Payload::CasOk => "cas_ok",
            Payload::Transfer { .. } => "transfer",
            Payload::TransferOk => "transfer_ok",
            Payload::Txn { .. } => "txn",
            Payload::TxnOk { .. } => "txn_ok",
            Payload::Error { .. } => "error",
        }
    }
}

/// Who sent an undecodable message, as far as we could tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub src: String,
    pub dest: String,
    pub msg_id: Option<MsgId>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not an envelope at all, or a known `type` with bad fields.
    #[error("malformed message: {reason}")]
    Malformed {
        origin: Option<Origin>,
        reason: String,
    },

    /// A well-formed envelope whose `type` this node does not serve.
    #[error("unsupported message type `{kind}`")]
    Unsupported { origin: Origin, kind: String },
}

impl DecodeError {
    pub fn origin(&self) -> Option<&Origin> {
        match self {
            DecodeError::Malformed { origin, .. } => origin.as_ref(),
            DecodeError::Unsupported { origin, .. } => Some(origin),
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    src: String,
    dest: String,
    body: Map<String, Value>,
}

/// Parses one line into an [`Envelope`].
///
/// Decoding happens in two steps so that the sender and `msg_id` survive
/// even when the body itself is unusable; the node needs them to report the
/// failure back.
pub fn decode(raw: &str) -> Result<Envelope, DecodeError> {
    let RawEnvelope { src, dest, body } =
        serde_json::from_str(raw).map_err(|err| DecodeError::Malformed {
            origin: None,
            reason: err.to_string(),
        })?;

    let origin = Origin {
        src,
        dest,
        msg_id: body.get("msg_id").and_then(Value::as_u64),
    };

    let kind = match body.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(_) => {
            return Err(DecodeError::Malformed {
                origin: Some(origin),
                reason: "body `type` must be a string".to_string(),
            })
        }
        None => {
            return Err(DecodeError::Malformed {
                origin: Some(origin),
                reason: "body has no `type`".to_string(),
            })
        }
    };
    if !Payload::KNOWN_TYPES.contains(&kind) {
        return Err(DecodeError::Unsupported {
            kind: kind.to_string(),
            origin,
        });
    }

    match serde_json::from_value::<Body>(Value::Object(body)) {
        Ok(body) => Ok(Envelope {
            src: origin.src,
            dest: origin.dest,
            body,
        }),
        Err(err) => Err(DecodeError::Malformed {
            origin: Some(origin),
            reason: err.to_string(),
        }),
    }
}

/// Serializes an envelope to a single line (without the trailing newline).
///
/// Our payloads only hold strings, integers and `serde_json::Value`s, so this
/// does not fail in practice; the error is still surfaced to the caller.
pub fn encode(envelope: &Envelope) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}
