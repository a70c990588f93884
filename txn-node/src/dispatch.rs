//! Routes request bodies to the identity barrier or the executor.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::executor::TxnExecutor;
use crate::identity::{InitOutcome, NodeIdentity, Topology};
use crate::message::Payload;
use crate::store::Engine;
use crate::workload::Operation;

pub struct Dispatcher<E> {
    topology: Arc<Topology>,
    executor: TxnExecutor<E>,
}

impl<E: Engine> Dispatcher<E> {
    pub fn new(topology: Arc<Topology>, executor: TxnExecutor<E>) -> Self {
        Self { topology, executor }
    }

    pub fn executor(&self) -> &TxnExecutor<E> {
        &self.executor
    }

    /// Handles one request and returns the reply body. Never fails: every
    /// error becomes an `error` payload.
    pub async fn dispatch(&self, payload: Payload) -> Payload {
        let kind = payload.kind();
        match self.route(payload).await {
            Ok(reply) => reply,
            Err(err) => {
                debug!(kind, code = err.code().as_u32(), error = %err, "request failed");
                err.into_payload()
            }
        }
    }

    async fn route(&self, payload: Payload) -> Result<Payload, NodeError> {
        match payload {
            Payload::Init { node_id, node_ids } => {
                self.init(NodeIdentity::new(node_id, node_ids));
                Ok(Payload::InitOk)
            }
            payload => {
                if !self.topology.is_initialized() {
                    return Err(NodeError::NotInitialized);
                }
                let operation = Operation::try_from(payload)?;
                let completion = self.executor.execute(operation).await?;
                Ok(completion.into_payload())
            }
        }
    }

    fn init(&self, identity: NodeIdentity) {
        let node_id = identity.node_id.clone();
        match self.topology.init(identity) {
            InitOutcome::Initialized => {
                let peers = self.topology.identity().map_or(0, |id| id.peers().count());
                info!(%node_id, peers, "node initialized");
            }
            InitOutcome::Repeated => debug!(%node_id, "repeated init"),
            InitOutcome::Conflicting => warn!(
                requested = %node_id,
                kept = self.topology.node_id().unwrap_or_default(),
                "init with a different identity ignored"
            ),
        }
    }
}
