//! The node's main loop.
//!
//! Lines are read one at a time from the input channel. `init` is served
//! inline so that requests which follow it already see the identity; every
//! other request runs in its own task, which lets a slow transaction sit in
//! its retry loop while later requests are answered. Replies from those tasks
//! share one [`Replier`], so they never interleave on the output.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::channel::{self, Outbox, Received};
use crate::config::NodeConfig;
use crate::dispatch::Dispatcher;
use crate::error::NodeError;
use crate::executor::TxnExecutor;
use crate::identity::Topology;
use crate::message::{self, DecodeError, Envelope, MsgId, Origin, Payload};
use crate::reply::{Replier, ReplyTo};
use crate::store::Engine;
use crate::workload::{Account, Operation};

const SEED_ROUNDS: u32 = 10;

pub struct Node<E> {
    topology: Arc<Topology>,
    dispatcher: Arc<Dispatcher<E>>,
}

impl<E: Engine> Node<E> {
    pub fn new(engine: E, config: &NodeConfig) -> Self {
        let topology = Arc::new(Topology::new());
        let executor = TxnExecutor::new(Arc::new(engine), config.executor());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&topology), executor));
        Self {
            topology,
            dispatcher,
        }
    }

    /// Writes opening balances before any request is read.
    ///
    /// The writes are idempotent and nothing else runs yet, so a seed that
    /// conflicted or ended indeterminate is simply run again.
    pub async fn seed_accounts(&self, accounts: &[Account]) -> Result<(), NodeError> {
        if accounts.is_empty() {
            return Ok(());
        }
        let mut round = 1;
        loop {
            let seed = Operation::seed_accounts(accounts);
            match self.dispatcher.executor().execute(seed).await {
                Ok(_) => break,
                Err(err @ (NodeError::Indeterminate(_) | NodeError::TxnConflictExhausted { .. }))
                    if round < SEED_ROUNDS =>
                {
                    debug!(round, error = %err, "retrying account seed");
                    round += 1;
                }
                Err(err) => return Err(err),
            }
        }
        info!(accounts = accounts.len(), "seeded bank accounts");
        Ok(())
    }

    /// Serves requests from `input` until it closes.
    ///
    /// Returns once every in-flight request has been answered. Failing to read
    /// `input` or to write `output` while running is fatal.
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let replier = Arc::new(Replier::new(Outbox::new(output)));
        let lines = channel::receive(input);
        tokio::pin!(lines);
        let mut in_flight: JoinSet<io::Result<()>> = JoinSet::new();

        loop {
            tokio::select! {
                line = lines.next() => match line {
                    Some(Ok(Received::Line(line))) => {
                        self.handle_line(&line, &replier, &mut in_flight).await?
                    }
                    Some(Ok(Received::NotUtf8(err))) => {
                        warn!(error = %err, "dropping line that is not UTF-8");
                    }
                    Some(Err(err)) => return Err(err).context("failed to read from input"),
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    finish(joined)?;
                }
            }
        }

        debug!(pending = in_flight.len(), "input closed, draining requests");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = finish(joined) {
                debug!(error = ?err, "reply lost after input closed");
            }
        }
        Ok(())
    }

    async fn handle_line<W>(
        &self,
        line: &str,
        replier: &Arc<Replier<W>>,
        in_flight: &mut JoinSet<io::Result<()>>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        debug!(%line, "received");
        let envelope = match message::decode(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                return self
                    .reject(err, replier)
                    .await
                    .context("failed to write error reply")
            }
        };
        let Some(msg_id) = envelope.body.msg_id else {
            warn!(
                src = %envelope.src,
                kind = envelope.body.payload.kind(),
                "dropping request without msg_id"
            );
            return Ok(());
        };

        let is_init = matches!(envelope.body.payload, Payload::Init { .. });
        let request = serve(
            Arc::clone(&self.topology),
            Arc::clone(&self.dispatcher),
            Arc::clone(replier),
            envelope,
            msg_id,
        );
        if is_init {
            request.await.context("failed to write init reply")?;
        } else {
            in_flight.spawn(request);
        }
        Ok(())
    }

    /// Answers a line that could not be decoded, if it can be correlated.
    async fn reject<W>(&self, err: DecodeError, replier: &Replier<W>) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let Some(Origin {
            src,
            dest,
            msg_id: Some(msg_id),
        }) = err.origin().cloned()
        else {
            warn!(error = %err, "dropping undecodable message");
            return Ok(());
        };
        warn!(%src, msg_id, error = %err, "rejecting message");
        let node = self.topology.node_id().unwrap_or(&dest);
        let to = ReplyTo {
            client: src,
            in_reply_to: msg_id,
        };
        replier
            .reply(node, &to, NodeError::from(err).into_payload())
            .await
    }
}

async fn serve<E, W>(
    topology: Arc<Topology>,
    dispatcher: Arc<Dispatcher<E>>,
    replier: Arc<Replier<W>>,
    request: Envelope,
    msg_id: MsgId,
) -> io::Result<()>
where
    E: Engine,
    W: AsyncWrite + Unpin + Send,
{
    let Envelope { src, dest, body } = request;
    let span = info_span!("request", %src, msg_id, kind = body.payload.kind());
    async move {
        let reply = dispatcher.dispatch(body.payload).await;
        // Before init the only name we have is the one the client used.
        let node = topology.node_id().unwrap_or(&dest);
        let to = ReplyTo {
            client: src,
            in_reply_to: msg_id,
        };
        replier.reply(node, &to, reply).await
    }
    .instrument(span)
    .await
}

fn finish(joined: Result<io::Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result.context("failed to write reply"),
        Err(err) if err.is_panic() => {
            error!(error = %err, "request handler panicked");
            Ok(())
        }
        Err(_) => Ok(()),
    }
}
