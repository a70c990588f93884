//! An in-process node driven over in-memory pipes.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines},
    task::JoinHandle,
    time::timeout,
};
use txn_node::{
    config::NodeConfig,
    node::Node,
    store::{Engine, MemoryEngine},
};

pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

pub struct Session {
    input: DuplexStream,
    replies: Lines<BufReader<DuplexStream>>,
    node: JoinHandle<Result<()>>,
    next_msg_id: u64,
}

impl Session {
    pub fn start(config: NodeConfig) -> Self {
        Self::with_node(Node::new(MemoryEngine::default(), &config))
    }

    pub fn with_node<E: Engine>(node: Node<E>) -> Self {
        let (input, node_input) = tokio::io::duplex(64 * 1024);
        let (node_output, replies) = tokio::io::duplex(64 * 1024);
        let node = tokio::spawn(async move { node.run(BufReader::new(node_input), node_output).await });
        Self {
            input,
            replies: BufReader::new(replies).lines(),
            node,
            next_msg_id: 1,
        }
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.input
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.input.write_all(b"\n").await?;
        self.input.flush().await?;
        Ok(())
    }

    /// Sends `body` from `src` with a fresh `msg_id`, which is returned.
    pub async fn send(&mut self, src: &str, mut body: Value) -> Result<u64> {
        let msg_id = self.next_msg_id;
        self.next_msg_id += 1;
        body["msg_id"] = json!(msg_id);
        let envelope = json!({"src": src, "dest": "n1", "body": body});
        self.send_line(&envelope.to_string()).await?;
        Ok(msg_id)
    }

    pub async fn recv(&mut self) -> Result<Value> {
        let line = timeout(READ_TIMEOUT, self.replies.next_line())
            .await
            .map_err(|_| anyhow!("timed out waiting for reply"))??
            .context("node closed its output")?;
        serde_json::from_str(&line).with_context(|| format!("reply is not JSON: {line}"))
    }

    /// Sends one request from `c1` and returns the reply body.
    pub async fn request(&mut self, body: Value) -> Result<Value> {
        let msg_id = self.send("c1", body).await?;
        let reply = self.recv().await?;
        if reply["body"]["in_reply_to"] != json!(msg_id) {
            return Err(anyhow!("reply to msg {msg_id} expected, got {reply}"));
        }
        Ok(reply["body"].clone())
    }

    pub async fn init(&mut self) -> Result<()> {
        let body = self
            .request(json!({"type": "init", "node_id": "n1", "node_ids": ["n1", "n2"]}))
            .await?;
        if body["type"] != "init_ok" {
            return Err(anyhow!("init failed: {body}"));
        }
        Ok(())
    }

    /// Closes the node's input and waits for it to exit.
    pub async fn close(self) -> Result<()> {
        drop(self.input);
        timeout(READ_TIMEOUT, self.node)
            .await
            .map_err(|_| anyhow!("node did not exit after input closed"))??
    }
}
