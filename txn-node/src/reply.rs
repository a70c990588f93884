//! Builds correlated reply envelopes and writes them out.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWrite;
use tracing::trace;

use crate::channel::Outbox;
use crate::message::{self, Body, Envelope, MsgId, Payload};

/// The request a reply answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    /// Sender of the request; becomes the reply's `dest`.
    pub client: String,
    pub in_reply_to: MsgId,
}

pub struct Replier<W> {
    outbox: Outbox<W>,
    next_msg_id: AtomicU64,
}

impl<W> Replier<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(outbox: Outbox<W>) -> Self {
        Self {
            outbox,
            next_msg_id: AtomicU64::new(1),
        }
    }

    /// Sends `payload` from `node` back to the requester.
    ///
    /// An error here means the output channel is broken.
    pub async fn reply(&self, node: &str, to: &ReplyTo, payload: Payload) -> io::Result<()> {
        let envelope = Envelope {
            src: node.to_string(),
            dest: to.client.clone(),
            body: Body {
                msg_id: Some(self.next_msg_id.fetch_add(1, Ordering::Relaxed)),
                in_reply_to: Some(to.in_reply_to),
                payload,
            },
        };
        let line = message::encode(&envelope)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        trace!(%line, "sending");
        self.outbox.send(&line).await
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tokio::io::BufReader;

    use super::*;
    use crate::channel::receive;

    #[tokio::test]
    async fn replies_are_correlated_and_numbered() {
        let (writer, reader) = tokio::io::duplex(4096);
        let replier = Replier::new(Outbox::new(writer));
        let to = ReplyTo {
            client: "c1".into(),
            in_reply_to: 7,
        };
        replier.reply("n1", &to, Payload::WriteOk).await.unwrap();
        replier
            .reply("n1", &to, Payload::ReadOk { value: json!(3) })
            .await
            .unwrap();
        drop(replier);

        let lines: Vec<Value> = receive(BufReader::new(reader))
            .map(|line| serde_json::from_str(&line.unwrap().into_line().unwrap()).unwrap())
            .collect()
            .await;
        assert_eq!(
            lines,
            vec![
                json!({"src":"n1","dest":"c1","body":{"type":"write_ok","msg_id":1,"in_reply_to":7}}),
                json!({"src":"n1","dest":"c1","body":{"type":"read_ok","value":3,"msg_id":2,"in_reply_to":7}}),
            ]
        );
    }
}
