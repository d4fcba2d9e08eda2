//! Fan-Out Bus: delivers journaled events and run-state transitions to
//! live subscribers over topics `run/<id>`, `agent/<id>`, and `global`.

pub mod ws;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

pub fn run_topic(run_id: Uuid) -> String {
    format!("run/{run_id}")
}

pub fn agent_topic(agent_id: Uuid) -> String {
    format!("agent/{agent_id}")
}

pub const GLOBAL_TOPIC: &str = "global";

/// In-process topic hub. A topic's channel is created lazily on first
/// publish or subscribe and reclaimed once its last subscriber drops.
pub struct FanOutBus {
    topics: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl FanOutBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        let mut topics = self.topics.lock().expect("fan-out subscriber table poisoned");
        topics.retain(|_, tx| tx.receiver_count() > 0);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publishes `payload` to `topic`. A topic with no subscribers simply
    /// drops the message — the bus never blocks a writer.
    pub fn publish(&self, topic: &str, payload: Value) {
        let tx = self.sender_for(topic);
        let _ = tx.send(BusMessage {
            topic: topic.to_string(),
            payload,
        });
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(topic).subscribe()
    }
}

impl Default for FanOutBus {
    fn default() -> Self {
        Self::new()
    }
}

/// The subscription target named by a wire frame: a single run, a single
/// agent, or the `global` firehose. Untagged so a frame carries exactly
/// one of `runId`, `agentId`, or `global` — the client never constructs
/// the internal `run/<id>` / `agent/<id>` topic encoding itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionTarget {
    Run {
        #[serde(rename = "runId")]
        run_id: Uuid,
    },
    Agent {
        #[serde(rename = "agentId")]
        agent_id: Uuid,
    },
    Global { global: bool },
}

impl SubscriptionTarget {
    pub fn topic(&self) -> String {
        match self {
            Self::Run { run_id } => run_topic(*run_id),
            Self::Agent { agent_id } => agent_topic(*agent_id),
            Self::Global { .. } => GLOBAL_TOPIC.to_string(),
        }
    }
}

/// `{type: "subscribe"|"unsubscribe", runId|agentId|global}` per the
/// subscription transport's wire contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionFrame {
    Subscribe {
        #[serde(flatten)]
        target: SubscriptionTarget,
    },
    Unsubscribe {
        #[serde(flatten)]
        target: SubscriptionTarget,
    },
}
