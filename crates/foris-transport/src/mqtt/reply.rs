//! Retained-reply lifecycle
//!
//! Each request is served by one worker task which walks
//! `Pending -> Retained -> Cleared -> Forgotten`: the reply is published
//! retained (with one delayed retry), kept for the retain-clear period, then
//! overwritten by an empty retained payload, and finally the worker drops its
//! registry entry.

use async_trait::async_trait;
use foris_router::Router;
use rumqttc::{AsyncClient, QoS};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::registry::ReplyRegistry;
use super::topics::Topics;
use crate::error::Result;

/// Delays of the reply lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTimings {
    /// Wait before the single publish retry
    pub retry_delay: Duration,
    /// How long a reply stays retained on the broker
    pub retain_clear: Duration,
}

impl Default for ReplyTimings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(300),
            retain_clear: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    /// Reply computed, not yet on the broker
    Pending,
    /// Published retained
    Retained,
    /// Retention cleared with an empty payload
    Cleared,
    /// Registry entry removed
    Forgotten,
}

/// Publishes reply payloads
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;
}

#[async_trait]
impl ReplyPublisher for AsyncClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        AsyncClient::publish(self, topic, QoS::AtMostOnce, retain, payload).await?;
        Ok(())
    }
}

/// One reply travelling through the lifecycle
pub struct ReplyLifecycle {
    reply_id: String,
    topic: String,
    generation: u64,
    timings: ReplyTimings,
    state: ReplyState,
}

impl ReplyLifecycle {
    pub fn new(reply_id: &str, topic: String, generation: u64, timings: ReplyTimings) -> Self {
        Self {
            reply_id: reply_id.to_string(),
            topic,
            generation,
            timings,
            state: ReplyState::Pending,
        }
    }

    pub fn state(&self) -> ReplyState {
        self.state
    }

    /// Perform the transition out of the current state
    pub async fn step(
        &mut self,
        publisher: &dyn ReplyPublisher,
        registry: &ReplyRegistry,
        payload: &[u8],
    ) -> ReplyState {
        self.state = match self.state {
            ReplyState::Pending => {
                if let Err(e) = publisher.publish(&self.topic, payload.to_vec(), true).await {
                    warn!("Publishing {} failed ({}), retrying", self.topic, e);
                    tokio::time::sleep(self.timings.retry_delay).await;
                    match publisher.publish(&self.topic, payload.to_vec(), true).await {
                        Ok(()) => ReplyState::Retained,
                        Err(e) => {
                            error!("Failed to publish reply {}: {}", self.reply_id, e);
                            ReplyState::Cleared
                        }
                    }
                } else {
                    ReplyState::Retained
                }
            }
            ReplyState::Retained => {
                tokio::time::sleep(self.timings.retain_clear).await;
                if let Err(e) = publisher.publish(&self.topic, Vec::new(), true).await {
                    warn!("Failed to clear retained reply {}: {}", self.reply_id, e);
                }
                ReplyState::Cleared
            }
            ReplyState::Cleared | ReplyState::Forgotten => {
                registry.finish(&self.reply_id, self.generation, self.timings.retain_clear);
                ReplyState::Forgotten
            }
        };
        self.state
    }

    /// Drive the reply to `Forgotten`
    pub async fn run(
        mut self,
        publisher: &dyn ReplyPublisher,
        registry: &ReplyRegistry,
        payload: &[u8],
    ) {
        while self.state != ReplyState::Forgotten {
            let state = self.step(publisher, registry, payload).await;
            debug!("Reply {} is {:?}", self.reply_id, state);
        }
    }
}

/// What a worker computes for its reply
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyJob {
    Action {
        module: String,
        action: String,
        data: Option<Value>,
    },
    List,
    JsonSchemas,
    WorkingReplies,
    ModuleActions(String),
}

/// Everything a reply worker needs
#[derive(Clone)]
pub struct ReplyService {
    router: Router,
    replies: Arc<ReplyRegistry>,
    publisher: Arc<dyn ReplyPublisher>,
    topics: Topics,
    timings: ReplyTimings,
}

impl ReplyService {
    pub fn new(
        router: Router,
        replies: Arc<ReplyRegistry>,
        publisher: Arc<dyn ReplyPublisher>,
        topics: Topics,
        timings: ReplyTimings,
    ) -> Self {
        Self {
            router,
            replies,
            publisher,
            topics,
            timings,
        }
    }

    pub fn replies(&self) -> &Arc<ReplyRegistry> {
        &self.replies
    }

    /// Compute the reply payload of `job`
    pub async fn execute(&self, job: &ReplyJob) -> Value {
        match job {
            ReplyJob::Action {
                module,
                action,
                data,
            } => {
                let mut request = json!({"module": module, "kind": "request", "action": action});
                if let (Some(data), Some(obj)) = (data, request.as_object_mut()) {
                    obj.insert("data".into(), data.clone());
                }
                self.router.process(&request).await.to_value()
            }
            ReplyJob::List => Value::Array(
                self.router
                    .registry()
                    .list_modules(None)
                    .into_iter()
                    .map(|(name, m)| {
                        json!({"name": name, "version": m.version, "actions": m.actions})
                    })
                    .collect(),
            ),
            ReplyJob::JsonSchemas => serde_json::to_value(self.router.validator().schema_bundle())
                .unwrap_or_else(|e| {
                    error!("Failed to serialize schemas: {}", e);
                    Value::Null
                }),
            ReplyJob::WorkingReplies => json!(self.replies.snapshot()),
            ReplyJob::ModuleActions(module) => json!(self.router.registry().list_actions(module)),
        }
    }

    /// Spawn the worker answering `reply_id` into `workers`; returns the
    /// registry generation of the worker.
    pub fn spawn(&self, workers: &mut JoinSet<()>, reply_id: String, job: ReplyJob) -> u64 {
        let service = self.clone();
        let id = reply_id.clone();
        self.replies.register_with(&id, move |generation| {
            workers.spawn(async move { service.serve(reply_id, generation, job).await })
        })
    }

    async fn serve(self, reply_id: String, generation: u64, job: ReplyJob) {
        let payload = self.execute(&job).await;
        let payload = match serde_json::to_vec(&payload) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize reply {}: {}", reply_id, e);
                self.replies
                    .finish(&reply_id, generation, self.timings.retain_clear);
                return;
            }
        };

        let topic = self.topics.reply(&reply_id);
        ReplyLifecycle::new(&reply_id, topic, generation, self.timings)
            .run(self.publisher.as_ref(), &self.replies, &payload)
            .await;
    }
}
