//! MQTT request listener

use foris_core::Context;
use foris_router::Router;
use rumqttc::{AsyncClient, Event, Outgoing, Packet, QoS, SubAck, SubscribeReasonCode};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::announcer::Announcer;
use super::registry::ReplyRegistry;
use super::reply::{ReplyJob, ReplyService, ReplyTimings};
use super::topics::{IncomingTopic, Topics};
use super::MqttConfig;
use crate::error::{Result, TransportError};

/// Waits for the acks of one round of subscriptions
#[derive(Debug, Default)]
struct SubscriptionTracker {
    expected: usize,
    sent: usize,
    pending: HashSet<u16>,
}

impl SubscriptionTracker {
    fn start(&mut self, expected: usize) {
        self.expected = expected;
        self.sent = 0;
        self.pending.clear();
    }

    fn sent(&mut self, pkid: u16) {
        self.sent += 1;
        self.pending.insert(pkid);
    }

    /// Record an ack; returns whether every subscription is now acked
    fn acked(&mut self, ack: &SubAck) -> Result<bool> {
        if ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            return Err(TransportError::SubscribeFailed(format!(
                "broker rejected subscription {}",
                ack.pkid
            )));
        }
        self.pending.remove(&ack.pkid);
        Ok(self.expected > 0 && self.sent == self.expected && self.pending.is_empty())
    }
}

/// Extract `reply_msg_id` and `data` from a request payload
pub(crate) fn parse_request(payload: &[u8]) -> Option<(String, Option<Value>)> {
    let mut value: Value = serde_json::from_slice(payload).ok()?;
    let object = value.as_object_mut()?;
    let reply_id = object.get("reply_msg_id")?.as_str()?.to_string();
    if reply_id.is_empty() {
        return None;
    }
    Some((reply_id, object.remove("data")))
}

fn job_for(topic: IncomingTopic, data: Option<Value>) -> ReplyJob {
    match topic {
        IncomingTopic::List => ReplyJob::List,
        IncomingTopic::JsonSchemas => ReplyJob::JsonSchemas,
        IncomingTopic::WorkingReplies => ReplyJob::WorkingReplies,
        IncomingTopic::ModuleActions(module) => ReplyJob::ModuleActions(module),
        IncomingTopic::Action { module, action } => ReplyJob::Action {
            module,
            action,
            data,
        },
    }
}

/// The reply job for a publish, or `None` when it is dropped.
///
/// Requests stop being accepted once shutdown has begun so the drain of the
/// running workers terminates.
fn incoming_request(
    topics: &Topics,
    topic: &str,
    payload: &[u8],
    accepting: bool,
) -> Option<(String, ReplyJob)> {
    let Some(incoming) = topics.parse(topic) else {
        debug!("Ignoring message on {}", topic);
        return None;
    };
    if !accepting {
        debug!("Shutting down, dropping request on {}", topic);
        return None;
    }
    match parse_request(payload) {
        Some((reply_id, data)) => {
            debug!("Request {:?} on {}", reply_id, topic);
            Some((reply_id, job_for(incoming, data)))
        }
        None => {
            warn!("Dropping malformed request on {}", topic);
            None
        }
    }
}

/// Serves requests arriving over MQTT
pub struct MqttListener {
    config: MqttConfig,
    context: Arc<Context>,
    router: Router,
    timings: ReplyTimings,
}

impl MqttListener {
    pub fn new(config: MqttConfig, context: Arc<Context>, router: Router) -> Self {
        Self {
            config,
            context,
            router,
            timings: ReplyTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: ReplyTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Serve until shutdown.
    ///
    /// A rejected subscription is fatal. On shutdown the listener keeps the
    /// connection up until the final advertizement is out and every reply
    /// worker has finished.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (client, mut eventloop) =
            AsyncClient::new(self.config.options("listener", true), 100);
        let topics = Topics::new(self.context.controller_id.as_str());
        let replies = Arc::new(ReplyRegistry::new());
        let publisher = Arc::new(client.clone());

        let service = ReplyService::new(
            self.router.clone(),
            replies.clone(),
            publisher.clone(),
            topics.clone(),
            self.timings,
        );

        let (ready_tx, ready_rx) = watch::channel(false);
        let announcer = Announcer::new(
            self.context.clone(),
            self.router.clone(),
            replies,
            publisher,
            topics.clone(),
        );
        let mut announcer = tokio::spawn(announcer.run(ready_rx, shutdown.clone()));
        let mut announcer_done = false;

        let mut workers: JoinSet<()> = JoinSet::new();
        let mut tracker = SubscriptionTracker::default();
        let mut shutting_down = false;

        info!(
            "MQTT listener connecting to {}:{}",
            self.config.host, self.config.port
        );

        loop {
            if shutting_down && announcer_done && workers.is_empty() {
                break;
            }

            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected, subscribing");
                        let filters = topics.subscriptions();
                        tracker.start(filters.len());
                        for filter in filters {
                            client.try_subscribe(filter, QoS::AtMostOnce)?;
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => tracker.sent(pkid),
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        if tracker.acked(&ack)? {
                            debug!("All subscriptions acknowledged");
                            let _ = ready_tx.send(true);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Some((reply_id, job)) = incoming_request(
                            &topics,
                            &publish.topic,
                            &publish.payload,
                            !shutting_down,
                        ) {
                            service.spawn(&mut workers, reply_id, job);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if shutting_down {
                            warn!("MQTT connection lost during shutdown: {}", e);
                            break;
                        }
                        error!("MQTT error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                Some(finished) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = finished {
                        error!("Reply worker failed: {}", e);
                    }
                }
                _ = &mut announcer, if !announcer_done => {
                    announcer_done = true;
                }
                _ = shutdown.changed(), if !shutting_down => {
                    info!("MQTT listener shutting down");
                    shutting_down = true;
                    for filter in topics.subscriptions() {
                        if let Err(e) = client.try_unsubscribe(filter) {
                            debug!("Unsubscribe failed: {}", e);
                        }
                    }
                }
            }
        }

        workers.shutdown().await;
        if let Err(e) = client.disconnect().await {
            debug!("MQTT disconnect: {}", e);
        }
        // flush the disconnect
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        Ok(())
    }
}
