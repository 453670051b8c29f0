//! Periodic `remote/advertize` notifications

use foris_core::{Backend, Context, Message};
use foris_router::{EntryPointAnnouncer, Router};
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::registry::ReplyRegistry;
use super::reply::ReplyPublisher;
use super::topics::Topics;

pub const ADVERTIZE_MODULE: &str = "remote";
pub const ADVERTIZE_ACTION: &str = "advertize";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetbootState {
    Unknown,
    No,
    Ready,
    Booting,
}

impl NetbootState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetbootState::Unknown => "unknown",
            NetbootState::No => "no",
            NetbootState::Ready => "ready",
            NetbootState::Booting => "booting",
        }
    }

    fn parse(output: &str) -> Self {
        match output.trim() {
            "no" => NetbootState::No,
            "ready" => NetbootState::Ready,
            "booting" => NetbootState::Booting,
            _ => NetbootState::Unknown,
        }
    }

    /// `no` and `ready` never change during the daemon's life
    pub fn is_final(&self) -> bool {
        matches!(self, NetbootState::No | NetbootState::Ready)
    }
}

/// Reports the netboot state of the device
#[derive(Debug)]
pub struct NetbootProbe {
    backend: Backend,
    cached: Option<NetbootState>,
}

impl NetbootProbe {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            cached: None,
        }
    }

    pub async fn probe(&mut self) -> NetbootState {
        if let Some(state) = self.cached {
            return state;
        }

        let state = match self.backend {
            Backend::Mock => NetbootState::No,
            Backend::Openwrt => match Command::new("netboot-manager").arg("status").output().await {
                Ok(output) if output.status.success() => {
                    NetbootState::parse(&String::from_utf8_lossy(&output.stdout))
                }
                Ok(output) => {
                    debug!("netboot-manager exited with {}", output.status);
                    NetbootState::Unknown
                }
                Err(e) => {
                    debug!("netboot-manager not available: {}", e);
                    NetbootState::Unknown
                }
            },
        };

        if state.is_final() {
            self.cached = Some(state);
        }
        state
    }
}

/// Publishes the daemon's advertizement and drives entry-point announcers
pub struct Announcer {
    context: Arc<Context>,
    router: Router,
    replies: Arc<ReplyRegistry>,
    publisher: Arc<dyn ReplyPublisher>,
    topics: Topics,
    netboot: NetbootProbe,
    entry_points: Vec<Arc<dyn EntryPointAnnouncer>>,
    cached: Option<(String, Value)>,
}

impl Announcer {
    pub fn new(
        context: Arc<Context>,
        router: Router,
        replies: Arc<ReplyRegistry>,
        publisher: Arc<dyn ReplyPublisher>,
        topics: Topics,
    ) -> Self {
        let entry_points = router.registry().announcers();
        Self {
            netboot: NetbootProbe::new(context.backend),
            context,
            router,
            replies,
            publisher,
            topics,
            entry_points,
            cached: None,
        }
    }

    fn hostname_and_modules(&mut self) -> (String, Value) {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let modules: Vec<Value> = self
            .router
            .registry()
            .list_modules(None)
            .into_iter()
            .map(|(name, m)| json!({"name": name, "version": m.version}))
            .collect();
        let pair = (hostname, Value::Array(modules));

        if !self.context.disable_adv_cache {
            self.cached = Some(pair.clone());
        }
        pair
    }

    /// Build the advertizement for `state`
    pub async fn advertizement(&mut self, state: &str) -> Message {
        let (hostname, modules) = self.hostname_and_modules();
        let netboot = self.netboot.probe().await;
        Message::notification(
            ADVERTIZE_MODULE,
            ADVERTIZE_ACTION,
            Some(json!({
                "state": state,
                "id": self.context.controller_id.as_str(),
                "hostname": hostname,
                "netboot": netboot.as_str(),
                "modules": modules,
                "working_replies": self.replies.snapshot(),
            })),
        )
    }

    async fn publish(&self, message: &Message) {
        let topic = self.topics.notification(&message.module, &message.action);
        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize {}: {}", topic, e);
                return;
            }
        };
        if let Err(e) = self.publisher.publish(&topic, payload, false).await {
            warn!("Failed to publish {}: {}", topic, e);
        }
    }

    async fn advertize(&mut self, state: &str) {
        let message = self.advertizement(state).await;
        self.publish(&message).await;
    }

    async fn run_entry_points(&self, tick: u64) {
        let due = self
            .entry_points
            .iter()
            .filter(|entry_point| tick % u64::from(entry_point.period_multiplier().max(1)) == 0)
            .map(|entry_point| entry_point.announce());

        // announced concurrently, published in registration order
        for message in join_all(due).await.into_iter().flatten() {
            self.publish(&message).await;
        }
    }

    /// Wait for `ready`, then advertize until shutdown
    pub async fn run(mut self, mut ready: watch::Receiver<bool>, mut shutdown: watch::Receiver<bool>) {
        while !*ready.borrow_and_update() {
            tokio::select! {
                changed = ready.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Shutdown before subscriptions were ready");
                    self.advertize("exited").await;
                    return;
                }
            }
        }

        info!("Subscriptions ready, announcing");
        self.advertize("started").await;

        let period = self.context.announcer_period;
        if period.is_zero() {
            let _ = shutdown.changed().await;
        } else {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        tick += 1;
                        self.advertize("running").await;
                        self.run_entry_points(tick).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }

        self.advertize("exited").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netboot_parse() {
        assert_eq!(NetbootState::parse("ready\n"), NetbootState::Ready);
        assert_eq!(NetbootState::parse("booting"), NetbootState::Booting);
        assert_eq!(NetbootState::parse("garbage"), NetbootState::Unknown);
        assert!(NetbootState::No.is_final());
        assert!(!NetbootState::Booting.is_final());
    }

    #[tokio::test]
    async fn test_mock_netboot() {
        let mut probe = NetbootProbe::new(Backend::Mock);
        assert_eq!(probe.probe().await, NetbootState::No);
        assert_eq!(probe.cached, Some(NetbootState::No));
    }
}
