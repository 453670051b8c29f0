//! MQTT transport
//!
//! The listener serves requests published under
//! `foris-controller/<controller_id>/request/...` and answers with retained
//! replies. Notifications and advertizements go to
//! `foris-controller/<controller_id>/notification/<module>/action/<action>`.

pub mod announcer;
pub mod listener;
pub mod registry;
pub mod reply;
pub mod sender;
pub mod topics;

pub use announcer::{Announcer, NetbootProbe, NetbootState};
pub use listener::MqttListener;
pub use registry::ReplyRegistry;
pub use reply::{ReplyJob, ReplyLifecycle, ReplyPublisher, ReplyService, ReplyState, ReplyTimings};
pub use sender::{MqttNotificationSender, MqttRequestSender};
pub use topics::{IncomingTopic, Topics};

use foris_core::MqttCredentials;
use rumqttc::MqttOptions;
use std::time::Duration;

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<MqttCredentials>,
    pub keep_alive: Duration,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            keep_alive: Duration::from_secs(30),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<MqttCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub(crate) fn options(&self, role: &str, clean_session: bool) -> MqttOptions {
        let client_id = format!(
            "{}-{}-{}",
            foris_core::NAMESPACE,
            role,
            uuid::Uuid::new_v4().simple()
        );
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(clean_session);
        if let Some(credentials) = &self.credentials {
            options.set_credentials(&credentials.username, &credentials.password);
        }
        options
    }
}
