//! MQTT topic layout
//!
//! Every topic lives under `foris-controller/<controller_id>/`.

use foris_core::NAMESPACE;

/// Builds and parses the topics of one controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

/// A topic the listener subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingTopic {
    List,
    JsonSchemas,
    WorkingReplies,
    ModuleActions(String),
    Action { module: String, action: String },
}

impl Topics {
    pub fn new(controller_id: &str) -> Self {
        Self {
            prefix: format!("{}/{}/", NAMESPACE, controller_id),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Subscription filters, in subscription order
    pub fn subscriptions(&self) -> Vec<String> {
        ["list", "jsonschemas", "working_replies", "request/+/list", "request/+/action/+"]
            .iter()
            .map(|suffix| format!("{}{}", self.prefix, suffix))
            .collect()
    }

    pub fn reply(&self, reply_id: &str) -> String {
        format!("{}reply/{}", self.prefix, reply_id)
    }

    pub fn request(&self, module: &str, action: &str) -> String {
        format!("{}request/{}/action/{}", self.prefix, module, action)
    }

    pub fn notification(&self, module: &str, action: &str) -> String {
        format!("{}notification/{}/action/{}", self.prefix, module, action)
    }

    /// Classify a topic received on one of our subscriptions
    pub fn parse(&self, topic: &str) -> Option<IncomingTopic> {
        let rest = topic.strip_prefix(&self.prefix)?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            ["list"] => Some(IncomingTopic::List),
            ["jsonschemas"] => Some(IncomingTopic::JsonSchemas),
            ["working_replies"] => Some(IncomingTopic::WorkingReplies),
            ["request", module, "list"] if !module.is_empty() => {
                Some(IncomingTopic::ModuleActions(module.to_string()))
            }
            ["request", module, "action", action] if !module.is_empty() && !action.is_empty() => {
                Some(IncomingTopic::Action {
                    module: module.to_string(),
                    action: action.to_string(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_builders() {
        let topics = Topics::new("0000000A00000B00");
        assert_eq!(
            topics.reply("abc123"),
            "foris-controller/0000000A00000B00/reply/abc123"
        );
        assert_eq!(
            topics.notification("remote", "advertize"),
            "foris-controller/0000000A00000B00/notification/remote/action/advertize"
        );
        assert_eq!(topics.subscriptions().len(), 5);
        assert_eq!(
            topics.subscriptions()[4],
            "foris-controller/0000000A00000B00/request/+/action/+"
        );
    }

    #[test]
    fn test_parse() {
        let topics = Topics::new("0000000A00000B00");
        let p = |s: &str| topics.parse(&format!("foris-controller/0000000A00000B00/{}", s));

        assert_eq!(p("list"), Some(IncomingTopic::List));
        assert_eq!(p("jsonschemas"), Some(IncomingTopic::JsonSchemas));
        assert_eq!(p("working_replies"), Some(IncomingTopic::WorkingReplies));
        assert_eq!(
            p("request/lan/list"),
            Some(IncomingTopic::ModuleActions("lan".into()))
        );
        assert_eq!(
            p("request/lan/action/get_settings"),
            Some(IncomingTopic::Action {
                module: "lan".into(),
                action: "get_settings".into()
            })
        );
        assert_eq!(p("reply/abc"), None);
        assert_eq!(topics.parse("foris-controller/OTHER/list"), None);
    }
}
