use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ============================================================================
// Channel Models
// ============================================================================

/// Channel an inbound command or outbound notification travels through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageChannel {
    Web,
    Api,
    Console,
    Telegram,
    Wechat,
    Slack,
    Discord,
    Plugin,
}

impl std::fmt::Display for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageChannel::Web => "web",
            MessageChannel::Api => "api",
            MessageChannel::Console => "console",
            MessageChannel::Telegram => "telegram",
            MessageChannel::Wechat => "wechat",
            MessageChannel::Slack => "slack",
            MessageChannel::Discord => "discord",
            MessageChannel::Plugin => "plugin",
        };
        f.write_str(name)
    }
}

/// Who issued a command and where it came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOrigin {
    pub channel: Option<MessageChannel>,
    pub source: Option<String>,
    pub userid: Option<String>,
}

impl CommandOrigin {
    /// Origin for system or event triggered execution (no acting user)
    pub fn system() -> Self {
        Self::default()
    }

    pub fn user(
        channel: MessageChannel,
        source: impl Into<String>,
        userid: impl Into<String>,
    ) -> Self {
        Self {
            channel: Some(channel),
            source: Some(source.into()),
            userid: Some(userid.into()),
        }
    }

    /// Acting user, treating an empty id as absent
    pub fn acting_user(&self) -> Option<&str> {
        self.userid.as_deref().filter(|user| !user.is_empty())
    }
}

// ============================================================================
// Notification Models
// ============================================================================

/// Channel-agnostic notification posted to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<MessageChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            channel: None,
            source: None,
            title: title.into(),
            text: None,
            userid: None,
            link: None,
        }
    }

    /// Address the notification back to the origin of a command
    pub fn reply_to(origin: &CommandOrigin, title: impl Into<String>) -> Self {
        Self {
            channel: origin.channel,
            source: origin.source.clone(),
            userid: origin.acting_user().map(str::to_string),
            ..Self::new(title)
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload of a `command.execute` event: `cmd` is `"<key> <free text args>"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub cmd: String,
    /// Unrecognized channel names deserialize to `None`
    #[serde(default, deserialize_with = "lenient_channel")]
    pub channel: Option<MessageChannel>,
    #[serde(default)]
    pub source: Option<String>,
    /// IM frontends send numeric user ids; numbers are kept as their decimal text
    #[serde(default, deserialize_with = "string_or_number")]
    pub user: Option<String>,
}

fn lenient_channel<'de, D>(deserializer: D) -> Result<Option<MessageChannel>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| serde_json::from_value(value).ok()))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(user)) => Ok(Some(user)),
        Some(Value::Number(user)) => Ok(Some(user.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "user must be a string or a number, got {}",
            other
        ))),
    }
}

impl ExecutionEvent {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            channel: None,
            source: None,
            user: None,
        }
    }

    pub fn from_origin(cmd: impl Into<String>, origin: &CommandOrigin) -> Self {
        Self {
            cmd: cmd.into(),
            channel: origin.channel,
            source: origin.source.clone(),
            user: origin.userid.clone(),
        }
    }

    pub fn origin(&self) -> CommandOrigin {
        CommandOrigin {
            channel: self.channel,
            source: self.source.clone(),
            userid: self.user.clone(),
        }
    }

    /// Split `cmd` into the command key and its argument string.
    ///
    /// Returns `None` for a blank command.
    pub fn split(&self) -> Option<(&str, String)> {
        let mut words = self.cmd.split_whitespace();
        let key = words.next()?;
        let args = words.collect::<Vec<_>>().join(" ");
        Some((key, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_event_split() {
        let event = ExecutionEvent::new("/foo bar baz");
        let (key, args) = event.split().unwrap();
        assert_eq!(key, "/foo");
        assert_eq!(args, "bar baz");
    }

    #[test]
    fn test_execution_event_split_without_args() {
        let event = ExecutionEvent::new("  /version  ");
        let (key, args) = event.split().unwrap();
        assert_eq!(key, "/version");
        assert_eq!(args, "");
    }

    #[test]
    fn test_execution_event_split_blank() {
        assert!(ExecutionEvent::new("   ").split().is_none());
    }

    #[test]
    fn test_execution_event_deserialization() {
        let event: ExecutionEvent = serde_json::from_value(serde_json::json!({
            "cmd": "/sites",
            "channel": "telegram",
            "user": "42"
        }))
        .unwrap();
        assert_eq!(event.channel, Some(MessageChannel::Telegram));
        assert_eq!(event.origin().acting_user(), Some("42"));
        assert_eq!(event.source, None);
    }

    #[test]
    fn test_execution_event_accepts_numeric_user() {
        let event: ExecutionEvent = serde_json::from_value(serde_json::json!({
            "cmd": "/foo bar",
            "user": 12345
        }))
        .unwrap();
        assert_eq!(event.user.as_deref(), Some("12345"));
    }

    #[test]
    fn test_execution_event_unknown_channel_is_none() {
        let event: ExecutionEvent = serde_json::from_value(serde_json::json!({
            "cmd": "/foo",
            "channel": "qq",
            "user": "u"
        }))
        .unwrap();
        assert_eq!(event.channel, None);
        assert_eq!(event.user.as_deref(), Some("u"));
    }

    #[test]
    fn test_execution_event_rejects_structured_user() {
        let result = serde_json::from_value::<ExecutionEvent>(serde_json::json!({
            "cmd": "/foo",
            "user": {"id": 1}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_userid_is_not_an_acting_user() {
        let origin = CommandOrigin {
            userid: Some(String::new()),
            ..CommandOrigin::default()
        };
        assert_eq!(origin.acting_user(), None);
    }

    #[test]
    fn test_notification_reply_to_origin() {
        let origin = CommandOrigin::user(MessageChannel::Slack, "ops", "u1");
        let notification = Notification::reply_to(&origin, "done").with_text("all good");
        assert_eq!(notification.channel, Some(MessageChannel::Slack));
        assert_eq!(notification.source.as_deref(), Some("ops"));
        assert_eq!(notification.userid.as_deref(), Some("u1"));
        assert_eq!(notification.text.as_deref(), Some("all good"));
    }
}
