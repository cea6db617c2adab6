use serde::{Deserialize, Serialize};
use strum::EnumString;

/// The kind of an [`Event`]. Plugins dispatch on this, and event-scheduled
/// continuations are filed under it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum EventType {
    Ping,
    Pong,
    Privmsg,
    Notice,
    Join,
    Part,
    Quit,
    Nick,
    Kick,
    Mode,
    Topic,
    Invite,
    Error,
    Cap,
    Account,
    Away,
    Tagmsg,
    /// 001
    #[strum(disabled)]
    Welcome,
    /// 376
    #[strum(disabled)]
    EndOfMotd,
    /// 422
    #[strum(disabled)]
    NoMotd,
    /// 432
    #[strum(disabled)]
    ErroneousNickname,
    /// 433
    #[strum(disabled)]
    NicknameInUse,
    /// Any other numeric; the number is in [`Event::num`]
    #[strum(disabled)]
    Numeric,
    #[strum(disabled)]
    Unknown,
}

impl EventType {
    /// Map a three-digit numeric reply onto its event type
    pub fn from_numeric(num: u16) -> Self {
        match num {
            1 => Self::Welcome,
            376 => Self::EndOfMotd,
            422 => Self::NoMotd,
            432 => Self::ErroneousNickname,
            433 => Self::NicknameInUse,
            _ => Self::Numeric,
        }
    }

    /// Map a command word onto its event type; unrecognised commands are [`EventType::Unknown`]
    pub fn from_command(command: &str) -> Self {
        command
            .to_ascii_uppercase()
            .parse()
            .unwrap_or(Self::Unknown)
    }
}

/// The origin of an event, from the `nick!user@host` prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub nickname: String,
    pub ident: Option<String>,
    pub address: Option<String>,
}

impl Sender {
    pub fn nick(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ident: None,
            address: None,
        }
    }
}

/// A message tag attached to an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: Option<String>,
}

/// One parsed line from the server.
///
/// Created per received line, handed by reference to every plugin, then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    /// The line as received
    pub raw: String,
    pub tags: Vec<Tag>,
    pub sender: Option<Sender>,
    /// Direct recipient, when not addressed to a channel
    pub target: Option<String>,
    pub channel: Option<String>,
    /// Free text, usually the trailing argument
    pub content: String,
    /// Arguments not otherwise accounted for
    pub aux: Vec<String>,
    /// Numeric reply code, or zero
    pub num: u16,
    /// Receive time, seconds since the epoch
    pub time: i64,
}

impl Event {
    pub fn new(event_type: EventType, raw: impl Into<String>) -> Self {
        Self {
            event_type,
            raw: raw.into(),
            tags: Vec::new(),
            sender: None,
            target: None,
            channel: None,
            content: String::new(),
            aux: Vec::new(),
            num: 0,
            time: crate::utils::now(),
        }
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn sender_nick(&self) -> Option<&str> {
        self.sender.as_ref().map(|s| s.nickname.as_str())
    }

    /// Where a reply to this event should be sent: the channel if there is one,
    /// otherwise the sender.
    pub fn reply_target(&self) -> Option<&str> {
        self.channel.as_deref().or_else(|| self.sender_nick())
    }

    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lookup() {
        assert_eq!(EventType::from_command("PRIVMSG"), EventType::Privmsg);
        assert_eq!(EventType::from_command("privmsg"), EventType::Privmsg);
        assert_eq!(EventType::from_command("WALLOPS"), EventType::Unknown);
        assert_eq!(EventType::from_command("WELCOME"), EventType::Unknown);
    }

    #[test]
    fn numeric_lookup() {
        assert_eq!(EventType::from_numeric(1), EventType::Welcome);
        assert_eq!(EventType::from_numeric(433), EventType::NicknameInUse);
        assert_eq!(EventType::from_numeric(353), EventType::Numeric);
    }

    #[test]
    fn reply_target_prefers_channel() {
        let ev = Event::new(EventType::Privmsg, "")
            .with_sender(Sender::nick("alice"))
            .with_channel("#sable");
        assert_eq!(ev.reply_target(), Some("#sable"));

        let ev = Event::new(EventType::Privmsg, "").with_sender(Sender::nick("alice"));
        assert_eq!(ev.reply_target(), Some("alice"));
    }
}
