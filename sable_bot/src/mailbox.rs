//! The control mailbox between plugins and the main loop.
//!
//! Any number of [`MessageSender`] clones may enqueue from any task or thread;
//! the single [`MailboxReceiver`] is owned by whoever drives the main loop.

use crate::{BusPayload, ControlMessage, OutputLevel};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Create a connected sender/receiver pair
pub fn mailbox() -> (MessageSender, MailboxReceiver) {
    let (send, recv) = unbounded_channel();
    (MessageSender { inner: send }, MailboxReceiver { inner: recv })
}

/// Plugin-facing handle for sending [`ControlMessage`]s to the main loop
#[derive(Debug, Clone)]
pub struct MessageSender {
    inner: UnboundedSender<ControlMessage>,
}

impl MessageSender {
    /// Enqueue a message. Fails only once the receiver has been dropped, which
    /// means the bot is shutting down; that is logged and otherwise ignored.
    pub fn send(&self, message: ControlMessage) {
        if let Err(e) = self.inner.send(message) {
            tracing::debug!(kind = e.0.kind(), "Mailbox closed; dropping control message");
        }
    }

    pub fn send_line(&self, line: impl Into<String>) {
        self.send(ControlMessage::SendLine(line.into()));
    }

    pub fn quiet_line(&self, line: impl Into<String>) {
        self.send(ControlMessage::QuietLine(line.into()));
    }

    pub fn immediate_line(&self, line: impl Into<String>) {
        self.send(ControlMessage::ImmediateLine(line.into()));
    }

    pub fn pong(&self, token: impl Into<String>) {
        self.send(ControlMessage::Pong(token.into()));
    }

    pub fn quit(&self, reason: Option<String>) {
        self.send(ControlMessage::Quit(reason));
    }

    pub fn reconnect(&self, reason: Option<String>) {
        self.send(ControlMessage::Reconnect(reason));
    }

    pub fn save(&self) {
        self.send(ControlMessage::Save);
    }

    pub fn reload(&self, plugin: Option<String>) {
        self.send(ControlMessage::Reload(plugin));
    }

    pub fn peek_plugins(&self, requester: impl Into<String>) {
        self.send(ControlMessage::PeekPlugins {
            requester: requester.into(),
        });
    }

    pub fn bus_message<T>(&self, header: impl Into<String>, payload: T)
    where
        T: std::any::Any + Send + Sync,
    {
        let payload: BusPayload = Arc::new(payload);
        self.send(ControlMessage::BusMessage {
            header: header.into(),
            payload,
        });
    }

    pub fn output(&self, level: OutputLevel, line: impl Into<String>) {
        self.send(ControlMessage::Output {
            level,
            line: line.into(),
        });
    }

    pub fn privmsg(&self, target: &str, text: &str) {
        self.send_line(format!("PRIVMSG {} :{}", target, text));
    }

    pub fn notice(&self, target: &str, text: &str) {
        self.send_line(format!("NOTICE {} :{}", target, text));
    }

    pub fn join(&self, channel: &str) {
        self.send_line(format!("JOIN {}", channel));
    }

    pub fn part(&self, channel: &str, reason: Option<&str>) {
        match reason {
            Some(reason) => self.send_line(format!("PART {} :{}", channel, reason)),
            None => self.send_line(format!("PART {}", channel)),
        }
    }

    /// Send a line exactly as given, through the throttle
    pub fn raw(&self, line: impl Into<String>) {
        self.send_line(line);
    }
}

/// The consuming end of the mailbox
#[derive(Debug)]
pub struct MailboxReceiver {
    inner: UnboundedReceiver<ControlMessage>,
}

impl MailboxReceiver {
    /// Take the next message if one is immediately available
    pub fn try_recv(&mut self) -> Option<ControlMessage> {
        self.inner.try_recv().ok()
    }

    /// Throw away everything currently queued, returning how many messages were dropped
    pub fn discard_pending(&mut self) -> usize {
        let mut count = 0;
        while self.inner.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}
