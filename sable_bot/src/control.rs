use crate::EventType;
use serde::{Deserialize, Serialize};
use std::{any::Any, sync::Arc};

/// Opaque payload carried by a [`ControlMessage::BusMessage`]. Only the
/// plugins exchanging it need to know the concrete type.
pub type BusPayload = Arc<dyn Any + Send + Sync>;

/// Severity of a line a plugin asks the core to print on its behalf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

/// Read-only summary of one plugin, delivered in answer to
/// [`ControlMessage::PeekPlugins`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSnapshot {
    pub name: String,
    /// Number of pending time-scheduled continuations
    pub timed_tasks: usize,
    /// Event types with at least one continuation waiting on them
    pub awaited_events: Vec<EventType>,
}

/// A request from a plugin to the main loop.
///
/// Consumed exactly once, in the order sent, by the main loop's drain pass.
#[derive(Clone)]
pub enum ControlMessage {
    /// Send a line through the throttle, logging it
    SendLine(String),
    /// Send a line through the throttle without logging it
    QuietLine(String),
    /// Send a line immediately, bypassing the throttle
    ImmediateLine(String),
    /// Answer a server PING; sent as an immediate line
    Pong(String),
    /// Disconnect with an optional reason and shut down
    Quit(Option<String>),
    /// Disconnect with an optional reason and connect again
    Reconnect(Option<String>),
    /// Persist configuration and plugin settings
    Save,
    /// Ask one plugin, or all of them, to reload their resources
    Reload(Option<String>),
    /// Deliver a [`PluginSnapshot`] list to the named plugin
    PeekPlugins { requester: String },
    /// Forward an opaque payload to every plugin
    BusMessage { header: String, payload: BusPayload },
    /// Print a line through the core's log output
    Output { level: OutputLevel, line: String },
}

impl ControlMessage {
    /// Name of the variant, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendLine(_) => "SendLine",
            Self::QuietLine(_) => "QuietLine",
            Self::ImmediateLine(_) => "ImmediateLine",
            Self::Pong(_) => "Pong",
            Self::Quit(_) => "Quit",
            Self::Reconnect(_) => "Reconnect",
            Self::Save => "Save",
            Self::Reload(_) => "Reload",
            Self::PeekPlugins { .. } => "PeekPlugins",
            Self::BusMessage { .. } => "BusMessage",
            Self::Output { .. } => "Output",
        }
    }
}

impl std::fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendLine(line) | Self::ImmediateLine(line) | Self::Pong(line) => {
                f.debug_tuple(self.kind()).field(line).finish()
            }
            Self::QuietLine(_) => f.debug_tuple(self.kind()).field(&"<quiet>").finish(),
            Self::Quit(reason) | Self::Reconnect(reason) => {
                f.debug_tuple(self.kind()).field(reason).finish()
            }
            Self::Save => f.write_str("Save"),
            Self::Reload(plugin) => f.debug_tuple(self.kind()).field(plugin).finish(),
            Self::PeekPlugins { requester } => f
                .debug_struct(self.kind())
                .field("requester", requester)
                .finish(),
            Self::BusMessage { header, .. } => f
                .debug_struct(self.kind())
                .field("header", header)
                .finish_non_exhaustive(),
            Self::Output { level, line } => f
                .debug_struct(self.kind())
                .field("level", level)
                .field("line", line)
                .finish(),
        }
    }
}
