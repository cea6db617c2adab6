//! Operator commands, accepted in private or channel messages from the
//! nicknames listed as admins.

use itertools::Itertools;
use sable_bot::{
    utils::now, DeferredTasks, Event, EventType, MessageSender, Plugin, PluginContext,
    PluginError, PluginResult, PluginSnapshot, Resumption,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

pub const NAME: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    /// Prefix marking a message as a command
    pub prefix: String,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AdminCommand {
    Quit(Option<String>),
    Reconnect,
    Save,
    Reload(Option<String>),
    Plugins,
    Say { target: String, text: String },
    Raw(String),
    Remind { delay: i64, text: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
enum CommandError {
    #[error("Unknown command {0}")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Not a number of seconds: {0}")]
    BadDelay(String),
    #[error("Delay of {0} seconds is too long")]
    DelayTooLong(i64),
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

impl AdminCommand {
    /// Parse the text following the command prefix
    fn parse(text: &str) -> Result<Self, CommandError> {
        let (name, rest) = text.trim().split_once(' ').unwrap_or((text.trim(), ""));

        Ok(match name.to_ascii_lowercase().as_str() {
            "quit" => Self::Quit(non_empty(rest)),
            "reconnect" => Self::Reconnect,
            "save" => Self::Save,
            "reload" => Self::Reload(non_empty(rest)),
            "plugins" => Self::Plugins,
            "say" => {
                let (target, text) = rest
                    .trim()
                    .split_once(' ')
                    .ok_or(CommandError::Usage("say <target> <text>"))?;
                Self::Say {
                    target: target.to_string(),
                    text: text.trim().to_string(),
                }
            }
            "raw" => Self::Raw(non_empty(rest).ok_or(CommandError::Usage("raw <line>"))?),
            "remind" => {
                let (delay, text) = rest
                    .trim()
                    .split_once(' ')
                    .ok_or(CommandError::Usage("remind <seconds> <text>"))?;
                let delay = delay
                    .parse::<i64>()
                    .ok()
                    .filter(|d| *d >= 0)
                    .ok_or_else(|| CommandError::BadDelay(delay.to_string()))?;
                Self::Remind {
                    delay,
                    text: text.trim().to_string(),
                }
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        })
    }
}

fn describe(snapshot: &[PluginSnapshot]) -> String {
    snapshot
        .iter()
        .map(|p| {
            if p.awaited_events.is_empty() {
                format!("{} ({} timers)", p.name, p.timed_tasks)
            } else {
                format!(
                    "{} ({} timers, awaiting {})",
                    p.name,
                    p.timed_tasks,
                    p.awaited_events.iter().map(|e| format!("{:?}", e)).join("/")
                )
            }
        })
        .join(", ")
}

pub struct AdminPlugin {
    sender: MessageSender,
    admins: Vec<String>,
    settings: AdminSettings,
    /// Where to send each outstanding `plugins` answer, oldest first
    pending_snapshots: VecDeque<String>,
    tasks: DeferredTasks,
}

impl AdminPlugin {
    pub fn new(ctx: PluginContext) -> Result<Self, PluginError> {
        Ok(Self {
            settings: ctx.settings()?,
            admins: ctx.identity.admins,
            sender: ctx.sender,
            pending_snapshots: VecDeque::new(),
            tasks: DeferredTasks::new(),
        })
    }

    fn is_admin(&self, nick: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(nick))
    }

    fn execute(
        &mut self,
        command: AdminCommand,
        nick: &str,
        reply_to: &str,
    ) -> Result<(), CommandError> {
        tracing::info!(?command, "Admin command from {}", nick);

        match command {
            AdminCommand::Quit(reason) => self.sender.quit(reason),
            AdminCommand::Reconnect => self.sender.reconnect(None),
            AdminCommand::Save => self.sender.save(),
            AdminCommand::Reload(plugin) => self.sender.reload(plugin),
            AdminCommand::Plugins => {
                self.pending_snapshots.push_back(reply_to.to_string());
                self.sender.peek_plugins(NAME);
            }
            AdminCommand::Say { target, text } => self.sender.privmsg(&target, &text),
            AdminCommand::Raw(line) => self.sender.raw(line),
            AdminCommand::Remind { delay, text } => {
                let at = now()
                    .checked_add(delay)
                    .ok_or(CommandError::DelayTooLong(delay))?;
                let sender = self.sender.clone();
                let target = reply_to.to_string();
                let text = format!("{}: {}", nick, text);

                self.tasks.schedule_at(at, move |_| {
                    sender.privmsg(&target, &text);
                    Ok(Resumption::Completed)
                });
            }
        }
        Ok(())
    }
}

impl Plugin for AdminPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn deferred(&self) -> &DeferredTasks {
        &self.tasks
    }

    fn deferred_mut(&mut self) -> &mut DeferredTasks {
        &mut self.tasks
    }

    fn on_event(&mut self, event: &Event) -> PluginResult {
        if event.event_type != EventType::Privmsg {
            return Ok(());
        }
        let Some(text) = event.content.strip_prefix(self.settings.prefix.as_str()) else {
            return Ok(());
        };
        let (Some(nick), Some(reply_to)) = (event.sender_nick(), event.reply_target()) else {
            return Ok(());
        };

        if !self.is_admin(nick) {
            tracing::debug!("Ignoring command from non-admin {}", nick);
            return Ok(());
        }

        let result =
            AdminCommand::parse(text).and_then(|command| self.execute(command, nick, reply_to));
        if let Err(e) = result {
            self.sender.notice(nick, &e.to_string());
        }
        Ok(())
    }

    fn on_plugin_snapshot(&mut self, snapshot: &[PluginSnapshot]) -> PluginResult {
        let target = self
            .pending_snapshots
            .pop_front()
            .ok_or("Plugin snapshot arrived with no pending request")?;
        self.sender
            .privmsg(&target, &format!("Plugins: {}", describe(snapshot)));
        Ok(())
    }

    fn serialise_settings(&self) -> Option<serde_json::Value> {
        serde_json::to_value(&self.settings).ok()
    }
}
