//! Registration and connection upkeep.
//!
//! Registers on connect, answers server pings, picks another nickname if ours
//! is taken, joins the configured channels once the server welcomes us, and
//! pings the server periodically so a dead link is noticed.

use sable_bot::{
    config::IdentityConfig, utils::now, DeferredTasks, Event, EventType, MessageSender, Plugin,
    PluginContext, PluginError, PluginResult, Resumption,
};
use serde::{Deserialize, Serialize};

pub const NAME: &str = "connect";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectSettings {
    /// Seconds between keepalive pings; zero disables them
    pub keepalive_secs: i64,
    /// Appended to the nickname each time the server rejects it
    pub nick_suffix: String,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            keepalive_secs: 120,
            nick_suffix: "_".to_string(),
        }
    }
}

pub struct ConnectPlugin {
    sender: MessageSender,
    identity: IdentityConfig,
    settings: ConnectSettings,
    nickname: String,
    tasks: DeferredTasks,
}

impl ConnectPlugin {
    pub fn new(ctx: PluginContext) -> Result<Self, PluginError> {
        let settings = ctx.settings()?;
        Ok(Self {
            nickname: ctx.identity.nickname.clone(),
            sender: ctx.sender,
            identity: ctx.identity,
            settings,
            tasks: DeferredTasks::new(),
        })
    }

    /// The nickname most recently requested from the server
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    fn schedule_join(&mut self) {
        let sender = self.sender.clone();
        let channels = self.identity.channels.clone();

        self.tasks.schedule_on(EventType::Welcome, move |_| {
            for channel in &channels {
                sender.join(channel);
            }
            Ok(Resumption::Completed)
        });
    }

    fn schedule_keepalive(&mut self) {
        let interval = self.settings.keepalive_secs;
        if interval <= 0 {
            return;
        }

        let sender = self.sender.clone();
        let token = self.identity.nickname.clone();

        self.tasks.schedule_at(now() + interval, move |_| {
            sender.quiet_line(format!("PING :{}", token));
            Ok(Resumption::RescheduleAt(now() + interval))
        });
    }
}

impl Plugin for ConnectPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn deferred(&self) -> &DeferredTasks {
        &self.tasks
    }

    fn deferred_mut(&mut self) -> &mut DeferredTasks {
        &mut self.tasks
    }

    fn start(&mut self) -> PluginResult {
        self.sender.send_line(format!("NICK {}", self.nickname));
        self.sender.send_line(format!(
            "USER {} 0 * :{}",
            self.identity.user, self.identity.realname
        ));

        self.schedule_join();
        self.schedule_keepalive();
        Ok(())
    }

    fn on_event(&mut self, event: &Event) -> PluginResult {
        match event.event_type {
            EventType::Ping => self.sender.pong(event.content.as_str()),
            EventType::NicknameInUse | EventType::ErroneousNickname => {
                tracing::warn!("Nickname {} rejected: {}", self.nickname, event.content);
                self.nickname.push_str(&self.settings.nick_suffix);
                self.sender.send_line(format!("NICK {}", self.nickname));
            }
            EventType::Welcome => {
                if let Some(nick) = &event.target {
                    tracing::info!("Registered as {}", nick);
                    self.nickname = nick.clone();
                }
            }
            EventType::Error => {
                tracing::warn!("Server error: {}", event.content);
            }
            _ => {}
        }
        Ok(())
    }

    fn serialise_settings(&self) -> Option<serde_json::Value> {
        serde_json::to_value(&self.settings).ok()
    }
}
