#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sable_bot::{
    config::{ConnectionConfig, IdentityConfig, LoggingConfig},
    BotConfig, DeferredTasks, Event, LoopSettings, MessageSender, Plugin, PluginContext,
    PluginError, PluginFactory, PluginResult, PluginSnapshot, ReadOutcome, ReconnectPolicy,
    ThrottleSettings, Transport, TransportError,
};
use std::{
    collections::{BTreeMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;

/// What the server side of one scripted connection does
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub lines: VecDeque<String>,
    /// Close the connection once every line has been read; otherwise stay silent
    pub close: bool,
}

impl Session {
    pub fn closing(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            close: true,
        }
    }

    pub fn open(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            close: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Record {
    pub sent: Vec<(String, Instant)>,
    pub resolves: usize,
    pub connects: usize,
    pub resets: usize,
}

impl Record {
    pub fn lines(&self) -> Vec<String> {
        self.sent.iter().map(|(l, _)| l.clone()).collect()
    }
}

pub type Recording = Arc<Mutex<Record>>;

/// A transport that plays back one [`Session`] per successful connect.
/// Connecting fails once the sessions run out.
pub struct ScriptedTransport {
    sessions: VecDeque<Session>,
    current: Option<Session>,
    record: Recording,
    /// Connect attempts never complete
    stall_connect: bool,
}

impl ScriptedTransport {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self {
            sessions: sessions.into(),
            current: None,
            record: Recording::default(),
            stall_connect: false,
        }
    }

    /// A transport whose connect attempts hang, like an unresponsive server
    pub fn stalling() -> Self {
        Self {
            stall_connect: true,
            ..Self::new(Vec::new())
        }
    }

    /// A transport that is already connected to `session`
    pub fn connected(session: Session) -> Self {
        Self {
            sessions: VecDeque::new(),
            current: Some(session),
            record: Recording::default(),
            stall_connect: false,
        }
    }

    pub fn record(&self) -> Recording {
        self.record.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn resolve(
        &mut self,
        _address: &str,
        _port: u16,
    ) -> Result<Vec<SocketAddr>, TransportError> {
        self.record.lock().resolves += 1;
        Ok(vec![SocketAddr::from(([127, 0, 0, 1], 6667))])
    }

    async fn connect(&mut self, _addrs: &[SocketAddr]) -> Result<(), TransportError> {
        self.record.lock().connects += 1;
        if self.stall_connect {
            std::future::pending::<()>().await;
        }
        match self.sessions.pop_front() {
            Some(session) => {
                self.current = Some(session);
                Ok(())
            }
            None => Err(TransportError::ConnectTimeout),
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        if self.current.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.record.lock().sent.push((line.to_string(), Instant::now()));
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> ReadOutcome {
        let Some(session) = self.current.as_mut() else {
            return ReadOutcome::Closed(TransportError::NotConnected);
        };

        if let Some(line) = session.lines.pop_front() {
            return ReadOutcome::Line(line);
        }
        if session.close {
            return ReadOutcome::Closed(TransportError::Closed);
        }

        tokio::time::sleep(timeout).await;
        ReadOutcome::Empty
    }

    fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    fn reset(&mut self) {
        self.current = None;
        self.record.lock().resets += 1;
    }
}

pub type Log = Arc<Mutex<Vec<String>>>;

/// Records every hook call as `name:hook[:detail]`, and reacts to a few
/// PRIVMSG commands so that scripted sessions can drive the bot
pub struct RecordingPlugin {
    name: String,
    log: Log,
    sender: MessageSender,
    tasks: DeferredTasks,
}

impl RecordingPlugin {
    pub fn new(name: &str, ctx: PluginContext, log: Log) -> Self {
        log.lock().push(format!("{}:new", name));
        Self {
            name: name.to_string(),
            log,
            sender: ctx.sender,
            tasks: DeferredTasks::new(),
        }
    }

    pub fn factory(name: &'static str, log: &Log) -> PluginFactory {
        let log = log.clone();
        PluginFactory::new(name, move |ctx| Ok(RecordingPlugin::new(name, ctx, log.clone())))
    }

    fn record(&self, what: impl AsRef<str>) {
        self.log.lock().push(format!("{}:{}", self.name, what.as_ref()));
    }

    pub fn tasks_mut(&mut self) -> &mut DeferredTasks {
        &mut self.tasks
    }
}

impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn deferred(&self) -> &DeferredTasks {
        &self.tasks
    }

    fn deferred_mut(&mut self) -> &mut DeferredTasks {
        &mut self.tasks
    }

    fn init_resources(&mut self) -> PluginResult {
        self.record("init");
        Ok(())
    }

    fn start(&mut self) -> PluginResult {
        self.record("start");
        Ok(())
    }

    fn on_event(&mut self, event: &Event) -> PluginResult {
        self.record(format!("event:{}", event.raw));

        match event.content.as_str() {
            "!quit" => self.sender.quit(Some("asked to".to_string())),
            "!reconnect" => self.sender.reconnect(None),
            "!peek" => self.sender.peek_plugins(self.name.clone()),
            _ => {}
        }
        Ok(())
    }

    fn reload(&mut self) -> PluginResult {
        self.record("reload");
        Ok(())
    }

    fn teardown(&mut self) -> PluginResult {
        self.record("teardown");
        Ok(())
    }

    fn on_plugin_snapshot(&mut self, snapshot: &[PluginSnapshot]) -> PluginResult {
        let names: Vec<_> = snapshot.iter().map(|s| s.name.as_str()).collect();
        self.record(format!("snapshot:{}", names.join(",")));
        Ok(())
    }
}

/// A plugin whose every hook fails
pub struct FailingPlugin {
    tasks: DeferredTasks,
}

impl FailingPlugin {
    pub fn new() -> Self {
        Self {
            tasks: DeferredTasks::new(),
        }
    }

    pub fn factory() -> PluginFactory {
        PluginFactory::new("failing", |_| Ok(FailingPlugin::new()))
    }
}

impl Plugin for FailingPlugin {
    fn name(&self) -> &str {
        "failing"
    }

    fn deferred(&self) -> &DeferredTasks {
        &self.tasks
    }

    fn deferred_mut(&mut self) -> &mut DeferredTasks {
        &mut self.tasks
    }

    fn on_event(&mut self, _event: &Event) -> PluginResult {
        Err(PluginError::from("on_event always fails"))
    }

    fn postprocess(&mut self, _event: &Event) -> PluginResult {
        panic!("postprocess always panics");
    }

    fn teardown(&mut self) -> PluginResult {
        Err(PluginError::from("teardown always fails"))
    }
}

pub fn count(log: &Log, entry: &str) -> usize {
    log.lock().iter().filter(|l| *l == entry).count()
}

pub fn privmsg(text: &str) -> String {
    format!(":op!op@example.com PRIVMSG #sable :{}", text)
}

/// A throttle loose enough never to delay a test
pub fn unthrottled() -> ThrottleSettings {
    ThrottleSettings {
        k: -1000.0,
        burst: 1000.0,
        increment: 1.0,
    }
}

pub fn fast_loop() -> LoopSettings {
    LoopSettings {
        receive_timeout_ms: 50,
        timer_check_passes: 5,
        message_cap: 5,
    }
}

pub fn test_config() -> BotConfig {
    BotConfig {
        connection: ConnectionConfig {
            address: "irc.example.com".to_string(),
            port: 6667,
        },
        identity: IdentityConfig {
            nickname: "sable".to_string(),
            user: "sable".to_string(),
            realname: "Sable Bot".to_string(),
            quit_message: "Goodbye".to_string(),
            channels: Vec::new(),
            admins: vec!["op".to_string()],
        },
        throttle: unthrottled(),
        main_loop: fast_loop(),
        reconnect: ReconnectPolicy {
            enabled: true,
            delay_secs: 0.0,
            max_delay_secs: 0.0,
            factor: 1.0,
            max_attempts: None,
        },
        save_on_exit: false,
        log: LoggingConfig::default(),
        plugins: BTreeMap::new(),
    }
}
