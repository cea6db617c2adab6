//! Connection lifecycle: resolve, connect, run, and decide what happens when
//! the connection ends.

use crate::{
    config::ConfigStore, mailbox, utils::OrLog, AbortFlag, BotConfig, Connection, MailboxReceiver,
    MainLoop, MessageSender, Parser, PluginCollection, PluginContext, PluginFactory,
    TerminationReason, Transport,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When and how quickly to reconnect after losing the connection.
///
/// The delay before retry `n` (counting from zero) is `delay × factor^n`,
/// capped at `max-delay`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay_secs: f64,
    pub max_delay_secs: f64,
    pub factor: f64,
    /// Give up after this many consecutive failures
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_secs: 10.0,
            max_delay_secs: 300.0,
            factor: 1.5,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let max_secs = self.max_delay_secs.max(0.0);
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.delay_secs * self.factor.powi(exp);

        let secs = if !secs.is_finite() || secs > max_secs {
            max_secs
        } else {
            secs.max(0.0)
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn should_retry(&self, failures: u32) -> bool {
        self.enabled && self.max_attempts.map_or(true, |max| failures < max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Resolving,
    Connecting,
    Running,
    Disconnected,
    Quit,
    Aborted,
}

/// How the supervisor finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// A plugin asked to quit
    Quit,
    /// The abort flag was raised
    Aborted,
    /// The connection was lost and the reconnect policy gave up
    Failed,
}

impl SupervisorExit {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Quit | Self::Aborted => 0,
            Self::Failed => 1,
        }
    }
}

/// Owns the transport, the mailbox and the plugin factories, and runs one
/// [`MainLoop`] per connection.
pub struct ConnectionSupervisor<T: Transport, P: Parser> {
    config: BotConfig,
    transport: T,
    parser: P,
    abort: AbortFlag,
    factories: Vec<PluginFactory>,
    store: Option<Box<dyn ConfigStore>>,
    sender: MessageSender,
    mailbox: MailboxReceiver,
    state: SupervisorState,
    failures: u32,
}

impl<T: Transport, P: Parser> ConnectionSupervisor<T, P> {
    pub fn new(config: BotConfig, transport: T, parser: P, abort: AbortFlag) -> Self {
        let (sender, mailbox) = mailbox();
        Self {
            config,
            transport,
            parser,
            abort,
            factories: Vec::new(),
            store: None,
            sender,
            mailbox,
            state: SupervisorState::Idle,
            failures: 0,
        }
    }

    /// Register a plugin. Plugins receive events in registration order.
    pub fn with_plugin(mut self, factory: PluginFactory) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn with_config_store(mut self, store: impl ConfigStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// A sender into the mailbox, for code outside the plugins
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn set_state(&mut self, state: SupervisorState) {
        tracing::debug!(from = ?self.state, to = ?state, "Supervisor state change");
        self.state = state;
    }

    #[tracing::instrument(skip_all, fields(server = %self.config.connection.address))]
    pub async fn run(&mut self) -> SupervisorExit {
        let invalid = self
            .config
            .invalid_entries(self.factories.iter().map(|f| f.name()));
        for name in invalid {
            tracing::warn!("Settings section for unknown plugin {}", name);
        }

        loop {
            if self.abort.is_set() {
                self.set_state(SupervisorState::Aborted);
                return SupervisorExit::Aborted;
            }

            let mut plugins = self.instantiate_plugins();
            plugins.init_resources();

            let reason = self.run_connection(&mut plugins).await;
            self.transport.reset();

            match reason {
                TerminationReason::Quit => {
                    self.finish(&mut plugins);
                    self.set_state(SupervisorState::Quit);
                    return SupervisorExit::Quit;
                }
                TerminationReason::Aborted => {
                    self.finish(&mut plugins);
                    self.set_state(SupervisorState::Aborted);
                    return SupervisorExit::Aborted;
                }
                TerminationReason::Reconnect => {
                    plugins.teardown();
                    self.set_state(SupervisorState::Disconnected);
                    self.discard_stale_messages();
                }
                TerminationReason::Disconnected(e) => {
                    plugins.teardown();
                    self.set_state(SupervisorState::Disconnected);
                    self.discard_stale_messages();
                    self.failures += 1;

                    if !self.config.reconnect.should_retry(self.failures) {
                        tracing::error!(failures = self.failures, "Giving up after error: {}", e);
                        return SupervisorExit::Failed;
                    }

                    let delay = self.config.reconnect.delay_for(self.failures - 1);
                    tracing::info!(?delay, failures = self.failures, "Reconnecting after error: {}", e);

                    if !self.abort.interruptible_sleep(delay).await {
                        self.set_state(SupervisorState::Aborted);
                        return SupervisorExit::Aborted;
                    }
                }
            }
        }
    }

    fn instantiate_plugins(&self) -> PluginCollection {
        let mut plugins = PluginCollection::new();

        for factory in &self.factories {
            let ctx = PluginContext {
                sender: self.sender.clone(),
                identity: self.config.identity.clone(),
                settings: self.config.plugins.get(factory.name()).cloned(),
            };
            match factory.build(ctx) {
                Ok(plugin) => plugins.push(plugin),
                Err(e) => tracing::error!(plugin = factory.name(), "Could not create plugin: {}", e),
            }
        }

        plugins
    }

    async fn run_connection(&mut self, plugins: &mut PluginCollection) -> TerminationReason {
        let address = self.config.connection.address.clone();
        let port = self.config.connection.port;

        // Resolving and connecting can stall for a long time, so both are
        // raced against the abort flag
        self.set_state(SupervisorState::Resolving);
        let resolved = tokio::select! {
            resolved = self.transport.resolve(&address, port) => resolved,
            _ = self.abort.raised() => return TerminationReason::Aborted,
        };
        let addrs = match resolved {
            Ok(addrs) => addrs,
            Err(e) => return TerminationReason::Disconnected(e),
        };

        self.set_state(SupervisorState::Connecting);
        let connected = tokio::select! {
            connected = self.transport.connect(&addrs) => connected,
            _ = self.abort.raised() => return TerminationReason::Aborted,
        };
        if let Err(e) = connected {
            return TerminationReason::Disconnected(e);
        }

        self.set_state(SupervisorState::Running);
        self.failures = 0;
        tracing::info!("Connected to {}:{}", address, port);
        plugins.start();

        let mut connection = Connection::new(&mut self.transport, self.config.throttle);
        let mut main_loop = MainLoop::new(self.config.main_loop, self.abort.clone(), &mut self.mailbox)
            .with_quit_message(self.config.identity.quit_message.clone());
        if let Some(store) = &self.store {
            main_loop = main_loop.with_config_store(store.as_ref());
        }

        main_loop.run(&mut connection, plugins, &mut self.parser).await
    }

    /// Final pass before exit: save if configured, then tear every plugin down
    fn finish(&mut self, plugins: &mut PluginCollection) {
        if self.config.save_on_exit {
            match &self.store {
                Some(store) => store
                    .write_configuration(plugins)
                    .or_warn("saving configuration on exit"),
                None => tracing::warn!("save-on-exit is set but no configuration store is available"),
            }
        }
        plugins.teardown();
    }

    fn discard_stale_messages(&mut self) {
        let dropped = self.mailbox.discard_pending();
        if dropped > 0 {
            tracing::debug!(dropped, "Discarded control messages from the previous connection");
        }
    }
}
