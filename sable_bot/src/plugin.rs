use crate::{
    config::IdentityConfig, BusPayload, DeferredTasks, Event, MessageSender, PluginError,
    PluginResult, PluginSnapshot,
};
use serde::de::DeserializeOwned;

/// A unit of bot functionality.
///
/// Plugins are driven only from the main loop: every hook runs on the loop's
/// thread of control, one plugin at a time. A plugin talks back to the core
/// through the [`MessageSender`] it was given at construction. Instances do not
/// survive a reconnect; the supervisor tears them down and builds fresh ones
/// from their [`PluginFactory`].
pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn deferred(&self) -> &DeferredTasks;

    fn deferred_mut(&mut self) -> &mut DeferredTasks;

    /// Main event handler, called for every event in plugin registration order
    fn on_event(&mut self, event: &Event) -> PluginResult;

    /// Load any external resources. Called once after construction, before connecting.
    fn init_resources(&mut self) -> PluginResult {
        Ok(())
    }

    /// Called once the connection to the server is established
    fn start(&mut self) -> PluginResult {
        Ok(())
    }

    /// Called for every event before any plugin's `on_event`
    fn postprocess(&mut self, _event: &Event) -> PluginResult {
        Ok(())
    }

    fn reload(&mut self) -> PluginResult {
        Ok(())
    }

    fn teardown(&mut self) -> PluginResult {
        Ok(())
    }

    fn on_bus_message(&mut self, _header: &str, _payload: &BusPayload) -> PluginResult {
        Ok(())
    }

    /// Receives the answer to a `PeekPlugins` request made by this plugin
    fn on_plugin_snapshot(&mut self, _snapshot: &[PluginSnapshot]) -> PluginResult {
        Ok(())
    }

    /// Current settings, to be written to this plugin's section of the config file
    fn serialise_settings(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Everything a plugin receives when it is constructed
#[derive(Clone)]
pub struct PluginContext {
    pub sender: MessageSender,
    pub identity: IdentityConfig,
    /// This plugin's section of the config file, if present
    pub settings: Option<serde_json::Value>,
}

impl PluginContext {
    /// Deserialise this plugin's settings section, falling back to defaults if there is none
    pub fn settings<T: DeserializeOwned + Default>(&self) -> Result<T, PluginError> {
        match &self.settings {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(T::default()),
        }
    }
}

type BuildFn = dyn Fn(PluginContext) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync;

/// Builds fresh instances of one plugin, once per connection
pub struct PluginFactory {
    name: String,
    build: Box<BuildFn>,
}

impl PluginFactory {
    pub fn new<F, P>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(PluginContext) -> Result<P, PluginError> + Send + Sync + 'static,
        P: Plugin + 'static,
    {
        Self {
            name: name.into(),
            build: Box::new(move |ctx| Ok(Box::new(build(ctx)?) as Box<dyn Plugin>)),
        }
    }

    /// The name under which this plugin's settings are stored
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(&self, ctx: PluginContext) -> Result<Box<dyn Plugin>, PluginError> {
        (self.build)(ctx)
    }
}

impl std::fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginFactory")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
