use crate::{BusPayload, Event, Plugin, PluginResult, PluginSnapshot};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run one plugin hook, logging and swallowing any error or panic.
///
/// Returns whether the hook succeeded.
fn guarded(plugin: &str, hook: &str, f: impl FnOnce() -> PluginResult) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(plugin, hook, "Plugin error: {}", e);
            false
        }
        Err(_) => {
            tracing::error!(plugin, hook, "Plugin panicked");
            false
        }
    }
}

/// The ordered set of plugin instances for one connection.
///
/// Only the supervisor adds or removes plugins; the main loop iterates it in
/// registration order.
#[derive(Default)]
pub struct PluginCollection {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.plugins.iter().map(|p| p.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.iter().find(|p| p.name() == name)
    }

    pub fn snapshot(&self) -> Vec<PluginSnapshot> {
        self.iter()
            .map(|p| PluginSnapshot {
                name: p.name().to_string(),
                timed_tasks: p.deferred().timed_len(),
                awaited_events: p.deferred().awaited_events(),
            })
            .collect()
    }

    /// Run a lifecycle hook on every plugin, isolating failures
    fn each(&mut self, hook: &str, mut f: impl FnMut(&mut dyn Plugin) -> PluginResult) {
        for plugin in self.plugins.iter_mut() {
            let name = plugin.name().to_string();
            guarded(&name, hook, || f(plugin.as_mut()));
        }
    }

    pub fn init_resources(&mut self) {
        self.each("init_resources", |p| p.init_resources());
    }

    pub fn start(&mut self) {
        self.each("start", |p| p.start());
    }

    /// Tear down every plugin. Each plugin's failure is logged and does not stop the others.
    pub fn teardown(&mut self) {
        self.each("teardown", |p| p.teardown());
    }

    /// Reload the named plugin, or every plugin if `name` is `None`
    pub fn reload(&mut self, name: Option<&str>) {
        let mut found = false;
        for plugin in self.plugins.iter_mut() {
            if name.map_or(true, |n| n == plugin.name()) {
                found = true;
                let plugin_name = plugin.name().to_string();
                tracing::info!(plugin = %plugin_name, "Reloading");
                guarded(&plugin_name, "reload", || plugin.reload());
            }
        }
        if let (Some(name), false) = (name, found) {
            tracing::warn!("Reload requested for unknown plugin {}", name);
        }
    }

    pub fn bus_message(&mut self, header: &str, payload: &BusPayload) {
        self.each("on_bus_message", |p| p.on_bus_message(header, payload));
    }

    /// Hand a snapshot of the collection to the plugin that asked for it
    pub fn deliver_snapshot(&mut self, requester: &str) {
        let snapshot = self.snapshot();
        match self.plugins.iter_mut().find(|p| p.name() == requester) {
            Some(plugin) => {
                guarded(requester, "on_plugin_snapshot", || {
                    plugin.on_plugin_snapshot(&snapshot)
                });
            }
            None => tracing::warn!("Plugin snapshot requested by unknown plugin {}", requester),
        }
    }

    /// Feed one event to each plugin in turn. A plugin sees its postprocess
    /// hook, then its event handler, then its own continuations waiting on
    /// this event type, before the next plugin sees anything.
    pub fn dispatch(&mut self, event: &Event) {
        for plugin in self.plugins.iter_mut() {
            let name = plugin.name().to_string();
            guarded(&name, "postprocess", || plugin.postprocess(event));
            guarded(&name, "on_event", || plugin.on_event(event));
            plugin.deferred_mut().run_matching(&name, event);
        }
    }

    /// Resume every due time-scheduled continuation across all plugins.
    ///
    /// Returns the earliest deadline still pending in any plugin.
    pub fn run_due_timers(&mut self, now: i64) -> Option<i64> {
        let mut next = None;
        for plugin in self.plugins.iter_mut() {
            let name = plugin.name().to_string();
            if let Some(deadline) = plugin.deferred_mut().run_due(&name, now) {
                next = Some(next.map_or(deadline, |n: i64| n.min(deadline)));
            }
        }
        next
    }
}

impl FromIterator<Box<dyn Plugin>> for PluginCollection {
    fn from_iter<I: IntoIterator<Item = Box<dyn Plugin>>>(iter: I) -> Self {
        Self {
            plugins: iter.into_iter().collect(),
        }
    }
}
