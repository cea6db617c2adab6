//! Plugins shipped with the bot

use sable_bot::PluginFactory;

pub mod admin;
pub mod connect;

pub use admin::AdminPlugin;
pub use connect::ConnectPlugin;

/// Factories for every built-in plugin, in the order they receive events
pub fn builtin() -> Vec<PluginFactory> {
    vec![
        PluginFactory::new(connect::NAME, ConnectPlugin::new),
        PluginFactory::new(admin::NAME, AdminPlugin::new),
    ]
}
