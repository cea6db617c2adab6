use crate::plugins;
use sable_bot::{
    build_subscriber, config::JsonConfigStore, AbortFlag, BotConfig, ConnectionSupervisor,
    IrcParser, SupervisorExit, TcpTransport,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::util::SubscriberInitExt;

/// Command-line values that replace those from the config file
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub nickname: Option<String>,
}

impl Overrides {
    pub fn apply(self, config: &mut BotConfig) {
        if let Some(server) = self.server {
            config.connection.address = server;
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(nickname) = self.nickname {
            config.identity.nickname = nickname;
        }
    }
}

/// Load the config file at `config_path` with `overrides` applied
pub fn load_config(config_path: &Path, overrides: Overrides) -> Result<BotConfig, anyhow::Error> {
    let mut config = BotConfig::load_file(config_path)?;
    overrides.apply(&mut config);
    Ok(config)
}

async fn do_run_bot(config_path: PathBuf, config: BotConfig) -> Result<SupervisorExit, anyhow::Error> {
    build_subscriber(config.log.clone())?.init();

    let abort = AbortFlag::new();
    abort.install_signal_handler();

    let store = JsonConfigStore::new(config_path, config.clone());
    let mut supervisor =
        ConnectionSupervisor::new(config, TcpTransport::new(), IrcParser::new(), abort)
            .with_config_store(store);
    for factory in plugins::builtin() {
        supervisor = supervisor.with_plugin(factory);
    }

    let exit = supervisor.run().await;
    tracing::info!(?exit, "Bot finished");
    Ok(exit)
}

/// Run the bot until it quits, is aborted by a signal, or gives up reconnecting.
///
/// This creates its own tokio runtime, so must not be called from within one.
pub fn run_bot(config_path: PathBuf, config: BotConfig) -> Result<SupervisorExit, anyhow::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(do_run_bot(config_path, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_bot::config::{ConnectionConfig, IdentityConfig};

    fn config() -> BotConfig {
        serde_json::from_value(serde_json::json!({
            "connection": { "address": "irc.example.com", "port": 6667 },
            "identity": { "nickname": "sable", "user": "bot", "realname": "Sable Bot" },
        }))
        .unwrap()
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = config();
        Overrides {
            server: Some("irc.libera.chat".to_string()),
            port: None,
            nickname: Some("sable2".to_string()),
        }
        .apply(&mut config);

        let ConnectionConfig { address, port } = &config.connection;
        assert_eq!(address, "irc.libera.chat");
        assert_eq!(*port, 6667);
        let IdentityConfig { nickname, user, .. } = &config.identity;
        assert_eq!(nickname, "sable2");
        assert_eq!(user, "bot");
    }

    #[test]
    fn builtin_plugins_match_settings_sections() {
        let mut config = config();
        config
            .plugins
            .insert("admin".to_string(), serde_json::json!({ "prefix": "?" }));
        config
            .plugins
            .insert("weather".to_string(), serde_json::json!({}));

        let factories = plugins::builtin();
        assert_eq!(
            config.invalid_entries(factories.iter().map(|f| f.name())),
            vec!["weather"]
        );
    }
}
