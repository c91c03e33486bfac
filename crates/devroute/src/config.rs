//! Configuration types and loading logic.

use devroute_tracing::TracingConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevrouteConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Overridden by the plain `PORT` environment variable.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Backend forwarding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// Bound on establishing the TCP connection to a backend.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Bound on receiving response headers once connected. The body is
    /// streamed without a deadline.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,

    /// Whether 127.0.0.0/8 counts as a private range.
    #[serde(default = "default_true")]
    pub allow_loopback: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_response_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            response_timeout_secs: default_response_timeout(),
            allow_loopback: default_true(),
        }
    }
}

impl ServerConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DevrouteConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. `PORT`
    /// 2. Environment variables (DEVROUTE_ prefix, __ for nesting)
    /// 3. TOML config file (may be absent)
    /// 4. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: DevrouteConfig = Self::figment(config_path).extract()?;
        Ok(config)
    }

    fn figment(config_path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("DEVROUTE_").split("__"))
            .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devroute_tracing::LogFormat;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file_or_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let config = DevrouteConfig::load("devroute.toml").unwrap();

            assert_eq!(config.server.listen_address(), "0.0.0.0:8080");
            assert_eq!(config.forward.connect_timeout_secs, 5);
            assert_eq!(config.forward.response_timeout_secs, 30);
            assert!(config.forward.allow_loopback);
            assert_eq!(config.tracing.log_format, LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "devroute.toml",
                r#"
                [server]
                port = 9090

                [forward]
                allow_loopback = false
                connect_timeout_secs = 1

                [tracing]
                log_format = "text"
                "#,
            )?;

            let config = DevrouteConfig::load("devroute.toml").unwrap();
            assert_eq!(config.server.port, 9090);
            assert_eq!(config.server.host, "0.0.0.0");
            assert!(!config.forward.allow_loopback);
            assert_eq!(config.forward.connect_timeout_secs, 1);
            assert_eq!(config.forward.response_timeout_secs, 30);
            assert_eq!(config.tracing.log_format, LogFormat::Text);
            Ok(())
        });
    }

    #[test]
    fn test_port_env_wins() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("devroute.toml", "[server]\nport = 9090\n")?;
            jail.set_env("DEVROUTE_SERVER__PORT", "9191");
            jail.set_env("PORT", "3000");

            let config = DevrouteConfig::load("devroute.toml").unwrap();
            assert_eq!(config.server.port, 3000);
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_nesting() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("DEVROUTE_FORWARD__RESPONSE_TIMEOUT_SECS", "7");
            jail.set_env("DEVROUTE_SERVER__HOST", "127.0.0.1");

            let config = DevrouteConfig::load("missing.toml").unwrap();
            assert_eq!(config.forward.response_timeout_secs, 7);
            assert_eq!(config.server.listen_address(), "127.0.0.1:8080");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("PORT", "not-a-port");
            assert!(DevrouteConfig::load("devroute.toml").is_err());
            Ok(())
        });
    }
}
