//! Agent settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `OBD_AGENT__SECTION__KEY` environment variables.

use anyhow::{bail, Context};
use obd_poller::WatchBinding;
use obd_protocol::{commands, CommandRegistry, DiagnosticCommand, Ecu, Elm327Config};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;
use telemetry::{GaugeSpec, LoggingConfig, DEFAULT_PREFIX};
use vehicle_lookup::LookupConfig;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "OBD_AGENT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "obd-agent.toml";
const ENV_PREFIX: &str = "OBD_AGENT";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Serial ELM327 dongle
    #[default]
    Elm327,
    /// Scripted demo adapter, no hardware needed
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub kind: AdapterKind,
    pub device: String,
    pub elm327: Elm327Config,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            kind: AdapterKind::Elm327,
            device: "/dev/ttyUSB0".to_string(),
            elm327: Elm327Config::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Namespace for metric names and span attributes
    pub prefix: String,
    pub export_interval_secs: u64,
    /// Prometheus scrape endpoint, e.g. "0.0.0.0:9464"; unset disables it
    pub prometheus_listen: Option<String>,
    /// Gauges beyond fuel level, mileage and response time
    pub extra_gauges: Vec<GaugeSpec>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            export_interval_secs: 15,
            prometheus_listen: None,
            extra_gauges: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs.max(1))
    }

    pub fn prometheus_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        self.prometheus_listen
            .as_deref()
            .map(|addr| {
                addr.parse()
                    .with_context(|| format!("invalid prometheus_listen address {addr:?}"))
            })
            .transpose()
    }
}

/// A vendor-defined command declared in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Hex request code, e.g. "01A6"
    pub request: String,
    /// Minimum response length including header bytes
    pub bytes: usize,
    /// Decoder name: percent, mileage, vin, dtc or uint
    pub decoder: String,
    #[serde(default)]
    pub ecu: Ecu,
}

impl CommandConfig {
    pub fn build(&self) -> anyhow::Result<DiagnosticCommand> {
        DiagnosticCommand::custom(
            &self.name,
            &self.description,
            &self.request,
            self.bytes,
            &self.decoder,
            self.ecu,
        )
        .with_context(|| format!("invalid command {}", self.name))
    }
}

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub adapter: AdapterConfig,
    pub telemetry: TelemetryConfig,
    pub lookup: LookupConfig,
    pub logging: LoggingConfig,
    /// Commands watched by the poller and the metric each one feeds
    pub watches: Vec<WatchBinding>,
    /// Extra vendor-defined commands
    pub commands: Vec<CommandConfig>,
    /// Commands whose support is reported at startup
    pub required: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterConfig::default(),
            telemetry: TelemetryConfig::default(),
            lookup: LookupConfig::default(),
            logging: LoggingConfig::default(),
            watches: WatchBinding::defaults(),
            commands: Vec::new(),
            required: vec![
                commands::VIN.to_string(),
                commands::FUEL_LEVEL.to_string(),
                commands::MILEAGE.to_string(),
            ],
        }
    }
}

impl AgentConfig {
    /// Load from the file named by `OBD_AGENT_CONFIG` (or
    /// `obd-agent.toml`) and the process environment
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let file = config::File::with_name(&path).required(false);
        Self::from_sources(file, environment())
    }

    /// Parse a TOML document layered over the defaults
    pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
        let file = config::File::from_str(toml, config::FileFormat::Toml);
        Self::from_sources(file, environment().source(Some(config::Map::new())))
    }

    fn from_sources<F>(file: F, env: config::Environment) -> anyhow::Result<Self>
    where
        F: config::Source + Send + Sync + 'static,
    {
        let config: AgentConfig = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can only fail later
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.telemetry.prefix.is_empty() {
            bail!("telemetry.prefix must not be empty");
        }
        self.telemetry.prometheus_addr()?;

        let registry = self.registry()?;
        for name in self.required.iter().chain(self.watches.iter().map(|w| &w.command)) {
            registry
                .get(name)
                .with_context(|| format!("{name} is not a registered command"))?;
        }
        Ok(())
    }

    /// Built-in commands plus the configured extended ones
    pub fn registry(&self) -> anyhow::Result<CommandRegistry> {
        let mut registry = CommandRegistry::with_builtin();
        for command in &self.commands {
            registry.register(command.build()?)?;
        }
        Ok(registry)
    }

    /// Default gauges plus any configured extras
    pub fn gauges(&self) -> Vec<GaugeSpec> {
        let mut gauges = GaugeSpec::defaults(&self.telemetry.prefix);
        gauges.extend(self.telemetry.extra_gauges.iter().cloned());
        gauges
    }

    /// Store slots: every gauge and every watched metric
    pub fn store_metrics(&self) -> BTreeSet<String> {
        let prefix = &self.telemetry.prefix;
        self.gauges()
            .into_iter()
            .map(|g| g.metric)
            .chain(
                self.watches
                    .iter()
                    .map(|w| telemetry::metric::name(prefix, &w.metric)),
            )
            .collect()
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
