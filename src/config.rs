use crate::prelude::*;

use serde::Deserialize;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_listen")]
    pub listen: Listen,

    #[serde(default = "Config::default_growatt")]
    pub growatt: Growatt,

    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_layouts")]
    pub layouts: String,

    #[serde(default = "Config::default_inverter_type")]
    pub inverter_type: String,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Optional path to append decoded records to, one JSON object per line
    pub datalog_file: Option<String>,
}

// Listen {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Listen {
    #[serde(default = "Config::default_listen_host")]
    pub host: String,
    #[serde(default = "Config::default_growatt_port")]
    pub port: u16,
}
impl Listen {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
} // }}}

// Growatt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Growatt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_growatt_host")]
    pub host: String,
    #[serde(default = "Config::default_growatt_port")]
    pub port: u16,

    pub connect_timeout: Option<u64>,
    pub use_tcp_nodelay: Option<bool>,
}
impl Growatt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connect_timeout(&self) -> u64 {
        self.connect_timeout.unwrap_or(10)
    }

    pub fn use_tcp_nodelay(&self) -> bool {
        self.use_tcp_nodelay.unwrap_or(true)
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_disabled")]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_topic")]
    pub topic: String,

    #[serde(default = "Config::default_disabled")]
    pub retain: bool,
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn retain(&self) -> bool {
        self.retain
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        // the config holds no invariants a panicking writer could break
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn listen(&self) -> Listen {
        self.lock().listen.clone()
    }

    pub fn growatt(&self) -> Growatt {
        self.lock().growatt.clone()
    }

    pub fn mqtt(&self) -> Mqtt {
        self.lock().mqtt.clone()
    }

    pub fn layouts(&self) -> String {
        self.lock().layouts.clone()
    }

    pub fn inverter_type(&self) -> String {
        self.lock().inverter_type.clone()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }

    pub fn datalog_file(&self) -> Option<String> {
        self.lock().datalog_file.clone()
    }

    pub fn log_summary(&self) {
        self.lock().log_summary();
    }

    /// Applies command line overrides on top of the file contents.
    pub fn apply_options(&self, options: &Options) {
        let mut config = self.lock();

        if options.no_forward {
            info!("forwarding to Growatt disabled on the command line");
            config.growatt.enabled = false;
        }
        if let Some(layouts) = &options.layouts {
            config.layouts = layouts.clone();
        }
        if options.debug {
            config.loglevel = "debug".to_string();
        }
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
            .map_err(|err| anyhow!("config.rs:error parsing {}: {}", file, err))
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Listen: {}:{}", self.listen.host, self.listen.port);
        info!("  Growatt forwarding: {}", if self.growatt.enabled { "enabled" } else { "disabled" });
        if self.growatt.enabled {
            info!("    Host: {}", self.growatt.host);
            info!("    Port: {}", self.growatt.port);
            info!("    Connect Timeout: {}s", self.growatt.connect_timeout());
            info!("    TCP NoDelay: {}", self.growatt.use_tcp_nodelay());
        }
        info!("  Layouts: {}", self.layouts);
        info!("  Inverter Type: {}", self.inverter_type);
        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Topic: {}", self.mqtt.topic);
            info!("    Retain: {}", self.mqtt.retain);
        }
        if let Some(path) = &self.datalog_file {
            info!("  Datalog File: {}", path);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.listen.port == 0 {
            bail!("listen.port must be between 1 and 65535");
        }

        if self.growatt.enabled {
            if self.growatt.port == 0 {
                bail!("growatt.port must be between 1 and 65535");
            }
            if self.growatt.host.is_empty() {
                return Err(anyhow!("config.rs:Growatt host cannot be empty"));
            }
            if self.growatt.connect_timeout() == 0 {
                return Err(anyhow!("config.rs:Invalid connect timeout: 0"));
            }
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                return Err(anyhow!("config.rs:MQTT host cannot be empty"));
            }
            if self.mqtt.topic.is_empty() {
                return Err(anyhow!("config.rs:MQTT topic cannot be empty"));
            }
        }

        if self.inverter_type.is_empty() {
            return Err(anyhow!("config.rs:inverter_type cannot be empty"));
        }

        Ok(())
    }

    fn default_listen() -> Listen {
        Listen {
            host: Self::default_listen_host(),
            port: Self::default_growatt_port(),
        }
    }

    fn default_growatt() -> Growatt {
        Growatt {
            enabled: Self::default_enabled(),
            host: Self::default_growatt_host(),
            port: Self::default_growatt_port(),
            connect_timeout: None,
            use_tcp_nodelay: None,
        }
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: Self::default_disabled(),
            host: String::new(),
            port: Self::default_mqtt_port(),
            username: None,
            password: None,
            topic: Self::default_mqtt_topic(),
            retain: Self::default_disabled(),
        }
    }

    fn default_listen_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_growatt_host() -> String {
        "server.growatt.com".to_string()
    }

    fn default_growatt_port() -> u16 {
        5279
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_topic() -> String {
        "energy/growatt".to_string()
    }

    fn default_layouts() -> String {
        "layouts".to_string()
    }

    fn default_inverter_type() -> String {
        crate::growatt::layout::DEFAULT_INVERTER_TYPE.to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_disabled() -> bool {
        false
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
