use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const ENABLE_MODULES_VAR: &str = "ENABLE_MODULES";
pub const MODULES_DIR_VAR: &str = "VISIONXTRACT_MODULES_DIR";
pub const MODEL_NAME_VAR: &str = "GEMINI_MODEL_NAME";
pub const CLIENT_TIMEOUT_VAR: &str = "MODULE_CLIENT_TIMEOUT_SECS";
pub const DEFAULT_HOST_VAR: &str = "MODULE_DEFAULT_HOST";
pub const EXECUTION_MODE_VAR: &str = "VISIONXTRACT_EXECUTION_MODE";

const DEFAULT_MODULES_DIR: &str = "modules";
pub(crate) const DEFAULT_MODEL_NAME: &str = "gemini-2.0-flash-exp";
const DEFAULT_HOST: &str = "http://localhost";
const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_PORTS: &[(&str, u16)] = &[
    ("face_extraction", 8001),
    ("ocr", 8002),
    ("llm_judge", 8003),
];
const FALLBACK_PORT: u16 = 8000;

/// Remote binding settings consulted by the transport-selecting client.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportSettings {
    overrides: BTreeMap<String, String>,
    default_host: String,
    pub timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            overrides: BTreeMap::new(),
            default_host: DEFAULT_HOST.to_string(),
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }
}

impl TransportSettings {
    /// Binds `module` to a fixed remote address, as `MODULE_{NAME}_URL` would.
    pub fn with_override(mut self, module: &str, address: impl Into<String>) -> Self {
        self.overrides
            .insert(override_key(module), address.into());
        self
    }

    pub fn with_default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn override_for(&self, module: &str) -> Option<&str> {
        self.overrides.get(&override_key(module)).map(String::as_str)
    }

    pub fn default_address(&self, module: &str) -> String {
        let port = DEFAULT_PORTS
            .iter()
            .find(|(name, _)| *name == module)
            .map(|(_, port)| *port)
            .unwrap_or(FALLBACK_PORT);
        format!("{}:{port}", self.default_host.trim_end_matches('/'))
    }
}

/// Environment variable holding the remote override for `module`.
pub fn override_key(module: &str) -> String {
    format!("MODULE_{}_URL", module.to_ascii_uppercase())
}

/// How capability workflows drive their steps.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExecutionMode {
    #[default]
    Deterministic,
    Autonomous,
}

impl ExecutionMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "deterministic" => Some(Self::Deterministic),
            "autonomous" | "agent" => Some(Self::Autonomous),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlatformConfig {
    pub enabled_modules: Vec<String>,
    pub modules_dir: PathBuf,
    pub model_name: String,
    pub execution: ExecutionMode,
    pub transport: TransportSettings,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled_modules: vec!["all".to_string()],
            modules_dir: PathBuf::from(DEFAULT_MODULES_DIR),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            execution: ExecutionMode::default(),
            transport: TransportSettings::default(),
        }
    }
}

impl PlatformConfig {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            if value.is_empty() {
                continue;
            }

            match key {
                ENABLE_MODULES_VAR => config.enabled_modules = parse_enabled_modules(value),
                MODULES_DIR_VAR => config.modules_dir = PathBuf::from(value),
                MODEL_NAME_VAR => config.model_name = value.to_string(),
                EXECUTION_MODE_VAR => match ExecutionMode::parse(value) {
                    Some(mode) => config.execution = mode,
                    None => tracing::warn!(
                        variable = EXECUTION_MODE_VAR,
                        value,
                        "ignoring unknown execution mode"
                    ),
                },
                DEFAULT_HOST_VAR => config.transport.default_host = value.to_string(),
                CLIENT_TIMEOUT_VAR => match value.parse::<u64>() {
                    Ok(seconds) if seconds > 0 => {
                        config.transport.timeout = Duration::from_secs(seconds);
                    }
                    _ => tracing::warn!(
                        variable = CLIENT_TIMEOUT_VAR,
                        value,
                        "ignoring invalid client timeout"
                    ),
                },
                _ => {
                    if let Some(name) = key
                        .strip_prefix("MODULE_")
                        .and_then(|rest| rest.strip_suffix("_URL"))
                        && !name.is_empty()
                    {
                        config
                            .transport
                            .overrides
                            .insert(key.to_string(), value.to_string());
                    }
                }
            }
        }

        config
    }
}

fn parse_enabled_modules(raw: &str) -> Vec<String> {
    raw.to_ascii_lowercase()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
