//! User settings - node identity, network and maintenance schedule.
//!
//! Stored as TOML at `$PKTNODE_SETTINGS` or
//! `<config dir>/pktnode/settings.toml`. Values are kept as the raw strings
//! the user typed; `node_configuration()` validates them into the immutable
//! snapshot the orchestrator works from.

use pktnode_shared::{MaintenanceSchedule, NodeConfiguration, NodeError, ValidationError, APP_NAME};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Environment variable overriding the settings file location
pub const SETTINGS_ENV: &str = "PKTNODE_SETTINGS";

pub const SETTINGS_FILE: &str = "settings.toml";

pub const PASSWORD_LEN: usize = 16;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*-_=+";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Start a stopped distribution when the supervisor starts
    #[serde(default)]
    pub auto_start: bool,

    /// Stop the distribution when the supervisor exits
    #[serde(default)]
    pub auto_stop_on_exit: bool,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub peer_id: String,

    #[serde(default = "default_cjdns_port")]
    pub cjdns_port: String,

    #[serde(default)]
    pub static_ip: String,

    #[serde(default)]
    pub subnet_mask: String,

    #[serde(default)]
    pub gateway: String,

    #[serde(default = "default_dns_servers")]
    pub dns_servers: String,

    #[serde(default)]
    pub maintenance: MaintenanceSchedule,
}

fn default_username() -> String {
    "pktwinnode".to_string()
}

fn default_cjdns_port() -> String {
    "55000".to_string()
}

fn default_dns_servers() -> String {
    "8.8.8.8, 1.1.1.1".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_start: false,
            auto_stop_on_exit: false,
            username: default_username(),
            password: String::new(),
            peer_id: String::new(),
            cjdns_port: default_cjdns_port(),
            static_ip: String::new(),
            subnet_mask: String::new(),
            gateway: String::new(),
            dns_servers: default_dns_servers(),
            maintenance: MaintenanceSchedule::default(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("auto_start", &self.auto_start)
            .field("auto_stop_on_exit", &self.auto_stop_on_exit)
            .field("username", &self.username)
            .field("password", &"***")
            .field("peer_id", &self.peer_id)
            .field("cjdns_port", &self.cjdns_port)
            .field("static_ip", &self.static_ip)
            .field("subnet_mask", &self.subnet_mask)
            .field("gateway", &self.gateway)
            .field("dns_servers", &self.dns_servers)
            .field("maintenance", &self.maintenance)
            .finish()
    }
}

impl Settings {
    /// Validate the raw fields into a deployment/network snapshot
    pub fn node_configuration(&self) -> Result<NodeConfiguration, ValidationError> {
        NodeConfiguration::builder()
            .username(&self.username)
            .password(&self.password)
            .peer_id(&self.peer_id)
            .cjdns_port(&self.cjdns_port)
            .static_ip(&self.static_ip)
            .subnet_mask(&self.subnet_mask)
            .gateway(&self.gateway)
            .dns_servers(&self.dns_servers)
            .build()
    }
}

/// Random password with at least one upper, lower, digit and symbol
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    let mut pick = |set: &[u8]| set[rng.gen_range(0..set.len())];

    let mut chars = vec![pick(UPPER), pick(LOWER), pick(DIGITS), pick(SPECIAL)];
    let all: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL].concat();
    while chars.len() < PASSWORD_LEN {
        chars.push(pick(&all));
    }

    // Fisher-Yates so the guaranteed classes are not always in front
    for i in (1..chars.len()).rev() {
        let j = rng.gen_range(0..=i);
        chars.swap(i, j);
    }
    chars.into_iter().map(char::from).collect()
}

// ============================================================================
// Stores
// ============================================================================

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings, NodeError>;
    fn save(&self, settings: &Settings) -> Result<(), NodeError>;
}

/// Load settings, falling back to defaults on error. An empty password is
/// replaced with a generated one and persisted immediately.
pub fn load_or_init(store: &dyn SettingsStore) -> Settings {
    let mut settings = store.load().unwrap_or_else(|e| {
        warn!("Settings not loaded, using defaults: {}", e);
        Settings::default()
    });

    if settings.password.is_empty() {
        settings.password = generate_password();
        match store.save(&settings) {
            Ok(()) => info!("Generated a password for guest user {}", settings.username),
            Err(e) => warn!("Generated password not saved: {}", e),
        }
    }
    settings
}

pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the resolved default location
    pub fn default_location() -> Self {
        Self::new(Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_NAME)
            .join(SETTINGS_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    /// A missing file yields defaults
    fn load(&self) -> Result<Settings, NodeError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(toml::from_str(&content)?)
    }

    fn save(&self, settings: &Settings) -> Result<(), NodeError> {
        let content = toml::to_string_pretty(settings).map_err(|e| NodeError::Settings(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, content)?;
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Option<Settings>>,
    saves: Mutex<u32>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(Some(settings)),
            saves: Mutex::new(0),
        }
    }

    pub fn save_count(&self) -> u32 {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }

    pub fn current(&self) -> Option<Settings> {
        self.settings.lock().ok().and_then(|s| s.clone())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings, NodeError> {
        Ok(self.current().unwrap_or_default())
    }

    fn save(&self, settings: &Settings) -> Result<(), NodeError> {
        let mut slot = self
            .settings
            .lock()
            .map_err(|_| NodeError::Internal("settings lock poisoned".to_string()))?;
        *slot = Some(settings.clone());
        if let Ok(mut n) = self.saves.lock() {
            *n += 1;
        }
        Ok(())
    }
}
