use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file structure for syztriage.
///
/// Allows users to save VM connection details and bug lists and reuse them
/// across runs. Configuration files are loaded from the current directory or
/// a specified path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Target VM connection settings
    #[serde(default)]
    pub vm: VmConfig,

    /// Bug sources to triage
    #[serde(default)]
    pub bugs: BugsConfig,

    /// Timeouts and capture limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VmConfig {
    /// Hostname or address the VM's SSH endpoint is reachable at
    #[serde(default = "default_vm_host")]
    pub host: String,

    /// Forwarded SSH port of the VM
    #[serde(default = "default_vm_port")]
    pub port: u16,

    /// Remote user the reproducer runs as
    #[serde(default = "default_vm_user")]
    pub user: String,

    /// Path to the SSH identity file; defaults to ~/.ssh/id_rsa
    pub ssh_key: Option<PathBuf>,

    /// SSH connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BugsConfig {
    /// External bug report URLs to triage
    #[serde(default)]
    pub reports: Vec<String>,

    /// Internal bug id -> kernel commit hash, triaged in declaration order
    #[serde(default)]
    pub internal: IndexMap<String, String>,

    /// Shared kernel config reference for internal bugs
    #[serde(default = "default_internal_config_url")]
    pub internal_config_url: String,

    /// Directory holding internal reproducer sources (repro-<id>.c)
    #[serde(default = "default_repro_dir")]
    pub repro_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LimitsConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Wall-clock limit for one reproducer execution in seconds
    #[serde(default = "default_repro_timeout")]
    pub repro_timeout_secs: u64,

    /// Maximum number of captured output bytes kept per reproduction attempt
    #[serde(default = "default_capture_limit")]
    pub capture_limit_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vm: VmConfig::default(),
            bugs: BugsConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            host: default_vm_host(),
            port: default_vm_port(),
            user: default_vm_user(),
            ssh_key: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for BugsConfig {
    fn default() -> Self {
        Self {
            reports: Vec::new(),
            internal: IndexMap::new(),
            internal_config_url: default_internal_config_url(),
            repro_dir: default_repro_dir(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            repro_timeout_secs: default_repro_timeout(),
            capture_limit_bytes: default_capture_limit(),
        }
    }
}

fn default_vm_host() -> String {
    "localhost".to_string()
}

fn default_vm_port() -> u16 {
    5555
}

fn default_vm_user() -> String {
    "root".to_string()
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_internal_config_url() -> String {
    "https://syzkaller.appspot.com/text?tag=KernelConfig&x=c3820d4fff43c7a3".to_string()
}

fn default_repro_dir() -> PathBuf {
    PathBuf::from("internal-repro")
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_repro_timeout() -> u64 {
    30
}

fn default_capture_limit() -> usize {
    1024 * 1024
}

impl VmConfig {
    /// Resolve the SSH identity file, falling back to ~/.ssh/id_rsa.
    pub fn ssh_key_path(&self) -> Result<PathBuf> {
        if let Some(key) = &self.ssh_key {
            return Ok(key.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".ssh").join("id_rsa"))
            .context("Cannot determine home directory for default SSH key")
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./syztriage.toml
    /// 3. ./syztriage.json
    /// 4. ./syztriage.yaml
    /// 5. ./syztriage.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        // Try common configuration file names
        let candidates = [
            "syztriage.toml",
            "syztriage.json",
            "syztriage.yaml",
            "syztriage.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        // No config file found, return defaults
        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
