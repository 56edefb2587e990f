use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml_edit::{DocumentMut, value};

pub const RECAST_DIR_NAME: &str = ".recast";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_DATABASE_PATH: &str = ".recast/state.sqlite";
pub const DEFAULT_API_KEY_ENV: &str = "RECAST_API_KEY";
pub const DEFAULT_ENDPOINT: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_BACKUP_PATTERN: &str = "backup/{branch}-{timestamp}";
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MAX_GROUP_SIZE: usize = 10;
pub const DEFAULT_DIFF_CHAR_BUDGET: usize = 2000;
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Analyze the following code changes and write one concise conventional commit message.

Code changes:
{diff_content}

Modified files:
{file_list}

Original commit messages (reference only):
{original_messages}

Requirements:
1. Use the conventional commit format (feat/fix/refactor/docs/...)
2. Describe what the code actually changes, not the original messages
3. Keep it to a single line";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InferenceProviderKind {
    #[default]
    Auto,
    Mock,
    OpenaiCompatible,
}

impl InferenceProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Mock => "mock",
            Self::OpenaiCompatible => "openai_compatible",
        }
    }
}

impl std::str::FromStr for InferenceProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "auto" => Ok(Self::Auto),
            "mock" => Ok(Self::Mock),
            "openai_compatible" => Ok(Self::OpenaiCompatible),
            other => Err(format!(
                "invalid provider '{other}', expected one of: auto, mock, openai_compatible"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Skip,
    PreferDestination,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::PreferDestination => "prefer_destination",
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "skip" => Ok(Self::Skip),
            "prefer_destination" => Ok(Self::PreferDestination),
            other => Err(format!(
                "invalid conflict policy '{other}', expected one of: skip, prefer_destination"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RecastConfig {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub finalize: FinalizeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default = "default_true")]
    pub require_clean: bool,
    #[serde(default)]
    pub remote_sync_check: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            branch: None,
            require_clean: true,
            remote_sync_check: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_pattern")]
    pub naming_pattern: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            naming_pattern: default_backup_pattern(),
        }
    }
}

impl BackupConfig {
    /// Static ref prefix shared by every backup the pattern can produce.
    pub fn ref_prefix(&self) -> &str {
        let pattern = self.naming_pattern.as_str();
        let cut = pattern.find('{').unwrap_or(pattern.len());
        &pattern[..cut]
    }

    pub fn render(&self, branch: &str, timestamp: &str) -> String {
        self.naming_pattern
            .replace("{branch}", branch)
            .replace("{timestamp}", timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub provider: InferenceProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_diff_char_budget")]
    pub diff_char_budget: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: InferenceProviderKind::Auto,
            model: None,
            endpoint: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            diff_char_budget: default_diff_char_budget(),
            prompt_template: None,
        }
    }
}

impl InferenceConfig {
    pub fn prompt_template(&self) -> &str {
        self.prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_PROMPT_TEMPLATE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplayConfig {
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeConfig {
    #[serde(default = "default_true")]
    pub push: bool,
    #[serde(default = "default_true")]
    pub gc: bool,
    #[serde(default = "default_true")]
    pub verify_integrity: bool,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            push: true,
            gc: true,
            verify_integrity: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("failed to edit config TOML: {0}")]
    TomlEdit(#[from] toml_edit::TomlError),
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub fn recast_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(RECAST_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    recast_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn database_path(workspace_root: impl AsRef<Path>, config: &RecastConfig) -> PathBuf {
    let configured = PathBuf::from(&config.storage.database);
    if configured.is_absolute() {
        configured
    } else {
        workspace_root.as_ref().join(configured)
    }
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<RecastConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(RecastConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: RecastConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<RecastConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(recast_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = RecastConfig::default();
    save_workspace_config(workspace_root, &config)?;
    Ok(config)
}

pub fn save_workspace_config(
    workspace_root: impl AsRef<Path>,
    config: &RecastConfig,
) -> Result<(), ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(recast_dir(workspace_root))?;
    let content = toml::to_string_pretty(config)?;
    fs::write(config_path(workspace_root), content)?;
    Ok(())
}

/// Settings written by `recast init`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitOverrides {
    pub branch: Option<String>,
    pub api_key_env: Option<String>,
}

/// Creates the config file when missing and applies `overrides` in place,
/// keeping any comments or unknown keys already present in the file.
pub fn init_workspace_config(
    workspace_root: impl AsRef<Path>,
    overrides: &InitOverrides,
    force: bool,
) -> Result<RecastConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    let path = config_path(workspace_root);
    if force || !path.exists() {
        save_workspace_config(workspace_root, &RecastConfig::default())?;
    }

    let raw = fs::read_to_string(&path)?;
    let mut document = raw.parse::<DocumentMut>()?;

    if let Some(branch) = normalize_optional(overrides.branch.clone()) {
        document["repository"]["branch"] = value(branch);
    }
    if let Some(api_key_env) = normalize_optional(overrides.api_key_env.clone()) {
        document["inference"]["api_key_env"] = value(api_key_env);
    }

    fs::write(&path, document.to_string())?;
    load_workspace_config(workspace_root)
}

/// Rejects values that would make clustering or backups meaningless.
pub fn check_config(config: &RecastConfig) -> Result<(), ConfigError> {
    let threshold = config.clustering.similarity_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ConfigError::Invalid {
            key: "clustering.similarity_threshold",
            reason: format!("{threshold} is outside (0, 1]"),
        });
    }

    if config.clustering.max_group_size == 0 {
        return Err(ConfigError::Invalid {
            key: "clustering.max_group_size",
            reason: "must be at least 1".to_owned(),
        });
    }

    let pattern = config.backup.naming_pattern.trim();
    if pattern.is_empty() {
        return Err(ConfigError::Invalid {
            key: "backup.naming_pattern",
            reason: "must not be empty".to_owned(),
        });
    }
    if !pattern.contains("{branch}") || !pattern.contains("{timestamp}") {
        return Err(ConfigError::Invalid {
            key: "backup.naming_pattern",
            reason: "must contain both {branch} and {timestamp}".to_owned(),
        });
    }

    Ok(())
}

pub fn validate_config(config: &RecastConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.inference.provider == InferenceProviderKind::OpenaiCompatible
        && std::env::var(&config.inference.api_key_env)
            .map(|value| value.trim().is_empty())
            .unwrap_or(true)
    {
        warnings.push(ConfigWarning {
            code: "missing_api_key",
            message: format!(
                "provider is openai_compatible but {} is not set; fallback messages will be used",
                config.inference.api_key_env
            ),
        });
    }

    if config.inference.diff_char_budget == 0 {
        warnings.push(ConfigWarning {
            code: "empty_diff_budget",
            message: "inference.diff_char_budget is 0; prompts will carry no diff text".to_owned(),
        });
    }

    if config.inference.max_retries == 0 {
        warnings.push(ConfigWarning {
            code: "no_retries",
            message: "inference.max_retries is 0; a single failed call falls back immediately"
                .to_owned(),
        });
    }

    let template = config.inference.prompt_template();
    if !template.contains("{diff_content}") {
        warnings.push(ConfigWarning {
            code: "prompt_without_diff",
            message: "inference.prompt_template has no {diff_content} placeholder".to_owned(),
        });
    }

    warnings
}

fn default_true() -> bool {
    true
}

fn default_backup_pattern() -> String {
    DEFAULT_BACKUP_PATTERN.to_owned()
}

fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_max_group_size() -> usize {
    DEFAULT_MAX_GROUP_SIZE
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_owned()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_diff_char_budget() -> usize {
    DEFAULT_DIFF_CHAR_BUDGET
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_owned()
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: RecastConfig) -> RecastConfig {
    config.repository.branch = normalize_optional(config.repository.branch.take());
    config.inference.model = normalize_optional(config.inference.model.take());
    config.inference.endpoint = normalize_optional(config.inference.endpoint.take());
    config.inference.prompt_template = normalize_optional(config.inference.prompt_template.take());

    let api_key_env = config.inference.api_key_env.trim();
    if api_key_env.is_empty() {
        config.inference.api_key_env = default_api_key_env();
    } else {
        config.inference.api_key_env = api_key_env.to_owned();
    }

    if config.storage.database.trim().is_empty() {
        config.storage.database = default_database_path();
    }

    config
}
