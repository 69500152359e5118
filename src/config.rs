use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default config file template with comments, used by `config init`.
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# bdg configuration file

# Connection defaults
# [connection]
# port = 9222
# timeout_ms = 30000

# Chrome launch defaults
# [launch]
# executable = "/path/to/chrome"
# headless = false
# extra_args = ["--disable-gpu"]

# Capture defaults
# [capture]
# include_all = false
# include_patterns = []
# exclude_patterns = []
# fetch_all_bodies = false
# max_body_size = 5242880          # bytes
# console_include = []
# console_exclude = []

# Output defaults
# [output]
# format = "json"                  # json, pretty, plain
"#;

// ---------------------------------------------------------------------------
// Config structs (parsed from TOML)
// ---------------------------------------------------------------------------

/// Represents the parsed TOML config file. All fields optional.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigFile {
    pub connection: ConnectionConfig,
    pub launch: LaunchConfig,
    pub capture: CaptureConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub executable: Option<String>,
    pub headless: Option<bool>,
    pub extra_args: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub include_all: Option<bool>,
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    pub fetch_all_bodies: Option<bool>,
    /// Response-body size cap, bytes.
    pub max_body_size: Option<u64>,
    pub console_include: Option<Vec<String>>,
    pub console_exclude: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved config (all defaults filled in)
// ---------------------------------------------------------------------------

/// Fully resolved configuration with all defaults filled in, as shown by
/// `config show`.
#[derive(Debug, Serialize)]
pub struct ResolvedConfig {
    pub config_path: Option<PathBuf>,
    pub connection: ResolvedConnection,
    pub launch: ResolvedLaunch,
    pub capture: ResolvedCapture,
    pub output: ResolvedOutput,
}

#[derive(Debug, Serialize)]
pub struct ResolvedConnection {
    pub port: Option<u16>,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ResolvedLaunch {
    pub executable: Option<String>,
    pub headless: bool,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolvedCapture {
    pub include_all: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub fetch_all_bodies: bool,
    pub max_body_size: u64,
    pub console_include: Vec<String>,
    pub console_exclude: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolvedOutput {
    pub format: String,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing config file.
    Io(std::io::Error),
    /// Config file already exists (for `config init`).
    AlreadyExists(PathBuf),
    /// Could not determine config directory.
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config file error: {e}"),
            Self::AlreadyExists(p) => {
                write!(f, "Config file already exists: {}", p.display())
            }
            Self::NoConfigDir => write!(f, "could not determine config directory"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ConfigError> for crate::error::AppError {
    fn from(e: ConfigError) -> Self {
        use crate::error::ExitCode;
        let code = match &e {
            ConfigError::AlreadyExists(_) => ExitCode::ResourceBusy,
            _ => ExitCode::UnhandledException,
        };
        Self {
            message: e.to_string(),
            code,
            custom_json: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config file search
// ---------------------------------------------------------------------------

/// Find the first config file that exists, checking locations in
/// priority order:
///
/// 1. `explicit_path` (from `--config`)
/// 2. `$BDG_CONFIG`
/// 3. `./.bdg.toml` (project-local)
/// 4. `<config_dir>/bdg/config.toml` (XDG / platform config dir)
/// 5. `~/.bdg.toml`
#[must_use]
pub fn find_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
    find_config_file_with(explicit_path, std::env::var("BDG_CONFIG").ok())
}

/// Testable variant of [`find_config_file`] that accepts the env value.
#[must_use]
pub fn find_config_file_with(
    explicit_path: Option<&Path>,
    env_config: Option<String>,
) -> Option<PathBuf> {
    if let Some(p) = explicit_path {
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }

    if let Some(env_path) = env_config {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Some(p);
        }
    }

    let local = PathBuf::from(".bdg.toml");
    if local.exists() {
        return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("bdg").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".bdg.toml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load and parse a config file. Returns the file path (if found) and
/// the parsed config.
///
/// On parse errors, prints a warning to stderr and returns defaults.
#[must_use]
pub fn load_config(explicit_path: Option<&Path>) -> (Option<PathBuf>, ConfigFile) {
    let Some(path) = find_config_file(explicit_path) else {
        return (None, ConfigFile::default());
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
            Ok(config) => (Some(path), config),
            Err(e) => {
                eprintln!("warning: could not parse {}: {e}", path.display());
                (Some(path), ConfigFile::default())
            }
        },
        Err(e) => {
            eprintln!("warning: could not read {}: {e}", path.display());
            (Some(path), ConfigFile::default())
        }
    }
}

/// Resolve every field to its effective value.
#[must_use]
pub fn resolve(config_path: Option<PathBuf>, config: &ConfigFile) -> ResolvedConfig {
    ResolvedConfig {
        config_path,
        connection: ResolvedConnection {
            port: config.connection.port,
            timeout_ms: config.connection.timeout_ms.unwrap_or(30_000),
        },
        launch: ResolvedLaunch {
            executable: config.launch.executable.clone(),
            headless: config.launch.headless.unwrap_or(false),
            extra_args: config.launch.extra_args.clone().unwrap_or_default(),
        },
        capture: ResolvedCapture {
            include_all: config.capture.include_all.unwrap_or(false),
            include_patterns: config.capture.include_patterns.clone().unwrap_or_default(),
            exclude_patterns: config.capture.exclude_patterns.clone().unwrap_or_default(),
            fetch_all_bodies: config.capture.fetch_all_bodies.unwrap_or(false),
            max_body_size: config
                .capture
                .max_body_size
                .unwrap_or(crate::telemetry::DEFAULT_MAX_BODY_SIZE),
            console_include: config.capture.console_include.clone().unwrap_or_default(),
            console_exclude: config.capture.console_exclude.clone().unwrap_or_default(),
        },
        output: ResolvedOutput {
            format: config
                .output
                .format
                .clone()
                .unwrap_or_else(|| "json".to_string()),
        },
    }
}

/// Create a commented template config file.
///
/// # Errors
///
/// Returns `ConfigError::AlreadyExists` when the target file exists, or
/// `ConfigError::NoConfigDir`/`Io` on filesystem problems.
pub fn init_config(explicit_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("bdg")
            .join("config.toml"),
    };

    if path.exists() {
        return Err(ConfigError::AlreadyExists(path));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml_src = r#"
            [connection]
            port = 9222
            timeout_ms = 10000

            [launch]
            headless = true
            extra_args = ["--disable-gpu"]

            [capture]
            include_all = true
            include_patterns = ["api.example.com"]
            max_body_size = 1048576

            [output]
            format = "pretty"
        "#;
        let config: ConfigFile = toml::from_str(toml_src).unwrap();
        assert_eq!(config.connection.port, Some(9222));
        assert_eq!(config.launch.headless, Some(true));
        assert_eq!(config.capture.include_all, Some(true));
        assert_eq!(config.capture.max_body_size, Some(1_048_576));
        assert_eq!(config.output.format.as_deref(), Some("pretty"));
    }

    #[test]
    fn empty_config_parses_to_defaults() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert!(config.connection.port.is_none());
        assert!(config.capture.include_patterns.is_none());
    }

    #[test]
    fn template_parses() {
        let config: ConfigFile = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn resolve_fills_documented_defaults() {
        let resolved = resolve(None, &ConfigFile::default());
        assert_eq!(resolved.connection.timeout_ms, 30_000);
        assert!(!resolved.capture.include_all);
        assert_eq!(
            resolved.capture.max_body_size,
            crate::telemetry::DEFAULT_MAX_BODY_SIZE
        );
        assert_eq!(resolved.output.format, "json");
    }

    #[test]
    fn explicit_path_wins_when_it_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        std::fs::write(&file, "").unwrap();
        let found = find_config_file_with(Some(&file), None);
        assert_eq!(found, Some(file));
    }

    #[test]
    fn env_config_used_when_no_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("env.toml");
        std::fs::write(&file, "").unwrap();
        let found =
            find_config_file_with(None, Some(file.to_string_lossy().into_owned()));
        assert_eq!(found, Some(file));
    }

    #[test]
    fn init_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "").unwrap();
        let result = init_config(Some(&file));
        assert!(matches!(result, Err(ConfigError::AlreadyExists(_))));
    }

    #[test]
    fn init_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("config.toml");
        let created = init_config(Some(&file)).unwrap();
        assert_eq!(created, file);
        let contents = std::fs::read_to_string(&file).unwrap();
        assert!(contents.contains("[capture]"));
    }
}
