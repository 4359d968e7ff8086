//! Configuration management for syncmark.
//!
//! Parses `syncmark.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `emoji.asset_base`

mod expand;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use syncmark_renderer::{MacroTable, RendererOptions};

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override raw HTML passthrough.
    pub html: Option<bool>,
    /// Override math rendering.
    pub math: Option<bool>,
    /// Override emoji rendering.
    pub emoji: Option<bool>,
    /// Override the code block line-number gutter.
    pub line_numbers: Option<bool>,
    /// Override trust in encoded diagram payloads.
    pub trust_diagram_payload: Option<bool>,
    /// Override the emoji image base path.
    pub emoji_asset_base: Option<String>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "syncmark.toml";

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Markdown parsing configuration.
    pub markdown: MarkdownConfig,
    /// Math rendering configuration.
    pub math: MathConfig,
    /// Code highlighting configuration.
    pub highlight: HighlightConfig,
    /// Emoji configuration.
    pub emoji: EmojiConfig,
    /// Diagram configuration.
    pub diagrams: DiagramsConfig,

    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Markdown parsing configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MarkdownConfig {
    /// Pass raw HTML through instead of escaping it.
    pub html: bool,
    /// Render single newlines as `<br>`.
    pub breaks: bool,
    /// Turn bare URLs into links.
    pub linkify: bool,
    /// Smart quotes and dashes.
    pub typographer: bool,
    /// Tables, strikethrough and task lists.
    pub gfm: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            html: true,
            breaks: true,
            linkify: true,
            typographer: true,
            gfm: true,
        }
    }
}

/// Math rendering configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MathConfig {
    /// Whether `$...$` and `$$...$$` are typeset.
    pub enabled: bool,
    /// Macro definitions keyed by name, e.g. `'\RR' = '\mathbb{R}'`.
    pub macros: BTreeMap<String, String>,
}

impl Default for MathConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            macros: BTreeMap::new(),
        }
    }
}

/// Code highlighting configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    /// Line-number gutter on multi-line code blocks.
    pub line_numbers: bool,
    /// Fall back to plain text for unknown languages.
    pub ignore_illegals: bool,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            line_numbers: true,
            ignore_illegals: true,
        }
    }
}

/// Emoji configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmojiConfig {
    /// Whether emoji are rendered as images.
    pub enabled: bool,
    /// Base path or URL of the emoji images.
    pub asset_base: String,
}

impl Default for EmojiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            asset_base: syncmark_renderer::DEFAULT_ASSET_BASE.to_owned(),
        }
    }
}

/// Diagram configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DiagramsConfig {
    /// Emit decoded `diagram` payloads as raw markup.
    ///
    /// When disabled the decoded markup is escaped.
    pub trust_payload: bool,
}

impl Default for DiagramsConfig {
    fn default() -> Self {
        Self {
            trust_payload: true,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`emoji.asset_base`").
        field: String,
        /// Error message (e.g., "${`ASSET_BASE`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require a base to be an absolute path or an http(s) URL.
fn require_asset_base(base: &str, field: &str) -> Result<(), ConfigError> {
    if !base.starts_with('/') && !base.starts_with("http://") && !base.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with /, http:// or https://"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `syncmark.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading, allowing CLI arguments to take
    /// precedence over config file values. The result is validated again
    /// after overrides.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails
    /// or a value is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
            config.validate()?;
        }

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(html) = settings.html {
            self.markdown.html = html;
        }
        if let Some(math) = settings.math {
            self.math.enabled = math;
        }
        if let Some(emoji) = settings.emoji {
            self.emoji.enabled = emoji;
        }
        if let Some(line_numbers) = settings.line_numbers {
            self.highlight.line_numbers = line_numbers;
        }
        if let Some(trust) = settings.trust_diagram_payload {
            self.diagrams.trust_payload = trust;
        }
        if let Some(base) = &settings.emoji_asset_base {
            self.emoji.asset_base.clone_from(base);
        }
    }

    /// Renderer options described by this configuration.
    #[must_use]
    pub fn renderer_options(&self) -> RendererOptions {
        RendererOptions {
            html: self.markdown.html,
            breaks: self.markdown.breaks,
            linkify: self.markdown.linkify,
            typographer: self.markdown.typographer,
            gfm: self.markdown.gfm,
            math: self.math.enabled,
            emoji: self.emoji.enabled,
            line_numbers: self.highlight.line_numbers,
            ignore_illegals: self.highlight.ignore_illegals,
            trust_diagram_payload: self.diagrams.trust_payload,
            emoji_asset_base: self.emoji.asset_base.clone(),
        }
    }

    /// Math macros from the `[math.macros]` table.
    #[must_use]
    pub fn macro_table(&self) -> MacroTable {
        self.math
            .macros
            .iter()
            .map(|(name, expansion)| (name.clone(), expansion.clone()))
            .collect()
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        discover_from(&cwd)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;
        config.config_path = Some(path.to_path_buf());

        // Validate configuration after loading and expansion
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically after loading from file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_emoji()?;
        self.validate_math()?;
        Ok(())
    }

    fn validate_emoji(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.emoji.asset_base, "emoji.asset_base")?;
        require_asset_base(&self.emoji.asset_base, "emoji.asset_base")?;
        Ok(())
    }

    /// Macro names are a backslash followed by ASCII letters.
    fn validate_math(&self) -> Result<(), ConfigError> {
        for name in self.math.macros.keys() {
            let valid = name.strip_prefix('\\').is_some_and(|rest| {
                !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphabetic())
            });
            if !valid {
                return Err(ConfigError::Validation(format!(
                    "math.macros: invalid macro name {name:?}, expected a backslash followed by letters"
                )));
            }
        }
        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.emoji.asset_base = expand::expand_env(&self.emoji.asset_base, "emoji.asset_base")?;
        Ok(())
    }
}

/// Walk up from `start` looking for a config file.
fn discover_from(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(CONFIG_FILENAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILENAME);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.markdown.html);
        assert!(config.markdown.breaks);
        assert!(config.math.enabled);
        assert!(config.math.macros.is_empty());
        assert!(config.highlight.line_numbers);
        assert!(config.emoji.enabled);
        assert_eq!(config.emoji.asset_base, "/_assets/svg/twemoji");
        assert!(config.diagrams.trust_payload);
        assert_eq!(config.renderer_options(), RendererOptions::default());
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.markdown.gfm);
        assert!(config.config_path.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[markdown]
html = false
breaks = false
linkify = false
typographer = false
gfm = false

[math]
enabled = false

[math.macros]
'\RR' = '\mathbb{R}'

[highlight]
line_numbers = false
ignore_illegals = false

[emoji]
enabled = false
asset_base = "https://cdn.example.com/emoji"

[diagrams]
trust_payload = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        let options = config.renderer_options();
        assert_eq!(
            options,
            RendererOptions {
                html: false,
                breaks: false,
                linkify: false,
                typographer: false,
                gfm: false,
                math: false,
                emoji: false,
                line_numbers: false,
                ignore_illegals: false,
                trust_diagram_payload: false,
                emoji_asset_base: "https://cdn.example.com/emoji".to_owned(),
            }
        );
        assert_eq!(config.macro_table().get("\\RR"), Some("\\mathbb{R}"));
    }

    #[test]
    fn test_unknown_field_type_is_parse_error() {
        let result = toml::from_str::<Config>("[markdown]\nhtml = \"yes\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_empty_asset_base() {
        let mut config = Config::default();
        config.emoji.asset_base = String::new();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("emoji.asset_base cannot be empty"));
    }

    #[test]
    fn test_validate_relative_asset_base() {
        let mut config = Config::default();
        config.emoji.asset_base = "assets/emoji".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must start with"));
    }

    #[test]
    fn test_validate_macro_names() {
        let mut config = Config::default();
        config
            .math
            .macros
            .insert("RR".to_owned(), "\\mathbb{R}".to_owned());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));

        config.math.macros.clear();
        config
            .math
            .macros
            .insert("\\R2".to_owned(), "x".to_owned());
        assert!(config.validate().is_err());

        config.math.macros.clear();
        config
            .math
            .macros
            .insert("\\half".to_owned(), "\\frac{1}{2}".to_owned());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "[markdown]\nbreaks = false\n");

        let config = Config::load(Some(&path), None).unwrap();

        assert!(!config.markdown.breaks);
        assert_eq!(config.config_path, Some(path));
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");

        let err = Config::load(Some(&path), None).unwrap_err();

        assert!(matches!(err, ConfigError::NotFound(p) if p == path));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "[markdown\n");

        let err = Config::load(Some(&path), None).unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_runs_validation() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "[emoji]\nasset_base = \"emoji\"\n");

        let err = Config::load(Some(&path), None).unwrap_err();

        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_load_with_cli_settings() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "[math]\nenabled = true\n");
        let settings = CliSettings {
            math: Some(false),
            trust_diagram_payload: Some(false),
            ..Default::default()
        };

        let config = Config::load(Some(&path), Some(&settings)).unwrap();

        assert!(!config.math.enabled);
        assert!(!config.diagrams.trust_payload);
        // Unchanged
        assert!(config.emoji.enabled);
    }

    #[test]
    fn test_cli_settings_are_validated() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "");
        let settings = CliSettings {
            emoji_asset_base: Some(String::new()),
            ..Default::default()
        };

        let err = Config::load(Some(&path), Some(&settings)).unwrap_err();

        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_apply_cli_settings_empty() {
        let mut config = Config::default();
        config.apply_cli_settings(&CliSettings::default());
        assert_eq!(config.renderer_options(), RendererOptions::default());
    }

    #[test]
    fn test_apply_cli_settings_multiple() {
        let mut config = Config::default();
        let settings = CliSettings {
            html: Some(false),
            emoji: Some(false),
            line_numbers: Some(false),
            emoji_asset_base: Some("/static/emoji".to_owned()),
            ..Default::default()
        };

        config.apply_cli_settings(&settings);

        assert!(!config.markdown.html);
        assert!(!config.emoji.enabled);
        assert!(!config.highlight.line_numbers);
        assert_eq!(config.emoji.asset_base, "/static/emoji");
        assert!(config.math.enabled);
    }

    #[test]
    fn test_discover_in_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "");
        let nested = dir.path().join("docs/guide");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(discover_from(&nested), Some(path));
    }

    #[test]
    fn test_discover_prefers_nearest() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "");
        let nested = dir.path().join("sub");
        std::fs::create_dir_all(&nested).unwrap();
        let inner = write_config(&nested, "");

        assert_eq!(discover_from(&nested), Some(inner));
    }

    #[test]
    fn test_expand_env_vars_asset_base() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::set_var("SYNCMARK_TEST_CDN", "https://cdn.test.com");
        }

        let toml = r#"
[emoji]
asset_base = "${SYNCMARK_TEST_CDN}/twemoji"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.expand_env_vars().unwrap();

        assert_eq!(config.emoji.asset_base, "https://cdn.test.com/twemoji");

        unsafe {
            std::env::remove_var("SYNCMARK_TEST_CDN");
        }
    }

    #[test]
    fn test_expand_env_vars_default_value() {
        let toml = r#"
[emoji]
asset_base = "${SYNCMARK_TEST_UNSET_BASE:-/emoji}"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.expand_env_vars().unwrap();

        assert_eq!(config.emoji.asset_base, "/emoji");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let toml = r#"
[emoji]
asset_base = "${SYNCMARK_TEST_MISSING_BASE}"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        let err = config.expand_env_vars().unwrap_err();

        match err {
            ConfigError::EnvVar { field, message } => {
                assert_eq!(field, "emoji.asset_base");
                assert!(message.contains("SYNCMARK_TEST_MISSING_BASE"));
            }
            other => panic!("expected EnvVar error, got {other:?}"),
        }
    }
}
