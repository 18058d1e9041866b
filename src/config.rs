use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use config::{Config, ValueKind};
use serde::Serialize;

use crate::action::Action;
use crate::error::ConfigError;
use crate::resource::{
    ClasspathResolver, DeduplicatingResolver, FilesystemResolver, ResourceResolver,
};

pub const KEY_ACTIVE: &str = "liquibase.active";
pub const KEY_CHANGELOG: &str = "liquibase.changelog";
pub const KEY_PROPERTIES: &str = "liquibase.properties";
pub const KEY_SCANNER: &str = "liquibase.scanner";
pub const KEY_CONTEXTS: &str = "liquibase.contexts";
pub const KEY_ACTIONS: &str = "liquibase.actions";
pub const KEY_CLASSPATH: &str = "liquibase.classpath";
pub const KEY_VALIDATE_FAILFAST: &str = "liquibase.validate.failfast";
pub const KEY_DB_URL: &str = "db.url";
pub const KEY_DB_USER: &str = "db.user";
pub const KEY_DB_PASS: &str = "db.pass";
pub const KEY_APP_PATH: &str = "application.path";
pub const KEY_TMP_DIR: &str = "application.tmpdir";

pub const DEFAULT_ACTIVE: &str = "false";
pub const DEFAULT_CHANGELOG: &str = "mainchangelog.xml";
pub const DEFAULT_PROPERTIES: &str = "liquibase.properties";
pub const DEFAULT_SCANNER: &str = "jar";
pub const DEFAULT_CLASSPATH: &str = "conf";
pub const DEFAULT_APP_PATH: &str = ".";

/// Prefix for environment overrides, e.g. `BOOTMIGRATE_LIQUIBASE__ACTIVE=true`
pub const ENV_PREFIX: &str = "BOOTMIGRATE";

/// Startup migration configuration: a flat map of dotted keys to string values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    values: HashMap<String, String>,
}

impl MigrationConfig {
    /// Create a configuration from already-flattened key/value pairs
    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Load configuration from a file and the environment
    ///
    /// Without an explicit path, `$HOME/.bootmigrate.toml` is used when it exists.
    /// Nested tables are flattened into dotted keys, so `[liquibase] active = true`
    /// becomes `liquibase.active`. Environment variables prefixed with `BOOTMIGRATE_`
    /// (sections separated by `__`) and the given overrides win over the file.
    pub fn load(path: Option<&str>, overrides: &[(String, String)]) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match path {
            Some(p) => {
                if !Path::new(p).exists() {
                    return Err(ConfigError::Source(format!(
                        "configuration file '{}' does not exist",
                        p
                    )));
                }
                builder = builder.add_source(config::File::with_name(p));
            }
            None => {
                if let Some(p) = Self::default_file_path() {
                    if p.exists() {
                        builder = builder.add_source(config::File::from(p));
                    }
                }
            }
        }

        // E.g., `BOOTMIGRATE_LIQUIBASE__ACTIONS=update` sets liquibase.actions
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        for (key, value) in overrides {
            builder = builder
                .set_override(key.as_str(), value.as_str())
                .map_err(|e| ConfigError::Source(format!("invalid override '{}': {}", key, e)))?;
        }

        let settings = builder
            .build()
            .map_err(|e| ConfigError::Source(format!("failed to build configuration: {}", e)))?;

        let tree = settings
            .try_deserialize::<HashMap<String, config::Value>>()
            .map_err(|e| {
                ConfigError::Source(format!("failed to deserialize configuration: {}", e))
            })?;

        let mut values = HashMap::new();
        for (key, value) in tree {
            flatten_into(&key, value.kind, &mut values);
        }

        Ok(Self { values })
    }

    /// Get the default config file path
    pub fn default_file_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".bootmigrate.toml"))
    }

    /// Raw lookup
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Lookup with a default
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Return a copy with one key replaced
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Validate the configuration into a plan
    ///
    /// Runs regardless of the active flag, so a broken configuration is reported even
    /// when migrations are switched off.
    pub fn plan(&self) -> Result<MigrationPlan, ConfigError> {
        let actions = self.get(KEY_ACTIONS).ok_or(ConfigError::MissingActions)?;
        let scan_mode = ScanMode::from_str(self.get_or(KEY_SCANNER, DEFAULT_SCANNER))?;
        let actions = Action::parse_list(actions)?;

        let contexts = self
            .get(KEY_CONTEXTS)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let application_path = PathBuf::from(self.get_or(KEY_APP_PATH, DEFAULT_APP_PATH));

        let classpath = self
            .get_or(KEY_CLASSPATH, DEFAULT_CLASSPATH)
            .split(',')
            .map(str::trim)
            .filter(|root| !root.is_empty())
            .map(|root| application_path.join(root))
            .collect();

        let status_dir = self
            .get(KEY_TMP_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Ok(MigrationPlan {
            active: is_truthy(self.get_or(KEY_ACTIVE, DEFAULT_ACTIVE)),
            changelog: self.get_or(KEY_CHANGELOG, DEFAULT_CHANGELOG).to_string(),
            properties: self.get_or(KEY_PROPERTIES, DEFAULT_PROPERTIES).to_string(),
            scan_mode,
            contexts,
            actions,
            connection: ConnectionSettings {
                url: self.get(KEY_DB_URL).map(str::to_string),
                user: self.get(KEY_DB_USER).map(str::to_string),
                password: self.get(KEY_DB_PASS).map(str::to_string),
            },
            application_path,
            classpath,
            status_dir,
            fail_on_validation: is_truthy(self.get_or(KEY_VALIDATE_FAILFAST, "false")),
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MigrationConfig {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Flag semantics: only a case-insensitive "true" is truthy
pub fn is_truthy(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

fn flatten_into(key: &str, kind: ValueKind, out: &mut HashMap<String, String>) {
    match kind {
        ValueKind::Table(table) => {
            for (child, value) in table {
                flatten_into(&format!("{}.{}", key, child), value.kind, out);
            }
        }
        ValueKind::Nil => {}
        ValueKind::Array(items) => {
            let joined: Vec<String> = items.into_iter().map(|v| v.kind.to_string()).collect();
            out.insert(key.to_string(), joined.join(","));
        }
        scalar => {
            out.insert(key.to_string(), scalar.to_string());
        }
    }
}

/// How changelog and properties resources are located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Search the classpath roots, collapsing duplicate matches
    Jar,
    /// Read from the application directory
    Src,
}

impl FromStr for ScanMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jar" => Ok(ScanMode::Jar),
            "src" => Ok(ScanMode::Src),
            other => Err(ConfigError::UnknownScanner(other.to_string())),
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Jar => write!(f, "jar"),
            ScanMode::Src => write!(f, "src"),
        }
    }
}

/// Database connection triple
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSettings {
    pub url: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl ConnectionSettings {
    /// `user @ url` for log lines; never includes the password
    pub fn display_target(&self) -> String {
        format!(
            "{} @ {}",
            self.user.as_deref().unwrap_or("<none>"),
            self.url.as_deref().unwrap_or("<none>")
        )
    }
}

/// Validated configuration for one startup run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub active: bool,
    pub changelog: String,
    pub properties: String,
    pub scan_mode: ScanMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts: Option<String>,
    pub actions: Vec<Action>,
    pub connection: ConnectionSettings,
    pub application_path: PathBuf,
    pub classpath: Vec<PathBuf>,
    pub status_dir: PathBuf,
    pub fail_on_validation: bool,
}

impl MigrationPlan {
    /// Build the resolver selected by the scan mode
    pub fn resolver(&self) -> Box<dyn ResourceResolver> {
        match self.scan_mode {
            ScanMode::Jar => Box::new(DeduplicatingResolver::new(ClasspathResolver::new(
                self.classpath.clone(),
            ))),
            ScanMode::Src => Box::new(FilesystemResolver::new(self.application_path.clone())),
        }
    }

    /// Display plan summary
    pub fn summary(&self) -> String {
        let actions: Vec<&str> = self.actions.iter().map(|a| a.name()).collect();
        let lines = [
            format!("Active:             {}", self.active),
            format!("Changelog:          {}", self.changelog),
            format!("Properties:         {}", self.properties),
            format!("Scanner:            {}", self.scan_mode),
            format!(
                "Contexts:           {}",
                self.contexts.as_deref().unwrap_or("<all>")
            ),
            format!("Actions:            {}", actions.join(", ")),
            format!("Database:           {}", self.connection.display_target()),
        ];
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> MigrationConfig {
        MigrationConfig::from_iter([(KEY_ACTIONS, "update")])
    }

    #[test]
    fn test_defaults() {
        let plan = base().plan().unwrap();
        assert!(!plan.active);
        assert_eq!(plan.changelog, "mainchangelog.xml");
        assert_eq!(plan.properties, "liquibase.properties");
        assert_eq!(plan.scan_mode, ScanMode::Jar);
        assert_eq!(plan.contexts, None);
        assert_eq!(plan.actions, vec![Action::Update]);
        assert_eq!(plan.classpath, vec![PathBuf::from("./conf")]);
        assert!(!plan.fail_on_validation);
    }

    #[test]
    fn test_missing_actions() {
        let config = MigrationConfig::from_iter([(KEY_ACTIVE, "true")]);
        assert_eq!(config.plan(), Err(ConfigError::MissingActions));
    }

    #[test]
    fn test_unknown_scanner() {
        for scanner in ["zip", "JAR", "", "source"] {
            let config = base().with(KEY_SCANNER, scanner);
            assert_eq!(
                config.plan(),
                Err(ConfigError::UnknownScanner(scanner.to_string()))
            );
        }
        assert_eq!(
            base().with(KEY_SCANNER, "src").plan().unwrap().scan_mode,
            ScanMode::Src
        );
    }

    #[test]
    fn test_active_flag() {
        for (value, expected) in [
            ("true", true),
            ("TRUE", true),
            ("True", true),
            ("false", false),
            ("yes", false),
            ("1", false),
            ("", false),
        ] {
            let plan = base().with(KEY_ACTIVE, value).plan().unwrap();
            assert_eq!(plan.active, expected, "active = {:?}", value);
        }
    }

    #[test]
    fn test_blank_contexts_is_none() {
        let plan = base().with(KEY_CONTEXTS, "   ").plan().unwrap();
        assert_eq!(plan.contexts, None);

        let plan = base().with(KEY_CONTEXTS, " dev,test ").plan().unwrap();
        assert_eq!(plan.contexts.as_deref(), Some("dev,test"));
    }

    #[test]
    fn test_classpath_roots_follow_application_path() {
        let plan = base()
            .with(KEY_APP_PATH, "/srv/app")
            .with(KEY_CLASSPATH, "conf, lib/migrations,/opt/shared")
            .plan()
            .unwrap();
        assert_eq!(
            plan.classpath,
            vec![
                PathBuf::from("/srv/app/conf"),
                PathBuf::from("/srv/app/lib/migrations"),
                PathBuf::from("/opt/shared"),
            ]
        );
    }

    #[test]
    fn test_load_flattens_nested_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(
            &path,
            r#"
[db]
url = "sqlite::memory:"

[liquibase]
active = true
actions = "validate,update"
"#,
        )
        .unwrap();

        let overrides = vec![(KEY_CONTEXTS.to_string(), "dev".to_string())];
        let config = MigrationConfig::load(path.to_str(), &overrides).unwrap();
        assert_eq!(config.get(KEY_DB_URL), Some("sqlite::memory:"));
        assert_eq!(config.get(KEY_ACTIVE), Some("true"));
        assert_eq!(config.get(KEY_CONTEXTS), Some("dev"));

        let plan = config.plan().unwrap();
        assert!(plan.active);
        assert_eq!(plan.actions, vec![Action::Validate, Action::Update]);
    }

    #[test]
    fn test_load_missing_file() {
        let result = MigrationConfig::load(Some("/nonexistent/bootmigrate.toml"), &[]);
        assert!(matches!(result, Err(ConfigError::Source(_))));
    }

    #[test]
    fn test_password_not_in_summary() {
        let plan = base()
            .with(KEY_DB_URL, "sqlite:app.db")
            .with(KEY_DB_USER, "sa")
            .with(KEY_DB_PASS, "secret")
            .plan()
            .unwrap();
        assert!(!plan.summary().contains("secret"));
        assert!(!serde_json::to_string(&plan).unwrap().contains("secret"));
        assert_eq!(plan.connection.display_target(), "sa @ sqlite:app.db");
    }
}
