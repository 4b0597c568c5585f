//! Run configuration
//!
//! The configuration file has the layout the interactive config builder writes
//! (`features`, `target`, `model_params`, `post_params`, `pre_params`) plus an
//! optional `export` table for compiler options. It is read from JSON or TOML,
//! overridden from the environment, and resolved once into an immutable
//! [`ExportConfig`].

use crate::dialect::Dialect;
use crate::errors::{ExportError, Result};
use glassbox_model::{FileType, ModelParams};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::{debug, info};

pub const ENV_SQL_SPLIT: &str = "GLASSBOX_SQL_SPLIT";
pub const ENV_CALIBRATION: &str = "GLASSBOX_CALIBRATION";
pub const ENV_SQL_DIALECT: &str = "GLASSBOX_SQL_DIALECT";

pub const DEFAULT_INPUT_TABLE: &str = "input_data";
pub const DEFAULT_STAGE_PREFIX: &str = "glassbox";

/// Post-training options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostParams {
    /// `"false"` or a calibration method name
    #[serde(default)]
    pub calibration: Option<JsonValue>,
    #[serde(default)]
    pub sql_split: Option<JsonValue>,
    /// Consumed by the plotting collaborator only
    #[serde(default)]
    pub file_type: Option<String>,
}

/// Pre-processing options, consumed by the training collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreParamsFile {
    #[serde(default)]
    pub cv_type: Option<String>,
    #[serde(default)]
    pub max_rows: Option<u64>,
    #[serde(default)]
    pub time_sensitive_column: Option<String>,
    #[serde(default)]
    pub upsampling: Option<JsonValue>,
}

/// Compiler options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportSection {
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default)]
    pub input_table: Option<String>,
    #[serde(default)]
    pub stage_prefix: Option<String>,
}

/// Configuration file as written on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub model_params: ModelParams,
    #[serde(default)]
    pub post_params: PostParams,
    #[serde(default)]
    pub pre_params: PreParamsFile,
    #[serde(default)]
    pub export: ExportSection,
}

impl ConfigFile {
    /// Parse a file, choosing TOML for `.toml` and JSON otherwise
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("toml"));
        if is_toml {
            Ok(toml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }
}

/// Resolved pre-processing options
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreParams {
    pub cv_type: Option<String>,
    pub max_rows: Option<u64>,
    /// `None` when unset or the `_` placeholder
    pub time_sensitive_column: Option<String>,
    pub upsampling: bool,
}

/// Immutable build configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// Calibration method name; `None` when calibration is off
    pub calibration: Option<String>,
    /// Staged packaging when true
    pub split: bool,
    pub dialect: Dialect,
    pub input_table: String,
    pub stage_prefix: String,
    pub file_type: FileType,
    pub features: Vec<String>,
    pub target: Option<String>,
    pub model_params: ModelParams,
    pub pre_params: PreParams,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            calibration: None,
            split: false,
            dialect: Dialect::default(),
            input_table: DEFAULT_INPUT_TABLE.to_string(),
            stage_prefix: DEFAULT_STAGE_PREFIX.to_string(),
            file_type: FileType::default(),
            features: Vec::new(),
            target: None,
            model_params: ModelParams::new(),
            pre_params: PreParams::default(),
        }
    }
}

impl ExportConfig {
    /// Load a configuration file and apply process environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = ConfigFile::load(path)?;
        Self::resolve(file, &|key| std::env::var(key).ok())
    }

    /// Resolve a parsed file, consulting `env` for overrides
    pub fn resolve(file: ConfigFile, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mut split = match &file.post_params.sql_split {
            Some(value) => parse_flag("post_params.sql_split", value)?,
            None => false,
        };
        let mut calibration = match &file.post_params.calibration {
            Some(value) => parse_calibration("post_params.calibration", value)?,
            None => None,
        };
        let mut dialect = match &file.export.dialect {
            Some(name) => name.parse()?,
            None => Dialect::default(),
        };

        if let Some(val) = env(ENV_SQL_SPLIT) {
            split = parse_flag(ENV_SQL_SPLIT, &JsonValue::String(val))?;
            debug!("{} override: split={}", ENV_SQL_SPLIT, split);
        }
        if let Some(val) = env(ENV_CALIBRATION) {
            calibration = parse_calibration(ENV_CALIBRATION, &JsonValue::String(val))?;
            debug!("{} override: calibration={:?}", ENV_CALIBRATION, calibration);
        }
        if let Some(val) = env(ENV_SQL_DIALECT) {
            dialect = val.parse()?;
            debug!("{} override: dialect={}", ENV_SQL_DIALECT, dialect);
        }

        let file_type = match &file.post_params.file_type {
            Some(name) => name.parse::<FileType>().map_err(|_| {
                ExportError::InvalidConfig(format!("post_params.file_type: unsupported plot file type '{name}'"))
            })?,
            None => FileType::default(),
        };
        let input_table = non_empty("export.input_table", file.export.input_table, DEFAULT_INPUT_TABLE)?;
        let stage_prefix = non_empty("export.stage_prefix", file.export.stage_prefix, DEFAULT_STAGE_PREFIX)?;

        let pre = file.pre_params;
        let pre_params = PreParams {
            cv_type: pre.cv_type,
            max_rows: pre.max_rows,
            time_sensitive_column: pre
                .time_sensitive_column
                .filter(|c| !c.trim().is_empty() && c.trim() != "_"),
            upsampling: match &pre.upsampling {
                Some(value) => parse_flag("pre_params.upsampling", value)?,
                None => false,
            },
        };

        Ok(Self {
            calibration,
            split,
            dialect,
            input_table,
            stage_prefix,
            file_type,
            features: file.features,
            target: file.target,
            model_params: file.model_params,
            pre_params,
        })
    }

    pub fn calibration_enabled(&self) -> bool {
        self.calibration.is_some()
    }
}

fn non_empty(key: &str, value: Option<String>, default: &str) -> Result<String> {
    match value {
        None => Ok(default.to_string()),
        Some(v) if v.trim().is_empty() => Err(ExportError::InvalidConfig(format!("{key} must not be empty"))),
        Some(v) => Ok(v),
    }
}

/// `"true"`/`"false"` in any ASCII case with surrounding whitespace, or a JSON boolean
pub fn parse_flag(key: &str, value: &JsonValue) -> Result<bool> {
    match value {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
        JsonValue::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
        other => Err(ExportError::UnsupportedSplitConfiguration {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}

/// `"false"` (or JSON `false`/null) disables calibration; any other text names a method
pub fn parse_calibration(key: &str, value: &JsonValue) -> Result<Option<String>> {
    match value {
        JsonValue::Null | JsonValue::Bool(false) => Ok(None),
        JsonValue::String(s) => {
            let method = s.trim();
            if method.eq_ignore_ascii_case("false") {
                Ok(None)
            } else if method.is_empty() {
                Err(ExportError::InvalidConfig(format!("{key} names no calibration method")))
            } else {
                Ok(Some(method.to_string()))
            }
        }
        other => Err(ExportError::UnsupportedSplitConfiguration {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn from_json(value: JsonValue) -> ConfigFile {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_builder_layout() {
        let file = from_json(json!({
            "features": ["age", "income"],
            "model_params": {"max_bins": "256"},
            "post_params": {"calibration": "false", "sql_split": "true", "file_type": "html"},
            "pre_params": {
                "cv_type": "notimeseriesplit",
                "max_rows": 100000,
                "time_sensitive_column": "_",
                "upsampling": "false"
            },
            "target": "default"
        }));
        let config = ExportConfig::resolve(file, &no_env).unwrap();

        assert!(config.split);
        assert_eq!(config.calibration, None);
        assert_eq!(config.file_type, FileType::Html);
        assert_eq!(config.dialect, Dialect::DuckDb);
        assert_eq!(config.input_table, "input_data");
        assert_eq!(config.features, vec!["age", "income"]);
        assert_eq!(config.target.as_deref(), Some("default"));
        assert_eq!(config.pre_params.max_rows, Some(100_000));
        assert_eq!(config.pre_params.time_sensitive_column, None);
        assert!(!config.pre_params.upsampling);
        assert_eq!(config.model_params["max_bins"], json!("256"));
    }

    #[test]
    fn test_flag_values() {
        for (raw, expected) in [
            (json!("true"), true),
            (json!(" TRUE "), true),
            (json!("False"), false),
            (json!(true), true),
            (json!(false), false),
        ] {
            assert_eq!(parse_flag("sql_split", &raw).unwrap(), expected, "{raw}");
        }
        for raw in [json!("yes"), json!("1"), json!(1), json!(""), json!(null)] {
            assert!(matches!(
                parse_flag("sql_split", &raw),
                Err(ExportError::UnsupportedSplitConfiguration { .. })
            ));
        }
    }

    #[test]
    fn test_calibration_values() {
        assert_eq!(parse_calibration("c", &json!("false")).unwrap(), None);
        assert_eq!(parse_calibration("c", &json!(" FALSE ")).unwrap(), None);
        assert_eq!(parse_calibration("c", &json!("isotonic")).unwrap().as_deref(), Some("isotonic"));
        assert!(matches!(parse_calibration("c", &json!("  ")), Err(ExportError::InvalidConfig(_))));
        assert!(parse_calibration("c", &json!(true)).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let file = from_json(json!({"post_params": {"sql_split": "false"}}));
        let env = |key: &str| match key {
            ENV_SQL_SPLIT => Some("true".to_string()),
            ENV_CALIBRATION => Some("sigmoid".to_string()),
            ENV_SQL_DIALECT => Some("sqlite".to_string()),
            _ => None,
        };
        let config = ExportConfig::resolve(file, &env).unwrap();
        assert!(config.split);
        assert_eq!(config.calibration.as_deref(), Some("sigmoid"));
        assert_eq!(config.dialect, Dialect::Sqlite);

        let bad = |key: &str| (key == ENV_SQL_SPLIT).then(|| "maybe".to_string());
        assert!(ExportConfig::resolve(ConfigFile::default(), &bad).is_err());
    }

    #[test]
    fn test_invalid_export_section() {
        let file = from_json(json!({"export": {"dialect": "oracle"}}));
        assert!(matches!(
            ExportConfig::resolve(file, &no_env),
            Err(ExportError::InvalidConfig(_))
        ));
        let file = from_json(json!({"export": {"input_table": " "}}));
        assert!(ExportConfig::resolve(file, &no_env).is_err());
    }

    #[test]
    fn test_unknown_file_type() {
        let file = from_json(json!({"post_params": {"file_type": "pdf"}}));
        assert!(matches!(
            ExportConfig::resolve(file, &no_env),
            Err(ExportError::InvalidConfig(ref m)) if m.contains("'pdf'")
        ));
        let file = from_json(json!({"post_params": {"file_type": " PNG "}}));
        assert_eq!(ExportConfig::resolve(file, &no_env).unwrap().file_type, FileType::Png);
    }

    #[test]
    fn test_load_json_and_toml() {
        let dir = tempdir().unwrap();

        let json_path = dir.path().join("config.json");
        std::fs::write(&json_path, r#"{"post_params": {"sql_split": "true"}}"#).unwrap();
        let file = ConfigFile::load(&json_path).unwrap();
        assert!(ExportConfig::resolve(file, &no_env).unwrap().split);

        let toml_path = dir.path().join("config.toml");
        std::fs::write(
            &toml_path,
            "features = [\"age\"]\n\n[post_params]\nsql_split = true\ncalibration = \"isotonic\"\n\n[export]\ndialect = \"sqlite\"\nstage_prefix = \"scoring\"\n",
        )
        .unwrap();
        let file = ConfigFile::load(&toml_path).unwrap();
        let config = ExportConfig::resolve(file, &no_env).unwrap();
        assert!(config.split);
        assert_eq!(config.calibration.as_deref(), Some("isotonic"));
        assert_eq!(config.dialect, Dialect::Sqlite);
        assert_eq!(config.stage_prefix, "scoring");
    }
}
