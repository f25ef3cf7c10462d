//! Compiler configuration for extensibility.
//!
//! Mirrors the teacher's builder-pattern `CompilerConfig`, generalized
//! from Seq's runtime-builtin extension points to the handful of knobs a
//! preprocessor/parser front-end actually has: include search paths and
//! command-line macro defines/undefines.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A `-D name[=value]` from the command line, applied before the first
/// token of the main file is scanned.
#[derive(Debug, Clone)]
pub struct MacroDefine {
    pub name: String,
    pub value: Option<String>,
}

impl MacroDefine {
    /// Parse a `-D` argument's operand: `NAME`, or `NAME=VALUE`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        if spec.is_empty() {
            return Err("empty -D argument".to_string());
        }
        match spec.split_once('=') {
            Some((name, value)) => {
                validate_macro_name(name)?;
                Ok(MacroDefine { name: name.to_string(), value: Some(value.to_string()) })
            }
            None => {
                validate_macro_name(spec)?;
                Ok(MacroDefine { name: spec.to_string(), value: None })
            }
        }
    }
}

fn validate_macro_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return Err(format!("invalid macro name '{name}'")),
    }
    if chars.all(|c| c.is_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(format!("invalid macro name '{name}'"))
    }
}

/// Configuration for one translation-unit compile: search paths and
/// command-line macro state. Built with the same chained-method style the
/// teacher uses for its own `CompilerConfig`.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// `-I` paths, searched before the system include paths.
    pub user_include_paths: Vec<PathBuf>,
    /// Paths searched for `#include <...>` after user paths are exhausted.
    pub system_include_paths: Vec<PathBuf>,
    /// `-D` macros, applied in argument order.
    pub defines: Vec<MacroDefine>,
    /// `-U` macros, applied after all `-D`s per the usual command-line
    /// semantics (later `-U` always wins over an earlier `-D` of the same
    /// name).
    pub undefines: Vec<String>,
    /// `-E`: stop after preprocessing and emit the token stream as text.
    pub preprocess_only: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_user_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_include_paths.push(path.into());
        self
    }

    pub fn with_system_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.system_include_paths.push(path.into());
        self
    }

    pub fn with_define(mut self, define: MacroDefine) -> Self {
        self.defines.push(define);
        self
    }

    pub fn with_undefine(mut self, name: impl Into<String>) -> Self {
        self.undefines.push(name.into());
        self
    }

    pub fn preprocess_only(mut self, yes: bool) -> Self {
        self.preprocess_only = yes;
        self
    }

    /// Merge in a project-level `cfront.toml`, the way a build-system
    /// config file sets defaults that individual `-I`/`-D` flags then
    /// layer on top of. Fields absent from the file are left untouched.
    pub fn merge_toml(mut self, text: &str) -> Result<Self, String> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| format!("invalid config file: {e}"))?;
        for path in file.include_paths {
            self.user_include_paths.push(PathBuf::from(path));
        }
        for path in file.system_include_paths {
            self.system_include_paths.push(PathBuf::from(path));
        }
        for spec in file.defines {
            self.defines.push(MacroDefine::parse(&spec)?);
        }
        self.undefines.extend(file.undefines);
        Ok(self)
    }

    /// Load and merge a `cfront.toml` from disk.
    pub fn merge_toml_file(self, path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path).map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
        self.merge_toml(&text)
    }
}

/// The on-disk shape of `cfront.toml`; deserialized once and folded into
/// a `CompilerConfig` by `merge_toml`.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    include_paths: Vec<String>,
    system_include_paths: Vec<String>,
    defines: Vec<String>,
    undefines: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_only_define() {
        let d = MacroDefine::parse("DEBUG").unwrap();
        assert_eq!(d.name, "DEBUG");
        assert_eq!(d.value, None);
    }

    #[test]
    fn parses_name_equals_value_define() {
        let d = MacroDefine::parse("VERSION=3").unwrap();
        assert_eq!(d.name, "VERSION");
        assert_eq!(d.value.as_deref(), Some("3"));
    }

    #[test]
    fn rejects_invalid_macro_name() {
        assert!(MacroDefine::parse("1BAD").is_err());
        assert!(MacroDefine::parse("has space").is_err());
    }

    #[test]
    fn builder_accumulates_in_order() {
        let config = CompilerConfig::new()
            .with_user_include_path("/usr/local/include")
            .with_define(MacroDefine::parse("A=1").unwrap())
            .with_define(MacroDefine::parse("B").unwrap())
            .with_undefine("A");
        assert_eq!(config.user_include_paths, vec![PathBuf::from("/usr/local/include")]);
        assert_eq!(config.defines.len(), 2);
        assert_eq!(config.undefines, vec!["A".to_string()]);
    }

    #[test]
    fn merges_a_toml_config_file_on_top_of_existing_settings() {
        let toml = r#"
            include_paths = ["vendor/include"]
            defines = ["DEBUG", "LEVEL=2"]
            undefines = ["NDEBUG"]
        "#;
        let config = CompilerConfig::new()
            .with_user_include_path("local/include")
            .merge_toml(toml)
            .unwrap();
        assert_eq!(
            config.user_include_paths,
            vec![PathBuf::from("local/include"), PathBuf::from("vendor/include")]
        );
        assert_eq!(config.defines.len(), 2);
        assert_eq!(config.undefines, vec!["NDEBUG".to_string()]);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(CompilerConfig::new().merge_toml("not valid = = toml").is_err());
    }
}
