//! Runtime configuration types.
//!
//! The core consumes a parsed configuration value; discovering and reading
//! the file belongs to the embedding application. [`RuntimeConfig::from_toml_str`]
//! covers the common case of a TOML snippet with `permissions` and `mode_a`
//! blocks.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::RuntimeError;

/// Top-level configuration recognized by the IPC core.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// When present, replaces the baseline permission seed wholesale.
    #[serde(default)]
    pub permissions: Option<PermissionsConfig>,
    /// External handler bridge ("Mode A") settings.
    #[serde(default)]
    pub mode_a: ModeAConfig,
}

impl RuntimeConfig {
    /// Parses a configuration document from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, RuntimeError> {
        Ok(toml::from_str(raw)?)
    }
}

/// The `permissions` block.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PermissionsConfig {
    /// Exact command identifiers, or bare namespaces granting a whole family.
    #[serde(default)]
    pub allow_commands: Vec<String>,
    /// Identifiers denied regardless of any grant.
    #[serde(default)]
    pub deny_commands: Vec<String>,
    #[serde(default)]
    pub fs: FsScopeConfig,
    #[serde(default)]
    pub shell: ShellScopeConfig,
}

/// Filesystem scoping under `permissions.fs`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct FsScopeConfig {
    #[serde(default)]
    pub read_roots: Vec<PathBuf>,
    #[serde(default)]
    pub write_roots: Vec<PathBuf>,
}

/// Shell scoping under `permissions.shell`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ShellScopeConfig {
    #[serde(default)]
    pub allow_programs: Vec<String>,
}

/// The `mode_a` block: whether the external handler bridge runs, and the
/// command vector of the host process.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ModeAConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub argv: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_document() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [permissions]
            allow_commands = ["silk:ping", "ts"]
            deny_commands = ["fs:removeFile"]

            [permissions.fs]
            read_roots = ["/srv/app"]
            write_roots = ["/srv/app/out"]

            [permissions.shell]
            allow_programs = ["git"]

            [mode_a]
            enabled = true
            argv = ["deno", "run", "host.ts"]
            "#,
        )
        .unwrap();

        let permissions = config.permissions.unwrap();
        assert_eq!(permissions.allow_commands, ["silk:ping", "ts"]);
        assert_eq!(permissions.deny_commands, ["fs:removeFile"]);
        assert_eq!(permissions.fs.read_roots, [PathBuf::from("/srv/app")]);
        assert_eq!(permissions.fs.write_roots, [PathBuf::from("/srv/app/out")]);
        assert_eq!(permissions.shell.allow_programs, ["git"]);
        assert!(config.mode_a.enabled);
        assert_eq!(config.mode_a.argv, ["deno", "run", "host.ts"]);
    }

    #[test]
    fn every_block_is_optional() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config.permissions, None);
        assert!(!config.mode_a.enabled);
        assert!(config.mode_a.argv.is_empty());
    }

    #[test]
    fn partial_permissions_fill_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [permissions]
            deny_commands = ["shell:spawn"]
            "#,
        )
        .unwrap();
        let permissions = config.permissions.unwrap();
        assert!(permissions.allow_commands.is_empty());
        assert_eq!(permissions.deny_commands, ["shell:spawn"]);
        assert!(permissions.fs.read_roots.is_empty());
    }

    #[test]
    fn malformed_documents_surface_a_parse_error() {
        let err = RuntimeConfig::from_toml_str("mode_a = 3").unwrap_err();
        assert!(matches!(err, RuntimeError::ConfigParse(_)));
    }
}
