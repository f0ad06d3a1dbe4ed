//! Command and filesystem permission policy.
//!
//! The policy is assembled once at startup (from the baseline seed or from
//! configuration) and never mutated afterwards, so the router and the
//! capability handlers read it without locking. Two grant shapes coexist:
//! flat allow/deny sets of full command identifiers, and namespace-scoped
//! grants keyed by the bare namespace (`fs` admits the whole `fs:*` family,
//! optionally restricted to named sub-commands).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use crate::config::PermissionsConfig;

/// Commands granted out of the box. Data, not code: configuration replaces
/// the whole seed when a `permissions` block is present.
pub const BASELINE_ALLOW_COMMANDS: &[&str] = &["silk:ping", "silk:appInfo"];

/// Built-in capability namespaces granted out of the box.
pub const BASELINE_NAMESPACES: &[&str] = &["fs", "clipboard", "dialog", "shell", "window", "app"];

/// Which root list a path check consults.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathAccess {
    Read,
    Write,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct NamespaceGrant {
    /// Empty means every sub-command in the namespace is admitted.
    commands: BTreeSet<String>,
}

/// Immutable permission policy consulted on every dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct PermissionPolicy {
    allow: BTreeSet<String>,
    deny: BTreeSet<String>,
    namespaces: BTreeMap<String, NamespaceGrant>,
    fs_read_roots: Vec<PathBuf>,
    fs_write_roots: Vec<PathBuf>,
    shell_allow_programs: BTreeSet<String>,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::baseline()
    }
}

impl PermissionPolicy {
    /// The built-in seed policy.
    pub fn baseline() -> Self {
        let mut policy = Self::empty();
        for cmd in BASELINE_ALLOW_COMMANDS {
            policy.allow.insert((*cmd).to_string());
        }
        for ns in BASELINE_NAMESPACES {
            policy.namespaces.insert((*ns).to_string(), NamespaceGrant::default());
        }
        policy
    }

    /// A policy that denies every command and scopes no paths.
    pub fn empty() -> Self {
        Self {
            allow: BTreeSet::new(),
            deny: BTreeSet::new(),
            namespaces: BTreeMap::new(),
            fs_read_roots: Vec::new(),
            fs_write_roots: Vec::new(),
            shell_allow_programs: BTreeSet::new(),
        }
    }

    /// Builds the policy a `permissions` configuration block describes,
    /// discarding the baseline seed. Bare entries in `allow_commands` (no
    /// `:` or `/`) become whole-namespace grants; qualified entries become
    /// exact allows.
    pub fn from_config(config: &PermissionsConfig) -> Self {
        let mut policy = Self::empty();
        for entry in &config.allow_commands {
            if entry.contains(':') || entry.contains('/') {
                policy.allow.insert(entry.clone());
            } else {
                policy.namespaces.insert(entry.clone(), NamespaceGrant::default());
            }
        }
        for entry in &config.deny_commands {
            policy.deny.insert(entry.clone());
        }
        policy.fs_read_roots = config.fs.read_roots.clone();
        policy.fs_write_roots = config.fs.write_roots.clone();
        for program in &config.shell.allow_programs {
            policy.shell_allow_programs.insert(program.clone());
        }
        policy
    }

    /// Adds an exact command to the allow set.
    pub fn allow_command(&mut self, cmd: impl Into<String>) -> &mut Self {
        self.allow.insert(cmd.into());
        self
    }

    /// Adds an exact command to the deny set. Deny wins over every grant.
    pub fn deny_command(&mut self, cmd: impl Into<String>) -> &mut Self {
        self.deny.insert(cmd.into());
        self
    }

    /// Grants a namespace, optionally restricted to named sub-commands. An
    /// empty restriction list admits the whole family.
    pub fn allow_namespace<I, S>(&mut self, namespace: impl Into<String>, commands: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let grant = NamespaceGrant {
            commands: commands.into_iter().map(Into::into).collect(),
        };
        self.namespaces.insert(namespace.into(), grant);
        self
    }

    pub fn set_fs_read_roots(&mut self, roots: Vec<PathBuf>) -> &mut Self {
        self.fs_read_roots = roots;
        self
    }

    pub fn set_fs_write_roots(&mut self, roots: Vec<PathBuf>) -> &mut Self {
        self.fs_write_roots = roots;
        self
    }

    pub fn allow_program(&mut self, program: impl Into<String>) -> &mut Self {
        self.shell_allow_programs.insert(program.into());
        self
    }

    /// Whether `cmd` is permitted as a full identifier: deny first, then the
    /// exact allow set, then the namespace grant for the prefix up to the
    /// first `:`.
    pub fn allows(&self, cmd: &str) -> bool {
        if self.deny.contains(cmd) {
            return false;
        }
        if self.allow.contains(cmd) {
            return true;
        }
        if let Some((namespace, rest)) = cmd.split_once(':') {
            if self.deny.contains(namespace) {
                return false;
            }
            if let Some(grant) = self.namespaces.get(namespace) {
                return grant.commands.is_empty() || grant.commands.contains(rest);
            }
        }
        false
    }

    /// Router-facing check for a route registered under `permission_key`.
    ///
    /// The invoked command may be namespaced differently from the key (e.g.
    /// `silk:fs/readText` under key `fs`), so the key-scoped form
    /// `<key>:<sub-command>` is consulted alongside both raw identifiers.
    pub fn allows_route(&self, permission_key: &str, cmd: &str) -> bool {
        let sub = sub_command(cmd);
        let scoped = format!("{permission_key}:{sub}");
        if self.deny.contains(cmd) || self.deny.contains(&scoped) || self.deny.contains(permission_key)
        {
            return false;
        }
        if self.allow.contains(cmd) || self.allow.contains(&scoped) || self.allow.contains(permission_key)
        {
            return true;
        }
        match self.namespaces.get(permission_key) {
            Some(grant) => grant.commands.is_empty() || grant.commands.contains(sub),
            None => false,
        }
    }

    /// Whether `path` falls under one of the configured roots for `access`.
    /// An empty root list permits everything. Containment is decided on
    /// canonical absolute forms, component by component, so `/foo` never
    /// admits `/foobar`.
    pub fn allows_path(&self, path: &Path, access: PathAccess) -> bool {
        let roots = match access {
            PathAccess::Read => &self.fs_read_roots,
            PathAccess::Write => &self.fs_write_roots,
        };
        if roots.is_empty() {
            return true;
        }
        let resolved = resolve_path(path);
        roots
            .iter()
            .any(|root| resolved.starts_with(resolve_path(root)))
    }

    /// Whether `name` may be spawned. An empty allow set permits everything.
    pub fn allows_program(&self, name: &str) -> bool {
        self.shell_allow_programs.is_empty() || self.shell_allow_programs.contains(name)
    }
}

/// The text after the last `:` or `/` separator, or the whole identifier.
fn sub_command(cmd: &str) -> &str {
    cmd.rsplit([':', '/']).next().unwrap_or(cmd)
}

/// Canonicalizes when the path exists; a not-yet-created leaf resolves via
/// its canonicalized parent, and anything else lexically against the current
/// directory, so scope checks on pending paths still hold.
fn resolve_path(path: &Path) -> PathBuf {
    let absolute = lexical_absolute(path);
    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
        if let Ok(canonical_parent) = std::fs::canonicalize(parent) {
            return canonical_parent.join(name);
        }
    }
    absolute
}

fn lexical_absolute(path: &Path) -> PathBuf {
    let mut resolved = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };
    for component in path.components() {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => resolved.push(other),
        }
    }
    resolved
}
