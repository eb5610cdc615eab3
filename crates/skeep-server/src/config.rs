//! Configuration loading and resolution.
//!
//! The config file is TOML read into a two-level `section.key -> value`
//! map: top-level keys form the default section, tables form named
//! sections. Values may reference other values with `$(section.key)` or
//! `$(key)` and may invoke a declared dynamic hook with `hook:<name>`;
//! both are resolved before any option is read. Octal options
//! (`server.socket_mode`, `storage.umask`) are quoted strings, e.g.
//! `"0660"`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use skeep_keys::token::TokenSpec;
use zeroize::Zeroizing;

pub const DEFAULT_SECTION: &str = "default";

/// Substitution passes before a remaining `$(...)` is declared a cycle.
const MAX_RESOLVE_PASSES: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(String),

    #[error("missing required option '{0}'")]
    Missing(String),

    #[error("invalid value for '{option}': {reason}")]
    Invalid { option: String, reason: String },

    #[error("unresolvable reference '$({0})'")]
    UnresolvedReference(String),

    #[error("unknown config hook '{0}'")]
    UnknownHook(String),
}

/// Context handed to dynamic hooks when they run.
pub struct HookContext {
    pub config_path: PathBuf,
}

type Hook = fn(&HookContext) -> String;

/// The declared set of dynamic config values. The original design allowed
/// arbitrary code in config; here only named hooks exist and an unknown
/// name fails the load.
pub struct HookRegistry {
    hooks: BTreeMap<&'static str, Hook>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        let mut hooks: BTreeMap<&'static str, Hook> = BTreeMap::new();
        hooks.insert("config_basename", |ctx| {
            ctx.config_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "skeepd".to_string())
        });
        hooks.insert("process_id", |_| std::process::id().to_string());
        HookRegistry { hooks }
    }
}

impl HookRegistry {
    fn run(&self, name: &str, ctx: &HookContext) -> Result<String, ConfigError> {
        match self.hooks.get(name) {
            Some(hook) => Ok(hook(ctx)),
            None => Err(ConfigError::UnknownHook(name.to_string())),
        }
    }
}

/// The two-level map, post-parse but strategy-agnostic. `resolve` must run
/// before values are read.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawConfig {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl RawConfig {
    pub fn from_file(path: &Path) -> Result<RawConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<RawConfig, ConfigError> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;

        let mut config = RawConfig::default();
        for (key, value) in table {
            match value {
                toml::Value::Table(inner) => {
                    let section = config.sections.entry(key.clone()).or_default();
                    for (inner_key, inner_value) in inner {
                        section.insert(
                            inner_key.clone(),
                            scalar_to_string(&format!("{key}.{inner_key}"), &inner_value)?,
                        );
                    }
                }
                other => {
                    config
                        .sections
                        .entry(DEFAULT_SECTION.to_string())
                        .or_default()
                        .insert(key.clone(), scalar_to_string(&key, &other)?);
                }
            }
        }
        Ok(config)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    /// Run hooks, then substitute `$(...)` references until a fixed point.
    /// A reference that never resolves (unknown target or a cycle) is an
    /// error, not a silently retained literal.
    pub fn resolve(&mut self, registry: &HookRegistry, ctx: &HookContext) -> Result<(), ConfigError> {
        for section in self.sections.values_mut() {
            for value in section.values_mut() {
                let hook = value.strip_prefix("hook:").map(|name| name.trim().to_string());
                if let Some(name) = hook {
                    *value = registry.run(&name, ctx)?;
                }
            }
        }

        for _ in 0..MAX_RESOLVE_PASSES {
            let snapshot = self.sections.clone();
            let mut changed = false;

            for section in self.sections.values_mut() {
                for value in section.values_mut() {
                    let substituted = substitute(value, &snapshot)?;
                    if substituted != *value {
                        *value = substituted;
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        for section in self.sections.values() {
            for value in section.values() {
                if let Some(reference) = find_reference(value) {
                    return Err(ConfigError::UnresolvedReference(reference.to_string()));
                }
            }
        }
        Ok(())
    }
}

fn scalar_to_string(option: &str, value: &toml::Value) -> Result<String, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(scalar_to_string(option, item)?);
            }
            Ok(parts.join(", "))
        }
        toml::Value::Datetime(_) | toml::Value::Table(_) => Err(ConfigError::Invalid {
            option: option.to_string(),
            reason: "expected a scalar or a flat list".to_string(),
        }),
    }
}

fn find_reference(value: &str) -> Option<&str> {
    let start = value.find("$(")?;
    let end = value[start..].find(')')?;
    Some(&value[start + 2..start + end])
}

/// Replace every `$(...)` in `value` with its target from `snapshot`.
/// Targets substituted this pass may themselves still contain references;
/// the caller iterates.
fn substitute(
    value: &str,
    snapshot: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<String, ConfigError> {
    let mut out = value.to_string();

    // Bounded so a cycle (a -> b -> a) cannot spin here; whatever is left
    // unresolved is caught by the caller's fixed-point check.
    for _ in 0..MAX_RESOLVE_PASSES {
        let Some(reference) = find_reference(&out).map(str::to_string) else {
            break;
        };
        let (section, key) = match reference.split_once('.') {
            Some((section, key)) => (section, key),
            None => (DEFAULT_SECTION, reference.as_str()),
        };
        let target = snapshot
            .get(section)
            .and_then(|s| s.get(key))
            .ok_or_else(|| ConfigError::UnresolvedReference(reference.clone()))?;

        out = out.replacen(&format!("$({reference})"), target, 1);
    }

    Ok(out)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CacheStrategy {
    Preload,
    Memcache,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LogTarget {
    Console,
    Syslog,
}

/// Typed view of a resolved config.
#[derive(Debug, Clone)]
pub struct Settings {
    pub namespace: String,
    pub cache_strategy: CacheStrategy,
    pub log: LogTarget,
    pub tokens: Vec<TokenSpec>,
    pub socket_file: PathBuf,
    pub socket_mode: u32,
    pub max_servers: usize,
    pub pid_file: PathBuf,
    pub user: Option<String>,
    pub group: Option<String>,
    pub storage_dir: PathBuf,
    pub storage_umask: Option<u32>,
    pub memcache_servers: Vec<String>,
    pub access_read: bool,
    pub access_write: bool,
}

impl Settings {
    pub fn from_config(raw: &RawConfig, config_path: &Path) -> Result<Settings, ConfigError> {
        let namespace = match raw.get(DEFAULT_SECTION, "namespace") {
            Some(ns) => ns.to_string(),
            None => config_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "skeepd".to_string()),
        };

        let cache_strategy = match raw.get(DEFAULT_SECTION, "cache_strategy").unwrap_or("preload") {
            "preload" => CacheStrategy::Preload,
            "memcache" => CacheStrategy::Memcache,
            other => {
                return Err(ConfigError::Invalid {
                    option: "cache_strategy".to_string(),
                    reason: format!("'{other}' is not 'preload' or 'memcache'"),
                });
            }
        };

        let log = match raw.get(DEFAULT_SECTION, "log").unwrap_or("console") {
            "console" => LogTarget::Console,
            "syslog" => LogTarget::Syslog,
            other => {
                return Err(ConfigError::Invalid {
                    option: "log".to_string(),
                    reason: format!("'{other}' is not 'console' or 'syslog'"),
                });
            }
        };

        let socket_file = PathBuf::from(
            raw.get("server", "socket_file")
                .ok_or_else(|| ConfigError::Missing("server.socket_file".to_string()))?,
        );

        let socket_mode = match raw.get("server", "socket_mode") {
            Some(mode) => parse_octal("server.socket_mode", mode)?,
            None => 0o660,
        };

        let max_servers = match raw.get("server", "max_servers") {
            Some(n) => n.parse::<usize>().ok().filter(|&n| n > 0).ok_or_else(|| {
                ConfigError::Invalid {
                    option: "server.max_servers".to_string(),
                    reason: format!("'{n}' is not a positive integer"),
                }
            })?,
            None => default_max_servers(),
        };

        let pid_file = match raw.get("server", "pid_file") {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(format!("{}.pid", socket_file.display())),
        };

        let storage_dir = PathBuf::from(
            raw.get("storage", "dir")
                .ok_or_else(|| ConfigError::Missing("storage.dir".to_string()))?,
        );

        let storage_umask = raw
            .get("storage", "umask")
            .map(|mask| parse_octal("storage.umask", mask))
            .transpose()?;

        let memcache_servers = raw
            .get("memcache", "servers")
            .map(split_list)
            .unwrap_or_default();
        if cache_strategy == CacheStrategy::Memcache && memcache_servers.is_empty() {
            return Err(ConfigError::Missing("memcache.servers".to_string()));
        }

        let access_read = match raw.get("access", "read") {
            Some(v) => parse_bool("access.read", v)?,
            None => true,
        };
        let access_write = match raw.get("access", "write") {
            Some(v) => parse_bool("access.write", v)?,
            None => true,
        };

        Ok(Settings {
            namespace,
            cache_strategy,
            log,
            tokens: token_specs(raw)?,
            socket_file,
            socket_mode,
            max_servers,
            pid_file,
            user: raw.get("server", "user").map(str::to_string),
            group: raw.get("server", "group").map(str::to_string),
            storage_dir,
            storage_umask,
            memcache_servers,
            access_read,
            access_write,
        })
    }
}

fn token_specs(raw: &RawConfig) -> Result<Vec<TokenSpec>, ConfigError> {
    let names = raw
        .get("crypto", "token")
        .ok_or_else(|| ConfigError::Missing("crypto.token".to_string()))?;

    let base_dir = raw.get("crypto", "base_dir").map(PathBuf::from);

    let mut specs = Vec::new();
    for name in split_list(names) {
        let section = raw
            .section(&name)
            .ok_or_else(|| ConfigError::Missing(format!("[{name}] token section")))?;

        let certificate = section
            .get("certificate")
            .ok_or_else(|| ConfigError::Missing(format!("{name}.certificate")))?;
        let key = section
            .get("key")
            .ok_or_else(|| ConfigError::Missing(format!("{name}.key")))?;

        specs.push(TokenSpec {
            name: name.clone(),
            certificate: anchored(base_dir.as_deref(), certificate),
            key: anchored(base_dir.as_deref(), key),
            passphrase: section
                .get("passphrase")
                .map(|p| Zeroizing::new(p.clone())),
        });
    }
    Ok(specs)
}

fn anchored(base: Option<&Path>, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_octal(option: &str, value: &str) -> Result<u32, ConfigError> {
    let digits = value.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|_| ConfigError::Invalid {
        option: option.to_string(),
        reason: format!("'{value}' is not an octal mode"),
    })
}

fn parse_bool(option: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            option: option.to_string(),
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

fn default_max_servers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
