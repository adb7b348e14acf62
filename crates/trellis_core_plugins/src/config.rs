//! Layered configuration.
//!
//! A [`ConfigSource`] is a JSON object merged from any number of sources,
//! later sources winning and objects merging recursively. Typed records are
//! loaded from it section by section, with environment variables layered on
//! top:
//!
//! ```text
//! PREFIX_SECTION_FIELD            top-level field of a section
//! PREFIX_SECTION_NESTED_FIELD     field of a nested record
//! ```
//!
//! The fields a record honours are taken from its JSON Schema, and
//! environment strings are converted by the schema type of the field.
//! Booleans accept `1`, `true`, `yes` and `on` (case-insensitive); any other
//! value is `false`.
//!
//! Types implementing [`ConfigSection`] and declaring the [`FromConfig`]
//! bound are resolvable like any other component once [`ConfigPlugin`] has
//! loaded:
//!
//! ```
//! use std::sync::Arc;
//! use serde::Deserialize;
//! use trellis_core_plugins::{ConfigPlugin, ConfigSection, ConfigSource, FromConfig};
//! use trellis_staging::prelude::*;
//!
//! #[derive(Component, Deserialize, schemars::JsonSchema)]
//! #[component(bound(FromConfig))]
//! struct Http {
//!     port: u16,
//!     #[serde(default)]
//!     verbose: bool,
//! }
//!
//! impl ConfigSection for Http {
//!     const SECTION: Option<&'static str> = Some("http");
//! }
//!
//! async fn serve(http: Arc<Http>) -> Work {
//!     let port = http.port;
//!     Work::from_future("serve", async move { Ok::<_, BoxError>(port) })
//! }
//!
//! let source = ConfigSource::from_value(serde_json::json!({"http": {"port": 8080}}))
//!     .unwrap()
//!     .with_env_prefix("APP")
//!     .with_env([("APP_HTTP_VERBOSE", "yes")]);
//!
//! let report = Staging::builder()
//!     .adapters(Arc::new(Adapters::new()))
//!     .catalog(Arc::new(PluginCatalog::new()))
//!     .build()
//!     .run_blocking([
//!         PluginRef::of(ConfigPlugin::new(source).with_section::<Http>()),
//!         PluginRef::of(serve),
//!     ])
//!     .unwrap();
//!
//! assert_eq!(report.get("serve").unwrap().value::<u16>(), Some(&8080));
//! ```

use core::any::type_name;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use trellis_staging::error::PluginError;
use trellis_staging::plugin::{Plugin, PluginId};
use trellis_staging::work::Work;
use trellis_system::adapter::{Adapters, Binder};
use trellis_system::component::{Component, ComponentError};
use trellis_system::inject::InjectContext;
use trellis_system::{BoxError, BoxFuture};

/// Nested records deeper than this are not scanned for variables.
const MAX_DEPTH: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while reading or loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("cannot read config file `{}`", path.display())]
    Io {
        /// The file.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A source is not valid JSON.
    #[error("cannot parse config from {origin}")]
    Parse {
        /// Where the text came from.
        origin: String,
        /// The parser error.
        #[source]
        source: serde_json::Error,
    },

    /// A source is valid JSON but not an object.
    #[error("config from {origin} is not an object")]
    NotAnObject {
        /// Where the value came from.
        origin: String,
    },

    /// A section does not match its record type.
    #[error("invalid config section `{section}`")]
    Invalid {
        /// The section name, or `<root>`.
        section: String,
        /// The deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Two record types claim the same section.
    #[error("config section `{section}` is defined by both `{first}` and `{second}`")]
    DuplicateSection {
        /// The contested section.
        section: &'static str,
        /// The type that claimed it first.
        first: &'static str,
        /// The type that claimed it again.
        second: &'static str,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigSource
// ─────────────────────────────────────────────────────────────────────────────

/// Merged configuration values plus the environment overlay.
///
/// Registered as a component by [`ConfigPlugin`].
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    values: Map<String, Value>,
    env_prefix: Option<String>,
    /// Fixed variables; `None` reads the process environment.
    env: Option<BTreeMap<String, String>>,
}

impl Component for ConfigSource {}

impl ConfigSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotAnObject`] unless `value` is an object.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let mut source = Self::new();
        source.merge(value)?;
        Ok(source)
    }

    /// Prefixes every environment variable name with `prefix`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Reads variables from `vars` instead of the process environment.
    #[must_use]
    pub fn with_env<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// The environment prefix, if any.
    #[must_use]
    pub fn env_prefix(&self) -> Option<&str> {
        self.env_prefix.as_deref()
    }

    /// Merges `value` over the current values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotAnObject`] unless `value` is an object.
    pub fn merge(&mut self, value: Value) -> Result<(), ConfigError> {
        let Value::Object(object) = value else {
            return Err(ConfigError::NotAnObject {
                origin: String::from("value"),
            });
        };
        merge_objects(&mut self.values, object);
        Ok(())
    }

    /// Merges the JSON file at `path` over the current values.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or
    /// does not hold an object.
    pub fn merge_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let origin = format!("`{}`", path.display());
        let value: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            origin: origin.clone(),
            source,
        })?;
        let Value::Object(object) = value else {
            return Err(ConfigError::NotAnObject { origin });
        };
        tracing::debug!(path = %path.display(), "merging config file");
        merge_objects(&mut self.values, object);
        Ok(())
    }

    /// The merged values, without the environment overlay.
    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// The raw value of a section.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Loads a record from `section` (or from the root when `None`), with
    /// environment variables applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotAnObject`] if the section holds anything
    /// but an object or `null`, and [`ConfigError::Invalid`] if the values
    /// do not deserialize into `T`.
    pub fn load<T>(&self, section: Option<&str>) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let mut values = match section {
            Some(name) => match self.values.get(name) {
                Some(Value::Object(object)) => object.clone(),
                None | Some(Value::Null) => Map::new(),
                Some(_) => {
                    return Err(ConfigError::NotAnObject {
                        origin: format!("section `{name}`"),
                    });
                }
            },
            None => self.values.clone(),
        };
        merge_objects(&mut values, self.env_overlay::<T>(section));

        serde_json::from_value(Value::Object(values)).map_err(|source| ConfigError::Invalid {
            section: section.unwrap_or("<root>").to_owned(),
            source,
        })
    }

    /// Names of the environment variables a `T` loaded from `section`
    /// honours.
    #[must_use]
    pub fn env_help<T: JsonSchema>(&self, section: Option<&str>) -> Vec<String> {
        env_fields::<T>()
            .iter()
            .map(|field| self.env_name(section, &field.path))
            .collect()
    }

    fn env_name(&self, section: Option<&str>, path: &[String]) -> String {
        self.env_prefix
            .as_deref()
            .into_iter()
            .chain(section)
            .chain(path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("_")
            .to_uppercase()
    }

    fn var(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(env) => env.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    fn env_overlay<T: JsonSchema>(&self, section: Option<&str>) -> Map<String, Value> {
        let mut overlay = Map::new();
        for field in env_fields::<T>() {
            let name = self.env_name(section, &field.path);
            let Some(raw) = self.var(&name) else {
                continue;
            };
            tracing::debug!(var = %name, "overriding config from environment");
            insert_path(&mut overlay, &field.path, field.kind.coerce(&raw));
        }
        overlay
    }
}

/// Merges `source` into `dest`; nested objects merge, everything else is
/// replaced.
fn merge_objects(dest: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match (dest.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_objects(existing, incoming);
            }
            (_, value) => {
                dest.insert(key, value);
            }
        }
    }
}

fn insert_path(target: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut target = target;
    for part in parents {
        let entry = target
            .entry(part.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        target = next;
    }
    target.insert(last.clone(), value);
}

// ─── Schema traversal ───

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Bool,
    Integer,
    Number,
    Text,
    Json,
}

impl FieldKind {
    fn of(schema: &Value) -> Self {
        let ty = match schema.get("type") {
            Some(Value::String(ty)) => Some(ty.as_str()),
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .find(|ty| *ty != "null"),
            _ => None,
        };
        match ty {
            Some("boolean") => Self::Bool,
            Some("integer") => Self::Integer,
            Some("number") => Self::Number,
            Some("array" | "object") => Self::Json,
            _ => Self::Text,
        }
    }

    fn coerce(self, raw: &str) -> Value {
        match self {
            Self::Bool => Value::Bool(matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )),
            Self::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| raw.trim().parse::<u64>().map(Value::from))
                .unwrap_or_else(|_| Value::String(raw.to_owned())),
            Self::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map_or_else(|| Value::String(raw.to_owned()), Value::Number),
            Self::Json => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
            }
            Self::Text => Value::String(raw.to_owned()),
        }
    }
}

#[derive(Debug)]
struct EnvField {
    path: Vec<String>,
    kind: FieldKind,
}

fn env_fields<T: JsonSchema>() -> Vec<EnvField> {
    let root = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
    let mut fields = Vec::new();
    collect_fields(&root, &root, &mut Vec::new(), &mut fields);
    fields
}

fn collect_fields(root: &Value, schema: &Value, path: &mut Vec<String>, out: &mut Vec<EnvField>) {
    let schema = follow_ref(root, schema);
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (name, field) in properties {
        path.push(name.clone());
        let field = follow_ref(root, non_null(field));
        if field.get("properties").is_some() && path.len() < MAX_DEPTH {
            collect_fields(root, field, path, out);
        } else {
            out.push(EnvField {
                path: path.clone(),
                kind: FieldKind::of(field),
            });
        }
        path.pop();
    }
}

/// Resolves a local `$ref` against the root schema.
fn follow_ref<'a>(root: &'a Value, schema: &'a Value) -> &'a Value {
    schema
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|reference| reference.strip_prefix('#'))
        .and_then(|pointer| root.pointer(pointer))
        .unwrap_or(schema)
}

/// Picks the non-null branch of an optional field.
fn non_null(schema: &Value) -> &Value {
    ["anyOf", "oneOf"]
        .iter()
        .filter_map(|key| schema.get(*key).and_then(Value::as_array))
        .flatten()
        .find(|branch| branch.get("type").and_then(Value::as_str) != Some("null"))
        .unwrap_or(schema)
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// A record loaded from a section of the [`ConfigSource`].
///
/// Declare `#[component(bound(FromConfig))]` on the type so the resolver
/// can build it through [`FromConfig`].
pub trait ConfigSection: Component + DeserializeOwned + JsonSchema {
    /// The section the record is read from; `None` reads the root.
    const SECTION: Option<&'static str> = None;
}

/// Generic adapter building any [`ConfigSection`] from the
/// [`ConfigSource`].
#[derive(Debug)]
pub struct FromConfig;

impl<T: ConfigSection> Binder<T> for FromConfig {
    type Deps = (Arc<ConfigSource>,);

    fn adapt((source,): Self::Deps) -> BoxFuture<'static, Result<T, BoxError>> {
        Box::pin(async move { source.load::<T>(T::SECTION).map_err(BoxError::from) })
    }
}

struct SectionEntry {
    section: Option<&'static str>,
    type_name: &'static str,
    register: fn(&Adapters) -> Result<(), ComponentError>,
    env_help: fn(&ConfigSource) -> Vec<String>,
}

fn register_section<T: ConfigSection>(adapters: &Adapters) -> Result<(), ComponentError> {
    adapters.register_component::<T>()
}

fn section_env_help<T: ConfigSection>(source: &ConfigSource) -> Vec<String> {
    source.env_help::<T>(T::SECTION)
}

/// Checks that no two entries claim the same named section.
fn check_sections(entries: &[SectionEntry]) -> Result<(), ConfigError> {
    let mut claimed: HashMap<&'static str, &'static str> = HashMap::new();
    for entry in entries {
        let Some(section) = entry.section else {
            continue;
        };
        if let Some(first) = claimed.insert(section, entry.type_name) {
            return Err(ConfigError::DuplicateSection {
                section,
                first,
                second: entry.type_name,
            });
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigPlugin
// ─────────────────────────────────────────────────────────────────────────────

/// Registers a [`ConfigSource`] and makes its sections resolvable.
///
/// # Components Provided
///
/// | Component | Description |
/// |-----------|-------------|
/// | [`ConfigSource`] | The merged configuration |
/// | each section type | Built on demand through [`FromConfig`] |
pub struct ConfigPlugin {
    source: ConfigSource,
    sections: Vec<SectionEntry>,
}

impl ConfigPlugin {
    /// Creates a plugin registering `source`.
    #[must_use]
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            sections: Vec::new(),
        }
    }

    /// Makes the section record `T` resolvable.
    #[must_use]
    pub fn with_section<T: ConfigSection>(mut self) -> Self {
        self.sections.push(SectionEntry {
            section: T::SECTION,
            type_name: type_name::<T>(),
            register: register_section::<T>,
            env_help: section_env_help::<T>,
        });
        self
    }

    /// The source this plugin registers.
    #[must_use]
    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// Every environment variable the registered sections honour.
    #[must_use]
    pub fn env_help(&self) -> Vec<String> {
        self.sections
            .iter()
            .flat_map(|entry| (entry.env_help)(&self.source))
            .collect()
    }

    fn failed(&self, source: impl Into<BoxError>) -> PluginError {
        PluginError::Failed {
            plugin: self.name().to_owned(),
            source: source.into(),
        }
    }
}

impl core::fmt::Debug for ConfigPlugin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sections: Vec<_> = self.sections.iter().map(|entry| entry.type_name).collect();
        f.debug_struct("ConfigPlugin")
            .field("source", &self.source)
            .field("sections", &sections)
            .finish()
    }
}

impl Plugin for ConfigPlugin {
    fn id(&self) -> PluginId {
        PluginId::of::<Self>()
    }

    fn name(&self) -> &str {
        "trellis::config"
    }

    fn load<'a>(&'a self, cx: &'a InjectContext<'a>) -> BoxFuture<'a, Result<Vec<Work>, PluginError>> {
        Box::pin(async move {
            check_sections(&self.sections).map_err(|err| self.failed(err))?;

            cx.scope().add(self.source.clone());
            cx.adapters().register_generic::<FromConfig>();
            for entry in &self.sections {
                (entry.register)(cx.adapters()).map_err(|err| self.failed(err))?;
            }

            tracing::debug!(sections = self.sections.len(), "config registered");
            Ok(Vec::new())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Tls {
        enabled: bool,
        #[serde(default)]
        ciphers: Vec<String>,
    }

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Server {
        host: String,
        port: u16,
        ratio: Option<f64>,
        tls: Tls,
    }

    fn source() -> ConfigSource {
        ConfigSource::from_value(json!({
            "server": {"host": "localhost", "port": 80, "tls": {"enabled": false}},
            "other": 1,
        }))
        .unwrap()
    }

    // ─── Merging ───

    #[test]
    fn later_sources_win_and_objects_merge() {
        let mut source = source();
        source
            .merge(json!({"server": {"port": 8080, "tls": {"ciphers": ["a"]}}}))
            .unwrap();

        let server = source.section("server").unwrap();
        assert_eq!(server["host"], "localhost");
        assert_eq!(server["port"], 8080);
        assert_eq!(server["tls"], json!({"enabled": false, "ciphers": ["a"]}));
    }

    #[test]
    fn non_objects_are_rejected() {
        let err = ConfigSource::from_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, ConfigError::NotAnObject { .. }));
    }

    #[test]
    fn files_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server": {"host": "example.org"}}"#).unwrap();

        let mut source = source();
        source.merge_file(&path).unwrap();
        assert_eq!(source.section("server").unwrap()["host"], "example.org");

        let missing = source.merge_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    // ─── Loading ───

    #[test]
    fn sections_load_with_environment_overrides() {
        let source = source().with_env_prefix("app").with_env([
            ("APP_SERVER_PORT", "9000"),
            ("APP_SERVER_RATIO", "0.5"),
            ("APP_SERVER_TLS_ENABLED", "Yes"),
            ("APP_SERVER_TLS_CIPHERS", r#"["x", "y"]"#),
            ("SERVER_HOST", "ignored"),
        ]);

        let server: Server = source.load(Some("server")).unwrap();
        assert_eq!(
            server,
            Server {
                host: String::from("localhost"),
                port: 9000,
                ratio: Some(0.5),
                tls: Tls {
                    enabled: true,
                    ciphers: vec![String::from("x"), String::from("y")],
                },
            }
        );
    }

    #[test]
    fn boolean_strings_follow_the_relaxed_rule() {
        for (raw, expected) in [("1", true), ("ON", true), ("true", true), ("no", false), ("2", false)] {
            assert_eq!(FieldKind::Bool.coerce(raw), Value::Bool(expected), "{raw}");
        }
    }

    #[test]
    fn invalid_sections_report_their_name() {
        let source = ConfigSource::from_value(json!({"server": {"port": "eighty"}})).unwrap();
        let err = source.load::<Server>(Some("server")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { section, .. } if section == "server"));
    }

    #[test]
    fn scalar_sections_are_not_objects() {
        #[derive(Debug, Deserialize, JsonSchema)]
        struct Database {
            #[serde(default)]
            pool: u32,
        }

        let source = ConfigSource::from_value(json!({"database": 5, "cache": null})).unwrap();
        let err = source.load::<Database>(Some("database")).unwrap_err();
        assert!(matches!(err, ConfigError::NotAnObject { ref origin } if origin.contains("database")));

        // Absent and null sections fall back to defaults.
        assert_eq!(source.load::<Database>(Some("cache")).unwrap().pool, 0);
        assert_eq!(source.load::<Database>(Some("queue")).unwrap().pool, 0);
    }

    #[test]
    fn env_help_lists_leaf_fields() {
        let mut names = source().with_env_prefix("app").env_help::<Server>(Some("server"));
        names.sort();
        assert_eq!(
            names,
            vec![
                "APP_SERVER_HOST",
                "APP_SERVER_PORT",
                "APP_SERVER_RATIO",
                "APP_SERVER_TLS_CIPHERS",
                "APP_SERVER_TLS_ENABLED",
            ]
        );
    }

    // ─── Sections ───

    #[derive(Debug, Deserialize, JsonSchema)]
    struct First {
        #[serde(default)]
        value: u8,
    }

    impl Component for First {}

    impl ConfigSection for First {
        const SECTION: Option<&'static str> = Some("shared");
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Second {}

    impl Component for Second {}

    impl ConfigSection for Second {
        const SECTION: Option<&'static str> = Some("shared");
    }

    #[test]
    fn duplicate_sections_are_rejected() {
        let plugin = ConfigPlugin::new(ConfigSource::new())
            .with_section::<First>()
            .with_section::<Second>();

        let err = check_sections(&plugin.sections).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSection { section: "shared", .. }));
    }

    #[test]
    fn binder_loads_the_declared_section() {
        let source = ConfigSource::from_value(json!({"shared": {"value": 3}})).unwrap();
        let first = tokio_test::block_on(<FromConfig as Binder<First>>::adapt((Arc::new(source),)))
            .unwrap();
        assert_eq!(first.value, 3);
    }
}
