// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Manifest validation and normalization.
//!
//! Takes the body of a successful probe and, if it is a JSON object, extracts
//! the handful of fields the classifier cares about. Unrecognized top-level
//! fields are carried along verbatim in an opaque bag so new manifest
//! revisions survive a round trip through the dataset.
//!
//! Nothing in here fails: every problem becomes "no manifest" plus a note.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const NOTE_INVALID_JSON: &str = "invalid_json";
pub const NOTE_UNEXPECTED_SHAPE: &str = "unexpected_shape";
pub const NOTE_TRUNCATED_INVALID: &str = "truncated_invalid";
pub const NOTE_TRUNCATED: &str = "truncated";
pub const NOTE_EMPTY_MANIFEST: &str = "empty_manifest";

/// Top-level keys lifted into typed `Manifest` fields.
const RECOGNIZED_FIELDS: &[&str] = &[
    "name",
    "version",
    "capabilities",
    "tools",
    "auth",
    "authentication",
    "transport",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Authentication posture declared by a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No auth declared, or explicitly none.
    #[default]
    None,
    DeclaredRequired,
    /// Something was declared but we do not recognize it.
    Unknown,
}

/// A JSON value kept for pass-through only.
///
/// The inner value is private: callers can re-emit it but cannot branch on
/// its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opaque(Value);

impl Opaque {
    /// Compact JSON text of the preserved value.
    pub fn to_json(&self) -> String {
        self.0.to_string()
    }
}

/// Unrecognized manifest fields, keyed by their original name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassThrough(BTreeMap<String, Opaque>);

impl PassThrough {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Opaque> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Normalized discovery manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub capabilities: Vec<String>,
    pub auth_mode: AuthMode,
    /// Normalized scheme name when one was declared (`api_key`, `oauth2`, ...).
    pub auth_scheme: Option<String>,
    pub transport: Option<String>,
    #[serde(default)]
    pub extra_fields: PassThrough,
}

/// Subset of manifest fields written as `manifest_sample`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSample {
    pub name: Option<String>,
    pub version: Option<String>,
    pub capabilities: Vec<String>,
    pub auth: String,
    pub transport: Option<String>,
}

impl Manifest {
    /// Label written to the record's `auth` column.
    pub fn auth_label(&self) -> String {
        match self.auth_mode {
            AuthMode::None => "none".to_string(),
            AuthMode::DeclaredRequired => self
                .auth_scheme
                .clone()
                .unwrap_or_else(|| "required".to_string()),
            AuthMode::Unknown => "unknown".to_string(),
        }
    }

    pub fn sample(&self) -> ManifestSample {
        ManifestSample {
            name: self.name.clone(),
            version: self.version.clone(),
            capabilities: self.capabilities.clone(),
            auth: self.auth_label(),
            transport: self.transport.clone(),
        }
    }
}

/// Parser output: a manifest when the body was usable, plus notes either way.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedManifest {
    pub manifest: Option<Manifest>,
    pub notes: Vec<String>,
}

impl ParsedManifest {
    fn absent(mut notes: Vec<String>, note: &str) -> Self {
        notes.push(note.to_string());
        Self {
            manifest: None,
            notes,
        }
    }
}

/// Validate and normalize a probe body.
///
/// `truncated` marks a body that hit the size cap; such a body is only used
/// when the retained prefix still parses on its own.
pub fn parse_manifest(body: &[u8], content_type: Option<&str>, truncated: bool) -> ParsedManifest {
    let mut notes = Vec::new();

    if let Some(ct) = content_type {
        let essence = media_type(ct);
        if !is_json_media_type(&essence) {
            notes.push(format!("content_type:{essence}"));
        }
    }

    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("manifest body rejected: {e}");
            let note = if truncated {
                NOTE_TRUNCATED_INVALID
            } else {
                NOTE_INVALID_JSON
            };
            return ParsedManifest::absent(notes, note);
        }
    };

    if truncated {
        notes.push(NOTE_TRUNCATED.to_string());
    }

    let Value::Object(map) = value else {
        return ParsedManifest::absent(notes, NOTE_UNEXPECTED_SHAPE);
    };

    if map.is_empty() {
        notes.push(NOTE_EMPTY_MANIFEST.to_string());
    }

    ParsedManifest {
        manifest: Some(normalize(map)),
        notes,
    }
}

fn normalize(mut map: Map<String, Value>) -> Manifest {
    let name = map.get("name").and_then(non_empty_str);
    let version = map.get("version").and_then(|v| match v {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    let mut capabilities = map
        .get("capabilities")
        .map(capability_names)
        .unwrap_or_default();
    if let Some(tools) = map.get("tools") {
        for tool in capability_names(tools) {
            if !capabilities.contains(&tool) {
                capabilities.push(tool);
            }
        }
    }

    let (auth_mode, auth_scheme) =
        normalize_auth(map.get("auth").or_else(|| map.get("authentication")));

    let transport = map.get("transport").and_then(|v| match v {
        Value::String(s) => non_empty(s),
        Value::Object(o) => o.get("type").and_then(non_empty_str),
        Value::Array(items) => {
            let kinds: Vec<String> = items.iter().filter_map(non_empty_str).collect();
            (!kinds.is_empty()).then(|| kinds.join(","))
        }
        _ => None,
    });

    for key in RECOGNIZED_FIELDS {
        map.remove(*key);
    }
    let extra_fields = PassThrough(map.into_iter().map(|(k, v)| (k, Opaque(v))).collect());

    Manifest {
        name,
        version,
        capabilities,
        auth_mode,
        auth_scheme,
        transport,
        extra_fields,
    }
}

/// Capability names from an array of strings / named objects, or from the
/// keys of a capabilities object.
fn capability_names(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => non_empty(s).into_iter().collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => non_empty(s),
                Value::Object(o) => o.get("name").and_then(non_empty_str),
                _ => None,
            })
            .collect(),
        Value::Object(o) => o.keys().filter_map(|k| non_empty(k)).collect(),
        _ => Vec::new(),
    }
}

fn normalize_auth(value: Option<&Value>) -> (AuthMode, Option<String>) {
    match value {
        None | Some(Value::Null) => (AuthMode::None, None),
        Some(Value::Bool(false)) => (AuthMode::None, Some("none".to_string())),
        Some(Value::Bool(true)) => (AuthMode::DeclaredRequired, Some("required".to_string())),
        Some(Value::String(s)) => classify_scheme(s),
        Some(Value::Object(o)) => {
            let scheme = ["type", "scheme", "method"]
                .iter()
                .find_map(|k| o.get(*k).and_then(|v| v.as_str()));
            match (o.get("required").and_then(Value::as_bool), scheme) {
                (Some(false), _) => (AuthMode::None, Some("none".to_string())),
                (_, Some(s)) => classify_scheme(s),
                (Some(true), None) => (AuthMode::DeclaredRequired, Some("required".to_string())),
                (None, None) => (AuthMode::Unknown, None),
            }
        }
        Some(Value::Array(items)) => {
            let declared: Vec<(AuthMode, Option<String>)> = items
                .iter()
                .map(|item| normalize_auth(Some(item)))
                .collect();
            if let Some(required) = declared
                .iter()
                .find(|(mode, _)| *mode == AuthMode::DeclaredRequired)
            {
                required.clone()
            } else if declared.iter().any(|(mode, _)| *mode == AuthMode::Unknown) {
                (AuthMode::Unknown, None)
            } else {
                (AuthMode::None, Some("none".to_string()))
            }
        }
        Some(Value::Number(_)) => (AuthMode::Unknown, None),
    }
}

fn classify_scheme(raw: &str) -> (AuthMode, Option<String>) {
    let s = raw.trim().to_ascii_lowercase().replace('-', "_");
    match s.as_str() {
        "" | "none" | "anonymous" | "public" | "no_auth" | "noauth" => {
            (AuthMode::None, Some("none".to_string()))
        }
        "api_key" | "apikey" | "api_token" | "header" => {
            (AuthMode::DeclaredRequired, Some("api_key".to_string()))
        }
        "bearer" | "token" | "jwt" | "basic" | "mtls" | "required" => {
            (AuthMode::DeclaredRequired, Some(s))
        }
        _ if s.starts_with("oauth") => (AuthMode::DeclaredRequired, Some("oauth2".to_string())),
        _ => (AuthMode::Unknown, Some(s)),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn non_empty_str(v: &Value) -> Option<String> {
    v.as_str().and_then(non_empty)
}

/// Media type without parameters, lowercased.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn is_json_media_type(essence: &str) -> bool {
    essence == "application/json" || essence.ends_with("+json") || essence == "text/json"
}
