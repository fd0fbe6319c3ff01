//! Keybinding Files
//!
//! Parses `keymaps/*.jvekeys` TOML files into command bindings. Each
//! section is a category; each entry maps a platform-agnostic key combo
//! to a binding value:
//!
//! ```text
//! <command_name> [positional ...] [key=value ...] [@context ...]
//! ```
//!
//! Positional arguments are captured in order into `_positional`,
//! `key=value` pairs are auto-typed (booleans and integers), and
//! `@context` tokens limit the binding to focus contexts. A binding
//! with no context is global.

use std::path::Path;

use serde_json::Value;

use crate::core::commands::ParamMap;
use crate::core::{CoreError, CoreResult};

/// One parsed keybinding.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyBinding {
    pub category: String,
    /// Platform-agnostic combo, e.g. `Cmd+Shift+Z` or `F9`.
    pub key: String,
    pub command: String,
    pub positional: Vec<Value>,
    pub named: ParamMap,
    /// Focus contexts this binding is limited to; empty means global.
    pub contexts: Vec<String>,
}

impl KeyBinding {
    /// The parameter bag handed to the command manager.
    pub fn to_params(&self) -> ParamMap {
        let mut params = self.named.clone();
        if !self.positional.is_empty() {
            params.insert("_positional".into(), Value::Array(self.positional.clone()));
        }
        params
    }

    fn active_in(&self, context: Option<&str>) -> bool {
        if self.contexts.is_empty() {
            return true;
        }
        context.is_some_and(|c| self.contexts.iter().any(|ctx| ctx == c))
    }
}

/// A loaded keymap file.
#[derive(Clone, Debug, Default)]
pub struct Keymap {
    pub bindings: Vec<KeyBinding>,
}

impl Keymap {
    /// The binding for a key combo in the given focus context.
    /// Context-scoped bindings win over global ones.
    pub fn lookup(&self, key: &str, context: Option<&str>) -> Option<&KeyBinding> {
        let mut fallback = None;
        for binding in self.bindings.iter().filter(|b| b.key == key) {
            if !binding.active_in(context) {
                continue;
            }
            if binding.contexts.is_empty() {
                fallback.get_or_insert(binding);
            } else {
                return Some(binding);
            }
        }
        fallback
    }
}

/// Loads a `.jvekeys` file.
pub fn load_keymap<P: AsRef<Path>>(path: P) -> CoreResult<Keymap> {
    let text = std::fs::read_to_string(path)?;
    parse_keymap(&text)
}

/// Parses keymap TOML text.
pub fn parse_keymap(text: &str) -> CoreResult<Keymap> {
    let table: toml::Table = text
        .parse()
        .map_err(|e: toml::de::Error| CoreError::KeymapError(e.to_string()))?;

    let mut bindings = Vec::new();
    for (category, entries) in &table {
        let section = entries.as_table().ok_or_else(|| {
            CoreError::KeymapError(format!("category {category} is not a table"))
        })?;
        for (key, value) in section {
            let spec = value.as_str().ok_or_else(|| {
                CoreError::KeymapError(format!("binding {category}.{key} is not a string"))
            })?;
            bindings.push(parse_binding(category, key, spec)?);
        }
    }

    Ok(Keymap { bindings })
}

fn parse_binding(category: &str, key: &str, spec: &str) -> CoreResult<KeyBinding> {
    let mut tokens = spec.split_whitespace();
    let command = tokens
        .next()
        .ok_or_else(|| CoreError::KeymapError(format!("empty binding for {key}")))?
        .to_string();

    let mut positional = Vec::new();
    let mut named = ParamMap::new();
    let mut contexts = Vec::new();

    for token in tokens {
        if let Some(context) = token.strip_prefix('@') {
            contexts.push(context.to_string());
        } else if let Some((name, raw)) = token.split_once('=') {
            named.insert(name.to_string(), auto_type(raw));
        } else {
            positional.push(auto_type(token));
        }
    }

    Ok(KeyBinding {
        category: category.to_string(),
        key: key.to_string(),
        command,
        positional,
        named,
        contexts,
    })
}

/// Booleans and integers become typed values; everything else stays a
/// string.
fn auto_type(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match raw.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(raw),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[editing]
"Cmd+Shift+Z" = "Redo"
"Cmd+Z" = "Undo"
"F9" = "Insert @timeline"
"Comma" = "Nudge nudge_amount_frames=-1 @timeline @viewer"

[transport]
"J" = "Shuttle -1"
"L" = "Shuttle 1"
"Space" = "PlayPause toggle=true"
"#;

    #[test]
    fn test_parse_sections_and_entries() {
        let keymap = parse_keymap(SAMPLE).unwrap();
        assert_eq!(keymap.bindings.len(), 7);
        assert!(keymap
            .bindings
            .iter()
            .any(|b| b.category == "transport" && b.key == "J"));
    }

    #[test]
    fn test_positional_args() {
        let keymap = parse_keymap(SAMPLE).unwrap();
        let binding = keymap.lookup("J", None).unwrap();
        assert_eq!(binding.command, "Shuttle");
        assert_eq!(binding.positional, vec![Value::from(-1)]);

        let params = binding.to_params();
        assert_eq!(params["_positional"], serde_json::json!([-1]));
    }

    #[test]
    fn test_named_args_auto_typed() {
        let keymap = parse_keymap(SAMPLE).unwrap();
        let space = keymap.lookup("Space", None).unwrap();
        assert_eq!(space.named["toggle"], Value::Bool(true));

        let comma = keymap.lookup("Comma", Some("timeline")).unwrap();
        assert_eq!(comma.named["nudge_amount_frames"], Value::from(-1));
    }

    #[test]
    fn test_context_scoping() {
        let keymap = parse_keymap(SAMPLE).unwrap();

        // Context-limited bindings are invisible elsewhere.
        assert!(keymap.lookup("F9", None).is_none());
        assert!(keymap.lookup("F9", Some("browser")).is_none());
        assert!(keymap.lookup("F9", Some("timeline")).is_some());

        // Multiple contexts all activate the binding.
        assert!(keymap.lookup("Comma", Some("viewer")).is_some());

        // No-context bindings are global.
        assert!(keymap.lookup("Cmd+Z", Some("anything")).is_some());
        assert!(keymap.lookup("Cmd+Z", None).is_some());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(
            parse_keymap("not [valid toml"),
            Err(CoreError::KeymapError(_))
        ));
        assert!(matches!(
            parse_keymap("[section]\nkey = 7\n"),
            Err(CoreError::KeymapError(_))
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("default.jvekeys");
        std::fs::write(&path, SAMPLE).unwrap();
        let keymap = load_keymap(&path).unwrap();
        assert_eq!(keymap.bindings.len(), 7);
    }
}
