//! Command Schema
//!
//! One declarative spec per command type, partitioned into caller `args`
//! (strict: unknown keys rejected, required keys enforced, defaults and
//! aliases applied) and executor-written `persisted` keys (type-checked,
//! never required). The registry here is the single source of truth for
//! validation.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde_json::Value;

use crate::core::{CoreError, CoreResult};

use super::ParamMap;

// =============================================================================
// Rules
// =============================================================================

/// Declared value kind of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Table,
    Any,
}

impl ParamKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Table => value.is_object() || value.is_array(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Table => "table",
            Self::Any => "any",
        }
    }
}

/// Kind rule for one declared field of a table-valued parameter.
#[derive(Clone, Copy, Debug)]
pub struct FieldRule {
    pub kind: ParamKind,
    pub required: bool,
}

/// Validation rule for one parameter key.
#[derive(Clone, Debug)]
pub struct ParamRule {
    pub kind: ParamKind,
    pub required: bool,
    pub required_outside_ui_context: bool,
    pub default: Option<Value>,
    pub empty_as_nil: bool,
    pub one_of: Vec<Value>,
    pub aliases: Vec<&'static str>,
    /// For table values: tolerate keys beyond the declared fields.
    pub accept_legacy_keys: bool,
    pub fields: Vec<(&'static str, FieldRule)>,
    pub requires_fields: Vec<&'static str>,
    /// Callable members in the source schema; checked as key presence.
    pub requires_methods: Vec<&'static str>,
}

impl ParamRule {
    fn of(kind: ParamKind) -> Self {
        Self {
            kind,
            required: false,
            required_outside_ui_context: false,
            default: None,
            empty_as_nil: false,
            one_of: Vec::new(),
            aliases: Vec::new(),
            accept_legacy_keys: true,
            fields: Vec::new(),
            requires_fields: Vec::new(),
            requires_methods: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::of(ParamKind::String)
    }

    pub fn number() -> Self {
        Self::of(ParamKind::Number)
    }

    pub fn boolean() -> Self {
        Self::of(ParamKind::Boolean)
    }

    pub fn table() -> Self {
        Self::of(ParamKind::Table)
    }

    /// Time-valued parameters accept a raw frame integer or a
    /// `{frames, fps_num, fps_den}` object.
    pub fn time() -> Self {
        Self::of(ParamKind::Any)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_outside_ui_context(mut self) -> Self {
        self.required_outside_ui_context = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn empty_as_nil(mut self) -> Self {
        self.empty_as_nil = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.one_of = values.iter().map(|v| Value::from(*v)).collect();
        self
    }

    pub fn aliases(mut self, names: &[&'static str]) -> Self {
        self.aliases = names.to_vec();
        self
    }

    pub fn strict_fields(mut self) -> Self {
        self.accept_legacy_keys = false;
        self
    }

    pub fn field(mut self, name: &'static str, kind: ParamKind, required: bool) -> Self {
        self.fields.push((name, FieldRule { kind, required }));
        self
    }

    pub fn requires_fields(mut self, names: &[&'static str]) -> Self {
        self.requires_fields = names.to_vec();
        self
    }

    pub fn requires_methods(mut self, names: &[&'static str]) -> Self {
        self.requires_methods = names.to_vec();
        self
    }
}

/// Full schema of one command type.
#[derive(Clone, Debug, Default)]
pub struct CommandSpec {
    pub args: Vec<(&'static str, ParamRule)>,
    pub persisted: Vec<(&'static str, ParamRule)>,
    /// Each inner group requires at least one of its keys present.
    pub requires_any: Vec<Vec<&'static str>>,
}

impl CommandSpec {
    fn arg(mut self, name: &'static str, rule: ParamRule) -> Self {
        self.args.push((name, rule));
        self
    }

    fn persisted_key(mut self, name: &'static str, rule: ParamRule) -> Self {
        self.persisted.push((name, rule));
        self
    }

    fn requires_any_of(mut self, group: &[&'static str]) -> Self {
        self.requires_any.push(group.to_vec());
        self
    }

    /// Resolves a caller key (canonical or alias) to its canonical name
    /// and rule.
    fn resolve_arg(&self, key: &str) -> Option<(&'static str, &ParamRule)> {
        self.args
            .iter()
            .find(|(name, rule)| *name == key || rule.aliases.contains(&key))
            .map(|(name, rule)| (*name, rule))
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Options for [`validate_and_normalize`].
#[derive(Clone, Copy, Debug)]
pub struct ValidateOpts {
    pub apply_defaults: bool,
    /// Relaxes `required_outside_ui_context` keys.
    pub is_ui_context: bool,
    /// Development builds raise on validation failure instead of
    /// returning an error tuple.
    pub asserts_enabled: bool,
}

impl Default for ValidateOpts {
    fn default() -> Self {
        Self {
            apply_defaults: true,
            is_ui_context: false,
            asserts_enabled: false,
        }
    }
}

/// Validates and normalizes a caller parameter bag against a command's
/// schema. Ephemeral `__`-prefixed keys pass through untouched; the
/// manager strips them before persisting.
pub fn validate_and_normalize(
    command: &str,
    spec: &CommandSpec,
    params: &ParamMap,
    opts: ValidateOpts,
) -> CoreResult<ParamMap> {
    let fail = |message: String| -> CoreError {
        if opts.asserts_enabled {
            panic!("{command}: {message}");
        }
        CoreError::validation(command, message)
    };

    let mut normalized = ParamMap::new();

    for (key, value) in params {
        // Ephemeral keys pass through, as does the positional-argument
        // vector captured from keybinding values.
        if key.starts_with("__") || key == "_positional" {
            normalized.insert(key.clone(), value.clone());
            continue;
        }

        let (canonical, rule) = spec
            .resolve_arg(key)
            .ok_or_else(|| fail(format!("unknown parameter: {key}")))?;
        if normalized.contains_key(canonical) {
            return Err(fail(format!("duplicate parameter: {canonical}")));
        }

        if rule.empty_as_nil && value.as_str() == Some("") {
            continue;
        }
        if value.is_null() {
            continue;
        }

        if !rule.kind.matches(value) {
            return Err(fail(format!(
                "parameter {canonical} must be a {}",
                rule.kind.name()
            )));
        }

        if !rule.one_of.is_empty() && !rule.one_of.contains(value) {
            return Err(fail(format!(
                "parameter {canonical} must be one of {:?}",
                rule.one_of
            )));
        }

        if let Some(table) = value.as_object() {
            validate_table(canonical, rule, table, &fail)?;
        }

        normalized.insert(canonical.to_string(), value.clone());
    }

    if opts.apply_defaults {
        for (name, rule) in &spec.args {
            if let Some(default) = &rule.default {
                normalized
                    .entry(name.to_string())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    for (name, rule) in &spec.args {
        let needed =
            rule.required || (rule.required_outside_ui_context && !opts.is_ui_context);
        if needed && !normalized.contains_key(*name) {
            return Err(fail(format!("missing required parameter: {name}")));
        }
    }

    for group in &spec.requires_any {
        if !group.iter().any(|key| normalized.contains_key(*key)) {
            return Err(fail(format!(
                "at least one of {group:?} must be provided"
            )));
        }
    }

    Ok(normalized)
}

fn validate_table(
    key: &str,
    rule: &ParamRule,
    table: &serde_json::Map<String, Value>,
    fail: &dyn Fn(String) -> CoreError,
) -> CoreResult<()> {
    if !rule.accept_legacy_keys && !rule.fields.is_empty() {
        for field_key in table.keys() {
            if !rule.fields.iter().any(|(name, _)| name == field_key) {
                return Err(fail(format!("unknown field {field_key} in {key}")));
            }
        }
    }

    for (field_name, field_rule) in &rule.fields {
        match table.get(*field_name) {
            Some(field_value) => {
                if !field_rule.kind.matches(field_value) {
                    return Err(fail(format!(
                        "field {key}.{field_name} must be a {}",
                        field_rule.kind.name()
                    )));
                }
            }
            None if field_rule.required => {
                return Err(fail(format!("missing field {key}.{field_name}")));
            }
            None => {}
        }
    }

    for required in rule.requires_fields.iter().chain(&rule.requires_methods) {
        if !table.contains_key(*required) {
            return Err(fail(format!("missing field {key}.{required}")));
        }
    }

    Ok(())
}

// =============================================================================
// Registry
// =============================================================================

/// Schema for the given command type, if registered.
pub fn spec_for(command_type: &str) -> Option<&'static CommandSpec> {
    registry().get(command_type)
}

/// All registered command type names.
pub fn registered_commands() -> Vec<&'static str> {
    registry().keys().copied().collect()
}

fn registry() -> &'static BTreeMap<&'static str, CommandSpec> {
    static REGISTRY: OnceLock<BTreeMap<&'static str, CommandSpec>> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

fn mutation_persisted(spec: CommandSpec) -> CommandSpec {
    spec.persisted_key("executed_mutations", ParamRule::table())
        .persisted_key("original_states", ParamRule::table())
}

fn build_registry() -> BTreeMap<&'static str, CommandSpec> {
    let mut specs = BTreeMap::new();

    specs.insert(
        "CreateSequence",
        CommandSpec::default()
            .arg("name", ParamRule::string().required())
            .arg(
                "kind",
                ParamRule::string()
                    .one_of(&["timeline", "masterclip"])
                    .default(Value::from("timeline")),
            )
            .arg("fps_num", ParamRule::number().default(Value::from(30)))
            .arg("fps_den", ParamRule::number().default(Value::from(1)))
            .arg("width", ParamRule::number().default(Value::from(1920)))
            .arg("height", ParamRule::number().default(Value::from(1080)))
            .arg(
                "audio_sample_rate",
                ParamRule::number().default(Value::from(48000)),
            )
            .persisted_key("created_sequence_id", ParamRule::string())
            .persisted_key("created_sequence", ParamRule::table()),
    );

    specs.insert(
        "AddTrack",
        CommandSpec::default()
            .arg("sequence_id", ParamRule::string().required())
            .arg(
                "track_type",
                ParamRule::string().required().one_of(&["VIDEO", "AUDIO"]),
            )
            .arg("name", ParamRule::string().default(Value::from("")))
            .persisted_key("created_track_id", ParamRule::string())
            .persisted_key("track_index", ParamRule::number())
            .persisted_key("created_track", ParamRule::table()),
    );

    specs.insert(
        "ImportMedia",
        CommandSpec::default()
            .arg("name", ParamRule::string().required())
            .arg(
                "file_path",
                ParamRule::string().required().aliases(&["uri", "path"]),
            )
            .arg("duration_frames", ParamRule::number().required())
            .arg("fps_num", ParamRule::number().required())
            .arg("fps_den", ParamRule::number().default(Value::from(1)))
            .arg("width", ParamRule::number().default(Value::from(0)))
            .arg("height", ParamRule::number().default(Value::from(0)))
            .arg("audio_channels", ParamRule::number().default(Value::from(2)))
            .arg("codec", ParamRule::string().default(Value::from("")))
            .persisted_key("created_media_id", ParamRule::string())
            .persisted_key("created_media", ParamRule::table()),
    );

    specs.insert(
        "Insert",
        mutation_persisted(
            CommandSpec::default()
                .arg("track_id", ParamRule::string().required())
                .arg("insert_time", ParamRule::time().required().aliases(&["at"]))
                .arg("media_id", ParamRule::string())
                .arg("master_clip_id", ParamRule::string())
                .arg("duration_frames", ParamRule::number())
                .arg("source_in_frame", ParamRule::number().default(Value::from(0)))
                .arg("name", ParamRule::string().empty_as_nil())
                .arg(
                    "advance_playhead",
                    ParamRule::boolean().default(Value::from(false)),
                )
                .requires_any_of(&["media_id", "master_clip_id"]),
        )
        .persisted_key("created_clip_id", ParamRule::string())
        .persisted_key("original_playhead", ParamRule::number())
        .persisted_key("advanced_by", ParamRule::number()),
    );

    specs.insert(
        "Overwrite",
        mutation_persisted(
            CommandSpec::default()
                .arg("track_id", ParamRule::string().required())
                .arg("overwrite_time", ParamRule::time().required().aliases(&["at"]))
                .arg("media_id", ParamRule::string())
                .arg("master_clip_id", ParamRule::string())
                .arg("duration_frames", ParamRule::number())
                .arg("source_in_frame", ParamRule::number().default(Value::from(0)))
                .arg("name", ParamRule::string().empty_as_nil())
                .requires_any_of(&["media_id", "master_clip_id"]),
        )
        .persisted_key("created_clip_id", ParamRule::string()),
    );

    specs.insert(
        "SplitClip",
        mutation_persisted(
            CommandSpec::default()
                .arg("clip_id", ParamRule::string().required())
                .arg("split_time", ParamRule::time().required()),
        )
        .persisted_key("created_clip_id", ParamRule::string()),
    );

    specs.insert(
        "DeleteClip",
        mutation_persisted(
            CommandSpec::default().arg("clip_id", ParamRule::string().required()),
        ),
    );

    specs.insert(
        "BatchCommand",
        CommandSpec::default()
            .arg("commands", ParamRule::table().required())
            .persisted_key("children", ParamRule::table()),
    );

    specs.insert(
        "RippleDelete",
        mutation_persisted(
            CommandSpec::default().arg("clip_id", ParamRule::string().required()),
        ),
    );

    specs.insert(
        "RippleDeleteSelection",
        mutation_persisted(
            CommandSpec::default().arg("clip_ids", ParamRule::table().required()),
        ),
    );

    specs.insert(
        "RippleEdit",
        mutation_persisted(
            CommandSpec::default()
                .arg("clip_id", ParamRule::string().required())
                .arg(
                    "edge_type",
                    ParamRule::string()
                        .required()
                        .one_of(&["in", "out", "gap_before", "gap_after"]),
                )
                .arg(
                    "trim_type",
                    ParamRule::string()
                        .one_of(&["ripple", "roll"])
                        .default(Value::from("ripple")),
                )
                .arg("delta_frames", ParamRule::number().required()),
        ),
    );

    specs.insert(
        "BatchRippleEdit",
        mutation_persisted(
            CommandSpec::default().arg("edges", ParamRule::table().required()),
        ),
    );

    specs.insert(
        "Nudge",
        mutation_persisted(
            CommandSpec::default()
                .arg("clip_ids", ParamRule::table().required())
                .arg(
                    "nudge_amount_frames",
                    ParamRule::number()
                        .required()
                        .aliases(&["nudge_amount"]),
                ),
        )
        .persisted_key("applied_delta", ParamRule::number()),
    );

    specs.insert(
        "MoveClipToTrack",
        mutation_persisted(
            CommandSpec::default()
                .arg("clip_id", ParamRule::string().required())
                .arg("target_track_id", ParamRule::string().required())
                .arg("new_start_frame", ParamRule::time()),
        ),
    );

    specs.insert(
        "DuplicateBlock",
        mutation_persisted(
            CommandSpec::default()
                .arg("clip_ids", ParamRule::table().required())
                .arg("target_track_id", ParamRule::string().required())
                .arg("anchor_clip_id", ParamRule::string().required())
                .arg("delta_frames", ParamRule::time().required()),
        )
        .persisted_key("applied_delta", ParamRule::number())
        .persisted_key("copies", ParamRule::table()),
    );

    specs.insert(
        "DuplicateMasterClip",
        CommandSpec::default()
            .arg(
                "snapshot",
                ParamRule::table()
                    .required()
                    .field("name", ParamKind::String, true)
                    .field("media_id", ParamKind::String, false)
                    .field("duration_frames", ParamKind::Number, true)
                    .field("source_in_frame", ParamKind::Number, false)
                    .field("source_out_frame", ParamKind::Number, false)
                    .field("fps_num", ParamKind::Number, true)
                    .field("fps_den", ParamKind::Number, true)
                    .field("properties", ParamKind::Table, false),
            )
            .arg("target_bin", ParamRule::string().empty_as_nil())
            .persisted_key("created_clip_id", ParamRule::string())
            .persisted_key("created_clip", ParamRule::table())
            .persisted_key("created_properties", ParamRule::table()),
    );

    specs.insert(
        "SetPlayhead",
        CommandSpec::default()
            .arg(
                "sequence_id",
                ParamRule::string().required_outside_ui_context(),
            )
            .arg(
                "playhead_frame",
                ParamRule::time().required().aliases(&["frame"]),
            )
            .persisted_key("original_playhead", ParamRule::number())
            .persisted_key("new_playhead", ParamRule::number())
            .persisted_key("sequence_id", ParamRule::string()),
    );

    specs.insert(
        "SetActiveSequence",
        CommandSpec::default()
            .arg("sequence_id", ParamRule::string().required())
            .persisted_key("original_active_sequence", ParamRule::string())
            .persisted_key("new_active_sequence", ParamRule::string()),
    );

    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(json: Value) -> ParamMap {
        json.as_object().cloned().unwrap()
    }

    #[test]
    fn test_registry_covers_all_executors() {
        for name in [
            "Insert",
            "Overwrite",
            "SplitClip",
            "DeleteClip",
            "BatchCommand",
            "RippleDelete",
            "RippleDeleteSelection",
            "RippleEdit",
            "BatchRippleEdit",
            "Nudge",
            "MoveClipToTrack",
            "DuplicateBlock",
            "DuplicateMasterClip",
            "SetPlayhead",
            "SetActiveSequence",
            "ImportMedia",
            "CreateSequence",
            "AddTrack",
        ] {
            assert!(spec_for(name).is_some(), "missing spec for {name}");
        }
    }

    #[test]
    fn test_unknown_key_rejected() {
        let spec = spec_for("DeleteClip").unwrap();
        let result = validate_and_normalize(
            "DeleteClip",
            spec,
            &params(serde_json::json!({"clip_id": "c", "bogus": 1})),
            ValidateOpts::default(),
        );
        assert!(matches!(result, Err(CoreError::ValidationError { .. })));
    }

    #[test]
    fn test_required_enforced() {
        let spec = spec_for("DeleteClip").unwrap();
        let result = validate_and_normalize(
            "DeleteClip",
            spec,
            &params(serde_json::json!({})),
            ValidateOpts::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let spec = spec_for("CreateSequence").unwrap();
        let normalized = validate_and_normalize(
            "CreateSequence",
            spec,
            &params(serde_json::json!({"name": "Main"})),
            ValidateOpts::default(),
        )
        .unwrap();
        assert_eq!(normalized["fps_num"], 30);
        assert_eq!(normalized["kind"], "timeline");

        let no_defaults = validate_and_normalize(
            "CreateSequence",
            spec,
            &params(serde_json::json!({"name": "Main"})),
            ValidateOpts {
                apply_defaults: false,
                ..ValidateOpts::default()
            },
        )
        .unwrap();
        assert!(!no_defaults.contains_key("fps_num"));
    }

    #[test]
    fn test_aliases_normalize() {
        let spec = spec_for("ImportMedia").unwrap();
        let normalized = validate_and_normalize(
            "ImportMedia",
            spec,
            &params(serde_json::json!({
                "name": "shot.mov",
                "uri": "/footage/shot.mov",
                "duration_frames": 240,
                "fps_num": 24,
            })),
            ValidateOpts::default(),
        )
        .unwrap();
        assert_eq!(normalized["file_path"], "/footage/shot.mov");
        assert!(!normalized.contains_key("uri"));
    }

    #[test]
    fn test_alias_duplicate_rejected() {
        let spec = spec_for("ImportMedia").unwrap();
        let result = validate_and_normalize(
            "ImportMedia",
            spec,
            &params(serde_json::json!({
                "name": "shot.mov",
                "uri": "/a",
                "file_path": "/b",
                "duration_frames": 240,
                "fps_num": 24,
            })),
            ValidateOpts::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_one_of_enforced() {
        let spec = spec_for("AddTrack").unwrap();
        let result = validate_and_normalize(
            "AddTrack",
            spec,
            &params(serde_json::json!({"sequence_id": "s", "track_type": "MIDI"})),
            ValidateOpts::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_requires_any() {
        let spec = spec_for("Insert").unwrap();
        let result = validate_and_normalize(
            "Insert",
            spec,
            &params(serde_json::json!({"track_id": "t", "insert_time": 0})),
            ValidateOpts::default(),
        );
        assert!(result.is_err());

        let ok = validate_and_normalize(
            "Insert",
            spec,
            &params(serde_json::json!({
                "track_id": "t",
                "insert_time": 0,
                "media_id": "m",
            })),
            ValidateOpts::default(),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_empty_as_nil() {
        let spec = spec_for("Insert").unwrap();
        let normalized = validate_and_normalize(
            "Insert",
            spec,
            &params(serde_json::json!({
                "track_id": "t",
                "insert_time": 0,
                "media_id": "m",
                "name": "",
            })),
            ValidateOpts::default(),
        )
        .unwrap();
        assert!(!normalized.contains_key("name"));
    }

    #[test]
    fn test_ephemeral_keys_pass_through() {
        let spec = spec_for("DeleteClip").unwrap();
        let normalized = validate_and_normalize(
            "DeleteClip",
            spec,
            &params(serde_json::json!({"clip_id": "c", "__source": "keyboard"})),
            ValidateOpts::default(),
        )
        .unwrap();
        assert_eq!(normalized["__source"], "keyboard");
    }

    #[test]
    fn test_ui_context_relaxes_requirements() {
        let spec = spec_for("SetPlayhead").unwrap();
        let bag = params(serde_json::json!({"frame": 42}));

        let outside = validate_and_normalize(
            "SetPlayhead",
            spec,
            &bag,
            ValidateOpts::default(),
        );
        assert!(outside.is_err());

        let inside = validate_and_normalize(
            "SetPlayhead",
            spec,
            &bag,
            ValidateOpts {
                is_ui_context: true,
                ..ValidateOpts::default()
            },
        )
        .unwrap();
        assert_eq!(inside["playhead_frame"], 42);
    }

    #[test]
    fn test_table_fields_checked() {
        let spec = spec_for("DuplicateMasterClip").unwrap();
        let bad = validate_and_normalize(
            "DuplicateMasterClip",
            spec,
            &params(serde_json::json!({
                "snapshot": {"name": "shot", "duration_frames": "long", "fps_num": 24, "fps_den": 1},
            })),
            ValidateOpts::default(),
        );
        assert!(bad.is_err());

        let missing = validate_and_normalize(
            "DuplicateMasterClip",
            spec,
            &params(serde_json::json!({
                "snapshot": {"name": "shot", "fps_num": 24, "fps_den": 1},
            })),
            ValidateOpts::default(),
        );
        assert!(missing.is_err());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let spec = spec_for("DeleteClip").unwrap();
        let result = validate_and_normalize(
            "DeleteClip",
            spec,
            &params(serde_json::json!({"clip_id": 17})),
            ValidateOpts::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "unknown parameter")]
    fn test_asserts_enabled_panics() {
        let spec = spec_for("DeleteClip").unwrap();
        let _ = validate_and_normalize(
            "DeleteClip",
            spec,
            &params(serde_json::json!({"clip_id": "c", "bogus": 1})),
            ValidateOpts {
                asserts_enabled: true,
                ..ValidateOpts::default()
            },
        );
    }
}
