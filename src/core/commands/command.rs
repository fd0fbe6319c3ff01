//! Command Value
//!
//! The in-flight representation of one operation: a type name, the
//! caller's parameter bag, and the executor-written persisted payload
//! that makes the operation reversible.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::store::CommandRow;
use crate::core::time::{hydrate, FrameRate, RationalTime};
use crate::core::{
    new_command_id, CommandId, CoreError, CoreResult, ProjectId, StackId, UndoGroupId,
};

/// JSON object used for parameters and persisted payloads.
pub type ParamMap = serde_json::Map<String, Value>;

/// One command, from submission through persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub command_type: String,
    pub project_id: ProjectId,
    /// Caller-provided, schema-normalized parameters.
    pub parameters: ParamMap,
    /// Executor-written undo/redo payload.
    pub persisted: ParamMap,
    /// Assigned on execute; zero beforehand.
    pub sequence_number: i64,
    /// The stack cursor at entry.
    pub parent_sequence_number: i64,
    pub stack_id: Option<StackId>,
    pub undo_group_id: Option<UndoGroupId>,
    pub playhead_value: Option<i64>,
    pub executed_at: Option<String>,
}

impl Command {
    pub fn new(command_type: &str, project_id: &str, parameters: ParamMap) -> Self {
        Self {
            id: new_command_id(),
            command_type: command_type.to_string(),
            project_id: project_id.to_string(),
            parameters,
            persisted: ParamMap::new(),
            sequence_number: 0,
            parent_sequence_number: 0,
            stack_id: None,
            undo_group_id: None,
            playhead_value: None,
            executed_at: None,
        }
    }

    /// Rebuilds the in-flight value from a persisted record, for undo
    /// and redo replay.
    pub fn from_row(row: &CommandRow) -> Self {
        let as_map = |value: &Value| -> ParamMap {
            value.as_object().cloned().unwrap_or_default()
        };
        Self {
            id: row.command_id.clone(),
            command_type: row.command_type.clone(),
            project_id: row.project_id.clone(),
            parameters: as_map(&row.command_args),
            persisted: as_map(&row.persisted),
            sequence_number: row.sequence_number,
            parent_sequence_number: row.parent_sequence_number,
            stack_id: Some(row.stack_id.clone()),
            undo_group_id: row.undo_group_id.clone(),
            playhead_value: row.playhead_value,
            executed_at: Some(row.executed_at.clone()),
        }
    }

    /// The persisted shape of this command.
    pub fn to_row(&self) -> CommandRow {
        CommandRow {
            sequence_number: self.sequence_number,
            parent_sequence_number: self.parent_sequence_number,
            command_id: self.id.clone(),
            command_type: self.command_type.clone(),
            command_args: Value::Object(self.parameters.clone()),
            persisted: Value::Object(self.persisted.clone()),
            project_id: self.project_id.clone(),
            stack_id: self
                .stack_id
                .clone()
                .unwrap_or_else(|| "global".to_string()),
            executed_at: self.executed_at.clone().unwrap_or_default(),
            playhead_value: self.playhead_value,
            undo_group_id: self.undo_group_id.clone(),
        }
    }

    // =========================================================================
    // Parameter Accessors
    // =========================================================================

    pub fn str_param(&self, key: &str) -> CoreResult<&str> {
        self.parameters
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| self.missing(key))
    }

    pub fn opt_str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn i64_param(&self, key: &str) -> CoreResult<i64> {
        self.parameters
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| self.missing(key))
    }

    pub fn opt_i64_param(&self, key: &str) -> Option<i64> {
        self.parameters.get(key).and_then(Value::as_i64)
    }

    pub fn bool_param(&self, key: &str, default: bool) -> bool {
        self.parameters
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn array_param(&self, key: &str) -> CoreResult<&Vec<Value>> {
        self.parameters
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| self.missing(key))
    }

    /// Hydrates a time-valued parameter: raw integers take
    /// `default_rate`, rational objects carry their own.
    pub fn time_param(&self, key: &str, default_rate: FrameRate) -> CoreResult<RationalTime> {
        let value = self.parameters.get(key).ok_or_else(|| self.missing(key))?;
        hydrate(value, default_rate)
    }

    fn missing(&self, key: &str) -> CoreError {
        CoreError::validation(&self.command_type, format!("missing parameter: {key}"))
    }

    // =========================================================================
    // Persisted Payload
    // =========================================================================

    pub fn persist(&mut self, key: &str, value: Value) {
        self.persisted.insert(key.to_string(), value);
    }

    pub fn persist_serialized<T: Serialize>(&mut self, key: &str, value: &T) -> CoreResult<()> {
        self.persisted
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn persisted_value(&self, key: &str) -> CoreResult<&Value> {
        self.persisted.get(key).ok_or_else(|| {
            CoreError::Internal(format!(
                "command {} is missing persisted payload key {key}",
                self.command_type
            ))
        })
    }

    pub fn persisted_deserialized<T: for<'de> Deserialize<'de>>(&self, key: &str) -> CoreResult<T> {
        Ok(serde_json::from_value(self.persisted_value(key)?.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(json: Value) -> ParamMap {
        json.as_object().cloned().unwrap()
    }

    #[test]
    fn test_param_accessors() {
        let cmd = Command::new(
            "Insert",
            "p1",
            params(serde_json::json!({
                "track_id": "t1",
                "insert_time": 50,
                "advance_playhead": true,
                "clip_ids": ["a", "b"],
            })),
        );

        assert_eq!(cmd.str_param("track_id").unwrap(), "t1");
        assert_eq!(cmd.i64_param("insert_time").unwrap(), 50);
        assert!(cmd.bool_param("advance_playhead", false));
        assert!(cmd.bool_param("absent", true));
        assert_eq!(cmd.array_param("clip_ids").unwrap().len(), 2);
        assert!(matches!(
            cmd.str_param("nope"),
            Err(CoreError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_time_param_hydration() {
        let cmd = Command::new(
            "Insert",
            "p1",
            params(serde_json::json!({
                "plain": 10,
                "rational": {"frames": 5, "fps_num": 24, "fps_den": 1},
            })),
        );
        let plain = cmd.time_param("plain", FrameRate::FPS_30).unwrap();
        assert_eq!(plain.rate, FrameRate::FPS_30);
        let rational = cmd.time_param("rational", FrameRate::FPS_30).unwrap();
        assert_eq!(rational.rate, FrameRate::FPS_24);
    }

    #[test]
    fn test_row_roundtrip() {
        let mut cmd = Command::new("DeleteClip", "p1", params(serde_json::json!({"clip_id": "c"})));
        cmd.sequence_number = 9;
        cmd.parent_sequence_number = 8;
        cmd.executed_at = Some("2026-01-01T00:00:00Z".into());
        cmd.persist("original", serde_json::json!({"id": "c"}));

        let row = cmd.to_row();
        assert_eq!(row.stack_id, "global");
        let back = Command::from_row(&row);
        assert_eq!(back.command_type, "DeleteClip");
        assert_eq!(back.sequence_number, 9);
        assert_eq!(back.persisted_value("original").unwrap()["id"], "c");
    }
}
