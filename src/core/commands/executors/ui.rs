//! UI-State Executors
//!
//! Playhead and active-sequence changes: persisted and event-sourced
//! like any command, but their projections only touch `ui_state`.

use serde_json::Value;

use crate::core::commands::Command;
use crate::core::store::Database;
use crate::core::{CoreError, CoreResult};

use super::{EventPayloads, ExecContext, Executor};

/// Moves a sequence's persisted playhead.
pub struct SetPlayheadExecutor;

impl SetPlayheadExecutor {
    fn target_sequence(cmd: &Command, ctx: &ExecContext) -> CoreResult<String> {
        if let Some(sequence_id) = cmd.opt_str_param("sequence_id") {
            return Ok(sequence_id.to_string());
        }
        ctx.sequence_id.clone().ok_or(CoreError::NoActiveSequence)
    }
}

impl Executor for SetPlayheadExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let sequence_id = Self::target_sequence(cmd, ctx)?;
        let seq = db.get_sequence(&sequence_id)?;
        let frame = cmd
            .time_param("playhead_frame", seq.rate())?
            .rescale_floor(seq.rate())
            .frames;
        if frame < 0 {
            return Err(CoreError::validation(
                &cmd.command_type,
                "playhead must not be negative",
            ));
        }

        db.set_sequence_playhead(&sequence_id, frame)?;
        cmd.persist("original_playhead", seq.playhead_frame.into());
        cmd.persist("sequence_id", sequence_id.clone().into());
        cmd.persist("new_playhead", frame.into());

        let mut ui = serde_json::Map::new();
        ui.insert(format!("playhead:{sequence_id}"), Value::from(frame));
        Ok(EventPayloads::ui(Value::Object(ui)))
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let sequence_id: String = cmd.persisted_deserialized("sequence_id")?;
        let original = cmd.persisted_value("original_playhead")?.as_i64().unwrap_or(0);
        db.set_sequence_playhead(&sequence_id, original)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let sequence_id: String = cmd.persisted_deserialized("sequence_id")?;
        let frame = cmd.persisted_value("new_playhead")?.as_i64().unwrap_or(0);
        db.set_sequence_playhead(&sequence_id, frame)
    }
}

/// Switches the project's active sequence.
pub struct SetActiveSequenceExecutor;

impl Executor for SetActiveSequenceExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let sequence_id = cmd.str_param("sequence_id")?.to_string();
        db.get_sequence(&sequence_id)?;

        let project = db.get_project(&ctx.project_id)?;
        let original = project
            .settings
            .get("active_sequence")
            .cloned()
            .unwrap_or(Value::Null);

        let mut settings = project.settings.clone();
        if let Some(map) = settings.as_object_mut() {
            map.insert("active_sequence".into(), Value::from(sequence_id.clone()));
        }
        db.update_project_settings(&ctx.project_id, &settings)?;

        cmd.persist("original_active_sequence", original);
        cmd.persist("new_active_sequence", sequence_id.clone().into());

        Ok(EventPayloads::ui(serde_json::json!({
            "active_sequence": sequence_id,
        })))
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let original = cmd.persisted_value("original_active_sequence")?.clone();
        set_active(db, &cmd.project_id, original)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let new_value = cmd.persisted_value("new_active_sequence")?.clone();
        set_active(db, &cmd.project_id, new_value)
    }
}

fn set_active(db: &Database, project_id: &str, value: Value) -> CoreResult<()> {
    let project = db.get_project(project_id)?;
    let mut settings = project.settings;
    if let Some(map) = settings.as_object_mut() {
        match value {
            Value::Null => {
                map.remove("active_sequence");
            }
            other => {
                map.insert("active_sequence".into(), other);
            }
        }
    }
    db.update_project_settings(project_id, &settings)
}
