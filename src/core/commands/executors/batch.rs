//! Batch Executor
//!
//! A list of child command specs executed under one sequence number and
//! one undo group. Children never get their own command records; their
//! persisted payloads live inside the batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::commands::{spec_for, validate_and_normalize, Command, ValidateOpts};
use crate::core::events::EventScope;
use crate::core::store::Database;
use crate::core::{CoreError, CoreResult};

use super::{default_registry, EventPayloads, ExecContext, Executor};

/// Persisted record of one executed child.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChildRecord {
    command_type: String,
    parameters: Value,
    persisted: Value,
}

/// Executes a list of child commands atomically.
pub struct BatchCommandExecutor;

impl Executor for BatchCommandExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let specs = cmd.array_param("commands")?.clone();
        if specs.is_empty() {
            return Err(CoreError::validation(&cmd.command_type, "empty batch"));
        }

        let registry = default_registry();
        let mut children = Vec::new();
        let mut timeline_sequence: Option<String> = None;
        let mut timeline_mutations = Vec::new();
        let mut media_payload = None;
        let mut ui_payload = None;

        for child_spec in &specs {
            let child_type = child_spec
                .get("command_type")
                .or_else(|| child_spec.get("type"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    CoreError::validation(&cmd.command_type, "child missing command_type")
                })?
                .to_string();
            if child_type == "BatchCommand" {
                return Err(CoreError::validation(
                    &cmd.command_type,
                    "batches cannot nest",
                ));
            }

            let raw_params = child_spec
                .get("parameters")
                .or_else(|| child_spec.get("params"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let schema = spec_for(&child_type)
                .ok_or_else(|| CoreError::UnknownCommand(child_type.clone()))?;
            let normalized = validate_and_normalize(
                &child_type,
                schema,
                &raw_params,
                ValidateOpts {
                    is_ui_context: ctx.is_ui_context,
                    ..ValidateOpts::default()
                },
            )?;

            let executor = registry
                .get(&child_type)
                .ok_or_else(|| CoreError::UnknownCommand(child_type.clone()))?;

            let mut child = Command::new(&child_type, &ctx.project_id, normalized);
            child.undo_group_id = cmd.undo_group_id.clone();
            let payloads = executor.execute(db, &mut child, ctx)?;

            if let Some(timeline) = payloads.timeline {
                if timeline_sequence.is_none() {
                    timeline_sequence = timeline
                        .get("sequence_id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
                if let Some(mutations) = timeline.get("mutations").and_then(Value::as_array) {
                    timeline_mutations.extend(mutations.iter().cloned());
                }
            }
            if payloads.media.is_some() {
                media_payload = payloads.media;
            }
            if payloads.ui.is_some() {
                ui_payload = payloads.ui;
            }

            children.push(ChildRecord {
                command_type: child.command_type.clone(),
                parameters: Value::Object(child.parameters.clone()),
                persisted: Value::Object(child.persisted.clone()),
            });
        }

        cmd.persist_serialized("children", &children)?;

        let scope = match &timeline_sequence {
            Some(seq) => EventScope::Timeline(seq.clone()),
            None if media_payload.is_some() => EventScope::Media,
            None if ui_payload.is_some() => EventScope::Ui,
            None => EventScope::Command,
        };
        Ok(EventPayloads {
            scope,
            timeline: timeline_sequence.map(|seq| {
                serde_json::json!({
                    "sequence_id": seq,
                    "mutations": timeline_mutations,
                })
            }),
            media: media_payload,
            ui: ui_payload,
        })
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let registry = default_registry();
        let children: Vec<ChildRecord> = cmd.persisted_deserialized("children")?;
        for record in children.iter().rev() {
            let executor = registry
                .get(&record.command_type)
                .ok_or_else(|| CoreError::UnknownCommand(record.command_type.clone()))?;
            let child = rebuild(cmd, record);
            executor.undo(db, &child)?;
        }
        Ok(())
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let registry = default_registry();
        let children: Vec<ChildRecord> = cmd.persisted_deserialized("children")?;
        for record in &children {
            let executor = registry
                .get(&record.command_type)
                .ok_or_else(|| CoreError::UnknownCommand(record.command_type.clone()))?;
            let child = rebuild(cmd, record);
            executor.redo(db, &child)?;
        }
        Ok(())
    }
}

fn rebuild(batch: &Command, record: &ChildRecord) -> Command {
    let mut child = Command::new(
        &record.command_type,
        &batch.project_id,
        record
            .parameters
            .as_object()
            .cloned()
            .unwrap_or_default(),
    );
    child.persisted = record.persisted.as_object().cloned().unwrap_or_default();
    child.undo_group_id = batch.undo_group_id.clone();
    child
}
