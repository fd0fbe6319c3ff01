//! Command Manager
//!
//! Routes commands to executors, assigns monotonic sequence numbers,
//! runs the persist-project-commit pipeline, and owns the undo/redo
//! stacks. Callers observe only `{success, error_message}` outcomes.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::events::{event_id, EventEnvelope, EventLog, ReadModel};
use crate::core::store::{CommandRow, Database};
use crate::core::{
    new_entity_id, now_rfc3339, now_unix_ms, CoreError, CoreResult, ProjectId, SequenceId,
    StackId, UndoGroupId,
};

use super::executors::{default_registry, EventPayloads, ExecContext, Executor};
use super::{spec_for, validate_and_normalize, Command, ParamMap, ValidateOpts};

/// Default stack id.
const GLOBAL_STACK: &str = "global";

// =============================================================================
// Outcomes & Stack State
// =============================================================================

/// The `{success, error_message, sequence_number}` tuple surfaced to
/// external collaborators.
#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub success: bool,
    pub error_message: Option<String>,
    pub sequence_number: Option<i64>,
}

impl ExecOutcome {
    fn ok(sequence_number: Option<i64>) -> Self {
        Self {
            success: true,
            error_message: None,
            sequence_number,
        }
    }

    fn err(error: &CoreError) -> Self {
        Self {
            success: false,
            error_message: Some(error.to_caller_message()),
            sequence_number: None,
        }
    }
}

/// In-memory state of one undo stack.
#[derive(Clone, Debug, Default)]
pub struct StackState {
    pub current_sequence_number: i64,
    pub sequence_id: Option<SequenceId>,
    pub position_initialized: bool,
}

/// Manager configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Enables `timeline:<sequence_id>` stacks beside the global one.
    pub multi_stack_enabled: bool,
    /// Development mode: validation failures panic instead of returning
    /// error outcomes.
    pub asserts_enabled: bool,
    /// Event author, `node:<user>`.
    pub author: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        Self {
            multi_stack_enabled: false,
            asserts_enabled: false,
            author: format!("node:{user}"),
        }
    }
}

struct ActiveGroup {
    id: UndoGroupId,
    label: String,
    depth: usize,
    cursor_on_entry: i64,
}

// =============================================================================
// Manager
// =============================================================================

/// Central command router and undo-stack owner.
pub struct CommandManager {
    project_id: ProjectId,
    executors: BTreeMap<String, Box<dyn Executor>>,
    stacks: BTreeMap<StackId, StackState>,
    last_sequence_number: i64,
    config: ManagerConfig,
    active_group: Option<ActiveGroup>,
    listeners: Vec<Box<dyn FnMut(&Command)>>,
}

impl CommandManager {
    pub fn new(db: &Database, project_id: &str, config: ManagerConfig) -> CoreResult<Self> {
        Ok(Self {
            project_id: project_id.to_string(),
            executors: default_registry(),
            stacks: BTreeMap::new(),
            last_sequence_number: db.last_sequence_number()?,
            config,
            active_group: None,
            listeners: Vec::new(),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Registers a callback invoked after every committed command.
    pub fn add_listener(&mut self, listener: Box<dyn FnMut(&Command)>) {
        self.listeners.push(listener);
    }

    /// Current state of a stack, if it has been touched.
    pub fn stack_state(&self, stack_id: &str) -> Option<&StackState> {
        self.stacks.get(stack_id)
    }

    // =========================================================================
    // Public Surface
    // =========================================================================

    /// Executes a code-initiated command.
    pub fn execute(
        &mut self,
        db: &Database,
        events: &EventLog,
        readmodel: &ReadModel,
        command_type: &str,
        params: ParamMap,
    ) -> ExecOutcome {
        match self.execute_inner(db, events, readmodel, command_type, params, false) {
            Ok(n) => ExecOutcome::ok(Some(n)),
            Err(e) => {
                tracing::warn!(command_type, error = %e, "Command failed");
                ExecOutcome::err(&e)
            }
        }
    }

    /// Executes a key- or menu-initiated command; relaxes
    /// `required_outside_ui_context` keys.
    pub fn execute_ui(
        &mut self,
        db: &Database,
        events: &EventLog,
        readmodel: &ReadModel,
        command_type: &str,
        params: ParamMap,
    ) -> ExecOutcome {
        match self.execute_inner(db, events, readmodel, command_type, params, true) {
            Ok(n) => ExecOutcome::ok(Some(n)),
            Err(e) => {
                tracing::warn!(command_type, error = %e, "UI command failed");
                ExecOutcome::err(&e)
            }
        }
    }

    /// Undoes the newest command (or whole undo group) on the default
    /// stack.
    pub fn undo(&mut self, db: &Database) -> ExecOutcome {
        let stack_id = self.default_stack(db);
        match self.undo_on(db, &stack_id) {
            Ok(()) => ExecOutcome::ok(None),
            Err(e) => ExecOutcome::err(&e),
        }
    }

    /// Redoes the latest undone branch on the default stack.
    pub fn redo(&mut self, db: &Database) -> ExecOutcome {
        let stack_id = self.default_stack(db);
        match self.redo_on(db, &stack_id) {
            Ok(()) => ExecOutcome::ok(None),
            Err(e) => ExecOutcome::err(&e),
        }
    }

    /// Opens an undo group; nested begins collapse into the outermost
    /// group. Returns the group id labelling subsequent commands.
    pub fn begin_undo_group(&mut self, label: &str, id: Option<String>) -> UndoGroupId {
        if let Some(group) = &mut self.active_group {
            group.depth += 1;
            return group.id.clone();
        }
        let group_id = id.unwrap_or_else(new_entity_id);
        tracing::debug!(group_id = %group_id, label, "Opening undo group");
        self.active_group = Some(ActiveGroup {
            id: group_id.clone(),
            label: label.to_string(),
            depth: 1,
            cursor_on_entry: self.last_sequence_number,
        });
        group_id
    }

    /// Closes the innermost begin; the group ends when the outermost
    /// begin is balanced.
    pub fn end_undo_group(&mut self) {
        match &mut self.active_group {
            Some(group) if group.depth > 1 => group.depth -= 1,
            Some(group) => {
                tracing::debug!(
                    group_id = %group.id,
                    label = %group.label,
                    cursor_on_entry = group.cursor_on_entry,
                    "Closing undo group"
                );
                self.active_group = None;
            }
            None => tracing::warn!("end_undo_group without a matching begin"),
        }
    }

    pub fn can_undo(&mut self, db: &Database) -> bool {
        let stack_id = self.default_stack(db);
        self.ensure_stack(db, &stack_id)
            .map(|s| s.current_sequence_number > 0)
            .unwrap_or(false)
    }

    pub fn can_redo(&mut self, db: &Database) -> bool {
        let stack_id = self.default_stack(db);
        let Ok(state) = self.ensure_stack(db, &stack_id) else {
            return false;
        };
        let cursor = state.current_sequence_number;
        db.find_latest_child_command(cursor, &stack_id)
            .map(|c| c.is_some())
            .unwrap_or(false)
    }

    // =========================================================================
    // Execution Pipeline
    // =========================================================================

    fn execute_inner(
        &mut self,
        db: &Database,
        events: &EventLog,
        readmodel: &ReadModel,
        command_type: &str,
        params: ParamMap,
        is_ui_context: bool,
    ) -> CoreResult<i64> {
        let schema = spec_for(command_type)
            .ok_or_else(|| CoreError::UnknownCommand(command_type.to_string()))?;
        let normalized = validate_and_normalize(
            command_type,
            schema,
            &params,
            ValidateOpts {
                apply_defaults: true,
                is_ui_context,
                asserts_enabled: self.config.asserts_enabled,
            },
        )?;

        let target_sequence = self.resolve_target_sequence(db, &normalized);
        let stack_id = self.resolve_stack(command_type, &normalized, target_sequence.as_deref());
        let parent = self.ensure_stack(db, &stack_id)?.current_sequence_number;

        self.last_sequence_number += 1;
        let sequence_number = self.last_sequence_number;

        let playhead_value = match &target_sequence {
            Some(seq_id) => db.get_sequence(seq_id).ok().map(|s| s.playhead_frame),
            None => None,
        };

        let mut cmd = Command::new(command_type, &self.project_id, normalized);
        cmd.sequence_number = sequence_number;
        cmd.parent_sequence_number = parent;
        cmd.stack_id = Some(stack_id.clone());
        cmd.undo_group_id = self.active_group.as_ref().map(|g| g.id.clone());
        cmd.playhead_value = playhead_value;

        tracing::debug!(
            command_type,
            sequence_number,
            parent_sequence_number = parent,
            stack_id = %stack_id,
            "Executing command"
        );

        let ctx = ExecContext {
            project_id: self.project_id.clone(),
            sequence_id: target_sequence,
            parent_sequence_number: parent,
            stack_id: stack_id.clone(),
            is_ui_context,
        };

        db.begin_immediate()?;
        let result = self.run_pipeline(db, events, readmodel, &mut cmd, &ctx);
        match result {
            Ok(()) => {
                db.commit()?;
                self.stacks
                    .entry(stack_id)
                    .or_default()
                    .current_sequence_number = sequence_number;
                for listener in &mut self.listeners {
                    listener(&cmd);
                }
                Ok(sequence_number)
            }
            Err(e) => {
                let _ = db.rollback();
                self.last_sequence_number -= 1;
                Err(e)
            }
        }
    }

    /// Everything between BEGIN and COMMIT: executor, command record,
    /// projection, stream append, cursor persist.
    fn run_pipeline(
        &self,
        db: &Database,
        events: &EventLog,
        readmodel: &ReadModel,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<()> {
        let executor = self
            .executors
            .get(&cmd.command_type)
            .ok_or_else(|| CoreError::UnknownCommand(cmd.command_type.clone()))?;

        let payloads = executor.execute(db, cmd, ctx)?;

        cmd.executed_at = Some(now_rfc3339());
        strip_ephemeral(&mut cmd.parameters);
        db.insert_command(&cmd.to_row())?;
        self.persist_cursor(db, &ctx.stack_id, cmd.sequence_number)?;

        let envelope = self.build_envelope(cmd, payloads);
        // Projection first: on failure the primary rolls back too and
        // no stream line is written, keeping the log the ground truth.
        readmodel.apply_event(&envelope)?;
        if let Err(e) = events.append(&envelope) {
            // The read model is now one event ahead; the cursor check on
            // next open rebuilds it from the stream.
            tracing::error!(error = %e, "Event stream append failed after projection");
            return Err(e);
        }
        Ok(())
    }

    fn build_envelope(&self, cmd: &Command, payloads: EventPayloads) -> EventEnvelope {
        EventEnvelope {
            id: event_id(cmd.sequence_number),
            event_type: cmd.command_type.clone(),
            scope: payloads.scope.as_string(),
            ts: now_unix_ms(),
            author: self.config.author.clone(),
            parents: if cmd.parent_sequence_number > 0 {
                vec![event_id(cmd.parent_sequence_number)]
            } else {
                vec![]
            },
            schema: 1,
            payload_v: 1,
            command_id: cmd.id.clone(),
            project_id: cmd.project_id.clone(),
            stack_id: cmd.stack_id.clone().unwrap_or_else(|| GLOBAL_STACK.into()),
            timeline_payload: payloads.timeline,
            media_payload: payloads.media,
            ui_payload: payloads.ui,
            generic_payload: serde_json::json!({
                "parameters": Value::Object(cmd.parameters.clone()),
                "sequence_number": cmd.sequence_number,
                "playhead_value": cmd.playhead_value,
            }),
        }
    }

    // =========================================================================
    // Undo / Redo
    // =========================================================================

    fn undo_on(&mut self, db: &Database, stack_id: &str) -> CoreResult<()> {
        let cursor = self.ensure_stack(db, stack_id)?.current_sequence_number;
        if cursor == 0 {
            return Err(CoreError::NothingToUndo);
        }

        let row = db.get_command(cursor)?;
        let members = self.group_members(db, &row)?;

        db.begin_immediate()?;
        let result = (|| -> CoreResult<i64> {
            for member in members.iter().rev() {
                let executor = self
                    .executors
                    .get(&member.command_type)
                    .ok_or_else(|| CoreError::UnknownCommand(member.command_type.clone()))?;
                tracing::debug!(
                    command_type = %member.command_type,
                    sequence_number = member.sequence_number,
                    "Undoing command"
                );
                executor.undo(db, &Command::from_row(member))?;
            }
            let new_cursor = members
                .first()
                .map(|m| m.parent_sequence_number)
                .unwrap_or(0);
            self.persist_cursor(db, stack_id, new_cursor)?;
            Ok(new_cursor)
        })();

        match result {
            Ok(new_cursor) => {
                db.commit()?;
                self.stacks
                    .entry(stack_id.to_string())
                    .or_default()
                    .current_sequence_number = new_cursor;
                Ok(())
            }
            Err(e) => {
                let _ = db.rollback();
                Err(e)
            }
        }
    }

    fn redo_on(&mut self, db: &Database, stack_id: &str) -> CoreResult<()> {
        let cursor = self.ensure_stack(db, stack_id)?.current_sequence_number;
        let child = db
            .find_latest_child_command(cursor, stack_id)?
            .ok_or(CoreError::NothingToRedo)?;
        let members = self.group_members(db, &child)?;

        db.begin_immediate()?;
        let result = (|| -> CoreResult<i64> {
            for member in &members {
                let executor = self
                    .executors
                    .get(&member.command_type)
                    .ok_or_else(|| CoreError::UnknownCommand(member.command_type.clone()))?;
                tracing::debug!(
                    command_type = %member.command_type,
                    sequence_number = member.sequence_number,
                    "Redoing command"
                );
                executor.redo(db, &Command::from_row(member))?;
            }
            let new_cursor = members
                .last()
                .map(|m| m.sequence_number)
                .unwrap_or(cursor);
            self.persist_cursor(db, stack_id, new_cursor)?;
            Ok(new_cursor)
        })();

        match result {
            Ok(new_cursor) => {
                db.commit()?;
                self.stacks
                    .entry(stack_id.to_string())
                    .or_default()
                    .current_sequence_number = new_cursor;
                Ok(())
            }
            Err(e) => {
                let _ = db.rollback();
                Err(e)
            }
        }
    }

    /// A command's whole undo group (itself when ungrouped), ascending.
    fn group_members(&self, db: &Database, row: &CommandRow) -> CoreResult<Vec<CommandRow>> {
        match &row.undo_group_id {
            Some(group_id) => db.commands_in_group(group_id),
            None => Ok(vec![row.clone()]),
        }
    }

    // =========================================================================
    // Stacks
    // =========================================================================

    /// Stack routing: explicit `__stack_id`, then the type-keyed
    /// resolver, then the `sequence_id` parameter, then global.
    fn resolve_stack(
        &self,
        command_type: &str,
        params: &ParamMap,
        target_sequence: Option<&str>,
    ) -> StackId {
        if !self.config.multi_stack_enabled {
            return GLOBAL_STACK.to_string();
        }
        if let Some(explicit) = params.get("__stack_id").and_then(Value::as_str) {
            return explicit.to_string();
        }
        if timeline_scoped(command_type) {
            if let Some(seq) = target_sequence {
                return format!("timeline:{seq}");
            }
        }
        if let Some(seq) = params.get("sequence_id").and_then(Value::as_str) {
            return format!("timeline:{seq}");
        }
        GLOBAL_STACK.to_string()
    }

    fn default_stack(&mut self, db: &Database) -> StackId {
        if self.config.multi_stack_enabled {
            if let Some(seq) = active_sequence(db, &self.project_id) {
                return format!("timeline:{seq}");
            }
        }
        GLOBAL_STACK.to_string()
    }

    /// Loads a stack's persisted cursor on first touch, repairing an
    /// orphaned cursor that names a missing command.
    fn ensure_stack(&mut self, db: &Database, stack_id: &str) -> CoreResult<&StackState> {
        if !self
            .stacks
            .get(stack_id)
            .map(|s| s.position_initialized)
            .unwrap_or(false)
        {
            let sequence_id = stack_id.strip_prefix("timeline:").map(str::to_string);
            let mut cursor = match &sequence_id {
                Some(seq) => db.get_sequence(seq)?.current_sequence_number,
                None => db.get_project(&self.project_id)?.current_sequence_number,
            };

            if cursor > 0 && !db.command_exists(cursor)? {
                let repaired = db.last_sequence_number()?;
                tracing::warn!(
                    stack_id,
                    orphaned = cursor,
                    repaired,
                    "Undo cursor names a missing command, repairing"
                );
                cursor = repaired;
                self.persist_cursor(db, stack_id, cursor)?;
            }

            self.stacks.insert(
                stack_id.to_string(),
                StackState {
                    current_sequence_number: cursor,
                    sequence_id,
                    position_initialized: true,
                },
            );
        }
        self.stacks
            .get(stack_id)
            .ok_or_else(|| CoreError::Internal(format!("stack {stack_id} failed to initialize")))
    }

    fn persist_cursor(&self, db: &Database, stack_id: &str, cursor: i64) -> CoreResult<()> {
        match stack_id.strip_prefix("timeline:") {
            Some(sequence_id) => db.set_sequence_cursor(sequence_id, cursor),
            None => db.set_project_cursor(&self.project_id, cursor),
        }
    }

    /// Best-effort resolution of the sequence a command targets, used
    /// for stack routing, playhead capture, and UI-context fallbacks.
    fn resolve_target_sequence(&self, db: &Database, params: &ParamMap) -> Option<SequenceId> {
        if let Some(seq) = params.get("sequence_id").and_then(Value::as_str) {
            return Some(seq.to_string());
        }
        if let Some(track_id) = params.get("track_id").and_then(Value::as_str) {
            if let Ok(track) = db.get_track(track_id) {
                return Some(track.sequence_id);
            }
        }
        for key in ["clip_id", "anchor_clip_id"] {
            if let Some(clip_id) = params.get(key).and_then(Value::as_str) {
                if let Ok(clip) = db.get_clip(clip_id) {
                    if let Some(track_id) = clip.track_id {
                        if let Ok(track) = db.get_track(&track_id) {
                            return Some(track.sequence_id);
                        }
                    }
                }
            }
        }
        active_sequence(db, &self.project_id)
    }
}

fn timeline_scoped(command_type: &str) -> bool {
    matches!(
        command_type,
        "Insert"
            | "Overwrite"
            | "SplitClip"
            | "DeleteClip"
            | "RippleDelete"
            | "RippleDeleteSelection"
            | "RippleEdit"
            | "BatchRippleEdit"
            | "Nudge"
            | "MoveClipToTrack"
            | "DuplicateBlock"
    )
}

fn active_sequence(db: &Database, project_id: &str) -> Option<SequenceId> {
    db.get_project(project_id)
        .ok()
        .and_then(|p| {
            p.settings
                .get("active_sequence")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}

fn strip_ephemeral(params: &mut ParamMap) {
    params.retain(|key, _| !key.starts_with("__"));
}
