//! Editor Core Session
//!
//! The explicitly constructed handle that wires the primary store, the
//! event stream, the read model, and the command manager together, and
//! exposes the command-input surface external collaborators consume.
//! No subsystem reaches for ambient globals; everything flows through
//! this handle.

use std::path::{Path, PathBuf};

use crate::core::commands::{CommandManager, ExecOutcome, ManagerConfig, ParamMap};
use crate::core::events::{EventLog, ReadModel};
use crate::core::keymap::KeyBinding;
use crate::core::store::{Database, ProjectRow};
use crate::core::{
    new_entity_id, now_rfc3339, CoreError, CoreResult, ProjectId, SequenceId, UndoGroupId,
};

/// One open project: store, event stream, read model, command manager.
pub struct EditorCore {
    db: Database,
    events: EventLog,
    readmodel: ReadModel,
    manager: CommandManager,
    project_id: ProjectId,
}

impl EditorCore {
    /// Creates a new project in `dir`: `<name>.jvp` beside
    /// `<name>.events/`. The project row itself is the only entity not
    /// created through a command.
    pub fn create<P: AsRef<Path>>(dir: P, name: &str) -> CoreResult<Self> {
        Self::create_with(dir, name, ManagerConfig::default())
    }

    pub fn create_with<P: AsRef<Path>>(
        dir: P,
        name: &str,
        config: ManagerConfig,
    ) -> CoreResult<Self> {
        let dir = dir.as_ref();
        let db = Database::open(Self::db_path(dir, name))?;

        if db.first_project()?.is_some() {
            return Err(CoreError::Internal(format!(
                "project store {name}.jvp already holds a project"
            )));
        }
        let now = now_rfc3339();
        let project = ProjectRow {
            id: new_entity_id(),
            name: name.to_string(),
            settings: serde_json::json!({}),
            current_sequence_number: 0,
            created_at: now.clone(),
            modified_at: now,
        };
        db.insert_project(&project)?;

        Self::wire(db, dir, name, project.id, config)
    }

    /// Opens an existing project.
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> CoreResult<Self> {
        Self::open_with(dir, name, ManagerConfig::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        dir: P,
        name: &str,
        config: ManagerConfig,
    ) -> CoreResult<Self> {
        let dir = dir.as_ref();
        let db = Database::open(Self::db_path(dir, name))?;
        let project = db
            .first_project()?
            .ok_or_else(|| CoreError::ProjectNotFound(name.to_string()))?;
        Self::wire(db, dir, name, project.id, config)
    }

    fn db_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.jvp"))
    }

    fn wire(
        db: Database,
        dir: &Path,
        name: &str,
        project_id: ProjectId,
        config: ManagerConfig,
    ) -> CoreResult<Self> {
        let events = EventLog::open(dir.join(format!("{name}.events")))?;
        let mut readmodel = ReadModel::open(events.readmodel_path())?;
        readmodel.validate_or_rebuild(&events)?;
        let manager = CommandManager::new(&db, &project_id, config)?;
        Ok(Self {
            db,
            events,
            readmodel,
            manager,
            project_id,
        })
    }

    // =========================================================================
    // Command Surface
    // =========================================================================

    pub fn execute(&mut self, command_type: &str, params: ParamMap) -> ExecOutcome {
        self.manager
            .execute(&self.db, &self.events, &self.readmodel, command_type, params)
    }

    pub fn execute_ui(&mut self, command_type: &str, params: ParamMap) -> ExecOutcome {
        self.manager
            .execute_ui(&self.db, &self.events, &self.readmodel, command_type, params)
    }

    /// Executes a keybinding hit in the given focus context.
    pub fn run_binding(&mut self, binding: &KeyBinding) -> ExecOutcome {
        self.execute_ui(&binding.command.clone(), binding.to_params())
    }

    pub fn undo(&mut self) -> ExecOutcome {
        self.manager.undo(&self.db)
    }

    pub fn redo(&mut self) -> ExecOutcome {
        self.manager.redo(&self.db)
    }

    pub fn begin_undo_group(&mut self, label: &str, id: Option<String>) -> UndoGroupId {
        self.manager.begin_undo_group(label, id)
    }

    pub fn end_undo_group(&mut self) {
        self.manager.end_undo_group()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn readmodel(&self) -> &ReadModel {
        &self.readmodel
    }

    pub fn manager_mut(&mut self) -> &mut CommandManager {
        &mut self.manager
    }

    /// The project's active sequence, if one was set.
    pub fn active_sequence(&self) -> Option<SequenceId> {
        self.db
            .get_project(&self.project_id)
            .ok()?
            .settings
            .get("active_sequence")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    }

    /// Project close: checkpoint the read model, reset its journal mode,
    /// and drop the sidecar journal files.
    pub fn close(self) -> CoreResult<()> {
        self.readmodel.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::event_id;
    use crate::core::keymap::parse_keymap;
    use crate::core::store::{ClipRow, TrackType};
    use crate::core::time::rescale_frames;
    use serde_json::Value;
    use tempfile::TempDir;

    fn params(json: Value) -> ParamMap {
        json.as_object().cloned().unwrap()
    }

    struct Cut {
        core: EditorCore,
        sequence_id: String,
        video_track: String,
        media_id: String,
        _temp: TempDir,
    }

    /// A project with one 30fps timeline, one video and one audio
    /// track, and one ten-minute media asset.
    fn cut() -> Cut {
        let temp = TempDir::new().unwrap();
        let mut core = EditorCore::create(temp.path(), "demo").unwrap();

        let outcome = core.execute(
            "CreateSequence",
            params(serde_json::json!({"name": "Main"})),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);
        let sequence_id = persisted_str(&core, outcome.sequence_number.unwrap(), "created_sequence_id");

        let outcome = core.execute(
            "SetActiveSequence",
            params(serde_json::json!({"sequence_id": sequence_id})),
        );
        assert!(outcome.success);

        let outcome = core.execute(
            "AddTrack",
            params(serde_json::json!({"sequence_id": sequence_id, "track_type": "VIDEO"})),
        );
        assert!(outcome.success);
        let video_track = persisted_str(&core, outcome.sequence_number.unwrap(), "created_track_id");

        let outcome = core.execute(
            "AddTrack",
            params(serde_json::json!({"sequence_id": sequence_id, "track_type": "AUDIO"})),
        );
        assert!(outcome.success);

        let outcome = core.execute(
            "ImportMedia",
            params(serde_json::json!({
                "name": "a.mov",
                "file_path": "/footage/a.mov",
                "duration_frames": 18000,
                "fps_num": 30,
            })),
        );
        assert!(outcome.success);
        let media_id = persisted_str(&core, outcome.sequence_number.unwrap(), "created_media_id");

        Cut {
            core,
            sequence_id,
            video_track,
            media_id,
            _temp: temp,
        }
    }

    fn persisted_str(core: &EditorCore, sequence_number: i64, key: &str) -> String {
        core.db()
            .get_command(sequence_number)
            .unwrap()
            .persisted[key]
            .as_str()
            .unwrap()
            .to_string()
    }

    impl Cut {
        fn overwrite(&mut self, at: i64, duration: i64) -> String {
            let outcome = self.core.execute(
                "Overwrite",
                params(serde_json::json!({
                    "track_id": self.video_track,
                    "overwrite_time": at,
                    "media_id": self.media_id,
                    "duration_frames": duration,
                })),
            );
            assert!(outcome.success, "{:?}", outcome.error_message);
            persisted_str(&self.core, outcome.sequence_number.unwrap(), "created_clip_id")
        }

        fn track_clips(&self) -> Vec<ClipRow> {
            self.core.db().clips_on_track(&self.video_track).unwrap()
        }

        fn assert_invariants(&self) {
            let seq = self.core.db().get_sequence(&self.sequence_id).unwrap();
            let seq_rate = seq.rate();
            for track in self.core.db().tracks_for_sequence(&self.sequence_id).unwrap() {
                let clips = self.core.db().clips_on_track(&track.id).unwrap();
                for window in clips.windows(2) {
                    assert!(
                        window[0].end_frame() <= window[1].timeline_start_frame,
                        "clips {} and {} overlap",
                        window[0].id,
                        window[1].id
                    );
                }
                for clip in &clips {
                    assert!(clip.duration_frames >= 1);
                    assert!(clip.timeline_start_frame >= 0);
                    assert!(clip.source_in_frame >= 0);
                    assert_eq!(
                        clip.source_out_frame - clip.source_in_frame,
                        rescale_frames(clip.duration_frames, seq_rate, clip.rate()),
                        "source range of {} out of step with its duration",
                        clip.id
                    );
                }
            }

            let commands = self.core.db().list_commands().unwrap();
            for (i, command) in commands.iter().enumerate() {
                assert_eq!(command.sequence_number, i as i64 + 1);
                assert!(command.parent_sequence_number < command.sequence_number);
            }
        }
    }

    #[test]
    fn test_s1_overwrite_trims_straddled_clips() {
        let mut cut = cut();
        let a = cut.overwrite(0, 100);
        let b = cut.overwrite(200, 100);
        let c = cut.overwrite(90, 120);

        let clip_a = cut.core.db().get_clip(&a).unwrap();
        assert_eq!(clip_a.timeline_start_frame, 0);
        assert_eq!(clip_a.duration_frames, 90);
        assert_eq!(clip_a.source_out_frame, 90);

        let clip_c = cut.core.db().get_clip(&c).unwrap();
        assert_eq!(clip_c.timeline_start_frame, 90);
        assert_eq!(clip_c.end_frame(), 210);

        let clip_b = cut.core.db().get_clip(&b).unwrap();
        assert_eq!(clip_b.timeline_start_frame, 210);
        assert_eq!(clip_b.end_frame(), 300);
        // Head trim advanced B's source by the ten consumed frames.
        assert_eq!(clip_b.source_in_frame, 10);
        assert_eq!(clip_b.source_out_frame, 100);

        cut.assert_invariants();
    }

    #[test]
    fn test_s2_insert_ripples_and_splits() {
        let mut cut = cut();
        let a = cut.overwrite(0, 100);
        let b = cut.overwrite(100, 100);

        let outcome = cut.core.execute(
            "Insert",
            params(serde_json::json!({
                "track_id": cut.video_track,
                "insert_time": 50,
                "media_id": cut.media_id,
                "duration_frames": 40,
            })),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);
        let n = persisted_str(&cut.core, outcome.sequence_number.unwrap(), "created_clip_id");

        let clips = cut.track_clips();
        assert_eq!(clips.len(), 4);

        let clip_a = cut.core.db().get_clip(&a).unwrap();
        assert_eq!((clip_a.timeline_start_frame, clip_a.end_frame()), (0, 50));
        assert_eq!(clip_a.source_out_frame, 50);

        let clip_n = cut.core.db().get_clip(&n).unwrap();
        assert_eq!((clip_n.timeline_start_frame, clip_n.end_frame()), (50, 90));

        let right = clips
            .iter()
            .find(|c| c.timeline_start_frame == 90)
            .expect("split right half");
        assert_eq!(right.end_frame(), 140);
        assert_eq!(right.source_in_frame, 50);
        assert_eq!(right.source_out_frame, 100);

        let clip_b = cut.core.db().get_clip(&b).unwrap();
        assert_eq!((clip_b.timeline_start_frame, clip_b.end_frame()), (140, 240));

        // Positive shift applies rightmost-first: B's update leads the
        // envelope, the new clip's insert closes it.
        let envelope = cut.core.events().last().unwrap().unwrap();
        let mutations = envelope.timeline_payload.as_ref().unwrap()["mutations"]
            .as_array()
            .unwrap();
        let ops: Vec<&str> = mutations
            .iter()
            .map(|m| m["op"].as_str().unwrap())
            .collect();
        assert_eq!(ops, vec!["update", "insert", "update", "insert"]);
        assert_eq!(mutations[0]["clip_id"], b.as_str());
        assert_eq!(mutations[3]["clip"]["id"], n.as_str());

        cut.assert_invariants();
    }

    #[test]
    fn test_s3_duplicate_block_clamps_across_collision() {
        let mut cut = cut();
        let a = cut.overwrite(0, 100);
        cut.overwrite(140, 60);

        let outcome = cut.core.execute(
            "DuplicateBlock",
            params(serde_json::json!({
                "clip_ids": [a],
                "target_track_id": cut.video_track,
                "anchor_clip_id": a,
                "delta_frames": 100,
            })),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);

        let row = cut
            .core
            .db()
            .get_command(outcome.sequence_number.unwrap())
            .unwrap();
        assert_eq!(row.persisted["applied_delta"], 200);
        let copy_id = row.persisted["copies"][0][1].as_str().unwrap();
        let copy = cut.core.db().get_clip(copy_id).unwrap();
        assert_eq!(copy.timeline_start_frame, 200);
        assert_eq!(copy.end_frame(), 300);

        cut.assert_invariants();
    }

    #[test]
    fn test_s6_event_stream_matches_command_order() {
        let mut cut = cut();
        let already = cut.core.events().count().unwrap() as i64;
        for i in 0..5 {
            cut.overwrite(i * 100, 50);
        }

        let envelopes = cut.core.events().read_all().unwrap().envelopes;
        assert_eq!(envelopes.len() as i64, already + 5);
        for (i, envelope) in envelopes.iter().enumerate() {
            assert_eq!(envelope.id, event_id(i as i64 + 1));
        }

        // Each projected row is derivable from its envelope alone:
        // the projection already applied them, so the read model equals
        // the authoritative rows.
        for clip in cut.track_clips() {
            let projected = cut
                .core
                .readmodel()
                .tl_clip_geometry(&clip.id)
                .unwrap()
                .expect("projected row");
            assert_eq!(projected.1, clip.timeline_start_frame);
            assert_eq!(projected.2, clip.duration_frames);
        }
    }

    #[test]
    fn test_split_clip() {
        let mut cut = cut();
        let a = cut.overwrite(0, 100);

        let outcome = cut.core.execute(
            "SplitClip",
            params(serde_json::json!({"clip_id": a, "split_time": 30})),
        );
        assert!(outcome.success);

        let clips = cut.track_clips();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].id, a);
        assert_eq!(clips[0].duration_frames, 30);
        assert_eq!(clips[0].source_out_frame, 30);
        assert_eq!(clips[1].timeline_start_frame, 30);
        assert_eq!(clips[1].source_in_frame, 30);
        assert_eq!(clips[1].source_out_frame, 100);

        // A split at either edge is rejected.
        let outcome = cut.core.execute(
            "SplitClip",
            params(serde_json::json!({"clip_id": a, "split_time": 0})),
        );
        assert!(!outcome.success);

        cut.core.undo();
        assert_eq!(cut.track_clips().len(), 1);
        cut.assert_invariants();
    }

    #[test]
    fn test_ripple_delete_closes_gap() {
        let mut cut = cut();
        let a = cut.overwrite(0, 100);
        let b = cut.overwrite(100, 50);
        let c = cut.overwrite(150, 50);

        let outcome = cut.core.execute(
            "RippleDelete",
            params(serde_json::json!({"clip_id": b})),
        );
        assert!(outcome.success);

        assert!(cut.core.db().get_clip(&b).is_err());
        assert_eq!(cut.core.db().get_clip(&c).unwrap().timeline_start_frame, 100);
        assert_eq!(cut.core.db().get_clip(&a).unwrap().timeline_start_frame, 0);

        cut.core.undo();
        assert_eq!(cut.core.db().get_clip(&b).unwrap().timeline_start_frame, 100);
        assert_eq!(cut.core.db().get_clip(&c).unwrap().timeline_start_frame, 150);
        cut.assert_invariants();
    }

    #[test]
    fn test_ripple_delete_selection() {
        let mut cut = cut();
        let a = cut.overwrite(0, 100);
        let b = cut.overwrite(100, 50);
        let c = cut.overwrite(150, 50);
        let d = cut.overwrite(200, 50);

        let outcome = cut.core.execute(
            "RippleDeleteSelection",
            params(serde_json::json!({"clip_ids": [b, d]})),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);

        let clips = cut.track_clips();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].id, a);
        assert_eq!(clips[1].id, c);
        assert_eq!(clips[1].timeline_start_frame, 100);
        cut.assert_invariants();
    }

    #[test]
    fn test_ripple_edit_out_and_roll() {
        let mut cut = cut();
        let a = cut.overwrite(0, 100);
        let b = cut.overwrite(100, 50);

        // Ripple the out edge of A twenty frames longer; B follows.
        let outcome = cut.core.execute(
            "RippleEdit",
            params(serde_json::json!({
                "clip_id": a,
                "edge_type": "out",
                "delta_frames": 20,
            })),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);
        assert_eq!(cut.core.db().get_clip(&a).unwrap().duration_frames, 120);
        assert_eq!(cut.core.db().get_clip(&b).unwrap().timeline_start_frame, 120);

        // Roll the shared cut ten frames into B.
        let outcome = cut.core.execute(
            "RippleEdit",
            params(serde_json::json!({
                "clip_id": a,
                "edge_type": "out",
                "trim_type": "roll",
                "delta_frames": 10,
            })),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);
        let clip_a = cut.core.db().get_clip(&a).unwrap();
        let clip_b = cut.core.db().get_clip(&b).unwrap();
        assert_eq!(clip_a.duration_frames, 130);
        assert_eq!(clip_b.timeline_start_frame, 130);
        assert_eq!(clip_b.duration_frames, 40);
        assert_eq!(clip_b.source_in_frame, 10);
        // Total length is preserved by the roll.
        assert_eq!(clip_b.end_frame(), 170);

        cut.assert_invariants();
    }

    #[test]
    fn test_batch_ripple_edit_is_atomic() {
        let mut cut = cut();
        let a = cut.overwrite(0, 100);
        let b = cut.overwrite(100, 50);

        let outcome = cut.core.execute(
            "BatchRippleEdit",
            params(serde_json::json!({
                "edges": [
                    {"clip_id": a, "edge_type": "out", "delta_frames": -10},
                    {"clip_id": b, "edge_type": "in", "delta_frames": 5},
                ],
            })),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);

        let clip_a = cut.core.db().get_clip(&a).unwrap();
        let clip_b = cut.core.db().get_clip(&b).unwrap();
        assert_eq!(clip_a.duration_frames, 90);
        assert_eq!(clip_b.timeline_start_frame, 90);
        assert_eq!(clip_b.duration_frames, 45);
        assert_eq!(clip_b.source_in_frame, 5);

        // One undo reverses both edges.
        cut.core.undo();
        assert_eq!(cut.core.db().get_clip(&a).unwrap().duration_frames, 100);
        let clip_b = cut.core.db().get_clip(&b).unwrap();
        assert_eq!(clip_b.timeline_start_frame, 100);
        assert_eq!(clip_b.source_in_frame, 0);
        cut.assert_invariants();
    }

    #[test]
    fn test_nudge_clamps_against_neighbours() {
        let mut cut = cut();
        let a = cut.overwrite(0, 50);
        cut.overwrite(60, 40);

        let outcome = cut.core.execute(
            "Nudge",
            params(serde_json::json!({
                "clip_ids": [a],
                "nudge_amount_frames": 100,
            })),
        );
        assert!(outcome.success);
        // Clamped to the ten-frame gap before the neighbour.
        assert_eq!(cut.core.db().get_clip(&a).unwrap().timeline_start_frame, 10);

        cut.core.undo();
        assert_eq!(cut.core.db().get_clip(&a).unwrap().timeline_start_frame, 0);
        cut.assert_invariants();
    }

    #[test]
    fn test_move_clip_to_track_with_occlusion() {
        let mut cut = cut();
        let a = cut.overwrite(0, 100);

        let outcome = cut.core.execute(
            "AddTrack",
            params(serde_json::json!({
                "sequence_id": cut.sequence_id,
                "track_type": "VIDEO",
            })),
        );
        assert!(outcome.success);
        let v2 = persisted_str(&cut.core, outcome.sequence_number.unwrap(), "created_track_id");

        // Something to occlude on the target track.
        let outcome = cut.core.execute(
            "Overwrite",
            params(serde_json::json!({
                "track_id": v2,
                "overwrite_time": 50,
                "media_id": cut.media_id,
                "duration_frames": 100,
            })),
        );
        assert!(outcome.success);
        let blocker = persisted_str(&cut.core, outcome.sequence_number.unwrap(), "created_clip_id");

        let outcome = cut.core.execute(
            "MoveClipToTrack",
            params(serde_json::json!({"clip_id": a, "target_track_id": v2})),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);

        let moved = cut.core.db().get_clip(&a).unwrap();
        assert_eq!(moved.track_id.as_deref(), Some(v2.as_str()));
        // The blocker lost its head to the moved clip's footprint.
        let trimmed = cut.core.db().get_clip(&blocker).unwrap();
        assert_eq!(trimmed.timeline_start_frame, 100);
        assert_eq!(trimmed.source_in_frame, 50);

        cut.core.undo();
        let back = cut.core.db().get_clip(&a).unwrap();
        assert_eq!(back.track_id.as_deref(), Some(cut.video_track.as_str()));
        cut.assert_invariants();
    }

    #[test]
    fn test_batch_command_single_record_and_undo() {
        let mut cut = cut();
        let a = cut.overwrite(0, 50);
        let b = cut.overwrite(100, 50);
        let before = cut.core.db().last_sequence_number().unwrap();

        let outcome = cut.core.execute(
            "BatchCommand",
            params(serde_json::json!({
                "commands": [
                    {"command_type": "DeleteClip", "parameters": {"clip_id": a}},
                    {"command_type": "DeleteClip", "parameters": {"clip_id": b}},
                ],
            })),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);

        // One command record for the whole batch.
        assert_eq!(cut.core.db().last_sequence_number().unwrap(), before + 1);
        assert!(cut.core.db().get_clip(&a).is_err());
        assert!(cut.core.db().get_clip(&b).is_err());

        cut.core.undo();
        assert!(cut.core.db().get_clip(&a).is_ok());
        assert!(cut.core.db().get_clip(&b).is_ok());

        cut.core.redo();
        assert!(cut.core.db().get_clip(&a).is_err());
        cut.assert_invariants();
    }

    #[test]
    fn test_set_playhead_scopes_to_ui() {
        let mut cut = cut();

        // Outside a UI context the sequence must be explicit.
        let outcome = cut
            .core
            .execute("SetPlayhead", params(serde_json::json!({"frame": 42})));
        assert!(!outcome.success);

        // In a UI context the active sequence fills in.
        let outcome = cut
            .core
            .execute_ui("SetPlayhead", params(serde_json::json!({"frame": 42})));
        assert!(outcome.success, "{:?}", outcome.error_message);
        assert_eq!(
            cut.core.db().get_sequence(&cut.sequence_id).unwrap().playhead_frame,
            42
        );

        // Projection landed in ui_state.
        let key = format!("playhead:{}", cut.sequence_id);
        assert_eq!(cut.core.readmodel().ui_value(&key).unwrap().unwrap(), 42);

        cut.core.undo();
        assert_eq!(
            cut.core.db().get_sequence(&cut.sequence_id).unwrap().playhead_frame,
            0
        );
    }

    #[test]
    fn test_duplicate_master_clip() {
        let mut cut = cut();
        let outcome = cut.core.execute(
            "DuplicateMasterClip",
            params(serde_json::json!({
                "snapshot": {
                    "name": "interview take 2",
                    "media_id": cut.media_id,
                    "duration_frames": 240,
                    "source_in_frame": 0,
                    "source_out_frame": 240,
                    "fps_num": 30,
                    "fps_den": 1,
                    "properties": {"scene": "7A", "take": 2},
                },
                "target_bin": "selects",
            })),
        );
        assert!(outcome.success, "{:?}", outcome.error_message);

        let clip_id = persisted_str(&cut.core, outcome.sequence_number.unwrap(), "created_clip_id");
        let clip = cut.core.db().get_clip(&clip_id).unwrap();
        assert_eq!(clip.track_id, None);
        assert_eq!(clip.name, "interview take 2");

        let props = cut.core.db().properties_for_clip(&clip_id).unwrap();
        assert!(props.iter().any(|p| p.key == "scene" && p.value == "7A"));
        assert!(props.iter().any(|p| p.key == "bin" && p.value == "selects"));

        cut.core.undo();
        assert!(cut.core.db().get_clip(&clip_id).is_err());
        cut.core.redo();
        assert!(cut.core.db().get_clip(&clip_id).is_ok());
    }

    #[test]
    fn test_undo_restores_bit_identical_clip_rows() {
        let mut cut = cut();
        cut.overwrite(0, 100);
        cut.overwrite(200, 100);

        let before = serde_json::to_value(cut.track_clips()).unwrap();
        cut.overwrite(90, 120);
        assert_ne!(serde_json::to_value(cut.track_clips()).unwrap(), before);

        cut.core.undo();
        let after = serde_json::to_value(cut.track_clips()).unwrap();
        assert_eq!(after, before);

        cut.core.redo();
        let redone = serde_json::to_value(cut.track_clips()).unwrap();
        cut.core.undo();
        assert_eq!(serde_json::to_value(cut.track_clips()).unwrap(), before);
        cut.core.redo();
        assert_eq!(serde_json::to_value(cut.track_clips()).unwrap(), redone);
    }

    #[test]
    fn test_invariants_survive_an_edit_storm() {
        let mut cut = cut();
        let a = cut.overwrite(0, 120);
        cut.overwrite(120, 80);
        let c = cut.overwrite(300, 90);

        cut.core.execute(
            "Insert",
            params(serde_json::json!({
                "track_id": cut.video_track,
                "insert_time": 60,
                "media_id": cut.media_id,
                "duration_frames": 30,
            })),
        );
        cut.core.execute(
            "SplitClip",
            params(serde_json::json!({"clip_id": c, "split_time": 350})),
        );
        cut.core.execute(
            "RippleDelete",
            params(serde_json::json!({"clip_id": a})),
        );
        cut.core.execute(
            "Nudge",
            params(serde_json::json!({"clip_ids": [c], "nudge_amount_frames": -7})),
        );
        cut.core.execute(
            "Overwrite",
            params(serde_json::json!({
                "track_id": cut.video_track,
                "overwrite_time": 45,
                "media_id": cut.media_id,
                "duration_frames": 200,
            })),
        );

        cut.assert_invariants();

        // Unwind everything; invariants hold at every step until the
        // sequence itself is undone away.
        while cut.core.undo().success {
            if cut.core.db().get_sequence(&cut.sequence_id).is_ok() {
                cut.assert_invariants();
            }
        }
    }

    #[test]
    fn test_reopen_preserves_cursor_and_rebuilds_readmodel() {
        let temp = TempDir::new().unwrap();
        let sequence_id;
        let clip_id;
        {
            let mut core = EditorCore::create(temp.path(), "persist").unwrap();
            let outcome = core.execute(
                "CreateSequence",
                params(serde_json::json!({"name": "Main"})),
            );
            sequence_id = persisted_str(&core, outcome.sequence_number.unwrap(), "created_sequence_id");
            let outcome = core.execute(
                "AddTrack",
                params(serde_json::json!({"sequence_id": sequence_id, "track_type": "VIDEO"})),
            );
            let track = persisted_str(&core, outcome.sequence_number.unwrap(), "created_track_id");
            let outcome = core.execute(
                "ImportMedia",
                params(serde_json::json!({
                    "name": "a.mov",
                    "file_path": "/a.mov",
                    "duration_frames": 500,
                    "fps_num": 30,
                })),
            );
            let media = persisted_str(&core, outcome.sequence_number.unwrap(), "created_media_id");
            let outcome = core.execute(
                "Overwrite",
                params(serde_json::json!({
                    "track_id": track,
                    "overwrite_time": 0,
                    "media_id": media,
                    "duration_frames": 100,
                })),
            );
            clip_id = persisted_str(&core, outcome.sequence_number.unwrap(), "created_clip_id");
            core.close().unwrap();
        }

        // Delete the read model; reopening rebuilds it from the stream.
        std::fs::remove_file(temp.path().join("persist.events").join("readmodels.sqlite"))
            .unwrap();

        let mut core = EditorCore::open(temp.path(), "persist").unwrap();
        assert_eq!(core.db().last_sequence_number().unwrap(), 4);
        let projected = core.readmodel().tl_clip_geometry(&clip_id).unwrap();
        assert!(projected.is_some());

        // The persisted cursor still drives undo.
        let undo = core.undo();
        assert!(undo.success);
        assert!(core.db().get_clip(&clip_id).is_err());
    }

    #[test]
    fn test_keybinding_drives_commands() {
        let mut cut = cut();
        let keymap = parse_keymap(
            r#"
[transport]
"Home" = "SetPlayhead playhead_frame=0 @timeline"
"End" = "SetPlayhead playhead_frame=17999 @timeline"
"#,
        )
        .unwrap();

        let binding = keymap.lookup("End", Some("timeline")).unwrap().clone();
        let outcome = cut.core.run_binding(&binding);
        assert!(outcome.success, "{:?}", outcome.error_message);
        assert_eq!(
            cut.core.db().get_sequence(&cut.sequence_id).unwrap().playhead_frame,
            17999
        );
    }

    #[test]
    fn test_tracks_report_types() {
        let cut = cut();
        let tracks = cut.core.db().tracks_for_sequence(&cut.sequence_id).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].track_type, TrackType::Video);
        assert_eq!(tracks[1].track_type, TrackType::Audio);
    }
}
