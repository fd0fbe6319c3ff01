//! Sequence & Track Executors

use crate::core::commands::Command;
use crate::core::store::{Database, SequenceKind, SequenceRow, TrackRow, TrackType};
use crate::core::time::FrameRate;
use crate::core::{new_entity_id, now_rfc3339, CoreError, CoreResult};

use super::{EventPayloads, ExecContext, Executor};

/// Creates a timeline or master-clip sequence.
pub struct CreateSequenceExecutor;

impl Executor for CreateSequenceExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let fps_num = cmd.opt_i64_param("fps_num").unwrap_or(30) as u32;
        let fps_den = cmd.opt_i64_param("fps_den").unwrap_or(1) as u32;
        FrameRate::try_new(fps_num, fps_den)?;

        let kind = match cmd.opt_str_param("kind").unwrap_or("timeline") {
            "masterclip" => SequenceKind::MasterClip,
            _ => SequenceKind::Timeline,
        };

        let now = now_rfc3339();
        let sequence = SequenceRow {
            id: new_entity_id(),
            project_id: ctx.project_id.clone(),
            name: cmd.str_param("name")?.to_string(),
            kind,
            fps_num,
            fps_den,
            width: cmd.opt_i64_param("width").unwrap_or(1920) as u32,
            height: cmd.opt_i64_param("height").unwrap_or(1080) as u32,
            audio_sample_rate: cmd.opt_i64_param("audio_sample_rate").unwrap_or(48000) as u32,
            playhead_frame: 0,
            view_start_frame: 0,
            view_duration_frames: 0,
            current_sequence_number: 0,
            created_at: now.clone(),
            modified_at: now,
        };

        db.insert_sequence(&sequence)?;
        db.touch_project(&ctx.project_id)?;

        cmd.persist("created_sequence_id", sequence.id.clone().into());
        cmd.persist_serialized("created_sequence", &sequence)?;
        Ok(EventPayloads::command_only())
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let sequence_id: String = cmd.persisted_deserialized("created_sequence_id")?;
        db.delete_sequence(&sequence_id)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let sequence: SequenceRow = cmd.persisted_deserialized("created_sequence")?;
        db.insert_sequence(&sequence)
    }
}

/// Appends a track lane to a sequence, indexed 1-based within its type.
pub struct AddTrackExecutor;

impl Executor for AddTrackExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        _ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let sequence_id = cmd.str_param("sequence_id")?.to_string();
        db.get_sequence(&sequence_id)?;

        let track_type = TrackType::from_str(cmd.str_param("track_type")?).ok_or_else(|| {
            CoreError::validation(&cmd.command_type, "track_type must be VIDEO or AUDIO")
        })?;
        let track_index = db.next_track_index(&sequence_id, track_type)?;

        let name = match cmd.opt_str_param("name") {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => match track_type {
                TrackType::Video => format!("V{track_index}"),
                TrackType::Audio => format!("A{track_index}"),
            },
        };

        let track = TrackRow {
            id: new_entity_id(),
            sequence_id: sequence_id.clone(),
            track_type,
            track_index,
            name,
            enabled: true,
        };
        db.insert_track(&track)?;
        db.touch_sequence(&sequence_id)?;

        cmd.persist("created_track_id", track.id.clone().into());
        cmd.persist("track_index", track_index.into());
        cmd.persist_serialized("created_track", &track)?;
        Ok(EventPayloads::command_only())
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let track_id: String = cmd.persisted_deserialized("created_track_id")?;
        db.delete_track(&track_id)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let track: TrackRow = cmd.persisted_deserialized("created_track")?;
        db.insert_track(&track)
    }
}
