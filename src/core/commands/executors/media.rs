//! Media Executors
//!
//! Registration of external assets. Importing never mutates the
//! timeline.

use crate::core::commands::Command;
use crate::core::store::{Database, MediaRow};
use crate::core::time::FrameRate;
use crate::core::{new_entity_id, CoreResult};

use super::{EventPayloads, ExecContext, Executor};

/// Registers a media asset: id, path, duration, rate, audio layout.
pub struct ImportMediaExecutor;

impl Executor for ImportMediaExecutor {
    fn execute(
        &self,
        db: &Database,
        cmd: &mut Command,
        ctx: &ExecContext,
    ) -> CoreResult<EventPayloads> {
        let fps_num = cmd.i64_param("fps_num")? as u32;
        let fps_den = cmd.opt_i64_param("fps_den").unwrap_or(1) as u32;
        FrameRate::try_new(fps_num, fps_den)?;

        let media = MediaRow {
            id: new_entity_id(),
            project_id: ctx.project_id.clone(),
            name: cmd.str_param("name")?.to_string(),
            file_path: cmd.str_param("file_path")?.to_string(),
            duration_frames: cmd.i64_param("duration_frames")?,
            fps_num,
            fps_den,
            width: cmd.opt_i64_param("width").unwrap_or(0) as u32,
            height: cmd.opt_i64_param("height").unwrap_or(0) as u32,
            audio_channels: cmd.opt_i64_param("audio_channels").unwrap_or(2) as u32,
            codec: cmd.opt_str_param("codec").unwrap_or("").to_string(),
            metadata: serde_json::json!({}),
        };

        db.insert_media(&media)?;
        db.touch_project(&ctx.project_id)?;

        cmd.persist("created_media_id", media.id.clone().into());
        cmd.persist_serialized("created_media", &media)?;
        Ok(EventPayloads::media(serde_json::to_value(&media)?))
    }

    fn undo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let media_id: String = cmd.persisted_deserialized("created_media_id")?;
        db.delete_media(&media_id)
    }

    fn redo(&self, db: &Database, cmd: &Command) -> CoreResult<()> {
        let media: MediaRow = cmd.persisted_deserialized("created_media")?;
        db.insert_media(&media)
    }
}
