//! Typed Store Accessors
//!
//! Prepared-statement queries for every entity. All statements use
//! positional binds; JSON columns round-trip through `serde_json`.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::core::{now_rfc3339, ClipId, CoreError, CoreResult, MediaId, TrackId};

use super::db::Database;
use super::models::{
    ClipKind, ClipLinkRow, ClipRow, CommandRow, MediaRow, ProjectRow, PropertyRow, SequenceKind,
    SequenceRow, TrackRow, TrackType,
};

fn json_column(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::Null)
}

// =============================================================================
// Row Mapping
// =============================================================================

const PROJECT_COLS: &str = "id, name, settings, current_sequence_number, created_at, modified_at";

fn row_to_project(row: &Row) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        name: row.get(1)?,
        settings: json_column(row.get(2)?),
        current_sequence_number: row.get(3)?,
        created_at: row.get(4)?,
        modified_at: row.get(5)?,
    })
}

const SEQUENCE_COLS: &str = "id, project_id, name, kind, fps_num, fps_den, width, height, \
     audio_sample_rate, playhead_frame, view_start_frame, view_duration_frames, \
     current_sequence_number, created_at, modified_at";

fn row_to_sequence(row: &Row) -> rusqlite::Result<SequenceRow> {
    let kind: String = row.get(3)?;
    Ok(SequenceRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        kind: SequenceKind::from_str(&kind).unwrap_or(SequenceKind::Timeline),
        fps_num: row.get(4)?,
        fps_den: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        audio_sample_rate: row.get(8)?,
        playhead_frame: row.get(9)?,
        view_start_frame: row.get(10)?,
        view_duration_frames: row.get(11)?,
        current_sequence_number: row.get(12)?,
        created_at: row.get(13)?,
        modified_at: row.get(14)?,
    })
}

const TRACK_COLS: &str = "id, sequence_id, track_type, track_index, name, enabled";

fn row_to_track(row: &Row) -> rusqlite::Result<TrackRow> {
    let track_type: String = row.get(2)?;
    Ok(TrackRow {
        id: row.get(0)?,
        sequence_id: row.get(1)?,
        track_type: TrackType::from_str(&track_type).unwrap_or(TrackType::Video),
        track_index: row.get(3)?,
        name: row.get(4)?,
        enabled: row.get(5)?,
    })
}

const CLIP_COLS: &str = "id, project_id, track_id, clip_kind, name, media_id, master_clip_id, \
     owner_sequence_id, source_sequence_id, timeline_start_frame, duration_frames, \
     source_in_frame, source_out_frame, fps_num, fps_den, enabled, offline, created_at, \
     modified_at";

fn row_to_clip(row: &Row) -> rusqlite::Result<ClipRow> {
    let kind: String = row.get(3)?;
    Ok(ClipRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        track_id: row.get(2)?,
        clip_kind: ClipKind::from_str(&kind).unwrap_or(ClipKind::Timeline),
        name: row.get(4)?,
        media_id: row.get(5)?,
        master_clip_id: row.get(6)?,
        owner_sequence_id: row.get(7)?,
        source_sequence_id: row.get(8)?,
        timeline_start_frame: row.get(9)?,
        duration_frames: row.get(10)?,
        source_in_frame: row.get(11)?,
        source_out_frame: row.get(12)?,
        fps_num: row.get(13)?,
        fps_den: row.get(14)?,
        enabled: row.get(15)?,
        offline: row.get(16)?,
        created_at: row.get(17)?,
        modified_at: row.get(18)?,
    })
}

const MEDIA_COLS: &str = "id, project_id, name, file_path, duration_frames, fps_num, fps_den, \
     width, height, audio_channels, codec, metadata";

fn row_to_media(row: &Row) -> rusqlite::Result<MediaRow> {
    Ok(MediaRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        file_path: row.get(3)?,
        duration_frames: row.get(4)?,
        fps_num: row.get(5)?,
        fps_den: row.get(6)?,
        width: row.get(7)?,
        height: row.get(8)?,
        audio_channels: row.get(9)?,
        codec: row.get(10)?,
        metadata: json_column(row.get(11)?),
    })
}

const COMMAND_COLS: &str = "sequence_number, parent_sequence_number, command_id, command_type, \
     command_args, persisted, project_id, stack_id, executed_at, playhead_value, undo_group_id";

fn row_to_command(row: &Row) -> rusqlite::Result<CommandRow> {
    Ok(CommandRow {
        sequence_number: row.get(0)?,
        parent_sequence_number: row.get(1)?,
        command_id: row.get(2)?,
        command_type: row.get(3)?,
        command_args: json_column(row.get(4)?),
        persisted: json_column(row.get(5)?),
        project_id: row.get(6)?,
        stack_id: row.get(7)?,
        executed_at: row.get(8)?,
        playhead_value: row.get(9)?,
        undo_group_id: row.get(10)?,
    })
}

// =============================================================================
// Queries
// =============================================================================

impl Database {
    // -------------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------------

    pub fn insert_project(&self, project: &ProjectRow) -> CoreResult<()> {
        self.conn().execute(
            "INSERT INTO projects (id, name, settings, current_sequence_number, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project.id,
                project.name,
                project.settings.to_string(),
                project.current_sequence_number,
                project.created_at,
                project.modified_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> CoreResult<ProjectRow> {
        self.conn()
            .query_row(
                &format!("SELECT {PROJECT_COLS} FROM projects WHERE id = ?1"),
                params![id],
                row_to_project,
            )
            .optional()?
            .ok_or_else(|| CoreError::ProjectNotFound(id.to_string()))
    }

    /// The single active project of this store, if one exists.
    pub fn first_project(&self) -> CoreResult<Option<ProjectRow>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {PROJECT_COLS} FROM projects ORDER BY created_at LIMIT 1"),
                [],
                row_to_project,
            )
            .optional()?)
    }

    pub fn touch_project(&self, id: &str) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE projects SET modified_at = ?2 WHERE id = ?1",
            params![id, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn update_project_settings(&self, id: &str, settings: &Value) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE projects SET settings = ?2, modified_at = ?3 WHERE id = ?1",
            params![id, settings.to_string(), now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_project_cursor(&self, id: &str, cursor: i64) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE projects SET current_sequence_number = ?2 WHERE id = ?1",
            params![id, cursor],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sequences
    // -------------------------------------------------------------------------

    pub fn insert_sequence(&self, seq: &SequenceRow) -> CoreResult<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO sequences ({SEQUENCE_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                seq.id,
                seq.project_id,
                seq.name,
                seq.kind.as_str(),
                seq.fps_num,
                seq.fps_den,
                seq.width,
                seq.height,
                seq.audio_sample_rate,
                seq.playhead_frame,
                seq.view_start_frame,
                seq.view_duration_frames,
                seq.current_sequence_number,
                seq.created_at,
                seq.modified_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_sequence(&self, id: &str) -> CoreResult<SequenceRow> {
        self.conn()
            .query_row(
                &format!("SELECT {SEQUENCE_COLS} FROM sequences WHERE id = ?1"),
                params![id],
                row_to_sequence,
            )
            .optional()?
            .ok_or_else(|| CoreError::SequenceNotFound(id.to_string()))
    }

    pub fn list_sequences(&self, project_id: &str) -> CoreResult<Vec<SequenceRow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SEQUENCE_COLS} FROM sequences WHERE project_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![project_id], row_to_sequence)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_sequence(&self, id: &str) -> CoreResult<()> {
        self.conn()
            .execute("DELETE FROM sequences WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn set_sequence_cursor(&self, id: &str, cursor: i64) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE sequences SET current_sequence_number = ?2 WHERE id = ?1",
            params![id, cursor],
        )?;
        Ok(())
    }

    pub fn set_sequence_playhead(&self, id: &str, frame: i64) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE sequences SET playhead_frame = ?2, modified_at = ?3 WHERE id = ?1",
            params![id, frame, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn touch_sequence(&self, id: &str) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE sequences SET modified_at = ?2 WHERE id = ?1",
            params![id, now_rfc3339()],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tracks
    // -------------------------------------------------------------------------

    pub fn insert_track(&self, track: &TrackRow) -> CoreResult<()> {
        self.conn().execute(
            &format!("INSERT INTO tracks ({TRACK_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                track.id,
                track.sequence_id,
                track.track_type.as_str(),
                track.track_index,
                track.name,
                track.enabled,
            ],
        )?;
        Ok(())
    }

    pub fn get_track(&self, id: &str) -> CoreResult<TrackRow> {
        self.conn()
            .query_row(
                &format!("SELECT {TRACK_COLS} FROM tracks WHERE id = ?1"),
                params![id],
                row_to_track,
            )
            .optional()?
            .ok_or_else(|| CoreError::TrackNotFound(id.to_string()))
    }

    pub fn tracks_for_sequence(&self, sequence_id: &str) -> CoreResult<Vec<TrackRow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {TRACK_COLS} FROM tracks WHERE sequence_id = ?1
             ORDER BY track_type DESC, track_index"
        ))?;
        let rows = stmt.query_map(params![sequence_id], row_to_track)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn track_by_index(
        &self,
        sequence_id: &str,
        track_type: TrackType,
        index: i64,
    ) -> CoreResult<Option<TrackRow>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {TRACK_COLS} FROM tracks
                     WHERE sequence_id = ?1 AND track_type = ?2 AND track_index = ?3"
                ),
                params![sequence_id, track_type.as_str(), index],
                row_to_track,
            )
            .optional()?)
    }

    /// Next free 1-based index within a type.
    pub fn next_track_index(&self, sequence_id: &str, track_type: TrackType) -> CoreResult<i64> {
        let max: Option<i64> = self.conn().query_row(
            "SELECT MAX(track_index) FROM tracks WHERE sequence_id = ?1 AND track_type = ?2",
            params![sequence_id, track_type.as_str()],
            |r| r.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn delete_track(&self, id: &str) -> CoreResult<()> {
        self.conn()
            .execute("DELETE FROM tracks WHERE id = ?1", params![id])?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Clips
    // -------------------------------------------------------------------------

    pub fn insert_clip(&self, clip: &ClipRow) -> CoreResult<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO clips ({CLIP_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                clip.id,
                clip.project_id,
                clip.track_id,
                clip.clip_kind.as_str(),
                clip.name,
                clip.media_id,
                clip.master_clip_id,
                clip.owner_sequence_id,
                clip.source_sequence_id,
                clip.timeline_start_frame,
                clip.duration_frames,
                clip.source_in_frame,
                clip.source_out_frame,
                clip.fps_num,
                clip.fps_den,
                clip.enabled,
                clip.offline,
                clip.created_at,
                clip.modified_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_clip(&self, id: &str) -> CoreResult<ClipRow> {
        self.conn()
            .query_row(
                &format!("SELECT {CLIP_COLS} FROM clips WHERE id = ?1"),
                params![id],
                row_to_clip,
            )
            .optional()?
            .ok_or_else(|| CoreError::ClipNotFound(id.to_string()))
    }

    /// All clips on a track, ordered by timeline start. The order is the
    /// contract of every mutation planner.
    pub fn clips_on_track(&self, track_id: &str) -> CoreResult<Vec<ClipRow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CLIP_COLS} FROM clips WHERE track_id = ?1
             ORDER BY timeline_start_frame, id"
        ))?;
        let rows = stmt.query_map(params![track_id], row_to_clip)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn clips_for_sequence(&self, sequence_id: &str) -> CoreResult<Vec<ClipRow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CLIP_COLS} FROM clips WHERE owner_sequence_id = ?1
             ORDER BY timeline_start_frame, id"
        ))?;
        let rows = stmt.query_map(params![sequence_id], row_to_clip)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Rewrites a clip's geometry (timeline interval plus source range).
    pub fn update_clip_geometry(
        &self,
        id: &ClipId,
        timeline_start_frame: i64,
        duration_frames: i64,
        source_in_frame: i64,
        source_out_frame: i64,
    ) -> CoreResult<()> {
        let changed = self.conn().execute(
            "UPDATE clips SET timeline_start_frame = ?2, duration_frames = ?3,
                 source_in_frame = ?4, source_out_frame = ?5, modified_at = ?6
             WHERE id = ?1",
            params![
                id,
                timeline_start_frame,
                duration_frames,
                source_in_frame,
                source_out_frame,
                now_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::ClipNotFound(id.clone()));
        }
        Ok(())
    }

    pub fn set_clip_media(&self, id: &ClipId, media_id: &MediaId) -> CoreResult<()> {
        let changed = self.conn().execute(
            "UPDATE clips SET media_id = ?2, modified_at = ?3 WHERE id = ?1",
            params![id, media_id, now_rfc3339()],
        )?;
        if changed == 0 {
            return Err(CoreError::ClipNotFound(id.clone()));
        }
        Ok(())
    }

    pub fn set_clip_enabled(&self, id: &ClipId, enabled: bool) -> CoreResult<()> {
        let changed = self.conn().execute(
            "UPDATE clips SET enabled = ?2, modified_at = ?3 WHERE id = ?1",
            params![id, enabled, now_rfc3339()],
        )?;
        if changed == 0 {
            return Err(CoreError::ClipNotFound(id.clone()));
        }
        Ok(())
    }

    pub fn update_clip_track(&self, id: &ClipId, track_id: &TrackId) -> CoreResult<()> {
        let changed = self.conn().execute(
            "UPDATE clips SET track_id = ?2, modified_at = ?3 WHERE id = ?1",
            params![id, track_id, now_rfc3339()],
        )?;
        if changed == 0 {
            return Err(CoreError::ClipNotFound(id.clone()));
        }
        Ok(())
    }

    /// Full-row restore used by undo paths. Timestamps come from the
    /// stored original so an undone command leaves the row bit-identical.
    pub fn restore_clip(&self, clip: &ClipRow) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE clips SET track_id = ?2, name = ?3, timeline_start_frame = ?4,
                 duration_frames = ?5, source_in_frame = ?6, source_out_frame = ?7,
                 enabled = ?8, offline = ?9, modified_at = ?10
             WHERE id = ?1",
            params![
                clip.id,
                clip.track_id,
                clip.name,
                clip.timeline_start_frame,
                clip.duration_frames,
                clip.source_in_frame,
                clip.source_out_frame,
                clip.enabled,
                clip.offline,
                clip.modified_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_clip(&self, id: &ClipId) -> CoreResult<()> {
        self.conn().execute(
            "DELETE FROM properties WHERE clip_id = ?1",
            params![id],
        )?;
        self.conn()
            .execute("DELETE FROM clip_links WHERE clip_id = ?1", params![id])?;
        self.conn()
            .execute("DELETE FROM clips WHERE id = ?1", params![id])?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Media
    // -------------------------------------------------------------------------

    pub fn insert_media(&self, media: &MediaRow) -> CoreResult<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO media ({MEDIA_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                media.id,
                media.project_id,
                media.name,
                media.file_path,
                media.duration_frames,
                media.fps_num,
                media.fps_den,
                media.width,
                media.height,
                media.audio_channels,
                media.codec,
                media.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn get_media(&self, id: &str) -> CoreResult<MediaRow> {
        self.conn()
            .query_row(
                &format!("SELECT {MEDIA_COLS} FROM media WHERE id = ?1"),
                params![id],
                row_to_media,
            )
            .optional()?
            .ok_or_else(|| CoreError::MediaNotFound(id.to_string()))
    }

    pub fn list_media(&self, project_id: &str) -> CoreResult<Vec<MediaRow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MEDIA_COLS} FROM media WHERE project_id = ?1 ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![project_id], row_to_media)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_media(&self, id: &MediaId) -> CoreResult<()> {
        self.conn()
            .execute("DELETE FROM media WHERE id = ?1", params![id])?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    pub fn upsert_property(&self, prop: &PropertyRow) -> CoreResult<()> {
        self.conn().execute(
            "INSERT INTO properties (clip_id, key, kind, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(clip_id, key) DO UPDATE SET kind = excluded.kind, value = excluded.value",
            params![prop.clip_id, prop.key, prop.kind, prop.value.to_string()],
        )?;
        Ok(())
    }

    pub fn properties_for_clip(&self, clip_id: &str) -> CoreResult<Vec<PropertyRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT clip_id, key, kind, value FROM properties WHERE clip_id = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![clip_id], |row| {
            Ok(PropertyRow {
                clip_id: row.get(0)?,
                key: row.get(1)?,
                kind: row.get(2)?,
                value: json_column(row.get(3)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn copy_properties(&self, from_clip: &str, to_clip: &str) -> CoreResult<()> {
        self.conn().execute(
            "INSERT INTO properties (clip_id, key, kind, value)
             SELECT ?2, key, kind, value FROM properties WHERE clip_id = ?1",
            params![from_clip, to_clip],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Clip Links
    // -------------------------------------------------------------------------

    pub fn insert_clip_link(&self, link: &ClipLinkRow) -> CoreResult<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO clip_links (link_id, clip_id) VALUES (?1, ?2)",
            params![link.link_id, link.clip_id],
        )?;
        Ok(())
    }

    pub fn link_members(&self, link_id: &str) -> CoreResult<Vec<ClipId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT clip_id FROM clip_links WHERE link_id = ?1 ORDER BY clip_id")?;
        let rows = stmt.query_map(params![link_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn links_for_clip(&self, clip_id: &str) -> CoreResult<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT link_id FROM clip_links WHERE clip_id = ?1 ORDER BY link_id")?;
        let rows = stmt.query_map(params![clip_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    pub fn insert_command(&self, cmd: &CommandRow) -> CoreResult<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO commands ({COMMAND_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                cmd.sequence_number,
                cmd.parent_sequence_number,
                cmd.command_id,
                cmd.command_type,
                cmd.command_args.to_string(),
                cmd.persisted.to_string(),
                cmd.project_id,
                cmd.stack_id,
                cmd.executed_at,
                cmd.playhead_value,
                cmd.undo_group_id,
            ],
        )?;
        Ok(())
    }

    pub fn update_command_persisted(&self, sequence_number: i64, persisted: &Value) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE commands SET persisted = ?2 WHERE sequence_number = ?1",
            params![sequence_number, persisted.to_string()],
        )?;
        Ok(())
    }

    pub fn get_command(&self, sequence_number: i64) -> CoreResult<CommandRow> {
        self.conn()
            .query_row(
                &format!("SELECT {COMMAND_COLS} FROM commands WHERE sequence_number = ?1"),
                params![sequence_number],
                row_to_command,
            )
            .optional()?
            .ok_or(CoreError::CommandNotFound(sequence_number))
    }

    pub fn command_exists(&self, sequence_number: i64) -> CoreResult<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM commands WHERE sequence_number = ?1",
            params![sequence_number],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn last_sequence_number(&self) -> CoreResult<i64> {
        let max: Option<i64> =
            self.conn()
                .query_row("SELECT MAX(sequence_number) FROM commands", [], |r| {
                    r.get(0)
                })?;
        Ok(max.unwrap_or(0))
    }

    /// Latest redo branch on a stack: the child with the highest
    /// sequence number.
    pub fn find_latest_child_command(
        &self,
        parent: i64,
        stack_id: &str,
    ) -> CoreResult<Option<CommandRow>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COMMAND_COLS} FROM commands
                     WHERE parent_sequence_number = ?1 AND stack_id = ?2
                     ORDER BY sequence_number DESC LIMIT 1"
                ),
                params![parent, stack_id],
                row_to_command,
            )
            .optional()?)
    }

    pub fn commands_in_group(&self, group_id: &str) -> CoreResult<Vec<CommandRow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COMMAND_COLS} FROM commands WHERE undo_group_id = ?1 ORDER BY sequence_number"
        ))?;
        let rows = stmt.query_map(params![group_id], row_to_command)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_commands(&self) -> CoreResult<Vec<CommandRow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COMMAND_COLS} FROM commands ORDER BY sequence_number"
        ))?;
        let rows = stmt.query_map([], row_to_command)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
