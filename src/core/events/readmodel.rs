//! Read-Model Projections
//!
//! Sidecar SQLite database (`readmodels.sqlite`) holding fast projected
//! views of the event stream: timeline clips, markers, media, and UI
//! state. Every envelope applies inside one immediate transaction; a
//! cursor row records the last applied envelope so a stream/model
//! mismatch is detected on open and repaired by rebuilding from the
//! stream.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::core::{CoreError, CoreResult};

use super::{EventEnvelope, EventLog};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tl_clips (
    clip_id TEXT PRIMARY KEY,
    sequence_id TEXT,
    track_id TEXT,
    timeline_start_frame INTEGER NOT NULL DEFAULT 0,
    duration_frames INTEGER NOT NULL DEFAULT 1,
    source_in_frame INTEGER NOT NULL DEFAULT 0,
    source_out_frame INTEGER NOT NULL DEFAULT 1,
    media_id TEXT,
    name TEXT NOT NULL DEFAULT '',
    enabled INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_tl_clips_track ON tl_clips(track_id, timeline_start_frame);

CREATE TABLE IF NOT EXISTS tl_markers (
    marker_id TEXT PRIMARY KEY,
    sequence_id TEXT,
    frame INTEGER NOT NULL DEFAULT 0,
    label TEXT NOT NULL DEFAULT '',
    color TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS media (
    media_id TEXT PRIMARY KEY,
    project_id TEXT,
    name TEXT NOT NULL DEFAULT '',
    file_path TEXT NOT NULL DEFAULT '',
    duration_frames INTEGER NOT NULL DEFAULT 0,
    fps_num INTEGER NOT NULL DEFAULT 30,
    fps_den INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS ui_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL DEFAULT 'null'
);

CREATE TABLE IF NOT EXISTS rm_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Projection database over the event stream.
pub struct ReadModel {
    conn: Connection,
    path: Option<PathBuf>,
}

impl ReadModel {
    /// Opens (or creates) the projection database, WAL-journaled.
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let rm = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        rm.configure()?;
        Ok(rm)
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let rm = Self { conn, path: None };
        rm.configure()?;
        Ok(rm)
    }

    fn configure(&self) -> CoreResult<()> {
        let _ = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()));
        self.conn.execute_batch(SCHEMA)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO rm_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    /// Id of the last applied envelope, if any.
    pub fn last_applied_id(&self) -> CoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM rm_meta WHERE key = 'last_applied_id'",
                [],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn schema_version(&self) -> CoreResult<i64> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM rm_meta WHERE key = 'schema_version'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Applies one envelope's payloads inside a single immediate
    /// transaction. Any failure rolls the read-model transaction back
    /// and surfaces a projection error.
    pub fn apply_event(&self, envelope: &EventEnvelope) -> CoreResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match self.apply_payloads(envelope) {
            Ok(()) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(CoreError::ProjectionError(format!(
                    "failed to apply event {}: {e}",
                    envelope.id
                )))
            }
        }
    }

    fn apply_payloads(&self, envelope: &EventEnvelope) -> CoreResult<()> {
        if let Some(timeline) = &envelope.timeline_payload {
            self.apply_timeline(timeline)?;
        }
        if let Some(media) = &envelope.media_payload {
            self.apply_media(media)?;
        }
        if let Some(ui) = &envelope.ui_payload {
            self.apply_ui(ui)?;
        }
        self.conn.execute(
            "INSERT INTO rm_meta (key, value) VALUES ('last_applied_id', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![envelope.id],
        )?;
        Ok(())
    }

    fn apply_timeline(&self, payload: &Value) -> CoreResult<()> {
        let sequence_id = payload.get("sequence_id").and_then(Value::as_str);

        for mutation in payload
            .get("mutations")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let op = mutation.get("op").and_then(Value::as_str).unwrap_or("");
            match op {
                "insert" => {
                    let clip = mutation
                        .get("clip")
                        .ok_or_else(|| projection_err("insert mutation missing clip"))?;
                    self.upsert_tl_clip(clip, sequence_id)?;
                }
                "update" => {
                    let clip_id = mutation
                        .get("clip_id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| projection_err("update mutation missing clip_id"))?;
                    self.update_tl_clip(clip_id, mutation)?;
                }
                "delete" => {
                    let clip_id = mutation
                        .get("clip_id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| projection_err("delete mutation missing clip_id"))?;
                    self.conn
                        .execute("DELETE FROM tl_clips WHERE clip_id = ?1", params![clip_id])?;
                }
                // Unknown mutation kinds are tolerated for forward
                // compatibility.
                _ => {}
            }
        }

        for marker in payload
            .get("markers")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let op = marker.get("op").and_then(Value::as_str).unwrap_or("");
            match op {
                "insert" => {
                    let m = marker
                        .get("marker")
                        .ok_or_else(|| projection_err("marker insert missing body"))?;
                    self.conn.execute(
                        "INSERT INTO tl_markers (marker_id, sequence_id, frame, label, color)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(marker_id) DO UPDATE SET
                            sequence_id = excluded.sequence_id,
                            frame = excluded.frame,
                            label = excluded.label,
                            color = excluded.color",
                        params![
                            m.get("marker_id").and_then(Value::as_str).unwrap_or(""),
                            sequence_id,
                            m.get("frame").and_then(Value::as_i64).unwrap_or(0),
                            m.get("label").and_then(Value::as_str).unwrap_or(""),
                            m.get("color").and_then(Value::as_str).unwrap_or(""),
                        ],
                    )?;
                }
                "delete" => {
                    let marker_id = marker
                        .get("marker_id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| projection_err("marker delete missing marker_id"))?;
                    self.conn.execute(
                        "DELETE FROM tl_markers WHERE marker_id = ?1",
                        params![marker_id],
                    )?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn upsert_tl_clip(&self, clip: &Value, fallback_sequence: Option<&str>) -> CoreResult<()> {
        let clip_id = clip
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| projection_err("clip payload missing id"))?;
        let sequence_id = clip
            .get("owner_sequence_id")
            .and_then(Value::as_str)
            .or(fallback_sequence);
        self.conn.execute(
            "INSERT INTO tl_clips (clip_id, sequence_id, track_id, timeline_start_frame,
                 duration_frames, source_in_frame, source_out_frame, media_id, name, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(clip_id) DO UPDATE SET
                sequence_id = excluded.sequence_id,
                track_id = excluded.track_id,
                timeline_start_frame = excluded.timeline_start_frame,
                duration_frames = excluded.duration_frames,
                source_in_frame = excluded.source_in_frame,
                source_out_frame = excluded.source_out_frame,
                media_id = excluded.media_id,
                name = excluded.name,
                enabled = excluded.enabled",
            params![
                clip_id,
                sequence_id,
                clip.get("track_id").and_then(Value::as_str),
                clip.get("timeline_start_frame").and_then(Value::as_i64).unwrap_or(0),
                clip.get("duration_frames").and_then(Value::as_i64).unwrap_or(1),
                clip.get("source_in_frame").and_then(Value::as_i64).unwrap_or(0),
                clip.get("source_out_frame").and_then(Value::as_i64).unwrap_or(1),
                clip.get("media_id").and_then(Value::as_str),
                clip.get("name").and_then(Value::as_str).unwrap_or(""),
                clip.get("enabled").and_then(Value::as_bool).unwrap_or(true),
            ],
        )?;
        Ok(())
    }

    fn update_tl_clip(&self, clip_id: &str, mutation: &Value) -> CoreResult<()> {
        self.conn.execute(
            "UPDATE tl_clips SET timeline_start_frame = ?2, duration_frames = ?3,
                 source_in_frame = ?4, source_out_frame = ?5,
                 track_id = COALESCE(?6, track_id)
             WHERE clip_id = ?1",
            params![
                clip_id,
                mutation
                    .get("timeline_start_frame")
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
                mutation
                    .get("duration_frames")
                    .and_then(Value::as_i64)
                    .unwrap_or(1),
                mutation
                    .get("source_in_frame")
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
                mutation
                    .get("source_out_frame")
                    .and_then(Value::as_i64)
                    .unwrap_or(1),
                mutation.get("track_id").and_then(Value::as_str),
            ],
        )?;
        Ok(())
    }

    fn apply_media(&self, payload: &Value) -> CoreResult<()> {
        if payload.get("removed").and_then(Value::as_bool) == Some(true) {
            let media_id = payload
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| projection_err("media removal missing id"))?;
            self.conn
                .execute("DELETE FROM media WHERE media_id = ?1", params![media_id])?;
            return Ok(());
        }

        let media_id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| projection_err("media payload missing id"))?;
        self.conn.execute(
            "INSERT INTO media (media_id, project_id, name, file_path, duration_frames, fps_num, fps_den)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(media_id) DO UPDATE SET
                project_id = excluded.project_id,
                name = excluded.name,
                file_path = excluded.file_path,
                duration_frames = excluded.duration_frames,
                fps_num = excluded.fps_num,
                fps_den = excluded.fps_den",
            params![
                media_id,
                payload.get("project_id").and_then(Value::as_str),
                payload.get("name").and_then(Value::as_str).unwrap_or(""),
                payload.get("file_path").and_then(Value::as_str).unwrap_or(""),
                payload.get("duration_frames").and_then(Value::as_i64).unwrap_or(0),
                payload.get("fps_num").and_then(Value::as_i64).unwrap_or(30),
                payload.get("fps_den").and_then(Value::as_i64).unwrap_or(1),
            ],
        )?;
        Ok(())
    }

    fn apply_ui(&self, payload: &Value) -> CoreResult<()> {
        let map = payload
            .as_object()
            .ok_or_else(|| projection_err("ui payload must be an object"))?;
        for (key, value) in map {
            self.conn.execute(
                "INSERT INTO ui_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value.to_string()],
            )?;
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn ui_value(&self, key: &str) -> CoreResult<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM ui_state WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| serde_json::from_str(&s).unwrap_or(Value::Null)))
    }

    pub fn tl_clip_count(&self) -> CoreResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM tl_clips", [], |r| r.get(0))?)
    }

    /// Projected geometry of one clip:
    /// `(track_id, start, duration, source_in, source_out)`.
    pub fn tl_clip_geometry(
        &self,
        clip_id: &str,
    ) -> CoreResult<Option<(Option<String>, i64, i64, i64, i64)>> {
        Ok(self
            .conn
            .query_row(
                "SELECT track_id, timeline_start_frame, duration_frames,
                        source_in_frame, source_out_frame
                 FROM tl_clips WHERE clip_id = ?1",
                params![clip_id],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                    ))
                },
            )
            .optional()?)
    }

    pub fn media_count(&self) -> CoreResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM media", [], |r| r.get(0))?)
    }

    // =========================================================================
    // Rebuild & Shutdown
    // =========================================================================

    /// Checks the projection cursor against the stream; on any mismatch
    /// (schema drift, missing cursor, diverged tail) the read model is
    /// rebuilt from the stream. Returns whether a rebuild happened.
    pub fn validate_or_rebuild(&mut self, log: &EventLog) -> CoreResult<bool> {
        let expected = log.read_all()?;
        let stream_last = expected.envelopes.last().map(|e| e.id.clone());
        let cursor = self.last_applied_id()?;

        let consistent = self.schema_version()? == SCHEMA_VERSION && cursor == stream_last;
        if consistent {
            return Ok(false);
        }

        tracing::info!(
            cursor = ?cursor,
            stream_last = ?stream_last,
            "Read model out of step with event stream, rebuilding"
        );
        self.rebuild(&expected.envelopes)?;
        Ok(true)
    }

    fn rebuild(&mut self, envelopes: &[EventEnvelope]) -> CoreResult<()> {
        self.conn.execute_batch(
            "BEGIN IMMEDIATE;
             DELETE FROM tl_clips;
             DELETE FROM tl_markers;
             DELETE FROM media;
             DELETE FROM ui_state;
             DELETE FROM rm_meta WHERE key = 'last_applied_id';
             COMMIT;",
        )?;
        self.conn.execute(
            "INSERT INTO rm_meta (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![SCHEMA_VERSION.to_string()],
        )?;
        for envelope in envelopes {
            self.apply_event(envelope)?;
        }
        Ok(())
    }

    /// Project-close shutdown: checkpoint the WAL, reset the journal
    /// mode to DELETE, and clear leftover sidecar journal files.
    pub fn close(self) -> CoreResult<()> {
        let path = self.path.clone();
        let _ = self
            .conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()));
        let _ = self
            .conn
            .query_row("PRAGMA journal_mode=DELETE", [], |_| Ok(()));
        self.conn
            .close()
            .map_err(|(_, e)| CoreError::SqlError(e))?;

        if let Some(path) = path {
            for suffix in ["-wal", "-shm"] {
                let mut name = path.as_os_str().to_os_string();
                name.push(suffix);
                let sidecar = PathBuf::from(name);
                if sidecar.exists() {
                    let _ = std::fs::remove_file(sidecar);
                }
            }
        }
        Ok(())
    }
}

fn projection_err(message: &str) -> CoreError {
    CoreError::ProjectionError(message.to_string())
}
