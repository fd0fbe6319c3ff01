//! Primary Store Schema
//!
//! Idempotent table and index creation for the `.jvp` database.

pub(super) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    settings TEXT NOT NULL DEFAULT '{}',
    current_sequence_number INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sequences (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id),
    name TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'timeline',
    fps_num INTEGER NOT NULL,
    fps_den INTEGER NOT NULL,
    width INTEGER NOT NULL DEFAULT 1920,
    height INTEGER NOT NULL DEFAULT 1080,
    audio_sample_rate INTEGER NOT NULL DEFAULT 48000,
    playhead_frame INTEGER NOT NULL DEFAULT 0,
    view_start_frame INTEGER NOT NULL DEFAULT 0,
    view_duration_frames INTEGER NOT NULL DEFAULT 0,
    current_sequence_number INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sequences_project
    ON sequences(project_id);

CREATE TABLE IF NOT EXISTS tracks (
    id TEXT PRIMARY KEY,
    sequence_id TEXT NOT NULL REFERENCES sequences(id),
    track_type TEXT NOT NULL,
    track_index INTEGER NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    enabled INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_tracks_sequence
    ON tracks(sequence_id, track_type, track_index);

CREATE TABLE IF NOT EXISTS clips (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id),
    track_id TEXT,
    clip_kind TEXT NOT NULL DEFAULT 'timeline',
    name TEXT NOT NULL DEFAULT '',
    media_id TEXT,
    master_clip_id TEXT,
    owner_sequence_id TEXT,
    source_sequence_id TEXT,
    timeline_start_frame INTEGER NOT NULL DEFAULT 0,
    duration_frames INTEGER NOT NULL DEFAULT 1,
    source_in_frame INTEGER NOT NULL DEFAULT 0,
    source_out_frame INTEGER NOT NULL DEFAULT 1,
    fps_num INTEGER NOT NULL,
    fps_den INTEGER NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    offline INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_clips_track_start
    ON clips(track_id, timeline_start_frame);
CREATE INDEX IF NOT EXISTS idx_clips_owner_sequence
    ON clips(owner_sequence_id);

CREATE TABLE IF NOT EXISTS media (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id),
    name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    duration_frames INTEGER NOT NULL DEFAULT 0,
    fps_num INTEGER NOT NULL,
    fps_den INTEGER NOT NULL,
    width INTEGER NOT NULL DEFAULT 0,
    height INTEGER NOT NULL DEFAULT 0,
    audio_channels INTEGER NOT NULL DEFAULT 0,
    codec TEXT NOT NULL DEFAULT '',
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS properties (
    clip_id TEXT NOT NULL REFERENCES clips(id),
    key TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'string',
    value TEXT NOT NULL,
    PRIMARY KEY (clip_id, key)
);

CREATE TABLE IF NOT EXISTS clip_links (
    link_id TEXT NOT NULL,
    clip_id TEXT NOT NULL REFERENCES clips(id),
    PRIMARY KEY (link_id, clip_id)
);

CREATE TABLE IF NOT EXISTS commands (
    sequence_number INTEGER PRIMARY KEY,
    parent_sequence_number INTEGER NOT NULL,
    command_id TEXT NOT NULL,
    command_type TEXT NOT NULL,
    command_args TEXT NOT NULL,
    persisted TEXT NOT NULL DEFAULT '{}',
    project_id TEXT NOT NULL,
    stack_id TEXT NOT NULL DEFAULT 'global',
    executed_at TEXT NOT NULL,
    playhead_value INTEGER,
    undo_group_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_commands_parent
    ON commands(parent_sequence_number);
CREATE INDEX IF NOT EXISTS idx_commands_group
    ON commands(undo_group_id);
";
