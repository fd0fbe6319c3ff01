//! Mutation Applier
//!
//! Applies plans inside the command transaction and reverses them from
//! captured originals. Executors persist the plan plus the captured
//! originals as their undo payload, so undo and redo replay exactly.

use serde::{Deserialize, Serialize};

use crate::core::store::{ClipRow, Database, PropertyRow};
use crate::core::{CoreError, CoreResult};

use super::Mutation;

/// Pre-apply snapshot of every clip a plan will touch, captured before
/// the first write. Properties ride along so deleted clips restore
/// completely.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OriginalStates {
    pub clips: Vec<ClipRow>,
    pub properties: Vec<PropertyRow>,
}

/// Loads the current rows for every existing clip the plan touches.
pub fn capture_originals(db: &Database, mutations: &[Mutation]) -> CoreResult<OriginalStates> {
    let mut originals = OriginalStates::default();
    for mutation in mutations {
        if !mutation.touches_existing() {
            continue;
        }
        let id = mutation.clip_id();
        if originals.clips.iter().any(|c| c.id == id) {
            continue;
        }
        originals.clips.push(db.get_clip(id)?);
        originals.properties.extend(db.properties_for_clip(id)?);
    }
    Ok(originals)
}

/// Applies a plan in emission order.
pub fn apply_mutations(db: &Database, mutations: &[Mutation]) -> CoreResult<()> {
    for mutation in mutations {
        match mutation {
            Mutation::Insert { clip } => db.insert_clip(clip)?,
            Mutation::Update {
                clip_id,
                timeline_start_frame,
                duration_frames,
                source_in_frame,
                source_out_frame,
                track_id,
            } => {
                if let Some(track_id) = track_id {
                    db.update_clip_track(clip_id, track_id)?;
                }
                db.update_clip_geometry(
                    clip_id,
                    *timeline_start_frame,
                    *duration_frames,
                    *source_in_frame,
                    *source_out_frame,
                )?;
            }
            Mutation::Delete { clip_id } => db.delete_clip(clip_id)?,
        }
    }
    Ok(())
}

/// Reverses a plan in reverse emission order using the captured
/// originals.
pub fn revert_mutations(
    db: &Database,
    mutations: &[Mutation],
    originals: &OriginalStates,
) -> CoreResult<()> {
    let original_of = |id: &str| -> CoreResult<&ClipRow> {
        originals
            .clips
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| CoreError::Internal(format!("missing original state for clip {id}")))
    };

    for mutation in mutations.iter().rev() {
        match mutation {
            Mutation::Insert { clip } => db.delete_clip(&clip.id)?,
            Mutation::Update { clip_id, .. } => {
                db.restore_clip(original_of(clip_id)?)?;
            }
            Mutation::Delete { clip_id } => {
                db.insert_clip(original_of(clip_id)?)?;
                for prop in originals.properties.iter().filter(|p| &p.clip_id == clip_id) {
                    db.upsert_property(prop)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mutator::plan_occlusion;
    use crate::core::store::fixtures::{seed_clip, seed_timeline};
    use crate::core::time::{FrameRate, RationalTime};

    #[test]
    fn test_apply_and_revert_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let (project_id, sequence_id, track_id, _) = seed_timeline(&db);
        let a = seed_clip(&db, &project_id, &sequence_id, &track_id, 0, 100);
        let b = seed_clip(&db, &project_id, &sequence_id, &track_id, 200, 100);

        db.upsert_property(&PropertyRow {
            clip_id: b.id.clone(),
            key: "note".into(),
            kind: "string".into(),
            value: serde_json::json!("keep me"),
        })
        .unwrap();

        let rate = FrameRate::FPS_30;
        let clips = db.clips_on_track(&track_id).unwrap();
        // Footprint trims A's tail and swallows B whole.
        let plan = plan_occlusion(
            &clips,
            rate,
            RationalTime::from_frames(50, rate),
            RationalTime::from_frames(300, rate),
            None,
        );

        let originals = capture_originals(&db, &plan).unwrap();
        apply_mutations(&db, &plan).unwrap();

        assert_eq!(db.get_clip(&a.id).unwrap().duration_frames, 50);
        assert!(db.get_clip(&b.id).is_err());

        revert_mutations(&db, &plan, &originals).unwrap();

        let restored_a = db.get_clip(&a.id).unwrap();
        assert_eq!(restored_a.duration_frames, 100);
        let restored_b = db.get_clip(&b.id).unwrap();
        assert_eq!(restored_b.timeline_start_frame, 200);
        let props = db.properties_for_clip(&b.id).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].value, serde_json::json!("keep me"));
    }

    #[test]
    fn test_capture_skips_inserts_and_dedups() {
        let db = Database::open_in_memory().unwrap();
        let (project_id, sequence_id, track_id, _) = seed_timeline(&db);
        let a = seed_clip(&db, &project_id, &sequence_id, &track_id, 0, 100);

        let plan = vec![
            Mutation::Update {
                clip_id: a.id.clone(),
                timeline_start_frame: 0,
                duration_frames: 50,
                source_in_frame: 0,
                source_out_frame: 50,
                track_id: None,
            },
            Mutation::Delete {
                clip_id: a.id.clone(),
            },
        ];
        let originals = capture_originals(&db, &plan).unwrap();
        assert_eq!(originals.clips.len(), 1);
    }
}
