//! Photographer profiles and their four embeddable dimension descriptions.
//!
//! Each description is its own content unit, so editing one dimension
//! invalidates exactly that dimension's embedding and leaves the others alone.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

use super::types::{ContentKind, ContentUnit, Dimension, PhotographerProfile};
use super::{delete_unit, insert_unit, new_unit_id, replace_source};
use crate::db::now_timestamp;
use crate::embedding::store::{unit_from_row, UNIT_COLUMNS};

/// A stored photographer with its dimension units.
#[derive(Debug, Clone, Serialize)]
pub struct PhotographerRecord {
    pub photographer_id: String,
    pub display_name: String,
    pub service_regions: Vec<String>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub companion_types: Vec<String>,
    pub profile_completed: bool,
    pub dimensions: BTreeMap<Dimension, ContentUnit>,
}

impl PhotographerRecord {
    /// All four dimension units exist and carry a current embedding.
    pub fn has_all_embeddings(&self) -> bool {
        Dimension::ALL.iter().all(|d| {
            self.dimensions
                .get(d)
                .map(ContentUnit::has_embedding)
                .unwrap_or(false)
        })
    }

    /// Eligible for matching: marked complete and every dimension embedded.
    pub fn is_eligible(&self) -> bool {
        self.profile_completed && self.has_all_embeddings()
    }
}

/// Outcome of a profile save.
#[derive(Debug, Default, Serialize)]
pub struct ProfileUpdate {
    pub created: bool,
    /// Dimensions whose description was added, edited or cleared.
    pub changed_dimensions: Vec<Dimension>,
}

/// Insert or update a photographer profile.
///
/// Attributes are overwritten. For each dimension description: `None` keeps
/// the current unit, an empty string removes it, and new or different text
/// (re)creates the embedding job for that dimension only.
pub fn upsert_photographer(conn: &mut Connection, profile: &PhotographerProfile) -> Result<ProfileUpdate> {
    anyhow::ensure!(
        !profile.photographer_id.trim().is_empty(),
        "photographer_id must not be empty"
    );
    if let (Some(min), Some(max)) = (profile.price_min, profile.price_max) {
        anyhow::ensure!(min <= max, "price_min ({min}) exceeds price_max ({max})");
    }

    let tx = conn.transaction()?;
    let now = now_timestamp();

    let exists: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM photographers WHERE photographer_id = ?1",
        params![profile.photographer_id],
        |row| row.get(0),
    )?;

    tx.execute(
        "INSERT INTO photographers \
         (photographer_id, display_name, service_regions, price_min, price_max, companion_types, profile_completed, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) \
         ON CONFLICT(photographer_id) DO UPDATE SET \
           display_name = excluded.display_name, \
           service_regions = excluded.service_regions, \
           price_min = excluded.price_min, \
           price_max = excluded.price_max, \
           companion_types = excluded.companion_types, \
           profile_completed = excluded.profile_completed, \
           updated_at = excluded.updated_at",
        params![
            profile.photographer_id,
            profile.display_name,
            serde_json::to_string(&profile.service_regions)?,
            profile.price_min,
            profile.price_max,
            serde_json::to_string(&profile.companion_types)?,
            profile.profile_completed,
            now,
        ],
    )?;

    let mut changed_dimensions = Vec::new();
    for dimension in Dimension::ALL {
        if let Some(text) = profile.description(dimension) {
            if write_dimension(&tx, &profile.photographer_id, dimension, text)? {
                changed_dimensions.push(dimension);
            }
        }
    }

    tx.commit()?;

    tracing::info!(
        photographer = %profile.photographer_id,
        created = !exists,
        changed = changed_dimensions.len(),
        "photographer profile saved"
    );

    Ok(ProfileUpdate {
        created: !exists,
        changed_dimensions,
    })
}

/// Edit a single dimension description. Returns whether anything changed.
pub fn update_profile_dimension(
    conn: &mut Connection,
    photographer_id: &str,
    dimension: Dimension,
    text: &str,
) -> Result<bool> {
    let tx = conn.transaction()?;
    let exists: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM photographers WHERE photographer_id = ?1",
        params![photographer_id],
        |row| row.get(0),
    )?;
    anyhow::ensure!(exists, "photographer not found: {photographer_id}");

    let changed = write_dimension(&tx, photographer_id, dimension, text)?;
    tx.commit()?;
    Ok(changed)
}

fn write_dimension(conn: &Connection, photographer_id: &str, dimension: Dimension, text: &str) -> Result<bool> {
    let existing = dimension_unit(conn, photographer_id, dimension)?;
    let text = text.trim();

    match (existing, text.is_empty()) {
        (None, true) => Ok(false),
        (Some(unit), true) => delete_unit(conn, &unit.id),
        (None, false) => {
            insert_unit(
                conn,
                &new_unit_id(),
                ContentKind::ProfileDimension,
                photographer_id,
                Some(dimension),
                text,
            )?;
            Ok(true)
        }
        (Some(unit), false) => replace_source(conn, &unit, text),
    }
}

fn dimension_unit(conn: &Connection, photographer_id: &str, dimension: Dimension) -> Result<Option<ContentUnit>> {
    let unit = conn
        .query_row(
            &format!(
                "SELECT {UNIT_COLUMNS} FROM content_units \
                 WHERE owner_id = ?1 AND kind = 'profile_dimension' AND dimension = ?2"
            ),
            params![photographer_id, dimension.as_str()],
            unit_from_row,
        )
        .optional()?;
    Ok(unit)
}

type PhotographerRow = (String, String, String, Option<i64>, Option<i64>, String, bool);

fn photographer_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhotographerRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn build_record(row: PhotographerRow, dimensions: BTreeMap<Dimension, ContentUnit>) -> Result<PhotographerRecord> {
    let (photographer_id, display_name, regions, price_min, price_max, companions, profile_completed) = row;
    Ok(PhotographerRecord {
        photographer_id,
        display_name,
        service_regions: serde_json::from_str(&regions)?,
        price_min,
        price_max,
        companion_types: serde_json::from_str(&companions)?,
        profile_completed,
        dimensions,
    })
}

const PHOTOGRAPHER_COLUMNS: &str = "photographer_id, display_name, service_regions, price_min, price_max, \
     companion_types, profile_completed";

pub fn get_photographer(conn: &Connection, photographer_id: &str) -> Result<Option<PhotographerRecord>> {
    let row = conn
        .query_row(
            &format!("SELECT {PHOTOGRAPHER_COLUMNS} FROM photographers WHERE photographer_id = ?1"),
            params![photographer_id],
            photographer_row,
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut dimensions = BTreeMap::new();
    for dimension in Dimension::ALL {
        if let Some(unit) = dimension_unit(conn, photographer_id, dimension)? {
            dimensions.insert(dimension, unit);
        }
    }
    build_record(row, dimensions).map(Some)
}

/// Every photographer with its dimension units, ordered by id.
///
/// Two queries joined in memory, so the caller sees one consistent read when
/// run inside a transaction.
pub fn list_photographers(conn: &Connection) -> Result<Vec<PhotographerRecord>> {
    let rows = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PHOTOGRAPHER_COLUMNS} FROM photographers ORDER BY photographer_id"
        ))?;
        let rows = stmt
            .query_map([], photographer_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut units_by_owner: BTreeMap<String, BTreeMap<Dimension, ContentUnit>> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT {UNIT_COLUMNS} FROM content_units WHERE kind = 'profile_dimension'"
        ))?;
        let units = stmt
            .query_map([], unit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for unit in units {
            if let Some(dimension) = unit.dimension {
                units_by_owner
                    .entry(unit.owner_id.clone())
                    .or_default()
                    .insert(dimension, unit);
            }
        }
    }

    rows.into_iter()
        .map(|row| {
            let dims = units_by_owner.remove(&row.0).unwrap_or_default();
            build_record(row, dims)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::embedding::store;

    fn full_profile(id: &str) -> PhotographerProfile {
        PhotographerProfile {
            photographer_id: id.into(),
            display_name: "Mina".into(),
            service_regions: vec!["seoul".into()],
            price_min: Some(100),
            price_max: Some(300),
            companion_types: vec!["couple".into()],
            profile_completed: true,
            style_emotion_description: Some("Warm film tones".into()),
            communication_psychology_description: Some("Calm, guiding direction".into()),
            purpose_story_description: Some("Everyday stories".into()),
            companion_description: Some("Couples and friends".into()),
        }
    }

    #[test]
    fn new_profile_creates_four_units() {
        let mut conn = db::open_memory_database().unwrap();
        let update = upsert_photographer(&mut conn, &full_profile("p1")).unwrap();
        assert!(update.created);
        assert_eq!(update.changed_dimensions.len(), 4);

        let record = get_photographer(&conn, "p1").unwrap().unwrap();
        assert_eq!(record.dimensions.len(), 4);
        assert!(!record.is_eligible(), "no embeddings yet");
        assert_eq!(crate::jobs::queue::job_counts(&conn).unwrap().pending, 4);
    }

    #[test]
    fn eligible_once_all_dimensions_embedded() {
        let mut conn = db::open_memory_database().unwrap();
        upsert_photographer(&mut conn, &full_profile("p1")).unwrap();
        let record = get_photographer(&conn, "p1").unwrap().unwrap();
        for unit in record.dimensions.values() {
            store::set_embedding(&conn, &unit.id, &[1.0, 0.0], "m").unwrap();
        }

        let record = get_photographer(&conn, "p1").unwrap().unwrap();
        assert!(record.is_eligible());
    }

    #[test]
    fn rejects_inverted_price_range() {
        let mut conn = db::open_memory_database().unwrap();
        let mut profile = full_profile("p1");
        profile.price_min = Some(500);
        assert!(upsert_photographer(&mut conn, &profile).is_err());
    }

    #[test]
    fn empty_description_removes_dimension() {
        let mut conn = db::open_memory_database().unwrap();
        upsert_photographer(&mut conn, &full_profile("p1")).unwrap();

        let changed =
            update_profile_dimension(&mut conn, "p1", Dimension::Companion, "  ").unwrap();
        assert!(changed);
        let record = get_photographer(&conn, "p1").unwrap().unwrap();
        assert!(!record.dimensions.contains_key(&Dimension::Companion));
    }

    #[test]
    fn list_joins_units_to_owners() {
        let mut conn = db::open_memory_database().unwrap();
        upsert_photographer(&mut conn, &full_profile("p2")).unwrap();
        let mut partial = full_profile("p1");
        partial.purpose_story_description = None;
        upsert_photographer(&mut conn, &partial).unwrap();

        let all = list_photographers(&conn).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].photographer_id, "p1");
        assert_eq!(all[0].dimensions.len(), 3);
        assert_eq!(all[1].dimensions.len(), 4);
        assert_eq!(all[1].service_regions, vec!["seoul".to_string()]);
    }
}
