//! Emergency records and their status transitions.

use rusqlite::params;

use lifeline_shared::models::{Emergency, EmergencyStatus};
use lifeline_shared::types::{ChatId, EmergencyId, UserId};

use crate::database::{
    col_enum, col_location, col_opt_uuid, col_ts, col_uuid, location_params, not_found, ts,
    Database,
};
use crate::error::{Result, StoreError};

const COLUMNS: &str = "id, victim_id, victim_name, victim_contact, latitude, longitude, accuracy_m,
                       located_at, location_quality, status, trigger_reason, created_at, chat_id";

impl Database {
    pub fn insert_emergency(&self, emergency: &Emergency) -> Result<()> {
        let (lat, lng, acc, located_at) = location_params(emergency.location.as_ref());
        self.conn().execute(
            "INSERT INTO emergencies (id, victim_id, victim_name, victim_contact, latitude,
                                      longitude, accuracy_m, located_at, location_quality,
                                      status, trigger_reason, created_at, chat_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                emergency.id.to_string(),
                emergency.victim_id.as_str(),
                emergency.victim_name,
                emergency.victim_contact,
                lat,
                lng,
                acc,
                located_at,
                emergency.location_quality.as_str(),
                emergency.status.as_str(),
                emergency.trigger_reason.as_str(),
                ts(&emergency.created_at),
                emergency.chat_id.map(|c| c.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn get_emergency(&self, id: EmergencyId) -> Result<Emergency> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM emergencies WHERE id = ?1"),
                params![id.to_string()],
                row_to_emergency,
            )
            .map_err(not_found)
    }

    /// Link the session to its emergency.
    pub fn set_emergency_chat(&self, id: EmergencyId, chat_id: ChatId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE emergencies SET chat_id = ?1 WHERE id = ?2",
            params![chat_id.to_string(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Move an open emergency to `status`.
    ///
    /// Closed is terminal: the update only applies while the stored status is
    /// not `closed`. Returns `true` if this call performed the transition,
    /// which makes the first of several racing closers the only winner.
    pub fn transition_emergency(&self, id: EmergencyId, status: EmergencyStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE emergencies SET status = ?1
             WHERE id = ?2 AND status != 'closed' AND status != ?1",
            params![status.as_str(), id.to_string()],
        )?;
        if affected == 0 {
            // Distinguish "nothing to do" from "no such emergency".
            self.get_emergency(id)?;
        }
        Ok(affected > 0)
    }

    /// Emergencies of `victim_id` still `waiting` or `active`, newest first.
    pub fn open_emergencies_for(&self, victim_id: &UserId) -> Result<Vec<Emergency>> {
        self.query_emergencies(
            &format!(
                "SELECT {COLUMNS} FROM emergencies
                 WHERE victim_id = ?1 AND status IN ('waiting', 'active')
                 ORDER BY created_at DESC, rowid DESC"
            ),
            victim_id,
        )
    }

    /// Every emergency of `victim_id`, newest first.
    pub fn emergency_history(&self, victim_id: &UserId) -> Result<Vec<Emergency>> {
        self.query_emergencies(
            &format!(
                "SELECT {COLUMNS} FROM emergencies
                 WHERE victim_id = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ),
            victim_id,
        )
    }

    fn query_emergencies(&self, sql: &str, victim_id: &UserId) -> Result<Vec<Emergency>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![victim_id.as_str()], row_to_emergency)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_emergency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Emergency> {
    Ok(Emergency {
        id: EmergencyId(col_uuid(row, 0)?),
        victim_id: UserId(row.get(1)?),
        victim_name: row.get(2)?,
        victim_contact: row.get(3)?,
        location: col_location(row, 4)?,
        location_quality: col_enum(row, 8)?,
        status: col_enum(row, 9)?,
        trigger_reason: col_enum(row, 10)?,
        created_at: col_ts(row, 11)?,
        chat_id: col_opt_uuid(row, 12)?.map(ChatId),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lifeline_shared::models::{Location, LocationQuality, TriggerReason};

    pub(crate) fn emergency(victim: &str) -> Emergency {
        Emergency {
            id: EmergencyId::new(),
            victim_id: UserId::new(victim),
            victim_name: "Victim".into(),
            victim_contact: Some("+1 555 0101".into()),
            location: Some(Location::new(45.0, 5.0, 8.0, Utc::now())),
            location_quality: LocationQuality::Live,
            status: EmergencyStatus::Waiting,
            trigger_reason: TriggerReason::HoldConfirmed,
            created_at: Utc::now(),
            chat_id: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let e = emergency("v");
        db.insert_emergency(&e).unwrap();
        let got = db.get_emergency(e.id).unwrap();
        assert_eq!(got.victim_id, e.victim_id);
        assert_eq!(got.status, EmergencyStatus::Waiting);
        assert_eq!(got.location.unwrap().latitude, 45.0);
    }

    #[test]
    fn test_closed_is_terminal() {
        let db = Database::open_in_memory().unwrap();
        let e = emergency("v");
        db.insert_emergency(&e).unwrap();

        assert!(db.transition_emergency(e.id, EmergencyStatus::Active).unwrap());
        assert!(db.transition_emergency(e.id, EmergencyStatus::Closed).unwrap());
        // Second close loses, reopening is impossible.
        assert!(!db.transition_emergency(e.id, EmergencyStatus::Closed).unwrap());
        assert!(!db.transition_emergency(e.id, EmergencyStatus::Active).unwrap());
        assert_eq!(db.get_emergency(e.id).unwrap().status, EmergencyStatus::Closed);
    }

    #[test]
    fn test_transition_unknown_emergency() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .transition_emergency(EmergencyId::new(), EmergencyStatus::Closed)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_open_emergencies_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let mut older = emergency("v");
        older.created_at = Utc::now() - Duration::seconds(5);
        let newer = emergency("v");
        let closed = emergency("v");
        db.insert_emergency(&older).unwrap();
        db.insert_emergency(&newer).unwrap();
        db.insert_emergency(&closed).unwrap();
        db.transition_emergency(closed.id, EmergencyStatus::Closed)
            .unwrap();
        db.insert_emergency(&emergency("someone-else")).unwrap();

        let open = db.open_emergencies_for(&UserId::new("v")).unwrap();
        let ids: Vec<_> = open.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        assert_eq!(db.emergency_history(&UserId::new("v")).unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_unknown_status() {
        let db = Database::open_in_memory().unwrap();
        let e = emergency("v");
        db.insert_emergency(&e).unwrap();
        db.conn()
            .execute(
                "UPDATE emergencies SET status = 'archived' WHERE id = ?1",
                params![e.id.to_string()],
            )
            .unwrap();
        assert!(matches!(
            db.get_emergency(e.id),
            Err(StoreError::Sqlite(rusqlite::Error::FromSqlConversionFailure(9, _, _)))
        ));
    }
}
