//! Last reported presence of each user.

use rusqlite::params;

use lifeline_shared::models::UserPresence;
use lifeline_shared::types::UserId;

use crate::database::{col_location, col_ts, location_params, not_found, ts, Database};
use crate::error::Result;

const COLUMNS: &str = "user_id, display_name, phone, email, latitude, longitude, accuracy_m,
                       located_at, is_online, last_active";

impl Database {
    /// Insert or replace the presence row of a user.
    ///
    /// A report without a location keeps the previously known one: a user
    /// going offline does not forget where they were last seen.
    pub fn upsert_presence(&self, presence: &UserPresence) -> Result<()> {
        let (lat, lng, acc, located_at) = location_params(presence.location.as_ref());
        self.conn().execute(
            "INSERT INTO presence (user_id, display_name, phone, email, latitude, longitude,
                                   accuracy_m, located_at, is_online, last_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                phone        = excluded.phone,
                email        = excluded.email,
                latitude     = COALESCE(excluded.latitude, presence.latitude),
                longitude    = COALESCE(excluded.longitude, presence.longitude),
                accuracy_m   = COALESCE(excluded.accuracy_m, presence.accuracy_m),
                located_at   = COALESCE(excluded.located_at, presence.located_at),
                is_online    = excluded.is_online,
                last_active  = excluded.last_active",
            params![
                presence.user_id.as_str(),
                presence.display_name,
                presence.phone,
                presence.email,
                lat,
                lng,
                acc,
                located_at,
                presence.is_online,
                ts(&presence.last_active),
            ],
        )?;
        Ok(())
    }

    pub fn get_presence(&self, user_id: &UserId) -> Result<UserPresence> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM presence WHERE user_id = ?1"),
                params![user_id.as_str()],
                row_to_presence,
            )
            .map_err(not_found)
    }

    /// Every user with a known last-reported location.
    pub fn list_located_presence(&self) -> Result<Vec<UserPresence>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM presence
             WHERE latitude IS NOT NULL AND longitude IS NOT NULL AND located_at IS NOT NULL"
        ))?;

        let rows = stmt.query_map([], row_to_presence)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_presence(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserPresence> {
    Ok(UserPresence {
        user_id: UserId(row.get(0)?),
        display_name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        location: col_location(row, 4)?,
        is_online: row.get(8)?,
        last_active: col_ts(row, 9)?,
    })
}
