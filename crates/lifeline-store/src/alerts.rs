//! Helper alert records written during fan-out.

use rusqlite::params;

use lifeline_shared::models::{DeliveryStatus, HelperAlert};
use lifeline_shared::types::{AlertId, ChatId, EmergencyId, UserId};

use crate::database::{col_enum, col_ts, col_uuid, not_found, ts, Database};
use crate::error::Result;

const COLUMNS: &str =
    "id, helper_id, emergency_id, chat_id, distance_km, delivery_status, created_at";

impl Database {
    /// Insert an alert. At most one alert exists per (helper, emergency);
    /// returns `false` if one was already there.
    pub fn insert_alert(&self, alert: &HelperAlert) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO helper_alerts
                (id, helper_id, emergency_id, chat_id, distance_km, delivery_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                alert.id.to_string(),
                alert.helper_id.as_str(),
                alert.emergency_id.to_string(),
                alert.chat_id.to_string(),
                alert.distance_km,
                alert.delivery_status.as_str(),
                ts(&alert.created_at),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn get_alert(&self, id: AlertId) -> Result<HelperAlert> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM helper_alerts WHERE id = ?1"),
                params![id.to_string()],
                row_to_alert,
            )
            .map_err(not_found)
    }

    /// pending → delivered. Returns `true` if this call changed the status.
    pub fn mark_alert_delivered(&self, id: AlertId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE helper_alerts SET delivery_status = 'delivered'
             WHERE id = ?1 AND delivery_status = 'pending'",
            params![id.to_string()],
        )?;
        if affected == 0 {
            self.get_alert(id)?;
        }
        Ok(affected > 0)
    }

    /// Alerts addressed to `helper_id` with the given status, newest first.
    pub fn alerts_for_helper(
        &self,
        helper_id: &UserId,
        status: DeliveryStatus,
    ) -> Result<Vec<HelperAlert>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM helper_alerts
             WHERE helper_id = ?1 AND delivery_status = ?2
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![helper_id.as_str(), status.as_str()], row_to_alert)?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<HelperAlert> {
    Ok(HelperAlert {
        id: AlertId(col_uuid(row, 0)?),
        helper_id: UserId(row.get(1)?),
        emergency_id: EmergencyId(col_uuid(row, 2)?),
        chat_id: ChatId(col_uuid(row, 3)?),
        distance_km: row.get(4)?,
        delivery_status: col_enum(row, 5)?,
        created_at: col_ts(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chats::tests::seeded_chat;
    use chrono::Utc;

    fn alert(helper: &str, emergency_id: EmergencyId, chat_id: ChatId) -> HelperAlert {
        HelperAlert {
            id: AlertId::new(),
            helper_id: UserId::new(helper),
            emergency_id,
            chat_id,
            distance_km: 1.5,
            delivery_status: DeliveryStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_one_alert_per_helper_and_emergency() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = seeded_chat(&mut db, "victim");

        assert!(db.insert_alert(&alert("h", chat.emergency_id, chat.id)).unwrap());
        assert!(!db.insert_alert(&alert("h", chat.emergency_id, chat.id)).unwrap());
        let pending = db
            .alerts_for_helper(&UserId::new("h"), DeliveryStatus::Pending)
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_delivery_transition() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = seeded_chat(&mut db, "victim");
        let a = alert("h", chat.emergency_id, chat.id);
        db.insert_alert(&a).unwrap();

        let helper = UserId::new("h");
        assert_eq!(db.alerts_for_helper(&helper, DeliveryStatus::Pending).unwrap().len(), 1);

        assert!(db.mark_alert_delivered(a.id).unwrap());
        assert!(!db.mark_alert_delivered(a.id).unwrap());

        assert!(db.alerts_for_helper(&helper, DeliveryStatus::Pending).unwrap().is_empty());
        assert_eq!(
            db.get_alert(a.id).unwrap().delivery_status,
            DeliveryStatus::Delivered
        );
        assert!(db.mark_alert_delivered(AlertId::new()).unwrap_err().is_not_found());
    }
}
