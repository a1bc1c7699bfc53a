//! Chat sessions and their participant sets.
//!
//! Membership rows are keyed by `(chat_id, user_id)`, so every insert is a
//! set union: concurrent or repeated admissions commute and never drop a
//! member that another writer added.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::params;

use lifeline_shared::models::{Chat, Closure};
use lifeline_shared::types::{ChatId, EmergencyId, UserId};

use crate::database::{col_enum, col_ts, col_uuid, not_found, ts, Database};
use crate::error::{Result, StoreError};

/// Outcome of admitting a user into a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The user was not a member before this call.
    Added,
    /// The user was already a member; nothing changed.
    AlreadyMember,
}

impl Database {
    /// Insert a chat together with its initial members, who count as joined.
    pub fn insert_chat(&mut self, chat: &Chat) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO chats (id, emergency_id, is_active, created_at, expires_at, closure)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chat.id.to_string(),
                chat.emergency_id.to_string(),
                chat.is_active,
                ts(&chat.created_at),
                ts(&chat.expires_at),
                chat.closure.map(|c| c.as_str()),
            ],
        )?;
        for user in &chat.participant_ids {
            tx.execute(
                "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, added_at, joined_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![chat.id.to_string(), user.as_str(), ts(&chat.created_at)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        let mut chat = self
            .conn()
            .query_row(
                "SELECT id, emergency_id, is_active, created_at, expires_at, closure
                 FROM chats WHERE id = ?1",
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(not_found)?;
        chat.participant_ids = self.participants(id)?;
        Ok(chat)
    }

    pub fn participants(&self, id: ChatId) -> Result<BTreeSet<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM chat_participants WHERE chat_id = ?1")?;
        let rows = stmt.query_map(params![id.to_string()], |row| row.get::<_, String>(0))?;

        let mut set = BTreeSet::new();
        for row in rows {
            set.insert(UserId(row?));
        }
        Ok(set)
    }

    /// Union-add `user` to the chat without marking them as joined.
    pub fn add_participant(
        &self,
        id: ChatId,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<Admission> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, added_at, joined_at)
             VALUES (?1, ?2, ?3, NULL)",
            params![id.to_string(), user.as_str(), ts(&at)],
        )?;
        Ok(if affected > 0 {
            Admission::Added
        } else {
            Admission::AlreadyMember
        })
    }

    /// Union-add `user` and mark them joined.
    ///
    /// Returns `true` only for the call that first recorded the join, whether
    /// or not the user had been pre-authorized before.
    pub fn join_participant(
        &mut self,
        id: ChatId,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, added_at, joined_at)
             VALUES (?1, ?2, ?3, NULL)",
            params![id.to_string(), user.as_str(), ts(&at)],
        )?;
        let first = tx.execute(
            "UPDATE chat_participants SET joined_at = ?3
             WHERE chat_id = ?1 AND user_id = ?2 AND joined_at IS NULL",
            params![id.to_string(), user.as_str(), ts(&at)],
        )?;
        tx.commit()?;
        Ok(first > 0)
    }

    /// Deactivate an active chat. Returns `true` if this call closed it.
    pub fn close_chat(&self, id: ChatId, closure: Closure) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chats SET is_active = 0, closure = ?1 WHERE id = ?2 AND is_active = 1",
            params![closure.as_str(), id.to_string()],
        )?;
        if affected == 0 {
            let exists: i64 = self.conn().query_row(
                "SELECT COUNT(*) FROM chats WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(StoreError::NotFound);
            }
        }
        Ok(affected > 0)
    }

    /// Active chats whose `expires_at` is at or before `now`.
    pub fn expired_active_chats(&self, now: DateTime<Utc>) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, emergency_id, is_active, created_at, expires_at, closure
             FROM chats
             WHERE is_active = 1 AND expires_at <= ?1
             ORDER BY expires_at ASC",
        )?;
        let rows = stmt.query_map(params![ts(&now)], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            let mut chat = row?;
            chat.participant_ids = self.participants(chat.id)?;
            chats.push(chat);
        }
        Ok(chats)
    }
}

/// Participants are loaded separately; the set starts empty.
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let closure: Option<String> = row.get(5)?;
    let closure = match closure {
        Some(_) => Some(col_enum::<Closure>(row, 5)?),
        None => None,
    };
    Ok(Chat {
        id: ChatId(col_uuid(row, 0)?),
        emergency_id: EmergencyId(col_uuid(row, 1)?),
        participant_ids: BTreeSet::new(),
        is_active: row.get(2)?,
        created_at: col_ts(row, 3)?,
        expires_at: col_ts(row, 4)?,
        closure,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::emergencies::tests::emergency;
    use chrono::Duration;

    /// Insert an emergency plus its chat with `victim` as sole member.
    pub(crate) fn seeded_chat(db: &mut Database, victim: &str) -> Chat {
        let e = emergency(victim);
        db.insert_emergency(&e).unwrap();
        let now = Utc::now();
        let chat = Chat {
            id: ChatId::new(),
            emergency_id: e.id,
            participant_ids: [UserId::new(victim)].into_iter().collect(),
            is_active: true,
            created_at: now,
            expires_at: now + Duration::hours(1),
            closure: None,
        };
        db.insert_chat(&chat).unwrap();
        chat
    }

    #[test]
    fn test_insert_and_get() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = seeded_chat(&mut db, "victim");

        let got = db.get_chat(chat.id).unwrap();
        assert_eq!(got, chat);
    }

    #[test]
    fn test_participants_are_a_union() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = seeded_chat(&mut db, "victim");
        let now = Utc::now();

        for user in ["a", "b", "a", "victim", "c", "b"] {
            db.add_participant(chat.id, &UserId::new(user), now).unwrap();
        }
        let members: Vec<_> = db
            .participants(chat.id)
            .unwrap()
            .into_iter()
            .map(|u| u.0)
            .collect();
        assert_eq!(members, vec!["a", "b", "c", "victim"]);
    }

    #[test]
    fn test_first_join_only_once() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = seeded_chat(&mut db, "victim");
        let helper = UserId::new("helper");
        let now = Utc::now();

        // Pre-authorized by fan-out, not yet joined.
        assert_eq!(db.add_participant(chat.id, &helper, now).unwrap(), Admission::Added);
        assert!(db.join_participant(chat.id, &helper, now).unwrap());
        assert!(!db.join_participant(chat.id, &helper, now).unwrap());

        // The creator joined at creation.
        assert!(!db.join_participant(chat.id, &UserId::new("victim"), now).unwrap());
    }

    #[test]
    fn test_close_once() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = seeded_chat(&mut db, "victim");

        assert!(db.close_chat(chat.id, Closure::Resolved).unwrap());
        assert!(!db.close_chat(chat.id, Closure::Expired).unwrap());

        let got = db.get_chat(chat.id).unwrap();
        assert!(!got.is_active);
        assert_eq!(got.closure, Some(Closure::Resolved));
        assert!(db.close_chat(ChatId::new(), Closure::Resolved).unwrap_err().is_not_found());
    }

    #[test]
    fn test_expired_active_chats() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = seeded_chat(&mut db, "victim");
        let closed = seeded_chat(&mut db, "other");
        db.close_chat(closed.id, Closure::Resolved).unwrap();

        assert!(db.expired_active_chats(Utc::now()).unwrap().is_empty());

        let later = Utc::now() + Duration::hours(2);
        let expired = db.expired_active_chats(later).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, chat.id);
        assert!(expired[0].is_participant(&UserId::new("victim")));
    }
}
