use chrono::{DateTime, Utc};
use rusqlite::params;

use lifeline_shared::models::{Message, NewMessage};
use lifeline_shared::types::{ChatId, MessageId, UserId};

use crate::database::{
    col_enum, col_location, col_ts, col_uuid, location_params, ts, Database,
};
use crate::error::Result;

const COLUMNS: &str = "seq, id, chat_id, sender_id, sender_name, text, kind, latitude, longitude,
                       accuracy_m, located_at, sent_at";

impl Database {
    /// Append a message stamped `sent_at` with the next sequence number.
    pub fn append_message(&self, message: &NewMessage, sent_at: DateTime<Utc>) -> Result<Message> {
        let id = MessageId::new();
        let (lat, lng, acc, located_at) = location_params(message.location.as_ref());

        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_id, sender_name, text, kind, latitude,
                                   longitude, accuracy_m, located_at, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.as_str(),
                message.sender_name,
                message.text,
                message.kind.as_str(),
                lat,
                lng,
                acc,
                located_at,
                ts(&sent_at),
            ],
        )?;

        Ok(Message {
            id,
            chat_id: message.chat_id,
            sender_id: message.sender_id.clone(),
            sender_name: message.sender_name.clone(),
            text: message.text.clone(),
            kind: message.kind,
            location: message.location,
            sent_at,
            seq: self.conn().last_insert_rowid(),
        })
    }

    /// Full transcript of a chat in delivery order.
    pub fn get_messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY sent_at ASC, seq ASC"
            ),
            params![chat_id.to_string()],
        )
    }

    /// Messages appended after sequence number `after_seq`, in order.
    pub fn get_messages_since(&self, chat_id: ChatId, after_seq: i64) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {COLUMNS} FROM messages
                 WHERE chat_id = ?1 AND seq > ?2
                 ORDER BY sent_at ASC, seq ASC"
            ),
            params![chat_id.to_string(), after_seq],
        )
    }

    fn query_messages(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(args, row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        seq: row.get(0)?,
        id: MessageId(col_uuid(row, 1)?),
        chat_id: ChatId(col_uuid(row, 2)?),
        sender_id: UserId(row.get(3)?),
        sender_name: row.get(4)?,
        text: row.get(5)?,
        kind: col_enum(row, 6)?,
        location: col_location(row, 7)?,
        sent_at: col_ts(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chats::tests::seeded_chat;
    use lifeline_shared::models::{Location, MessageKind};

    fn text(chat_id: ChatId, body: &str) -> NewMessage {
        NewMessage {
            chat_id,
            sender_id: UserId::new("victim"),
            sender_name: "Victim".into(),
            text: body.into(),
            kind: MessageKind::Text,
            location: None,
        }
    }

    #[test]
    fn test_append_orders_by_seq() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = seeded_chat(&mut db, "victim");

        let now = Utc::now();
        let first = db.append_message(&NewMessage::system(chat.id, "opened"), now).unwrap();
        let second = db.append_message(&text(chat.id, "help"), now).unwrap();
        assert!(second.seq > first.seq);

        let all = db.get_messages_for_chat(chat.id).unwrap();
        let texts: Vec<_> = all.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["opened", "help"]);
        assert_eq!(all[0].kind, MessageKind::System);

        let since = db.get_messages_since(chat.id, first.seq).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].id, second.id);
    }

    #[test]
    fn test_location_message() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = seeded_chat(&mut db, "victim");
        let mut msg = text(chat.id, "I am here");
        msg.kind = MessageKind::Location;
        msg.location = Some(Location::new(10.0, 20.0, 3.0, Utc::now()));

        let stored = db.append_message(&msg, Utc::now()).unwrap();
        let got = db.get_messages_for_chat(chat.id).unwrap().remove(0);
        assert_eq!(got.id, stored.id);
        assert_eq!(got.kind, MessageKind::Location);
        assert_eq!(got.location.unwrap().longitude, 20.0);
    }
}
