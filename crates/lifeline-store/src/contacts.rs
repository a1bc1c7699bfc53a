//! CRUD operations for [`EmergencyContact`] records.

use rusqlite::params;

use lifeline_shared::models::EmergencyContact;
use lifeline_shared::types::{ContactId, UserId};

use crate::database::{col_uuid, not_found, Database};
use crate::error::{Result, StoreError};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new contact. If it is primary, the owner's other contacts
    /// lose the flag.
    pub fn insert_contact(&mut self, contact: &EmergencyContact) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        if contact.is_primary {
            tx.execute(
                "UPDATE contacts SET is_primary = 0 WHERE owner_id = ?1",
                params![contact.owner_id.as_str()],
            )?;
        }
        tx.execute(
            "INSERT INTO contacts (id, owner_id, name, phone, relationship, is_primary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                contact.id.to_string(),
                contact.owner_id.as_str(),
                contact.name,
                contact.phone,
                contact.relationship,
                contact.is_primary,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_contact(&self, id: ContactId) -> Result<EmergencyContact> {
        self.conn()
            .query_row(
                "SELECT id, owner_id, name, phone, relationship, is_primary
                 FROM contacts WHERE id = ?1",
                params![id.to_string()],
                row_to_contact,
            )
            .map_err(not_found)
    }

    /// Contacts of one owner, primary first, then by name.
    pub fn list_contacts(&self, owner_id: &UserId) -> Result<Vec<EmergencyContact>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, owner_id, name, phone, relationship, is_primary
             FROM contacts
             WHERE owner_id = ?1
             ORDER BY is_primary DESC, name ASC",
        )?;

        let rows = stmt.query_map(params![owner_id.as_str()], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Make `id` the owner's only primary contact.
    pub fn set_primary_contact(&mut self, owner_id: &UserId, id: ContactId) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM contacts WHERE id = ?1 AND owner_id = ?2",
            params![id.to_string(), owner_id.as_str()],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::NotFound);
        }
        tx.execute(
            "UPDATE contacts SET is_primary = (id = ?1) WHERE owner_id = ?2",
            params![id.to_string(), owner_id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a contact of `owner_id`.  Returns `true` if a row was deleted.
    pub fn delete_contact(&self, owner_id: &UserId, id: ContactId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM contacts WHERE id = ?1 AND owner_id = ?2",
            params![id.to_string(), owner_id.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmergencyContact> {
    Ok(EmergencyContact {
        id: ContactId(col_uuid(row, 0)?),
        owner_id: UserId(row.get(1)?),
        name: row.get(2)?,
        phone: row.get(3)?,
        relationship: row.get(4)?,
        is_primary: row.get(5)?,
    })
}
