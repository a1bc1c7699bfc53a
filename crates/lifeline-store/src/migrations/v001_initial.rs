//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `presence`, `contacts`, `emergencies`, `chats`,
//! `chat_participants`, `messages` and `helper_alerts`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Presence (last reported state of each user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS presence (
    user_id       TEXT PRIMARY KEY NOT NULL,
    display_name  TEXT NOT NULL,
    phone         TEXT,
    email         TEXT,
    latitude      REAL,
    longitude     REAL,
    accuracy_m    REAL,
    located_at    TEXT,                     -- RFC-3339
    is_online     INTEGER NOT NULL DEFAULT 0,
    last_active   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Emergency contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    owner_id      TEXT NOT NULL,
    name          TEXT NOT NULL,
    phone         TEXT NOT NULL,
    relationship  TEXT,
    is_primary    INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_contacts_owner ON contacts(owner_id);

-- ----------------------------------------------------------------
-- Emergencies (never deleted: they are the alert history)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS emergencies (
    id               TEXT PRIMARY KEY NOT NULL,
    victim_id        TEXT NOT NULL,
    victim_name      TEXT NOT NULL,
    victim_contact   TEXT,
    latitude         REAL,
    longitude        REAL,
    accuracy_m       REAL,
    located_at       TEXT,
    location_quality TEXT NOT NULL,
    status           TEXT NOT NULL,          -- waiting | active | closed
    trigger_reason   TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    chat_id          TEXT
);

CREATE INDEX IF NOT EXISTS idx_emergencies_victim
    ON emergencies(victim_id, status, created_at DESC);

-- ----------------------------------------------------------------
-- Chats (one per emergency)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id            TEXT PRIMARY KEY NOT NULL,
    emergency_id  TEXT NOT NULL UNIQUE,
    is_active     INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    expires_at    TEXT NOT NULL,
    closure       TEXT,                      -- resolved | expired

    FOREIGN KEY (emergency_id) REFERENCES emergencies(id)
);

CREATE INDEX IF NOT EXISTS idx_chats_expiry ON chats(is_active, expires_at);

-- Membership is a set: the primary key makes inserts a union.
CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id    TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    added_at   TEXT NOT NULL,
    joined_at  TEXT,                         -- NULL while only pre-authorized

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id)
);

-- ----------------------------------------------------------------
-- Messages (append-only; rowid is the sequence number)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL UNIQUE,
    chat_id      TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    sender_name  TEXT NOT NULL,
    text         TEXT NOT NULL,
    kind         TEXT NOT NULL,              -- text | location | system
    latitude     REAL,
    longitude    REAL,
    accuracy_m   REAL,
    located_at   TEXT,
    sent_at      TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, sent_at, seq);

-- ----------------------------------------------------------------
-- Helper alerts (one per helper and emergency)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS helper_alerts (
    id               TEXT PRIMARY KEY NOT NULL,
    helper_id        TEXT NOT NULL,
    emergency_id     TEXT NOT NULL,
    chat_id          TEXT NOT NULL,
    distance_km      REAL NOT NULL,
    delivery_status  TEXT NOT NULL,          -- pending | delivered
    created_at       TEXT NOT NULL,

    UNIQUE (helper_id, emergency_id),
    FOREIGN KEY (emergency_id) REFERENCES emergencies(id)
);

CREATE INDEX IF NOT EXISTS idx_alerts_helper ON helper_alerts(helper_id, delivery_status);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
