//! SQLite-backed user directory.
//!
//! Provides persistent storage for:
//! - User identities (login, email, role, registration time)
//! - Per-user expiration metadata (flat key-value rows)
//! - Key-value store for plugin state such as the recurring schedule

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{data_dir, migrations, UserDirectory};
use crate::clock::{format_timestamp, parse_timestamp};
use crate::error::DatabaseError;
use crate::user::{MetaKey, NewUser, Role, ScanField, UserAccount};

/// SQLite database holding the user directory.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `~/.config/useraccess/useraccess.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("useraccess.db"))
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserAccount> {
        let id: i64 = row.get(0)?;
        let role: String = row.get(3)?;
        let registered: String = row.get(4)?;
        let registered_at = parse_timestamp(&registered).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("bad registered_at {registered:?} for user {id}").into(),
            )
        })?;
        Ok(UserAccount {
            id,
            login: row.get(1)?,
            email: row.get(2)?,
            role: Role::parse(&role).unwrap_or(Role::Subscriber),
            registered_at,
        })
    }

    fn query_users<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<UserAccount>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_user)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

const USER_COLUMNS: &str = "u.id, u.login, u.email, u.role, u.registered_at";

impl UserDirectory for Database {
    fn user(&self, id: i64) -> Result<Option<UserAccount>, DatabaseError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], Self::row_to_user)
            .optional()?)
    }

    fn user_by_login(&self, login: &str) -> Result<Option<UserAccount>, DatabaseError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.login = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![login], Self::row_to_user)
            .optional()?)
    }

    fn users(&self) -> Result<Vec<UserAccount>, DatabaseError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u ORDER BY u.registered_at, u.id");
        self.query_users(&sql, [])
    }

    fn insert_user(&self, user: &NewUser) -> Result<UserAccount, DatabaseError> {
        self.conn.execute(
            "INSERT INTO users (login, email, role, registered_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.login,
                user.email,
                user.role.as_str(),
                format_timestamp(user.registered_at),
            ],
        )?;
        Ok(UserAccount {
            id: self.conn.last_insert_rowid(),
            login: user.login.clone(),
            email: user.email.clone(),
            role: user.role,
            registered_at: user.registered_at,
        })
    }

    fn meta(&self, user_id: i64, key: MetaKey) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .conn
            .query_row(
                "SELECT meta_value FROM usermeta WHERE user_id = ?1 AND meta_key = ?2",
                params![user_id, key.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    fn set_meta(&self, user_id: i64, key: MetaKey, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO usermeta (user_id, meta_key, meta_value) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value",
            params![user_id, key.as_str(), value],
        )?;
        Ok(())
    }

    fn add_meta(&self, user_id: i64, key: MetaKey, value: &str) -> Result<bool, DatabaseError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO usermeta (user_id, meta_key, meta_value) VALUES (?1, ?2, ?3)",
            params![user_id, key.as_str(), value],
        )?;
        Ok(inserted > 0)
    }

    fn users_in_window(
        &self,
        field: ScanField,
        start: &str,
        end: &str,
        marker: MetaKey,
    ) -> Result<Vec<UserAccount>, DatabaseError> {
        match field {
            ScanField::RegisteredAt => {
                let sql = format!(
                    "SELECT {USER_COLUMNS}
                     FROM users u
                     JOIN usermeta m ON m.user_id = u.id AND m.meta_key = ?3
                     WHERE u.registered_at BETWEEN ?1 AND ?2
                       AND CAST(m.meta_value AS INTEGER) < 1
                     ORDER BY u.registered_at ASC, u.id ASC"
                );
                self.query_users(&sql, params![start, end, marker.as_str()])
            }
            ScanField::Meta(key) => {
                let sql = format!(
                    "SELECT {USER_COLUMNS}
                     FROM users u
                     JOIN usermeta t ON t.user_id = u.id AND t.meta_key = ?1
                     JOIN usermeta m ON m.user_id = u.id AND m.meta_key = ?4
                     WHERE t.meta_value BETWEEN ?2 AND ?3
                       AND CAST(m.meta_value AS INTEGER) < 1
                     ORDER BY u.registered_at ASC, u.id ASC"
                );
                self.query_users(&sql, params![key.as_str(), start, end, marker.as_str()])
            }
        }
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?)
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn kv_delete(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::AccessFlag;

    fn add(db: &Database, login: &str, registered: &str) -> UserAccount {
        db.insert_user(&NewUser {
            login: login.into(),
            email: format!("{login}@example.com"),
            role: Role::Subscriber,
            registered_at: parse_timestamp(registered).unwrap(),
        })
        .unwrap()
    }

    #[test]
    fn insert_and_lookup() {
        let db = Database::open_memory().unwrap();
        let ana = add(&db, "ana", "2024-01-01 00:00:00");
        assert_eq!(db.user(ana.id).unwrap().unwrap(), ana);
        assert_eq!(db.user_by_login("ana").unwrap().unwrap().id, ana.id);
        assert!(db.user_by_login("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_login_is_a_conflict() {
        let db = Database::open_memory().unwrap();
        add(&db, "ana", "2024-01-01 00:00:00");
        let err = db
            .insert_user(&NewUser {
                login: "ana".into(),
                email: "other@example.com".into(),
                role: Role::Subscriber,
                registered_at: parse_timestamp("2024-01-02 00:00:00").unwrap(),
            })
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[test]
    fn add_meta_never_overwrites() {
        let db = Database::open_memory().unwrap();
        let ana = add(&db, "ana", "2024-01-01 00:00:00");
        assert!(db.add_meta(ana.id, MetaKey::AccessExpired, "true").unwrap());
        assert!(!db.add_meta(ana.id, MetaKey::AccessExpired, "false").unwrap());
        assert_eq!(
            db.meta(ana.id, MetaKey::AccessExpired).unwrap().as_deref(),
            Some("true")
        );

        db.set_meta(ana.id, MetaKey::AccessExpired, "false").unwrap();
        assert_eq!(
            db.access_record(ana.id).unwrap().access_flag,
            Some(AccessFlag::Allowed)
        );
    }

    #[test]
    fn corrupt_counter_is_reported() {
        let db = Database::open_memory().unwrap();
        let ana = add(&db, "ana", "2024-01-01 00:00:00");
        db.set_meta(ana.id, MetaKey::ExpireNotified, "lots").unwrap();
        let err = db.access_record(ana.id).unwrap_err();
        assert!(matches!(err, DatabaseError::CorruptValue { .. }));
    }

    #[test]
    fn window_query_orders_by_registration_then_id() {
        let db = Database::open_memory().unwrap();
        let late = add(&db, "late", "2024-01-03 00:00:00");
        let early_b = add(&db, "early_b", "2024-01-01 00:00:00");
        let early_a = add(&db, "early_a", "2024-01-01 00:00:00");
        for u in [&late, &early_b, &early_a] {
            db.set_meta(u.id, MetaKey::ExpireDate, "2024-01-29 00:00:00").unwrap();
            db.set_meta(u.id, MetaKey::ExpireNotified, "0").unwrap();
        }

        let found = db
            .users_in_window(
                ScanField::Meta(MetaKey::ExpireDate),
                "2024-01-27 00:00:00",
                "2024-02-01 00:00:00",
                MetaKey::ExpireNotified,
            )
            .unwrap();
        let ids: Vec<i64> = found.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![early_b.id, early_a.id, late.id]);
    }

    #[test]
    fn window_query_skips_marked_and_out_of_range() {
        let db = Database::open_memory().unwrap();
        let marked = add(&db, "marked", "2024-01-01 00:00:00");
        let outside = add(&db, "outside", "2024-01-01 00:00:00");
        let edge = add(&db, "edge", "2024-01-01 00:00:00");
        db.set_meta(marked.id, MetaKey::ExpireDate, "2024-01-28 00:00:00").unwrap();
        db.set_meta(marked.id, MetaKey::ExpireNotified, "1").unwrap();
        db.set_meta(outside.id, MetaKey::ExpireDate, "2024-03-01 00:00:00").unwrap();
        db.set_meta(outside.id, MetaKey::ExpireNotified, "0").unwrap();
        db.set_meta(edge.id, MetaKey::ExpireDate, "2024-02-01 00:00:00").unwrap();
        db.set_meta(edge.id, MetaKey::ExpireNotified, "0").unwrap();

        let found = db
            .users_in_window(
                ScanField::Meta(MetaKey::ExpireDate),
                "2024-01-27 00:00:00",
                "2024-02-01 00:00:00",
                MetaKey::ExpireNotified,
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].login, "edge");
    }

    #[test]
    fn registration_window_reads_users_column() {
        let db = Database::open_memory().unwrap();
        let ana = add(&db, "ana", "2024-01-10 08:00:00");
        db.set_meta(ana.id, MetaKey::RegisteredDate, "2023-06-01 00:00:00").unwrap();
        db.set_meta(ana.id, MetaKey::WelcomeNotified, "0").unwrap();

        let found = db
            .users_in_window(
                ScanField::RegisteredAt,
                "2024-01-09 00:00:00",
                "2024-01-13 00:00:00",
                MetaKey::WelcomeNotified,
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].login, "ana");

        let stale = db
            .users_in_window(
                ScanField::RegisteredAt,
                "2023-05-31 00:00:00",
                "2023-06-02 00:00:00",
                MetaKey::WelcomeNotified,
            )
            .unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
        db.kv_delete("test").unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
    }
}
