use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// The persisted credential slot. There is exactly one, shared by the whole
/// process; a later login overwrites an earlier one.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub token: String,
    pub user_id: i64,
    pub username: String,
    pub profile_image: Option<String>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "foreign_keys", &"ON")
            .context("storage: enable foreign keys")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn save_session(&self, mut session: StoredSession) -> Result<()> {
        if session.token.is_empty() {
            bail!("storage: session token required");
        }
        if session.username.is_empty() {
            bail!("storage: session username required");
        }
        if session.saved_at.timestamp() == 0 {
            session.saved_at = Utc::now();
        }

        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO session (slot, token, user_id, username, profile_image, saved_at)
VALUES (0, ?1, ?2, ?3, ?4, ?5)
ON CONFLICT(slot) DO UPDATE SET
  token = excluded.token,
  user_id = excluded.user_id,
  username = excluded.username,
  profile_image = excluded.profile_image,
  saved_at = excluded.saved_at
"#,
            params![
                session.token,
                session.user_id,
                session.username,
                session.profile_image,
                session.saved_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<StoredSession>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT token, user_id, username, profile_image, saved_at
FROM session
WHERE slot = 0
"#,
            [],
            session_from_row,
        )
        .optional()
        .context("storage: query session slot")
    }

    pub fn clear_session(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM session WHERE slot = 0", [])?;
        Ok(())
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSession> {
    let saved: i64 = row.get(4)?;
    Ok(StoredSession {
        token: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        profile_image: row.get(3)?,
        saved_at: Utc
            .timestamp_opt(saved, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS session (
  slot INTEGER PRIMARY KEY CHECK (slot = 0),
  token TEXT NOT NULL,
  user_id INTEGER NOT NULL,
  username TEXT NOT NULL,
  profile_image TEXT,
  saved_at INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tubix").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_session() -> StoredSession {
        StoredSession {
            token: "tok-123".into(),
            user_id: 7,
            username: "mina".into(),
            profile_image: Some("http://cdn.example/p/mina.png".into()),
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn session_slot_roundtrip() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();

        assert!(store.load_session().unwrap().is_none());

        let session = sample_session();
        store.save_session(session.clone()).unwrap();
        let loaded = store.load_session().unwrap().unwrap();
        assert_eq!(loaded.token, session.token);
        assert_eq!(loaded.username, "mina");
        assert_eq!(loaded.profile_image, session.profile_image);

        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn later_login_overwrites_slot() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();

        store.save_session(sample_session()).unwrap();
        let mut second = sample_session();
        second.token = "tok-456".into();
        second.username = "june".into();
        second.user_id = 8;
        store.save_session(second).unwrap();

        let loaded = store.load_session().unwrap().unwrap();
        assert_eq!(loaded.token, "tok-456");
        assert_eq!(loaded.username, "june");
    }

    #[test]
    fn rejects_empty_token() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        let mut session = sample_session();
        session.token = String::new();
        assert!(store.save_session(session).is_err());
    }
}
