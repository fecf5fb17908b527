//! Durable per-user state (subscription flag + question counter).
//!
//! SQLite behind an r2d2 pool; every query runs on the blocking pool. A
//! process-local cache shadows reads, and every mutation updates the cached
//! entry in the same operation so a local write is never followed by a stale
//! read.

use std::{collections::HashMap, path::Path};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tokio::sync::Mutex;

use crate::{domain::UserId, errors::Error, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    subscribed INTEGER NOT NULL DEFAULT 0,
    questions_asked INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)";

/// One user row as the rest of the core sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub user_id: UserId,
    pub subscribed: bool,
    pub questions_asked: u32,
    pub created_at: String,
}

pub struct UserStore {
    pool: Pool<SqliteConnectionManager>,
    cache: Mutex<HashMap<UserId, User>>,
}

impl UserStore {
    pub fn open(path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| Error::Store(format!("cannot open user db: {e}")))?;

        let conn = pool
            .get()
            .map_err(|e| Error::Store(format!("cannot get db connection: {e}")))?;
        conn.execute(SCHEMA, [])
            .map_err(|e| Error::Store(format!("cannot create users table: {e}")))?;

        Ok(Self {
            pool,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Fetch the user, creating the row on first sight. Creation is a single
    /// atomic `INSERT OR IGNORE`, so two concurrent first-sight calls cannot
    /// produce duplicate rows; repeated calls return the same `created_at`.
    pub async fn get_or_create(&self, user_id: UserId) -> Result<User> {
        if let Some(user) = self.cache.lock().await.get(&user_id) {
            return Ok(user.clone());
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        let user = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2)",
                    params![user_id.0, created_at],
                )?;
                conn.query_row(
                    "SELECT user_id, subscribed, questions_asked, created_at
                     FROM users WHERE user_id = ?1",
                    params![user_id.0],
                    row_to_user,
                )
            })
            .await?;

        self.cache.lock().await.insert(user_id, user.clone());
        Ok(user)
    }

    pub async fn set_subscribed(&self, user_id: UserId, subscribed: bool) -> Result<()> {
        let changed = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE users SET subscribed = ?2 WHERE user_id = ?1",
                    params![user_id.0, subscribed as i64],
                )
            })
            .await?;
        if changed == 0 {
            return Err(Error::Store(format!("unknown user {}", user_id.0)));
        }

        let mut cache = self.cache.lock().await;
        if let Some(user) = cache.get_mut(&user_id) {
            user.subscribed = subscribed;
        }
        Ok(())
    }

    /// Increment the question counter and return the new value.
    pub async fn increment_question_count(&self, user_id: UserId) -> Result<u32> {
        let count = self
            .with_conn(move |conn| {
                conn.query_row(
                    "UPDATE users SET questions_asked = questions_asked + 1
                     WHERE user_id = ?1 RETURNING questions_asked",
                    params![user_id.0],
                    |row| row.get::<_, u32>(0),
                )
            })
            .await?;

        let mut cache = self.cache.lock().await;
        if let Some(user) = cache.get_mut(&user_id) {
            user.questions_asked = count;
        }
        Ok(count)
    }

    pub async fn question_count(&self, user_id: UserId) -> Result<u32> {
        if let Some(user) = self.cache.lock().await.get(&user_id) {
            return Ok(user.questions_asked);
        }
        Ok(self.get_or_create(user_id).await?.questions_asked)
    }

    /// `(total users, subscribed users)` — straight from the table.
    pub async fn stats(&self) -> Result<(u64, u64)> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(subscribed), 0) FROM users",
                [],
                |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
            )
        })
        .await
    }

    /// Trivial liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| Error::Store(format!("cannot get db connection: {e}")))?;
            f(&conn).map_err(|e| Error::Store(format!("db query failed: {e}")))
        })
        .await
        .map_err(|e| Error::Store(format!("db task failed: {e}")))?
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: UserId(row.get(0)?),
        subscribed: row.get::<_, i64>(1)? != 0,
        questions_asked: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{path::PathBuf, sync::Arc};

    fn tmp_db(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.db"))
    }

    fn open_store(prefix: &str) -> Arc<UserStore> {
        Arc::new(UserStore::open(&tmp_db(prefix)).unwrap())
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = open_store("ssb-store-idem");
        let a = store.get_or_create(UserId(42)).await.unwrap();
        let b = store.get_or_create(UserId(42)).await.unwrap();

        assert_eq!(a.created_at, b.created_at);
        assert!(!a.subscribed);
        assert_eq!(a.questions_asked, 0);

        let (total, subscribed) = store.stats().await.unwrap();
        assert_eq!((total, subscribed), (1, 0));
    }

    #[tokio::test]
    async fn concurrent_first_sight_creates_one_row() {
        let store = open_store("ssb-store-race");
        let (a, b) = tokio::join!(
            {
                let store = store.clone();
                async move { store.get_or_create(UserId(7)).await }
            },
            {
                let store = store.clone();
                async move { store.get_or_create(UserId(7)).await }
            }
        );
        assert_eq!(a.unwrap().created_at, b.unwrap().created_at);

        let (total, _) = store.stats().await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn mutations_update_cache_in_the_same_operation() {
        let store = open_store("ssb-store-cache");
        store.get_or_create(UserId(1)).await.unwrap();

        store.set_subscribed(UserId(1), true).await.unwrap();
        assert!(store.get_or_create(UserId(1)).await.unwrap().subscribed);

        assert_eq!(store.increment_question_count(UserId(1)).await.unwrap(), 1);
        assert_eq!(store.increment_question_count(UserId(1)).await.unwrap(), 2);
        assert_eq!(store.question_count(UserId(1)).await.unwrap(), 2);

        let (total, subscribed) = store.stats().await.unwrap();
        assert_eq!((total, subscribed), (1, 1));
    }

    #[tokio::test]
    async fn set_subscribed_for_unseen_user_is_a_store_error() {
        let store = open_store("ssb-store-unseen");
        let err = store.set_subscribed(UserId(99), true).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn ping_answers_on_open_store() {
        let store = open_store("ssb-store-ping");
        store.ping().await.unwrap();
    }
}
