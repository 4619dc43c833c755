//! Once-only secret-salt bootstrap.
//!
//! Every key computation depends on a stable process-wide secret. It is
//! generated lazily on first use and persisted in the settings table; the
//! table's primary key arbitrates concurrent first-time initialization so
//! exactly one generated value wins.

use super::connection::CacheDb;
use crate::Error;
use rand::{RngExt, distr::Alphanumeric};
use tokio_rusqlite::params;

/// Length of a generated salt.
const SALT_LEN: usize = 10;

const SALT_SETTING: &str = "secret_salt";

fn generate_salt() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect()
}

impl CacheDb {
    /// Return the persisted secret salt, generating and storing one if absent.
    ///
    /// Idempotent under concurrent first-time initialization: every caller
    /// offers a candidate via `INSERT OR IGNORE` and then reads back
    /// whichever value actually landed.
    pub async fn ensure_salt(&self) -> Result<String, Error> {
        let candidate = generate_salt();
        self.conn
            .call(move |conn| -> Result<String, Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO settings (name, value) VALUES (?1, ?2)",
                    params![SALT_SETTING, candidate],
                )?;
                let salt: String = conn.query_row(
                    "SELECT value FROM settings WHERE name = ?1",
                    params![SALT_SETTING],
                    |row| row.get(0),
                )?;
                Ok(salt)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_salt_shape() {
        let salt = generate_salt();
        assert_eq!(salt.len(), SALT_LEN);
        assert!(salt.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_ensure_salt_stable() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let first = db.ensure_salt().await.unwrap();
        let second = db.ensure_salt().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), SALT_LEN);
    }

    #[tokio::test]
    async fn test_ensure_salt_single_winner() {
        let db = CacheDb::open_in_memory().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move { db.ensure_salt().await.unwrap() }));
        }

        let mut salts = Vec::new();
        for handle in handles {
            salts.push(handle.await.unwrap());
        }

        salts.dedup();
        assert_eq!(salts.len(), 1);
    }
}
