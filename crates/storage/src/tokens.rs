//! API token persistence. Only token hashes are stored; hashing and token
//! generation belong to the gateway's auth layer.

use crate::error::StorageError;
use crate::store::{from_micros, from_micros_opt, to_micros, SqliteStore};
use chrono::{DateTime, Utc};
use rusqlite::params;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredToken {
    pub token_hash: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl SqliteStore {
    pub async fn save_token(&self, token_hash: &str, user_id: &str) -> Result<(), StorageError> {
        let (token_hash, user_id) = (token_hash.to_string(), user_id.to_string());
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO api_tokens (token_hash, user_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(token_hash) DO NOTHING",
                params![token_hash, user_id, to_micros(Utc::now())],
            )?;
            if inserted == 0 {
                return Err(StorageError::Conflict("token hash".to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn list_tokens(&self) -> Result<Vec<StoredToken>, StorageError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT token_hash, user_id, created_at, last_used_at FROM api_tokens",
            )?;
            let mut rows = stmt.query([])?;
            let mut tokens = Vec::new();
            while let Some(row) = rows.next()? {
                tokens.push(StoredToken {
                    token_hash: row.get(0)?,
                    user_id: row.get(1)?,
                    created_at: from_micros(row.get(2)?)?,
                    last_used_at: from_micros_opt(row.get(3)?)?,
                });
            }
            Ok(tokens)
        })
        .await
    }

    pub async fn touch_token(&self, token_hash: &str) -> Result<(), StorageError> {
        let token_hash = token_hash.to_string();
        self.call(move |conn| {
            conn.execute(
                "UPDATE api_tokens SET last_used_at = ?1 WHERE token_hash = ?2",
                params![to_micros(Utc::now()), token_hash],
            )?;
            Ok(())
        })
        .await
    }

    /// Revoke every token a user holds
    pub async fn revoke_tokens(&self, user_id: &str) -> Result<u64, StorageError> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let removed = conn.execute("DELETE FROM api_tokens WHERE user_id = ?1", [&user_id])?;
            Ok(removed as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_token("abc123", "u1").await.unwrap();
        store.save_token("def456", "u1").await.unwrap();
        assert!(matches!(
            store.save_token("abc123", "u2").await,
            Err(StorageError::Conflict(_))
        ));

        store.touch_token("abc123").await.unwrap();
        let tokens = store.list_tokens().await.unwrap();
        assert_eq!(tokens.len(), 2);
        let touched = tokens.iter().find(|t| t.token_hash == "abc123").unwrap();
        assert!(touched.last_used_at.is_some());

        assert_eq!(store.revoke_tokens("u1").await.unwrap(), 2);
        assert!(store.list_tokens().await.unwrap().is_empty());
    }
}
