//! Per-user assistant selection.
//!
//! Remembers which assistant each user is currently talking to, across
//! restarts. Messages arriving with no selection prompt the user to pick.

use crate::error::Result;
use crate::store::Store;
use rusqlite::params;

pub struct SelectionStore {
    store: Store,
}

impl SelectionStore {
    /// Create the store, preparing its table.
    pub fn new(store: Store) -> anyhow::Result<Self> {
        let conn = store.connect()?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS user_state (
                user_id      INTEGER PRIMARY KEY,
                assistant_id TEXT
            );
            ",
        )?;

        Ok(Self { store })
    }

    /// The user's current assistant, if one was ever picked.
    pub async fn selected(&self, user_id: i64) -> Result<Option<String>> {
        self.store
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT assistant_id FROM user_state WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get::<_, Option<String>>(0),
                );
                match result {
                    Ok(assistant_id) => Ok(assistant_id),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Point the user at `assistant_id`, replacing any previous pick.
    pub async fn select(&self, user_id: i64, assistant_id: &str) -> Result<()> {
        let assistant_id = assistant_id.to_string();
        self.store
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO user_state (user_id, assistant_id)
                    VALUES (?1, ?2)
                    ON CONFLICT(user_id) DO UPDATE SET assistant_id = ?2
                    ",
                    params![user_id, assistant_id],
                )?;
                Ok(())
            })
            .await
    }
}
