use anyhow::Result;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Store Settings
    // ========================================================================

    /// Get a store setting by key.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM store_settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Record `value` for `key` unless a value is already stored.
    ///
    /// # Returns
    ///
    /// The value in effect after the call: `value` on first use, otherwise
    /// whatever was recorded earlier.
    pub async fn pin_setting(&self, key: &str, value: &str) -> Result<String> {
        sqlx::query("INSERT INTO store_settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        let (stored,): (String,) = sqlx::query_as("SELECT value FROM store_settings WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }
}
