use std::collections::HashMap;

use sqlx::PgPool;

use crate::models::configs::ConfigEntry;

#[derive(Clone)]
pub struct ConfigRepository {
    conn: PgPool,
}

impl ConfigRepository {
    pub fn new(conn: PgPool) -> Self {
        ConfigRepository { conn }
    }

    /// Fetches the requested threshold keys. Callers re-read at the start of
    /// every pass; nothing is cached here.
    pub async fn values(&self, keys: &[&str]) -> Result<HashMap<String, String>, anyhow::Error> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let rows = sqlx::query_as::<_, ConfigEntry>(
            "SELECT * FROM configs WHERE key_name = ANY($1)",
        )
        .bind(&keys)
        .fetch_all(&self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|entry| (entry.key_name, entry.value))
            .collect())
    }

    /// Missing or unparseable values fall back to zero; the walk planners
    /// treat a zero cap as "nothing to pay".
    pub fn cents_value(values: &HashMap<String, String>, key: &str) -> i64 {
        values
            .get(key)
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|v| *v >= 0)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_value_defaults_to_zero() {
        let mut values = HashMap::new();
        values.insert("vip_three_one".to_string(), "2500".to_string());
        values.insert("vip_three_two".to_string(), "junk".to_string());
        values.insert("vip_three_three".to_string(), "-5".to_string());

        assert_eq!(ConfigRepository::cents_value(&values, "vip_three_one"), 2500);
        assert_eq!(ConfigRepository::cents_value(&values, "vip_three_two"), 0);
        assert_eq!(ConfigRepository::cents_value(&values, "vip_three_three"), 0);
        assert_eq!(ConfigRepository::cents_value(&values, "missing"), 0);
    }
}
