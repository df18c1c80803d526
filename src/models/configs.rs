use serde::{Deserialize, Serialize};

/// Key/value threshold table. Values are re-read at the start of every
/// distribution pass, never cached across runs.
#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct ConfigEntry {
    pub id: i64,
    pub key_name: String,
    pub name: String,
    pub value: String,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

pub const KEY_SECOND_TRACK_ONE: &str = "vip_three_one";
pub const KEY_SECOND_TRACK_TWO: &str = "vip_three_two";
pub const KEY_SECOND_TRACK_THREE: &str = "vip_three_three";
