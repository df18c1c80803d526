use serde::{Deserialize, Serialize};

/// Audit row appended for every inbound issuer callback.
pub const RECORD_HOLDER_NOTIFY: i16 = 1;
pub const RECORD_CARD_CREATED: i16 = 2;
pub const RECORD_RECHARGE: i16 = 3;

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct CardRecord {
    pub id: i64,
    pub user_id: i64,
    pub record_type: i16,
    pub remark: String,
    pub code: String,
    pub opt: String,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderCallback {
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default, rename = "holderId")]
    pub holder_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub remark: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardCreatedCallback {
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default, rename = "cardId")]
    pub card_id: String,
    #[serde(default)]
    pub card_number: String,
    #[serde(default)]
    pub remark: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeCallback {
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default, rename = "cardId")]
    pub card_id: String,
    #[serde(default)]
    pub card_number: String,
    #[serde(default)]
    pub remark: String,
}
