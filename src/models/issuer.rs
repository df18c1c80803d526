use serde::{Deserialize, Serialize};

/// Fixed wire shapes of the card issuer API. Every response carries a numeric
/// `code` (200 = success) and a nested `data` payload; anything else is a
/// hard failure for that call.
pub const ISSUER_OK: i64 = 200;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHolderData {
    #[serde(default, rename = "holderId")]
    pub holder_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateHolderResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<CreateHolderData>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderData {
    #[serde(default, rename = "holderId")]
    pub holder_id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct QueryHolderResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<HolderData>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCardData {
    #[serde(default, rename = "cardId")]
    pub card_id: String,
    #[serde(default, rename = "cardOrderId")]
    pub card_order_id: String,
    #[serde(default)]
    pub card_status: String,
    #[serde(default)]
    pub order_status: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateCardResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<CreateCardData>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInfoData {
    #[serde(default, rename = "cardId")]
    pub card_id: String,
    #[serde(default)]
    pub pan: String,
    #[serde(default)]
    pub card_status: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CardInfoResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<CardInfoData>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardProduct {
    #[serde(default, rename = "productId")]
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub max_card_quota: i64,
    #[serde(default)]
    pub product_status: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CardProductListResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub rows: Vec<CardProduct>,
}

/// Orchestrator decision for an issuer-side entity status: proceed, wait for
/// the next pass, or roll the user back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusDecision {
    Proceed,
    Wait,
    Fail,
}

/// Holder statuses are lowercase on the wire.
pub fn holder_status_decision(status: &str) -> StatusDecision {
    match status {
        "active" => StatusDecision::Proceed,
        "pending" => StatusDecision::Wait,
        _ => StatusDecision::Fail,
    }
}

/// Card statuses are uppercase on the wire; `PROGRESS` is a second
/// in-flight state equivalent to pending.
pub fn card_status_decision(status: &str) -> StatusDecision {
    match status {
        "ACTIVE" => StatusDecision::Proceed,
        "PENDING" | "PROGRESS" => StatusDecision::Wait,
        _ => StatusDecision::Fail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_statuses_map_to_decisions() {
        assert_eq!(holder_status_decision("active"), StatusDecision::Proceed);
        assert_eq!(holder_status_decision("pending"), StatusDecision::Wait);
        assert_eq!(holder_status_decision("rejected"), StatusDecision::Fail);
        // Case matters on the wire; an uppercase holder status is unknown.
        assert_eq!(holder_status_decision("ACTIVE"), StatusDecision::Fail);
        assert_eq!(holder_status_decision(""), StatusDecision::Fail);
    }

    #[test]
    fn card_statuses_map_to_decisions() {
        assert_eq!(card_status_decision("ACTIVE"), StatusDecision::Proceed);
        assert_eq!(card_status_decision("PENDING"), StatusDecision::Wait);
        assert_eq!(card_status_decision("PROGRESS"), StatusDecision::Wait);
        assert_eq!(card_status_decision("FROZEN"), StatusDecision::Fail);
        assert_eq!(card_status_decision("active"), StatusDecision::Fail);
    }

    #[test]
    fn responses_tolerate_missing_data_fields() {
        let raw = r#"{"code":500,"msg":"internal error"}"#;
        let resp: CreateCardResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.code, 500);
        assert!(resp.data.is_none());

        let raw = r#"{"code":200,"data":{"cardId":"c-1","cardOrderId":"o-1"}}"#;
        let resp: CreateCardResponse = serde_json::from_str(raw).unwrap();
        let data = resp.data.unwrap();
        assert_eq!(data.card_id, "c-1");
        assert_eq!(data.card_order_id, "o-1");
        assert!(data.card_status.is_empty());
    }
}
