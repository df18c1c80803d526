use std::time::Duration;

use anyhow::bail;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::issuer::{
    CardInfoResponse, CardProductListResponse, CreateCardResponse, CreateHolderResponse,
    QueryHolderResponse,
};
use crate::models::users::CardRequest;
use crate::settings;

/// Spend rule attached to every card order. Fixed by the issuer contract.
const DAILY_LIMIT_CENTS: i64 = 250_000;
const MONTHLY_LIMIT_CENTS: i64 = 1_000_000;

/// Signs a request body: drop `sign`, sort the remaining keys, concatenate
/// `secret + key + value` pairs (scalars as display strings, nested values
/// JSON-encoded) and hex-encode the SHA-256 digest.
pub fn sign_params(params: &Map<String, Value>, sign_key: &str) -> String {
    let mut keys: Vec<&String> = params.keys().filter(|k| k.as_str() != "sign").collect();
    keys.sort();

    let mut buf = String::from(sign_key);
    for key in keys {
        buf.push_str(key);
        match &params[key.as_str()] {
            Value::String(s) => buf.push_str(s),
            Value::Number(n) => buf.push_str(&n.to_string()),
            Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
            Value::Null => {}
            nested => buf.push_str(&nested.to_string()),
        }
    }

    let digest = Sha256::digest(buf.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct IssuerApi {
    base_url: String,
    merchant_id: String,
    sign_key: String,
    client: reqwest::Client,
}

impl IssuerApi {
    pub fn new(settings: &settings::Issuer) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(IssuerApi {
            base_url: settings.url.trim_end_matches('/').to_string(),
            merchant_id: settings.merchant_id.clone(),
            sign_key: settings.sign_key.clone(),
            client,
        })
    }

    fn signed_body(&self, mut body: Map<String, Value>) -> Map<String, Value> {
        body.insert("merchantId".to_string(), json!(self.merchant_id));
        let sign = sign_params(&body, &self.sign_key);
        body.insert("sign".to_string(), json!(sign));
        body
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Map<String, Value>,
    ) -> Result<T, anyhow::Error> {
        let body = self.signed_body(body);
        let nonce = Uuid::new_v4().hyphenated().to_string();

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Language", "zh_CN")
            .header("X-Nonce", nonce)
            .json(&Value::Object(body))
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("issuer returned http {} for {}", response.status(), path);
        }

        Ok(response.json::<T>().await?)
    }

    pub async fn create_holder(
        &self,
        product_id: i64,
        request: &CardRequest,
    ) -> Result<CreateHolderResponse, anyhow::Error> {
        let mut body = Map::new();
        body.insert("productId".to_string(), json!(product_id));
        body.insert("email".to_string(), json!(request.email));
        body.insert("firstName".to_string(), json!(request.first_name));
        body.insert("lastName".to_string(), json!(request.last_name));
        body.insert("birthDate".to_string(), json!(request.birth_date));
        body.insert("countryCode".to_string(), json!(request.country_code));
        body.insert("phoneNumber".to_string(), json!(request.phone));
        body.insert(
            "deliveryAddress".to_string(),
            json!({
                "city": request.city,
                "country": request.country,
                "street": request.street,
                "postalCode": request.postal_code,
            }),
        );

        self.post("/cards/holders/create", body).await
    }

    pub async fn query_holder(
        &self,
        holder_id: i64,
        product_id: i64,
    ) -> Result<QueryHolderResponse, anyhow::Error> {
        let mut body = Map::new();
        body.insert("holderId".to_string(), json!(holder_id));
        body.insert("productId".to_string(), json!(product_id));

        self.post("/cards/holders/query", body).await
    }

    pub async fn create_card(
        &self,
        card_amount_cents: i64,
        holder_id: i64,
        product_id: i64,
    ) -> Result<CreateCardResponse, anyhow::Error> {
        let mut body = Map::new();
        body.insert("cardCurrency".to_string(), json!("USD"));
        body.insert("cardAmount".to_string(), json!(card_amount_cents));
        body.insert("cardholderId".to_string(), json!(holder_id));
        body.insert("cardProductId".to_string(), json!(product_id));
        body.insert(
            "cardSpendRule".to_string(),
            json!({
                "dailyLimit": DAILY_LIMIT_CENTS,
                "monthlyLimit": MONTHLY_LIMIT_CENTS,
            }),
        );
        body.insert(
            "cardRiskControl".to_string(),
            json!({
                "allowedMerchants": ["ONLINE"],
                "blockedCountries": [],
            }),
        );

        self.post("/cards/create", body).await
    }

    pub async fn card_info(&self, card_id: &str) -> Result<CardInfoResponse, anyhow::Error> {
        let mut body = Map::new();
        body.insert("cardId".to_string(), json!(card_id));

        self.post("/cards/info", body).await
    }

    /// Product listing goes over GET with the signature in the query string.
    pub async fn products(&self) -> Result<CardProductListResponse, anyhow::Error> {
        let mut params = Map::new();
        params.insert("merchantId".to_string(), json!(self.merchant_id));
        let sign = sign_params(&params, &self.sign_key);

        let response = self
            .client
            .get(format!("{}/cards/products/all", self.base_url))
            .header("Content-Language", "zh_CN")
            .query(&[("merchantId", self.merchant_id.as_str()), ("sign", sign.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("issuer returned http {} for product listing", response.status());
        }

        Ok(response.json::<CardProductListResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("cardholderId".to_string(), json!(42));
        body.insert("cardCurrency".to_string(), json!("USD"));
        body.insert("cardSpendRule".to_string(), json!({"dailyLimit": 100}));
        body
    }

    #[test]
    fn signature_is_deterministic_and_order_independent() {
        let a = sign_params(&body(), "secret");

        // Same fields inserted in a different order.
        let mut reordered = Map::new();
        reordered.insert("cardSpendRule".to_string(), json!({"dailyLimit": 100}));
        reordered.insert("cardCurrency".to_string(), json!("USD"));
        reordered.insert("cardholderId".to_string(), json!(42));
        let b = sign_params(&reordered, "secret");

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sign_field_is_excluded_from_signing() {
        let unsigned = sign_params(&body(), "secret");

        let mut with_sign = body();
        with_sign.insert("sign".to_string(), json!("bogus"));
        assert_eq!(sign_params(&with_sign, "secret"), unsigned);
    }

    #[test]
    fn signature_covers_secret_and_values() {
        let base = sign_params(&body(), "secret");
        assert_ne!(sign_params(&body(), "other-secret"), base);

        let mut changed = body();
        changed.insert("cardholderId".to_string(), json!(43));
        assert_ne!(sign_params(&changed, "secret"), base);

        let mut nested_changed = body();
        nested_changed.insert("cardSpendRule".to_string(), json!({"dailyLimit": 101}));
        assert_ne!(sign_params(&nested_changed, "secret"), base);
    }
}
