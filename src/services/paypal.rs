use log::warn;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::config::Config;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

pub struct PayPalService;

impl PayPalService {
    fn client() -> Client {
        Client::new()
    }

    fn client_id() -> Result<String, String> {
        Config::paypal_client_id()
            .ok_or_else(|| "PAYPAL_CLIENT_ID not configured".to_string())
    }

    fn client_secret() -> Result<String, String> {
        Config::paypal_client_secret()
            .ok_or_else(|| "PAYPAL_CLIENT_SECRET not configured".to_string())
    }

    /// OAuth2 client-credentials token. Fetched per call; PayPal tokens are
    /// valid for hours but caching one across requests is not worth the
    /// shared-state plumbing at this call volume.
    async fn access_token() -> Result<String, String> {
        if !Config::is_paypal_enabled() {
            return Err("PayPal is not enabled".to_string());
        }

        let res = Self::client()
            .post(format!("{}/v1/oauth2/token", Config::paypal_base_url()))
            .basic_auth(Self::client_id()?, Some(Self::client_secret()?))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| format!("PayPal token request failed: {}", e))?;

        if !res.status().is_success() {
            return Err(res.text().await.unwrap_or_else(|_| "PayPal auth error".to_string()));
        }

        let body: serde_json::Value = res
            .json()
            .await
            .map_err(|e| format!("PayPal token response unreadable: {}", e))?;

        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "PayPal token response missing access_token".to_string())
    }

    /// Create a one-time checkout order for a plan upgrade. `request_id` is
    /// sent as PayPal-Request-Id so a replayed create returns the original
    /// order instead of opening a second one.
    pub async fn create_order(
        amount: f64,
        currency: &str,
        reference: &str,
        request_id: &str,
    ) -> Result<serde_json::Value, String> {
        let token = Self::access_token().await?;

        let res = Self::client()
            .post(format!("{}/v2/checkout/orders", Config::paypal_base_url()))
            .bearer_auth(token)
            .header("PayPal-Request-Id", request_id)
            .json(&json!({
                "intent": "CAPTURE",
                "purchase_units": [{
                    "reference_id": reference,
                    "amount": {
                        "currency_code": currency,
                        "value": format!("{:.2}", amount)
                    }
                }]
            }))
            .send()
            .await
            .map_err(|e| format!("PayPal create order failed: {}", e))?;

        if !res.status().is_success() {
            return Err(res.text().await.unwrap_or_else(|_| "PayPal order error".to_string()));
        }

        res.json().await.map_err(|e| e.to_string())
    }

    /// Capture a user-approved order. Idempotent on the provider side via
    /// PayPal-Request-Id.
    pub async fn capture_order(
        order_id: &str,
        request_id: &str,
    ) -> Result<serde_json::Value, String> {
        let token = Self::access_token().await?;

        let res = Self::client()
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                Config::paypal_base_url(),
                order_id
            ))
            .bearer_auth(token)
            .header("PayPal-Request-Id", request_id)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| format!("PayPal capture failed: {}", e))?;

        if !res.status().is_success() {
            return Err(res.text().await.unwrap_or_else(|_| "PayPal capture error".to_string()));
        }

        res.json().await.map_err(|e| e.to_string())
    }

    /// Read-only order lookup for the verify endpoint.
    pub async fn get_order(order_id: &str) -> Result<serde_json::Value, String> {
        let token = Self::access_token().await?;

        let res = Self::client()
            .get(format!(
                "{}/v2/checkout/orders/{}",
                Config::paypal_base_url(),
                order_id
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| format!("PayPal get order failed: {}", e))?;

        if !res.status().is_success() {
            return Err(res.text().await.unwrap_or_else(|_| "PayPal order lookup error".to_string()));
        }

        res.json().await.map_err(|e| e.to_string())
    }

    /// Cancel a billing-agreement subscription. One canonical endpoint with
    /// bounded retries and exponential backoff for transport-level failures;
    /// 4xx answers are final and surface immediately.
    pub async fn cancel_billing_subscription(
        subscription_id: &str,
        reason: &str,
    ) -> Result<(), String> {
        let token = Self::access_token().await?;
        let url = format!(
            "{}/v1/billing/subscriptions/{}/cancel",
            Config::paypal_base_url(),
            subscription_id
        );

        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = BACKOFF_BASE_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let result = Self::client()
                .post(&url)
                .bearer_auth(&token)
                .json(&json!({ "reason": reason }))
                .send()
                .await;

            match result {
                Ok(res) if res.status().is_success() => return Ok(()),
                Ok(res) if res.status().is_client_error() => {
                    return Err(res
                        .text()
                        .await
                        .unwrap_or_else(|_| "PayPal cancel rejected".to_string()));
                }
                Ok(res) => {
                    last_error = format!("PayPal cancel returned {}", res.status());
                    warn!("{} (attempt {}/{})", last_error, attempt + 1, MAX_ATTEMPTS);
                }
                Err(e) => {
                    last_error = format!("PayPal cancel request failed: {}", e);
                    warn!("{} (attempt {}/{})", last_error, attempt + 1, MAX_ATTEMPTS);
                }
            }
        }

        Err(last_error)
    }
}

/// Approval link the client must redirect the payer to.
pub fn approve_url(order: &serde_json::Value) -> Option<String> {
    order["links"]
        .as_array()?
        .iter()
        .find(|link| link["rel"].as_str() == Some("approve"))
        .and_then(|link| link["href"].as_str())
        .map(str::to_string)
}

/// Top-level order status ("CREATED", "APPROVED", "COMPLETED", ...).
pub fn order_status(order: &serde_json::Value) -> &str {
    order["status"].as_str().unwrap_or("UNKNOWN")
}

/// Capture id of the first completed capture, if any.
pub fn capture_id(order: &serde_json::Value) -> Option<String> {
    order["purchase_units"][0]["payments"]["captures"][0]["id"]
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approve_url_picks_the_approve_rel() {
        let order = json!({
            "links": [
                { "rel": "self", "href": "https://api/orders/1" },
                { "rel": "approve", "href": "https://paypal/checkout/1" }
            ]
        });
        assert_eq!(approve_url(&order).as_deref(), Some("https://paypal/checkout/1"));
    }

    #[test]
    fn approve_url_missing_yields_none() {
        assert_eq!(approve_url(&json!({ "links": [] })), None);
        assert_eq!(approve_url(&json!({})), None);
    }

    #[test]
    fn order_status_defaults_to_unknown() {
        assert_eq!(order_status(&json!({ "status": "COMPLETED" })), "COMPLETED");
        assert_eq!(order_status(&json!({})), "UNKNOWN");
    }

    #[test]
    fn capture_id_digs_into_purchase_units() {
        let order = json!({
            "purchase_units": [{
                "payments": { "captures": [{ "id": "3C679366HH908993F" }] }
            }]
        });
        assert_eq!(capture_id(&order).as_deref(), Some("3C679366HH908993F"));
        assert_eq!(capture_id(&json!({})), None);
    }
}
