use log::{debug, warn};
use rocket::http::Status;
use rocket::request::{self, FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::State;
use mongodb::bson::{doc, DateTime};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use rocket_okapi::r#gen::OpenApiGenerator;

use crate::config::Config;
use crate::db::DbConn;
use crate::events::{EventHub, SubscriptionEvent};
use crate::models::{Payment, PaymentStatus, PlanTier, Subscription};
use crate::utils::{ApiError, ApiResponse};

/// Hex HMAC-SHA256 signature from the webhook transmission header.
pub struct WebhookSignature(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for WebhookSignature {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.headers().get_one("Paypal-Transmission-Sig") {
            Some(sig) => Outcome::Success(WebhookSignature(sig.to_string())),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for WebhookSignature {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

/// Rows the provider's completion event may still claim. The synchronous
/// capture route marks a non-COMPLETED capture `failed`, but the provider
/// can settle that same capture later and confirm it here, so `failed` is
/// reclaimable. Only `completed` is terminal.
fn reconcile_filter(order_id: &str) -> mongodb::bson::Document {
    doc! {
        "order_id": order_id,
        "status": { "$in": ["pending", "failed"] }
    }
}

pub fn verify_signature(secret: &str, body: &str, signature: &str) -> bool {
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    expected == signature
}

/// Asynchronous provider notifications. This path writes to the same
/// `payments` and `subscriptions` collections as the synchronous capture
/// route, so the two can never disagree about plan state.
#[post("/webhooks/paypal", data = "<body>")]
pub async fn paypal_webhook(
    db: &State<DbConn>,
    hub: &State<EventHub>,
    sig: WebhookSignature,
    body: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let secret = Config::paypal_webhook_secret()
        .ok_or_else(|| ApiError::internal_error("Webhook secret not configured"))?;

    if !verify_signature(&secret, &body, &sig.0) {
        return Err(ApiError::unauthorized("Invalid webhook signature"));
    }

    let event: serde_json::Value = serde_json::from_str(&body)
        .map_err(|_| ApiError::bad_request("Malformed webhook body"))?;

    let event_type = event["event_type"].as_str().unwrap_or("");

    match event_type {
        "PAYMENT.CAPTURE.COMPLETED" | "PAYMENT.SALE.COMPLETED" => {
            handle_capture_completed(db, hub, &event).await?;
        }
        "BILLING.SUBSCRIPTION.ACTIVATED" => {
            handle_subscription_activated(db, &event).await?;
        }
        "BILLING.SUBSCRIPTION.CANCELLED" => {
            handle_subscription_cancelled(db, hub, &event).await?;
        }
        other => {
            // Acknowledged so the provider stops redelivering.
            debug!("Ignoring webhook event type {:?}", other);
        }
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "received": true
    }))))
}

/// Reconciliation for captures the synchronous path missed (client closed
/// the tab between approval and capture confirmation).
async fn handle_capture_completed(
    db: &DbConn,
    hub: &EventHub,
    event: &serde_json::Value,
) -> Result<(), ApiError> {
    let order_id = event["resource"]["supplementary_data"]["related_ids"]["order_id"]
        .as_str()
        .or_else(|| event["resource"]["id"].as_str())
        .ok_or_else(|| ApiError::bad_request("Webhook missing order id"))?;

    let payments = db.collection::<Payment>("payments");

    let payment = match payments
        .find_one(doc! { "order_id": order_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
    {
        Some(payment) => payment,
        None => {
            warn!("Webhook for unknown order {}", order_id);
            return Ok(());
        }
    };

    if payment.status == PaymentStatus::Completed {
        return Ok(());
    }

    let claimed = payments
        .update_one(
            reconcile_filter(order_id),
            doc! { "$set": {
                "status": "completed",
                "capture_id": event["resource"]["id"].as_str()
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if claimed.modified_count == 0 {
        return Ok(());
    }

    db.collection::<Subscription>("subscriptions")
        .update_one(
            doc! { "user_id": payment.user_id },
            doc! { "$set": {
                "plan": payment.plan.as_str(),
                "plans_limit": payment.plan.plans_limit(),
                "status": "active",
                "updated_at": DateTime::now()
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    hub.publish(SubscriptionEvent::changed(payment.user_id.to_hex(), payment.plan));
    Ok(())
}

/// Hosted-button flows create the billing agreement on the provider side;
/// `custom_id` carries our user id so the agreement can be tied back to the
/// subscription row (and cancelled from here later).
async fn handle_subscription_activated(
    db: &DbConn,
    event: &serde_json::Value,
) -> Result<(), ApiError> {
    let paypal_id = event["resource"]["id"]
        .as_str()
        .ok_or_else(|| ApiError::bad_request("Webhook missing subscription id"))?;

    let user_id = event["resource"]["custom_id"]
        .as_str()
        .and_then(|id| mongodb::bson::oid::ObjectId::parse_str(id).ok())
        .ok_or_else(|| ApiError::bad_request("Webhook missing custom_id"))?;

    let result = db
        .collection::<Subscription>("subscriptions")
        .update_one(
            doc! { "user_id": user_id },
            doc! { "$set": {
                "paypal_subscription_id": paypal_id,
                "updated_at": DateTime::now()
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if result.matched_count == 0 {
        warn!("Activation webhook for unknown user {}", user_id);
    }

    Ok(())
}

async fn handle_subscription_cancelled(
    db: &DbConn,
    hub: &EventHub,
    event: &serde_json::Value,
) -> Result<(), ApiError> {
    let paypal_id = event["resource"]["id"]
        .as_str()
        .ok_or_else(|| ApiError::bad_request("Webhook missing subscription id"))?;

    let subscriptions = db.collection::<Subscription>("subscriptions");

    let sub = match subscriptions
        .find_one(doc! { "paypal_subscription_id": paypal_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
    {
        Some(sub) => sub,
        None => {
            warn!("Cancellation webhook for unknown subscription {}", paypal_id);
            return Ok(());
        }
    };

    subscriptions
        .update_one(
            doc! { "paypal_subscription_id": paypal_id },
            doc! {
                "$set": {
                    "plan": PlanTier::Basic.as_str(),
                    "plans_limit": PlanTier::Basic.plans_limit(),
                    "status": "cancelled",
                    "updated_at": DateTime::now()
                },
                "$unset": { "paypal_subscription_id": "" }
            },
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    hub.publish(SubscriptionEvent::changed(sub.user_id.to_hex(), PlanTier::Basic));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip_verifies() {
        let body = r#"{"event_type":"PAYMENT.CAPTURE.COMPLETED"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec_test").unwrap();
        mac.update(body.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature("whsec_test", body, &sig));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec_test").unwrap();
        mac.update(b"original");
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(!verify_signature("whsec_test", "tampered", &sig));
        assert!(!verify_signature("wrong-secret", "original", &sig));
        assert!(!verify_signature("whsec_test", "original", "deadbeef"));
    }

    #[test]
    fn reconciliation_claims_pending_and_failed_rows() {
        let filter = reconcile_filter("ORDER-7");
        assert_eq!(filter.get_str("order_id").unwrap(), "ORDER-7");

        let statuses: Vec<&str> = filter
            .get_document("status")
            .unwrap()
            .get_array("$in")
            .unwrap()
            .iter()
            .filter_map(|s| s.as_str())
            .collect();

        // A capture the synchronous path gave up on can still settle on the
        // provider side; a confirmed one must never be reopened.
        assert!(statuses.contains(&"pending"));
        assert!(statuses.contains(&"failed"));
        assert!(!statuses.contains(&"completed"));
    }
}
