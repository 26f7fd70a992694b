use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::tokio::select;
use rocket::{Shutdown, State};
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime, oid::ObjectId};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::db::DbConn;
use crate::events::{EventHub, SubscriptionEvent};
use crate::guards::AuthGuard;
use crate::models::{
    next_reset_from, Payment, PaymentStatus, PlanTier, Subscription, SubscriptionView, User,
};
use crate::services::{paypal, EmailService, PayPalService};
use crate::utils::{generate_reference, ApiError, ApiResponse};

/// Fetch the caller's subscription row, creating it on first read and
/// applying the lazy monthly reset. The reset is one conditional update
/// (`next_reset < now`), so a crash between read and write just means the
/// next read performs it instead.
pub(crate) async fn current_subscription(
    db: &DbConn,
    user_id: ObjectId,
) -> Result<Subscription, ApiError> {
    let collection = db.collection::<Subscription>("subscriptions");
    let now = DateTime::now();

    collection
        .update_one(
            doc! { "user_id": user_id, "next_reset": { "$lt": now } },
            doc! { "$set": {
                "plans_generated": 0,
                "next_reset": next_reset_from(now),
                "updated_at": now
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if let Some(sub) = collection
        .find_one(doc! { "user_id": user_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
    {
        return Ok(sub);
    }

    // First read for this account. A concurrent insert loses against the
    // unique user_id index; fall back to re-reading the winner's row.
    let fresh = Subscription::new(user_id);
    match collection.insert_one(&fresh, None).await {
        Ok(res) => {
            let mut sub = fresh;
            sub.id = res.inserted_id.as_object_id();
            Ok(sub)
        }
        Err(_) => collection
            .find_one(doc! { "user_id": user_id }, None)
            .await
            .map_err(|e| ApiError::internal_error(e.to_string()))?
            .ok_or_else(|| ApiError::internal_error("Subscription upsert race lost twice")),
    }
}

#[openapi(tag = "Subscription")]
#[get("/subscription")]
pub async fn get_subscription(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<SubscriptionView>>, ApiError> {
    let sub = current_subscription(db, auth.user_id).await?;
    Ok(Json(ApiResponse::success(SubscriptionView::from(sub))))
}

// ============================================================================
// CHECKOUT
// ============================================================================

#[derive(serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct CreateOrderDto {
    pub plan: String,
}

#[openapi(tag = "Subscription")]
#[post("/subscription/orders", data = "<dto>")]
pub async fn create_order(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<CreateOrderDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let plan = PlanTier::parse(&dto.plan)
        .ok_or_else(|| ApiError::bad_request("Invalid plan. Choose 'pro' or 'enterprise'"))?;

    if !plan.is_paid() {
        return Err(ApiError::bad_request("The basic plan does not require payment"));
    }

    let sub = current_subscription(db, auth.user_id).await?;
    if sub.plan == plan {
        return Err(ApiError::bad_request("You are already on this plan"));
    }

    let reference = generate_reference();
    let request_id = Uuid::new_v4().to_string();
    let amount = plan.monthly_price();

    let order = PayPalService::create_order(amount, "USD", &reference, &request_id)
        .await
        .map_err(|e| ApiError::bad_gateway(format!("Failed to create payment order: {}", e)))?;

    let order_id = order["id"]
        .as_str()
        .ok_or_else(|| ApiError::bad_gateway("PayPal order response missing id"))?
        .to_string();

    // Plan and amount are recorded server-side now; capture never trusts
    // the client for either.
    let payment = Payment {
        id: None,
        order_id: order_id.clone(),
        user_id: auth.user_id,
        plan,
        amount,
        currency: "USD".to_string(),
        status: PaymentStatus::Pending,
        capture_id: None,
        reference: reference.clone(),
        created_at: DateTime::now(),
    };

    db.collection::<Payment>("payments")
        .insert_one(&payment, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to record order: {}", e)))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "order_id": order_id,
        "approve_url": paypal::approve_url(&order),
        "plan": plan,
        "amount": amount,
        "reference": reference
    }))))
}

#[derive(serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct CapturePaymentDto {
    pub order_id: String,
}

// The provider's own status string goes into the response body, so the
// client can tell a declined card from a capture still settling.
fn capture_rejection(provider_status: &str) -> ApiError {
    ApiError::bad_request(format!(
        "Payment not completed: provider status {}",
        provider_status
    ))
}

#[openapi(tag = "Subscription")]
#[post("/subscription/capture", data = "<dto>")]
pub async fn capture_payment(
    db: &State<DbConn>,
    hub: &State<EventHub>,
    auth: AuthGuard,
    dto: Json<CapturePaymentDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let payments = db.collection::<Payment>("payments");

    let payment = payments
        .find_one(doc! { "order_id": &dto.order_id, "user_id": auth.user_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("Order not found"))?;

    // Replayed confirmation: the first capture already upgraded the plan.
    if payment.status == PaymentStatus::Completed {
        return Ok(Json(ApiResponse::success_with_message(
            "Payment already processed".to_string(),
            serde_json::json!({
                "order_id": payment.order_id,
                "plan": payment.plan,
                "status": "COMPLETED"
            }),
        )));
    }

    if payment.status != PaymentStatus::Pending {
        return Err(ApiError::bad_request("Order is not capturable"));
    }

    // The order id doubles as the provider idempotency key, so a retried
    // capture of the same order cannot charge twice.
    let captured = PayPalService::capture_order(&dto.order_id, &dto.order_id)
        .await
        .map_err(|e| ApiError::bad_gateway(format!("Payment capture failed: {}", e)))?;

    let status = paypal::order_status(&captured);
    if status != "COMPLETED" {
        payments
            .update_one(
                doc! { "order_id": &dto.order_id, "status": "pending" },
                doc! { "$set": { "status": "failed" } },
                None,
            )
            .await
            .map_err(|e| ApiError::internal_error(e.to_string()))?;

        return Err(capture_rejection(status));
    }

    // Only one concurrent capture moves pending → completed; the losers
    // report already-processed instead of upgrading again.
    let claimed = payments
        .update_one(
            doc! { "order_id": &dto.order_id, "status": "pending" },
            doc! { "$set": {
                "status": "completed",
                "capture_id": paypal::capture_id(&captured)
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if claimed.modified_count == 0 {
        return Ok(Json(ApiResponse::success_with_message(
            "Payment already processed".to_string(),
            serde_json::json!({
                "order_id": payment.order_id,
                "plan": payment.plan,
                "status": "COMPLETED"
            }),
        )));
    }

    let plan = payment.plan;
    db.collection::<Subscription>("subscriptions")
        .update_one(
            doc! { "user_id": auth.user_id },
            doc! { "$set": {
                "plan": plan.as_str(),
                "plans_limit": plan.plans_limit(),
                "status": "active",
                "updated_at": DateTime::now()
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    // Emitted only after the subscription write committed.
    hub.publish(SubscriptionEvent::changed(auth.user_id.to_hex(), plan));

    let email = lookup_email(db, auth.user_id)
        .await
        .unwrap_or_else(|| auth.email.clone());
    EmailService::send_receipt_email(&email, plan.as_str(), payment.amount, &payment.reference)
        .await;

    Ok(Json(ApiResponse::success_with_message(
        "Payment captured successfully".to_string(),
        serde_json::json!({
            "order_id": payment.order_id,
            "plan": plan,
            "amount": payment.amount,
            "status": "COMPLETED"
        }),
    )))
}

/// Read-only order verification. Proxies the provider's view of the order
/// without mutating anything.
#[openapi(tag = "Subscription")]
#[get("/subscription/orders/<order_id>")]
pub async fn get_order_status(
    db: &State<DbConn>,
    auth: AuthGuard,
    order_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let payment = db
        .collection::<Payment>("payments")
        .find_one(doc! { "order_id": &order_id, "user_id": auth.user_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("Order not found"))?;

    let order = PayPalService::get_order(&order_id)
        .await
        .map_err(|e| ApiError::bad_gateway(format!("Order lookup failed: {}", e)))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "order_id": order_id,
        "plan": payment.plan,
        "recorded_status": payment.status,
        "provider_status": paypal::order_status(&order)
    }))))
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[openapi(tag = "Subscription")]
#[post("/subscription/cancel")]
pub async fn cancel_subscription(
    db: &State<DbConn>,
    hub: &State<EventHub>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let sub = current_subscription(db, auth.user_id).await?;

    if !sub.plan.is_paid() {
        return Err(ApiError::bad_request("No paid subscription to cancel"));
    }

    if let Some(ref paypal_id) = sub.paypal_subscription_id {
        PayPalService::cancel_billing_subscription(paypal_id, "Cancelled by user")
            .await
            .map_err(|e| ApiError::bad_gateway(format!("Provider cancellation failed: {}", e)))?;
    }

    db.collection::<Subscription>("subscriptions")
        .update_one(
            doc! { "user_id": auth.user_id },
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

    hub.publish(SubscriptionEvent::changed(auth.user_id.to_hex(), PlanTier::Basic));

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Subscription cancelled",
        "plan": PlanTier::Basic
    }))))
}

// ============================================================================
// CHANGE NOTIFICATIONS (SSE)
// ============================================================================

/// Server-push replacement for the browser broadcast channel: each client
/// holds one stream and re-fetches `/subscription` on every event.
#[get("/subscription/events")]
pub async fn subscription_events(
    auth: AuthGuard,
    hub: &State<EventHub>,
    mut end: Shutdown,
) -> EventStream![] {
    let mut rx = hub.subscribe();
    let user_id = auth.user_id.to_hex();

    EventStream! {
        loop {
            let event = select! {
                msg = rx.recv() => match msg {
                    Ok(event) => event,
                    Err(RecvError::Closed) => break,
                    // Slow consumer: skip what was missed, the client
                    // re-fetches authoritative state anyway.
                    Err(RecvError::Lagged(_)) => continue,
                },
                _ = &mut end => break,
            };

            if event.user_id == user_id {
                yield Event::json(&event);
            }
        }
    }
}

// Receipts should go to the current address, not the one minted into the
// token.
async fn lookup_email(db: &DbConn, user_id: ObjectId) -> Option<String> {
    db.collection::<User>("users")
        .find_one(doc! { "_id": user_id }, None)
        .await
        .ok()
        .flatten()
        .map(|u| u.email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;

    #[test]
    fn rejected_capture_carries_the_provider_status() {
        let err = capture_rejection("PENDING");
        assert_eq!(err.status, Status::BadRequest);
        assert!(err.message.contains("PENDING"));

        let err = capture_rejection("DECLINED");
        assert!(err.message.contains("DECLINED"));
    }
}
