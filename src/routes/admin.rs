use crate::db::DbConn;
use crate::events::{EventHub, SubscriptionEvent};
use crate::guards::AdminGuard;
use crate::models::{
    next_reset_from, CreateKeywordDto, Keyword, Payment, PlanTier, Subscription, UpdateKeywordDto,
    User, UserResponse,
};
use crate::utils::{ApiError, ApiResponse};
use mongodb::bson::{doc, DateTime, oid::ObjectId};
use mongodb::options::FindOptions;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

// ==================== USER ADMIN ROUTES ====================

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct UserListQuery {
    pub is_active: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[openapi(tag = "Admin - Users")]
#[get("/admin/users?<query..>")]
pub async fn get_all_users(
    db: &State<DbConn>,
    _admin: AdminGuard,
    query: UserListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).min(100);
    let skip = (page - 1) * limit;

    let mut filter = doc! {};
    if let Some(is_active) = query.is_active {
        filter.insert("is_active", is_active);
    }

    let find_options = FindOptions::builder()
        .skip(skip as u64)
        .limit(limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let mut cursor = db.collection::<User>("users")
        .find(filter.clone(), find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;

    let mut users = Vec::new();
    while cursor.advance().await.map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))? {
        let user = cursor.deserialize_current()
            .map_err(|e| ApiError::internal_error(format!("Deserialization error: {}", e)))?;
        users.push(UserResponse::from(user));
    }

    let total = db.collection::<User>("users")
        .count_documents(filter, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Count error: {}", e)))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "users": users,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "pages": (total as f64 / limit as f64).ceil() as i64,
        }
    }))))
}

#[derive(serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct UpdateUserActiveDto {
    pub is_active: bool,
}

#[openapi(tag = "Admin - Users")]
#[put("/admin/users/<user_id>/active", data = "<dto>")]
pub async fn set_user_active(
    db: &State<DbConn>,
    _admin: AdminGuard,
    user_id: String,
    dto: Json<UpdateUserActiveDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = ObjectId::parse_str(&user_id)
        .map_err(|_| ApiError::bad_request("Invalid user ID"))?;

    let result = db.collection::<User>("users")
        .update_one(
            doc! { "_id": object_id },
            doc! { "$set": {
                "is_active": dto.is_active,
                "updated_at": DateTime::now()
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": if dto.is_active { "User activated" } else { "User deactivated" }
    }))))
}

// ==================== SUBSCRIPTION ADMIN ROUTES ====================

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct SubscriptionListQuery {
    pub plan: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[openapi(tag = "Admin - Subscriptions")]
#[get("/admin/subscriptions?<query..>")]
pub async fn get_all_subscriptions(
    db: &State<DbConn>,
    _admin: AdminGuard,
    query: SubscriptionListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).min(100);
    let skip = (page - 1) * limit;

    let mut filter = doc! {};
    if let Some(ref plan) = query.plan {
        let tier = PlanTier::parse(plan)
            .ok_or_else(|| ApiError::bad_request("Unknown plan filter"))?;
        filter.insert("plan", tier.as_str());
    }

    let find_options = FindOptions::builder()
        .skip(skip as u64)
        .limit(limit)
        .sort(doc! { "updated_at": -1 })
        .build();

    let mut cursor = db.collection::<Subscription>("subscriptions")
        .find(filter.clone(), find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;

    let mut subscriptions = Vec::new();
    while cursor.advance().await.map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))? {
        let sub = cursor.deserialize_current()
            .map_err(|e| ApiError::internal_error(format!("Deserialization error: {}", e)))?;
        subscriptions.push(sub);
    }

    let total = db.collection::<Subscription>("subscriptions")
        .count_documents(filter, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Count error: {}", e)))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "subscriptions": subscriptions,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "pages": (total as f64 / limit as f64).ceil() as i64,
        }
    }))))
}

#[derive(serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct OverridePlanDto {
    pub plan: String,
}

/// Support tool: force a user's plan without a payment. Resets the counter
/// and starts a fresh cycle so the new quota is immediately usable.
#[openapi(tag = "Admin - Subscriptions")]
#[put("/admin/subscriptions/<user_id>/plan", data = "<dto>")]
pub async fn override_plan(
    db: &State<DbConn>,
    hub: &State<EventHub>,
    _admin: AdminGuard,
    user_id: String,
    dto: Json<OverridePlanDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = ObjectId::parse_str(&user_id)
        .map_err(|_| ApiError::bad_request("Invalid user ID"))?;

    let plan = PlanTier::parse(&dto.plan)
        .ok_or_else(|| ApiError::bad_request("Unknown plan"))?;

    let now = DateTime::now();
    let result = db.collection::<Subscription>("subscriptions")
        .update_one(
            doc! { "user_id": object_id },
            doc! { "$set": {
                "plan": plan.as_str(),
                "plans_limit": plan.plans_limit(),
                "plans_generated": 0,
                "next_reset": next_reset_from(now),
                "status": "active",
                "updated_at": now
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("Subscription not found"));
    }

    hub.publish(SubscriptionEvent::changed(object_id.to_hex(), plan));

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Plan updated",
        "plan": plan
    }))))
}

// ==================== PAYMENT ADMIN ROUTES ====================

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct PaymentListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[openapi(tag = "Admin - Payments")]
#[get("/admin/payments?<query..>")]
pub async fn get_all_payments(
    db: &State<DbConn>,
    _admin: AdminGuard,
    query: PaymentListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).min(100);
    let skip = (page - 1) * limit;

    let mut filter = doc! {};
    if let Some(ref status) = query.status {
        filter.insert("status", status.to_lowercase());
    }

    let find_options = FindOptions::builder()
        .skip(skip as u64)
        .limit(limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let mut cursor = db.collection::<Payment>("payments")
        .find(filter.clone(), find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;

    let mut payments = Vec::new();
    while cursor.advance().await.map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))? {
        let payment = cursor.deserialize_current()
            .map_err(|e| ApiError::internal_error(format!("Deserialization error: {}", e)))?;
        payments.push(payment);
    }

    let total = db.collection::<Payment>("payments")
        .count_documents(filter, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Count error: {}", e)))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "payments": payments,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "pages": (total as f64 / limit as f64).ceil() as i64,
        }
    }))))
}

// ==================== KEYWORD ADMIN ROUTES ====================

#[openapi(tag = "Admin - Keywords")]
#[post("/admin/keywords", data = "<dto>")]
pub async fn create_keyword(
    db: &State<DbConn>,
    _admin: AdminGuard,
    dto: Json<CreateKeywordDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let text = dto.text.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request("Keyword text is required"));
    }

    let keyword = Keyword {
        id: None,
        text: text.to_string(),
        clicks: 0,
        active: dto.active.unwrap_or(true),
        created_at: DateTime::now(),
        updated_at: DateTime::now(),
    };

    let result = db.collection::<Keyword>("keywords")
        .insert_one(&keyword, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to create keyword: {}", e)))?;

    let keyword_id = result.inserted_id.as_object_id()
        .ok_or_else(|| ApiError::internal_error("Invalid keyword ID"))?
        .to_hex();

    Ok(Json(ApiResponse::success_with_message(
        "Keyword created".to_string(),
        serde_json::json!({ "keyword_id": keyword_id }),
    )))
}

#[openapi(tag = "Admin - Keywords")]
#[put("/admin/keywords/<keyword_id>", data = "<dto>")]
pub async fn update_keyword(
    db: &State<DbConn>,
    _admin: AdminGuard,
    keyword_id: String,
    dto: Json<UpdateKeywordDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = ObjectId::parse_str(&keyword_id)
        .map_err(|_| ApiError::bad_request("Invalid keyword ID"))?;

    let mut update_doc = doc! {
        "updated_at": DateTime::now()
    };

    if let Some(ref text) = dto.text {
        if text.trim().is_empty() {
            return Err(ApiError::bad_request("Keyword text cannot be empty"));
        }
        update_doc.insert("text", text.trim());
    }
    if let Some(active) = dto.active {
        update_doc.insert("active", active);
    }

    let result = db.collection::<Keyword>("keywords")
        .update_one(
            doc! { "_id": object_id },
            doc! { "$set": update_doc },
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update keyword: {}", e)))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("Keyword not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Keyword updated"
    }))))
}

#[openapi(tag = "Admin - Keywords")]
#[delete("/admin/keywords/<keyword_id>")]
pub async fn delete_keyword(
    db: &State<DbConn>,
    _admin: AdminGuard,
    keyword_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = ObjectId::parse_str(&keyword_id)
        .map_err(|_| ApiError::bad_request("Invalid keyword ID"))?;

    let result = db.collection::<Keyword>("keywords")
        .delete_one(doc! { "_id": object_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Keyword not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Keyword deleted"
    }))))
}
