use log::error;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime, oid::ObjectId};
use mongodb::options::FindOptions;

use crate::config::Config;
use crate::db::DbConn;
use crate::guards::AuthGuard;
use crate::models::{BusinessPlan, GeneratePlanDto, Subscription, SubscriptionView};
use crate::routes::subscription::current_subscription;
use crate::services::OpenAiService;
use crate::utils::{ApiError, ApiResponse};

/// The quota claim: permission check and counter increment as one
/// conditional update, evaluated server-side. Two racing requests near
/// the limit cannot both pass.
fn claim_filter(user_id: ObjectId) -> mongodb::bson::Document {
    doc! {
        "user_id": user_id,
        "$expr": { "$lt": ["$plans_generated", "$plans_limit"] }
    }
}

fn claim_update() -> mongodb::bson::Document {
    doc! {
        "$inc": { "plans_generated": 1 },
        "$set": { "updated_at": DateTime::now() }
    }
}

/// Release a quota unit claimed for a generation that never produced a
/// plan. Floor at zero in case a reset landed in between.
async fn release_claim(db: &DbConn, user_id: ObjectId) {
    let result = db
        .collection::<Subscription>("subscriptions")
        .update_one(
            doc! { "user_id": user_id, "plans_generated": { "$gt": 0 } },
            doc! { "$inc": { "plans_generated": -1 } },
            None,
        )
        .await;

    if let Err(e) = result {
        error!("Failed to release quota claim for {}: {}", user_id, e);
    }
}

#[openapi(tag = "Plans")]
#[post("/plans/generate", data = "<dto>")]
pub async fn generate_plan(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<GeneratePlanDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if dto.idea.trim().is_empty() {
        return Err(ApiError::bad_request("Describe your startup idea"));
    }
    if dto.title.trim().is_empty() {
        return Err(ApiError::bad_request("Give your plan a title"));
    }

    // Applies the lazy monthly reset before the gate is consulted.
    let sub = current_subscription(db, auth.user_id).await?;

    // A rejected request never reaches the model provider.
    let claim = db
        .collection::<Subscription>("subscriptions")
        .update_one(claim_filter(auth.user_id), claim_update(), None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if claim.modified_count == 0 {
        return Err(ApiError::payment_required(format!(
            "Monthly limit of {} plans reached. Upgrade to generate more.",
            sub.plans_limit
        )));
    }

    let sections = match OpenAiService::generate_plan(&dto.idea, dto.industry.as_deref()).await {
        Ok(sections) => sections,
        Err(e) => {
            release_claim(db, auth.user_id).await;
            return Err(ApiError::bad_gateway(format!("Plan generation failed: {}", e)));
        }
    };

    let plan = BusinessPlan {
        id: None,
        user_id: auth.user_id,
        title: dto.title.trim().to_string(),
        idea: dto.idea.trim().to_string(),
        industry: dto.industry.clone(),
        sections,
        model: Config::openai_model(),
        created_at: DateTime::now(),
    };

    let res = match db
        .collection::<BusinessPlan>("business_plans")
        .insert_one(&plan, None)
        .await
    {
        Ok(res) => res,
        Err(e) => {
            release_claim(db, auth.user_id).await;
            return Err(ApiError::internal_error(format!("Failed to save plan: {}", e)));
        }
    };

    let usage = current_subscription(db, auth.user_id).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "plan_id": res.inserted_id.as_object_id().map(|id| id.to_hex()),
        "title": plan.title,
        "sections": plan.sections,
        "usage": SubscriptionView::from(usage)
    }))))
}

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct PlanListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[openapi(tag = "Plans")]
#[get("/plans?<query..>")]
pub async fn list_plans(
    db: &State<DbConn>,
    auth: AuthGuard,
    query: PlanListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).min(100);
    let skip = (page - 1) * limit;

    let filter = doc! { "user_id": auth.user_id };

    let find_options = FindOptions::builder()
        .skip(skip as u64)
        .limit(limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let mut cursor = db
        .collection::<BusinessPlan>("business_plans")
        .find(filter.clone(), find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;

    let mut plans = Vec::new();
    while cursor.advance().await.map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))? {
        let plan = cursor.deserialize_current()
            .map_err(|e| ApiError::internal_error(format!("Deserialization error: {}", e)))?;
        plans.push(plan);
    }

    let total = db
        .collection::<BusinessPlan>("business_plans")
        .count_documents(filter, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Count error: {}", e)))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "plans": plans,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "pages": (total as f64 / limit as f64).ceil() as i64,
        }
    }))))
}

#[openapi(tag = "Plans")]
#[get("/plans/<plan_id>")]
pub async fn get_plan(
    db: &State<DbConn>,
    auth: AuthGuard,
    plan_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = ObjectId::parse_str(&plan_id)
        .map_err(|_| ApiError::bad_request("Invalid plan ID"))?;

    let plan = db
        .collection::<BusinessPlan>("business_plans")
        .find_one(doc! { "_id": object_id, "user_id": auth.user_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Plan not found"))?;

    Ok(Json(ApiResponse::success(serde_json::json!(plan))))
}

#[openapi(tag = "Plans")]
#[delete("/plans/<plan_id>")]
pub async fn delete_plan(
    db: &State<DbConn>,
    auth: AuthGuard,
    plan_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = ObjectId::parse_str(&plan_id)
        .map_err(|_| ApiError::bad_request("Invalid plan ID"))?;

    let result = db
        .collection::<BusinessPlan>("business_plans")
        .delete_one(doc! { "_id": object_id, "user_id": auth.user_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Plan not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Plan deleted"
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_checks_counter_against_limit_server_side() {
        let user_id = ObjectId::new();
        let filter = claim_filter(user_id);

        assert_eq!(filter.get_object_id("user_id").unwrap(), user_id);

        let lt = filter
            .get_document("$expr")
            .unwrap()
            .get_array("$lt")
            .unwrap();
        assert_eq!(lt[0].as_str(), Some("$plans_generated"));
        assert_eq!(lt[1].as_str(), Some("$plans_limit"));
    }

    #[test]
    fn claim_increments_counter_by_one() {
        let update = claim_update();

        let inc = update.get_document("$inc").unwrap();
        assert_eq!(inc.get_i32("plans_generated").unwrap(), 1);
        assert!(update.get_document("$set").unwrap().contains_key("updated_at"));
    }
}
