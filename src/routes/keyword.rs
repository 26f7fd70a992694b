use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::FindOptions;

use crate::db::DbConn;
use crate::models::{Keyword, KeywordResponse};
use crate::utils::{ApiError, ApiResponse};

const TRENDING_LIMIT: i64 = 20;

#[openapi(tag = "Keywords")]
#[get("/keywords")]
pub async fn get_trending_keywords(
    db: &State<DbConn>,
) -> Result<Json<ApiResponse<Vec<KeywordResponse>>>, ApiError> {
    let find_options = FindOptions::builder()
        .limit(TRENDING_LIMIT)
        .sort(doc! { "clicks": -1 })
        .build();

    let mut cursor = db
        .collection::<Keyword>("keywords")
        .find(doc! { "active": true }, find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;

    let mut keywords = Vec::new();
    while cursor.advance().await.map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))? {
        let keyword = cursor.deserialize_current()
            .map_err(|e| ApiError::internal_error(format!("Deserialization error: {}", e)))?;
        keywords.push(KeywordResponse::from(keyword));
    }

    Ok(Json(ApiResponse::success(keywords)))
}

/// Click tracking. The `$inc` is atomic, so concurrent clicks all count;
/// clients treat a failure here as ignorable.
#[openapi(tag = "Keywords")]
#[post("/keywords/<keyword_id>/click")]
pub async fn click_keyword(
    db: &State<DbConn>,
    keyword_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = ObjectId::parse_str(&keyword_id)
        .map_err(|_| ApiError::bad_request("Invalid keyword ID"))?;

    let result = db
        .collection::<Keyword>("keywords")
        .update_one(
            doc! { "_id": object_id, "active": true },
            doc! { "$inc": { "clicks": 1 } },
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("Keyword not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Click recorded"
    }))))
}
