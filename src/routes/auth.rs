use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime, oid::ObjectId};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use validator::Validate;
use crate::db::DbConn;
use crate::models::{LoginDto, RegisterDto, Subscription, User, UserResponse, UserRole};
use crate::services::{EmailService, JwtService};
use crate::utils::{validate_email, ApiResponse, ApiError};

const LOGIN_WINDOW_MS: i64 = 10 * 60 * 1000;
const LOGIN_LIMIT: i32 = 5;
const REFRESH_LIMIT: i32 = 10;
const REFRESH_WINDOW_MS: i64 = 60 * 1000;

/// --------------------
/// Rate limiter helper
/// --------------------

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref we)) => we.code == 11000,
        ErrorKind::Command(ref ce) => ce.code == 11000,
        _ => false,
    }
}

/// Pipeline update for one counter bump: restart the window when it has
/// expired, otherwise increment. Evaluated server-side, so concurrent
/// requests cannot both read a stale counter.
fn window_update(now: DateTime, window_expires: DateTime) -> Vec<mongodb::bson::Document> {
    let expired = doc! {
        "$lt": [{ "$ifNull": ["$expires_at", DateTime::from_millis(0)] }, now]
    };

    vec![doc! { "$set": {
        "count": { "$cond": [expired.clone(), 1, { "$add": ["$count", 1] }] },
        "expires_at": { "$cond": [expired, window_expires, "$expires_at"] }
    }}]
}

async fn rate_limit(
    db: &DbConn,
    key: &str,
    limit: i32,
    window_ms: i64,
) -> Result<(), ApiError> {
    let now = DateTime::now();
    let window_expires = DateTime::from_millis(now.timestamp_millis() + window_ms);

    let collection = db.collection::<mongodb::bson::Document>("rate_limits");
    let options = FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build();

    let result = collection
        .find_one_and_update(
            doc! { "key": key },
            window_update(now, window_expires),
            options.clone(),
        )
        .await;

    let doc = match result {
        Ok(d) => d,
        // Two first requests upserted at once; the loser's retry lands on
        // the winner's row.
        Err(ref e) if is_duplicate_key(e) => collection
            .find_one_and_update(
                doc! { "key": key },
                window_update(now, window_expires),
                options,
            )
            .await
            .map_err(|_| ApiError::internal_error("Rate limiter update failed"))?,
        Err(_) => return Err(ApiError::internal_error("Rate limiter update failed")),
    };

    let count = doc
        .as_ref()
        .and_then(|d| {
            d.get_i32("count")
                .ok()
                .or_else(|| d.get_i64("count").ok().map(|c| c as i32))
        })
        .unwrap_or(1);

    if count > limit {
        return Err(ApiError::too_many_requests(
            "Too many requests. Please try later.",
        ));
    }

    Ok(())
}

/// --------------------
/// Register
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<dto>")]
pub async fn register(
    db: &State<DbConn>,
    dto: Json<RegisterDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let email = dto.email.to_lowercase();

    let existing = db
        .collection::<User>("users")
        .find_one(doc! { "email": &email }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = bcrypt::hash(&dto.password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    let user = User {
        id: None,
        email: email.clone(),
        password_hash,
        name: dto.name.clone(),
        company: dto.company.clone(),
        role: UserRole::User,
        is_active: true,
        last_login_at: DateTime::now(),
        created_at: DateTime::now(),
        updated_at: DateTime::now(),
    };

    // The unique email index closes the find/insert race; a concurrent
    // duplicate surfaces here as the same 409 the lookup above returns.
    let res = db
        .collection::<User>("users")
        .insert_one(&user, None)
        .await
        .map_err(|e| {
            if is_duplicate_key(&e) {
                ApiError::conflict("An account with this email already exists")
            } else {
                ApiError::internal_error(e.to_string())
            }
        })?;

    let user_id = res
        .inserted_id
        .as_object_id()
        .ok_or_else(|| ApiError::internal_error("Invalid user ID"))?;

    // Every account gets a Basic subscription row up front so the quota
    // gate never has to special-case a missing one.
    db.collection::<Subscription>("subscriptions")
        .insert_one(&Subscription::new(user_id), None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    EmailService::send_welcome_email(&email, dto.name.as_deref().unwrap_or("")).await;

    let mut user = user;
    user.id = Some(user_id);

    let access_token = JwtService::generate_access_token(&user_id, &email, UserRole::User)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    let refresh_token = JwtService::generate_refresh_token(&user_id, &email, UserRole::User)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Registration successful",
        "user": UserResponse::from(user),
        "accessToken": access_token,
        "refreshToken": refresh_token
    }))))
}

/// --------------------
/// Login
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<dto>")]
pub async fn login(
    db: &State<DbConn>,
    dto: Json<LoginDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let email = dto.email.to_lowercase();
    if !validate_email(&email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }

    rate_limit(
        db,
        &format!("login:{}", email),
        LOGIN_LIMIT,
        LOGIN_WINDOW_MS,
    ).await?;

    let user = db
        .collection::<User>("users")
        .find_one(doc! { "email": &email }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    let valid = bcrypt::verify(&dto.password, &user.password_hash)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if !valid {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    if !user.is_active {
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    let user_id = user
        .id
        .ok_or_else(|| ApiError::internal_error("User record missing id"))?;

    db.collection::<User>("users")
        .update_one(
            doc! { "_id": user_id },
            doc! { "$set": { "last_login_at": DateTime::now() } },
            None,
        ).await.ok();

    let access_token = JwtService::generate_access_token(&user_id, &user.email, user.role)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    let refresh_token = JwtService::generate_refresh_token(&user_id, &user.email, user.role)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Login successful",
        "user": UserResponse::from(user),
        "accessToken": access_token,
        "refreshToken": refresh_token
    }))))
}

/// --------------------
/// Silent Refresh Token
/// --------------------
#[derive(serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct RefreshTokenDto {
    pub refresh_token: String,
}

fn refresh_limit_key(sub: &str) -> String {
    format!("refresh:{}", sub)
}

#[openapi(tag = "Auth")]
#[post("/auth/refresh", data = "<dto>")]
pub async fn refresh_token(
    db: &State<DbConn>,
    dto: Json<RefreshTokenDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let claims = JwtService::verify_token(&dto.refresh_token, true)
        .map_err(|_| ApiError::unauthorized("Invalid refresh token"))?;

    // Keyed per subject so one busy client cannot starve everyone else.
    rate_limit(
        db,
        &refresh_limit_key(&claims.sub),
        REFRESH_LIMIT,
        REFRESH_WINDOW_MS,
    ).await?;

    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| ApiError::unauthorized("Invalid user id in token"))?;

    let access = JwtService::generate_access_token(&user_id, &claims.email, claims.role)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "accessToken": access
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_update_resets_expired_windows_and_increments_live_ones() {
        let now = DateTime::from_millis(1_000_000);
        let expires = DateTime::from_millis(1_060_000);

        let stages = window_update(now, expires);
        assert_eq!(stages.len(), 1);
        let set = stages[0].get_document("$set").unwrap();

        let count_cond = set
            .get_document("count")
            .unwrap()
            .get_array("$cond")
            .unwrap();
        // Expired window starts over at 1; a live one increments.
        assert_eq!(count_cond[1].as_i32(), Some(1));
        let add = count_cond[2]
            .as_document()
            .unwrap()
            .get_array("$add")
            .unwrap();
        assert_eq!(add[0].as_str(), Some("$count"));
        assert_eq!(add[1].as_i32(), Some(1));

        let expires_cond = set
            .get_document("expires_at")
            .unwrap()
            .get_array("$cond")
            .unwrap();
        assert_eq!(expires_cond[1].as_datetime(), Some(&expires));
        assert_eq!(expires_cond[2].as_str(), Some("$expires_at"));
    }

    #[test]
    fn window_reset_condition_treats_missing_expiry_as_expired() {
        let now = DateTime::from_millis(1_000_000);
        let stages = window_update(now, DateTime::from_millis(1_060_000));

        let lt = stages[0]
            .get_document("$set")
            .unwrap()
            .get_document("count")
            .unwrap()
            .get_array("$cond")
            .unwrap()[0]
            .as_document()
            .unwrap()
            .get_array("$lt")
            .unwrap();

        // A freshly upserted row has no expires_at yet; $ifNull makes the
        // comparison come out expired so the counter starts at 1.
        let if_null = lt[0].as_document().unwrap().get_array("$ifNull").unwrap();
        assert_eq!(if_null[0].as_str(), Some("$expires_at"));
        assert_eq!(lt[1].as_datetime(), Some(&now));
    }

    #[test]
    fn refresh_limiter_is_keyed_per_account() {
        let a = refresh_limit_key("64f000000000000000000001");
        let b = refresh_limit_key("64f000000000000000000002");
        assert_ne!(a, b);
        assert!(a.contains("64f000000000000000000001"));
    }

    #[test]
    fn non_write_errors_are_not_duplicate_keys() {
        let err = mongodb::error::Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert!(!is_duplicate_key(&err));
    }
}
