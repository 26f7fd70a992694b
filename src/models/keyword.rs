use mongodb::bson::{oid::ObjectId, DateTime};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A trending startup-idea keyword shown as a suggestion chip. Clicks are
/// counted with a single `$inc` so concurrent clicks can't lose updates.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Keyword {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub text: String,
    pub clicks: i64,
    pub active: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateKeywordDto {
    pub text: String,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateKeywordDto {
    pub text: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct KeywordResponse {
    pub id: String,
    pub text: String,
    pub clicks: i64,
    pub active: bool,
}

impl From<Keyword> for KeywordResponse {
    fn from(k: Keyword) -> Self {
        KeywordResponse {
            id: k.id.map(|id| id.to_hex()).unwrap_or_default(),
            text: k.text,
            clicks: k.clicks,
            active: k.active,
        }
    }
}
