use mongodb::bson::{oid::ObjectId, DateTime};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A generated startup business plan. `sections` keeps the model output as
/// free-form JSON (executive summary, market analysis, financials, ...).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusinessPlan {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub title: String,
    pub idea: String,
    pub industry: Option<String>,
    pub sections: serde_json::Value,
    pub model: String,
    pub created_at: DateTime,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GeneratePlanDto {
    pub title: String,
    pub idea: String,
    pub industry: Option<String>,
}
