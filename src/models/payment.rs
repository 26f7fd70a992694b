use mongodb::bson::{oid::ObjectId, DateTime};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::PlanTier;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// One provider order, created as `Pending` when checkout starts so the
/// capture path never trusts the client for plan or amount. `order_id`
/// carries a unique index; a replayed capture collapses into the first one
/// instead of upgrading twice.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub order_id: String,
    pub user_id: ObjectId,
    pub plan: PlanTier,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    pub capture_id: Option<String>,
    pub reference: String,
    pub created_at: DateTime,
}
