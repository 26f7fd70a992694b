use log::{error, info};
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use rocket::fairing::AdHoc;

pub fn init() -> AdHoc {
    AdHoc::on_ignite("MongoDB", |rocket| async {
        match connect().await {
            Ok(database) => {
                info!("✓ MongoDB connected successfully");
                if let Err(e) = ensure_indexes(&database).await {
                    error!("✗ Failed to create indexes: {}", e);
                }
                rocket.manage(database)
            }
            Err(e) => {
                error!("✗ Failed to connect to MongoDB: {}", e);
                rocket
            }
        }
    })
}

async fn connect() -> Result<Database, mongodb::error::Error> {
    let uri = crate::config::Config::mongodb_uri();
    let client = Client::with_uri_str(&uri).await?;

    // Test connection
    client
        .database("admin")
        .run_command(mongodb::bson::doc! {"ping": 1}, None)
        .await?;

    Ok(client.database("planforge"))
}

/// Unique indexes back the invariants the routes rely on: one account per
/// email, one subscription row per user, and one payment row per provider
/// order (the capture idempotency barrier).
async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let unique = IndexOptions::builder().unique(true).build();

    db.collection::<mongodb::bson::Document>("users")
        .create_index(
            IndexModel::builder()
                .keys(mongodb::bson::doc! { "email": 1 })
                .options(unique.clone())
                .build(),
            None,
        )
        .await?;

    db.collection::<mongodb::bson::Document>("subscriptions")
        .create_index(
            IndexModel::builder()
                .keys(mongodb::bson::doc! { "user_id": 1 })
                .options(unique.clone())
                .build(),
            None,
        )
        .await?;

    db.collection::<mongodb::bson::Document>("payments")
        .create_index(
            IndexModel::builder()
                .keys(mongodb::bson::doc! { "order_id": 1 })
                .options(unique.clone())
                .build(),
            None,
        )
        .await?;

    // The rate limiter upserts on this key; without uniqueness a first-
    // request race would leave two counter rows behind.
    db.collection::<mongodb::bson::Document>("rate_limits")
        .create_index(
            IndexModel::builder()
                .keys(mongodb::bson::doc! { "key": 1 })
                .options(unique)
                .build(),
            None,
        )
        .await?;

    db.collection::<mongodb::bson::Document>("keywords")
        .create_index(
            IndexModel::builder()
                .keys(mongodb::bson::doc! { "active": 1, "clicks": -1 })
                .build(),
            None,
        )
        .await?;

    Ok(())
}

pub type DbConn = Database;
