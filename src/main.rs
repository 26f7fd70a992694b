#[macro_use]
extern crate rocket;

mod config;
mod db;
mod events;
mod guards;
mod models;
mod routes;
mod services;
mod utils;

use dotenvy::dotenv;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Build, Request, Response, Rocket};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};

use events::EventHub;

/* ----------------------------- CORS ----------------------------- */

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        if let Some(origin) = request.headers().get_one("Origin") {
            response.set_header(Header::new("Access-Control-Allow-Origin", origin));
        }

        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS",
        ));

        response.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        ));

        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

/* ----------------------------- OPTIONS ----------------------------- */

#[options("/<_..>")]
fn options_handler() {}

/* ----------------------------- ERRORS ----------------------------- */

#[catch(404)]
fn not_found() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Resource not found (check /api/v1 prefix)"
    })
}

#[catch(500)]
fn internal_error() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Internal server error"
    })
}

/* ----------------------------- SWAGGER ----------------------------- */

fn swagger_config() -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: "/openapi.json".to_string(),
        ..Default::default()
    }
}

/* ----------------------------- LAUNCH ----------------------------- */

#[launch]
fn rocket() -> Rocket<Build> {
    dotenv().ok();
    env_logger::init();

    println!("🚀 PlanForge API running");
    println!("📚 Swagger UI → http://localhost:8000/api/docs");

    rocket::build()
        .attach(db::init())
        .attach(CORS)
        .manage(EventHub::new())
        .mount("/", routes![options_handler])
        .mount(
            "/api/v1",
            routes![
                // Auth
                routes::auth::register,
                routes::auth::login,
                routes::auth::refresh_token,
                // User
                routes::user::get_profile,
                routes::user::update_profile,
                routes::user::delete_account,
                // Subscription
                routes::subscription::get_subscription,
                routes::subscription::create_order,
                routes::subscription::capture_payment,
                routes::subscription::get_order_status,
                routes::subscription::cancel_subscription,
                routes::subscription::subscription_events,
                // Plans
                routes::plan::generate_plan,
                routes::plan::list_plans,
                routes::plan::get_plan,
                routes::plan::delete_plan,
                // Keywords
                routes::keyword::get_trending_keywords,
                routes::keyword::click_keyword,
                // Webhooks
                routes::webhook::paypal_webhook,
                // Admin Routes - Users
                routes::admin::get_all_users,
                routes::admin::set_user_active,
                // Admin Routes - Subscriptions
                routes::admin::get_all_subscriptions,
                routes::admin::override_plan,
                // Admin Routes - Payments
                routes::admin::get_all_payments,
                // Admin Routes - Keywords
                routes::admin::create_keyword,
                routes::admin::update_keyword,
                routes::admin::delete_keyword,
            ],
        )
        .mount("/api/docs", make_swagger_ui(&swagger_config()))
        .register("/", catchers![not_found, internal_error])
}
