use rocket::figment::{Figment, providers::{Env, Format, Toml}};
use rocket::Config as RocketConfig;
use std::env;

pub struct Config;

impl Config {
    fn figment() -> Figment {
        // Get the current profile
        let profile = env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

        Figment::from(RocketConfig::default())
            .merge(Toml::file("Rocket.toml").nested())
            .select(&profile)
            .merge(Env::prefixed("ROCKET_").split("_"))
    }

    pub fn jwt_secret() -> String {
        Self::figment()
            .extract_inner("jwt_secret")
            .unwrap_or_else(|_| "default-secret".to_string())
    }

    pub fn jwt_refresh_secret() -> String {
        Self::figment()
            .extract_inner("jwt_refresh_secret")
            .unwrap_or_else(|_| "default-refresh-secret".to_string())
    }

    pub fn jwt_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_expiry")
            .unwrap_or(900)
    }

    pub fn jwt_refresh_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_refresh_expiry")
            .unwrap_or(604800)
    }

    pub fn mongodb_uri() -> String {
        Self::figment()
            .extract_inner("mongodb_uri")
            .unwrap_or_else(|_| "mongodb://localhost:27017/planforge".to_string())
    }

    pub fn mail_host() -> String {
        Self::figment()
            .extract_inner("mail_host")
            .unwrap_or_else(|_| "smtp.gmail.com".to_string())
    }

    pub fn mail_user() -> String {
        Self::figment()
            .extract_inner("mail_user")
            .unwrap_or_default()
    }

    pub fn mail_password() -> String {
        Self::figment()
            .extract_inner("mail_password")
            .unwrap_or_default()
    }

    pub fn mail_from() -> String {
        Self::figment()
            .extract_inner("mail_from")
            .unwrap_or_else(|_| "PlanForge <noreply@planforge.io>".to_string())
    }

    pub fn is_development() -> bool {
        let profile = env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());
        profile == "development"
    }

    pub fn paypal_base_url() -> String {
        Self::figment()
            .extract_inner("paypal_base_url")
            .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string())
    }

    pub fn paypal_client_id() -> Option<String> {
        Self::figment()
            .extract_inner("paypal_client_id")
            .ok()
    }

    pub fn paypal_client_secret() -> Option<String> {
        Self::figment()
            .extract_inner("paypal_client_secret")
            .ok()
    }

    pub fn paypal_webhook_secret() -> Option<String> {
        Self::figment()
            .extract_inner("paypal_webhook_secret")
            .ok()
    }

    pub fn is_paypal_enabled() -> bool {
        Self::paypal_client_id().is_some()
            && Self::paypal_client_secret().is_some()
    }

    pub fn openai_base_url() -> String {
        Self::figment()
            .extract_inner("openai_base_url")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
    }

    pub fn openai_api_key() -> Option<String> {
        Self::figment()
            .extract_inner("openai_api_key")
            .ok()
    }

    pub fn openai_model() -> String {
        Self::figment()
            .extract_inner("openai_model")
            .unwrap_or_else(|_| "gpt-4o-mini".to_string())
    }

    pub fn is_openai_enabled() -> bool {
        Self::openai_api_key().is_some()
    }
}
