use log::{error, warn};
use rocket::request::{self, Request, FromRequest, Outcome};
use rocket::http::Status;
use rocket::State;
use crate::db::DbConn;
use crate::guards::AuthGuard;
use crate::models::UserRole;
use mongodb::bson::doc;
use rocket_okapi::request::OpenApiFromRequest;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::RequestHeaderInput;

/// Back-office guard. The role claim in the token is not trusted on its own;
/// the user row is re-read so a demoted or deactivated admin loses access as
/// soon as the change lands.
pub struct AdminGuard {
    pub auth: AuthGuard,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let auth_outcome = req.guard::<AuthGuard>().await;

        match auth_outcome {
            Outcome::Success(auth) => {
                let db = match req.guard::<&State<DbConn>>().await {
                    Outcome::Success(db) => db,
                    _ => return Outcome::Error((Status::InternalServerError, ())),
                };

                let user = db.collection::<crate::models::User>("users")
                    .find_one(doc! { "_id": &auth.user_id }, None)
                    .await;

                match user {
                    Ok(Some(user)) if user.is_active && user.role == UserRole::Admin => {
                        Outcome::Success(AdminGuard { auth })
                    }
                    Ok(Some(user)) => {
                        warn!("Admin guard rejected - role: {:?}, active: {}", user.role, user.is_active);
                        Outcome::Error((Status::Forbidden, ()))
                    }
                    Ok(None) => {
                        warn!("Admin guard rejected - user not found");
                        Outcome::Error((Status::Forbidden, ()))
                    }
                    Err(e) => {
                        error!("Admin guard rejected - DB error: {:?}", e);
                        Outcome::Error((Status::Forbidden, ()))
                    }
                }
            }
            Outcome::Error(e) => Outcome::Error(e),
            Outcome::Forward(f) => Outcome::Forward(f),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for AdminGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
