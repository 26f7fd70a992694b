pub mod email;
pub mod jwt;
pub mod openai;
pub mod paypal;

pub use email::EmailService;
pub use jwt::JwtService;
pub use openai::OpenAiService;
pub use paypal::PayPalService;
