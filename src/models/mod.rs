pub mod user;
pub mod subscription;
pub mod payment;
pub mod plan;
pub mod keyword;

pub use user::*;
pub use subscription::*;
pub use payment::*;
pub use plan::*;
pub use keyword::*;
