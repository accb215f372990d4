mod auth;
mod health_check;
mod onboard;

pub use auth::{get_current_user, login, logout, refresh};
pub use health_check::health_check;
pub use onboard::{onboard_callback, onboard_init, onboard_webhook};
