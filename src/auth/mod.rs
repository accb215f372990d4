/// Authentication module
///
/// Access credential signing/verification and the refresh token codec.

mod claims;
mod jwt;
mod refresh_token;

pub use claims::Claims;
pub use jwt::generate_access_token;
pub use jwt::validate_access_token;
pub use refresh_token::parse_token_id;
pub use refresh_token::random_hex;
pub use refresh_token::RefreshToken;
