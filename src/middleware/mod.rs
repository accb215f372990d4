/// Middleware module
///
/// Access-credential verification for protected routes.

mod jwt_middleware;

pub use jwt_middleware::JwtMiddleware;
