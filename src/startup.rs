use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;

use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    get_current_user, health_check, login, logout, onboard_callback, onboard_init,
    onboard_webhook, refresh,
};
use crate::session::SessionManager;
use crate::verification::VerificationCorrelator;

pub fn run(
    listener: TcpListener,
    correlator: VerificationCorrelator,
    session_manager: SessionManager,
) -> Result<Server, std::io::Error> {
    let jwt_config = session_manager.jwt_settings().clone();
    let correlator = web::Data::new(correlator);
    let session_manager = web::Data::new(session_manager);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(correlator.clone())
            .app_data(session_manager.clone())

            .route("/health_check", web::get().to(health_check))

            // Public routes
            .service(
                web::scope("/api/auth")
                    .route("/onboard/init", web::post().to(onboard_init))
                    .route("/onboard/callback", web::get().to(onboard_callback))
                    .route("/onboard/webhook", web::post().to(onboard_webhook))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout)),
            )

            // Protected routes (require an access credential)
            .service(
                web::scope("/api")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("/me", web::get().to(get_current_user)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
