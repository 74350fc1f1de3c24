use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use sqlx::PgPool;
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{InMemoryRefreshTokenStore, PgRefreshTokenStore, TokenIssuer};
use crate::configuration::Settings;
use crate::coordinator::AuthCoordinator;
use crate::directory::{InMemoryUserDirectory, PgUserDirectory};
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    body_error, deactivate_me, health_check, list_users, login, logout, me, refresh_token,
    register, update_me,
};

/// Coordinator over the PostgreSQL stores.
pub fn build_coordinator(settings: &Settings, pool: PgPool) -> AuthCoordinator {
    AuthCoordinator::new(
        Arc::new(PgUserDirectory::new(
            pool.clone(),
            settings.security.password_hash_cost,
        )),
        Arc::new(PgRefreshTokenStore::new(
            pool,
            settings.jwt.refresh_token_lifetime(),
        )),
        Arc::new(TokenIssuer::new(&settings.jwt)),
        settings.application.store_timeout(),
    )
}

/// Coordinator over in-memory stores. Nothing survives a restart.
pub fn build_in_memory_coordinator(settings: &Settings) -> AuthCoordinator {
    AuthCoordinator::new(
        Arc::new(InMemoryUserDirectory::new(
            settings.security.password_hash_cost,
        )),
        Arc::new(InMemoryRefreshTokenStore::new(
            settings.jwt.refresh_token_lifetime(),
        )),
        Arc::new(TokenIssuer::new(&settings.jwt)),
        settings.application.store_timeout(),
    )
}

pub fn run(listener: TcpListener, coordinator: AuthCoordinator) -> Result<Server, std::io::Error> {
    let issuer = coordinator.issuer().clone();
    let coordinator = web::Data::new(coordinator);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)
            // Shared state
            .app_data(coordinator.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| body_error("body", err)))
            .app_data(
                web::QueryConfig::default().error_handler(|err, _req| body_error("query", err)),
            )
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/refresh-token", web::post().to(refresh_token))
            // Protected routes (require a valid access token)
            .service(
                web::resource("/logout")
                    .wrap(JwtMiddleware::new(issuer.clone()))
                    .route(web::post().to(logout)),
            )
            .service(
                web::resource("/me")
                    .wrap(JwtMiddleware::new(issuer.clone()))
                    .route(web::get().to(me))
                    .route(web::put().to(update_me))
                    .route(web::delete().to(deactivate_me)),
            )
            .service(
                web::resource("/users")
                    .wrap(JwtMiddleware::new(issuer.clone()))
                    .route(web::get().to(list_users)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
