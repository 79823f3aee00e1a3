use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/blocks", web::post().to(handlers::append_block))
            .route("/blocks/{hash}", web::get().to(handlers::get_block))
            .route(
                "/blocks/{hash}/proof/{tx_id}",
                web::get().to(handlers::get_transaction_proof),
            )
            .route("/validate", web::get().to(handlers::validate_chain)),
    );
}
