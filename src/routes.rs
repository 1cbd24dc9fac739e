use actix_web::web;

use crate::error::ApiError;
use crate::handlers::{health_check, recommendations_config};

/// Configure all routes of the service.
pub fn api_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::InvalidFormat(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::InvalidInput(err.to_string()).into()),
    )
    .service(health_check)
    .configure(recommendations_config);
}
