use crate::{models::HealthResponse, services::RecommendationService};
use actix_web::{get, web, HttpResponse};

#[get("/health")]
pub async fn health_check(
    recommendation_service: web::Data<RecommendationService>,
) -> HttpResponse {
    let corpus = recommendation_service.corpus();
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        corpus_size: corpus.len(),
        embedding_dim: corpus.dim(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
