use crate::{
    config::Config,
    error::ApiError,
    models::{FavoritesRequest, FavoritesResponse, PredictParams, PredictResponse, Recommendation},
    services::RecommendationService,
};
use actix_web::{
    web::{self, Bytes, Json},
    HttpResponse,
};
use log::info;

pub fn recommendations_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/predict/favorites").route(web::post().to(predict_favorites)));
}

/// Rank the corpus against a query described by raw book attributes.
///
/// The body is decoded by hand so that anything other than a JSON object is
/// reported through the same error shape as every other failure.
pub async fn predict(
    body: Bytes,
    params: web::Query<PredictParams>,
    config: web::Data<Config>,
    recommendation_service: web::Data<RecommendationService>,
) -> Result<HttpResponse, ApiError> {
    let request: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidFormat(format!("body is not valid JSON: {}", e)))?;
    let k = params.k.unwrap_or(config.default_top_k);

    let ranked = recommendation_service.recommend(&request, k).await?;

    Ok(HttpResponse::Ok().json(PredictResponse {
        recommendations: ranked
            .into_iter()
            .map(|result| Recommendation {
                index: result.index,
                score: result.score,
            })
            .collect(),
    }))
}

/// Recommend catalog books from a user's favorites.
pub async fn predict_favorites(
    request: Json<FavoritesRequest>,
    recommendation_service: web::Data<RecommendationService>,
) -> Result<HttpResponse, ApiError> {
    let FavoritesRequest { favorites, limit } = request.into_inner();
    info!("Favorites recommendation for {} books", favorites.len());

    let recommendations = recommendation_service
        .recommend_for_favorites(&favorites, limit)
        .await?;

    Ok(HttpResponse::Ok().json(FavoritesResponse { recommendations }))
}
