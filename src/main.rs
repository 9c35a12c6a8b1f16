mod db;
mod imaging;
mod inference;
mod routes;
mod storage;

use std::env;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use sqlx::postgres::PgPoolOptions;

use db::feedback_repository::{FeedbackRepository, FeedbackStore};
use imaging::ImageDecoder;
use inference::{SpiceClassifier, TorchClassifier};
use routes::configure_routes;
use storage::s3_service::{ImageStore, S3Service};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let model_path =
        env::var("MODEL_PATH").unwrap_or_else(|_| "models/howhot_resnet18.ot".to_string());
    let classifier = TorchClassifier::load(&model_path).map_err(|e| {
        log::error!("Model failed to load from {model_path}: {e}");
        std::io::Error::other(format!("model loading failed: {e}"))
    })?;
    log::info!("Model loaded successfully from {model_path}");

    let decoder = ImageDecoder::new();

    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let s3_client = S3Client::new(&aws_config);
    let s3_bucket = env::var("S3_BUCKET_NAME").unwrap();
    let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    let s3_service = S3Service::new(s3_client, s3_bucket, aws_region);

    let database_url = env::var("DATABASE_URL").unwrap();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(&database_url)
        .map_err(|e| std::io::Error::other(format!("invalid DATABASE_URL: {e}")))?;
    let feedback_repo = FeedbackRepository::new(pool);
    // Degraded but alive if the database is not reachable yet; /predict
    // keeps working and /feedback reports its own failures.
    if let Err(e) = feedback_repo.ensure_schema().await {
        log::error!("Failed to prepare feedback table: {e}");
    } else {
        log::info!("Feedback table ready");
    }

    let classifier: Arc<dyn SpiceClassifier> = Arc::new(classifier);
    let image_store: Arc<dyn ImageStore> = Arc::new(s3_service);
    let feedback_store: Arc<dyn FeedbackStore> = Arc::new(feedback_repo);
    let decoder = web::Data::new(decoder);

    let port = env::var("PORT").unwrap_or_else(|_| "8081".to_string());
    let bind_address = format!("0.0.0.0:{}", port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(decoder.clone())
            .app_data(web::Data::from(classifier.clone()))
            .app_data(web::Data::from(image_store.clone()))
            .app_data(web::Data::from(feedback_store.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
