use std::collections::HashMap;
use std::io::Write;

use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde_json::json;

use crate::db::feedback_repository::FeedbackStore;
use crate::imaging::ImageDecoder;
use crate::inference::SpiceClassifier;
use crate::storage::s3_service::ImageStore;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(index))
            .route(web::head().to(index)),
    )
    .service(web::resource("/ping").route(web::get().to(ping)))
    .service(web::resource("/predict").route(web::post().to(predict)))
    .service(web::resource("/feedback").route(web::post().to(feedback)));
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({"message": "HowHot API is running!"}))
}

async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(json!({"ping": "pong"}))
}

struct UploadedFile {
    bytes: Vec<u8>,
    filename: String,
    content_type: String,
}

#[derive(Default)]
struct UploadForm {
    file: Option<UploadedFile>,
    fields: HashMap<String, String>,
}

/// Buffers a whole multipart payload into memory: the `file` part as raw
/// bytes, every other part as a UTF-8 text field. Full buffering is the
/// documented resource policy; there is no size cap and no streaming.
async fn read_multipart(payload: &mut Multipart) -> Result<UploadForm, actix_web::Error> {
    let mut form = UploadForm::default();

    while let Ok(Some(mut field)) = payload.try_next().await {
        let name = field.name().unwrap_or("").to_string();
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);
        let content_type = field
            .content_type()
            .map(|mime| mime.to_string())
            .unwrap_or_default();

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            data.write_all(&chunk)?;
        }

        if name == "file" {
            form.file = Some(UploadedFile {
                bytes: data,
                filename: filename.unwrap_or_else(|| "upload".to_string()),
                content_type,
            });
        } else if !name.is_empty() {
            form.fields
                .insert(name, String::from_utf8_lossy(&data).into_owned());
        }
    }

    Ok(form)
}

async fn predict(
    decoder: web::Data<ImageDecoder>,
    classifier: web::Data<dyn SpiceClassifier>,
    mut payload: Multipart,
) -> HttpResponse {
    let form = match read_multipart(&mut payload).await {
        Ok(form) => form,
        Err(e) => {
            error!("Failed to read upload: {e}");
            return processing_failed(&e.to_string());
        }
    };
    let Some(file) = form.file else {
        return processing_failed("missing multipart field `file`");
    };

    info!(
        "Received file: {}, Content-Type: {}",
        file.filename.to_lowercase(),
        file.content_type
    );

    let image = match decoder.decode(&file.bytes) {
        Ok(image) => image,
        Err(e) => {
            error!("Image decode failed: {e}");
            return HttpResponse::UnsupportedMediaType()
                .json(json!({"detail": format!("Unsupported or corrupted image: {e}")}));
        }
    };

    match classifier.classify(&image) {
        Ok(spice_level) => HttpResponse::Ok().json(json!({"spice_level": spice_level})),
        Err(e) => {
            error!("Inference failed: {e}");
            processing_failed(&e.to_string())
        }
    }
}

async fn feedback(
    image_store: web::Data<dyn ImageStore>,
    feedback_store: web::Data<dyn FeedbackStore>,
    mut payload: Multipart,
) -> HttpResponse {
    let form = match read_multipart(&mut payload).await {
        Ok(form) => form,
        Err(e) => {
            error!("Failed to read feedback upload: {e}");
            return feedback_failed(&e.to_string());
        }
    };
    let Some(ref file) = form.file else {
        return feedback_failed("missing multipart field `file`");
    };
    let actual_spice_level = match int_field(&form, "actual_spice_level") {
        Ok(v) => v,
        Err(e) => return feedback_failed(&e),
    };
    let predicted_spice_level = match int_field(&form, "predicted_spice_level") {
        Ok(v) => v,
        Err(e) => return feedback_failed(&e),
    };

    // Upload first; the row is only written once the blob exists, so a
    // committed record never references a missing object.
    let image_url = match image_store.store_image(&file.bytes, &file.filename).await {
        Ok(url) => url,
        Err(e) => {
            error!("S3 upload failed: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"detail": "Failed to upload image to S3"}));
        }
    };

    match feedback_store
        .record_feedback(&image_url, predicted_spice_level, actual_spice_level)
        .await
    {
        Ok(_) => {
            info!("Feedback logged: {actual_spice_level} -> {image_url}");
            HttpResponse::Ok().json(json!({
                "status": "success",
                "image_url": image_url,
                "actual_spice_level": actual_spice_level,
            }))
        }
        Err(e) => {
            error!("Feedback insert failed: {e}");
            feedback_failed(&e.to_string())
        }
    }
}

fn int_field(form: &UploadForm, name: &str) -> Result<i32, String> {
    let raw = form
        .fields
        .get(name)
        .ok_or_else(|| format!("missing form field `{name}`"))?;
    raw.parse::<i32>()
        .map_err(|_| format!("form field `{name}` is not an integer: {raw}"))
}

fn processing_failed(reason: &str) -> HttpResponse {
    HttpResponse::InternalServerError()
        .json(json!({"detail": format!("Image processing failed: {reason}")}))
}

fn feedback_failed(reason: &str) -> HttpResponse {
    HttpResponse::InternalServerError()
        .json(json!({"detail": format!("Feedback failed: {reason}")}))
}
