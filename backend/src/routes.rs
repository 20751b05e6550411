use actix_files::Files;
use actix_multipart::{Multipart, MultipartError};
use actix_web::{web, Error, HttpResponse};
use futures::TryStreamExt;
use log::{error, warn};
use shared::{AnalysisFailureResponse, AnalyzeResponse, ErrorResponse};
use std::path::PathBuf;

use crate::analysis::{AnalysisError, AnalysisFailure, AnalysisService};
use crate::uploads::{secure_filename, UploadStore, UPLOADS_ROUTE};

const IMAGE_FIELD: &str = "image";

struct ImageUpload {
    filename: String,
    bytes: Vec<u8>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, upload_dir: PathBuf) {
    cfg.service(web::resource("/analyze").route(web::post().to(analyze)))
        .service(Files::new(UPLOADS_ROUTE, upload_dir));
}

async fn analyze(
    service: web::Data<AnalysisService>,
    uploads: web::Data<UploadStore>,
    payload: Multipart,
) -> Result<HttpResponse, Error> {
    let upload = match read_image_field(payload).await {
        Ok(Some(upload)) => upload,
        Ok(None) => return Ok(bad_request("No image provided")),
        Err(e) => {
            warn!("Unreadable multipart upload: {}", e);
            return Ok(bad_request("No image provided"));
        }
    };

    if upload.filename.is_empty() {
        return Ok(bad_request("Empty filename"));
    }
    let filename = secure_filename(&upload.filename);

    let expected_classes = service.expected_classes();
    let saved_name = filename.clone();
    let outcome = web::block(move || {
        let path = uploads
            .save(&saved_name, &upload.bytes)
            .map_err(AnalysisFailure::new)?;
        service.analyze_file(&path)
    })
    .await;

    let failure = match outcome {
        Ok(Ok(predictions)) => {
            return Ok(HttpResponse::Ok().json(AnalyzeResponse {
                predictions,
                processed_image_url: UploadStore::public_url(&filename),
            }));
        }
        Ok(Err(failure)) => failure,
        Err(e) => AnalysisFailure::new(AnalysisError::Worker(e.to_string())),
    };

    error!("Analysis failed for {}: {}", filename, failure.error);
    Ok(HttpResponse::InternalServerError().json(AnalysisFailureResponse {
        error: "Analysis failed".into(),
        details: failure.error.to_string(),
        expected_classes,
        received: failure.received,
    }))
}

/// Returns the first `image` part that carries a filename.
async fn read_image_field(mut payload: Multipart) -> Result<Option<ImageUpload>, MultipartError> {
    while let Some(mut field) = payload.try_next().await? {
        let filename = match field.content_disposition() {
            Some(disposition) if field.name() == Some(IMAGE_FIELD) => {
                disposition.get_filename().map(str::to_string)
            }
            _ => None,
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            bytes.extend_from_slice(&chunk);
        }

        if let Some(filename) = filename {
            return Ok(Some(ImageUpload { filename, bytes }));
        }
    }
    Ok(None)
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: message.into(),
    })
}
