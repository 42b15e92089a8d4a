//! HTTP route handlers for the mask API

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::state::AppState;
use super::types::{
    CreateImageResponse, DeleteImageResponse, GenerationResponse, ImageInfoResponse,
    ImageListResponse, MaskAtPointResponse, MaskDetailResponse, MaskSummary, Point,
    PointQueryParams, RenderRequest, RenderResponse, StoreMasksRequest, StoreMasksResponse,
};
use crate::codec::{self, MaskId};
use crate::error::{CoreError, ErrorKind};
use crate::store::RawMask;

/// Error body: `{error, code, ...detail}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

impl From<CoreError> for ErrorResponse {
    fn from(e: CoreError) -> Self {
        let detail = match &e {
            CoreError::ImageNotFound { image_id } => json!({ "image_id": image_id }),
            CoreError::MaskNotFound { image_id, mask_id } => {
                json!({ "image_id": image_id, "mask_id": mask_id })
            }
            CoreError::Validation { field, .. } => json!({ "field": field }),
            CoreError::OutOfRange {
                x,
                y,
                width,
                height,
            } => json!({ "x": x, "y": y, "width": width, "height": height }),
            CoreError::ServiceUnavailable(_) | CoreError::Storage(_) => json!({}),
        };
        let detail = match detail {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Self {
            error: e.to_string(),
            code: e.kind().code().to_string(),
            detail,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "validation_error" | "out_of_range" => StatusCode::BAD_REQUEST,
            "service_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Log at a level matching the error class, then convert
fn reject(context: &str, e: CoreError) -> ErrorResponse {
    match e.kind() {
        ErrorKind::Storage => tracing::error!("{}: {}", context, e),
        ErrorKind::ServiceUnavailable => tracing::warn!("{}: {}", context, e),
        _ => tracing::debug!("{}: {}", context, e),
    }
    ErrorResponse::from(e)
}

type ApiResult<T> = Result<T, ErrorResponse>;

/// Unwrap a JSON body, turning axum's rejection into a validation error.
/// Shape errors are reported against `field`; unreadable bodies against `body`.
fn json_body<T>(field: &str, payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            let field = match &rejection {
                JsonRejection::JsonDataError(_) => field,
                _ => "body",
            };
            Err(reject(
                "Malformed request body",
                CoreError::validation(field, rejection.body_text()),
            ))
        }
    }
}

fn parse_coordinate(field: &str, raw: Option<&str>) -> Result<i64, CoreError> {
    let raw = raw.ok_or_else(|| CoreError::validation(field, "missing query parameter"))?;
    raw.trim()
        .parse::<i64>()
        .map_err(|e| CoreError::validation(field, format!("expected an integer, got {:?}: {}", raw, e)))
}

/// POST /api/images - Upload an image (raw encoded bytes as the body)
pub async fn create_image(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CreateImageResponse>)> {
    if body.is_empty() {
        return Err(ErrorResponse::from(CoreError::validation(
            "body",
            "image upload is empty",
        )));
    }

    let id = state
        .store
        .create_image(body)
        .await
        .map_err(|e| reject("Failed to create image", e))?;
    let image = state
        .store
        .get_image(&id)
        .await
        .map_err(|e| reject("Failed to read created image", e))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateImageResponse {
            image_id: image.id,
            width: image.width,
            height: image.height,
            created_at: image.created_at,
        }),
    ))
}

/// GET /api/images - List every stored image
pub async fn list_images(State(state): State<AppState>) -> Json<ImageListResponse> {
    Json(ImageListResponse {
        images: state.store.list_images().await,
    })
}

/// GET /api/images/:id - Image info with mask summaries
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ImageInfoResponse>> {
    let snapshot = state
        .store
        .snapshot(&id)
        .await
        .map_err(|e| reject("Failed to get image", e))?;
    Ok(Json(ImageInfoResponse::from(snapshot.as_ref())))
}

/// GET /api/images/:id/original - The uploaded bytes
pub async fn get_original(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let bytes = state
        .store
        .original_bytes(&id)
        .await
        .map_err(|e| reject("Failed to get original image", e))?;

    let content_type = image::guess_format(&bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, max-age=3600"),
        ],
        bytes,
    )
        .into_response())
}

/// DELETE /api/images/:id - Delete an image, its masks and any running generation
pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteImageResponse>> {
    state
        .store
        .delete_image(&id)
        .await
        .map_err(|e| reject("Failed to delete image", e))?;
    state.generator.forget(&id);
    state.resolver.forget(&id);

    Ok(Json(DeleteImageResponse {
        image_id: id,
        deleted: true,
    }))
}

/// PUT /api/images/:id/masks - Replace the image's mask batch
pub async fn store_masks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StoreMasksRequest>, JsonRejection>,
) -> ApiResult<Json<StoreMasksResponse>> {
    let request = json_body("masks", payload)?;
    let raw = tokio::task::spawn_blocking(move || decode_uploads(request))
        .await
        .map_err(|e| reject("Mask decode task failed", CoreError::Storage(e.to_string())))?
        .map_err(|e| reject("Rejected mask upload", e))?;

    let mask_ids = state
        .store
        .store_masks(&id, raw)
        .await
        .map_err(|e| reject("Failed to store masks", e))?;

    Ok(Json(StoreMasksResponse {
        image_id: id,
        mask_count: mask_ids.len(),
        mask_ids,
    }))
}

fn decode_uploads(request: StoreMasksRequest) -> Result<Vec<RawMask>, CoreError> {
    request
        .masks
        .into_iter()
        .enumerate()
        .map(|(i, upload)| {
            let bitmap = codec::decode_mask_b64(&upload.mask_b64).map_err(|e| match e {
                CoreError::Validation { message, .. } => {
                    CoreError::validation(format!("masks[{}].mask_b64", i), message)
                }
                other => other,
            })?;
            Ok(RawMask {
                bitmap,
                score: upload.score,
            })
        })
        .collect()
}

/// POST /api/images/:id/masks/generate - Start background generation
pub async fn start_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<GenerationResponse>)> {
    let status = state
        .generator
        .start(&id)
        .await
        .map_err(|e| reject("Failed to start mask generation", e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerationResponse {
            image_id: id,
            status,
        }),
    ))
}

/// GET /api/images/:id/masks/generate - Generation status
pub async fn generation_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<GenerationResponse>> {
    let status = state
        .generator
        .status(&id)
        .await
        .map_err(|e| reject("Failed to get generation status", e))?;
    Ok(Json(GenerationResponse {
        image_id: id,
        status,
    }))
}

/// DELETE /api/images/:id/masks/generate - Cancel a running generation
pub async fn cancel_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<GenerationResponse>> {
    let status = state
        .generator
        .cancel(&id)
        .await
        .map_err(|e| reject("Failed to cancel generation", e))?;
    Ok(Json(GenerationResponse {
        image_id: id,
        status,
    }))
}

/// GET /api/images/:id/masks/:mask_id - Mask metadata and bitmap
pub async fn get_mask(
    State(state): State<AppState>,
    Path((id, mask_id)): Path<(String, MaskId)>,
) -> ApiResult<Json<MaskDetailResponse>> {
    let mask = state
        .store
        .get_mask(&id, mask_id)
        .await
        .map_err(|e| reject("Failed to get mask", e))?;

    let summary = MaskSummary::from(&mask);
    let png = tokio::task::spawn_blocking(move || codec::encode_mask_png(mask.bitmap()))
        .await
        .map_err(|e| reject("Mask encode task failed", CoreError::Storage(e.to_string())))?
        .map_err(|e| reject("Failed to encode mask", e))?;

    Ok(Json(MaskDetailResponse {
        image_id: id,
        mask: summary,
        mask_b64: codec::encode_base64(&png),
    }))
}

/// GET /api/images/:id/mask_at_point?x=&y= - Masks covering a pixel
pub async fn mask_at_point(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<PointQueryParams>, QueryRejection>,
) -> ApiResult<Json<MaskAtPointResponse>> {
    let Query(params) = params.map_err(|rejection| {
        reject(
            "Malformed point query",
            CoreError::validation("query", rejection.body_text()),
        )
    })?;
    let x = parse_coordinate("x", params.x.as_deref())
        .map_err(|e| reject("Malformed point query", e))?;
    let y = parse_coordinate("y", params.y.as_deref())
        .map_err(|e| reject("Malformed point query", e))?;

    let query = state
        .resolver
        .query(&id, x, y)
        .await
        .map_err(|e| reject("Point query failed", e))?;

    Ok(Json(MaskAtPointResponse {
        point: Point {
            x: query.x,
            y: query.y,
        },
        mask_id: query.best(),
        total_containing_masks: query.mask_ids.len(),
        total_masks_checked: query.total_masks_checked,
        all_containing_masks: query.mask_ids,
    }))
}

/// POST /api/images/:id/render - Composite colored masks into a PNG
pub async fn render(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> ApiResult<Json<RenderResponse>> {
    let request = json_body("render_instructions", payload)?;
    let png = state
        .compositor
        .render_png(&id, &request.render_instructions)
        .await
        .map_err(|e| reject("Render failed", e))?;

    Ok(Json(RenderResponse {
        image_id: id,
        rendered_image_b64: codec::encode_base64(&png),
    }))
}

/// Build the mask API routes (nested under `/api` by the binary)
pub fn api_routes(state: AppState) -> Router {
    let body_limit = state.max_upload_size;
    Router::new()
        .route("/images", post(create_image).get(list_images))
        .route("/images/:id", get(get_image).delete(delete_image))
        .route("/images/:id/original", get(get_original))
        .route("/images/:id/masks", put(store_masks))
        .route(
            "/images/:id/masks/generate",
            post(start_generation)
                .get(generation_status)
                .delete(cancel_generation),
        )
        .route("/images/:id/masks/:mask_id", get(get_mask))
        .route("/images/:id/mask_at_point", get(mask_at_point))
        .route("/images/:id/render", post(render))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
