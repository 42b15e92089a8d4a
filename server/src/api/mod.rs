//! HTTP API module
//!
//! JSON routes over the store, resolver, compositor and generator. The binary
//! nests `api_routes` under `/api`.

mod routes;
mod state;
mod types;

pub use routes::{ErrorResponse, api_routes};
pub use state::AppState;
pub use types::{
    CreateImageResponse, DeleteImageResponse, GenerationResponse, ImageInfoResponse,
    ImageListResponse, MaskAtPointResponse, MaskDetailResponse, MaskSummary, MaskUpload, Point,
    PointQueryParams, RenderRequest, RenderResponse, StoreMasksRequest, StoreMasksResponse,
};
