use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::CoreResult;
use crate::query::PointResolver;
use crate::render::Compositor;
use crate::segment::{HttpSegmentationClient, MaskGenerator, SegmentationClient};
use crate::store::MaskStore;

/// Shared state behind every API handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MaskStore>,
    pub resolver: Arc<PointResolver>,
    pub compositor: Arc<Compositor>,
    pub generator: Arc<MaskGenerator>,
    pub max_upload_size: usize,
}

impl AppState {
    /// Wire the services around `store` with an explicit segmentation client
    pub fn new(
        store: Arc<MaskStore>,
        client: Option<Arc<dyn SegmentationClient>>,
        config: &Config,
    ) -> Self {
        Self {
            resolver: Arc::new(PointResolver::new(Arc::clone(&store))),
            compositor: Arc::new(Compositor::new(
                Arc::clone(&store),
                config.render.cache_config(),
            )),
            generator: Arc::new(MaskGenerator::new(
                Arc::clone(&store),
                client,
                config.segmentation.timeout,
            )),
            store,
            max_upload_size: config.max_upload_size,
        }
    }

    /// Wire the services, building an HTTP segmentation client when a
    /// service URL is configured
    pub fn from_config(store: Arc<MaskStore>, config: &Config) -> CoreResult<Self> {
        let client: Option<Arc<dyn SegmentationClient>> = match &config.segmentation.url {
            Some(url) => {
                info!("Using segmentation service at {}", url);
                Some(Arc::new(HttpSegmentationClient::new(
                    url.clone(),
                    config.segmentation.token.clone(),
                    config.segmentation.timeout,
                )?))
            }
            None => {
                info!("SAM_API_URL not set - mask generation disabled");
                None
            }
        };
        Ok(Self::new(store, client, config))
    }
}
