//! The host-facing `launch(modelUrl, imageUrl, scaleFactor)` entry point.

use anchorview_env::{AnchorViewContext, AssetFetcher, HostChannel, Url};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::asset_loader::AssetLoader;
use crate::config::{LaunchRequest, SessionConfig};
use crate::scene::{AssetParser, SceneGraph, TrackingRuntime};
use crate::session_driver::{SessionDriver, SessionHandle};
use crate::tracking_session::TrackingSession;
use crate::transform_codec::TransformCodec;

/// Launch arguments after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedLaunch {
    pub model_url: Url,
    pub image_url: Url,
    pub scale_factor: f64,
}

/// Checks the host's arguments synchronously, before anything is started.
pub fn validate_launch(request: &LaunchRequest) -> Result<ValidatedLaunch, LaunchError> {
    let model_url = AssetLoader::validate_url(&request.model_url)
        .map_err(|e| LaunchError::InvalidArguments(format!("modelUrl: {}", e)))?;
    let image_url = AssetLoader::validate_url(&request.image_url)
        .map_err(|e| LaunchError::InvalidArguments(format!("imageUrl: {}", e)))?;

    if !request.scale_factor.is_finite() || request.scale_factor <= 0.0 {
        return Err(LaunchError::InvalidArguments(format!(
            "scaleFactor must be a positive number, got {}",
            request.scale_factor
        )));
    }

    Ok(ValidatedLaunch {
        model_url,
        image_url,
        scale_factor: request.scale_factor,
    })
}

/// The platform adapters a session runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn AssetFetcher>,
    pub parser: Arc<dyn AssetParser>,
    pub scene: Arc<dyn SceneGraph>,
    pub runtime: Arc<dyn TrackingRuntime>,
    pub host: Arc<dyn HostChannel>,
}

/// Acknowledgement returned to the host.
pub struct LaunchAck {
    pub session_id: Uuid,
    pub handle: SessionHandle,
}

/// Starts tracking sessions on a context.
pub struct Launcher<Ctx: AnchorViewContext> {
    context: Arc<Ctx>,
    collaborators: Collaborators,
    config: SessionConfig,
}

impl<Ctx: AnchorViewContext> Launcher<Ctx> {
    pub fn new(context: Arc<Ctx>, collaborators: Collaborators, config: SessionConfig) -> Self {
        Self {
            context,
            collaborators,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Validates `request` and spawns the session driver.
    ///
    /// Everything after validation is asynchronous; the host hears about it
    /// only through `onStatus` and gesture messages.
    pub fn launch(&self, request: &LaunchRequest) -> Result<LaunchAck, LaunchError> {
        let launch = validate_launch(request).map_err(|err| {
            warn!(error = %err, "launch rejected");
            err
        })?;

        let (driver, handle) = self.build(launch);
        let session_id = Uuid::new_v4();

        info!(
            session = %session_id,
            model = %request.model_url,
            image = %request.image_url,
            scale = request.scale_factor,
            "launching tracking session"
        );
        self.context.spawn("session-driver", async move {
            let _ = driver.run().await;
        });

        Ok(LaunchAck { session_id, handle })
    }

    /// Wires a driver without spawning it.
    pub fn build(&self, launch: ValidatedLaunch) -> (SessionDriver<Ctx>, SessionHandle) {
        let c = &self.collaborators;
        let session = TrackingSession::new(
            c.scene.clone(),
            c.host.clone(),
            TransformCodec::new(self.config.convention),
            launch.scale_factor,
            self.config.node_name.clone(),
        );
        let loader = Arc::new(AssetLoader::new(
            c.fetcher.clone(),
            c.parser.clone(),
            self.config.loader.clone(),
        ));

        SessionDriver::new(
            self.context.clone(),
            session,
            loader,
            c.runtime.clone(),
            c.host.clone(),
            self.config.clone(),
            launch,
        )
    }
}

/// Rejected at the launch boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LaunchError {
    #[error("INVALID_ARGUMENTS: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(model: &str, image: &str, scale: f64) -> LaunchRequest {
        LaunchRequest::new(model, image, scale)
    }

    #[test]
    fn test_valid_launch() {
        let launch = validate_launch(&request(
            "https://cdn.example.com/model.glb",
            "https://cdn.example.com/qr.png",
            0.2,
        ))
        .unwrap();
        assert_eq!(launch.model_url.host_str(), Some("cdn.example.com"));
        assert_eq!(launch.scale_factor, 0.2);
    }

    #[test]
    fn test_empty_urls_rejected() {
        let err = validate_launch(&request("", "https://a.example/qr.png", 1.0)).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArguments(ref m) if m.starts_with("modelUrl")));

        let err = validate_launch(&request("https://a.example/m.glb", " ", 1.0)).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArguments(ref m) if m.starts_with("imageUrl")));
    }

    #[test]
    fn test_malformed_url_rejected() {
        assert!(validate_launch(&request("model.glb", "https://a.example/qr.png", 1.0)).is_err());
        assert!(validate_launch(&request("https://", "https://a.example/qr.png", 1.0)).is_err());
    }

    #[test]
    fn test_bad_scale_rejected() {
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(
                validate_launch(&request("https://a.example/m.glb", "https://a.example/qr.png", scale)).is_err(),
                "scale {} accepted",
                scale
            );
        }
    }
}
