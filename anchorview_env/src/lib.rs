//! AnchorView Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the AnchorView pipeline
//! run against a real device (tokio + HTTP) or inside the deterministic
//! simulator with the same engine code.
//!
//! # Core Concept
//!
//! Everything that touches the outside world goes through a trait here:
//! - Time and task spawning (`AnchorViewContext`)
//! - Fetching remote bytes (`AssetFetcher`)
//! - Talking back to the embedding host (`HostChannel`)
//!
//! # Example
//!
//! ```ignore
//! use anchorview_env::{AnchorViewContext, AssetFetcher};
//!
//! async fn fetch_model<Ctx: AnchorViewContext, F: AssetFetcher>(
//!     ctx: &Ctx,
//!     fetcher: &F,
//!     url: &url::Url,
//! ) {
//!     let started = ctx.now();
//!     let bytes = fetcher.fetch(url, &|p| println!("{:.0}%", p * 100.0)).await;
//!     println!("took {:?}", ctx.now() - started);
//! }
//! ```

mod context;
mod fetch;
mod host;
mod types;
mod error;
mod tokio_impl;
mod http;

pub use context::AnchorViewContext;
pub use fetch::{AssetFetcher, ProgressFn};
pub use host::{HostChannel, HostMessage, NullHost};
pub use types::{AnchorId, SceneNodeId};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use http::{HttpFetcher, HttpFetcherConfig};

// Re-exported so adapters agree on the URL type without a direct dependency.
pub use url::Url;
