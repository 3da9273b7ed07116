// Infrastructure: storage, identity, media and request plumbing

pub mod database;
pub mod job_lock;
pub mod media;
pub mod middleware;
pub mod security;
pub mod viewer;

pub use database::MarketDatabase;
pub use job_lock::JobLock;
pub use media::{BlobStore, FsBlobStore, JpegThumbnailer, Thumbnailer};
pub use security::{AuthPayload, AuthTokens, SecurityService};
pub use viewer::ViewerContext;
