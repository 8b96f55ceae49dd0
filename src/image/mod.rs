//! Image pull coordination and registry update checks.

mod dates;
mod puller;
mod remote;

pub use dates::parse_create_time;
pub use puller::{ImagePullService, PullProgress, classify_pull_error};
pub use remote::{RegistryError, RegistryInspector, RemoteImageCache, SkopeoInspector};
