pub mod mirror;
pub mod review_bundle;

pub use mirror::{mirror_artifact, MirrorResult};
pub use review_bundle::{CiState, GithubPrStatusProvider, PrStatusProvider, ReviewBundle, ReviewBundleBuilder};
