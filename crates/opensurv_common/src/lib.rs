//! OpenSurv Common - self-update core for the OpenSurv manager daemon.
//!
//! Release checks against GitHub, archive download, installer staging,
//! the detached reconciliation run and the process handoff between them.

pub mod download;
pub mod error;
pub mod github_releases;
pub mod process;
pub mod updater;
pub mod version;

pub use download::ArtifactDownloader;
pub use error::{UpdateError, UpdateResult};
pub use github_releases::{GitHubAsset, GitHubRelease, ReleaseFetcher, ReleaseInfo, UpdateCheckResult};
pub use updater::*;
pub use version::{compare, compare_strict, Comparison, VersionIdentifier, VersionParseError};

/// Upstream project that publishes manager releases
pub const GITHUB_OWNER: &str = "BigTonyTones";
pub const GITHUB_REPO: &str = "Tonys-OpenSurv-Gui-Editor";

/// Version of this build
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
