//! Helm release engine
//!
//! - [`overlay`]: `--set` flags, including values preserved from secrets
//! - [`release`]: Tiller bootstrap and install/upgrade of single releases
//! - [`readiness`]: pod polling after every install or upgrade

pub mod overlay;
pub mod readiness;
pub mod release;

pub use overlay::{assemble_overlay, Overlay};
pub use readiness::{ReadinessPoller, ReadinessSnapshot};
pub use release::{ReleaseDescriptor, ReleaseManager, ReleaseMode};
