//! Analysis primitives shared by `triage`, `diff`, `grep`, and friends:
//! message normalization, parallel scan + merge, derived timing windows,
//! and cross-service correlation.

pub mod correlate;
pub mod normalize;
pub mod scan;
pub mod windows;

pub use normalize::{is_error, normalize_message};
pub use scan::{ShardResult, SignatureStats, TriageConfig};
