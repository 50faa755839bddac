//! Downstream tooling over a capture directory: grep, export, slice, merge,
//! diff/baseline comparison.

pub mod diff;
pub mod export;
pub mod grep;
pub mod merge;
pub mod slice;

pub use diff::{baseline_diff, diff as diff_captures};
pub use export::{CsvWriter, ExportWriter, JsonlWriter};
pub use grep::grep;
pub use merge::merge;
pub use slice::slice;
