//! Analyzer output parsing
//!
//! Turns the text report printed by `tsp` (bitrate monitor lines, PMT and SDT
//! table dumps, continuity warnings) into [`StreamSnapshot`] values. Parsing is
//! pure: the same window of text always yields the same snapshot contents.
//!
//! [`StreamSnapshot`]: crate::models::StreamSnapshot

pub mod stream_types;
pub mod tsp_report;

pub use stream_types::resolve_stream_type;
pub use tsp_report::{parse_report, REPORT_MARKER};
