//! Shared utilities: node id parsing, summary statistics, time formatting.

pub mod node_id;
pub mod stats;
pub mod time;

pub use node_id::{parse_node_id, NodeIdError};
pub use stats::{mean, median, percentile};
pub use time::{format_timestamp, parse_time_arg};
