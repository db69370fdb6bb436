//! Types and traits for recording training metrics.
//!
//! [`Record`] is a flexible container of key-value pairs produced during
//! training and evaluation. Objects implementing [`Recorder`] receive records
//! and forward them to an output destination; [`NullRecorder`] discards them
//! and [`BufferedRecorder`] keeps them in memory for later inspection.
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::Recorder;
