pub mod record;
pub mod batch;

pub use record::{parse_timestamp, Confidence, DayNight, EventRecord};
pub use batch::{Batch, BatchKind, BatchPayload, EndOfStream, EndReason, FireStatistics, PlaybackEvent};
