pub mod extractor;

use std::time::Duration;

pub use extractor::{LandmarkTemplates, OffsetCache, StateExtractor};

/// One validated reading. Recomputed from scratch every cycle; a new reading
/// fully replaces the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeetingReading {
    pub duration: Duration,
    pub participants: u32,
}

/// What one extraction cycle produced.
///
/// Only `Reading` and `ParticipantsWithheld` carry data; the rest are
/// recoverable conditions the control loop logs and retries next cycle
/// without clearing cached offsets. `ParticipantsWithheld` is an expected,
/// frequent outcome and must not be handled as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Reading(MeetingReading),
    /// A raised-hand overlay hides the participant count this cycle; the
    /// duration is still valid.
    ParticipantsWithheld { duration: Duration },
    /// A required landmark or text field could not be localized.
    NotFound(&'static str),
    /// A field was located but its recognized text failed validation.
    InvalidFormat(&'static str),
    /// The window precondition failed; no localization was attempted.
    NotReady,
}
