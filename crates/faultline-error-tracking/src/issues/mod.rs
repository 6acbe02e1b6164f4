//! Issue status state machine

mod transitions;

pub use transitions::{
    classify_occurrence, is_regression, validate_status_change, OccurrenceOutcome,
};
