//! Common errors across the cmorize-rs crate

/// Errors related to working with CF time coordinates
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeError {
    #[error("Time units '{0}' are not of the form '<step> since <reference time>'")]
    BadUnitsFormat(String),
    #[error("Unknown time step '{step}' in time units '{units}'")]
    UnknownStep { step: String, units: String },
    #[error("Could not parse reference time '{0}'")]
    BadReferenceTime(String),
    #[error("Calendar '{0}' is not supported, only standard/gregorian/proleptic_gregorian calendars are")]
    UnsupportedCalendar(String),
    #[error("Time value {0} is outside the representable range of datetimes")]
    OutOfRange(f64),
}
