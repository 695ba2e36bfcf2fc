//! Crate-wide error type.
//!
//! Every error kind the sequencer and the filter bank can raise has its own
//! variant. Subscribers on the event bus never see these values: failures are
//! logged or turned into `set_status_text` messages before they reach the bus.

use thiserror::Error;

/// Errors raised by the TeraPy core.
#[derive(Error, Debug)]
pub enum TerapyError {
    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("incompatible units: {from} cannot be converted to {to}")]
    IncompatibleUnits { from: String, to: String },

    #[error("invalid sequence: {0}")]
    SequenceInvalid(String),

    #[error("device {device} failed: {message}")]
    DeviceFailure { device: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("the {0} worker panicked")]
    WorkerPanic(&'static str),

    #[error("no file format could handle {0}")]
    FileFormatMismatch(String),

    #[error("config parse error: {0}")]
    ConfigParseError(String),

    #[error("filter {filter} failed: {message}")]
    Filter { filter: String, message: String },

    #[error("invalid filter order: {0}")]
    InvalidFilterOrder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl TerapyError {
    /// Shorthand for a [`TerapyError::DeviceFailure`].
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        TerapyError::DeviceFailure {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`TerapyError::Filter`].
    pub fn filter(filter: impl Into<String>, message: impl Into<String>) -> Self {
        TerapyError::Filter {
            filter: filter.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TerapyError>;
