use thiserror::Error;

use crate::context::DeviceTarget;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{what}: expected shape {expected:?}, got {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("loss expects {expected} labels but received {found} labels")]
    LabelEncoding {
        expected: &'static str,
        found: &'static str,
    },

    #[error("label {label} is out of range for {num_classes} classes")]
    LabelOutOfRange { label: i64, num_classes: usize },

    #[error("device target {0} is not available with the ndarray backend")]
    UnsupportedDevice(DeviceTarget),

    #[error("unknown device target `{0}`")]
    UnknownDevice(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no gradient was recorded for the attacked inputs")]
    MissingGradient,

    #[error("failed to load configuration from {path}: {reason}")]
    ConfigLoad { path: String, reason: String },
}

impl Error {
    pub(crate) fn shape(what: &'static str, expected: &[usize], found: &[usize]) -> Self {
        Self::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}
