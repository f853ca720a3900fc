use thiserror::Error;

/// Plate geometry and well coordinate violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid plate format: {nx} x {ny} != {n}")]
    InvalidDimensions { n: usize, nx: usize, ny: usize },

    #[error("plate position {position} exceeds number of wells ({wells})")]
    PositionExceedsWells { position: usize, wells: usize },

    #[error("invalid plate position: {0:?}")]
    InvalidPosition(String),

    #[error("position {position} outside plate dimensions")]
    OutsidePlate { position: usize },

    #[error("row '{0}' is not a valid plate row")]
    InvalidRow(String),
}

/// Violations of the worklist command grammar or writer lifecycle.
#[derive(Debug, Error)]
pub enum WorklistError {
    #[error("Specify either {role} labware ID or rack label.")]
    MissingRack { role: &'static str },

    #[error("plate format {0} is not supported")]
    UnsupportedPlateFormat(usize),

    #[error("volume must be a positive finite number, got {0}")]
    InvalidVolume(f64),

    #[error("no source position known for part '{0}'")]
    UnknownPart(String),

    #[error("worklist '{0}' is already closed")]
    Closed(String),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("could not write worklist: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EvowareError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Worklist(#[from] WorklistError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
