use crate::error::{EvowareError, WorklistError};
use crate::plates::PlateFormat;
use serde::{Deserialize, Serialize};

/// Plate formats a worklist can use for column transfers.
pub const ALLOWED_PLATES: [usize; 6] = [6, 12, 24, 96, 384, 1536];

/// Row count for each entry of [`ALLOWED_PLATES`].
pub fn plate_rows(wells: usize) -> Option<usize> {
    match wells {
        6 => Some(2),
        12 => Some(3),
        24 => Some(4),
        96 => Some(8),
        384 => Some(16),
        1536 => Some(32),
        _ => None,
    }
}

/// Validates `wells` against [`ALLOWED_PLATES`] and returns the matching format,
/// rows taken from the fixed table and `columns = wells / rows`.
pub fn worklist_plate_format(wells: usize) -> Result<PlateFormat, WorklistError> {
    let rows = plate_rows(wells).ok_or(WorklistError::UnsupportedPlateFormat(wells))?;
    Ok(PlateFormat::with_dimensions(
        wells,
        Some(wells / rows),
        Some(rows),
    )?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    Lf,
    Crlf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }
}

impl Default for LineEnding {
    fn default() -> Self {
        if cfg!(windows) { Self::Crlf } else { Self::Lf }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorklistConfig {
    /// Default plate format (number of wells) for column transfers.
    pub plate_wells: usize,
    /// Liquid class used when a command does not name one.
    pub liquid_class: Option<String>,
    /// Hand errors raised inside [`crate::worklist::Worklist::scoped`] to the notifier.
    pub report_errors: bool,
    pub line_ending: LineEnding,
}

impl Default for WorklistConfig {
    fn default() -> Self {
        Self {
            plate_wells: 96,
            liquid_class: None,
            report_errors: false,
            line_ending: LineEnding::default(),
        }
    }
}

impl WorklistConfig {
    pub fn load_from_path(path: &str) -> Result<Self, EvowareError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.plate_format()?;
        Ok(config)
    }

    pub fn plate_format(&self) -> Result<PlateFormat, WorklistError> {
        worklist_plate_format(self.plate_wells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_allowed_plate_formats() {
        for wells in ALLOWED_PLATES {
            let f = worklist_plate_format(wells).unwrap();
            assert_eq!(f.n(), wells);
            assert_eq!(f.ny(), plate_rows(wells).unwrap());
            assert_eq!(f.nx() * f.ny(), wells);
        }
        assert_eq!(worklist_plate_format(384).unwrap().nx(), 24);
    }

    #[test]
    fn test_unsupported_plate_format() {
        assert!(matches!(
            worklist_plate_format(48),
            Err(WorklistError::UnsupportedPlateFormat(48))
        ));
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: WorklistConfig =
            serde_json::from_str(r#"{"liquid_class": "Water free"}"#).unwrap();
        assert_eq!(config.plate_wells, 96);
        assert_eq!(config.liquid_class.as_deref(), Some("Water free"));
        assert!(!config.report_errors);
    }

    #[test]
    fn test_load_from_path_rejects_unsupported_plate() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"plate_wells": 100, "line_ending": "crlf"}}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();
        assert!(matches!(
            WorklistConfig::load_from_path(&path),
            Err(EvowareError::Worklist(WorklistError::UnsupportedPlateFormat(100)))
        ));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"plate_wells": 384, "line_ending": "crlf"}}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();
        let config = WorklistConfig::load_from_path(&path).unwrap();
        assert_eq!(config.line_ending, LineEnding::Crlf);
        assert_eq!(config.plate_format().unwrap().ny(), 16);
    }
}
