//! Microplate formats and conversion between well coordinate systems.
//!
//! Three representations address the same well:
//!
//! * human labels such as `"H12"` (row letter + 1-based column number),
//! * linear Tecan positions, 1-based and column-major (`"B1"` is 2, `"A2"` is 9 on a 96-well plate),
//! * 0-based `(row, col)` grid indices.
//!
//! ```
//! use evoware::plates::PlateFormat;
//!
//! let f = PlateFormat::new(96).unwrap();
//! assert_eq!((f.nx(), f.ny()), (12, 8));
//! assert_eq!(f.human2int("A2").unwrap(), 9);
//! assert_eq!(f.human2int("h12").unwrap(), 96);
//! assert_eq!(f.int2human(96).unwrap(), "H12");
//! ```

use crate::error::FormatError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    // Prefix match: trailing text after the digits is ignored.
    static ref HUMAN_POSITION: Regex =
        Regex::new(r"^([A-Za-z]{0,2})([0-9]+)").expect("static well pattern");
}

/// A well reference whose interpretation is explicit: either an already linear
/// Tecan position or a human label that still needs parsing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlatePosition {
    Index(usize),
    Label(String),
}

impl From<usize> for PlatePosition {
    fn from(pos: usize) -> Self {
        Self::Index(pos)
    }
}

impl From<&str> for PlatePosition {
    fn from(label: &str) -> Self {
        Self::Label(label.to_string())
    }
}

impl From<String> for PlatePosition {
    fn from(label: String) -> Self {
        Self::Label(label)
    }
}

impl From<&PlatePosition> for PlatePosition {
    fn from(pos: &PlatePosition) -> Self {
        pos.clone()
    }
}

impl FromStr for PlatePosition {
    type Err = std::convert::Infallible;

    /// Pure digit strings become [`PlatePosition::Index`], anything else a label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.parse::<usize>() {
            Ok(n) => Ok(Self::Index(n)),
            Err(_) => Ok(Self::Label(trimmed.to_string())),
        }
    }
}

impl fmt::Display for PlatePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(n) => write!(f, "{n}"),
            Self::Label(label) => write!(f, "{label}"),
        }
    }
}

/// Converts a row letter sequence to its 1-based row number (`A` = 1, `Z` = 26, `AA` = 27).
fn row_from_letters(letters: &str) -> usize {
    letters
        .bytes()
        .fold(0, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A') as usize + 1)
}

/// Inverse of [`row_from_letters`] for a 0-based row index.
fn row_letters(row: usize) -> String {
    let mut n = row + 1;
    let mut ret = Vec::with_capacity(2);
    while n > 0 {
        n -= 1;
        ret.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    ret.reverse();
    String::from_utf8_lossy(&ret).into_owned()
}

#[derive(Deserialize)]
struct PlateFormatDef {
    n: usize,
    #[serde(default)]
    nx: Option<usize>,
    #[serde(default)]
    ny: Option<usize>,
}

impl TryFrom<PlateFormatDef> for PlateFormat {
    type Error = FormatError;

    fn try_from(def: PlateFormatDef) -> Result<Self, Self::Error> {
        PlateFormat::with_dimensions(def.n, def.nx, def.ny)
    }
}

/// Plate dimensions: `n` wells in `nx` columns and `ny` rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PlateFormatDef")]
pub struct PlateFormat {
    n: usize,
    nx: usize,
    ny: usize,
}

impl PlateFormat {
    /// Plate with `n` wells. Columns and rows follow a 3 : 2 ratio, which gives
    /// the expected layout for 1, 2, 6, 12, 24, 48, 96, 384 and 1536 wells.
    pub fn new(n: usize) -> Result<Self, FormatError> {
        Self::with_dimensions(n, None, None)
    }

    /// Plate with explicit column and/or row count. A missing (or zero) `nx`
    /// is derived from `n`, a missing `ny` from `n / nx`.
    pub fn with_dimensions(
        n: usize,
        nx: Option<usize>,
        ny: Option<usize>,
    ) -> Result<Self, FormatError> {
        let nx = nx
            .filter(|&nx| nx > 0)
            .unwrap_or_else(|| (1.5 * n as f64).sqrt().round() as usize);
        let ny = ny.filter(|&ny| ny > 0).unwrap_or_else(|| {
            if nx == 0 {
                0
            } else {
                (n as f64 / nx as f64).round() as usize
            }
        });

        if n == 0 || nx.checked_mul(ny) != Some(n) {
            return Err(FormatError::InvalidDimensions { n, nx, ny });
        }
        Ok(Self { n, nx, ny })
    }

    /// Total number of wells.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of columns.
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Number of rows.
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// All linear positions of the plate, `1..=n`.
    pub fn positions(&self) -> std::ops::RangeInclusive<usize> {
        1..=self.n
    }

    /// Splits a human label into its uppercase row letter(s) and column number.
    /// The letter part is empty for pure numbers. Returns `None` if the text
    /// does not start with `[A-Za-z]{0,2}[0-9]+`.
    pub fn parse_human(text: &str) -> Option<(String, usize)> {
        let caps = HUMAN_POSITION.captures(text.trim())?;
        let letter = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let number = caps.get(2)?.as_str().parse::<usize>().ok()?;
        Some((letter.to_ascii_uppercase(), number))
    }

    /// Converts a position to Tecan numbering (`"B1"` => 2, `"A2"` => 9 on 96 wells).
    /// Bare indices and letter-less labels are taken as linear positions verbatim.
    pub fn human2int<P: Into<PlatePosition>>(&self, pos: P) -> Result<usize, FormatError> {
        let pos = pos.into();
        let r = match &pos {
            PlatePosition::Index(n) => *n,
            PlatePosition::Label(label) => {
                let (letter, number) = Self::parse_human(label)
                    .ok_or_else(|| FormatError::InvalidPosition(label.clone()))?;
                if letter.is_empty() {
                    number
                } else {
                    let row = row_from_letters(&letter);
                    if row > self.ny {
                        return Err(FormatError::InvalidRow(letter));
                    }
                    if number == 0 {
                        return Err(FormatError::InvalidPosition(label.clone()));
                    }
                    // Saturates for huge column numbers, which the range check below rejects.
                    (number - 1).saturating_mul(self.ny).saturating_add(row)
                }
            }
        };

        if r > self.n {
            return Err(FormatError::PositionExceedsWells {
                position: r,
                wells: self.n,
            });
        }
        if r == 0 {
            return Err(FormatError::InvalidPosition(pos.to_string()));
        }
        Ok(r)
    }

    /// Converts a Tecan position into a human label such as `"A1"` or `"H12"`.
    pub fn int2human(&self, pos: usize) -> Result<String, FormatError> {
        if pos == 0 {
            return Err(FormatError::InvalidPosition(pos.to_string()));
        }
        let col = (pos - 1) / self.ny;
        let row = (pos - 1) % self.ny;

        if col + 1 > self.nx || row >= self.ny {
            return Err(FormatError::OutsidePlate { position: pos });
        }
        Ok(format!("{}{}", row_letters(row), col + 1))
    }

    /// 0-based `(row, col)` to Tecan position.
    pub fn gridindex2int(&self, row: usize, col: usize) -> usize {
        col * self.ny + row + 1
    }

    /// Tecan position to 0-based `(row, col)`.
    pub fn int2gridindex(&self, pos: usize) -> Result<(usize, usize), FormatError> {
        self.check_linear(pos)?;
        let col = pos.div_ceil(self.ny) - 1;
        // 1-based numbering: the last row of each column has remainder 0
        let row = match pos % self.ny {
            0 => self.ny - 1,
            r => r - 1,
        };
        Ok((row, col))
    }

    pub fn human2index<P: Into<PlatePosition>>(
        &self,
        pos: P,
    ) -> Result<(usize, usize), FormatError> {
        let pos = self.human2int(pos)?;
        self.int2gridindex(pos)
    }

    /// Positions on the same row, starting at `pos` and moving right.
    pub fn right_on_row<P: Into<PlatePosition>>(
        &self,
        pos: P,
    ) -> Result<Vec<usize>, FormatError> {
        let pos = self.human2int(pos)?;
        Ok((pos..=self.n).step_by(self.ny).collect())
    }

    /// Positions on the same column, starting at `pos` and moving down.
    pub fn down_on_column<P: Into<PlatePosition>>(
        &self,
        pos: P,
    ) -> Result<Vec<usize>, FormatError> {
        let pos = self.human2int(pos)?;
        let last = pos.div_ceil(self.ny) * self.ny;
        Ok((pos..=last.min(self.n)).collect())
    }

    fn check_linear(&self, pos: usize) -> Result<(), FormatError> {
        if pos == 0 {
            return Err(FormatError::InvalidPosition(pos.to_string()));
        }
        if pos > self.n {
            return Err(FormatError::PositionExceedsWells {
                position: pos,
                wells: self.n,
            });
        }
        Ok(())
    }
}

impl Default for PlateFormat {
    /// The 96-well standard plate, 12 columns by 8 rows.
    fn default() -> Self {
        Self {
            n: 96,
            nx: 12,
            ny: 8,
        }
    }
}

impl fmt::Display for PlateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} well PlateFormat", self.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STANDARD: [usize; 6] = [6, 12, 24, 96, 384, 1536];

    #[test]
    fn test_plateformat_init() {
        let expected_nx = [3, 4, 6, 12, 24, 48];
        for (n, nx) in STANDARD.iter().zip(expected_nx) {
            let f = PlateFormat::new(*n).unwrap();
            assert_eq!(f.n(), f.nx() * f.ny(), "plate format error");
            assert_eq!(f.nx(), nx, "{n}-well definition error");
        }
    }

    #[test]
    fn test_plateformat_invalid_dimensions() {
        let err = PlateFormat::with_dimensions(96, Some(10), Some(10)).unwrap_err();
        assert_eq!(
            err,
            FormatError::InvalidDimensions {
                n: 96,
                nx: 10,
                ny: 10
            }
        );
        assert!(PlateFormat::new(0).is_err());
        assert!(PlateFormat::with_dimensions(96, Some(7), None).is_err());
    }

    #[test]
    fn test_plateformat_huge_dimensions() {
        assert!(matches!(
            PlateFormat::with_dimensions(96, Some(usize::MAX), Some(2)),
            Err(FormatError::InvalidDimensions { n: 96, .. })
        ));
        let def = r#"{"n": 96, "nx": 18446744073709551615, "ny": 2}"#;
        assert!(serde_json::from_str::<PlateFormat>(def).is_err());
    }

    #[test]
    fn test_human2int_huge_column_number() {
        let f = PlateFormat::new(96).unwrap();
        assert!(matches!(
            f.human2int("A9223372036854775809"),
            Err(FormatError::PositionExceedsWells { wells: 96, .. })
        ));
        assert!(matches!(
            f.human2int("H18446744073709551615"),
            Err(FormatError::PositionExceedsWells { wells: 96, .. })
        ));
        let f = PlateFormat::new(1536).unwrap();
        assert_eq!(
            f.human2int("AG1"),
            Err(FormatError::InvalidRow("AG".to_string()))
        );
    }

    #[test]
    fn test_plateformat_explicit_dimensions() {
        let f = PlateFormat::with_dimensions(96, Some(1), Some(96)).unwrap();
        assert_eq!((f.nx(), f.ny()), (1, 96));
        let f = PlateFormat::with_dimensions(96, None, Some(8)).unwrap();
        assert_eq!(f.nx(), 12);
    }

    #[test]
    fn test_parse_human() {
        assert_eq!(PlateFormat::parse_human("b12"), Some(("B".to_string(), 12)));
        assert_eq!(PlateFormat::parse_human("17"), Some((String::new(), 17)));
        assert_eq!(PlateFormat::parse_human("A1x"), Some(("A".to_string(), 1)));
        assert_eq!(PlateFormat::parse_human("af3"), Some(("AF".to_string(), 3)));
        assert_eq!(PlateFormat::parse_human("A"), None);
        assert_eq!(PlateFormat::parse_human("?1"), None);
        assert_eq!(PlateFormat::parse_human(""), None);
    }

    #[test]
    fn test_plateformat_pos2int() {
        let f = PlateFormat::new(96).unwrap();
        assert_eq!(f.human2int("A1").unwrap(), 1);
        assert_eq!(f.human2int("H1").unwrap(), 8);
        assert_eq!(f.human2int("b1").unwrap(), 2);
        assert_eq!(f.human2int("A2").unwrap(), 9);
        assert_eq!(f.human2int("A12").unwrap(), 89);
        assert_eq!(f.human2int("h12").unwrap(), 96);
        assert_eq!(f.human2int("42").unwrap(), 42);
        assert_eq!(f.human2int(PlatePosition::Index(17)).unwrap(), 17);
    }

    #[test]
    fn test_human2int_case_insensitive() {
        let f = PlateFormat::new(1536).unwrap();
        for row in 0..26u8 {
            let upper = format!("{}7", (b'A' + row) as char);
            let lower = upper.to_ascii_lowercase();
            assert_eq!(f.human2int(upper.as_str()), f.human2int(lower.as_str()));
        }
    }

    #[test]
    fn test_human2int_rejects_out_of_range() {
        for n in STANDARD {
            let f = PlateFormat::new(n).unwrap();
            assert!(matches!(
                f.human2int(n + 1),
                Err(FormatError::PositionExceedsWells { .. })
            ));
            assert!(matches!(
                f.human2int(0usize),
                Err(FormatError::InvalidPosition(_))
            ));
            assert!(f.human2int("A0").is_err());
        }
        let f = PlateFormat::new(96).unwrap();
        assert_eq!(f.human2int("I1"), Err(FormatError::InvalidRow("I".to_string())));
        assert!(matches!(
            f.human2int("A13"),
            Err(FormatError::PositionExceedsWells { .. })
        ));
        assert!(matches!(
            f.human2int("well"),
            Err(FormatError::InvalidPosition(_))
        ));
    }

    #[test]
    fn test_plateformat_human2int() {
        let f = PlateFormat::new(96).unwrap();
        for t in ["A1", "B1", "H1", "A2", "B2", "H2", "A12", "B12", "H12"] {
            let pos = f.human2int(t).unwrap();
            assert_eq!(f.int2human(pos).unwrap(), t);
        }
    }

    #[test]
    fn test_int2human_1536_double_letters() {
        let f = PlateFormat::new(1536).unwrap();
        assert_eq!(f.int2human(26).unwrap(), "Z1");
        assert_eq!(f.int2human(27).unwrap(), "AA1");
        assert_eq!(f.int2human(32).unwrap(), "AF1");
        assert_eq!(f.int2human(1536).unwrap(), "AF48");
        assert_eq!(f.human2int("AF48").unwrap(), 1536);
    }

    #[test]
    fn test_int2human_outside_plate() {
        let f = PlateFormat::new(24).unwrap();
        assert!(matches!(
            f.int2human(25),
            Err(FormatError::OutsidePlate { position: 25 })
        ));
        assert!(f.int2human(0).is_err());
    }

    #[test]
    fn test_gridindex2int() {
        let p = PlateFormat::new(96).unwrap();
        assert_eq!(p.gridindex2int(0, 0), 1);
        assert_eq!(p.gridindex2int(7, 0), 8);
        assert_eq!(p.gridindex2int(0, 1), 9);
        assert_eq!(p.gridindex2int(7, 1), 16);
        assert_eq!(p.gridindex2int(7, 2), 24);
        assert_eq!(p.gridindex2int(3, 2), 20);
        assert_eq!(p.gridindex2int(7, 5), 48);
    }

    #[test]
    fn test_int2gridindex_column_boundaries() {
        let p = PlateFormat::new(96).unwrap();
        assert_eq!(p.int2gridindex(1).unwrap(), (0, 0));
        assert_eq!(p.int2gridindex(8).unwrap(), (7, 0));
        assert_eq!(p.int2gridindex(9).unwrap(), (0, 1));
        assert_eq!(p.int2gridindex(96).unwrap(), (7, 11));
        assert!(p.int2gridindex(0).is_err());
        assert!(p.int2gridindex(97).is_err());
        assert_eq!(p.human2index("C5").unwrap(), (2, 4));
    }

    #[test]
    fn test_right_on_row_and_down_on_column() {
        let p = PlateFormat::new(24).unwrap();
        assert_eq!(p.right_on_row(1usize).unwrap(), vec![1, 5, 9, 13, 17, 21]);
        assert_eq!(p.right_on_row("B5").unwrap(), vec![18, 22]);
        assert_eq!(p.down_on_column(1usize).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(p.down_on_column("C6").unwrap(), vec![23, 24]);
        assert_eq!(p.down_on_column(24usize).unwrap(), vec![24]);
        assert!(p.right_on_row(25usize).is_err());
    }

    #[test]
    fn test_plateformat_eq() {
        let f1 = PlateFormat::new(96).unwrap();
        let f2 = PlateFormat::new(96).unwrap();
        let f3 = PlateFormat::with_dimensions(96, Some(1), Some(96)).unwrap();
        assert_eq!(f1, f2);
        assert_ne!(f2, f3);
        assert_eq!(f1.to_string(), "96 well PlateFormat");
    }

    #[test]
    fn test_plateformat_serde_validates() {
        let f: PlateFormat = serde_json::from_str(r#"{"n": 384}"#).unwrap();
        assert_eq!((f.nx(), f.ny()), (24, 16));
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, r#"{"n":384,"nx":24,"ny":16}"#);
        assert!(serde_json::from_str::<PlateFormat>(r#"{"n": 96, "nx": 5}"#).is_err());
    }

    #[test]
    fn test_plate_position_from_str() {
        assert_eq!("12".parse::<PlatePosition>().unwrap(), PlatePosition::Index(12));
        assert_eq!(
            "c3".parse::<PlatePosition>().unwrap(),
            PlatePosition::Label("c3".to_string())
        );
        let pos: PlatePosition = serde_json::from_str("\"A1\"").unwrap();
        assert_eq!(pos, PlatePosition::Label("A1".to_string()));
        let pos: PlatePosition = serde_json::from_str("5").unwrap();
        assert_eq!(pos, PlatePosition::Index(5));
    }
}
