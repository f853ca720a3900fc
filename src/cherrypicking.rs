//! Cherry-picking: transfer selected parts from their storage plates into
//! target wells. Source locations come from a [`PositionLookup`].

use crate::error::WorklistError;
use crate::plates::{PlateFormat, PlatePosition};
use crate::worklist::{TransferOptions, Volume, Worklist};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

/// Resolves a part (and optionally one of its clones) to the rack holding it
/// and the human well label within that rack.
pub trait PositionLookup {
    fn position(&self, part: &str, clone: Option<&str>) -> Option<(String, String)>;

    /// Format of `rack`, if known.
    fn plate_format(&self, rack: &str) -> Option<PlateFormat>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PartLocation {
    pub part: String,
    #[serde(default)]
    pub clone: String,
    pub plate: String,
    pub position: String,
    #[serde(default)]
    pub wells: Option<usize>,
}

/// In-memory part index, keyed by part and clone (`"sb0101#2"`).
#[derive(Debug, Clone, Default)]
pub struct PartIndex {
    parts: HashMap<String, Vec<PartLocation>>,
    plates: HashMap<String, PlateFormat>,
}

fn split_key(part: &str, clone: Option<&str>) -> (String, Option<String>) {
    match part.split_once('#') {
        Some((p, c)) => (p.trim().to_ascii_lowercase(), Some(c.trim().to_string())),
        None => (
            part.trim().to_ascii_lowercase(),
            clone.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
        ),
    }
}

impl PartIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parts.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// All clones recorded for `part`.
    pub fn clones(&self, part: &str) -> &[PartLocation] {
        let (part, _) = split_key(part, None);
        self.parts.get(&part).map(|v| v.as_slice()).unwrap_or_default()
    }

    pub fn insert(&mut self, location: PartLocation) -> Result<()> {
        let wells = location.wells.unwrap_or(96);
        let format = PlateFormat::new(wells)
            .with_context(|| format!("plate '{}' of part '{}'", location.plate, location.part))?;
        match self.plates.get(&location.plate) {
            Some(known) if *known != format && location.wells.is_some() => {
                return Err(anyhow!(
                    "plate '{}' registered as {known}, not {format}",
                    location.plate
                ));
            }
            Some(_) => {}
            None => {
                self.plates.insert(location.plate.clone(), format);
            }
        }
        let (part, _) = split_key(&location.part, None);
        self.parts.entry(part).or_default().push(location);
        Ok(())
    }

    /// Reads CSV records with the columns `part`, `clone`, `plate`, `position`
    /// and optionally `wells`. Returns the number of records added.
    pub fn read_csv<R: Read>(&mut self, reader: R) -> Result<usize> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut n = 0;
        for (line, record) in rdr.deserialize::<PartLocation>().enumerate() {
            let location = record.with_context(|| format!("Malformed part record {}", line + 1))?;
            self.insert(location)?;
            n += 1;
        }
        Ok(n)
    }

    pub fn read_csv_path(&mut self, path: &str) -> Result<usize> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow!("Could not read part list '{path}': {e}"))?;
        let n = self.read_csv(file)?;
        debug!("Read {n} part record(s) from '{path}'");
        Ok(n)
    }
}

impl PositionLookup for PartIndex {
    fn position(&self, part: &str, clone: Option<&str>) -> Option<(String, String)> {
        let (part, clone) = split_key(part, clone);
        let entries = self.parts.get(&part)?;
        let found = match clone {
            Some(clone) => entries.iter().find(|e| e.clone == clone)?,
            None => entries.first()?,
        };
        Some((found.plate.clone(), found.position.clone()))
    }

    fn plate_format(&self, rack: &str) -> Option<PlateFormat> {
        self.plates.get(rack).copied()
    }
}

/// One part to be moved into a target well.
#[derive(Debug, Clone, PartialEq)]
pub struct CherryPick {
    pub part: String,
    pub clone: Option<String>,
    pub dst_rack: String,
    pub dst_position: PlatePosition,
    pub volume: Volume,
}

/// Emits one transfer per pick. All picks are resolved before the first line is
/// written; source wells are converted with the source plate's own format, target
/// wells with the worklist's default format. Returns the number of transfers.
pub fn cherry_pick(
    wl: &mut Worklist,
    lookup: &dyn PositionLookup,
    picks: &[CherryPick],
    opts: &TransferOptions,
) -> Result<usize, WorklistError> {
    let dst_format = wl.plate_format();
    let mut resolved = Vec::with_capacity(picks.len());
    for pick in picks {
        let (rack, human) = lookup
            .position(&pick.part, pick.clone.as_deref())
            .ok_or_else(|| {
                let key = match &pick.clone {
                    Some(clone) => format!("{}#{clone}", pick.part),
                    None => pick.part.clone(),
                };
                WorklistError::UnknownPart(key)
            })?;
        let src_format = lookup.plate_format(&rack).unwrap_or(dst_format);
        let src_pos = src_format.human2int(human.as_str())?;
        let dst_pos = dst_format.human2int(&pick.dst_position)?;
        resolved.push((rack, src_pos, dst_pos, pick));
    }

    for (rack, src_pos, dst_pos, pick) in &resolved {
        wl.transfer(rack, *src_pos, &pick.dst_rack, *dst_pos, pick.volume, opts)?;
    }
    Ok(resolved.len())
}
