//! Evoware worklist (`.gwl`) generation.
//!
//! A [`Worklist`] accumulates one line per pipetting command and writes them,
//! in call order, to its target. Lines are never rewritten once emitted.
//!
//! ```
//! use evoware::worklist::{PipetteStep, Worklist};
//!
//! let mut wl = Worklist::in_memory();
//! wl.aspirate(&PipetteStep::rack_id("Src1", 1, 25.0)).unwrap();
//! wl.dispense(&PipetteStep::rack_id("Dst1", 96, 25.0), true).unwrap();
//! wl.close().unwrap();
//! assert_eq!(wl.lines().collect::<Vec<_>>(), ["A;;Src1;;1;;25;", "D;;Dst1;;96;;25;", "W;"]);
//! ```
//!
//! The target is opened with the first emitted line and closed exactly once,
//! either by [`Worklist::close`], by [`Worklist::scoped`] or on drop.

use crate::config::{worklist_plate_format, LineEnding, WorklistConfig};
use crate::error::{FormatError, WorklistError};
use crate::plates::PlateFormat;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

pub type Volume = f64;

/// Where emitted lines end up.
pub enum WorklistTarget {
    /// Keep lines in memory only.
    Memory,
    /// Create (or truncate) this file with the first emitted line.
    Path(PathBuf),
    Writer(Box<dyn Write + Send>),
}

impl WorklistTarget {
    fn name(&self) -> Option<String> {
        match self {
            Self::Memory => None,
            Self::Path(path) => Some(path.display().to_string()),
            Self::Writer(_) => Some("<writer>".to_string()),
        }
    }
}

impl fmt::Debug for WorklistTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "Memory"),
            Self::Path(path) => write!(f, "Path({path:?})"),
            Self::Writer(_) => write!(f, "Writer(..)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    Unopened,
    Open,
    Closed,
}

/// User-facing error report, e.g. a modal dialog with title and message.
pub trait Notifier {
    fn notify(&self, title: &str, message: &str);
}

/// Reports through the `tracing` error log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, title: &str, message: &str) {
        tracing::error!(title, "{message}");
    }
}

/// Fields of a single aspirate (`A`) or dispense (`D`) line.
#[derive(Clone, Debug, PartialEq)]
pub struct PipetteStep {
    pub rack_label: String,
    pub rack_id: String,
    pub rack_type: String,
    pub position: usize,
    pub tube_id: String,
    pub volume: Volume,
    /// Falls back to the worklist default liquid class.
    pub liquid_class: Option<String>,
    /// Only written when set; its absence removes the field.
    pub tip_mask: Option<u8>,
}

impl Default for PipetteStep {
    fn default() -> Self {
        Self {
            rack_label: String::new(),
            rack_id: String::new(),
            rack_type: String::new(),
            position: 1,
            tube_id: String::new(),
            volume: 0.0,
            liquid_class: None,
            tip_mask: None,
        }
    }
}

impl PipetteStep {
    /// Step addressing the labware by its barcode / rack ID.
    pub fn rack_id(rack_id: &str, position: usize, volume: Volume) -> Self {
        Self {
            rack_id: rack_id.to_string(),
            position,
            volume,
            ..Self::default()
        }
    }

    /// Step addressing the labware by its worktable label.
    pub fn rack_label(rack_label: &str, position: usize, volume: Volume) -> Self {
        Self {
            rack_label: rack_label.to_string(),
            position,
            volume,
            ..Self::default()
        }
    }

    pub fn rack(rack: &str, position: usize, volume: Volume, by_label: bool) -> Self {
        if by_label {
            Self::rack_label(rack, position, volume)
        } else {
            Self::rack_id(rack, position, volume)
        }
    }

    pub fn with_rack_type(mut self, rack_type: &str) -> Self {
        self.rack_type = rack_type.to_string();
        self
    }

    pub fn with_tube_id(mut self, tube_id: &str) -> Self {
        self.tube_id = tube_id.to_string();
        self
    }

    pub fn with_liquid_class(mut self, liquid_class: Option<&str>) -> Self {
        self.liquid_class = liquid_class.map(|s| s.to_string());
        self
    }

    pub fn with_tip_mask(mut self, tip_mask: Option<u8>) -> Self {
        self.tip_mask = tip_mask;
        self
    }
}

/// Reagent distribution (`R`) parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Distribution {
    pub src_rack_label: String,
    pub src_rack_id: String,
    pub src_rack_type: String,
    pub src_start: usize,
    pub src_end: usize,
    pub dst_rack_label: String,
    pub dst_rack_id: String,
    pub dst_rack_type: String,
    pub dst_start: usize,
    pub dst_end: usize,
    pub volume: Volume,
    pub liquid_class: Option<String>,
    /// 1 = no DiTi re-use.
    pub n_diti_reuses: u32,
    /// 1 = no multi-dispensing.
    pub n_multi_disp: u32,
    /// 0 = left to right.
    pub direction: u8,
    /// Destination wells to skip.
    pub exclude_wells: Vec<usize>,
}

impl Default for Distribution {
    fn default() -> Self {
        Self {
            src_rack_label: String::new(),
            src_rack_id: String::new(),
            src_rack_type: String::new(),
            src_start: 1,
            src_end: 96,
            dst_rack_label: String::new(),
            dst_rack_id: String::new(),
            dst_rack_type: String::new(),
            dst_start: 1,
            dst_end: 96,
            volume: 0.0,
            liquid_class: None,
            n_diti_reuses: 1,
            n_multi_disp: 1,
            direction: 0,
            exclude_wells: vec![],
        }
    }
}

/// Optional parameters shared by [`Worklist::transfer`] and [`Worklist::transfer_column`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransferOptions {
    pub src_rack_type: String,
    pub dst_rack_type: String,
    pub liquid_class: Option<String>,
    pub tip_mask: Option<u8>,
    /// Emit `W;` after every dispense.
    pub wash: bool,
    /// Address racks by label instead of ID.
    pub by_label: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            src_rack_type: String::new(),
            dst_rack_type: String::new(),
            liquid_class: None,
            tip_mask: None,
            wash: true,
            by_label: false,
        }
    }
}

/// One aspiration distributed over several destination wells, split into
/// as many aspirate cycles as the tip capacity requires.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiDispense {
    pub src_label: String,
    pub src_position: usize,
    pub dst_label: String,
    /// Destination wells, dispensed in this order.
    pub dst_positions: Vec<usize>,
    /// Volume per destination well.
    pub volume: Volume,
    /// Maximal volume per aspiration.
    pub tip_volume: Volume,
    pub liquid_class: Option<String>,
    pub tip_mask: Option<u8>,
    /// Replace the tip after all dispenses.
    pub wash: bool,
    /// Flush between aspirate cycles.
    pub flush: bool,
}

impl Default for MultiDispense {
    fn default() -> Self {
        Self {
            src_label: String::new(),
            src_position: 1,
            dst_label: String::new(),
            dst_positions: vec![],
            volume: 0.0,
            tip_volume: 900.0,
            liquid_class: None,
            tip_mask: None,
            wash: true,
            flush: true,
        }
    }
}

fn strip_line_breaks(text: &str) -> String {
    text.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

fn check_volume(volume: Volume) -> Result<(), WorklistError> {
    if !volume.is_finite() || volume < 0.0 {
        return Err(WorklistError::InvalidVolume(volume));
    }
    Ok(())
}

/// Evoware worklist writer.
pub struct Worklist {
    target: Option<WorklistTarget>,
    sink: Option<Box<dyn Write + Send>>,
    name: Option<String>,
    state: SinkState,
    buffer: String,
    plate: PlateFormat,
    default_liquid_class: Option<String>,
    report_errors: bool,
    line_ending: LineEnding,
}

impl Worklist {
    /// Worklist for a 96-well default plate without default liquid class.
    pub fn new(target: WorklistTarget) -> Self {
        Self {
            name: target.name(),
            target: Some(target),
            sink: None,
            state: SinkState::Unopened,
            buffer: String::new(),
            plate: PlateFormat::default(),
            default_liquid_class: None,
            report_errors: false,
            line_ending: LineEnding::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(WorklistTarget::Memory)
    }

    pub fn to_path<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(WorklistTarget::Path(path.into()))
    }

    pub fn from_config(
        target: WorklistTarget,
        config: &WorklistConfig,
    ) -> Result<Self, WorklistError> {
        Ok(Self::new(target)
            .with_plate_format(config.plate_wells)?
            .with_liquid_class(config.liquid_class.as_deref())
            .with_report_errors(config.report_errors)
            .with_line_ending(config.line_ending))
    }

    /// Replaces the default plate format used by column transfers.
    /// Only the formats in [`crate::config::ALLOWED_PLATES`] are accepted.
    pub fn with_plate_format(mut self, wells: usize) -> Result<Self, WorklistError> {
        self.plate = worklist_plate_format(wells)?;
        Ok(self)
    }

    pub fn with_liquid_class(mut self, liquid_class: Option<&str>) -> Self {
        self.default_liquid_class = liquid_class.map(|s| s.to_string());
        self
    }

    pub fn with_report_errors(mut self, report_errors: bool) -> Self {
        self.report_errors = report_errors;
        self
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SinkState::Closed
    }

    pub fn plate_format(&self) -> PlateFormat {
        self.plate
    }

    pub fn rows(&self) -> usize {
        self.plate.ny()
    }

    pub fn columns(&self) -> usize {
        self.plate.nx()
    }

    pub fn default_liquid_class(&self) -> Option<&str> {
        self.default_liquid_class.as_deref()
    }

    pub fn report_errors(&self) -> bool {
        self.report_errors
    }

    /// Everything emitted so far, including line breaks.
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn lines(&self) -> std::str::Lines<'_> {
        self.buffer.lines()
    }

    pub fn line_count(&self) -> usize {
        self.buffer.lines().count()
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<memory>".to_string())
    }

    fn open(&mut self) -> Result<(), WorklistError> {
        match self.state {
            SinkState::Open => return Ok(()),
            SinkState::Closed => return Err(WorklistError::Closed(self.display_name())),
            SinkState::Unopened => {}
        }
        self.sink = match self.target.take() {
            Some(WorklistTarget::Path(path)) => {
                debug!("Creating worklist file '{}'", path.display());
                Some(Box::new(BufWriter::new(File::create(&path)?)))
            }
            Some(WorklistTarget::Writer(writer)) => Some(writer),
            Some(WorklistTarget::Memory) | None => None,
        };
        self.state = SinkState::Open;
        Ok(())
    }

    /// Appends complete lines. Either all lines are emitted or none.
    fn emit<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<(), WorklistError> {
        self.open()?;
        let ending = self.line_ending.as_str();
        let mut chunk = String::new();
        for line in lines {
            chunk.push_str(line.as_ref());
            chunk.push_str(ending);
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.write_all(chunk.as_bytes())?;
        }
        self.buffer.push_str(&chunk);
        Ok(())
    }

    fn transfer_line(
        &self,
        tag: &str,
        role: &'static str,
        step: &PipetteStep,
    ) -> Result<String, WorklistError> {
        if step.rack_label.is_empty() && step.rack_id.is_empty() {
            return Err(WorklistError::MissingRack { role });
        }
        check_volume(step.volume)?;

        let liquid_class = step
            .liquid_class
            .as_deref()
            .or(self.default_liquid_class.as_deref())
            .unwrap_or_default();

        let mut fields = vec![
            tag.to_string(),
            strip_line_breaks(&step.rack_label),
            strip_line_breaks(&step.rack_id),
            strip_line_breaks(&step.rack_type),
            step.position.to_string(),
            strip_line_breaks(&step.tube_id),
            step.volume.to_string(),
            strip_line_breaks(liquid_class),
        ];
        if let Some(tip_mask) = step.tip_mask {
            fields.push(tip_mask.to_string());
        }
        Ok(fields.join(";"))
    }

    /// `A;<rackLabel>;<rackID>;<rackType>;<position>;<tubeID>;<volume>;<liquidClass>[;<tipMask>]`
    pub fn aspirate(&mut self, step: &PipetteStep) -> Result<(), WorklistError> {
        let line = self.transfer_line("A", "source", step)?;
        self.emit(&[line])
    }

    /// Same layout as [`Self::aspirate`] with tag `D`, followed by `W;` if `wash` is set.
    pub fn dispense(&mut self, step: &PipetteStep, wash: bool) -> Result<(), WorklistError> {
        let line = self.transfer_line("D", "destination", step)?;
        if wash {
            self.emit(&[line.as_str(), "W;"])
        } else {
            self.emit(&[line])
        }
    }

    /// Aspirate shortcut taking only rack, well and volume.
    pub fn a(
        &mut self,
        rack: &str,
        position: usize,
        volume: Volume,
        by_label: bool,
    ) -> Result<(), WorklistError> {
        self.aspirate(&PipetteStep::rack(rack, position, volume, by_label))
    }

    /// Dispense shortcut taking only rack, well and volume (plus liquid class and wash).
    pub fn d(
        &mut self,
        rack: &str,
        position: usize,
        volume: Volume,
        liquid_class: Option<&str>,
        wash: bool,
        by_label: bool,
    ) -> Result<(), WorklistError> {
        let step =
            PipetteStep::rack(rack, position, volume, by_label).with_liquid_class(liquid_class);
        self.dispense(&step, wash)
    }

    /// Reagent distribution command:
    /// `R;<src label;id;type;start;end>;<dst label;id;type;start;end>;<volume>;<liquidClass>;<nDitiReuses>;<nMultiDisp>;<direction>[;<excludedWell>...]`
    pub fn distribute(&mut self, dist: &Distribution) -> Result<(), WorklistError> {
        if dist.src_rack_label.is_empty() && dist.src_rack_id.is_empty() {
            return Err(WorklistError::MissingRack { role: "source" });
        }
        if dist.dst_rack_label.is_empty() && dist.dst_rack_id.is_empty() {
            return Err(WorklistError::MissingRack {
                role: "destination",
            });
        }
        check_volume(dist.volume)?;

        let liquid_class = dist
            .liquid_class
            .as_deref()
            .or(self.default_liquid_class.as_deref())
            .unwrap_or_default();

        let mut fields = vec![
            "R".to_string(),
            strip_line_breaks(&dist.src_rack_label),
            strip_line_breaks(&dist.src_rack_id),
            strip_line_breaks(&dist.src_rack_type),
            dist.src_start.to_string(),
            dist.src_end.to_string(),
            strip_line_breaks(&dist.dst_rack_label),
            strip_line_breaks(&dist.dst_rack_id),
            strip_line_breaks(&dist.dst_rack_type),
            dist.dst_start.to_string(),
            dist.dst_end.to_string(),
            dist.volume.to_string(),
            strip_line_breaks(liquid_class),
            dist.n_diti_reuses.to_string(),
            dist.n_multi_disp.to_string(),
            dist.direction.to_string(),
        ];
        fields.extend(dist.exclude_wells.iter().map(|w| w.to_string()));
        self.emit(&[fields.join(";")])
    }

    fn transfer_pair(
        &self,
        src: &str,
        src_position: usize,
        dst: &str,
        dst_position: usize,
        volume: Volume,
        opts: &TransferOptions,
    ) -> Result<[String; 2], WorklistError> {
        let asp = PipetteStep::rack(src, src_position, volume, opts.by_label)
            .with_rack_type(&opts.src_rack_type)
            .with_liquid_class(opts.liquid_class.as_deref())
            .with_tip_mask(opts.tip_mask);
        let disp = PipetteStep::rack(dst, dst_position, volume, opts.by_label)
            .with_rack_type(&opts.dst_rack_type)
            .with_liquid_class(opts.liquid_class.as_deref())
            .with_tip_mask(opts.tip_mask);
        Ok([
            self.transfer_line("A", "source", &asp)?,
            self.transfer_line("D", "destination", &disp)?,
        ])
    }

    /// One aspirate and one dispense of the same volume (plus `W;` if `opts.wash`).
    pub fn transfer(
        &mut self,
        src: &str,
        src_position: usize,
        dst: &str,
        dst_position: usize,
        volume: Volume,
        opts: &TransferOptions,
    ) -> Result<(), WorklistError> {
        let [asp, disp] = self.transfer_pair(src, src_position, dst, dst_position, volume, opts)?;
        let mut lines = vec![asp, disp];
        if opts.wash {
            lines.push("W;".to_string());
        }
        self.emit(&lines)
    }

    /// Aspirate and dispense every well of a plate column, using the rows of
    /// the default plate format. Returns the number of aspirate/dispense pairs.
    pub fn transfer_column(
        &mut self,
        src: &str,
        src_col: usize,
        dst: &str,
        dst_col: usize,
        volume: Volume,
        opts: &TransferOptions,
    ) -> Result<usize, WorklistError> {
        let rows = self.rows();
        for col in [src_col, dst_col] {
            if col == 0 || col > self.columns() {
                return Err(FormatError::InvalidPosition(format!("column {col}")).into());
            }
        }
        let pos_src = (src_col - 1) * rows + 1;
        let pos_dst = (dst_col - 1) * rows + 1;

        let mut lines = Vec::with_capacity(rows * 3);
        for i in 0..rows {
            let [asp, disp] =
                self.transfer_pair(src, pos_src + i, dst, pos_dst + i, volume, opts)?;
            lines.push(asp);
            lines.push(disp);
            if opts.wash {
                lines.push("W;".to_string());
            }
        }
        self.emit(&lines)?;
        Ok(rows)
    }

    /// Multi-dispense from one source well into `dst_positions`, refilling the
    /// tip whenever its capacity is exhausted. The tip volume is rounded down
    /// to a multiple of the dispense volume.
    pub fn multi_dispense_with_flush(&mut self, md: &MultiDispense) -> Result<(), WorklistError> {
        if md.src_label.is_empty() {
            return Err(WorklistError::MissingRack { role: "source" });
        }
        if md.dst_label.is_empty() {
            return Err(WorklistError::MissingRack {
                role: "destination",
            });
        }
        check_volume(md.tip_volume)?;
        if !(md.volume.is_finite() && md.volume > 0.0) {
            return Err(WorklistError::InvalidVolume(md.volume));
        }
        let per_tip = (md.tip_volume / md.volume + 1e-9).floor() as usize;
        if per_tip == 0 {
            return Err(WorklistError::InvalidVolume(md.tip_volume));
        }

        // Working copy used as a stack; the first destination sits on top.
        // One dispense unit per destination well, so units and wells run out together.
        let mut remaining: Vec<usize> = md.dst_positions.iter().rev().copied().collect();
        let mut lines = vec![];

        while !remaining.is_empty() {
            let n_next = remaining.len().min(per_tip);
            let asp_volume = md.volume * n_next as f64;
            let asp = PipetteStep::rack_label(&md.src_label, md.src_position, asp_volume)
                .with_liquid_class(md.liquid_class.as_deref())
                .with_tip_mask(md.tip_mask);
            lines.push(self.transfer_line("A", "source", &asp)?);

            for well in remaining.drain(remaining.len() - n_next..).rev() {
                let disp = PipetteStep::rack_label(&md.dst_label, well, md.volume)
                    .with_liquid_class(md.liquid_class.as_deref())
                    .with_tip_mask(md.tip_mask);
                lines.push(self.transfer_line("D", "destination", &disp)?);
            }

            if !remaining.is_empty() && md.flush {
                lines.push("F;".to_string());
            }
        }

        if md.wash {
            lines.push("W;".to_string());
        }
        self.emit(&lines)
    }

    /// `W;` wash / tip replacement.
    pub fn wash(&mut self) -> Result<(), WorklistError> {
        self.emit(&["W;"])
    }

    /// `F;` tip flush.
    pub fn flush(&mut self) -> Result<(), WorklistError> {
        self.emit(&["F;"])
    }

    /// `B;` forces execution of all previous lines.
    pub fn barrier(&mut self) -> Result<(), WorklistError> {
        self.emit(&["B;"])
    }

    pub fn comment(&mut self, comment: &str) -> Result<(), WorklistError> {
        self.write(&format!("C; {comment}"))
    }

    /// Writes a custom line. Embedded line breaks are removed and a single
    /// line break is appended.
    pub fn write(&mut self, line: &str) -> Result<(), WorklistError> {
        self.emit(&[strip_line_breaks(line)])
    }

    /// Flushes and releases the target. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), WorklistError> {
        if self.state == SinkState::Closed {
            return Ok(());
        }
        // Never written: the target is released without being created.
        self.target = None;
        self.state = SinkState::Closed;
        if let Some(mut sink) = self.sink.take() {
            sink.flush()?;
        }
        debug!(
            "Closed worklist {} after {} line(s)",
            self.display_name(),
            self.line_count()
        );
        Ok(())
    }

    /// Runs `f` against this worklist and closes it afterwards, whether `f`
    /// succeeded or not. With `report_errors` set, an error from `f` is passed
    /// to `notifier` before the target is released; it is returned unchanged.
    pub fn scoped<T, E, F>(&mut self, notifier: &dyn Notifier, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Worklist) -> Result<T, E>,
        E: From<WorklistError> + fmt::Display,
    {
        let result = f(self);
        self.release_scope(notifier, result)
    }

    /// Reports `result`'s error if configured, then closes. A close failure
    /// only replaces a successful result.
    pub(crate) fn release_scope<T, E>(
        &mut self,
        notifier: &dyn Notifier,
        result: Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<WorklistError> + fmt::Display,
    {
        if let Err(e) = &result
            && self.report_errors
        {
            notifier.notify("Worklist Error", &e.to_string());
        }
        let closed = self.close();
        match (result, closed) {
            (Err(e), Err(close_err)) => {
                warn!("Could not close worklist {}: {close_err}", self.display_name());
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(close_err)) => Err(close_err.into()),
            (Ok(value), Ok(())) => Ok(value),
        }
    }
}

impl Drop for Worklist {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Could not close worklist {}: {e}", self.display_name());
        }
    }
}

impl fmt::Display for Worklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buffer)
    }
}

impl fmt::Debug for Worklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worklist in {} ({:?})", self.display_name(), self.state)
    }
}
