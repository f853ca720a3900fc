use crate::config::ALLOWED_PLATES;
use crate::error::{FormatError, WorklistError};
use crate::worklist::{
    Distribution, MultiDispense, Notifier, PipetteStep, TransferOptions, Worklist,
};
pub use evoware_protocol::{
    Capabilities, OpId, OpResult, Operation, OperationRecord, RackRef, RunId, WellRef, Workflow,
    PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Unsupported,
    Io,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for EngineError {}

impl From<WorklistError> for EngineError {
    fn from(e: WorklistError) -> Self {
        let code = match &e {
            WorklistError::UnknownPart(_) => ErrorCode::NotFound,
            WorklistError::UnsupportedPlateFormat(_) | WorklistError::Closed(_) => {
                ErrorCode::Unsupported
            }
            WorklistError::Io(_) => ErrorCode::Io,
            _ => ErrorCode::InvalidInput,
        };
        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<FormatError> for EngineError {
    fn from(e: FormatError) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: e.to_string(),
        }
    }
}

pub trait Engine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, EngineError>;
    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, EngineError>;
    fn snapshot(&self) -> &Worklist;
}

pub fn capabilities() -> Capabilities {
    Capabilities {
        protocol_version: PROTOCOL_VERSION.to_string(),
        supported_operations: [
            "Aspirate",
            "Dispense",
            "Distribute",
            "Transfer",
            "TransferColumn",
            "MultiDispense",
            "Wash",
            "Flush",
            "Break",
            "Comment",
            "Raw",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        plate_formats: ALLOWED_PLATES.to_vec(),
    }
}

/// Applies protocol operations to a [`Worklist`]. Well labels are resolved
/// against the worklist's default plate format.
#[derive(Debug)]
pub struct WorklistEngine {
    worklist: Worklist,
    journal: Vec<OperationRecord>,
    op_counter: u64,
}

impl WorklistEngine {
    pub fn new(worklist: Worklist) -> Self {
        Self {
            worklist,
            journal: vec![],
            op_counter: 0,
        }
    }

    pub fn worklist(&self) -> &Worklist {
        &self.worklist
    }

    pub fn worklist_mut(&mut self) -> &mut Worklist {
        &mut self.worklist
    }

    pub fn into_worklist(self) -> Worklist {
        self.worklist
    }

    /// Runs `f` against this engine, then closes the worklist. Errors are
    /// passed to `notifier` first when the worklist reports errors.
    pub fn scoped<T, F>(&mut self, notifier: &dyn Notifier, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<T, EngineError>,
    {
        let result = f(self);
        self.worklist.release_scope(notifier, result)
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.journal
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    fn well(&self, well: &WellRef) -> Result<usize, EngineError> {
        let plate = self.worklist.plate_format();
        let pos = match well {
            WellRef::Index(i) => plate.human2int(*i)?,
            WellRef::Label(label) => plate.human2int(label.as_str())?,
        };
        Ok(pos)
    }

    fn step(
        &self,
        rack: &RackRef,
        position: &WellRef,
        volume: f64,
        tube_id: Option<&str>,
    ) -> Result<PipetteStep, EngineError> {
        Ok(PipetteStep {
            rack_label: rack.label.clone(),
            rack_id: rack.id.clone(),
            rack_type: rack.rack_type.clone(),
            position: self.well(position)?,
            tube_id: tube_id.unwrap_or_default().to_string(),
            volume,
            ..PipetteStep::default()
        })
    }

    fn apply_internal(&mut self, op: Operation) -> Result<OpResult, EngineError> {
        let op_id = self.next_op_id();
        let lines_before = self.worklist.line_count();
        let mut messages = vec![];

        match op {
            Operation::Aspirate {
                rack,
                position,
                volume,
                tube_id,
                liquid_class,
                tip_mask,
            } => {
                let step = self
                    .step(&rack, &position, volume, tube_id.as_deref())?
                    .with_liquid_class(liquid_class.as_deref())
                    .with_tip_mask(tip_mask);
                self.worklist.aspirate(&step)?;
            }
            Operation::Dispense {
                rack,
                position,
                volume,
                tube_id,
                liquid_class,
                tip_mask,
                wash,
            } => {
                let step = self
                    .step(&rack, &position, volume, tube_id.as_deref())?
                    .with_liquid_class(liquid_class.as_deref())
                    .with_tip_mask(tip_mask);
                self.worklist.dispense(&step, wash.unwrap_or(true))?;
            }
            Operation::Distribute {
                src,
                src_start,
                src_end,
                dst,
                dst_start,
                dst_end,
                volume,
                liquid_class,
                n_diti_reuses,
                n_multi_disp,
                direction,
                exclude_wells,
            } => {
                let defaults = Distribution::default();
                let dist = Distribution {
                    src_rack_label: src.label,
                    src_rack_id: src.id,
                    src_rack_type: src.rack_type,
                    src_start: self.well(&src_start)?,
                    src_end: self.well(&src_end)?,
                    dst_rack_label: dst.label,
                    dst_rack_id: dst.id,
                    dst_rack_type: dst.rack_type,
                    dst_start: self.well(&dst_start)?,
                    dst_end: self.well(&dst_end)?,
                    volume,
                    liquid_class,
                    n_diti_reuses: n_diti_reuses.unwrap_or(defaults.n_diti_reuses),
                    n_multi_disp: n_multi_disp.unwrap_or(defaults.n_multi_disp),
                    direction: direction.unwrap_or(defaults.direction),
                    exclude_wells: exclude_wells
                        .iter()
                        .map(|w| self.well(w))
                        .collect::<Result<Vec<_>, _>>()?,
                };
                self.worklist.distribute(&dist)?;
            }
            Operation::Transfer {
                src,
                src_position,
                dst,
                dst_position,
                volume,
                liquid_class,
                wash,
                by_label,
            } => {
                let opts = TransferOptions {
                    liquid_class,
                    wash: wash.unwrap_or(true),
                    by_label: by_label.unwrap_or(false),
                    ..TransferOptions::default()
                };
                let src_pos = self.well(&src_position)?;
                let dst_pos = self.well(&dst_position)?;
                self.worklist
                    .transfer(&src, src_pos, &dst, dst_pos, volume, &opts)?;
            }
            Operation::TransferColumn {
                src,
                src_col,
                dst,
                dst_col,
                volume,
                liquid_class,
                tip_mask,
                wash,
                by_label,
            } => {
                let opts = TransferOptions {
                    liquid_class,
                    tip_mask,
                    wash: wash.unwrap_or(true),
                    by_label: by_label.unwrap_or(false),
                    ..TransferOptions::default()
                };
                let n = self
                    .worklist
                    .transfer_column(&src, src_col, &dst, dst_col, volume, &opts)?;
                messages.push(format!(
                    "Transferred {n} well(s) from column {src_col} to column {dst_col}"
                ));
            }
            Operation::MultiDispense {
                src_label,
                src_position,
                dst_label,
                dst_positions,
                volume,
                tip_volume,
                liquid_class,
                tip_mask,
                wash,
                flush,
            } => {
                let defaults = MultiDispense::default();
                let md = MultiDispense {
                    src_position: self.well(&src_position)?,
                    dst_positions: dst_positions
                        .iter()
                        .map(|w| self.well(w))
                        .collect::<Result<Vec<_>, _>>()?,
                    src_label,
                    dst_label,
                    volume,
                    tip_volume: tip_volume.unwrap_or(defaults.tip_volume),
                    liquid_class,
                    tip_mask,
                    wash: wash.unwrap_or(defaults.wash),
                    flush: flush.unwrap_or(defaults.flush),
                };
                self.worklist.multi_dispense_with_flush(&md)?;
            }
            Operation::Wash => self.worklist.wash()?,
            Operation::Flush => self.worklist.flush()?,
            Operation::Break => self.worklist.barrier()?,
            Operation::Comment { text } => self.worklist.comment(&text)?,
            Operation::Raw { line } => self.worklist.write(&line)?,
        }

        let lines_emitted = self.worklist.line_count() - lines_before;
        debug!("{op_id}: {lines_emitted} line(s)");
        Ok(OpResult {
            op_id,
            lines_emitted,
            messages,
        })
    }
}

impl Engine for WorklistEngine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, EngineError> {
        let run_id = "interactive".to_string();
        let result = self.apply_internal(op.clone())?;
        self.journal.push(OperationRecord {
            run_id,
            op,
            result: result.clone(),
        });
        Ok(result)
    }

    /// Stops at the first failing operation; lines of earlier operations stay emitted.
    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, EngineError> {
        let mut results = Vec::new();
        for op in &wf.ops {
            let name = op.name();
            let result = self.apply_internal(op.clone()).map_err(|e| EngineError {
                code: e.code,
                message: format!("{name} in run '{}': {}", wf.run_id, e.message),
            })?;
            self.journal.push(OperationRecord {
                run_id: wf.run_id.clone(),
                op: op.clone(),
                result: result.clone(),
            });
            results.push(result);
        }
        Ok(results)
    }

    fn snapshot(&self) -> &Worklist {
        &self.worklist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LineEnding, WorklistConfig};
    use crate::worklist::WorklistTarget;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingNotifier {
        reports: RefCell<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, message: &str) {
            self.reports
                .borrow_mut()
                .push((title.to_string(), message.to_string()));
        }
    }

    fn engine() -> WorklistEngine {
        WorklistEngine::new(Worklist::in_memory().with_line_ending(LineEnding::Lf))
    }

    fn rack_label(label: &str) -> RackRef {
        RackRef {
            label: label.to_string(),
            ..RackRef::default()
        }
    }

    #[test]
    fn test_apply_resolves_well_labels() {
        let mut e = engine();
        let r = e
            .apply(Operation::Aspirate {
                rack: rack_label("Src1"),
                position: WellRef::Label("H12".to_string()),
                volume: 25.0,
                tube_id: None,
                liquid_class: Some("Water".to_string()),
                tip_mask: None,
            })
            .unwrap();
        assert_eq!(r.op_id, "op-1");
        assert_eq!(r.lines_emitted, 1);
        let r = e
            .apply(Operation::Dispense {
                rack: rack_label("Dst1"),
                position: WellRef::Index(3),
                volume: 25.0,
                tube_id: None,
                liquid_class: None,
                tip_mask: Some(1),
                wash: None,
            })
            .unwrap();
        assert_eq!(r.lines_emitted, 2);
        assert_eq!(
            e.snapshot().lines().collect::<Vec<_>>(),
            vec!["A;Src1;;;96;;25;Water", "D;Dst1;;;3;;25;;1", "W;"]
        );
        assert_eq!(e.operation_log().len(), 2);
    }

    #[test]
    fn test_apply_workflow_from_json() {
        let wf: Workflow = serde_json::from_str(
            r#"{
                "run_id": "setup",
                "ops": [
                    {"Comment": {"text": "buffer"}},
                    {"Distribute": {"src": {"label": "Trough"}, "src_start": 1, "src_end": 8,
                                    "dst": {"id": "P1"}, "dst_start": "A1", "dst_end": "H12",
                                    "volume": 50, "exclude_wells": ["C1"]}},
                    {"TransferColumn": {"src": "S", "src_col": 1, "dst": "D", "dst_col": 12,
                                        "volume": 10, "wash": false}},
                    "Break"
                ]
            }"#,
        )
        .unwrap();
        let mut e = engine();
        let results = e.apply_workflow(wf).unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[2].lines_emitted, 16);
        assert_eq!(results[3].op_id, "op-4");
        let lines: Vec<&str> = e.snapshot().lines().collect();
        assert_eq!(lines[0], "C; buffer");
        assert_eq!(lines[1], "R;Trough;;;1;8;;P1;;1;96;50;;1;1;0;3");
        assert_eq!(lines[3], "D;;D;;89;;10;");
        assert_eq!(lines.last(), Some(&"B;"));
        assert!(e.operation_log().iter().all(|r| r.run_id == "setup"));
    }

    #[test]
    fn test_invalid_well_is_rejected() {
        let mut e = engine();
        let err = e
            .apply(Operation::Transfer {
                src: "S".to_string(),
                src_position: WellRef::Label("J1".to_string()),
                dst: "D".to_string(),
                dst_position: WellRef::Index(1),
                volume: 5.0,
                liquid_class: None,
                wash: None,
                by_label: None,
            })
            .unwrap_err();
        assert!(matches!(err.code, ErrorCode::InvalidInput));
        let err = e
            .apply(Operation::Transfer {
                src: "S".to_string(),
                src_position: WellRef::Index(97),
                dst: "D".to_string(),
                dst_position: WellRef::Index(1),
                volume: 5.0,
                liquid_class: None,
                wash: None,
                by_label: None,
            })
            .unwrap_err();
        assert!(matches!(err.code, ErrorCode::InvalidInput));
        assert!(e.snapshot().as_str().is_empty());
        assert!(e.operation_log().is_empty());
    }

    #[test]
    fn test_workflow_stops_at_first_error() {
        let mut e = engine();
        let wf = Workflow {
            run_id: "broken".to_string(),
            ops: vec![
                Operation::Wash,
                Operation::Aspirate {
                    rack: RackRef::default(),
                    position: WellRef::Index(1),
                    volume: 1.0,
                    tube_id: None,
                    liquid_class: None,
                    tip_mask: None,
                },
                Operation::Flush,
            ],
        };
        let err = e.apply_workflow(wf).unwrap_err();
        assert!(err.message.contains("Aspirate"));
        assert!(err.message.contains("source labware"));
        assert_eq!(e.snapshot().as_str(), "W;\n");
        assert_eq!(e.operation_log().len(), 1);
    }

    #[test]
    fn test_closed_worklist_is_unsupported() {
        let mut e = engine();
        e.worklist_mut().close().unwrap();
        let err = e.apply(Operation::Wash).unwrap_err();
        assert!(matches!(err.code, ErrorCode::Unsupported));
    }

    #[test]
    fn test_scoped_reports_failing_op_when_configured() {
        let config: WorklistConfig =
            serde_json::from_str(r#"{"report_errors": true, "line_ending": "lf"}"#).unwrap();
        let wl = Worklist::from_config(WorklistTarget::Memory, &config).unwrap();
        let mut e = WorklistEngine::new(wl);
        let notifier = RecordingNotifier::default();
        let err = e
            .scoped(&notifier, |e| {
                e.apply(Operation::Wash)?;
                e.apply(Operation::Transfer {
                    src: "S".to_string(),
                    src_position: WellRef::Label("A99".to_string()),
                    dst: "D".to_string(),
                    dst_position: WellRef::Index(1),
                    volume: 5.0,
                    liquid_class: None,
                    wash: None,
                    by_label: None,
                })
            })
            .unwrap_err();
        assert!(matches!(err.code, ErrorCode::InvalidInput));
        assert!(e.worklist().is_closed());
        assert_eq!(e.worklist().as_str(), "W;\n");
        let reports = notifier.reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "Worklist Error");
        assert!(reports[0].1.contains("exceeds number of wells"));
    }

    #[test]
    fn test_scoped_stays_quiet_without_report_errors() {
        let mut e = engine();
        let notifier = RecordingNotifier::default();
        let result = e.scoped(&notifier, |e| e.apply(Operation::Break));
        assert_eq!(result.unwrap().lines_emitted, 1);
        assert!(e.scoped(&notifier, |e| e.apply(Operation::Wash)).is_err());
        assert!(notifier.reports.borrow().is_empty());
    }

    #[test]
    fn test_capabilities() {
        let caps = capabilities();
        assert_eq!(caps.protocol_version, "v1");
        assert!(caps.supported_operations.contains(&"MultiDispense".to_string()));
        assert_eq!(caps.plate_formats, vec![6, 12, 24, 96, 384, 1536]);
        assert_eq!(caps.supported_operations.len(), 11);
    }
}
