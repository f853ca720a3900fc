//! Machine-readable contracts for driving worklist generation, e.g. from JSON
//! workflow files or other processes.

use serde::{Deserialize, Serialize};

pub type OpId = String;
pub type RunId = String;

pub const PROTOCOL_VERSION: &str = "v1";

/// A well given either as linear Tecan position (`17`) or as human label (`"A3"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WellRef {
    Index(usize),
    Label(String),
}

/// Labware reference; at least one of `label` and `id` has to be given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RackRef {
    pub label: String,
    pub id: String,
    pub rack_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Aspirate {
        rack: RackRef,
        position: WellRef,
        volume: f64,
        #[serde(default)]
        tube_id: Option<String>,
        #[serde(default)]
        liquid_class: Option<String>,
        #[serde(default)]
        tip_mask: Option<u8>,
    },
    Dispense {
        rack: RackRef,
        position: WellRef,
        volume: f64,
        #[serde(default)]
        tube_id: Option<String>,
        #[serde(default)]
        liquid_class: Option<String>,
        #[serde(default)]
        tip_mask: Option<u8>,
        #[serde(default)]
        wash: Option<bool>,
    },
    Distribute {
        src: RackRef,
        src_start: WellRef,
        src_end: WellRef,
        dst: RackRef,
        dst_start: WellRef,
        dst_end: WellRef,
        volume: f64,
        #[serde(default)]
        liquid_class: Option<String>,
        #[serde(default)]
        n_diti_reuses: Option<u32>,
        #[serde(default)]
        n_multi_disp: Option<u32>,
        #[serde(default)]
        direction: Option<u8>,
        #[serde(default)]
        exclude_wells: Vec<WellRef>,
    },
    Transfer {
        src: String,
        src_position: WellRef,
        dst: String,
        dst_position: WellRef,
        volume: f64,
        #[serde(default)]
        liquid_class: Option<String>,
        #[serde(default)]
        wash: Option<bool>,
        #[serde(default)]
        by_label: Option<bool>,
    },
    TransferColumn {
        src: String,
        src_col: usize,
        dst: String,
        dst_col: usize,
        volume: f64,
        #[serde(default)]
        liquid_class: Option<String>,
        #[serde(default)]
        tip_mask: Option<u8>,
        #[serde(default)]
        wash: Option<bool>,
        #[serde(default)]
        by_label: Option<bool>,
    },
    MultiDispense {
        src_label: String,
        src_position: WellRef,
        dst_label: String,
        dst_positions: Vec<WellRef>,
        volume: f64,
        #[serde(default)]
        tip_volume: Option<f64>,
        #[serde(default)]
        liquid_class: Option<String>,
        #[serde(default)]
        tip_mask: Option<u8>,
        #[serde(default)]
        wash: Option<bool>,
        #[serde(default)]
        flush: Option<bool>,
    },
    Wash,
    Flush,
    Break,
    Comment {
        text: String,
    },
    Raw {
        line: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aspirate { .. } => "Aspirate",
            Self::Dispense { .. } => "Dispense",
            Self::Distribute { .. } => "Distribute",
            Self::Transfer { .. } => "Transfer",
            Self::TransferColumn { .. } => "TransferColumn",
            Self::MultiDispense { .. } => "MultiDispense",
            Self::Wash => "Wash",
            Self::Flush => "Flush",
            Self::Break => "Break",
            Self::Comment { .. } => "Comment",
            Self::Raw { .. } => "Raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub run_id: RunId,
    pub ops: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    pub lines_emitted: usize,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub run_id: RunId,
    pub op: Operation,
    pub result: OpResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_operations: Vec<String>,
    pub plate_formats: Vec<usize>,
}
