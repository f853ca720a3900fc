//! Microplate well addressing and Tecan Evoware worklist generation.

pub mod about;
pub mod cherrypicking;
pub mod config;
pub mod engine;
pub mod error;
pub mod plates;
pub mod worklist;

pub use error::{EvowareError, FormatError, WorklistError};
pub use plates::{PlateFormat, PlatePosition};
pub use worklist::{Worklist, WorklistTarget};
