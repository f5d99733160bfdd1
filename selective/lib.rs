#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

#[path = "../barrier/mod.rs"]
pub mod barrier;

pub mod event;
pub mod family;
pub mod grid;
pub mod settings;

pub use event::{Alternative, SelectionEvent, TargetStatistic};
pub use family::DiscreteFamily;
pub use grid::{ConfidenceInterval, GridInference, InferenceError, TargetSummary};
pub use settings::{GridSettings, InferenceSettings, SettingsError};
