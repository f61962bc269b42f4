//! Core quality control modules

pub mod bit_decoder;
pub mod rule_table;
pub mod evaluator;
pub mod scheduler;
pub mod statistics;
pub mod output;
pub mod quality_control;

// Re-export main types
pub use bit_decoder::BitString;
pub use rule_table::{QualityBandLayout, RuleShape, RuleSpec};
pub use evaluator::{QualityBandEvaluator, RuleTally};
pub use scheduler::ChunkScheduler;
pub use statistics::{InvalidPixelStatistics, RuleCounts, StatisticsTable, TimeSeriesStatistics};
pub use output::{mask_invalid, MaskedBand, OutputStack};
pub use quality_control::{ChunkResult, QcOutput, QualityControl, QualityControlParams};
