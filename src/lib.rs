//! qcflag: bit-flag quality control for MODIS surface reflectance time series
//!
//! Every pixel of a data band is checked against the quality bands delivered with the
//! product (reflectance band quality, state flags, sun and view angles) using per-product rule
//! tables and an operator configuration. Failing pixels are replaced with the no-data value
//! and counted per rule, image by image, in acquisition order.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    PixelCoordinate, ProductVariant, QcError, QcResult, QualityBand, QualityBandKind, QcValue,
    QualityRaster,
};

pub use core::{
    ChunkScheduler, InvalidPixelStatistics, OutputStack, QcOutput, QualityBandEvaluator,
    QualityControl, QualityControlParams, TimeSeriesStatistics,
};
pub use io::{GranuleMetadata, ImageSource, InMemoryImage, QcConfiguration};
