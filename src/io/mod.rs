//! Configuration, image sources and granule metadata

pub mod config;
pub mod source;
pub mod metadata;
#[cfg(feature = "gdal")]
pub mod gdal_raster;

pub use config::{ConfigValue, QcConfiguration};
pub use source::{ImageSource, InMemoryImage};
pub use metadata::{validate_series, GranuleMetadata};
#[cfg(feature = "gdal")]
pub use gdal_raster::{write_output_stack, GdalImage};
