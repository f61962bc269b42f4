use ndarray::Array2;
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::str::FromStr;

/// Raw integer read from a quality band (bit flags or scaled angles)
pub type QcValue = i64;

/// 2D quality band raster (rows x cols)
pub type QualityRaster = Array2<QcValue>;

/// Value type of a data (reflectance) band.
///
/// Any plain numeric pixel works; the no-data sentinel is converted into it with `NumCast`.
pub trait DataPixel: Copy + PartialEq + Send + Sync + NumCast + Debug + 'static {
    /// Sentinel comparison where a NaN sentinel matches NaN pixels
    #[allow(clippy::eq_op)]
    fn is_nodata(self, nodata: Self) -> bool {
        self == nodata || (self != self && nodata != nodata)
    }
}

impl<T> DataPixel for T where T: Copy + PartialEq + Send + Sync + NumCast + Debug + 'static {}

/// Pixel position in a raster, 0-based and row-major
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PixelCoordinate {
    pub row: usize,
    pub col: usize,
}

impl PixelCoordinate {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// MODIS surface reflectance product families with a fixed QC layout.
///
/// Terra (MOD) and Aqua (MYD) granules of the same family share one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProductVariant {
    /// 8-day 500m (MOD09A1 / MYD09A1)
    Mxd09A1,
    /// 8-day 250m (MOD09Q1 / MYD09Q1)
    Mxd09Q1,
    /// Daily 500m (MOD09GA / MYD09GA)
    Mxd09GA,
    /// Daily 250m (MOD09GQ / MYD09GQ), state and angles come from the matching GA granule
    Mxd09GQ,
}

impl ProductVariant {
    pub const ALL: [ProductVariant; 4] = [
        ProductVariant::Mxd09A1,
        ProductVariant::Mxd09Q1,
        ProductVariant::Mxd09GA,
        ProductVariant::Mxd09GQ,
    ];

    /// Configuration section holding the rule values of this variant
    pub fn section(&self) -> &'static str {
        match self {
            ProductVariant::Mxd09A1 => "MXD09A1",
            ProductVariant::Mxd09Q1 => "MXD09Q1",
            ProductVariant::Mxd09GA => "MXD09GA",
            ProductVariant::Mxd09GQ => "MXD09GQ",
        }
    }

    /// Resolve a granule short name such as `MOD09A1` or `MYD09GQ`
    pub fn from_short_name(short_name: &str) -> QcResult<Self> {
        match short_name.trim().to_uppercase().as_str() {
            "MOD09A1" | "MYD09A1" | "MXD09A1" => Ok(ProductVariant::Mxd09A1),
            "MOD09Q1" | "MYD09Q1" | "MXD09Q1" => Ok(ProductVariant::Mxd09Q1),
            "MOD09GA" | "MYD09GA" | "MXD09GA" => Ok(ProductVariant::Mxd09GA),
            "MOD09GQ" | "MYD09GQ" | "MXD09GQ" => Ok(ProductVariant::Mxd09GQ),
            other => Err(QcError::Metadata(format!(
                "Product {} not implemented or not supported",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ProductVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.section())
    }
}

impl FromStr for ProductVariant {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProductVariant::from_short_name(s)
    }
}

/// Kind of auxiliary quality band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityBandKind {
    /// Per-band reflectance quality bits (rbq)
    ReflectanceBandQuality,
    /// Reflectance state QA flags (sf)
    StateFlags,
    /// Solar zenith angle (sza)
    SolarZenith,
    /// View/sensor zenith angle (vza)
    ViewZenith,
    /// Relative azimuth angle (rza)
    RelativeZenith,
}

impl QualityBandKind {
    /// Short identifier used as configuration key prefix
    pub fn id(&self) -> &'static str {
        match self {
            QualityBandKind::ReflectanceBandQuality => "rbq",
            QualityBandKind::StateFlags => "sf",
            QualityBandKind::SolarZenith => "sza",
            QualityBandKind::ViewZenith => "vza",
            QualityBandKind::RelativeZenith => "rza",
        }
    }

    /// Human readable name, also the key of the nested statistics
    pub fn full_name(&self) -> &'static str {
        match self {
            QualityBandKind::ReflectanceBandQuality => "Reflectance Band Quality",
            QualityBandKind::StateFlags => "Reflectance State QA flags",
            QualityBandKind::SolarZenith => "Solar Zenith Angle",
            QualityBandKind::ViewZenith => "View Zenith Angle",
            QualityBandKind::RelativeZenith => "Relative Zenith Angle",
        }
    }

    /// Physically possible range (degrees) for angle bands
    pub fn angle_domain(&self) -> Option<(f64, f64)> {
        match self {
            QualityBandKind::SolarZenith | QualityBandKind::ViewZenith => Some((0.0, 180.0)),
            QualityBandKind::RelativeZenith => Some((-180.0, 180.0)),
            _ => None,
        }
    }

    pub fn from_id(id: &str) -> QcResult<Self> {
        match id {
            "rbq" => Ok(QualityBandKind::ReflectanceBandQuality),
            "sf" => Ok(QualityBandKind::StateFlags),
            "sza" => Ok(QualityBandKind::SolarZenith),
            "vza" => Ok(QualityBandKind::ViewZenith),
            "rza" => Ok(QualityBandKind::RelativeZenith),
            other => Err(QcError::Configuration(format!(
                "Unknown quality band id: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for QualityBandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Quality band raster as handed over by the raster collaborator
#[derive(Debug, Clone)]
pub struct QualityBand {
    pub raster: QualityRaster,
    /// Declared binary width of the values, `None` for angle bands
    pub num_bits: Option<u32>,
    /// Ratio mapping a data band coordinate into this (coarser) grid
    pub scale_resolution: Option<f64>,
}

/// Error types for quality control processing
#[derive(Debug, thiserror::Error)]
pub enum QcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Value {value} does not fit in {width} bits")]
    BitWidth { value: QcValue, width: u32 },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Parallel executor failure: {0}")]
    Executor(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl QcError {
    /// Errors that only spoil the image being processed; the run carries on without it
    pub fn is_image_local(&self) -> bool {
        matches!(self, QcError::ShapeMismatch(_))
    }
}

/// Result type for quality control operations
pub type QcResult<T> = Result<T, QcError>;
