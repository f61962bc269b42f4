//! GDAL backed image source and GeoTIFF writer for masked stacks.

use crate::core::output::OutputStack;
use crate::core::rule_table;
use crate::io::metadata::GranuleMetadata;
use crate::io::source::ImageSource;
use crate::types::{ProductVariant, QcError, QcResult, QcValue, QualityBand, QualityBandKind};
use chrono::NaiveDate;
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Surface reflectance fill value
pub const MODIS_SR_NODATA: f64 = -28672.0;

/// Image whose bands live in GDAL readable files (or HDF4 subdataset paths)
#[derive(Debug, Clone)]
pub struct GdalImage {
    name: String,
    variant: ProductVariant,
    acquisition_date: NaiveDate,
    data_paths: BTreeMap<usize, PathBuf>,
    quality_paths: BTreeMap<QualityBandKind, PathBuf>,
}

impl GdalImage {
    pub fn new(name: impl Into<String>, variant: ProductVariant, acquisition_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            variant,
            acquisition_date,
            data_paths: BTreeMap::new(),
            quality_paths: BTreeMap::new(),
        }
    }

    pub fn from_granule(metadata: &GranuleMetadata) -> QcResult<Self> {
        Ok(Self::new(
            metadata.local_granule_id.clone(),
            metadata.variant()?,
            metadata.start_date,
        ))
    }

    pub fn with_data_path<P: Into<PathBuf>>(mut self, band: usize, path: P) -> Self {
        self.data_paths.insert(band, path.into());
        self
    }

    pub fn with_quality_path<P: Into<PathBuf>>(mut self, kind: QualityBandKind, path: P) -> Self {
        self.quality_paths.insert(kind, path.into());
        self
    }

    fn data_path(&self, band: usize) -> QcResult<&Path> {
        self.data_paths.get(&band).map(PathBuf::as_path).ok_or_else(|| {
            QcError::InvalidFormat(format!("Data band {} not available in {}", band, self.name))
        })
    }

    fn data_size(&self, band: usize) -> QcResult<(usize, usize)> {
        let dataset = Dataset::open(self.data_path(band)?)?;
        let (width, height) = dataset.raster_size();
        Ok((height, width))
    }
}

fn read_band<T: gdal::raster::GdalType + Copy>(path: &Path) -> QcResult<Array2<T>> {
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let rasterband = dataset.rasterband(1)?;
    let buffer = rasterband.read_as::<T>((0, 0), (width, height), (width, height), None)?;
    Array2::from_shape_vec((height, width), buffer.data).map_err(|e| {
        QcError::InvalidFormat(format!("Failed to reshape {}: {}", path.display(), e))
    })
}

impl ImageSource for GdalImage {
    type Pixel = i16;

    fn name(&self) -> &str {
        &self.name
    }

    fn variant(&self) -> ProductVariant {
        self.variant
    }

    fn acquisition_date(&self) -> NaiveDate {
        self.acquisition_date
    }

    fn get_data_band(&self, band: usize) -> QcResult<Array2<i16>> {
        let path = self.data_path(band)?;
        log::debug!("Reading data band {} from {}", band, path.display());
        read_band::<i16>(path)
    }

    fn get_rows(&self, band: usize) -> QcResult<usize> {
        Ok(self.data_size(band)?.0)
    }

    fn get_cols(&self, band: usize) -> QcResult<usize> {
        Ok(self.data_size(band)?.1)
    }

    fn get_nodata_value(&self, band: usize) -> QcResult<f64> {
        let dataset = Dataset::open(self.data_path(band)?)?;
        let nodata = dataset.rasterband(1)?.no_data_value();
        Ok(nodata.unwrap_or(MODIS_SR_NODATA))
    }

    fn quality_band(&self, kind: QualityBandKind) -> QcResult<QualityBand> {
        let path = self.quality_paths.get(&kind).ok_or_else(|| {
            QcError::InvalidFormat(format!("{} not available in {}", kind.full_name(), self.name))
        })?;
        // 32-bit quality words and signed angles are both exact in f64
        let raster = read_band::<f64>(path)?.mapv(|value| value as QcValue);
        let layout = rule_table::layout(self.variant, kind);
        Ok(QualityBand {
            raster,
            num_bits: layout.and_then(|layout| layout.num_bits),
            scale_resolution: layout.and_then(|layout| layout.scale_resolution),
        })
    }
}

/// Output file name, e.g. `h10v07_MOD09A1_band01.tif`
pub fn output_file_name(tile: &str, short_name: &str, band: usize) -> String {
    format!("{}_{}_band{:02}.tif", tile, short_name, band)
}

/// Write a masked stack as one multi-band Int16 GeoTIFF with the georeferencing of
/// `reference`, one band per acquisition in stack order.
pub fn write_output_stack<P: AsRef<Path>, Q: AsRef<Path>>(
    stack: &OutputStack<i16>,
    reference: P,
    output_dir: Q,
    tile: &str,
    short_name: &str,
    band: usize,
) -> QcResult<PathBuf> {
    let first = stack
        .bands()
        .first()
        .ok_or_else(|| QcError::InvalidFormat("Nothing to write, output stack is empty".to_string()))?;
    let (height, width) = first.data.dim();

    let reference = Dataset::open(reference.as_ref())?;
    let geo_transform = reference.geo_transform()?;
    let projection = reference.projection();

    let output_path = output_dir.as_ref().join(output_file_name(tile, short_name, band));
    log::info!(
        "Writing {} masked bands to {}",
        stack.len(),
        output_path.display()
    );

    let options = [
        RasterCreationOption { key: "COMPRESS", value: "LZW" },
        RasterCreationOption { key: "PREDICTOR", value: "2" },
        RasterCreationOption { key: "TILED", value: "YES" },
    ];
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type_with_options::<i16, _>(
        &output_path,
        width as isize,
        height as isize,
        stack.len() as isize,
        &options,
    )?;
    dataset.set_geo_transform(&geo_transform)?;
    dataset.set_projection(&projection)?;

    for (index, masked) in stack.bands().iter().enumerate() {
        if masked.data.dim() != (height, width) {
            return Err(QcError::ShapeMismatch(format!(
                "{} is {:?}, stack is {:?}",
                masked.acquisition_id,
                masked.data.dim(),
                (height, width)
            )));
        }
        let mut rasterband = dataset.rasterband(index as isize + 1)?;
        let buffer = Buffer::new((width, height), masked.data.iter().copied().collect());
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(stack.nodata() as f64))?;
    }

    Ok(output_path)
}
