//! Raster collaborator interface consumed by the quality control run.

use crate::core::rule_table;
use crate::types::{
    DataPixel, ProductVariant, QcError, QcResult, QcValue, QualityBand, QualityBandKind, QualityRaster,
};
use chrono::NaiveDate;
use ndarray::{Array2, ArrayView2};
use num_traits::NumCast;
use std::collections::BTreeMap;

/// One acquisition: data bands, quality bands and the acquisition date.
///
/// Data bands are numbered from 1. Implementations are shared read-only across the scan
/// workers, hence `Sync`.
pub trait ImageSource: Sync {
    type Pixel: DataPixel;

    fn name(&self) -> &str;

    fn variant(&self) -> ProductVariant;

    fn acquisition_date(&self) -> NaiveDate;

    /// Year and day of year, e.g. `2015034`
    fn acquisition_id(&self) -> String {
        self.acquisition_date().format("%Y%j").to_string()
    }

    fn get_data_band(&self, band: usize) -> QcResult<Array2<Self::Pixel>>;

    fn get_rows(&self, band: usize) -> QcResult<usize>;

    fn get_cols(&self, band: usize) -> QcResult<usize>;

    fn get_total_pixels(&self, band: usize) -> QcResult<usize> {
        Ok(self.get_rows(band)? * self.get_cols(band)?)
    }

    fn get_nodata_value(&self, band: usize) -> QcResult<f64>;

    fn quality_band(&self, kind: QualityBandKind) -> QcResult<QualityBand>;
}

/// Convert a no-data value into the pixel type (truncating towards zero for integers)
pub fn nodata_as<T: DataPixel>(value: f64) -> QcResult<T> {
    <T as NumCast>::from(value).ok_or_else(|| {
        QcError::InvalidFormat(format!(
            "No-data value {} is not representable as {}",
            value,
            std::any::type_name::<T>()
        ))
    })
}

/// Widen an integer quality raster of any stored width (`u8` up to `u32`, signed angles)
pub fn widen_quality_raster<T: Copy + Into<QcValue>>(raster: ArrayView2<'_, T>) -> QualityRaster {
    raster.mapv(|value| value.into())
}

/// Image held entirely in memory
#[derive(Debug, Clone)]
pub struct InMemoryImage<T> {
    name: String,
    variant: ProductVariant,
    acquisition_date: NaiveDate,
    nodata: f64,
    data_bands: BTreeMap<usize, Array2<T>>,
    quality_bands: BTreeMap<QualityBandKind, QualityBand>,
}

impl<T: DataPixel> InMemoryImage<T> {
    pub fn new(variant: ProductVariant, acquisition_date: NaiveDate, nodata: f64) -> Self {
        Self {
            name: format!("{}.A{}", variant, acquisition_date.format("%Y%j")),
            variant,
            acquisition_date,
            nodata,
            data_bands: BTreeMap::new(),
            quality_bands: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_data_band(mut self, band: usize, data: Array2<T>) -> Self {
        self.data_bands.insert(band, data);
        self
    }

    /// Quality band with the width and scale resolution of the product's rule table
    pub fn with_quality_band(mut self, kind: QualityBandKind, raster: QualityRaster) -> Self {
        let (num_bits, scale_resolution) = rule_table::layout(self.variant, kind)
            .map(|layout| (layout.num_bits, layout.scale_resolution))
            .unwrap_or((None, None));
        self.quality_bands.insert(
            kind,
            QualityBand {
                raster,
                num_bits,
                scale_resolution,
            },
        );
        self
    }

    pub fn with_declared_quality_band(mut self, kind: QualityBandKind, band: QualityBand) -> Self {
        self.quality_bands.insert(kind, band);
        self
    }

    fn data(&self, band: usize) -> QcResult<&Array2<T>> {
        self.data_bands.get(&band).ok_or_else(|| {
            QcError::InvalidFormat(format!("Data band {} not available in {}", band, self.name))
        })
    }
}

impl<T: DataPixel> ImageSource for InMemoryImage<T> {
    type Pixel = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn variant(&self) -> ProductVariant {
        self.variant
    }

    fn acquisition_date(&self) -> NaiveDate {
        self.acquisition_date
    }

    fn get_data_band(&self, band: usize) -> QcResult<Array2<T>> {
        self.data(band).cloned()
    }

    fn get_rows(&self, band: usize) -> QcResult<usize> {
        Ok(self.data(band)?.nrows())
    }

    fn get_cols(&self, band: usize) -> QcResult<usize> {
        Ok(self.data(band)?.ncols())
    }

    fn get_nodata_value(&self, _band: usize) -> QcResult<f64> {
        Ok(self.nodata)
    }

    fn quality_band(&self, kind: QualityBandKind) -> QcResult<QualityBand> {
        self.quality_bands.get(&kind).cloned().ok_or_else(|| {
            QcError::InvalidFormat(format!("{} not available in {}", kind.full_name(), self.name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodata_conversion() {
        assert_eq!(nodata_as::<i16>(-28672.0).unwrap(), -28672);
        assert_eq!(nodata_as::<i16>(-28672.9).unwrap(), -28672);
        assert_eq!(nodata_as::<f32>(-9999.0).unwrap(), -9999.0);
        assert!(nodata_as::<u8>(-1.0).is_err());
        assert!(nodata_as::<i16>(1.0e9).is_err());
    }

    #[test]
    fn test_widen_unsigned_quality_words() {
        let words = Array2::from_shape_vec((1, 2), vec![u32::MAX, 7u32]).unwrap();
        assert_eq!(
            widen_quality_raster(words.view()),
            Array2::from_shape_vec((1, 2), vec![4_294_967_295, 7]).unwrap()
        );

        let flags = Array2::from_elem((2, 2), 0b1000_0000_0000_0001u16);
        assert!(widen_quality_raster(flags.view()).iter().all(|&v| v == 32769));

        let angles = Array2::from_elem((1, 1), -17000i16);
        assert_eq!(widen_quality_raster(angles.view())[[0, 0]], -17000);
    }

    #[test]
    fn test_in_memory_image_uses_rule_table_defaults() {
        let date = NaiveDate::from_ymd_opt(2015, 2, 3).unwrap();
        let image = InMemoryImage::new(ProductVariant::Mxd09GA, date, -28672.0)
            .with_data_band(1, Array2::<i16>::zeros((4, 6)))
            .with_quality_band(QualityBandKind::StateFlags, Array2::zeros((2, 3)));

        assert_eq!(image.acquisition_id(), "2015034");
        assert_eq!(image.get_rows(1).unwrap(), 4);
        assert_eq!(image.get_cols(1).unwrap(), 6);
        assert_eq!(image.get_total_pixels(1).unwrap(), 24);

        let sf = image.quality_band(QualityBandKind::StateFlags).unwrap();
        assert_eq!(sf.num_bits, Some(16));
        assert_eq!(sf.scale_resolution, Some(0.5));

        assert!(image.get_data_band(2).is_err());
        assert!(image.quality_band(QualityBandKind::SolarZenith).is_err());
    }
}
