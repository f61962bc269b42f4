//! Masking of invalid pixels and the chronological stack of masked bands.

use crate::types::{DataPixel, PixelCoordinate};
use chrono::NaiveDate;
use ndarray::Array2;

/// Copy of `data` with every invalid coordinate replaced by `nodata`
pub fn mask_invalid<T: DataPixel>(
    data: &Array2<T>,
    invalid: &[PixelCoordinate],
    nodata: T,
) -> Array2<T> {
    let mut masked = data.clone();
    for coordinate in invalid {
        if let Some(value) = masked.get_mut([coordinate.row, coordinate.col]) {
            *value = nodata;
        }
    }
    masked
}

/// One masked data band of one acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedBand<T> {
    pub acquisition_id: String,
    pub acquisition_date: NaiveDate,
    pub data: Array2<T>,
}

/// Masked bands of a run, ordered by acquisition date, sharing one no-data value
#[derive(Debug, Clone, PartialEq)]
pub struct OutputStack<T> {
    nodata: T,
    bands: Vec<MaskedBand<T>>,
}

impl<T: DataPixel> OutputStack<T> {
    pub fn new(nodata: T) -> Self {
        Self {
            nodata,
            bands: Vec::new(),
        }
    }

    /// Insert keeping acquisition order; equal dates keep insertion order
    pub fn push(&mut self, band: MaskedBand<T>) {
        let index = self
            .bands
            .partition_point(|existing| existing.acquisition_date <= band.acquisition_date);
        self.bands.insert(index, band);
    }

    pub fn nodata(&self) -> T {
        self.nodata
    }

    pub fn bands(&self) -> &[MaskedBand<T>] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn acquisition_ids(&self) -> Vec<&str> {
        self.bands
            .iter()
            .map(|band| band.acquisition_id.as_str())
            .collect()
    }

    pub fn into_bands(self) -> Vec<MaskedBand<T>> {
        self.bands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(id: &str, date: NaiveDate, value: i16) -> MaskedBand<i16> {
        MaskedBand {
            acquisition_id: id.to_string(),
            acquisition_date: date,
            data: Array2::from_elem((1, 1), value),
        }
    }

    #[test]
    fn test_mask_replaces_only_invalid_pixels() {
        let data = Array2::from_shape_vec((2, 3), vec![1i16, 2, 3, 4, 5, 6]).unwrap();
        let invalid = vec![PixelCoordinate::new(0, 1), PixelCoordinate::new(1, 2)];
        let masked = mask_invalid(&data, &invalid, -28672);

        assert_eq!(
            masked,
            Array2::from_shape_vec((2, 3), vec![1, -28672, 3, 4, 5, -28672]).unwrap()
        );
        assert_eq!(data[[0, 1]], 2);
    }

    #[test]
    fn test_mask_with_no_invalid_pixels_is_identity() {
        let data = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32);
        assert_eq!(mask_invalid(&data, &[], f32::NAN), data);
    }

    #[test]
    fn test_stack_keeps_chronological_order() {
        let d = |day| NaiveDate::from_yo_opt(2015, day).unwrap();
        let mut stack = OutputStack::new(-28672i16);
        stack.push(band("2015017", d(17), 2));
        stack.push(band("2015001", d(1), 1));
        stack.push(band("2015033", d(33), 3));
        stack.push(band("2015017b", d(17), 4));

        assert_eq!(
            stack.acquisition_ids(),
            vec!["2015001", "2015017", "2015017b", "2015033"]
        );
        assert_eq!(stack.len(), 4);
        assert_eq!(stack.nodata(), -28672);
    }
}
