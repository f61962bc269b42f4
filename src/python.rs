//! Python bindings

use crate::core::quality_control::{QualityControl, QualityControlParams};
use crate::core::statistics::InvalidPixelStatistics;
use crate::io::config::{ConfigValue, QcConfiguration};
use crate::io::source::{widen_quality_raster, InMemoryImage};
use crate::types::{ProductVariant, QcError, QualityBandKind, QualityRaster};
use chrono::NaiveDate;
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict};

fn to_py_err(e: QcError) -> PyErr {
    match e {
        QcError::Configuration(_) | QcError::BitWidth { .. } | QcError::ShapeMismatch(_) => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
    }
}

/// Accept the integer dtypes QC bands are stored with
fn quality_raster(raster: &PyAny) -> PyResult<QualityRaster> {
    if let Ok(array) = raster.extract::<PyReadonlyArray2<i64>>() {
        return Ok(array.as_array().to_owned());
    }
    if let Ok(array) = raster.extract::<PyReadonlyArray2<u32>>() {
        return Ok(widen_quality_raster(array.as_array()));
    }
    if let Ok(array) = raster.extract::<PyReadonlyArray2<i32>>() {
        return Ok(widen_quality_raster(array.as_array()));
    }
    if let Ok(array) = raster.extract::<PyReadonlyArray2<u16>>() {
        return Ok(widen_quality_raster(array.as_array()));
    }
    if let Ok(array) = raster.extract::<PyReadonlyArray2<i16>>() {
        return Ok(widen_quality_raster(array.as_array()));
    }
    if let Ok(array) = raster.extract::<PyReadonlyArray2<u8>>() {
        return Ok(widen_quality_raster(array.as_array()));
    }
    Err(PyErr::new::<pyo3::exceptions::PyTypeError, _>(
        "Quality bands must be 2D integer arrays (uint8 to uint32, int16, int32 or int64)",
    ))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyQualityControl>()?;
    Ok(())
}

/// Python wrapper for QualityControl over images handed in as numpy arrays
#[pyclass(name = "QualityControl")]
struct PyQualityControl {
    variant: ProductVariant,
    config: QcConfiguration,
    params: QualityControlParams,
    images: Vec<InMemoryImage<f64>>,
}

#[pymethods]
impl PyQualityControl {
    #[new]
    #[pyo3(signature = (product, config, band = 1, with_stats = true, workers = None))]
    fn new(
        product: &str,
        config: &PyDict,
        band: usize,
        with_stats: bool,
        workers: Option<usize>,
    ) -> PyResult<Self> {
        let variant = ProductVariant::from_short_name(product).map_err(to_py_err)?;

        let mut parsed = QcConfiguration::new();
        for (section, values) in config.iter() {
            let section: String = section.extract()?;
            let values: &PyDict = values.downcast()?;
            for (key, value) in values.iter() {
                let key: String = key.extract()?;
                let value = if value.is_instance_of::<PyBool>() {
                    ConfigValue::Bool(value.extract()?)
                } else if let Ok(int) = value.extract::<i64>() {
                    ConfigValue::Int(int)
                } else {
                    ConfigValue::Float(value.extract()?)
                };
                parsed.set(&section, &key, value);
            }
        }

        let defaults = QualityControlParams::default();
        Ok(PyQualityControl {
            variant,
            config: parsed,
            params: QualityControlParams {
                band,
                with_stats,
                workers: workers.unwrap_or(defaults.workers),
            },
            images: Vec::new(),
        })
    }

    /// Add one acquisition; `quality` maps band ids (`rbq`, `sf`, `sza`, ...) to integer arrays
    fn add_image(
        &mut self,
        date: &str,
        data: PyReadonlyArray2<f64>,
        quality: &PyDict,
        nodata: f64,
    ) -> PyResult<()> {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("Invalid date {}: {}", date, e))
        })?;

        let mut image = InMemoryImage::new(self.variant, date, nodata)
            .with_data_band(self.params.band, data.as_array().to_owned());
        for (id, raster) in quality.iter() {
            let kind = QualityBandKind::from_id(id.extract()?).map_err(to_py_err)?;
            image = image.with_quality_band(kind, quality_raster(raster)?);
        }
        self.images.push(image);
        Ok(())
    }

    fn __len__(&self) -> usize {
        self.images.len()
    }

    /// Returns `(acquisition_ids, masked_arrays, statistics)` in acquisition order
    fn process<'py>(
        &self,
        py: Python<'py>,
    ) -> PyResult<(Vec<String>, Vec<&'py PyArray2<f64>>, &'py PyDict)> {
        let qc = QualityControl::new(self.config.clone(), self.params);
        let output = py
            .allow_threads(|| qc.process(&self.images))
            .map_err(to_py_err)?;

        let statistics = PyDict::new(py);
        for (acquisition_id, image_statistics) in output.statistics.iter() {
            statistics.set_item(acquisition_id, statistics_dict(py, image_statistics)?)?;
        }

        let mut ids = Vec::with_capacity(output.stack.len());
        let mut arrays = Vec::with_capacity(output.stack.len());
        for band in output.stack.into_bands() {
            ids.push(band.acquisition_id);
            arrays.push(band.data.into_pyarray(py));
        }
        Ok((ids, arrays, statistics))
    }

    fn __repr__(&self) -> String {
        format!(
            "QualityControl('{}', band={}, images={})",
            self.variant,
            self.params.band,
            self.images.len()
        )
    }
}

fn statistics_dict<'py>(
    py: Python<'py>,
    statistics: &InvalidPixelStatistics,
) -> PyResult<&'py PyDict> {
    let dict = PyDict::new(py);
    dict.set_item("total_pixels", statistics.total_pixels)?;
    dict.set_item("total_invalid_pixels", statistics.total_invalid_pixels)?;
    dict.set_item("nodata_pixels", statistics.nodata_pixels)?;

    let bands = PyDict::new(py);
    for (band, counts) in &statistics.invalid_pixels {
        let rules = PyDict::new(py);
        for (key, count) in counts {
            rules.set_item(key, count)?;
        }
        bands.set_item(band, rules)?;
    }
    dict.set_item("invalid_pixels", bands)?;
    Ok(dict)
}
