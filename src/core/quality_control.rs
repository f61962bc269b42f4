//! Quality control of a time series of images for one processing band.
//!
//! Each image goes through three phases: load (data band, no-data value, quality bands bound
//! to their rule tables), scan (row chunks on the scheduler) and apply (mask, statistics).

use crate::core::evaluator::QualityBandEvaluator;
use crate::core::output::{mask_invalid, MaskedBand, OutputStack};
use crate::core::rule_table;
use crate::core::scheduler::ChunkScheduler;
use crate::core::statistics::{InvalidPixelStatistics, TimeSeriesStatistics};
use crate::io::config::QcConfiguration;
use crate::io::source::{nodata_as, ImageSource};
use crate::types::{DataPixel, PixelCoordinate, ProductVariant, QcError, QcResult};
use ndarray::Array2;
use std::ops::Range;
use std::time::Instant;

/// Quality control parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityControlParams {
    /// Data band to mask, numbered from 1
    pub band: usize,
    /// Keep per-rule counters; without them a pixel stops at its first failure
    pub with_stats: bool,
    /// Scan workers
    pub workers: usize,
}

impl Default for QualityControlParams {
    fn default() -> Self {
        Self {
            band: 1,
            with_stats: true,
            workers: rayon::current_num_threads().saturating_sub(1).max(1),
        }
    }
}

/// What one row chunk produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkResult {
    pub statistics: InvalidPixelStatistics,
    pub invalid: Vec<PixelCoordinate>,
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct QcOutput<T> {
    pub band: usize,
    pub variant: ProductVariant,
    /// Masked data bands in acquisition order
    pub stack: OutputStack<T>,
    /// Statistics per acquisition id
    pub statistics: TimeSeriesStatistics,
    /// Images left out after a per-image failure
    pub skipped: Vec<String>,
}

/// Runs quality control over a series of images
#[derive(Debug, Clone)]
pub struct QualityControl {
    config: QcConfiguration,
    params: QualityControlParams,
    scheduler: ChunkScheduler,
}

impl QualityControl {
    pub fn new(config: QcConfiguration, params: QualityControlParams) -> Self {
        Self {
            config,
            scheduler: ChunkScheduler::new(params.workers),
            params,
        }
    }

    pub fn with_scheduler(mut self, scheduler: ChunkScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn params(&self) -> &QualityControlParams {
        &self.params
    }

    pub fn config(&self) -> &QcConfiguration {
        &self.config
    }

    /// Mask every image and collect its statistics.
    ///
    /// Images are processed in acquisition order and must all belong to one product variant
    /// and share one no-data value.
    /// An image whose quality bands do not line up with its data band is logged and skipped;
    /// any other error ends the run.
    pub fn process<S: ImageSource>(&self, images: &[S]) -> QcResult<QcOutput<S::Pixel>> {
        let first = images
            .first()
            .ok_or_else(|| QcError::InvalidFormat("No images to process".to_string()))?;
        let variant = first.variant();
        if let Some(other) = images.iter().find(|image| image.variant() != variant) {
            return Err(QcError::Configuration(format!(
                "{} is a {} image, expected {}",
                other.name(),
                other.variant(),
                variant
            )));
        }

        let band = self.params.band;
        let nodata: S::Pixel = nodata_as(first.get_nodata_value(band)?)?;
        for image in &images[1..] {
            let other: S::Pixel = nodata_as(image.get_nodata_value(band)?)?;
            if !other.is_nodata(nodata) {
                return Err(QcError::Configuration(format!(
                    "{} uses no-data value {:?}, the series uses {:?}",
                    image.name(),
                    other,
                    nodata
                )));
            }
        }

        let mut ordered: Vec<&S> = images.iter().collect();
        ordered.sort_by_key(|image| image.acquisition_date());

        log::info!(
            "Quality control of {} {} images, band {}, {} workers",
            images.len(),
            variant,
            band,
            self.scheduler.workers()
        );
        let start_time = Instant::now();

        let mut stack = OutputStack::new(nodata);
        let mut statistics = TimeSeriesStatistics::new();
        let mut skipped = Vec::new();

        for image in ordered {
            match self.process_image(image) {
                Ok((masked, image_statistics)) => {
                    statistics.record(&masked.acquisition_id, image_statistics);
                    stack.push(masked);
                }
                Err(e) if e.is_image_local() => {
                    log::error!("Skipping {}: {}", image.name(), e);
                    skipped.push(image.name().to_string());
                }
                Err(e) => return Err(e),
            }
        }

        let cumulative = statistics.cumulative();
        log::info!(
            "Quality control completed in {:.2}s: {} images, {} skipped, {:.2}% invalid pixels",
            start_time.elapsed().as_secs_f64(),
            stack.len(),
            skipped.len(),
            cumulative.invalid_percentage()
        );

        Ok(QcOutput {
            band,
            variant,
            stack,
            statistics,
            skipped,
        })
    }

    /// Load, scan and mask one image
    pub fn process_image<S: ImageSource>(
        &self,
        image: &S,
    ) -> QcResult<(MaskedBand<S::Pixel>, InvalidPixelStatistics)> {
        let start_time = Instant::now();
        let band = self.params.band;

        let data = image.get_data_band(band)?;
        let nodata: S::Pixel = nodata_as(image.get_nodata_value(band)?)?;
        let evaluators = self.bind_evaluators(image, data.dim())?;
        log::debug!(
            "{}: {}x{} pixels, {} of {} quality bands need checking",
            image.name(),
            data.nrows(),
            data.ncols(),
            evaluators.iter().filter(|e| e.need_check()).count(),
            evaluators.len()
        );

        // Bands accepting everything still report their zeroed counters
        let mut base = InvalidPixelStatistics::new();
        if self.params.with_stats {
            for evaluator in &evaluators {
                base.invalid_pixels
                    .insert(evaluator.full_name().to_string(), evaluator.invalid_pixels().clone());
            }
        }
        let active: Vec<QualityBandEvaluator> =
            evaluators.into_iter().filter(|e| e.need_check()).collect();

        let chunks = self.scheduler.run(data.nrows(), |rows| {
            Ok(self.scan_rows(&data, nodata, &active, rows))
        })?;
        let (statistics, invalid) = chunks.into_iter().fold(
            (base, Vec::new()),
            |(statistics, mut invalid), chunk| {
                invalid.extend(chunk.invalid);
                (statistics.merge(&chunk.statistics), invalid)
            },
        );

        let masked = MaskedBand {
            acquisition_id: image.acquisition_id(),
            acquisition_date: image.acquisition_date(),
            data: mask_invalid(&data, &invalid, nodata),
        };

        log::info!(
            "{} ({}): {} invalid of {} pixels ({:.2}%), {} no-data, {:.2}s",
            image.name(),
            masked.acquisition_id,
            statistics.total_invalid_pixels,
            statistics.total_pixels,
            statistics.invalid_percentage(),
            statistics.nodata_pixels,
            start_time.elapsed().as_secs_f64()
        );
        Ok((masked, statistics))
    }

    /// One evaluator per quality band of the variant, in rule table order
    fn bind_evaluators<S: ImageSource>(
        &self,
        image: &S,
        data_shape: (usize, usize),
    ) -> QcResult<Vec<QualityBandEvaluator>> {
        let variant = image.variant();
        rule_table::layouts(variant)
            .iter()
            .map(|layout| {
                let quality_band = image.quality_band(layout.kind)?;
                QualityBandEvaluator::bind(
                    variant,
                    layout,
                    quality_band,
                    data_shape,
                    self.params.band,
                    &self.config,
                )
            })
            .collect()
    }

    /// Check every pixel of `rows`; no-data pixels are counted and never evaluated
    pub fn scan_rows<T: DataPixel>(
        &self,
        data: &Array2<T>,
        nodata: T,
        evaluators: &[QualityBandEvaluator],
        rows: Range<usize>,
    ) -> ChunkResult {
        let mut tallies: Vec<_> = evaluators.iter().map(|e| e.new_tally()).collect();
        let mut invalid = Vec::new();
        let mut nodata_pixels = 0u64;

        for row in rows.clone() {
            for (col, &value) in data.row(row).iter().enumerate() {
                if value.is_nodata(nodata) {
                    nodata_pixels += 1;
                    continue;
                }

                let coordinate = PixelCoordinate::new(row, col);
                let valid = if self.params.with_stats {
                    evaluators
                        .iter()
                        .zip(tallies.iter_mut())
                        .fold(true, |valid, (evaluator, tally)| {
                            evaluator.check(coordinate, Some(tally)) && valid
                        })
                } else {
                    evaluators.iter().all(|e| e.check(coordinate, None))
                };
                if !valid {
                    invalid.push(coordinate);
                }
            }
        }

        let mut statistics = InvalidPixelStatistics {
            total_pixels: (rows.len() * data.ncols()) as u64,
            total_invalid_pixels: invalid.len() as u64 + nodata_pixels,
            nodata_pixels,
            ..Default::default()
        };
        if self.params.with_stats {
            for (evaluator, tally) in evaluators.iter().zip(&tallies) {
                statistics
                    .invalid_pixels
                    .insert(evaluator.full_name().to_string(), evaluator.tally_counts(tally));
            }
        }

        ChunkResult {
            statistics,
            invalid,
        }
    }
}
