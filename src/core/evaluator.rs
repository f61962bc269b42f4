//! Per-pixel evaluation of one quality band against the rule table of its product.
//!
//! An evaluator is bound to one image and one processing band: binding validates the raster
//! against the data grid and the declared bit width, then resolves every rule key from the
//! configuration into lookup tables so the per-pixel path does no string handling.

use crate::core::bit_decoder::{bit_length, BitString};
use crate::core::rule_table::{QualityBandLayout, RuleShape};
use crate::core::statistics::RuleCounts;
use crate::io::config::QcConfiguration;
use crate::types::{
    PixelCoordinate, ProductVariant, QcError, QcResult, QcValue, QualityBand, QualityBandKind,
    QualityRaster,
};

/// A rule with its configuration resolved
#[derive(Debug, Clone)]
enum BoundRule {
    /// Digits `[start, start + allowed.len().log2())`; `allowed[value]` from `{prefix}_{bits}`
    Slice {
        start: usize,
        len: usize,
        allowed: Vec<bool>,
        counter_base: usize,
    },
    Flag {
        position: usize,
        allow_clear: bool,
        allow_set: bool,
        counter_base: usize,
    },
    Range {
        scale: f64,
        min: f64,
        max: f64,
        counter_base: usize,
    },
}

impl BoundRule {
    /// Counter slots of the rules this value fails (at most two)
    fn failures(&self, bits: Option<&BitString>, raw: QcValue) -> [Option<usize>; 2] {
        match *self {
            BoundRule::Slice {
                start,
                len,
                ref allowed,
                counter_base,
            } => match bits {
                Some(bits) => {
                    let value = bits.slice(start, start + len) as usize;
                    if allowed[value] {
                        [None, None]
                    } else {
                        [Some(counter_base + value), None]
                    }
                }
                None => [None, None],
            },
            BoundRule::Flag {
                position,
                allow_clear,
                allow_set,
                counter_base,
            } => match bits {
                Some(bits) if bits.bit(position) => {
                    [(!allow_set).then_some(counter_base + 1), None]
                }
                Some(_) => [(!allow_clear).then_some(counter_base), None],
                None => [None, None],
            },
            BoundRule::Range {
                scale,
                min,
                max,
                counter_base,
            } => {
                let value = raw as f64 * scale;
                [
                    (!(value >= min)).then_some(counter_base),
                    (!(value <= max)).then_some(counter_base + 1),
                ]
            }
        }
    }
}

/// Chunk-local failure counters of one evaluator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTally {
    counts: Vec<u64>,
}

impl RuleTally {
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// One quality band of one image, ready to check pixels
#[derive(Debug, Clone)]
pub struct QualityBandEvaluator {
    variant: ProductVariant,
    layout: &'static QualityBandLayout,
    raster: QualityRaster,
    num_bits: Option<u32>,
    scale_resolution: Option<f64>,
    processing_band: usize,
    need_check: bool,
    rules: Vec<BoundRule>,
    counter_keys: Vec<String>,
    invalid_pixels: RuleCounts,
}

impl QualityBandEvaluator {
    /// Bind a quality raster to its rule table for `processing_band` (1-based) and resolve the
    /// configuration.
    ///
    /// Fails with a shape error when the raster does not cover the data grid after the scale
    /// resolution, and with a configuration or bit-width error when the declared width cannot
    /// hold the rules or the observed values.
    pub fn bind(
        variant: ProductVariant,
        layout: &'static QualityBandLayout,
        quality_band: QualityBand,
        data_shape: (usize, usize),
        processing_band: usize,
        config: &QcConfiguration,
    ) -> QcResult<Self> {
        let QualityBand {
            raster,
            num_bits,
            scale_resolution,
        } = quality_band;
        let scale_resolution = scale_resolution.or(layout.scale_resolution);
        if let Some(factor) = scale_resolution {
            if !(factor.is_finite() && factor > 0.0) {
                return Err(QcError::Configuration(format!(
                    "{} has invalid scale resolution {}",
                    layout.kind.full_name(),
                    factor
                )));
            }
        }

        let expected = match scale_resolution {
            Some(factor) => (
                (data_shape.0 as f64 * factor).ceil() as usize,
                (data_shape.1 as f64 * factor).ceil() as usize,
            ),
            None => data_shape,
        };
        if raster.dim() != expected {
            return Err(QcError::ShapeMismatch(format!(
                "{} raster is {:?}, data band {:?} with scale {:?} needs {:?}",
                layout.kind.full_name(),
                raster.dim(),
                data_shape,
                scale_resolution,
                expected
            )));
        }

        if processing_band == 0 {
            return Err(QcError::Configuration(
                "Processing bands are numbered from 1".to_string(),
            ));
        }

        let num_bits = if layout.is_bit_field() {
            let width = num_bits.or(layout.num_bits).unwrap_or(0);
            let required = layout.required_bits(processing_band);
            if (width as usize) < required {
                return Err(QcError::Configuration(format!(
                    "{} declares {} bits but band {} rules need {}",
                    layout.kind.full_name(),
                    width,
                    processing_band,
                    required
                )));
            }
            if let Some((min, max)) = value_bounds(&raster) {
                if min < 0 {
                    return Err(QcError::BitWidth { value: min, width });
                }
                if bit_length(max as u64) > width {
                    return Err(QcError::BitWidth { value: max, width });
                }
            }
            Some(width)
        } else {
            None
        };

        let mut evaluator = Self {
            variant,
            layout,
            raster,
            num_bits,
            scale_resolution,
            processing_band,
            need_check: true,
            rules: Vec::new(),
            counter_keys: Vec::new(),
            invalid_pixels: RuleCounts::new(),
        };
        evaluator.init_statistics(config)?;
        Ok(evaluator)
    }

    /// Resolve every rule key, reset the counters to zero and decide whether the band needs
    /// checking at all.
    ///
    /// A band is skipped when its configuration accepts every possible value: all enumerated
    /// and flag keys `true`, or angle bounds enclosing the physical domain of the angle.
    pub fn init_statistics(&mut self, config: &QcConfiguration) -> QcResult<()> {
        let section = self.variant.section();
        let kind = self.layout.kind;
        let mut rules = Vec::with_capacity(self.layout.rules.len());
        let mut counter_keys = Vec::new();
        let mut all_permissive = true;

        for spec in self.layout.rules {
            let keys = spec.keys(kind);
            let counter_base = counter_keys.len();
            let bound = match spec.shape {
                RuleShape::Enumerated { .. } | RuleShape::BandIndexed { .. } => {
                    let range = spec.bit_range(self.processing_band).ok_or_else(|| {
                        QcError::Configuration(format!(
                            "No bit range for {} in band {}",
                            spec.prefix(kind),
                            self.processing_band
                        ))
                    })?;
                    let allowed = keys
                        .iter()
                        .map(|key| config.get_bool(section, key))
                        .collect::<QcResult<Vec<bool>>>()?;
                    all_permissive &= allowed.iter().all(|&allowed| allowed);
                    BoundRule::Slice {
                        start: range.start,
                        len: range.end - range.start,
                        allowed,
                        counter_base,
                    }
                }
                RuleShape::Flag { position } => {
                    let allow_clear = config.get_bool(section, &keys[0])?;
                    let allow_set = config.get_bool(section, &keys[1])?;
                    all_permissive &= allow_clear && allow_set;
                    BoundRule::Flag {
                        position,
                        allow_clear,
                        allow_set,
                        counter_base,
                    }
                }
                RuleShape::Range { scale } => {
                    let min = config.get_float(section, &keys[0])?;
                    let max = config.get_float(section, &keys[1])?;
                    all_permissive &= match kind.angle_domain() {
                        Some((lowest, highest)) => min <= lowest && max >= highest,
                        None => false,
                    };
                    BoundRule::Range {
                        scale,
                        min,
                        max,
                        counter_base,
                    }
                }
            };
            rules.push(bound);
            counter_keys.extend(keys);
        }

        self.invalid_pixels = counter_keys.iter().map(|key| (key.clone(), 0)).collect();
        self.counter_keys = counter_keys;
        self.rules = rules;
        self.need_check = !all_permissive;

        if !self.need_check {
            log::debug!(
                "{} accepts every value for {}, skipping it",
                kind.full_name(),
                section
            );
        }
        Ok(())
    }

    /// Check one data band pixel.
    ///
    /// Every rule is evaluated and each failure counted when a tally is given; without a tally
    /// the first failure returns `false` straight away.
    pub fn check(&self, coordinate: PixelCoordinate, mut tally: Option<&mut RuleTally>) -> bool {
        if !self.need_check {
            return true;
        }

        let (row, col) = self.quality_index(coordinate);
        let raw = self.raster[[row, col]];
        let bits = self.num_bits.map(|width| BitString::from_checked(raw, width));

        let mut pass = true;
        for rule in &self.rules {
            for slot in rule.failures(bits.as_ref(), raw).into_iter().flatten() {
                pass = false;
                match tally.as_deref_mut() {
                    Some(tally) => tally.counts[slot] += 1,
                    None => return false,
                }
            }
        }
        pass
    }

    /// Quality grid cell holding a data band coordinate (nearest neighbour by truncation)
    pub fn quality_index(&self, coordinate: PixelCoordinate) -> (usize, usize) {
        match self.scale_resolution {
            Some(factor) => (
                (coordinate.row as f64 * factor) as usize,
                (coordinate.col as f64 * factor) as usize,
            ),
            None => (coordinate.row, coordinate.col),
        }
    }

    /// Fresh zeroed counters for a chunk
    pub fn new_tally(&self) -> RuleTally {
        RuleTally {
            counts: vec![0; self.counter_keys.len()],
        }
    }

    /// Counters of a tally keyed by rule key
    pub fn tally_counts(&self, tally: &RuleTally) -> RuleCounts {
        let mut counts = self.invalid_pixels.clone();
        for (key, &count) in self.counter_keys.iter().zip(tally.counts()) {
            if let Some(slot) = counts.get_mut(key) {
                *slot += count;
            }
        }
        counts
    }

    /// Zero-initialised counters of every rule key of this band
    pub fn invalid_pixels(&self) -> &RuleCounts {
        &self.invalid_pixels
    }

    pub fn need_check(&self) -> bool {
        self.need_check
    }

    pub fn kind(&self) -> QualityBandKind {
        self.layout.kind
    }

    pub fn full_name(&self) -> &'static str {
        self.layout.kind.full_name()
    }

    pub fn num_bits(&self) -> Option<u32> {
        self.num_bits
    }
}

#[cfg(feature = "parallel")]
fn value_bounds(raster: &QualityRaster) -> Option<(QcValue, QcValue)> {
    use ndarray::parallel::prelude::*;

    let min = raster.par_iter().copied().min()?;
    let max = raster.par_iter().copied().max()?;
    Some((min, max))
}

#[cfg(not(feature = "parallel"))]
fn value_bounds(raster: &QualityRaster) -> Option<(QcValue, QcValue)> {
    let min = raster.iter().copied().min()?;
    let max = raster.iter().copied().max()?;
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rule_table::{layout, RuleSpec, ANGLE_SCALE_FACTOR};
    use ndarray::Array2;

    static CLOUD_STATE_RULES: [RuleSpec; 1] = [RuleSpec::enumerated("cloud_state", 0, 2)];
    static TWO_BIT_LAYOUT: QualityBandLayout = QualityBandLayout {
        kind: QualityBandKind::StateFlags,
        num_bits: Some(2),
        scale_resolution: None,
        rules: &CLOUD_STATE_RULES,
    };

    fn declared(raster: QualityRaster, band_layout: &QualityBandLayout) -> QualityBand {
        QualityBand {
            raster,
            num_bits: band_layout.num_bits,
            scale_resolution: band_layout.scale_resolution,
        }
    }

    #[test]
    fn test_two_bit_value_fails_exactly_its_key() {
        let mut config = QcConfiguration::new();
        for key in ["sf_cloud_state_00", "sf_cloud_state_01", "sf_cloud_state_10"] {
            config.set("MXD09Q1", key, true);
        }
        config.set("MXD09Q1", "sf_cloud_state_11", false);

        let raster = Array2::from_shape_vec((1, 2), vec![0b11, 0b10]).unwrap();
        let evaluator = QualityBandEvaluator::bind(
            ProductVariant::Mxd09Q1,
            &TWO_BIT_LAYOUT,
            declared(raster, &TWO_BIT_LAYOUT),
            (1, 2),
            1,
            &config,
        )
        .unwrap();
        assert!(evaluator.need_check());

        let mut tally = evaluator.new_tally();
        assert!(!evaluator.check(PixelCoordinate::new(0, 0), Some(&mut tally)));
        assert!(evaluator.check(PixelCoordinate::new(0, 1), Some(&mut tally)));

        let counts = evaluator.tally_counts(&tally);
        assert_eq!(counts["sf_cloud_state_11"], 1);
        assert_eq!(counts.values().sum::<u64>(), 1);
    }

    #[test]
    fn test_zenith_angle_above_max() {
        let mut config = QcConfiguration::permissive();
        config.set("MXD09A1", "sza_min", 0i64).set("MXD09A1", "sza_max", 80i64);

        let sza = layout(ProductVariant::Mxd09A1, QualityBandKind::SolarZenith).unwrap();
        let raster = Array2::from_elem((2, 2), 9000);
        let evaluator = QualityBandEvaluator::bind(
            ProductVariant::Mxd09A1,
            sza,
            declared(raster, sza),
            (2, 2),
            1,
            &config,
        )
        .unwrap();

        approx::assert_abs_diff_eq!(9000.0 * ANGLE_SCALE_FACTOR, 90.0, epsilon = 1e-9);
        let mut tally = evaluator.new_tally();
        assert!(!evaluator.check(PixelCoordinate::new(1, 1), Some(&mut tally)));
        let counts = evaluator.tally_counts(&tally);
        assert_eq!(counts["sza_max"], 1);
        assert_eq!(counts["sza_min"], 0);
    }

    #[test]
    fn test_flag_pairing() {
        let mut config = QcConfiguration::permissive();
        config.set("MXD09Q1", "sf_salt_pan_0", true);
        config.set("MXD09Q1", "sf_salt_pan_1", false);
        let sf = layout(ProductVariant::Mxd09Q1, QualityBandKind::StateFlags).unwrap();

        // salt pan is digit 14 of 16, i.e. value bit 1
        let raster = Array2::from_shape_vec((1, 2), vec![0b10, 0b00]).unwrap();
        let evaluator =
            QualityBandEvaluator::bind(ProductVariant::Mxd09Q1, sf, declared(raster, sf), (1, 2), 1, &config)
                .unwrap();
        let mut tally = evaluator.new_tally();
        assert!(!evaluator.check(PixelCoordinate::new(0, 0), Some(&mut tally)));
        assert!(evaluator.check(PixelCoordinate::new(0, 1), Some(&mut tally)));
        assert_eq!(evaluator.tally_counts(&tally)["sf_salt_pan_1"], 1);
        assert_eq!(evaluator.tally_counts(&tally)["sf_salt_pan_0"], 0);

        config.set("MXD09Q1", "sf_salt_pan_0", false);
        let raster = Array2::from_shape_vec((1, 1), vec![0b00]).unwrap();
        let evaluator =
            QualityBandEvaluator::bind(ProductVariant::Mxd09Q1, sf, declared(raster, sf), (1, 1), 1, &config)
                .unwrap();
        let mut tally = evaluator.new_tally();
        assert!(!evaluator.check(PixelCoordinate::new(0, 0), Some(&mut tally)));
        assert_eq!(evaluator.tally_counts(&tally)["sf_salt_pan_0"], 1);
    }

    #[test]
    fn test_data_quality_follows_processing_band() {
        let mut config = QcConfiguration::permissive();
        config.set("MXD09GA", "rbq_data_quality_0111", false);
        let rbq = layout(ProductVariant::Mxd09GA, QualityBandKind::ReflectanceBandQuality).unwrap();

        // band 2 data quality occupies digits 6..10 of 32, i.e. value bits 22..26
        let value: QcValue = 0b0111 << 22;
        let raster = Array2::from_elem((1, 1), value);

        let band2 =
            QualityBandEvaluator::bind(ProductVariant::Mxd09GA, rbq, declared(raster.clone(), rbq), (1, 1), 2, &config)
                .unwrap();
        assert!(!band2.check(PixelCoordinate::new(0, 0), None));

        let band1 =
            QualityBandEvaluator::bind(ProductVariant::Mxd09GA, rbq, declared(raster, rbq), (1, 1), 1, &config)
                .unwrap();
        assert!(band1.check(PixelCoordinate::new(0, 0), None));
    }

    #[test]
    fn test_permissive_configuration_skips_band() {
        let config = QcConfiguration::permissive();
        let sf = layout(ProductVariant::Mxd09Q1, QualityBandKind::StateFlags).unwrap();
        let raster = Array2::from_shape_fn((3, 3), |(r, c)| ((r * 3 + c) * 7000) as QcValue);
        let evaluator =
            QualityBandEvaluator::bind(ProductVariant::Mxd09Q1, sf, declared(raster, sf), (3, 3), 1, &config)
                .unwrap();
        assert!(!evaluator.need_check());

        let mut tally = evaluator.new_tally();
        for row in 0..3 {
            for col in 0..3 {
                assert!(evaluator.check(PixelCoordinate::new(row, col), Some(&mut tally)));
            }
        }
        assert_eq!(tally.total(), 0);
    }

    #[test]
    fn test_angle_bounds_wider_than_domain_skip_band() {
        let mut config = QcConfiguration::permissive();
        config.set("MXD09A1", "rza_min", -200.0).set("MXD09A1", "rza_max", 181i64);
        let rza = layout(ProductVariant::Mxd09A1, QualityBandKind::RelativeZenith).unwrap();
        let raster = Array2::from_elem((1, 1), -17000);
        let evaluator =
            QualityBandEvaluator::bind(ProductVariant::Mxd09A1, rza, declared(raster.clone(), rza), (1, 1), 1, &config)
                .unwrap();
        assert!(!evaluator.need_check());

        config.set("MXD09A1", "rza_min", -90i64);
        let evaluator =
            QualityBandEvaluator::bind(ProductVariant::Mxd09A1, rza, declared(raster, rza), (1, 1), 1, &config)
                .unwrap();
        assert!(evaluator.need_check());
        assert!(!evaluator.check(PixelCoordinate::new(0, 0), None));
    }

    #[test]
    fn test_scale_resolution_maps_to_coarse_grid() {
        let mut config = QcConfiguration::permissive();
        config.set("MXD09GA", "sf_cloud_state_01", false);
        let sf = layout(ProductVariant::Mxd09GA, QualityBandKind::StateFlags).unwrap();

        // cloud state digits 0..2 of 16 are value bits 14..16
        let mut raster = Array2::zeros((2, 2));
        raster[[1, 0]] = 0b01 << 14;
        let evaluator =
            QualityBandEvaluator::bind(ProductVariant::Mxd09GA, sf, declared(raster, sf), (4, 4), 1, &config)
                .unwrap();

        assert_eq!(evaluator.quality_index(PixelCoordinate::new(3, 1)), (1, 0));
        assert!(!evaluator.check(PixelCoordinate::new(2, 0), None));
        assert!(!evaluator.check(PixelCoordinate::new(3, 1), None));
        assert!(evaluator.check(PixelCoordinate::new(1, 0), None));
        assert!(evaluator.check(PixelCoordinate::new(2, 2), None));
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let config = QcConfiguration::permissive();
        let sf = layout(ProductVariant::Mxd09GA, QualityBandKind::StateFlags).unwrap();
        let result = QualityBandEvaluator::bind(
            ProductVariant::Mxd09GA,
            sf,
            declared(Array2::zeros((3, 3)), sf),
            (4, 4),
            1,
            &config,
        );
        assert!(matches!(result, Err(QcError::ShapeMismatch(_))));
    }

    #[test]
    fn test_degenerate_scale_resolution_is_configuration_error() {
        let mut config = QcConfiguration::permissive();
        config.set("MXD09Q1", "sf_cloud_state_01", false);
        let sf = layout(ProductVariant::Mxd09Q1, QualityBandKind::StateFlags).unwrap();

        for factor in [0.0, -0.5, f64::NAN, f64::INFINITY] {
            let band = QualityBand {
                raster: Array2::zeros((0, 0)),
                num_bits: Some(16),
                scale_resolution: Some(factor),
            };
            let result =
                QualityBandEvaluator::bind(ProductVariant::Mxd09Q1, sf, band, (4, 4), 1, &config);
            assert!(
                matches!(result, Err(QcError::Configuration(_))),
                "scale resolution {}",
                factor
            );
        }
    }

    #[test]
    fn test_bit_width_errors_are_eager() {
        let config = QcConfiguration::permissive();
        let sf = layout(ProductVariant::Mxd09Q1, QualityBandKind::StateFlags).unwrap();

        let too_wide = Array2::from_elem((1, 1), 70_000);
        let result =
            QualityBandEvaluator::bind(ProductVariant::Mxd09Q1, sf, declared(too_wide, sf), (1, 1), 1, &config);
        assert!(matches!(result, Err(QcError::BitWidth { value: 70_000, width: 16 })));

        let narrow = QualityBand {
            raster: Array2::zeros((1, 1)),
            num_bits: Some(8),
            scale_resolution: None,
        };
        let result = QualityBandEvaluator::bind(ProductVariant::Mxd09Q1, sf, narrow, (1, 1), 1, &config);
        assert!(matches!(result, Err(QcError::Configuration(_))));
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let mut config = QcConfiguration::new();
        config.set("MXD09Q1", "sf_cloud_state_00", true);
        let sf = layout(ProductVariant::Mxd09Q1, QualityBandKind::StateFlags).unwrap();
        let result = QualityBandEvaluator::bind(
            ProductVariant::Mxd09Q1,
            sf,
            declared(Array2::zeros((1, 1)), sf),
            (1, 1),
            1,
            &config,
        );
        assert!(matches!(result, Err(QcError::Configuration(_))));
    }

    #[test]
    fn test_counters_initialised_with_every_key() {
        let config = QcConfiguration::permissive();
        let rbq = layout(ProductVariant::Mxd09Q1, QualityBandKind::ReflectanceBandQuality).unwrap();
        let evaluator = QualityBandEvaluator::bind(
            ProductVariant::Mxd09Q1,
            rbq,
            declared(Array2::zeros((1, 1)), rbq),
            (1, 1),
            1,
            &config,
        )
        .unwrap();
        // 4 modland + 16 data quality + 3 flags * 2
        assert_eq!(evaluator.invalid_pixels().len(), 26);
        assert!(evaluator.invalid_pixels().values().all(|&count| count == 0));
        assert_eq!(evaluator.num_bits(), Some(16));
    }
}
