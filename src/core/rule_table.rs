//! Declarative QC rule tables for the supported MODIS surface reflectance products.
//!
//! Each product variant lists its quality bands in evaluation order; each band lists the
//! bit slices (or the scaled angle) it checks. Bit positions index the MSB-first digit string
//! of the value, the convention used by the product QA tables these rules were written from.
//! A single interpreter in [`crate::core::evaluator`] consumes these tables, so supporting a
//! new product means adding a table here.

use crate::types::{ProductVariant, QualityBandKind};
use std::ops::Range;

/// Scale factor turning raw angle values into degrees
pub const ANGLE_SCALE_FACTOR: f64 = 0.01;

/// Digits of the per-band data quality field
pub const DATA_QUALITY_BITS: usize = 4;

/// How one rule reads the QC value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleShape {
    /// Slice `[start, start + len)`; its digits select the `{prefix}_{bits}` key
    Enumerated { start: usize, len: usize },
    /// Enumerated slice starting at `base + (band - 1) * len` for processing band `band`
    BandIndexed { base: usize, len: usize },
    /// Single digit checked against the paired `{prefix}_0` / `{prefix}_1` keys
    Flag { position: usize },
    /// Whole value times `scale`, bounded by `{prefix}_min` / `{prefix}_max`
    Range { scale: f64 },
}

/// A named rule inside a quality band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleSpec {
    pub name: &'static str,
    pub shape: RuleShape,
}

impl RuleSpec {
    pub const fn enumerated(name: &'static str, start: usize, end: usize) -> Self {
        Self {
            name,
            shape: RuleShape::Enumerated {
                start,
                len: end - start,
            },
        }
    }

    pub const fn band_indexed(name: &'static str, base: usize, len: usize) -> Self {
        Self {
            name,
            shape: RuleShape::BandIndexed { base, len },
        }
    }

    pub const fn flag(name: &'static str, position: usize) -> Self {
        Self {
            name,
            shape: RuleShape::Flag { position },
        }
    }

    /// Angle bound check; keys are named after the band itself
    pub const fn range(scale: f64) -> Self {
        Self {
            name: "",
            shape: RuleShape::Range { scale },
        }
    }

    /// Key prefix, e.g. `sf_cloud_state` or `sza`
    pub fn prefix(&self, kind: QualityBandKind) -> String {
        if self.name.is_empty() {
            kind.id().to_string()
        } else {
            format!("{}_{}", kind.id(), self.name)
        }
    }

    /// Digits examined by this rule for the given processing band (1-based)
    pub fn bit_range(&self, band: usize) -> Option<Range<usize>> {
        match self.shape {
            RuleShape::Enumerated { start, len } => Some(start..start + len),
            RuleShape::BandIndexed { base, len } => {
                if band == 0 {
                    return None;
                }
                let start = base + (band - 1) * len;
                Some(start..start + len)
            }
            RuleShape::Flag { position } => Some(position..position + 1),
            RuleShape::Range { .. } => None,
        }
    }

    /// Every configuration key of this rule, in counter order.
    ///
    /// Enumerated keys are ordered by the integer value of their digits, so the value of a
    /// slice is also its offset in the list.
    pub fn keys(&self, kind: QualityBandKind) -> Vec<String> {
        let prefix = self.prefix(kind);
        match self.shape {
            RuleShape::Enumerated { len, .. } | RuleShape::BandIndexed { len, .. } => (0..1u64 << len)
                .map(|value| format!("{}_{:0width$b}", prefix, value, width = len))
                .collect(),
            RuleShape::Flag { .. } => vec![format!("{}_0", prefix), format!("{}_1", prefix)],
            RuleShape::Range { .. } => vec![format!("{}_min", prefix), format!("{}_max", prefix)],
        }
    }
}

/// Static description of one quality band of a product
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityBandLayout {
    pub kind: QualityBandKind,
    /// Binary width of the values, `None` for angle bands
    pub num_bits: Option<u32>,
    /// Data-to-quality grid ratio when the band is coarser than the data band
    pub scale_resolution: Option<f64>,
    pub rules: &'static [RuleSpec],
}

impl QualityBandLayout {
    /// All configuration keys consulted by this band
    pub fn keys(&self) -> Vec<String> {
        self.rules.iter().flat_map(|rule| rule.keys(self.kind)).collect()
    }

    /// Smallest width that holds every slice for `band`
    pub fn required_bits(&self, band: usize) -> usize {
        self.rules
            .iter()
            .filter_map(|rule| rule.bit_range(band))
            .map(|range| range.end)
            .max()
            .unwrap_or(0)
    }

    pub fn is_bit_field(&self) -> bool {
        self.num_bits.is_some()
    }
}

const SF_RULES: [RuleSpec; 11] = [
    RuleSpec::enumerated("cloud_state", 0, 2),
    RuleSpec::flag("cloud_shadow", 2),
    RuleSpec::enumerated("land_water", 3, 6),
    RuleSpec::enumerated("aerosol_quantity", 6, 8),
    RuleSpec::enumerated("cirrus_detected", 8, 10),
    RuleSpec::flag("internal_cloud_algorithm", 10),
    RuleSpec::flag("internal_fire_algorithm", 11),
    RuleSpec::flag("mod35_snow_ice", 12),
    RuleSpec::flag("pixel_adjacent_to_cloud", 13),
    RuleSpec::flag("salt_pan", 14),
    RuleSpec::flag("internal_snow_mask", 15),
];

// 500m reflectance QC, 32 bits
const RBQ_500M_RULES: [RuleSpec; 4] = [
    RuleSpec::enumerated("modland_qa", 0, 2),
    RuleSpec::band_indexed("data_quality", 2, DATA_QUALITY_BITS),
    RuleSpec::flag("atcorr", 30),
    RuleSpec::flag("adjcorr", 31),
];

// daily 250m reflectance QC, 16 bits
const RBQ_250M_DAILY_RULES: [RuleSpec; 4] = [
    RuleSpec::enumerated("modland_qa", 0, 2),
    RuleSpec::band_indexed("data_quality", 4, DATA_QUALITY_BITS),
    RuleSpec::flag("atcorr", 12),
    RuleSpec::flag("adjcorr", 13),
];

// 8-day 250m reflectance QC, 16 bits
const RBQ_250M_COMPOSITE_RULES: [RuleSpec; 5] = [
    RuleSpec::enumerated("modland_qa", 0, 2),
    RuleSpec::band_indexed("data_quality", 4, DATA_QUALITY_BITS),
    RuleSpec::flag("atcorr", 12),
    RuleSpec::flag("adjcorr", 13),
    RuleSpec::flag("difforbit", 14),
];

const ANGLE_RULES: [RuleSpec; 1] = [RuleSpec::range(ANGLE_SCALE_FACTOR)];

const fn bit_band(
    kind: QualityBandKind,
    num_bits: u32,
    scale_resolution: Option<f64>,
    rules: &'static [RuleSpec],
) -> QualityBandLayout {
    QualityBandLayout {
        kind,
        num_bits: Some(num_bits),
        scale_resolution,
        rules,
    }
}

const fn angle_band(kind: QualityBandKind, scale_resolution: Option<f64>) -> QualityBandLayout {
    QualityBandLayout {
        kind,
        num_bits: None,
        scale_resolution,
        rules: &ANGLE_RULES,
    }
}

static MXD09A1_BANDS: [QualityBandLayout; 5] = [
    bit_band(QualityBandKind::ReflectanceBandQuality, 32, None, &RBQ_500M_RULES),
    angle_band(QualityBandKind::SolarZenith, None),
    angle_band(QualityBandKind::ViewZenith, None),
    angle_band(QualityBandKind::RelativeZenith, None),
    bit_band(QualityBandKind::StateFlags, 16, None, &SF_RULES),
];

static MXD09Q1_BANDS: [QualityBandLayout; 2] = [
    bit_band(QualityBandKind::StateFlags, 16, None, &SF_RULES),
    bit_band(QualityBandKind::ReflectanceBandQuality, 16, None, &RBQ_250M_COMPOSITE_RULES),
];

static MXD09GA_BANDS: [QualityBandLayout; 4] = [
    bit_band(QualityBandKind::ReflectanceBandQuality, 32, None, &RBQ_500M_RULES),
    bit_band(QualityBandKind::StateFlags, 16, Some(0.5), &SF_RULES),
    angle_band(QualityBandKind::SolarZenith, Some(0.5)),
    angle_band(QualityBandKind::ViewZenith, Some(0.5)),
];

static MXD09GQ_BANDS: [QualityBandLayout; 4] = [
    bit_band(QualityBandKind::ReflectanceBandQuality, 16, None, &RBQ_250M_DAILY_RULES),
    bit_band(QualityBandKind::StateFlags, 16, Some(0.25), &SF_RULES),
    angle_band(QualityBandKind::SolarZenith, Some(0.25)),
    angle_band(QualityBandKind::ViewZenith, Some(0.25)),
];

/// Quality bands of a product, in evaluation order
pub fn layouts(variant: ProductVariant) -> &'static [QualityBandLayout] {
    match variant {
        ProductVariant::Mxd09A1 => &MXD09A1_BANDS,
        ProductVariant::Mxd09Q1 => &MXD09Q1_BANDS,
        ProductVariant::Mxd09GA => &MXD09GA_BANDS,
        ProductVariant::Mxd09GQ => &MXD09GQ_BANDS,
    }
}

/// Layout of one quality band of a product, if the product has it
pub fn layout(variant: ProductVariant, kind: QualityBandKind) -> Option<&'static QualityBandLayout> {
    layouts(variant).iter().find(|layout| layout.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_flag_keys() {
        let sf = layout(ProductVariant::Mxd09Q1, QualityBandKind::StateFlags).unwrap();
        let keys = sf.keys();
        // 4 + 2 + 8 + 4 + 4 + 6 * 2
        assert_eq!(keys.len(), 34);
        assert_eq!(keys[0], "sf_cloud_state_00");
        assert_eq!(keys[3], "sf_cloud_state_11");
        assert!(keys.contains(&"sf_land_water_101".to_string()));
        assert!(keys.contains(&"sf_internal_snow_mask_1".to_string()));
    }

    #[test]
    fn test_band_indexed_data_quality_offsets() {
        let rbq = layout(ProductVariant::Mxd09GA, QualityBandKind::ReflectanceBandQuality).unwrap();
        let data_quality = rbq.rules[1];
        assert_eq!(data_quality.bit_range(1), Some(2..6));
        assert_eq!(data_quality.bit_range(7), Some(26..30));
        assert_eq!(data_quality.bit_range(0), None);

        let rbq = layout(ProductVariant::Mxd09GQ, QualityBandKind::ReflectanceBandQuality).unwrap();
        assert_eq!(rbq.rules[1].bit_range(2), Some(8..12));
        assert_eq!(rbq.rules[1].keys(rbq.kind).len(), 16);
    }

    #[test]
    fn test_angle_keys() {
        let rza = layout(ProductVariant::Mxd09A1, QualityBandKind::RelativeZenith).unwrap();
        assert_eq!(rza.keys(), vec!["rza_min".to_string(), "rza_max".to_string()]);
        assert!(!rza.is_bit_field());
        assert!(layout(ProductVariant::Mxd09GA, QualityBandKind::RelativeZenith).is_none());
    }

    #[test]
    fn test_tables_fit_declared_widths() {
        for variant in ProductVariant::ALL {
            for band_layout in layouts(variant) {
                if let Some(bits) = band_layout.num_bits {
                    assert!(
                        band_layout.required_bits(1) <= bits as usize,
                        "{} {} needs more than {} bits",
                        variant,
                        band_layout.kind,
                        bits
                    );
                }
            }
        }
    }

    #[test]
    fn test_evaluation_order_per_variant() {
        let kinds: Vec<_> = layouts(ProductVariant::Mxd09Q1).iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![QualityBandKind::StateFlags, QualityBandKind::ReflectanceBandQuality]
        );
        assert_eq!(layouts(ProductVariant::Mxd09A1).len(), 5);
        assert_eq!(
            layout(ProductVariant::Mxd09GQ, QualityBandKind::StateFlags).unwrap().scale_resolution,
            Some(0.25)
        );
    }
}
