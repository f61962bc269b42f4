//! MODIS granule metadata from the ECS XML sidecar (`*.hdf.xml`).

use crate::types::{ProductVariant, QcError, QcResult};
use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

const PLATFORM_TAG: &str = "PlatformShortName";
const SHORT_NAME_TAG: &str = "ShortName";
const GRANULE_ID_TAG: &str = "LocalGranuleID";
const BEGIN_DATE_TAG: &str = "RangeBeginningDate";

/// Identification of one granule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranuleMetadata {
    /// `Terra` or `Aqua`
    pub platform: String,
    /// e.g. `MOD09A1`
    pub short_name: String,
    pub local_granule_id: String,
    /// Sinusoidal grid tile, e.g. `h10v07`
    pub tile: String,
    pub start_date: NaiveDate,
}

impl GranuleMetadata {
    pub fn from_file<P: AsRef<Path>>(path: P) -> QcResult<Self> {
        let xml = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Reading granule metadata from {}", path.as_ref().display());
        Self::parse(&xml)
    }

    /// Parse the first occurrence of each identification element
    pub fn parse(xml: &str) -> QcResult<Self> {
        let fields = first_texts(
            xml,
            &[PLATFORM_TAG, SHORT_NAME_TAG, GRANULE_ID_TAG, BEGIN_DATE_TAG],
        )?;
        let field = |tag: &str| {
            fields
                .get(tag)
                .cloned()
                .ok_or_else(|| QcError::Metadata(format!("Missing <{}> element", tag)))
        };

        let local_granule_id = field(GRANULE_ID_TAG)?;
        let tile = tile_from_granule_id(&local_granule_id)?;
        let begin = field(BEGIN_DATE_TAG)?;
        let start_date = NaiveDate::parse_from_str(&begin, "%Y-%m-%d").map_err(|e| {
            QcError::Metadata(format!("Invalid {} '{}': {}", BEGIN_DATE_TAG, begin, e))
        })?;

        Ok(Self {
            platform: field(PLATFORM_TAG)?,
            short_name: field(SHORT_NAME_TAG)?,
            local_granule_id,
            tile,
            start_date,
        })
    }

    pub fn variant(&self) -> QcResult<ProductVariant> {
        ProductVariant::from_short_name(&self.short_name)
    }

    /// Year and day of year of the start date, e.g. `2015001`
    pub fn acquisition_id(&self) -> String {
        self.start_date.format("%Y%j").to_string()
    }
}

/// All granules of one run must come from the same platform, product and tile
pub fn validate_series(granules: &[GranuleMetadata]) -> QcResult<()> {
    let Some(first) = granules.first() else {
        return Ok(());
    };
    for granule in &granules[1..] {
        if granule.platform != first.platform {
            return Err(QcError::Metadata(format!(
                "Mixed platforms: {} and {}",
                first.platform, granule.platform
            )));
        }
        if granule.short_name != first.short_name {
            return Err(QcError::Metadata(format!(
                "Mixed products: {} and {}",
                first.short_name, granule.short_name
            )));
        }
        if granule.tile != first.tile {
            return Err(QcError::Metadata(format!(
                "Mixed tiles: {} and {}",
                first.tile, granule.tile
            )));
        }
    }
    Ok(())
}

/// Third dot-separated field of `MOD09A1.A2015001.h10v07.006.2015295072220.hdf`
fn tile_from_granule_id(granule_id: &str) -> QcResult<String> {
    let tile_pattern = Regex::new(r"^h\d{2}v\d{2}$")
        .map_err(|e| QcError::Metadata(format!("Regex error: {}", e)))?;
    granule_id
        .split('.')
        .nth(2)
        .filter(|tile| tile_pattern.is_match(tile))
        .map(str::to_string)
        .ok_or_else(|| {
            QcError::Metadata(format!("No tile identifier in granule id '{}'", granule_id))
        })
}

/// Text content of the first element named after each tag
fn first_texts(xml: &str, tags: &[&str]) -> QcResult<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut fields = HashMap::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                current = tags.contains(&name.as_str()).then_some(name);
            }
            Ok(Event::Text(text)) => {
                if let Some(tag) = current.take() {
                    let value = text
                        .unescape()
                        .map_err(|e| QcError::XmlParsing(format!("Bad text in <{}>: {}", tag, e)))?;
                    fields.entry(tag).or_insert_with(|| value.into_owned());
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(QcError::XmlParsing(format!(
                    "Error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }
    Ok(fields)
}
