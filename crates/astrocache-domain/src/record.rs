//! Per-object property records and their additive merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Values computed after lookup (temperature, luminosity, cartesian position).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub luminosity_solar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_pc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_pc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_pc: Option<f64>,
}

impl DerivedFields {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn merge_from(&mut self, incoming: &DerivedFields) {
        overwrite_finite(&mut self.temperature_k, incoming.temperature_k);
        overwrite_finite(&mut self.luminosity_solar, incoming.luminosity_solar);
        overwrite_finite(&mut self.x_pc, incoming.x_pc);
        overwrite_finite(&mut self.y_pc, incoming.y_pc);
        overwrite_finite(&mut self.z_pc, incoming.z_pc);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectral_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_mag: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b_mag: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Member of the built-in supplemental catalog.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub supplemental: bool,
    #[serde(default, skip_serializing_if = "DerivedFields::is_empty")]
    pub derived: DerivedFields,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub fetched_at: Option<OffsetDateTime>,
}

impl PropertyRecord {
    /// Record marking `name` as attempted without any known properties.
    #[must_use]
    pub fn placeholder(name: &str, at: OffsetDateTime) -> Self {
        Self {
            display_name: Some(name.to_string()),
            fetched_at: Some(at),
            ..Self::default()
        }
    }

    /// True when nothing beyond the name and timestamp is known.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.spectral_type.is_none()
            && self.v_mag.is_none()
            && self.b_mag.is_none()
            && self.object_type.is_none()
            && !self.supplemental
            && self.derived.is_empty()
    }

    #[must_use]
    pub fn is_stale(&self, now: OffsetDateTime, max_age: time::Duration) -> bool {
        self.fetched_at.is_some_and(|at| now - at > max_age)
    }

    /// Apply the known fields of `incoming`; unset or non-finite incoming values never clear existing ones.
    pub fn merge_from(&mut self, incoming: &PropertyRecord) {
        overwrite(&mut self.display_name, &incoming.display_name);
        overwrite(&mut self.spectral_type, &incoming.spectral_type);
        overwrite_finite(&mut self.v_mag, incoming.v_mag);
        overwrite_finite(&mut self.b_mag, incoming.b_mag);
        overwrite(&mut self.object_type, &incoming.object_type);
        self.supplemental |= incoming.supplemental;
        self.derived.merge_from(&incoming.derived);
        overwrite(&mut self.fetched_at, &incoming.fetched_at);
    }
}

fn overwrite<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

/// Non-finite values have no JSON form and are dropped.
fn overwrite_finite(slot: &mut Option<f64>, incoming: Option<f64>) {
    if let Some(value) = incoming.filter(|value| value.is_finite()) {
        *slot = Some(value);
    }
}

/// Merge `incoming` into `records` by key. Returns the number of keys that were new.
pub fn merge_records<I>(records: &mut BTreeMap<String, PropertyRecord>, incoming: I) -> usize
where
    I: IntoIterator<Item = (String, PropertyRecord)>,
{
    let mut added = 0;
    for (key, record) in incoming {
        match records.get_mut(&key) {
            Some(existing) => existing.merge_from(&record),
            None => {
                let mut fresh = PropertyRecord::default();
                fresh.merge_from(&record);
                records.insert(key, fresh);
                added += 1;
            }
        }
    }
    added
}
