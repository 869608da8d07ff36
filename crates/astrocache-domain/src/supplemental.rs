//! Fixed catalog of well-known objects answered without a remote lookup.

use time::OffsetDateTime;

use crate::key::normalize_object_name;
use crate::record::PropertyRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct SupplementalEntry {
    pub name: String,
    pub aliases: Vec<String>,
    pub spectral_type: Option<String>,
    pub v_mag: Option<f64>,
    pub b_mag: Option<f64>,
    pub object_type: String,
}

impl SupplementalEntry {
    fn matches(&self, normalized: &str) -> bool {
        std::iter::once(&self.name)
            .chain(&self.aliases)
            .any(|candidate| normalize_object_name(candidate).eq_ignore_ascii_case(normalized))
    }

    fn record(&self, at: OffsetDateTime) -> PropertyRecord {
        PropertyRecord {
            display_name: Some(self.name.clone()),
            spectral_type: self.spectral_type.clone(),
            v_mag: self.v_mag,
            b_mag: self.b_mag,
            object_type: Some(self.object_type.clone()),
            supplemental: true,
            fetched_at: Some(at),
            ..PropertyRecord::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SupplementalCatalog {
    entries: Vec<SupplementalEntry>,
}

impl SupplementalCatalog {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The Sun and a few bright Messier objects.
    #[must_use]
    pub fn builtin() -> Self {
        let entry = |name: &str,
                     aliases: &[&str],
                     spectral_type: Option<&str>,
                     v_mag: f64,
                     b_mag: Option<f64>,
                     object_type: &str| SupplementalEntry {
            name: name.to_string(),
            aliases: aliases.iter().map(|alias| (*alias).to_string()).collect(),
            spectral_type: spectral_type.map(str::to_string),
            v_mag: Some(v_mag),
            b_mag,
            object_type: object_type.to_string(),
        };
        Self {
            entries: vec![
                entry("Sun", &["Sol"], Some("G2V"), -26.74, Some(-26.09), "Star"),
                entry(
                    "M31",
                    &["NGC 224", "Andromeda Galaxy"],
                    None,
                    3.44,
                    Some(4.36),
                    "Galaxy",
                ),
                entry(
                    "M42",
                    &["NGC 1976", "Orion Nebula"],
                    None,
                    4.0,
                    None,
                    "HII region",
                ),
                entry("M45", &["Pleiades", "Mel 22"], None, 1.6, None, "Open cluster"),
                entry(
                    "M13",
                    &["NGC 6205", "Hercules Cluster"],
                    None,
                    5.8,
                    None,
                    "Globular cluster",
                ),
            ],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record for `name` when it names a supplemental object (case-insensitive).
    #[must_use]
    pub fn lookup(&self, name: &str, at: OffsetDateTime) -> Option<PropertyRecord> {
        let normalized = normalize_object_name(name);
        self.entries
            .iter()
            .find(|entry| entry.matches(&normalized))
            .map(|entry| entry.record(at))
    }
}
