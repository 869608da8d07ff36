//! Stable object keys for property lookups.
//!
//! Keys are derived from, in order: the Hipparcos number, the Gaia source id,
//! or the rounded equatorial position. Derivation is pure so the same object
//! maps to the same key in every run.

use crate::table::{Cell, Table};

const PRIMARY_ID_COLUMNS: &[&str] = &["HIP", "hip"];
const SECONDARY_ID_COLUMNS: &[&str] = &["source_id", "SOURCE_ID", "Source"];
const RA_COLUMNS: &[&str] = &["RAdeg", "RA_ICRS", "ra", "_RA"];
const DEC_COLUMNS: &[&str] = &["DEdeg", "DE_ICRS", "dec", "_DE"];

/// Identifiers known for one object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeySource {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub ra_deg: Option<f64>,
    pub dec_deg: Option<f64>,
}

impl KeySource {
    /// Collect identifiers from one row of a catalog table.
    #[must_use]
    pub fn from_row(table: &Table, row: usize) -> Self {
        let text = |candidates: &[&str]| {
            table
                .first_present(candidates)
                .and_then(|column| table.cell(row, column))
                .and_then(Cell::as_identifier)
        };
        let number = |candidates: &[&str]| {
            table
                .first_present(candidates)
                .and_then(|column| table.cell(row, column))
                .and_then(Cell::as_f64)
        };
        Self {
            primary: text(PRIMARY_ID_COLUMNS),
            secondary: text(SECONDARY_ID_COLUMNS),
            ra_deg: number(RA_COLUMNS),
            dec_deg: number(DEC_COLUMNS),
        }
    }

    /// The object key, or `None` when no identifier or position is known.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        if let Some(hip) = non_empty(self.primary.as_deref()) {
            return Some(format!("HIP {hip}"));
        }
        if let Some(gaia) = non_empty(self.secondary.as_deref()) {
            return Some(format!("Gaia DR3 {gaia}"));
        }
        match (self.ra_deg, self.dec_deg) {
            (Some(ra), Some(dec)) if ra.is_finite() && dec.is_finite() => {
                Some(format!("coord:{:09.5}{:+09.5}", ra.rem_euclid(360.0), dec))
            }
            _ => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Keys for every row of `table`, in row order; rows without any identifier are skipped.
#[must_use]
pub fn table_keys(table: &Table) -> Vec<String> {
    (0..table.len())
        .filter_map(|row| KeySource::from_row(table, row).key())
        .collect()
}

/// Trim and collapse internal whitespace so `"HIP  1 "` and `"HIP 1"` agree.
#[must_use]
pub fn normalize_object_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_identifier_priority() {
        let mut source = KeySource {
            primary: Some("32349".into()),
            secondary: Some("2947050466531873024".into()),
            ra_deg: Some(101.287),
            dec_deg: Some(-16.716),
        };
        assert_eq!(source.key().as_deref(), Some("HIP 32349"));
        source.primary = Some("  ".into());
        assert_eq!(source.key().as_deref(), Some("Gaia DR3 2947050466531873024"));
        source.secondary = None;
        assert_eq!(source.key().as_deref(), Some("coord:101.28700-16.71600"));
        source.ra_deg = None;
        assert_eq!(source.key(), None);
    }

    #[test]
    fn keys_are_derived_from_table_rows() {
        let mut table = Table::new(["HIP", "RAdeg", "DEdeg"]);
        table
            .push_row(vec![Cell::number(71683.0), Cell::number(219.9), Cell::number(-60.8)])
            .unwrap();
        table
            .push_row(vec![Cell::Null, Cell::number(5.0), Cell::number(1.25)])
            .unwrap();
        assert_eq!(KeySource::from_row(&table, 0).key().as_deref(), Some("HIP 71683"));
        assert_eq!(
            KeySource::from_row(&table, 1).key().as_deref(),
            Some("coord:005.00000+01.25000")
        );
        // derivation is deterministic across calls
        assert_eq!(KeySource::from_row(&table, 1), KeySource::from_row(&table, 1));
        table
            .push_row(vec![Cell::Null, Cell::Null, Cell::number(3.0)])
            .unwrap();
        assert_eq!(
            table_keys(&table),
            vec!["HIP 71683".to_string(), "coord:005.00000+01.25000".to_string()]
        );
    }

    #[test]
    fn decoded_gaia_ids_keep_every_digit() {
        let table: Table = serde_json::from_str(
            r#"{"columns":["source_id","Gmag"],"rows":[[2947050466531872800,5.1],[2947050466531872900,5.9]]}"#,
        )
        .unwrap();
        assert_eq!(
            table_keys(&table),
            vec![
                "Gaia DR3 2947050466531872800".to_string(),
                "Gaia DR3 2947050466531872900".to_string()
            ]
        );
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_object_name("  HIP\t  1 "), "HIP 1");
    }
}
