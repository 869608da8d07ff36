//! Catalog and query-mode identities shared by every cache component.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Light years per parsec.
pub const LY_PER_PARSEC: f64 = 3.261_563_777;

/// Columns that may carry a parallax in milliarcseconds, in preference order.
pub const PARALLAX_COLUMNS: &[&str] = &["Plx", "parallax"];

/// Derived distance columns written by [`crate::Table::derive_distances`].
pub const DISTANCE_PC_COLUMN: &str = "Distance_pc";
pub const DISTANCE_LY_COLUMN: &str = "Distance_ly";

const MAGNITUDE_COLUMNS: &[&str] = &["Apparent_Magnitude", "Vmag", "phot_g_mean_mag", "Gmag"];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Catalog {
    Hipparcos,
    Gaia,
}

impl Catalog {
    pub const ALL: [Catalog; 2] = [Catalog::Hipparcos, Catalog::Gaia];

    /// Identifier handed to the remote catalog service.
    #[must_use]
    pub fn remote_id(self) -> &'static str {
        match self {
            Catalog::Hipparcos => "I/239/hip_main",
            Catalog::Gaia => "I/355/gaiadr3",
        }
    }

    /// Identifier columns used for deduplication; the first one present wins.
    #[must_use]
    pub fn identifier_columns(self) -> &'static [&'static str] {
        match self {
            Catalog::Hipparcos => &["HIP", "hip", "source_id", "SOURCE_ID"],
            Catalog::Gaia => &["source_id", "SOURCE_ID", "Source", "HIP"],
        }
    }

    /// Remote column the fetch constraint applies to.
    #[must_use]
    pub fn constraint_column(self, mode: QueryMode) -> &'static str {
        match (self, mode) {
            (_, QueryMode::Distance) => "Plx",
            (Catalog::Hipparcos, QueryMode::Magnitude) => "Vmag",
            (Catalog::Gaia, QueryMode::Magnitude) => "Gmag",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QueryMode {
    Distance,
    Magnitude,
}

impl QueryMode {
    /// Candidate columns for the quantity a limit applies to, in preference order.
    #[must_use]
    pub fn governing_columns(self) -> &'static [&'static str] {
        match self {
            QueryMode::Distance => &[DISTANCE_LY_COLUMN],
            QueryMode::Magnitude => MAGNITUDE_COLUMNS,
        }
    }
}

/// Parallax in milliarcseconds for an object at `distance_ly`.
#[must_use]
pub fn parallax_for_distance_ly(distance_ly: f64) -> f64 {
    1000.0 / (distance_ly / LY_PER_PARSEC)
}
