use std::sync::{Arc, Mutex};

use anyhow::Result;
use astrocache_core::domain::{
    Catalog, Cell, DatasetRequest, FetchConstraint, QueryMode, Table, DISTANCE_LY_COLUMN,
    LY_PER_PARSEC,
};
use astrocache_core::{
    CacheStatus, CatalogCacheManager, CoverageConfig, RemoteCatalogFetcher,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("astrocache_core=debug")
        .with_test_writer()
        .try_init();
}

/// Remote catalog stand-in: a fixed star list filtered by each constraint.
struct SkyFetcher {
    sky: Table,
    calls: Mutex<Vec<FetchConstraint>>,
}

impl SkyFetcher {
    fn new(sky: Table) -> Arc<Self> {
        Arc::new(Self {
            sky,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<FetchConstraint> {
        self.calls.lock().unwrap().clone()
    }
}

impl RemoteCatalogFetcher for SkyFetcher {
    fn fetch_range(&self, catalog: Catalog, constraint: &FetchConstraint) -> Result<Table> {
        self.calls.lock().unwrap().push(*constraint);
        let column = catalog.constraint_column(constraint.mode());
        let mut rows = Table::new(self.sky.columns().to_vec());
        for (idx, row) in self.sky.rows().iter().enumerate() {
            let value = self.sky.cell(idx, column).and_then(Cell::as_f64);
            if value.is_some_and(|v| constraint.admits(v)) {
                rows.push_row(row.clone())?;
            }
        }
        Ok(rows)
    }
}

/// Hipparcos-like rows: star `n` sits at `4n` light years with magnitude `n / 2`.
fn sky() -> Table {
    let mut table = Table::new(["HIP", "Plx", "Vmag"]);
    for n in 1..=20u32 {
        let ly = 4.0 * f64::from(n);
        table
            .push_row(vec![
                Cell::number(f64::from(1000 + n)),
                Cell::number(1000.0 / (ly / LY_PER_PARSEC)),
                Cell::number(f64::from(n) / 2.0),
            ])
            .unwrap();
    }
    table
}

fn manager(root: &std::path::Path, fetcher: &Arc<SkyFetcher>) -> CatalogCacheManager {
    CatalogCacheManager::new(root, CoverageConfig::disabled(), Box::new(Arc::clone(fetcher)))
}

#[test]
fn narrower_distance_request_is_served_from_cache() -> Result<()> {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let fetcher = SkyFetcher::new(sky());
    let cache = manager(tmp.path(), &fetcher);

    let seeded = cache.load_dataset(&DatasetRequest::new(
        Catalog::Hipparcos,
        QueryMode::Distance,
        50.0,
    ))?;
    assert_eq!(seeded.status, CacheStatus::Missing);
    assert_eq!(seeded.table.len(), 12);
    assert_eq!(fetcher.calls().len(), 1);

    let request = DatasetRequest::new(Catalog::Hipparcos, QueryMode::Distance, 30.0);
    let outcome = cache.load_dataset(&request)?;
    assert_eq!(
        outcome.status,
        CacheStatus::Subset {
            cached_limit: 50.0
        }
    );
    assert_eq!(fetcher.calls().len(), 1, "subset must not touch the network");
    assert_eq!(outcome.fetched_rows, 0);

    let distances: Vec<f64> = outcome
        .table
        .numbers(DISTANCE_LY_COLUMN)
        .map(|d| d.expect("distance present"))
        .collect();
    assert_eq!(distances.len(), 7);
    assert!(distances.iter().all(|d| *d <= 30.0 + 1e-9));
    let expected = seeded.table.filter_at_most(DISTANCE_LY_COLUMN, 30.0);
    assert_eq!(outcome.table, expected);
    Ok(())
}

#[test]
fn fainter_magnitude_request_fetches_only_the_delta() -> Result<()> {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let fetcher = SkyFetcher::new(sky());
    let cache = manager(tmp.path(), &fetcher);

    let seeded = cache.load_dataset(&DatasetRequest::new(
        Catalog::Hipparcos,
        QueryMode::Magnitude,
        4.0,
    ))?;
    assert_eq!(seeded.table.len(), 8);

    let request = DatasetRequest::new(Catalog::Hipparcos, QueryMode::Magnitude, 6.0);
    let outcome = cache.load_dataset(&request)?;
    assert_eq!(
        outcome.status,
        CacheStatus::Expand {
            cached_limit: 4.0
        }
    );

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[1],
        FetchConstraint::MagnitudeBetween { min: 4.0, max: 6.0 }
    );
    // the inclusive delta re-fetches the star at exactly 4.0; dedup drops it
    assert_eq!(outcome.fetched_rows, 5);
    assert_eq!(outcome.table.len(), 12);
    assert!(outcome.table.column_index(DISTANCE_LY_COLUMN).is_some());
    assert!(outcome
        .table
        .numbers(DISTANCE_LY_COLUMN)
        .all(|distance| distance.is_some()));

    let meta: serde_json::Value = serde_json::from_slice(&std::fs::read(
        cache.metadata_path(Catalog::Hipparcos, QueryMode::Magnitude),
    )?)?;
    assert_eq!(meta["limit_value"], 6.0);
    assert_eq!(meta["entry_count"], 12);
    assert_eq!(meta["data_max"], 6.0);

    let again = cache.load_dataset(&request)?;
    assert_eq!(again.status, CacheStatus::Exact);
    assert_eq!(fetcher.calls().len(), 2);
    Ok(())
}

#[test]
fn switching_modes_regenerates_the_dataset() -> Result<()> {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let fetcher = SkyFetcher::new(sky());
    let cache = manager(tmp.path(), &fetcher);

    cache.load_dataset(&DatasetRequest::new(Catalog::Gaia, QueryMode::Distance, 20.0))?;
    let outcome =
        cache.load_dataset(&DatasetRequest::new(Catalog::Gaia, QueryMode::Magnitude, 2.0))?;
    // modes are cached in separate files, so the magnitude request starts from nothing
    assert_eq!(outcome.status, CacheStatus::Missing);
    assert_eq!(fetcher.calls().len(), 2);
    assert!(outcome.to_string().starts_with("gaia magnitude <= 2 mag: cache miss"));
    Ok(())
}
