use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::PgPool;

use crate::blob::BlobStore;
use crate::cache::FetchCache;
use crate::db;
use crate::ecri::EcriTable;
use crate::error::{DashboardError, Result};
use crate::models::{Facility, MoveOutRecord, OccupancyRecord};

/// Cached access to the relational and blob collaborators.
#[derive(Debug, Clone)]
pub struct DataSource {
    pool: Option<PgPool>,
    blobs: Option<BlobStore>,
    cache: FetchCache,
    series_start: NaiveDate,
}

impl DataSource {
    pub fn new(
        pool: Option<PgPool>,
        blobs: Option<BlobStore>,
        cache: FetchCache,
        series_start: NaiveDate,
    ) -> Self {
        Self {
            pool,
            blobs,
            cache,
            series_start,
        }
    }

    fn pool(&self, source_key: &str) -> Result<&PgPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| DashboardError::fetch(source_key, "no database configured"))
    }

    pub async fn occupants(&self) -> Result<Arc<Vec<OccupancyRecord>>> {
        let pool = self.pool(db::OCCUPANTS_KEY)?;
        self.cache
            .try_get_or_fetch(db::OCCUPANTS_KEY, || db::fetch_occupants(pool, self.series_start))
            .await
    }

    pub async fn move_outs(&self) -> Result<Arc<Vec<MoveOutRecord>>> {
        let pool = self.pool(db::MOVE_OUTS_KEY)?;
        self.cache
            .try_get_or_fetch(db::MOVE_OUTS_KEY, || db::fetch_move_outs(pool, self.series_start))
            .await
    }

    pub async fn facilities(&self) -> Result<Arc<Vec<Facility>>> {
        let pool = self.pool(db::FACILITIES_KEY)?;
        self.cache
            .try_get_or_fetch(db::FACILITIES_KEY, || db::fetch_facilities(pool))
            .await
    }

    /// Site codes belonging to `region`, compared case-insensitively.
    pub async fn region_sites(&self, region: &str) -> Result<BTreeSet<String>> {
        let facilities = self.facilities().await?;
        let sites: BTreeSet<String> = facilities
            .iter()
            .filter(|f| f.region.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(region)))
            .map(|f| f.site_code.clone())
            .collect();
        if sites.is_empty() {
            return Err(DashboardError::EmptyResult(format!("region {region:?}")));
        }
        Ok(sites)
    }

    pub async fn ecri_table(&self, bucket: &str, key: &str) -> Result<Arc<EcriTable>> {
        let source_key = BlobStore::source_key(bucket, key);
        let blobs = self
            .blobs
            .as_ref()
            .ok_or_else(|| DashboardError::fetch(&source_key, "no blob store configured"))?;
        self.cache
            .try_get_or_fetch(&source_key, || async {
                let text = blobs.fetch_text(bucket, key).await?;
                EcriTable::from_csv(&source_key, &text)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(blobs: Option<BlobStore>) -> DataSource {
        DataSource::new(
            None,
            blobs,
            FetchCache::default(),
            NaiveDate::from_ymd_opt(2019, 5, 31).unwrap(),
        )
    }

    #[tokio::test]
    async fn ecri_table_is_memoized_by_source_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rev-mgt");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("ecris.csv"), "model,notification_date\nA,2023-01-01\n").unwrap();

        let source = source(Some(BlobStore::local(dir.path())));
        let first = source.ecri_table("rev-mgt", "ecris.csv").await.unwrap();
        assert_eq!(first.len(), 1);

        // served from cache even after the object changes
        std::fs::write(path.join("ecris.csv"), "model,notification_date\n").unwrap();
        let second = source.ecri_table("rev-mgt", "ecris.csv").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn missing_collaborators_are_fetch_errors() {
        let source = source(None);
        assert!(matches!(
            source.occupants().await.unwrap_err(),
            DashboardError::DataFetch { .. }
        ));
        assert!(matches!(
            source.ecri_table("rev-mgt", "ecris.csv").await.unwrap_err(),
            DashboardError::DataFetch { .. }
        ));
    }

    #[tokio::test]
    async fn missing_ecri_object_is_a_fetch_error_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(Some(BlobStore::local(dir.path())));
        let err = source.ecri_table("rev-mgt", "ecris.csv").await.unwrap_err();
        assert!(matches!(err, DashboardError::DataFetch { ref source_key, .. } if source_key == "blob:rev-mgt/ecris.csv"));

        std::fs::create_dir_all(dir.path().join("rev-mgt")).unwrap();
        std::fs::write(dir.path().join("rev-mgt/ecris.csv"), "model,notification_date\nA,2023-01-01\n").unwrap();
        assert_eq!(source.ecri_table("rev-mgt", "ecris.csv").await.unwrap().len(), 1);
    }
}
