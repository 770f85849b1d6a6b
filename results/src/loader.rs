//! Loading of the report table and the instance specs, with a local cache.
//!
//! Every scanned table is kept as `results_table_{name}.json` in the cache directory
//! and results are always read from the merged cache, so tables of torn down
//! benchmark environments remain part of the report.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use resources::{
    client::{ObjectStore, ParameterStore, ResultStore},
    models::Parameter,
    objects::result::ResultRecord,
    registry::Registry,
};
use tokio::fs;

const TABLE_CACHE_PREFIX: &str = "results_table_";
const INSTANCE_SPECS_CACHE: &str = "instance_specs.json";

pub struct Loader<'a> {
    params: &'a dyn ParameterStore,
    cache_dir: PathBuf,
    prefix: String,
}

impl<'a> Loader<'a> {
    pub fn new(params: &'a dyn ParameterStore, cache_dir: PathBuf, prefix: String) -> Self {
        Self {
            params,
            cache_dir,
            prefix,
        }
    }

    /// Scan the current report table into the cache, then read all cached tables.
    pub async fn load_results(&self, store: &dyn ResultStore) -> Result<Vec<ResultRecord>> {
        match self.refresh_results(store).await {
            Ok(path) => tracing::info!("Cached report table in {}", path.display()),
            Err(err) => tracing::warn!("Using cached results only: {:#}", err),
        }
        self.cached_results().await
    }

    async fn refresh_results(&self, store: &dyn ResultStore) -> Result<PathBuf> {
        let parameter = Parameter::ReportsTableName.path(&self.prefix);
        let table = self
            .params
            .get_parameter(&parameter)
            .await
            .with_context(|| format!("Failed to read parameter {}", parameter))?;
        let records = store
            .scan(&table)
            .await
            .with_context(|| format!("Failed to scan table {}", table))?;
        tracing::debug!("Scanned {} rows from {}", records.len(), table);

        fs::create_dir_all(&self.cache_dir).await?;
        let path = self
            .cache_dir
            .join(format!("{}{}.json", TABLE_CACHE_PREFIX, table));
        fs::write(&path, serde_json::to_vec_pretty(&records)?)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// All cached tables in file name order, the first row of a job id wins.
    pub async fn cached_results(&self) -> Result<Vec<ResultRecord>> {
        let mut paths = vec![];
        if fs::metadata(&self.cache_dir).await.is_ok() {
            let mut entries = fs::read_dir(&self.cache_dir)
                .await
                .with_context(|| format!("Failed to read {}", self.cache_dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(TABLE_CACHE_PREFIX) && name.ends_with(".json") {
                    paths.push(entry.path());
                }
            }
        }
        paths.sort();

        let mut seen = HashSet::new();
        let mut results = vec![];
        for path in paths {
            for record in read_json::<Vec<ResultRecord>>(&path).await? {
                if seen.insert(record.job_id.to_owned()) {
                    results.push(record);
                }
            }
        }
        Ok(results)
    }

    /// The published instance type map, or its last cached copy.
    pub async fn load_instance_specs(&self, objects: &dyn ObjectStore) -> Result<Registry> {
        let path = self.cache_dir.join(INSTANCE_SPECS_CACHE);
        match Registry::load(self.params, objects, &self.prefix).await {
            Ok(registry) => {
                fs::create_dir_all(&self.cache_dir).await?;
                fs::write(&path, registry.to_json()?)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                Ok(registry)
            },
            Err(err) => {
                tracing::warn!("Using cached instance specs: {:#}", err);
                let json = fs::read(&path)
                    .await
                    .with_context(|| format!("No cached instance specs in {}", path.display()))?;
                Registry::from_json(&json)
            },
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
