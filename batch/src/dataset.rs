//! Splitting of the POD5 dataset into per-GPU chunks.
//!
//! For every subset and chunk count a plain-text list of file names is written to the
//! data bucket. The manifest maps subset and chunk count to the chunk directories the
//! jobs read from. On a host with the shared filesystem mounted, the chunk directories
//! are created as directories of symlinks to the POD5 files.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use resources::{client::ObjectStore, models::S3Url};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub const POD5_FILES_PREFIX: &str = "pod5-all-files/";
pub const FILE_LISTS_PREFIX: &str = "pod5-file-lists/";
pub const MANIFEST_KEY: &str = "pod5-subsets/manifest.json";

/// Named subsets and the number of files they take from the start of the dataset.
pub const SUBSETS: [(&str, Option<usize>); 5] = [
    ("wgs_full_set", None),
    ("wgs_subset_8_files", Some(8)),
    ("wgs_subset_16_files", Some(16)),
    ("wgs_subset_64_files", Some(64)),
    ("wgs_subset_128_files", Some(128)),
];

lazy_static! {
    static ref FILE_NUMBER: Regex = Regex::new(r"_(?P<file_no>[0-9]+)\.pod5").unwrap();
}

/// Sequence number of a POD5 file, e.g. 17 for `PAM63974_pass_0ee7c1b5_17.pod5`.
pub fn file_number(name: &str) -> Option<u64> {
    FILE_NUMBER
        .captures(name)
        .and_then(|captures| captures.name("file_no"))
        .and_then(|number| number.as_str().parse().ok())
}

/// Split into `n` consecutive chunks whose sizes differ by at most one,
/// the larger chunks first.
pub fn array_split<T: Clone>(items: &[T], n: usize) -> Vec<Vec<T>> {
    if n == 0 {
        return vec![];
    }
    let base = items.len() / n;
    let extra = items.len() % n;
    let mut chunks = Vec::with_capacity(n);
    let mut start = 0;
    for idx in 0..n {
        let size = base + usize::from(idx < extra);
        chunks.push(items[start..start + size].to_vec());
        start += size;
    }
    chunks
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subset {
    pub num_files: Option<usize>,
    /// Chunk directories keyed by the chunk count.
    #[serde(flatten)]
    pub chunks: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetManifest {
    subsets: BTreeMap<String, Subset>,
}

impl DatasetManifest {
    /// Chunk directories of `subset` split into `count` chunks.
    pub fn chunks(&self, subset: &str, count: u32) -> Result<&[String]> {
        self.subsets
            .get(subset)
            .ok_or_else(|| anyhow!("Unknown data set {}", subset))?
            .chunks
            .get(&count.to_string())
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow!("Data set {} is not split into {} chunks", subset, count))
    }

    pub async fn load(objects: &dyn ObjectStore, bucket: &str) -> Result<Self> {
        let url = S3Url::new(bucket, MANIFEST_KEY);
        let content = objects
            .get_object(&url)
            .await
            .with_context(|| format!("Failed to fetch dataset manifest {}", url))?;
        serde_json::from_slice(&content).with_context(|| format!("Invalid manifest {}", url))
    }

    pub async fn save(&self, objects: &dyn ObjectStore, bucket: &str) -> Result<S3Url> {
        let url = S3Url::new(bucket, MANIFEST_KEY);
        objects
            .put_object(&url, serde_json::to_vec_pretty(self)?)
            .await
            .with_context(|| format!("Failed to upload {}", url))?;
        Ok(url)
    }
}

/// Name of a chunk directory, also the name of its file list in the bucket.
pub fn chunk_name(subset: &str, count: u32, idx: usize) -> String {
    format!("{}_{}_{}.lst", subset, count, idx)
}

/// Create `chunk_dir` holding a symlink to every file of the chunk in `pod5_dir`.
/// Links that already exist are kept.
pub async fn link_chunk(pod5_dir: &Path, chunk_dir: &Path, files: &[String]) -> Result<()> {
    fs::create_dir_all(chunk_dir)
        .await
        .with_context(|| format!("Failed to create {}", chunk_dir.display()))?;
    for file in files {
        let link = chunk_dir.join(file);
        if fs::symlink_metadata(&link).await.is_ok() {
            continue;
        }
        fs::symlink(pod5_dir.join(file), &link)
            .await
            .with_context(|| format!("Failed to link {}", link.display()))?;
    }
    Ok(())
}

pub struct DatasetPreparer {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    chunk_root: String,
    chunk_counts: Vec<u32>,
    /// Directory of the POD5 files on the shared filesystem, set when the chunk
    /// directories are to be created.
    pod5_dir: Option<PathBuf>,
}

impl DatasetPreparer {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        bucket: String,
        chunk_root: String,
        chunk_counts: Vec<u32>,
    ) -> Self {
        Self {
            objects,
            bucket,
            chunk_root: chunk_root.trim_end_matches('/').to_owned(),
            chunk_counts,
            pod5_dir: None,
        }
    }

    pub fn with_links(mut self, pod5_dir: PathBuf) -> Self {
        self.pod5_dir = Some(pod5_dir);
        self
    }

    /// Names of the POD5 files below `prefix`, ordered by their sequence number.
    pub async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self
            .objects
            .list_objects(&self.bucket, prefix)
            .await
            .with_context(|| format!("Failed to list s3://{}/{}", self.bucket, prefix))?;
        let mut files: Vec<(u64, String)> = objects
            .into_iter()
            .filter_map(|object| {
                let name = object.key.rsplit('/').next()?.to_owned();
                file_number(&name).map(|number| (number, name))
            })
            .collect();
        files.sort();
        Ok(files.into_iter().map(|(_, name)| name).collect())
    }

    /// Write the chunk lists of every subset and chunk count, then the manifest.
    /// With a POD5 directory set, the chunk directories are linked as well.
    pub async fn prepare(&self, prefix: &str) -> Result<DatasetManifest> {
        let files = self.list_files(prefix).await?;
        tracing::info!("Found {} POD5 files below {}", files.len(), prefix);

        let mut manifest = DatasetManifest::default();
        for (subset_name, num_files) in SUBSETS {
            let selected = &files[..num_files.map_or(files.len(), |n| n.min(files.len()))];
            let mut subset = Subset {
                num_files,
                chunks: BTreeMap::new(),
            };
            for &count in &self.chunk_counts {
                let mut directories = vec![];
                for (idx, chunk) in array_split(selected, count as usize).iter().enumerate() {
                    let name = chunk_name(subset_name, count, idx);
                    let url = S3Url::new(&self.bucket, format!("{}{}", FILE_LISTS_PREFIX, name));
                    self.objects
                        .put_object(&url, chunk.join("\n").into_bytes())
                        .await
                        .with_context(|| format!("Failed to upload {}", url))?;
                    let directory = format!("{}/{}", self.chunk_root, name);
                    if let Some(pod5_dir) = &self.pod5_dir {
                        link_chunk(pod5_dir, Path::new(&directory), chunk).await?;
                    }
                    directories.push(directory);
                }
                subset.chunks.insert(count.to_string(), directories);
            }
            tracing::info!(
                "Prepared data set {} with {} files",
                subset_name,
                selected.len()
            );
            manifest.subsets.insert(subset_name.to_owned(), subset);
        }

        let url = manifest.save(self.objects.as_ref(), &self.bucket).await?;
        tracing::info!("Saved dataset manifest to {}", url);
        Ok(manifest)
    }
}
