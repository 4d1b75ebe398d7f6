//! Two-tier (memory + disk) response cache, warmed once from a popular-path
//! list and frozen.
//!
//! During warm-up a pool of fetchers pulls paths off a shared queue and
//! funnels the responses to a single admitting owner, so admissions are
//! serialized without a lock on the hot path later: once sealed, the tier
//! maps never change and readers touch no synchronization at all.
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{CacheError, CdnError, CdnResult};
use crate::http;

/// Paths outside this prefix are not warmed. Domain-specific: it lines up
/// with the wiki mirror this CDN fronts.
pub const POPULAR_PATH_PREFIX: &str = "/wiki";

// warm-up stops once the combined free capacity drops below this
const FREE_CAPACITY_FLOOR: u64 = 100 * 1024;

// concurrent warm-up fetchers
const WARM_WORKERS: usize = 8;

/// Which tier admitted an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Mem,
    Disk,
}

/// Entries are keyed by the lower-cased request path and live in exactly one
/// tier. Sizes are the serialized-response byte lengths, the same bytes that
/// are written to disk and back to clients.
#[derive(Debug)]
pub struct TieredCache {
    mem_capacity: u64,
    disk_capacity: u64,
    mem_used: u64,
    disk_used: u64,
    mem: HashMap<String, Vec<u8>>,
    disk: HashMap<String, PathBuf>,
    dir: PathBuf,
    built: bool,
}

impl TieredCache {
    pub fn new(mem_capacity: u64, disk_capacity: u64, dir: impl Into<PathBuf>) -> Self {
        TieredCache {
            mem_capacity,
            disk_capacity,
            mem_used: 0,
            disk_used: 0,
            mem: HashMap::new(),
            disk: HashMap::new(),
            dir: dir.into(),
            built: false,
        }
    }

    /// Admission: memory tier if the entry fits, disk tier otherwise,
    /// rejection (`Ok(None)`) when neither has room or the path is already
    /// cached. There is no eviction; a full cache stays full.
    pub async fn put(&mut self, path: &str, body: &[u8]) -> CdnResult<Option<Tier>> {
        let key = path.to_lowercase();
        if self.mem.contains_key(&key) || self.disk.contains_key(&key) {
            return Ok(None);
        }

        let size = body.len() as u64;
        if size <= self.mem_capacity - self.mem_used {
            self.mem_used += size;
            self.mem.insert(key, body.to_vec());
            return Ok(Some(Tier::Mem));
        }
        if size <= self.disk_capacity - self.disk_used {
            let file = self.dir.join(file_name_for(&key));
            tokio::fs::write(&file, body).await?;
            self.disk_used += size;
            self.disk.insert(key, file);
            return Ok(Some(Tier::Disk));
        }

        Ok(None)
    }

    /// Look a path up: the stored response bytes on a hit, `NotBuilt` before
    /// warm-up has sealed the cache, `Miss` when the path is in neither
    /// tier. Disk-tier I/O failures surface as errors; callers treat them
    /// like a miss.
    pub async fn get(&self, path: &str) -> CdnResult<Vec<u8>> {
        if !self.built {
            return Err(CdnError::Cache(CacheError::NotBuilt));
        }
        let key = path.to_lowercase();
        if let Some(body) = self.mem.get(&key) {
            return Ok(body.clone());
        }
        match self.disk.get(&key) {
            Some(file) => Ok(tokio::fs::read(file).await?),
            None => Err(CdnError::Cache(CacheError::Miss)),
        }
    }

    pub fn free_capacity(&self) -> u64 {
        (self.mem_capacity - self.mem_used) + (self.disk_capacity - self.disk_used)
    }

    /// Bytes used per tier, `(mem, disk)`.
    pub fn usage(&self) -> (u64, u64) {
        (self.mem_used, self.disk_used)
    }

    pub fn len(&self) -> usize {
        self.mem.len() + self.disk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty() && self.disk.is_empty()
    }

    /// Freeze the cache. Reads only from here on.
    pub fn seal(&mut self) {
        self.built = true;
    }
}

fn file_name_for(key: &str) -> String {
    format!("{}.txt", key.replace('/', "_"))
}

/// One-shot warm-up: fetch the popular paths from the origin and admit what
/// fits. The cache is sealed on the way out even when the fetch loop fails,
/// so the front-end's miss path stays live.
pub async fn warm(
    mut cache: TieredCache,
    client: &reqwest::Client,
    origin: &str,
    popular_list: &Path,
) -> TieredCache {
    match warm_inner(&mut cache, client, origin, popular_list).await {
        Ok(fetched) => {
            let (mem, disk) = cache.usage();
            info!(
                "cache warm-up done: {fetched} paths fetched, {} cached ({mem} bytes mem, {disk} bytes disk)",
                cache.len()
            );
        }
        Err(err) => warn!("cache warm-up aborted: {err:?}"),
    }
    cache.seal();
    cache
}

async fn warm_inner(
    cache: &mut TieredCache,
    client: &reqwest::Client,
    origin: &str,
    popular_list: &Path,
) -> CdnResult<usize> {
    let contents = tokio::fs::read_to_string(popular_list).await?;
    let paths: VecDeque<String> = contents
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|path| path.starts_with(POPULAR_PATH_PREFIX))
        .map(String::from)
        .collect();
    info!("warming cache with {} popular paths", paths.len());

    tokio::fs::create_dir_all(&cache.dir).await?;

    let queue = Arc::new(Mutex::new(paths));
    let (responses, mut admissions) = mpsc::channel::<(String, Vec<u8>)>(WARM_WORKERS);

    let mut workers = Vec::with_capacity(WARM_WORKERS);
    for _ in 0..WARM_WORKERS {
        let queue = queue.clone();
        let responses = responses.clone();
        let client = client.clone();
        let origin = origin.to_string();
        workers.push(tokio::spawn(async move {
            loop {
                let path = queue.lock().pop_front();
                let Some(path) = path else { break };
                match fetch(&client, &origin, &path).await {
                    Ok(Some(body)) => {
                        if responses.send((path, body)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => debug!("skipping non-2xx response for {path}"),
                    Err(err) => warn!("warm-up fetch of {path} failed: {err:?}"),
                }
            }
        }));
    }
    drop(responses);

    let mut fetched = 0usize;
    while let Some((path, body)) = admissions.recv().await {
        fetched += 1;
        match cache.put(&path, &body).await {
            Ok(Some(tier)) => debug!("cached {path} in {tier:?} ({} bytes)", body.len()),
            Ok(None) => debug!("no room for {path} ({} bytes)", body.len()),
            Err(err) => warn!("admission of {path} failed: {err:?}"),
        }
        if cache.free_capacity() < FREE_CAPACITY_FLOOR {
            info!("free capacity below {FREE_CAPACITY_FLOOR} bytes, ending warm-up early");
            queue.lock().clear();
            admissions.close();
            break;
        }
    }

    for worker in workers {
        let _ = worker.await;
    }
    Ok(fetched)
}

async fn fetch(
    client: &reqwest::Client,
    origin: &str,
    path: &str,
) -> CdnResult<Option<Vec<u8>>> {
    let response = client.get(format!("{origin}{path}")).send().await?;
    if !response.status().is_success() {
        return Ok(None);
    }
    Ok(Some(http::serialize_response(response).await?))
}
