//! CTE materialization cache (spec §4.11): holds materialized `WITH` results
//! for the lifetime of one query, sized by sampling and spilled to disk
//! largest-first on overflow. Per-query, not shared -- a fresh `CteCache` is
//! created per `execute_aql` call by the admin facade.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use themis_core::error::{Result, ThemisError};
use themis_core::value::Value;

const SAMPLE_SIZE: usize = 10;
const PER_ROW_OVERHEAD_BYTES: usize = 32;

#[derive(Default, Clone, Copy)]
pub struct CteCacheStats {
    pub total: usize,
    pub in_memory: usize,
    pub spilled: usize,
    pub bytes: usize,
    pub spill_ops: usize,
    pub disk_reads: usize,
}

enum Slot {
    Memory(Vec<Value>),
    Spilled { path: PathBuf, len: usize },
}

pub struct CteCache {
    max_memory_bytes: usize,
    spill_dir: PathBuf,
    slots: HashMap<String, Slot>,
    resident_bytes: usize,
    stats: CteCacheStats,
}

fn estimate_row_size(v: &Value) -> usize {
    v.canonical_bytes().len() + PER_ROW_OVERHEAD_BYTES
}

impl CteCache {
    pub fn new(max_memory_bytes: usize, spill_dir: PathBuf) -> Self {
        Self {
            max_memory_bytes,
            spill_dir,
            slots: HashMap::new(),
            resident_bytes: 0,
            stats: CteCacheStats::default(),
        }
    }

    pub fn stats(&self) -> CteCacheStats {
        self.stats
    }

    /// Inserts a materialized CTE result, evicting the largest resident
    /// entry to disk (repeatedly) if this insert pushes memory use over
    /// budget.
    pub fn put(&mut self, name: &str, rows: Vec<Value>) -> Result<()> {
        let sampled: usize = rows.iter().take(SAMPLE_SIZE).map(estimate_row_size).sum();
        let sample_count = rows.len().min(SAMPLE_SIZE).max(1);
        let avg_size = sampled / sample_count;
        let estimated_bytes = avg_size * rows.len();

        self.stats.total += 1;
        self.stats.in_memory += 1;
        self.stats.bytes += estimated_bytes;
        self.resident_bytes += estimated_bytes;
        self.slots.insert(name.to_string(), Slot::Memory(rows));

        while self.resident_bytes > self.max_memory_bytes {
            if !self.evict_largest()? {
                break;
            }
        }
        Ok(())
    }

    fn evict_largest(&mut self) -> Result<bool> {
        let victim = self
            .slots
            .iter()
            .filter_map(|(k, v)| match v {
                Slot::Memory(rows) => Some((k.clone(), rows.iter().map(estimate_row_size).sum::<usize>())),
                Slot::Spilled { .. } => None,
            })
            .max_by_key(|(_, size)| *size);

        let Some((name, size)) = victim else { return Ok(false) };
        let Some(Slot::Memory(rows)) = self.slots.remove(&name) else { return Ok(false) };
        let path = self.spill_dir.join(format!("cte-{name}.bin"));
        write_spill_file(&path, &rows)?;
        let len = rows.len();
        self.slots.insert(name, Slot::Spilled { path, len });
        self.resident_bytes = self.resident_bytes.saturating_sub(size);
        self.stats.in_memory = self.stats.in_memory.saturating_sub(1);
        self.stats.spilled += 1;
        self.stats.spill_ops += 1;
        Ok(true)
    }

    /// Reads a materialized CTE's rows back, transparently reloading from
    /// disk if it was spilled.
    pub fn get(&mut self, name: &str) -> Result<Vec<Value>> {
        match self.slots.get(name) {
            Some(Slot::Memory(rows)) => Ok(rows.clone()),
            Some(Slot::Spilled { path, .. }) => {
                self.stats.disk_reads += 1;
                read_spill_file(path)
            }
            None => Err(ThemisError::Internal(format!("CTE '{name}' was never materialized"))),
        }
    }
}

impl Drop for CteCache {
    fn drop(&mut self) {
        for slot in self.slots.values() {
            if let Slot::Spilled { path, .. } = slot {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

fn write_spill_file(path: &std::path::Path, rows: &[Value]) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|e| ThemisError::ResourceExhausted(format!("CTE spill write failed: {e}")))?;
    file.write_all(&(rows.len() as u64).to_be_bytes())
        .map_err(|e| ThemisError::ResourceExhausted(e.to_string()))?;
    for row in rows {
        let bytes = serde_json::to_vec(row)
            .map_err(|e| ThemisError::Internal(format!("failed to encode CTE row: {e}")))?;
        file.write_all(&(bytes.len() as u64).to_be_bytes())
            .map_err(|e| ThemisError::ResourceExhausted(e.to_string()))?;
        file.write_all(&bytes).map_err(|e| ThemisError::ResourceExhausted(e.to_string()))?;
    }
    Ok(())
}

fn read_spill_file(path: &std::path::Path) -> Result<Vec<Value>> {
    let mut file = File::open(path)
        .map_err(|e| ThemisError::Internal(format!("missing CTE spill file: {e}")))?;
    let mut count_buf = [0u8; 8];
    file.read_exact(&mut count_buf)
        .map_err(|e| ThemisError::Internal(format!("corrupt CTE spill file: {e}")))?;
    let count = u64::from_be_bytes(count_buf);
    let mut rows = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut len_buf = [0u8; 8];
        file.read_exact(&mut len_buf)
            .map_err(|e| ThemisError::Internal(format!("corrupt CTE spill file: {e}")))?;
        let len = u64::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .map_err(|e| ThemisError::Internal(format!("corrupt CTE spill file: {e}")))?;
        rows.push(
            serde_json::from_slice(&buf)
                .map_err(|e| ThemisError::Internal(format!("corrupt CTE row: {e}")))?,
        );
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Value> {
        (0..n).map(|i| Value::String("x".repeat(50) + &i.to_string())).collect()
    }

    #[test]
    fn small_cte_stays_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CteCache::new(1_000_000, dir.path().to_path_buf());
        cache.put("small", rows(5)).unwrap();
        assert_eq!(cache.stats().spilled, 0);
        assert_eq!(cache.get("small").unwrap().len(), 5);
    }

    #[test]
    fn overflow_spills_largest_entry_and_reloads_transparently() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CteCache::new(200, dir.path().to_path_buf());
        cache.put("a", rows(1)).unwrap();
        cache.put("b", rows(50)).unwrap();
        assert!(cache.stats().spilled >= 1);
        let reloaded = cache.get("b").unwrap();
        assert_eq!(reloaded.len(), 50);
        assert!(cache.stats().disk_reads >= 1);
    }

    #[test]
    fn missing_cte_is_an_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CteCache::new(1_000_000, dir.path().to_path_buf());
        assert!(cache.get("nope").is_err());
    }
}
