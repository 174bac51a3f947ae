use crate::cache::TvpbCache;
use crate::error::Result;
use std::time::Instant;

/// Logs how long a scope took when dropped.
#[derive(Debug)]
pub struct Memo {
    label: String,
    start: Instant,
}

impl Memo {
    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}

impl Drop for Memo {
    fn drop(&mut self) {
        tracing::debug!(label = %self.label, elapsed_ms = self.elapsed_ms(), "Timing");
    }
}

pub fn memo(label: impl Into<String>) -> Memo {
    Memo {
        label: label.into(),
        start: Instant::now(),
    }
}

/// Collect metrics from a cache and log them
pub fn collect_metrics(cache: &TvpbCache) -> Result<()> {
    let (capacity, sets) = cache.uid_calculator().fully_populated_shape();
    let table = if cache.is_open() { cache.table()? } else { None };

    let rows = table.map(|t| t.len()).unwrap_or(0);
    let phase = match table {
        Some(t) if t.is_static() => "static",
        Some(_) => "dynamic",
        None if cache.is_open() => "empty",
        None => "closed",
    };

    tracing::info!(
        tag = cache.tag(),
        phase = phase,
        rows = rows,
        capacity = capacity,
        sets = sets,
        changed = cache.is_changed(),
        shared = cache.is_shared(),
        "Cache metrics"
    );

    Ok(())
}
