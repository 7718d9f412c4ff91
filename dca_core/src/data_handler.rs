// dca_core/src/data_handler.rs

//! Historical OHLCV data access.
//! Loads time-ordered candle series from CSV files and keeps them in a
//! process-wide cache keyed by file path, so repeated optimization runs over
//! the same file share one read-only copy.

use anyhow::Context;

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MarketBar {
    pub datetime: chrono::DateTime<chrono::Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl MarketBar {
    /// Typical price (H + L + C) / 3, used by volume-weighted indicators.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Raw CSV row before the timestamp is interpreted.
#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Parses a CSV timestamp. Accepts epoch milliseconds or "%Y-%m-%d %H:%M:%S".
fn parse_timestamp(raw: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    let raw = raw.trim();
    if let Ok(millis) = raw.parse::<i64>() {
        return chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| anyhow::anyhow!("Timestamp '{}' is out of range", raw));
    }

    crate::utils::string_to_date_time(raw, "%Y-%m-%d %H:%M:%S")
}

/// Loads a candle series from a CSV file with header
/// `timestamp,open,high,low,close,volume`.
/// # Arguments
/// * `path` - Path to the CSV file.
/// # Returns
/// * Bars sorted by ascending timestamp.
pub fn load_csv<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Vec<MarketBar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open data file '{}'", path.display()))?;

    let mut bars = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.with_context(|| format!("Malformed row {} in '{}'", line + 2, path.display()))?;
        let datetime = parse_timestamp(&row.timestamp)
            .with_context(|| format!("Bad timestamp on row {} in '{}'", line + 2, path.display()))?;

        bars.push(MarketBar {
            datetime,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }

    if bars.is_empty() {
        anyhow::bail!("Data file '{}' contains no candles", path.display());
    }

    bars.sort_by_key(|bar| bar.datetime);
    anyhow::Ok(bars)
}

/// Returns the suffix of `series` covering the last `duration` before the
/// final bar. The series must be sorted by time.
pub fn filter_trailing(series: &[MarketBar], duration: chrono::Duration) -> &[MarketBar] {
    let Some(last) = series.last() else {
        return series;
    };

    let cutoff = last.datetime - duration;
    let start = series.partition_point(|bar| bar.datetime < cutoff);
    &series[start..]
}

/// Read-mostly cache of loaded series keyed by file path.
#[derive(Debug, Default)]
pub struct DataCache {
    series: std::sync::RwLock<std::collections::HashMap<std::path::PathBuf, std::sync::Arc<Vec<MarketBar>>>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached series for `path`, loading it on first access.
    /// Hits only take the shared lock; a miss loads under the exclusive lock
    /// so each file is read at most once.
    pub fn get_or_load<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<std::sync::Arc<Vec<MarketBar>>> {
        let key = path.as_ref().to_path_buf();

        {
            let cache = self.series.read()
                .map_err(|_| anyhow::anyhow!("Data cache lock poisoned"))?;
            if let Some(series) = cache.get(&key) {
                tracing::debug!(path = %key.display(), "data cache hit");
                return anyhow::Ok(series.clone());
            }
        }

        let mut cache = self.series.write()
            .map_err(|_| anyhow::anyhow!("Data cache lock poisoned"))?;

        // Another thread may have loaded it while we waited for the write lock.
        if let Some(series) = cache.get(&key) {
            return anyhow::Ok(series.clone());
        }

        let series = std::sync::Arc::new(load_csv(&key)?);
        tracing::info!(path = %key.display(), bars = series.len(), "loaded candle series");
        cache.insert(key, series.clone());

        anyhow::Ok(series)
    }

    /// Number of cached series.
    pub fn len(&self) -> usize {
        self.series.read().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn daily_series(days: i64) -> Vec<MarketBar> {
        let start = chrono::DateTime::<chrono::Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        (0..days)
            .map(|i| MarketBar {
                datetime: start + chrono::Duration::days(i),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 10.0,
            })
            .collect()
    }

    fn write_temp_csv(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("dca_core_{}_{}.csv", name, std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn filter_trailing_keeps_suffix() {
        let series = daily_series(30);
        let tail = filter_trailing(&series, chrono::Duration::days(9));
        assert_eq!(tail.len(), 10);
        assert_eq!(tail.first().unwrap().close, 120.0);
        assert_eq!(tail.last().unwrap().close, 129.0);
    }

    #[test]
    fn filter_trailing_longer_than_series_returns_everything() {
        let series = daily_series(5);
        assert_eq!(filter_trailing(&series, chrono::Duration::days(365)).len(), 5);
        assert!(filter_trailing(&[], chrono::Duration::days(1)).is_empty());
    }

    #[test]
    fn load_csv_accepts_both_timestamp_formats_and_sorts() {
        let path = write_temp_csv(
            "formats",
            "timestamp,open,high,low,close,volume\n\
             2024-01-02 00:00:00,2,3,1,2.5,100\n\
             1704067200000,1,2,0.5,1.5,50\n",
        );

        let bars = load_csv(&path).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 1.5);
        assert!(bars[0].datetime < bars[1].datetime);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn load_csv_rejects_empty_file() {
        let path = write_temp_csv("empty", "timestamp,open,high,low,close,volume\n");
        assert!(load_csv(&path).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn cache_loads_each_path_once() {
        let path = write_temp_csv(
            "cache",
            "timestamp,open,high,low,close,volume\n1704067200000,1,2,0.5,1.5,50\n",
        );

        let cache = DataCache::new();
        let first = cache.get_or_load(&path).unwrap();
        let second = cache.get_or_load(&path).unwrap();

        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        std::fs::remove_file(path).ok();
    }
}
