//! Training data: CSV loading, label synthesis and stratified splits.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::features::{
    FEATURE_COUNT, FEATURE_NAMES, BANDWIDTH, CONGESTION, JITTER, LATENCY, PACKET_LOSS, THROUGHPUT,
};

/// Feature rows in canonical order. Missing cells are already mean-filled.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub rows: Vec<[f64; FEATURE_COUNT]>,
}

impl Dataset {
    pub fn load_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open dataset {}", path.display()))?;
        let ds = Self::from_reader(file)
            .with_context(|| format!("failed to read dataset {}", path.display()))?;
        info!(path = %path.display(), records = ds.len(), "Loaded dataset");
        Ok(ds)
    }

    /// Read a CSV with a header row. Columns are matched to feature names
    /// case-insensitively; other columns are ignored. Empty or non-numeric
    /// cells count as missing and are replaced by the column mean.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers().context("dataset has no header row")?.clone();
        let mut columns = [0usize; FEATURE_COUNT];
        for (j, name) in FEATURE_NAMES.iter().enumerate() {
            columns[j] = headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .with_context(|| format!("dataset is missing column '{}'", name))?;
        }

        let mut cells: Vec<[Option<f64>; FEATURE_COUNT]> = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("malformed record {}", line + 1))?;
            let mut row = [None; FEATURE_COUNT];
            for j in 0..FEATURE_COUNT {
                row[j] = record
                    .get(columns[j])
                    .and_then(|s| s.parse::<f64>().ok())
                    .filter(|v| v.is_finite());
            }
            cells.push(row);
        }
        if cells.is_empty() {
            bail!("dataset has no records");
        }

        Ok(Self {
            rows: fill_missing(&cells),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn fill_missing(cells: &[[Option<f64>; FEATURE_COUNT]]) -> Vec<[f64; FEATURE_COUNT]> {
    let mut means = [0.0; FEATURE_COUNT];
    for j in 0..FEATURE_COUNT {
        let present: Vec<f64> = cells.iter().filter_map(|r| r[j]).collect();
        if present.len() < cells.len() {
            warn!(
                column = FEATURE_NAMES[j],
                missing = cells.len() - present.len(),
                "Filling missing values with the column mean"
            );
        }
        if !present.is_empty() {
            means[j] = present.iter().sum::<f64>() / present.len() as f64;
        }
    }
    cells
        .iter()
        .map(|r| {
            let mut row = [0.0; FEATURE_COUNT];
            for j in 0..FEATURE_COUNT {
                row[j] = r[j].unwrap_or(means[j]);
            }
            row
        })
        .collect()
}

/// Deterministic part of the violation label.
///
/// The throughput ratio rule only applies when bandwidth is positive.
pub fn violation_rule(x: &[f64; FEATURE_COUNT]) -> bool {
    let poor_efficiency = x[BANDWIDTH] > 0.0 && x[THROUGHPUT] / x[BANDWIDTH] < 0.3;
    x[LATENCY] > 15.0
        || x[PACKET_LOSS] > 5.0
        || x[JITTER] > 3.0
        || x[CONGESTION] > 80.0
        || poor_efficiency
}

/// Rule labels OR'd with a seeded random flag raised on `noise_rate` of rows.
pub fn synthesize_labels(rows: &[[f64; FEATURE_COUNT]], noise_rate: f64, seed: u64) -> Vec<bool> {
    let mut rng = StdRng::seed_from_u64(seed);
    rows.iter()
        .map(|x| {
            let noise = rng.gen::<f64>() < noise_rate;
            violation_rule(x) || noise
        })
        .collect()
}

/// Split row indices into (train, test), keeping each class's share in both.
pub fn stratified_split(y: &[bool], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [false, true] {
        let mut idx: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        idx.shuffle(&mut rng);
        let mut n_test = (idx.len() as f64 * test_fraction).round() as usize;
        // keep at least one sample of each class on both sides when possible
        if idx.len() >= 2 {
            n_test = n_test.clamp(1, idx.len() - 1);
        }
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Stratified k-fold assignment: returns `k` validation index sets.
pub fn stratified_folds(y: &[bool], k: usize, seed: u64) -> Vec<Vec<usize>> {
    let k = k.max(2);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds = vec![Vec::new(); k];
    for class in [false, true] {
        let mut idx: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        idx.shuffle(&mut rng);
        for (n, i) in idx.into_iter().enumerate() {
            folds[n % k].push(i);
        }
    }
    for f in folds.iter_mut() {
        f.sort_unstable();
    }
    folds
}

pub fn select<T: Copy>(values: &[T], idx: &[usize]) -> Vec<T> {
    idx.iter().map(|&i| values[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
Timestamp,Bandwidth,Throughput,Congestion,Packet_Loss,Latency,Jitter,Routers
2024-01-01 00:00:00,100,80,10,0.5,5,0.5,A-B
2024-01-01 00:01:00,100,,20,1.5,7,1.0,A-C
2024-01-01 00:02:00,100,60,,0.0,n/a,0.3,B-C
";

    #[test]
    fn test_reads_named_columns_and_fills_means() {
        let ds = Dataset::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.rows[0], [100.0, 80.0, 10.0, 0.5, 5.0, 0.5]);
        // throughput mean of 80 and 60
        assert_eq!(ds.rows[1][THROUGHPUT], 70.0);
        assert_eq!(ds.rows[2][CONGESTION], 15.0);
        assert_eq!(ds.rows[2][LATENCY], 6.0);
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let err = Dataset::from_reader("bandwidth,throughput\n1,2\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("congestion"));
    }

    #[test]
    fn test_latency_boundary() {
        let mut x = [100.0, 80.0, 10.0, 0.5, 15.0, 0.5];
        assert!(!violation_rule(&x));
        x[LATENCY] = 15.0001;
        assert!(violation_rule(&x));
    }

    #[test]
    fn test_zero_bandwidth_skips_ratio_rule() {
        assert!(!violation_rule(&[0.0, 0.0, 10.0, 0.5, 5.0, 0.5]));
        assert!(violation_rule(&[100.0, 20.0, 10.0, 0.5, 5.0, 0.5]));
    }

    #[test]
    fn test_label_noise_is_seeded() {
        let rows = vec![[100.0, 80.0, 10.0, 0.5, 5.0, 0.5]; 1000];
        let a = synthesize_labels(&rows, 0.1, 42);
        let b = synthesize_labels(&rows, 0.1, 42);
        assert_eq!(a, b);
        let rate = a.iter().filter(|&&v| v).count() as f64 / 1000.0;
        assert!(rate > 0.05 && rate < 0.15);
        assert!(synthesize_labels(&rows, 0.0, 42).iter().all(|&v| !v));
    }

    #[test]
    fn test_stratified_split_keeps_ratio() {
        let y: Vec<bool> = (0..100).map(|i| i % 4 == 0).collect();
        let (train, test) = stratified_split(&y, 0.2, 42);
        assert_eq!(train.len() + test.len(), 100);
        assert_eq!(test.len(), 20);
        assert_eq!(test.iter().filter(|&&i| y[i]).count(), 5);
        assert!(train.iter().all(|i| !test.contains(i)));
    }

    #[test]
    fn test_folds_partition_rows() {
        let y: Vec<bool> = (0..30).map(|i| i % 3 == 0).collect();
        let folds = stratified_folds(&y, 3, 1);
        let mut all: Vec<usize> = folds.concat();
        all.sort_unstable();
        assert_eq!(all, (0..30).collect::<Vec<_>>());
        for f in &folds {
            let positives = f.iter().filter(|&&i| y[i]).count();
            assert!(positives == 3 || positives == 4);
        }
    }
}
