//! Dataset registry
//!
//! Resolves dataset names for `start` commands: `blobs` and `blobs:<n>` are
//! generated in memory, any other name is read from `<data-dir>/<name>.csv`.
//!
//! CSV layout: one header row, then one row per point. A `class` column
//! (integer) and a `label` column (free text) are optional; every other
//! column is a numeric feature.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};
use tsnex_core::{Dataset, DatasetLoader, EngineError, Result};

/// Name of the built-in synthetic dataset.
pub const BLOBS: &str = "blobs";

const BLOBS_DEFAULT_POINTS: usize = 150;
const BLOBS_MAX_POINTS: usize = 10_000;
const BLOBS_CLUSTERS: usize = 3;
const BLOBS_DIMS: usize = 10;
const BLOBS_SEED: u64 = 42;

/// Looks datasets up by name under a data directory.
#[derive(Debug, Clone)]
pub struct DatasetRegistry {
    data_dir: PathBuf,
}

impl DatasetRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Names that `load` can resolve, built-ins first.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.data_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
                    .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names.insert(0, BLOBS.to_string());
        names
    }

    fn csv_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(EngineError::Dataset(format!(
                "invalid dataset name '{}'",
                name
            )));
        }
        Ok(self.data_dir.join(format!("{}.csv", name)))
    }
}

impl DatasetLoader for DatasetRegistry {
    fn load(&self, name: &str) -> Result<Dataset> {
        if let Some(n) = parse_blobs_name(name)? {
            return blobs(n);
        }

        let path = self.csv_path(name)?;
        debug!("Reading dataset from {}", path.display());
        let text = fs::read_to_string(&path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("dataset '{}': {}", name, e))
        })?;
        let dataset = parse_csv(name, &text)?;
        info!(
            "Loaded dataset '{}': {} points, {} features",
            name,
            dataset.len(),
            dataset.dims()
        );
        Ok(dataset)
    }
}

/// `Some(n)` for `blobs` / `blobs:<n>`, `None` for any other name.
fn parse_blobs_name(name: &str) -> Result<Option<usize>> {
    if name == BLOBS {
        return Ok(Some(BLOBS_DEFAULT_POINTS));
    }
    let Some(count) = name.strip_prefix("blobs:") else {
        return Ok(None);
    };
    let n: usize = count
        .parse()
        .map_err(|_| EngineError::Dataset(format!("invalid point count in '{}'", name)))?;
    if n > BLOBS_MAX_POINTS {
        return Err(EngineError::Dataset(format!(
            "blobs is limited to {} points",
            BLOBS_MAX_POINTS
        )));
    }
    Ok(Some(n))
}

/// Isotropic Gaussian clusters around uniformly drawn centres.
///
/// Point `i` belongs to cluster `i % 3`; the draw is seeded so the same `n`
/// always yields the same data.
pub fn blobs(n: usize) -> Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(BLOBS_SEED);
    let noise = Normal::<f64>::new(0.0, 1.0).map_err(|e| EngineError::Dataset(e.to_string()))?;

    let centers: Vec<Vec<f64>> = (0..BLOBS_CLUSTERS)
        .map(|_| (0..BLOBS_DIMS).map(|_| rng.gen_range(-10.0..10.0)).collect())
        .collect();

    let rows = (0..n)
        .map(|i| {
            centers[i % BLOBS_CLUSTERS]
                .iter()
                .map(|c| c + noise.sample(&mut rng))
                .collect()
        })
        .collect();
    let classes = (0..n).map(|i| (i % BLOBS_CLUSTERS) as i64).collect();

    let name = if n == BLOBS_DEFAULT_POINTS {
        BLOBS.to_string()
    } else {
        format!("blobs:{}", n)
    };
    Dataset::from_rows(name, rows, Some(classes), None)
}

/// Parse CSV text with a header row into a dataset.
pub fn parse_csv(name: &str, text: &str) -> Result<Dataset> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| EngineError::Dataset(format!("dataset '{}' is empty", name)))?;
    let columns: Vec<String> = split_row(header).map(str::to_string).collect();
    let class_col = columns.iter().position(|c| c == "class");
    let label_col = columns.iter().position(|c| c == "label");

    let mut rows = Vec::new();
    let mut classes = class_col.map(|_| Vec::new());
    let mut labels = label_col.map(|_| Vec::new());

    for (line_no, line) in lines {
        let cells: Vec<&str> = split_row(line).collect();
        if cells.len() != columns.len() {
            return Err(EngineError::Dataset(format!(
                "line {}: {} cells, header has {}",
                line_no + 1,
                cells.len(),
                columns.len()
            )));
        }

        let mut features = Vec::with_capacity(columns.len());
        for (col, cell) in cells.iter().enumerate() {
            if Some(col) == class_col {
                let class = cell.parse::<i64>().map_err(|_| {
                    EngineError::Dataset(format!(
                        "line {}: class '{}' is not an integer",
                        line_no + 1,
                        cell
                    ))
                })?;
                if let Some(classes) = classes.as_mut() {
                    classes.push(class);
                }
            } else if Some(col) == label_col {
                if let Some(labels) = labels.as_mut() {
                    labels.push(cell.to_string());
                }
            } else {
                let value = cell.parse::<f64>().map_err(|_| {
                    EngineError::Dataset(format!(
                        "line {}: column '{}' value '{}' is not a number",
                        line_no + 1,
                        columns[col],
                        cell
                    ))
                })?;
                features.push(value);
            }
        }
        rows.push(features);
    }

    Dataset::from_rows(name, rows, classes, labels)
}

fn split_row(line: &str) -> impl Iterator<Item = &str> {
    line.split(',').map(|cell| cell.trim().trim_matches('"'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use tempfile::TempDir;

    fn registry_with(files: &[(&str, &str)]) -> (TempDir, DatasetRegistry) {
        let dir = TempDir::new().unwrap();
        for (name, body) in files {
            fs::write(dir.path().join(name), body).unwrap();
        }
        let registry = DatasetRegistry::new(dir.path());
        (dir, registry)
    }

    #[test]
    fn loads_csv_with_class_and_label() {
        let (_dir, registry) = registry_with(&[(
            "iris.csv",
            "sepal,class,petal,label\n1.0,0,2.0,a\n1.5,0,2.5,b\n\n7.0,1,8.0,c\n",
        )]);
        let ds = registry.load("iris").unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.dims(), 2);
        assert_eq!(ds.row(2), &[7.0, 8.0]);
        assert_eq!(ds.classes(), Some(&[0, 0, 1][..]));
        assert_eq!(ds.display_label(1), "b");
    }

    #[test]
    fn features_only_csv_has_no_classes() {
        let (_dir, registry) = registry_with(&[("plain.csv", "x,y\n0,0\n1,1\n2,2\n")]);
        let ds = registry.load("plain").unwrap();
        assert!(ds.classes().is_none());
        assert_eq!(ds.display_label(2), "2");
    }

    #[test]
    fn missing_file_is_io_not_found() {
        let (_dir, registry) = registry_with(&[]);
        match registry.load("nowhere") {
            Err(EngineError::Io(e)) => assert_eq!(e.kind(), ErrorKind::NotFound),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn path_traversal_is_rejected() {
        let (_dir, registry) = registry_with(&[]);
        assert!(matches!(
            registry.load("../secret"),
            Err(EngineError::Dataset(_))
        ));
    }

    #[test]
    fn bad_cells_are_reported() {
        assert!(parse_csv("t", "x,class\n1.0,zero\n2.0,1\n").is_err());
        assert!(parse_csv("t", "x,y\n1.0,abc\n2.0,1\n").is_err());
        assert!(parse_csv("t", "x,y\n1.0\n2.0,1\n").is_err());
        assert!(parse_csv("t", "").is_err());
    }

    #[test]
    fn blobs_are_deterministic_and_sized() {
        let (_dir, registry) = registry_with(&[]);
        let a = registry.load("blobs:30").unwrap();
        let b = registry.load("blobs:30").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 30);
        assert_eq!(a.dims(), BLOBS_DIMS);
        assert_eq!(registry.load("blobs").unwrap().len(), BLOBS_DEFAULT_POINTS);
        assert!(registry.load("blobs:many").is_err());
    }

    #[test]
    fn available_lists_builtin_then_csv_stems() {
        let (_dir, registry) =
            registry_with(&[("b.csv", "x\n1\n"), ("a.csv", "x\n1\n"), ("notes.txt", "")]);
        assert_eq!(registry.available(), vec!["blobs", "a", "b"]);
    }
}
