use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use pl_types::{validation_error, PlResult, TrialError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const IRIS_CSV: &str = include_str!("../data/iris.csv");

/// Tabular classification data: numeric feature columns and a label column
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    /// Class names indexed by label
    pub classes: Vec<String>,
}

/// Train/validation partition of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub x_train: Vec<Vec<f64>>,
    pub y_train: Vec<usize>,
    pub x_valid: Vec<Vec<f64>>,
    pub y_valid: Vec<usize>,
}

impl Split {
    /// Reject empty or misaligned splits before any fit is attempted
    pub fn validate(&self) -> PlResult<()> {
        for (name, rows, labels) in [
            ("train", self.x_train.len(), self.y_train.len()),
            ("validation", self.x_valid.len(), self.y_valid.len()),
        ] {
            if rows == 0 {
                return Err(TrialError::EmptySplit {
                    split: name.to_string(),
                }
                .into());
            }
            if rows != labels {
                return Err(TrialError::LabelMismatch {
                    split: name.to_string(),
                    rows,
                    labels,
                }
                .into());
            }
        }
        Ok(())
    }
}

impl Dataset {
    /// Fisher's Iris data: 150 rows, 4 features, 3 classes
    pub fn iris() -> PlResult<Self> {
        Self::from_csv_reader(IRIS_CSV.as_bytes())
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> PlResult<Self> {
        let path = path.as_ref();
        tracing::info!("Loading CSV dataset from: {}", path.display());
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Parse a headed CSV; the last column is the label, the rest must be numeric
    pub fn from_csv_reader<R: Read>(reader: R) -> PlResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| validation_error!("invalid CSV header: {e}"))?
            .clone();
        if headers.len() < 2 {
            return Err(validation_error!(
                "expected at least one feature column and a label column, got {} columns",
                headers.len()
            ));
        }
        let n_features = headers.len() - 1;
        let feature_names: Vec<String> =
            headers.iter().take(n_features).map(str::to_string).collect();

        let mut features = Vec::new();
        let mut raw_labels = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| validation_error!("invalid CSV record: {e}"))?;
            if record.len() != headers.len() {
                return Err(validation_error!(
                    "record {} has {} columns, expected {}",
                    line + 1,
                    record.len(),
                    headers.len()
                ));
            }
            let mut row = Vec::with_capacity(n_features);
            for (column, field) in record.iter().take(n_features).enumerate() {
                let value: f64 = field.parse().map_err(|_| {
                    validation_error!(
                        "record {} column '{}' is not numeric: {field:?}",
                        line + 1,
                        feature_names[column]
                    )
                })?;
                row.push(value);
            }
            features.push(row);
            raw_labels.push(record[n_features].to_string());
        }

        if features.is_empty() {
            return Err(validation_error!("dataset has no rows"));
        }

        let classes = class_names(&raw_labels);
        let labels = raw_labels
            .iter()
            .map(|label| classes.iter().position(|c| c == label).unwrap_or_default())
            .collect();

        tracing::debug!(
            rows = features.len(),
            features = n_features,
            classes = classes.len(),
            "Parsed dataset"
        );

        Ok(Self {
            feature_names,
            features,
            labels,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Shuffle with a seeded RNG and hold out `ceil(test_size * len)` rows
    pub fn train_test_split(&self, test_size: f64, seed: u64) -> PlResult<Split> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(validation_error!(
                "test_size must be in (0, 1), got {test_size}"
            ));
        }
        let n_test = (test_size * self.len() as f64).ceil() as usize;
        if n_test == 0 || n_test >= self.len() {
            return Err(validation_error!(
                "test_size {test_size} leaves an empty split for {} rows",
                self.len()
            ));
        }

        let mut indices: Vec<usize> = (0..self.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let (test_idx, train_idx) = indices.split_at(n_test);
        let take = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<usize>) {
            idx.iter()
                .map(|&i| (self.features[i].clone(), self.labels[i]))
                .unzip()
        };
        let (x_train, y_train) = take(train_idx);
        let (x_valid, y_valid) = take(test_idx);

        Ok(Split {
            x_train,
            y_train,
            x_valid,
            y_valid,
        })
    }
}

/// Sorted distinct labels; numeric labels sort numerically
fn class_names(raw: &[String]) -> Vec<String> {
    let distinct: BTreeSet<&str> = raw.iter().map(String::as_str).collect();
    let mut classes: Vec<String> = distinct.into_iter().map(str::to_string).collect();
    if classes.iter().all(|c| c.parse::<i64>().is_ok()) {
        classes.sort_by_key(|c| c.parse::<i64>().unwrap_or_default());
    }
    classes
}
