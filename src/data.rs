//! In-memory datasets: typed columns loaded from CSV.
//!
//! A model input of width 1 reads the column named after it; an input of
//! width `k` reads `name[0]` through `name[k-1]`. Targets follow the same
//! rule and are always read as floats (class ids included).

use std::fmt;
use std::ops::Range;
use std::path::Path;

use thiserror::Error;

use crate::graph::node::{ElementType, InputSpec};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("csv has no header row")]
    NoHeader,
    #[error("missing column '{0}'")]
    MissingColumn(String),
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}, column '{column}': cannot parse '{value}' as {dtype}")]
    Parse {
        line: usize,
        column: String,
        value: String,
        dtype: ElementType,
    },
    #[error("column '{name}' has {found} rows, expected {expected}")]
    Length {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("column '{name}' has {len} values, not a multiple of width {width}")]
    Ragged {
        name: String,
        len: usize,
        width: usize,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Float(Vec<f32>),
    Int(Vec<i64>),
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) => v.len(),
        }
    }

    pub fn dtype(&self) -> ElementType {
        match self {
            ColumnData::Float(_) => ElementType::Float32,
            ColumnData::Int(_) => ElementType::Int64,
        }
    }
}

/// A named feature of fixed width, stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub width: usize,
    pub data: ColumnData,
}

impl Column {
    pub fn float(name: impl Into<String>, width: usize, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            width,
            data: ColumnData::Float(values),
        }
    }

    pub fn int(name: impl Into<String>, width: usize, values: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            width,
            data: ColumnData::Int(values),
        }
    }

    pub fn rows(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    /// Float view of the values; integer columns are converted.
    pub fn to_f32(&self) -> Vec<f32> {
        match &self.data {
            ColumnData::Float(v) => v.clone(),
            ColumnData::Int(v) => v.iter().map(|x| *x as f32).collect(),
        }
    }

    fn select(&self, rows: &[usize]) -> Column {
        let w = self.width;
        let data = match &self.data {
            ColumnData::Float(v) => ColumnData::Float(gather_rows(v, w, rows)),
            ColumnData::Int(v) => ColumnData::Int(gather_rows(v, w, rows)),
        };
        Column {
            name: self.name.clone(),
            width: w,
            data,
        }
    }
}

/// Input and target columns with the same number of rows.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    rows: usize,
    inputs: Vec<Column>,
    targets: Vec<Column>,
}

impl Dataset {
    pub fn new(inputs: Vec<Column>, targets: Vec<Column>) -> Result<Self, DataError> {
        for column in inputs.iter().chain(&targets) {
            if column.width == 0 || column.data.len() % column.width != 0 {
                return Err(DataError::Ragged {
                    name: column.name.clone(),
                    len: column.data.len(),
                    width: column.width,
                });
            }
        }
        let rows = inputs
            .iter()
            .chain(&targets)
            .next()
            .map_or(0, Column::rows);
        for column in inputs.iter().chain(&targets) {
            if column.rows() != rows {
                return Err(DataError::Length {
                    name: column.name.clone(),
                    expected: rows,
                    found: column.rows(),
                });
            }
        }
        Ok(Self {
            rows,
            inputs,
            targets,
        })
    }

    /// Parse CSV text with a header row.
    ///
    /// `targets` pairs each target name with its width.
    pub fn from_csv(
        text: &str,
        inputs: &[InputSpec],
        targets: &[(String, usize)],
    ) -> Result<Self, DataError> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());
        let (_, header) = lines.next().ok_or(DataError::NoHeader)?;
        let header: Vec<&str> = header.split(',').map(str::trim).collect();

        let locate = |name: &str, width: usize| -> Result<Vec<usize>, DataError> {
            column_names(name, width)
                .into_iter()
                .map(|col| {
                    header
                        .iter()
                        .position(|h| *h == col)
                        .ok_or(DataError::MissingColumn(col))
                })
                .collect()
        };
        let input_cols = inputs
            .iter()
            .map(|spec| locate(&spec.name, spec.shape.numel()))
            .collect::<Result<Vec<_>, _>>()?;
        let target_cols = targets
            .iter()
            .map(|(name, width)| locate(name, *width))
            .collect::<Result<Vec<_>, _>>()?;

        let mut input_data: Vec<ColumnData> = inputs
            .iter()
            .map(|spec| match spec.dtype {
                ElementType::Float32 => ColumnData::Float(Vec::new()),
                ElementType::Int64 => ColumnData::Int(Vec::new()),
            })
            .collect();
        let mut target_data: Vec<Vec<f32>> = vec![Vec::new(); targets.len()];

        for (index, line) in lines {
            let line_no = index + 1;
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != header.len() {
                return Err(DataError::FieldCount {
                    line: line_no,
                    expected: header.len(),
                    found: fields.len(),
                });
            }
            for (data, cols) in input_data.iter_mut().zip(&input_cols) {
                let dtype = data.dtype();
                for &c in cols {
                    let field = fields[c];
                    let bad = || DataError::Parse {
                        line: line_no,
                        column: header[c].to_string(),
                        value: field.to_string(),
                        dtype,
                    };
                    match data {
                        ColumnData::Float(v) => v.push(field.parse().map_err(|_| bad())?),
                        ColumnData::Int(v) => v.push(field.parse().map_err(|_| bad())?),
                    }
                }
            }
            for (data, cols) in target_data.iter_mut().zip(&target_cols) {
                for &c in cols {
                    let field = fields[c];
                    data.push(field.parse().map_err(|_| DataError::Parse {
                        line: line_no,
                        column: header[c].to_string(),
                        value: field.to_string(),
                        dtype: ElementType::Float32,
                    })?);
                }
            }
        }

        let inputs = inputs
            .iter()
            .zip(input_data)
            .map(|(spec, data)| Column {
                name: spec.name.clone(),
                width: spec.shape.numel(),
                data,
            })
            .collect();
        let targets = targets
            .iter()
            .zip(target_data)
            .map(|((name, width), values)| Column::float(name.clone(), *width, values))
            .collect();
        Self::new(inputs, targets)
    }

    pub fn load_csv(
        path: &Path,
        inputs: &[InputSpec],
        targets: &[(String, usize)],
    ) -> Result<Self, DataError> {
        let text = std::fs::read_to_string(path).map_err(|source| DataError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_csv(&text, inputs, targets)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn inputs(&self) -> &[Column] {
        &self.inputs
    }

    pub fn targets(&self) -> &[Column] {
        &self.targets
    }

    /// The given rows, in the given order.
    pub fn select(&self, rows: &[usize]) -> Dataset {
        Dataset {
            rows: rows.len(),
            inputs: self.inputs.iter().map(|c| c.select(rows)).collect(),
            targets: self.targets.iter().map(|c| c.select(rows)).collect(),
        }
    }

    pub fn slice(&self, range: Range<usize>) -> Dataset {
        let rows: Vec<usize> = range.collect();
        self.select(&rows)
    }

    /// Hold out the trailing `fraction` of rows for validation.
    pub fn split(&self, fraction: f64) -> (Dataset, Dataset) {
        let fraction = fraction.clamp(0.0, 1.0);
        let at = ((self.rows as f64) * (1.0 - fraction)).floor() as usize;
        (self.slice(0..at), self.slice(at..self.rows))
    }

    /// Consecutive row ranges of at most `batch_size` rows.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
        let rows = self.rows;
        let step = batch_size.max(1);
        (0..rows)
            .step_by(step)
            .map(move |start| start..(start + step).min(rows))
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.inputs.iter().map(|c| c.name.as_str()).collect();
        let targets: Vec<&str> = self.targets.iter().map(|c| c.name.as_str()).collect();
        write!(
            f,
            "{} rows, inputs [{}], targets [{}]",
            self.rows,
            names.join(", "),
            targets.join(", ")
        )
    }
}

fn gather_rows<T: Copy>(values: &[T], width: usize, rows: &[usize]) -> Vec<T> {
    rows.iter()
        .flat_map(|r| &values[r * width..(r + 1) * width])
        .copied()
        .collect()
}

/// CSV header names backing a feature of `width` columns.
pub fn column_names(name: &str, width: usize) -> Vec<String> {
    if width == 1 {
        vec![name.to_string()]
    } else {
        (0..width).map(|i| format!("{}[{}]", name, i)).collect()
    }
}
