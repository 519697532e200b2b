//! Hardware-counter timeline parsing
//!
//! The artifact is delimited text: optional `#` comment lines, one header
//! row, then numeric rows. The delimiter is detected from the header
//! (comma, tab, semicolon, else runs of whitespace).

use super::table::{read_delimited, DelimitedTable};
use crate::error::{BenchwrapError, IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const TIME_COLUMNS: [&str; 3] = ["timestamp", "time", "elapsed"];
const POWER_MARKER: &str = "power";

/// One timeline sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSample {
    /// Seconds (relative or absolute, monotonically non-decreasing)
    pub timestamp: f64,
    /// Instantaneous power draw (watts)
    pub power: f64,
    /// Remaining counter values, in `counter_names` order
    pub counters: Vec<f64>,
}

/// Parsed timeline; not restartable, consume it once
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineSeries {
    counter_names: Vec<String>,
    samples: Vec<TimelineSample>,
    skipped_rows: usize,
    source: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Delimiter {
    Byte(u8),
    Whitespace,
}

impl Delimiter {
    fn detect(header: &str) -> Self {
        [b',', b'\t', b';']
            .into_iter()
            .find(|b| header.as_bytes().contains(b))
            .map(Delimiter::Byte)
            .unwrap_or(Delimiter::Whitespace)
    }

    fn read(&self, text: &str) -> Result<DelimitedTable> {
        match self {
            Delimiter::Byte(b) => read_delimited(text, *b),
            Delimiter::Whitespace => {
                let mut lines = data_lines(text).map(|line| {
                    line.split_whitespace().map(str::to_string).collect::<Vec<_>>()
                });
                Ok(DelimitedTable {
                    header: lines.next().unwrap_or_default(),
                    rows: lines.collect(),
                    rejected: 0,
                })
            }
        }
    }
}

fn data_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

fn is_time_column(name: &str) -> bool {
    let name = name.to_lowercase();
    TIME_COLUMNS.iter().any(|candidate| {
        name.strip_prefix(candidate)
            .map_or(false, |rest| !rest.starts_with(|c: char| c.is_alphabetic()))
    })
}

impl TimelineSeries {
    /// Parse timeline text
    ///
    /// Fails only when no header with a time and a power column exists;
    /// malformed data rows are skipped and counted.
    pub fn parse(text: &str) -> Result<Self> {
        let header = data_lines(text)
            .next()
            .ok_or_else(|| BenchwrapError::Telemetry("timeline has no header row".into()))?;
        let table = Delimiter::detect(header).read(text)?;
        let columns = table.header;

        let time_idx = columns
            .iter()
            .position(|c| is_time_column(c))
            .ok_or_else(|| BenchwrapError::Telemetry(format!("no time column in {:?}", header)))?;
        let power_idx = columns
            .iter()
            .enumerate()
            .position(|(i, c)| i != time_idx && c.to_lowercase().contains(POWER_MARKER))
            .ok_or_else(|| BenchwrapError::Telemetry(format!("no power column in {:?}", header)))?;

        let counter_idx: Vec<usize> = (0..columns.len())
            .filter(|i| *i != time_idx && *i != power_idx)
            .collect();
        let counter_names = counter_idx.iter().map(|i| columns[*i].to_string()).collect();

        let mut samples: Vec<TimelineSample> = Vec::new();
        let mut skipped_rows = table.rejected;

        for cells in &table.rows {
            if cells.len() != columns.len() {
                skipped_rows += 1;
                continue;
            }

            let values: Option<Vec<f64>> = cells
                .iter()
                .map(|cell| cell.parse::<f64>().ok().filter(|v| v.is_finite()))
                .collect();
            let Some(values) = values else {
                skipped_rows += 1;
                continue;
            };

            let timestamp = values[time_idx];
            if samples.last().map_or(false, |prev| timestamp < prev.timestamp) {
                skipped_rows += 1;
                continue;
            }

            samples.push(TimelineSample {
                timestamp,
                power: values[power_idx],
                counters: counter_idx.iter().map(|i| values[*i]).collect(),
            });
        }

        debug!(
            "Parsed timeline: {} samples, {} skipped rows",
            samples.len(),
            skipped_rows
        );
        Ok(Self {
            counter_names,
            samples,
            skipped_rows,
            source: None,
        })
    }

    /// Read and parse a timeline artifact
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_path(path)?;
        let mut series = Self::parse(&text)?;
        series.source = Some(path.to_path_buf());
        Ok(series)
    }

    pub(crate) fn from_samples(samples: Vec<TimelineSample>, source: Option<PathBuf>) -> Self {
        Self {
            counter_names: Vec::new(),
            samples,
            skipped_rows: 0,
            source,
        }
    }

    /// Samples in timestamp order
    pub fn samples(&self) -> &[TimelineSample] {
        &self.samples
    }

    /// Counter column names
    pub fn counter_names(&self) -> &[String] {
        &self.counter_names
    }

    /// Values of one counter column
    pub fn counter(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.counter_names.iter().position(|n| n == name)?;
        Some(self.samples.iter().map(|s| s.counters[idx]).collect())
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample survived parsing
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Rows dropped as malformed
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// File the series was read from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Time between the first and last sample
    pub fn span(&self) -> Option<f64> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;
        Some(last.timestamp - first.timestamp)
    }

    /// Highest power sample
    pub fn peak_power(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.power).reduce(f64::max)
    }

    /// `(timestamp, power)` pairs
    pub fn power_points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.samples.iter().map(|s| (s.timestamp, s.power))
    }

    /// Take ownership of the samples
    pub fn into_samples(self) -> Vec<TimelineSample> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_csv_with_comments() {
        let text = "\
# likwid-perfctr timeline, group ENERGY
# cpu 0-3
time,Power [W],FLOPS_DP,L3_BW
0.0,10.0,1e9,20
1.0,20.0,2e9,21
2.0,10.0,1e9,22
";
        let series = TimelineSeries::parse(text).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.counter_names(), &["FLOPS_DP".to_string(), "L3_BW".to_string()]);
        assert_eq!(series.span(), Some(2.0));
        assert_eq!(series.peak_power(), Some(20.0));
        assert_eq!(series.counter("L3_BW"), Some(vec![20.0, 21.0, 22.0]));
        assert_eq!(series.skipped_rows(), 0);
    }

    #[test]
    fn test_delimiter_detection() {
        let tab = "elapsed\tpkg_power\n0\t5\n1\t7\n";
        let semi = "Timestamp;Power\n0;5\n1;7\n";
        let spaces = "time   power  cycles\n0   5   100\n1   7   200\n";

        for text in [tab, semi, spaces] {
            let series = TimelineSeries::parse(text).unwrap();
            assert_eq!(series.len(), 2, "failed on {:?}", text);
            assert_eq!(series.peak_power(), Some(7.0));
        }
    }

    #[test]
    fn test_malformed_rows_are_skipped_and_counted() {
        let text = "\
time,power
0,10
1,abc
2,20,99
3
1.5,30
4,nan
5,15
";
        let series = TimelineSeries::parse(text).unwrap();
        let timestamps: Vec<f64> = series.samples().iter().map(|s| s.timestamp).collect();
        // 1,abc non-numeric; 2,20,99 and 3 wrong width; 4,nan non-finite
        assert_eq!(timestamps, vec![0.0, 1.5, 5.0]);
        assert_eq!(series.skipped_rows(), 4);
    }

    #[test]
    fn test_quoted_header_with_delimiter() {
        let text = "\"time (s)\",\"Power, W\",\"FLOPS, DP\"\n0,10,1\n1,20,2\n";
        let series = TimelineSeries::parse(text).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.counter_names(), &["FLOPS, DP".to_string()]);
        assert_eq!(series.peak_power(), Some(20.0));
    }

    #[test]
    fn test_out_of_order_rows() {
        let text = "time,power\n0,1\n5,2\n3,9\n6,3\n";
        let series = TimelineSeries::parse(text).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.skipped_rows(), 1);
        assert_eq!(series.peak_power(), Some(3.0));
    }

    #[test]
    fn test_header_requirements() {
        assert!(TimelineSeries::parse("").is_err());
        assert!(TimelineSeries::parse("# only comments\n").is_err());
        assert!(TimelineSeries::parse("cycles,power\n1,2\n").is_err());
        assert!(TimelineSeries::parse("time,cycles\n1,2\n").is_err());
        // "timer" is not a time column, "time_s" is
        assert!(TimelineSeries::parse("timer,power\n1,2\n").is_err());
        assert!(TimelineSeries::parse("time_s,power\n1,2\n").is_ok());
    }

    #[test]
    fn test_header_only_is_empty() {
        let series = TimelineSeries::parse("time,power\n").unwrap();
        assert!(series.is_empty());
        assert_eq!(series.span(), None);
        assert_eq!(series.peak_power(), None);
    }

    #[test]
    fn test_from_file_records_source() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("timeline_42.csv");
        fs::write(&path, "time,power\n0,1\n").unwrap();

        let series = TimelineSeries::from_file(&path).unwrap();
        assert_eq!(series.source(), Some(path.as_path()));
        assert_eq!(series.into_samples().len(), 1);
    }
}
