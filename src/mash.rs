//! Adapter for the `mash` executable.
//!
//! `mash info -d` reports a sketch file as JSON and `mash dist` reports one
//! tab-separated line per genome pair:
//!
//! ```text
//! reference-ID  query-ID  distance  p-value  shared-hashes
//! GenomeA       GenomeB   0.05      1e-30    456/1000
//! ```
use crate::config::Config;
use crate::error::{Error, Result};
use crate::sketch::{DistanceRecord, SharedHashes, SketchInfo, SketchTool};
use log::debug;
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Runs `mash` as a child process for every request
#[derive(Debug, Clone)]
pub struct MashTool {
    exe: PathBuf,
}

impl MashTool {
    pub fn new<P: Into<PathBuf>>(exe: P) -> Self {
        MashTool { exe: exe.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        MashTool::new(&config.mash_exe)
    }

    fn run(&self, args: &[&OsStr]) -> std::io::Result<Output> {
        debug!(
            "Running '{} {}'",
            self.exe.display(),
            args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
        );
        Command::new(&self.exe).args(args).output()
    }
}

impl SketchTool for MashTool {
    fn describe_sketches(&self, path: &Path) -> Result<SketchInfo> {
        let unavailable = |reason: String| Error::SourceUnavailable {
            path: path.display().to_string(),
            reason,
        };

        check_readable(path).map_err(|e| unavailable(e.to_string()))?;

        let output = self
            .run(&[OsStr::new("info"), OsStr::new("-d"), path.as_os_str()])
            .map_err(|e| unavailable(format!("could not run {}: {}", self.exe.display(), e)))?;
        if !output.status.success() {
            return Err(unavailable(stderr_message(&output)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| unavailable(format!("malformed sketch info: {}", e)))
    }

    fn pairwise_distance(&self, first: &Path, second: &Path) -> Result<Vec<DistanceRecord>> {
        let failed = |reason: String| Error::DistanceComputationFailed {
            first: first.display().to_string(),
            second: second.display().to_string(),
            reason,
        };

        let output = self
            .run(&[OsStr::new("dist"), first.as_os_str(), second.as_os_str()])
            .map_err(|e| failed(format!("could not run {}: {}", self.exe.display(), e)))?;
        if !output.status.success() {
            return Err(failed(stderr_message(&output)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_distances(&stdout, first, second)
    }
}

fn check_readable(path: &Path) -> std::io::Result<()> {
    File::open(path).map(|_| ())
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}

/// Parses `mash dist` output for the sources `first` and `second`, skipping blank lines.
///
/// A malformed line is reported against the genome pair it names, or against the
/// two sources when it names none.
pub fn parse_distances(text: &str, first: &Path, second: &Path) -> Result<Vec<DistanceRecord>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            parse_distance_line(line).map_err(|reason| {
                let mut fields = line.split('\t');
                let (reference, query) = match (fields.next(), fields.next()) {
                    (Some(reference), Some(query)) => (reference.to_string(), query.to_string()),
                    _ => (first.display().to_string(), second.display().to_string()),
                };
                Error::DistanceComputationFailed {
                    first: reference,
                    second: query,
                    reason,
                }
            })
        })
        .collect()
}

/// Parses one `reference \t query \t distance \t p-value \t shared/total` line
pub fn parse_distance_line(line: &str) -> std::result::Result<DistanceRecord, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    let [reference, query, distance, p_value, shared] = fields[..] else {
        return Err(format!("expected 5 tab-separated fields, got {}: {:?}", fields.len(), line));
    };

    let distance: f64 = distance
        .trim()
        .parse()
        .map_err(|_| format!("distance is not a number: {:?}", distance))?;
    if !distance.is_finite() || distance < 0.0 {
        return Err(format!("distance must be non-negative, got {}", distance));
    }
    let p_value: f64 = p_value
        .trim()
        .parse()
        .map_err(|_| format!("p-value is not a number: {:?}", p_value))?;

    let shared = match shared.trim().split_once('/') {
        Some((hits, total)) => match (hits.parse(), total.parse()) {
            (Ok(shared), Ok(total)) => SharedHashes { shared, total },
            _ => return Err(format!("malformed shared-hashes field: {:?}", shared)),
        },
        None => return Err(format!("malformed shared-hashes field: {:?}", shared)),
    };

    Ok(DistanceRecord {
        reference: reference.to_string(),
        query: query.to_string(),
        distance,
        p_value,
        shared,
    })
}
