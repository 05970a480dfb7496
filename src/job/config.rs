use std::env;
use std::fs;
use std::path::PathBuf;

use crate::common::parse_memory;
use crate::error::{Error, Result};
use crate::input::SPLIT_SIZE;

/// A job description as given on the command line, before validation.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Input file, directory, or wildcard pattern. Empty: mapper reads
    /// nothing.
    pub input: String,
    /// Mapper command line, split on whitespace. Required.
    pub mapper: String,
    pub mappers: usize,
    /// Reducer command line. Empty: map-only job.
    pub reducer: String,
    pub reducers: usize,
    /// Total intermediate memory, e.g. "256m". Divided evenly over the
    /// mappers × reducers buffer grid.
    pub memory: String,
    /// Output directory. Empty: stream results to stdout.
    pub output: String,
    /// Root for the temporary job directory.
    pub temp_dir: PathBuf,
    /// Input split size in bytes.
    pub split_size: u64,
}

impl Default for JobConfig {
    fn default() -> JobConfig {
        JobConfig {
            input: String::new(),
            mapper: String::new(),
            mappers: 4,
            reducer: String::new(),
            reducers: 4,
            memory: "256m".to_string(),
            output: String::new(),
            temp_dir: env::temp_dir(),
            split_size: SPLIT_SIZE,
        }
    }
}

impl JobConfig {
    pub fn has_input(&self) -> bool {
        !self.input.is_empty()
    }

    pub fn has_reducer(&self) -> bool {
        !self.reducer.is_empty()
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }
}

/// Validated configuration plus the created temporary tree.
pub(crate) struct Setup {
    pub memory: usize,
    pub output: Option<PathBuf>,
    /// The `xrt-XXXXXX` job directory.
    pub temp_dir: PathBuf,
    pub temp_scratch: PathBuf,
    pub temp_spill: PathBuf,
    pub temp_output: PathBuf,
}

/// Validate the configuration and build the temporary layout
/// `tempdir/xrt-XXXXXX/{scratch,spill,output}`.
pub(crate) fn setup(config: &JobConfig) -> Result<Setup> {
    if config.mapper.is_empty() {
        return Err(Error::Config("--mapper is required".to_string()));
    }
    if config.mappers == 0 {
        return Err(Error::Config("invalid argument --mappers=0".to_string()));
    }
    if config.has_reducer() && config.reducers == 0 {
        return Err(Error::Config("invalid argument --reducers=0".to_string()));
    }
    if config.split_size == 0 {
        return Err(Error::Config("invalid split size 0".to_string()));
    }

    let memory = parse_memory(&config.memory)
        .map_err(|e| Error::Config(format!("invalid argument --memory={}: {}", config.memory, e)))?;

    let output = if config.has_output() {
        let output = std::path::absolute(&config.output)?;
        if output.exists() {
            return Err(Error::Config(format!(
                "--output directory {} already exists",
                output.display()
            )));
        }
        Some(output)
    } else {
        None
    };

    let temp_dir = tempfile::Builder::new()
        .prefix("xrt-")
        .tempdir_in(&config.temp_dir)
        .map_err(|e| {
            Error::Config(format!(
                "bad directory '{}' - {}",
                config.temp_dir.display(),
                e
            ))
        })?
        .keep();

    let temp_scratch = temp_dir.join("scratch");
    let temp_spill = temp_dir.join("spill");
    let temp_output = temp_dir.join("output");
    fs::create_dir(&temp_scratch)?;
    fs::create_dir(&temp_spill)?;
    fs::create_dir(&temp_output)?;

    Ok(Setup {
        memory,
        output,
        temp_dir,
        temp_scratch,
        temp_spill,
        temp_output,
    })
}
