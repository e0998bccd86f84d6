use crate::cli::{MatrixArgs, RuntimeConfig};
use crate::config::ReleaseConfig;
use crate::error::Result;
use crate::release::build_matrix;
use crate::release::matrix::filter_jobs;

/// Prints the resolved build matrix as JSON
pub fn print_matrix(config: &ReleaseConfig, args: &MatrixArgs, runtime: &RuntimeConfig) -> Result<i32> {
    let jobs = filter_jobs(build_matrix(config)?, &args.only)?;
    runtime.output().data(&serde_json::to_string_pretty(&jobs)?)?;
    Ok(0)
}
