use crate::cli::{RepoArgs, RuntimeConfig};
use crate::error::Result;
use crate::release::{GitTagSource, resolve_previous_tag};

/// Prints the tag a run would publish against
pub async fn print_previous_tag(args: &RepoArgs, runtime: &RuntimeConfig) -> Result<i32> {
    let tag = resolve_previous_tag(&GitTagSource::new(&args.repo_path)).await?;
    runtime.output().data(tag.as_str())?;
    Ok(0)
}
