//! Previous release tag resolution.
//!
//! Nightly builds republish against the last release tag rather than HEAD, so
//! the resolver looks for the newest tag that does not point at HEAD itself.

use super::ReleaseTag;
use super::builder::tool_detection::GIT;
use super::error::TagResolutionError;
use std::future::Future;
use std::path::PathBuf;
use tokio::process::Command;

/// A tag and the commit it peels to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef {
    /// Tag name
    pub name: String,
    /// Commit id the tag points at (annotated tags peeled)
    pub commit: String,
}

/// Tags reachable from HEAD, newest first
#[derive(Debug, Clone, Default)]
pub struct TagHistory {
    /// Commit id of HEAD
    pub head: String,
    /// Tags ordered newest first
    pub tags: Vec<TagRef>,
}

/// Source of tag history
pub trait TagSource: Send + Sync {
    /// Returns the HEAD commit and the tags reachable from it, newest first
    fn history(&self) -> impl Future<Output = Result<TagHistory, TagResolutionError>> + Send;
}

/// Resolves the previous release tag from a tag source
pub async fn resolve_previous_tag(
    source: &impl TagSource,
) -> Result<ReleaseTag, TagResolutionError> {
    let history = source.history().await?;
    let tag = select_previous_tag(&history)?;
    log::info!("Resolved previous release tag: {}", tag);
    Ok(tag)
}

/// Picks the newest tag whose commit is not HEAD.
///
/// When several tags share that commit, the highest semantic version wins;
/// tags that do not parse as versions keep history order.
pub fn select_previous_tag(history: &TagHistory) -> Result<ReleaseTag, TagResolutionError> {
    let candidate = history
        .tags
        .iter()
        .find(|t| t.commit != history.head)
        .ok_or(TagResolutionError::NoTagFound)?;

    let best = history
        .tags
        .iter()
        .filter(|t| t.commit == candidate.commit)
        .fold(candidate, |best, t| {
            let best_version = ReleaseTag::new(best.name.clone()).version();
            let version = ReleaseTag::new(t.name.clone()).version();
            match (best_version, version) {
                (Some(b), Some(v)) if v > b => t,
                (None, Some(_)) => t,
                _ => best,
            }
        });

    Ok(ReleaseTag::new(best.name.clone()))
}

/// Reads tag history by running `git` in a working copy
#[derive(Debug, Clone)]
pub struct GitTagSource {
    repo_path: PathBuf,
}

impl GitTagSource {
    /// Creates a tag source for the repository at `repo_path`
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, TagResolutionError> {
        let git = GIT.as_ref().ok_or(TagResolutionError::GitNotFound)?;
        let command = args.first().copied().unwrap_or_default().to_string();

        let output = Command::new(git)
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .await
            .map_err(|e| TagResolutionError::Git {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TagResolutionError::Git {
                command,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TagSource for GitTagSource {
    async fn history(&self) -> Result<TagHistory, TagResolutionError> {
        let head = self.git(&["rev-parse", "HEAD"]).await?.trim().to_string();
        let listing = self
            .git(&[
                "for-each-ref",
                "--merged=HEAD",
                "--sort=-creatordate",
                "--format=%(refname:short)%09%(objectname)%09%(*objectname)",
                "refs/tags",
            ])
            .await?;

        let tags = parse_for_each_ref(&listing);
        log::debug!("Found {} tag(s) reachable from HEAD {}", tags.len(), head);

        Ok(TagHistory { head, tags })
    }
}

/// Parses `name<TAB>object<TAB>peeled` lines; annotated tags use the peeled id.
fn parse_for_each_ref(listing: &str) -> Vec<TagRef> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.trim();
            let object = fields.next()?.trim();
            let peeled = fields.next().map(str::trim).unwrap_or_default();
            if name.is_empty() || object.is_empty() {
                return None;
            }
            let commit = if peeled.is_empty() { object } else { peeled };
            Some(TagRef {
                name: name.to_string(),
                commit: commit.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, commit: &str) -> TagRef {
        TagRef {
            name: name.to_string(),
            commit: commit.to_string(),
        }
    }

    #[test]
    fn untagged_head_gets_latest_tag() {
        let history = TagHistory {
            head: "c3".into(),
            tags: vec![tag("v1.2.0", "c2"), tag("v1.1.0", "c1")],
        };
        assert_eq!(select_previous_tag(&history).unwrap().as_str(), "v1.2.0");
    }

    #[test]
    fn tagged_head_gets_the_tag_before_it() {
        let history = TagHistory {
            head: "c3".into(),
            tags: vec![tag("v1.3.0", "c3"), tag("v1.2.0", "c2"), tag("v1.1.0", "c1")],
        };
        assert_eq!(select_previous_tag(&history).unwrap().as_str(), "v1.2.0");
    }

    #[test]
    fn no_tags_is_fatal() {
        let history = TagHistory {
            head: "c1".into(),
            tags: Vec::new(),
        };
        assert!(matches!(
            select_previous_tag(&history),
            Err(TagResolutionError::NoTagFound)
        ));
    }

    #[test]
    fn only_head_tags_is_fatal() {
        let history = TagHistory {
            head: "c1".into(),
            tags: vec![tag("v0.1.0", "c1")],
        };
        assert!(matches!(
            select_previous_tag(&history),
            Err(TagResolutionError::NoTagFound)
        ));
    }

    #[test]
    fn same_commit_prefers_highest_version() {
        let history = TagHistory {
            head: "c9".into(),
            tags: vec![tag("v1.2.0", "c5"), tag("v1.2.1", "c5"), tag("v1.0.0", "c1")],
        };
        assert_eq!(select_previous_tag(&history).unwrap().as_str(), "v1.2.1");
    }

    fn git(dir: &std::path::Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=nightly", "-c", "user.email=nightly@example.com"])
            .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
            .args(args)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?}: {:?}", args, output);
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    #[tokio::test]
    async fn reads_history_from_a_git_repository() {
        if GIT.is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["commit", "-q", "--allow-empty", "-m", "first"]);
        git(dir.path(), &["tag", "v1.1.0"]);
        let previous = git(dir.path(), &["rev-parse", "HEAD"]);
        git(dir.path(), &["commit", "-q", "--allow-empty", "-m", "second"]);
        git(dir.path(), &["tag", "-a", "v1.2.0", "-m", "release 1.2.0"]);
        let head = git(dir.path(), &["rev-parse", "HEAD"]);

        let source = GitTagSource::new(dir.path());
        let history = source.history().await.unwrap();

        assert_eq!(history.head, head);
        let mut tags = history.tags.clone();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(tags, vec![tag("v1.1.0", &previous), tag("v1.2.0", &head)]);
        assert_eq!(resolve_previous_tag(&source).await.unwrap().as_str(), "v1.1.0");
    }

    #[tokio::test]
    async fn missing_repository_is_a_git_error() {
        if GIT.is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let err = GitTagSource::new(dir.path().join("absent"))
            .history()
            .await
            .unwrap_err();
        assert!(matches!(err, TagResolutionError::Git { .. }));
    }

    #[test]
    fn parses_annotated_and_lightweight_refs() {
        let listing = "v1.2.0\tabc\tdef\nv1.1.0\t123\t\n\n";
        assert_eq!(
            parse_for_each_ref(listing),
            vec![tag("v1.2.0", "def"), tag("v1.1.0", "123")]
        );
    }
}
