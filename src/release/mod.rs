//! Release Resolution
//!
//! Finds the latest released tag of a module within a major version and
//! fetches its source tree for comparison.

pub mod github;
pub mod version;

pub use github::GithubSource;
pub use version::{latest_tag_within_major, RepositoryTag, TagVersion};

use crate::error::{cannot_test_error, skip_v0_error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Where released module sources come from
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Raw tag names of `owner/repo`
    async fn list_tags(&self, owner: &str, repo: &str) -> Result<Vec<String>>;

    /// Materialize the tree at `tag` (default branch when `None`) and return its path
    async fn fetch(&self, owner: &str, repo: &str, tag: Option<&str>) -> Result<PathBuf>;
}

/// Latest tag of `owner/repo` within `major`.
///
/// Major version 0 has no compatibility contract and is a skip signal, as is
/// the absence of any comparable release.
pub async fn latest_tag(source: &dyn ReleaseSource, owner: &str, repo: &str, major: u64) -> Result<String> {
    if major == 0 {
        return Err(skip_v0_error());
    }

    let tags: Vec<RepositoryTag> = source
        .list_tags(owner, repo)
        .await?
        .into_iter()
        .map(RepositoryTag::new)
        .collect();

    let latest = latest_tag_within_major(&tags, major).ok_or_else(cannot_test_error)?;
    info!(
        "🏷️  Latest release of {}/{} within v{}: {} ({} tags scanned)",
        owner,
        repo,
        major,
        latest.name,
        tags.len()
    );
    Ok(latest.name.clone())
}


#[cfg(test)]
mod tests {
    use super::testing::StaticSource;
    use super::*;
    use crate::error::HelperError;

    fn source(tags: &[&str]) -> StaticSource {
        StaticSource {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            tree: None,
        }
    }

    #[tokio::test]
    async fn test_major_zero_is_skipped() {
        let err = latest_tag(&source(&["v1.0.0"]), "Azure", "mod", 0).await.unwrap_err();
        assert!(matches!(err, HelperError::Skip(_)));
    }

    #[tokio::test]
    async fn test_no_comparable_release_is_not_found() {
        let err = latest_tag(&source(&["v1.0.0"]), "Azure", "mod", 2).await.unwrap_err();
        assert!(matches!(err, HelperError::NotFound(_)));
        assert!(err.is_skip());
    }

    #[tokio::test]
    async fn test_picks_highest_in_major() {
        let tag = tokio_test::assert_ok!(latest_tag(&source(&["1.0.0", "v1.2.0", "v2.0.0"]), "Azure", "mod", 1).await);
        assert_eq!(tag, "v1.2.0");
    }
}
