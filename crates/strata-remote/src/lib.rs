//! Resolution of remote layer references for Strata.
//!
//! A reference names content on a remote host (`git/team/app:v1`). A
//! [`Resolver`] maps it to a [`Descriptor`] plus a [`Fetcher`] able to
//! download the described archive. The only resolver shipped is
//! [`SshGitResolver`], which reads tree archives from the local git server.

pub mod reference;
pub mod sshgit;

pub use reference::Reference;
pub use sshgit::{SshGitFetcher, SshGitResolver};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("unsupported locator: {0:?}")]
    UnsupportedLocator(String),
    #[error("fetch of '{object}' from {url} failed: {reason}")]
    Fetch {
        url: String,
        object: String,
        reason: String,
    },
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a reference resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub media_type: String,
    /// Transport URL the content is fetched from.
    pub url: String,
    /// Tag or digest to fetch, as written in the reference.
    pub object: String,
}

/// Media type of a plain tar archive, as produced by `git archive`.
pub const MEDIA_TYPE_TAR: &str = "application/x-tar";

/// Downloads the content a [`Descriptor`] points at.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>, RemoteError>;
}

/// Result of [`Resolver::resolve`].
pub struct Resolved {
    /// Canonical form of the reference.
    pub name: String,
    pub descriptor: Descriptor,
    pub fetcher: Box<dyn Fetcher>,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Maps references to fetchable descriptors.
pub trait Resolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<Resolved, RemoteError>;
}

/// The default resolver.
pub fn get_resolver() -> Box<dyn Resolver> {
    Box::new(SshGitResolver::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolver_handles_git_host() {
        let resolved = get_resolver().resolve("git/team/app:v1").unwrap();
        assert_eq!(resolved.name, "git/team/app:v1");
        assert_eq!(
            resolved.descriptor.url,
            "ssh://localhost:22/git-server/repos/team/app"
        );
        assert_eq!(resolved.descriptor.object, "v1");
        assert_eq!(resolved.descriptor.media_type, MEDIA_TYPE_TAR);
    }

    #[test]
    fn default_resolver_rejects_other_hosts() {
        let err = get_resolver().resolve("docker.io/library/alpine:3").unwrap_err();
        assert!(matches!(err, RemoteError::UnsupportedLocator(ref l) if l == "docker.io/library/alpine"));
        assert_eq!(
            err.to_string(),
            "unsupported locator: \"docker.io/library/alpine\""
        );
    }

    #[test]
    fn descriptor_serializes_to_json() {
        let desc = Descriptor {
            media_type: MEDIA_TYPE_TAR.to_owned(),
            url: "ssh://localhost:22/git-server/repos/x".to_owned(),
            object: "main".to_owned(),
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["media_type"], "application/x-tar");
        assert_eq!(json["object"], "main");
    }
}
