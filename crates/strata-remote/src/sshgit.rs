use crate::{Descriptor, Fetcher, Reference, RemoteError, Resolved, Resolver, MEDIA_TYPE_TAR};
use std::process::Command;
use tracing::{debug, info};

const GIT_HOST: &str = "git";
const SERVER_URL: &str = "ssh://localhost:22/git-server/repos/";

/// Resolves `git/<repo>` references against the git server reachable over
/// ssh on localhost.
#[derive(Debug, Clone, Default)]
pub struct SshGitResolver {
    program: Option<String>,
}

impl SshGitResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `program` instead of `git` for fetching.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    /// Transport URL for a reference on the `git` host.
    pub fn url_for(reference: &Reference) -> Result<String, RemoteError> {
        if reference.hostname() != GIT_HOST {
            return Err(RemoteError::UnsupportedLocator(reference.locator.clone()));
        }
        let repo = reference
            .locator
            .strip_prefix("git/")
            .unwrap_or_default();
        if repo.is_empty() {
            return Err(RemoteError::UnsupportedLocator(reference.locator.clone()));
        }
        Ok(format!("{SERVER_URL}{repo}"))
    }
}

impl Resolver for SshGitResolver {
    fn resolve(&self, reference: &str) -> Result<Resolved, RemoteError> {
        let parsed = Reference::parse(reference)?;
        let url = Self::url_for(&parsed)?;
        debug!("resolved {parsed} to {url}");
        let fetcher = match &self.program {
            Some(program) => SshGitFetcher::with_program(program.clone()),
            None => SshGitFetcher::new(),
        };
        Ok(Resolved {
            name: parsed.to_string(),
            descriptor: Descriptor {
                media_type: MEDIA_TYPE_TAR.to_owned(),
                url,
                object: parsed.object,
            },
            fetcher: Box::new(fetcher),
        })
    }
}

/// Fetches tree archives with `git archive --remote`.
#[derive(Debug, Clone)]
pub struct SshGitFetcher {
    program: String,
}

impl Default for SshGitFetcher {
    fn default() -> Self {
        Self {
            program: "git".to_owned(),
        }
    }
}

impl SshGitFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Fetcher for SshGitFetcher {
    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>, RemoteError> {
        info!("fetching {} from {}", descriptor.object, descriptor.url);
        let output = Command::new(&self.program)
            .arg("archive")
            .arg(format!("--remote={}", descriptor.url))
            .arg(&descriptor.object)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RemoteError::Fetch {
                url: descriptor.url.clone(),
                object: descriptor.object.clone(),
                reason: match stderr.trim() {
                    "" => output.status.to_string(),
                    msg => msg.to_owned(),
                },
            });
        }
        debug!("fetched {} bytes", output.stdout.len());
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_strips_git_prefix() {
        let r = Reference::parse("git/team/app:v1").unwrap();
        assert_eq!(
            SshGitResolver::url_for(&r).unwrap(),
            "ssh://localhost:22/git-server/repos/team/app"
        );
    }

    #[test]
    fn bare_git_host_is_unsupported() {
        let r = Reference::parse("git:main").unwrap();
        assert!(matches!(
            SshGitResolver::url_for(&r),
            Err(RemoteError::UnsupportedLocator(_))
        ));
    }

    #[test]
    fn host_must_match_exactly() {
        let r = Reference::parse("gitlab.com/team/app:v1").unwrap();
        assert!(matches!(
            SshGitResolver::url_for(&r),
            Err(RemoteError::UnsupportedLocator(_))
        ));
    }

    #[test]
    fn resolve_propagates_parse_errors() {
        let err = SshGitResolver::new().resolve("git/app").unwrap_err();
        assert!(matches!(err, RemoteError::InvalidReference { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn fetch_passes_remote_and_object() {
        // echo prints its arguments, standing in for the archive bytes
        let resolved = SshGitResolver::with_program("echo")
            .resolve("git/team/app:main@abc")
            .unwrap();
        let out = resolved.fetcher.fetch(&resolved.descriptor).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "archive --remote=ssh://localhost:22/git-server/repos/team/app main@abc\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_fetch_reports_error() {
        let resolved = SshGitResolver::with_program("false")
            .resolve("git/app:v1")
            .unwrap();
        let err = resolved.fetcher.fetch(&resolved.descriptor).unwrap_err();
        assert!(matches!(err, RemoteError::Fetch { ref object, .. } if object == "v1"));
    }

    #[test]
    fn missing_program_is_io_error() {
        let fetcher = SshGitFetcher::with_program("/nonexistent/strata-git");
        let desc = Descriptor {
            media_type: MEDIA_TYPE_TAR.to_owned(),
            url: "ssh://localhost:22/git-server/repos/app".to_owned(),
            object: "v1".to_owned(),
        };
        assert!(matches!(fetcher.fetch(&desc), Err(RemoteError::Io(_))));
    }
}
