use crate::RemoteError;
use std::fmt;

/// A parsed `locator[:tag][@digest]` reference.
///
/// The object is the part after the locator: `tag`, `tag@digest` or
/// `@digest`. A tag separator is only recognised after the last `/`, so a
/// port in the host (`host:5000/repo:tag`) stays in the locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub locator: String,
    pub object: String,
}

fn invalid(reference: &str, reason: &str) -> RemoteError {
    RemoteError::InvalidReference {
        reference: reference.to_owned(),
        reason: reason.to_owned(),
    }
}

impl Reference {
    pub fn parse(s: &str) -> Result<Self, RemoteError> {
        if s.is_empty() {
            return Err(invalid(s, "empty reference"));
        }
        if s.contains("://") {
            return Err(invalid(s, "reference must not carry a scheme"));
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid(s, "reference contains whitespace"));
        }

        let mut locator = s;
        let mut object = String::new();
        if let Some(i) = locator.rfind('@') {
            object = locator[i..].to_owned();
            locator = &locator[..i];
        }
        let slash = locator.rfind('/');
        if let Some(i) = locator.rfind(':') {
            if !matches!(slash, Some(j) if j > i) {
                object = format!("{}{}", &locator[i + 1..], object);
                locator = &locator[..i];
            }
        }

        if locator.is_empty() || locator.starts_with('/') {
            return Err(invalid(s, "hostname required"));
        }
        if locator.ends_with('/') || locator.contains("//") {
            return Err(invalid(s, "empty path component"));
        }
        if object.is_empty() || object == "@" || object.ends_with('@') {
            return Err(invalid(s, "object required"));
        }
        if object.matches('@').count() > 1 {
            return Err(invalid(s, "more than one digest"));
        }

        Ok(Self {
            locator: locator.to_owned(),
            object,
        })
    }

    /// First path component of the locator.
    pub fn hostname(&self) -> &str {
        match self.locator.find('/') {
            Some(i) => &self.locator[..i],
            None => &self.locator,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        let tag = match self.object.find('@') {
            Some(i) => &self.object[..i],
            None => &self.object,
        };
        (!tag.is_empty()).then_some(tag)
    }

    pub fn digest(&self) -> Option<&str> {
        self.object.find('@').map(|i| &self.object[i + 1..])
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.object.starts_with('@') {
            write!(f, "{}{}", self.locator, self.object)
        } else {
            write!(f, "{}:{}", self.locator, self.object)
        }
    }
}

impl std::str::FromStr for Reference {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
