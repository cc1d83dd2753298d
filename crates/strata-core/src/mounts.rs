//! Mount descriptors for a snapshot's layer chain.
//!
//! Descriptors are ordered top-first: an entry shadows every entry after it
//! on conflicting paths, the same precedence an overlay gives its layers.

use crate::SnapshotError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub options: Vec<String>,
}

impl Mount {
    fn bind(source: &Path, writable: bool) -> Self {
        let mode = if writable { "rw" } else { "ro" };
        Self {
            kind: "bind".to_owned(),
            source: source.to_string_lossy().into_owned(),
            options: vec![mode.to_owned(), "rbind".to_owned()],
        }
    }

    pub fn is_writable(&self) -> bool {
        self.options.iter().any(|o| o == "rw")
    }
}

/// Build the mounts for a snapshot.
///
/// `chain` holds the content directories of the committed ancestors,
/// nearest parent first. `top` is the snapshot's own writable directory;
/// pass `None` for a view, which gets only its ancestors, all read-only.
pub fn build_mounts(chain: &[PathBuf], top: Option<&Path>) -> Vec<Mount> {
    let mut mounts = Vec::with_capacity(chain.len() + 1);
    if let Some(upper) = top {
        mounts.push(Mount::bind(upper, true));
    }
    mounts.extend(chain.iter().map(|dir| Mount::bind(dir, false)));
    mounts
}

/// Collapse a mount sequence into one `overlay` mount for the host.
///
/// A single mount is returned unchanged. A writable top becomes `upperdir`
/// and needs `workdir`; everything else becomes `lowerdir`, top-first.
pub fn overlay(mounts: &[Mount], workdir: &Path) -> Result<Mount, SnapshotError> {
    match mounts {
        [] => Err(SnapshotError::invalid_argument(
            "cannot build an overlay from zero mounts",
        )),
        [single] => Ok(single.clone()),
        [top, rest @ ..] if top.is_writable() => {
            let lower: Vec<&str> = rest.iter().map(|m| m.source.as_str()).collect();
            Ok(Mount {
                kind: "overlay".to_owned(),
                source: "overlay".to_owned(),
                options: vec![
                    format!("lowerdir={}", lower.join(":")),
                    format!("upperdir={}", top.source),
                    format!("workdir={}", workdir.display()),
                ],
            })
        }
        all => {
            let lower: Vec<&str> = all.iter().map(|m| m.source.as_str()).collect();
            Ok(Mount {
                kind: "overlay".to_owned(),
                source: "overlay".to_owned(),
                options: vec![format!("lowerdir={}", lower.join(":"))],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/s/{i}/fs"))).collect()
    }

    #[test]
    fn writable_top_over_chain() {
        let top = PathBuf::from("/s/top/fs");
        let mounts = build_mounts(&chain(3), Some(&top));
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[0].source, "/s/top/fs");
        assert_eq!(mounts[0].options, vec!["rw", "rbind"]);
        for (i, m) in mounts[1..].iter().enumerate() {
            assert_eq!(m.source, format!("/s/{i}/fs"));
            assert_eq!(m.options, vec!["ro", "rbind"]);
            assert_eq!(m.kind, "bind");
        }
    }

    #[test]
    fn view_is_entirely_read_only() {
        let mounts = build_mounts(&chain(2), None);
        assert_eq!(mounts.len(), 2);
        assert!(mounts.iter().all(|m| !m.is_writable()));
    }

    #[test]
    fn base_snapshot_has_only_its_own_mount() {
        let top = PathBuf::from("/s/top/fs");
        assert_eq!(build_mounts(&[], Some(&top)).len(), 1);
        assert!(build_mounts(&[], None).is_empty());
    }

    #[test]
    fn overlay_of_writable_chain() {
        let top = PathBuf::from("/s/top/fs");
        let mounts = build_mounts(&chain(2), Some(&top));
        let ov = overlay(&mounts, Path::new("/s/top/work")).unwrap();
        assert_eq!(ov.kind, "overlay");
        assert_eq!(
            ov.options,
            vec![
                "lowerdir=/s/0/fs:/s/1/fs",
                "upperdir=/s/top/fs",
                "workdir=/s/top/work"
            ]
        );
    }

    #[test]
    fn overlay_of_view_has_no_upper() {
        let mounts = build_mounts(&chain(2), None);
        let ov = overlay(&mounts, Path::new("/unused")).unwrap();
        assert_eq!(ov.options, vec!["lowerdir=/s/0/fs:/s/1/fs"]);
    }

    #[test]
    fn overlay_passes_single_mount_through() {
        let top = PathBuf::from("/s/top/fs");
        let mounts = build_mounts(&[], Some(&top));
        assert_eq!(overlay(&mounts, Path::new("/w")).unwrap(), mounts[0]);
        assert!(overlay(&[], Path::new("/w")).is_err());
    }

    #[test]
    fn wire_format_uses_type() {
        let m = build_mounts(&[], Some(Path::new("/a")));
        let json = serde_json::to_value(&m[0]).unwrap();
        assert_eq!(json["type"], "bind");
        assert_eq!(json["options"][0], "rw");
    }
}
