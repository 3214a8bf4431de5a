//! Image references: `[registry/]name[:tag]`.
//!
//! A reference resolves to the layout directory `<ociRoot>/<remoteName>/`
//! and the reference name `<tag>`. The registry host is dropped from the
//! remote name, and bare single-segment names get the `library/` prefix,
//! so `busybox` and `docker.io/library/busybox` land in the same layout.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Repository path without the registry host, e.g. `library/busybox`.
    pub remote_name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn parse(source: &str) -> Result<Self> {
        if source.is_empty() {
            return Err(Error::InvalidReference(source.to_owned()));
        }

        // a colon after the last slash separates the tag; a colon before it
        // belongs to the registry host port
        let (name, tag) = match source.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (source, DEFAULT_TAG),
        };
        if name.is_empty() || tag.is_empty() {
            return Err(Error::InvalidReference(source.to_owned()));
        }

        // strip the registry host, it is not part of the remote name
        let mut segments: Vec<&str> = name.split('/').collect();
        if segments.len() > 1 && is_registry_host(segments[0]) {
            segments.remove(0);
        }
        if segments.iter().any(|s| s.is_empty() || !is_name_segment(s)) {
            return Err(Error::InvalidReference(source.to_owned()));
        }

        let remote_name = if segments.len() == 1 {
            format!("library/{}", segments[0])
        } else {
            segments.join("/")
        };

        Ok(Self { remote_name, tag: tag.to_owned() })
    }

    /// The layout directory of this image under `oci_root`.
    pub fn layout_dir(&self, oci_root: &Path) -> PathBuf {
        oci_root.join(&self.remote_name)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote_name, self.tag)
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

fn is_name_segment(segment: &str) -> bool {
    segment
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"._-".contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_gets_library_and_latest() -> Result<()> {
        let image = ImageRef::parse("busybox")?;
        assert_eq!(image.remote_name, "library/busybox");
        assert_eq!(image.tag, "latest");
        Ok(())
    }

    #[test]
    fn registry_host_is_stripped() -> Result<()> {
        let image = ImageRef::parse("docker.io/library/busybox:1.36")?;
        assert_eq!(image.remote_name, "library/busybox");
        assert_eq!(image.tag, "1.36");

        let image = ImageRef::parse("localhost:5000/myrepo/app")?;
        assert_eq!(image.remote_name, "myrepo/app");
        assert_eq!(image.tag, "latest");
        Ok(())
    }

    #[test]
    fn layout_dir_joins_remote_name() -> Result<()> {
        let image = ImageRef::parse("busybox:v1")?;
        assert_eq!(
            image.layout_dir(Path::new("/data/oci")),
            Path::new("/data/oci/library/busybox")
        );
        Ok(())
    }

    #[test]
    fn bad_references_are_rejected() {
        for source in ["", "UPPER/case", "a//b", "name:", ":tag"] {
            assert!(
                ImageRef::parse(source).is_err(),
                "{source:?} should not parse"
            );
        }
    }
}
