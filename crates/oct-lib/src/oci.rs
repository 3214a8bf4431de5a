//! On-disk OCI image layout: content-addressed blobs plus named references.
//!
//! Rooted at `<ociRoot>/<remoteName>/`:
//!
//! ```text
//! oci-layout              {"imageLayoutVersion":"1.0.0"}
//! blobs/sha256/<hex>      one file per blob, the filename is the digest hex
//! refs/<tag>              JSON descriptor per reference
//! tmp-XXXXXXXX/           scratch dir, lives as long as the handle
//! ```
//!
//! Blob and reference writes always go through a scratch file followed by a
//! rename, so a crash mid-write leaves only an orphan scratch file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
};
use tracing::warn;

use crate::{
    digest::{Digest, Hasher, ALGORITHM},
    error::{Error, Result},
};

const LAYOUT_FILE: &str = "oci-layout";
const BLOB_DIR: &str = "blobs";
const REF_DIR: &str = "refs";

/// Version written into the `oci-layout` marker file.
pub const LAYOUT_VERSION: &str = "1.0.0";

const COPY_BUF: usize = 64 * 1024;

/// The `oci-layout` marker in the root of a layout directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageLayout {
    #[serde(rename = "imageLayoutVersion")]
    pub version: String,
}

/// A named pointer at a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
}

/// Handle on one image's layout directory.
///
/// Thread-safe for concurrent readers and writers on distinct keys; two
/// writers racing on the same blob both stage identical content, so either
/// rename winning leaves a digest-correct file.
pub struct Layout {
    path: PathBuf,
    temp: PathBuf,
}

impl Layout {
    /// Open the layout at `path`, creating the directory tree and the
    /// `oci-layout` marker if missing. Idempotent on existing layouts.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path).await?;

        if !fs::try_exists(path.join(LAYOUT_FILE)).await? {
            fs::create_dir_all(path.join(BLOB_DIR).join(ALGORITHM)).await?;
            fs::create_dir_all(path.join(REF_DIR)).await?;

            let layout = ImageLayout { version: LAYOUT_VERSION.to_owned() };
            fs::write(path.join(LAYOUT_FILE), serde_json::to_vec(&layout)?)
                .await?;
        }

        let temp = path.join(format!("tmp-{:08x}", rand::random::<u32>()));
        fs::create_dir_all(&temp).await?;

        Ok(Self { path, temp })
    }

    /// Stream `reader` into the store and return the digest and size of the
    /// content. Idempotent: a success means "the content is at digest", not
    /// "written by this call".
    pub async fn put_blob(
        &self,
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<(Digest, u64)> {
        let scratch =
            self.temp.join(format!("blob-{:08x}", rand::random::<u32>()));
        let mut file = fs::File::create(&scratch).await?;

        let mut hasher = Hasher::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; COPY_BUF];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&scratch).await;
                    return Err(e.into());
                }
            };
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
            size += n as u64;
        }
        file.flush().await?;
        drop(file);

        let digest = hasher.finish();
        fs::rename(&scratch, self.blob_path(&digest)).await?;

        Ok((digest, size))
    }

    /// Record `descriptor` under `name`. Re-putting an identical descriptor
    /// succeeds; a differing one fails with [`Error::Clobber`].
    pub async fn put_reference(
        &self,
        name: &str,
        descriptor: &Descriptor,
    ) -> Result<()> {
        match self.get_reference(name).await {
            Ok(old) => {
                return if old == *descriptor {
                    Ok(())
                } else {
                    Err(Error::Clobber(name.to_owned()))
                };
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let scratch = self
            .temp
            .join(format!("ref.{name}-{:08x}", rand::random::<u32>()));
        fs::write(&scratch, serde_json::to_vec(descriptor)?).await?;
        fs::rename(&scratch, self.path.join(REF_DIR).join(name)).await?;

        Ok(())
    }

    /// Open a blob for reading.
    pub async fn get_blob(&self, digest: &Digest) -> Result<fs::File> {
        match fs::File::open(self.blob_path(digest)).await {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::BlobNotFound(digest.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Absolute path of a stored blob; the seeder copies layer blobs from
    /// here into the torrent data dir.
    pub async fn get_blob_path(&self, digest: &Digest) -> Result<PathBuf> {
        let path = self.blob_path(digest);
        if !fs::try_exists(&path).await? {
            return Err(Error::BlobNotFound(digest.clone()));
        }
        Ok(path)
    }

    pub async fn get_reference(&self, name: &str) -> Result<Descriptor> {
        let path = self.path.join(REF_DIR).join(name);
        let content = match fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::RefNotFound(name.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    pub async fn exist(&self, digest: &Digest) -> Result<bool> {
        Ok(fs::try_exists(self.blob_path(digest)).await?)
    }

    /// Idempotent delete: absent content is a success.
    pub async fn delete_blob(&self, digest: &Digest) -> Result<()> {
        match fs::remove_file(self.blob_path(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent delete: absent references are a success.
    pub async fn delete_reference(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path.join(REF_DIR).join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_blobs(&self) -> Result<Vec<Digest>> {
        let dir = self.path.join(BLOB_DIR).join(ALGORITHM);
        let mut entries = fs::read_dir(&dir).await?;
        let mut digests = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            match Digest::from_hex(&name.to_string_lossy()) {
                Ok(d) => digests.push(d),
                Err(_) => {
                    warn!("foreign file in blob dir: {:?}", name);
                }
            }
        }
        Ok(digests)
    }

    pub async fn list_references(&self) -> Result<Vec<String>> {
        let dir = self.path.join(REF_DIR);
        let mut entries = fs::read_dir(&dir).await?;
        let mut refs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            refs.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(refs)
    }

    /// Remove the scratch directory. Operations after this may fail.
    pub async fn close(&self) -> Result<()> {
        match fs::remove_dir_all(&self.temp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.path.join(BLOB_DIR).join(ALGORITHM).join(digest.id())
    }
}

impl Drop for Layout {
    fn drop(&mut self) {
        // close() is the real cleanup, this only reaps what it missed
        let _ = std::fs::remove_dir_all(&self.temp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    async fn open_layout(dir: &tempfile::TempDir) -> Result<Layout> {
        Layout::open(dir.path().join("busybox")).await
    }

    #[tokio::test]
    async fn open_is_empty_and_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = open_layout(&dir).await?;

        assert!(layout.list_blobs().await?.is_empty());
        assert!(layout.list_references().await?.is_empty());
        layout.close().await?;

        // reopening an initialized layout succeeds
        let layout = open_layout(&dir).await?;
        assert!(layout.list_blobs().await?.is_empty());
        layout.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn blob_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = open_layout(&dir).await?;

        for bytes in [&b""[..], b"some blob", b"another blob"] {
            let (digest, size) = layout.put_blob(bytes).await?;
            assert_eq!(digest, Digest::of_bytes(bytes));
            assert_eq!(size, bytes.len() as u64);

            let mut reader = layout.get_blob(&digest).await?;
            let mut got = Vec::new();
            reader.read_to_end(&mut got).await?;
            assert_eq!(got, bytes);

            layout.delete_blob(&digest).await?;
            assert!(matches!(
                layout.get_blob(&digest).await,
                Err(Error::BlobNotFound(_))
            ));
            // double delete is fine
            layout.delete_blob(&digest).await?;
        }

        assert!(layout.list_blobs().await?.is_empty());
        layout.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn empty_blob_digest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = open_layout(&dir).await?;

        let (digest, size) = layout.put_blob(&b""[..]).await?;
        assert_eq!(digest.as_str(), EMPTY_SHA256);
        assert_eq!(size, 0);
        assert!(layout.exist(&digest).await?);
        layout.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn reference_clobber() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = open_layout(&dir).await?;

        let desc = Descriptor {
            media_type: "application/vnd.oci.image.manifest.v1+json"
                .to_owned(),
            digest: Digest::of_bytes(b"manifest"),
            size: 100,
        };

        layout.put_reference("v1", &desc).await?;
        assert_eq!(layout.get_reference("v1").await?, desc);

        // identical put is idempotent
        layout.put_reference("v1", &desc).await?;

        // differing put clobbers
        let other = Descriptor { size: 101, ..desc.clone() };
        assert!(matches!(
            layout.put_reference("v1", &other).await,
            Err(Error::Clobber(_))
        ));

        layout.delete_reference("v1").await?;
        assert!(matches!(
            layout.get_reference("v1").await,
            Err(Error::RefNotFound(_))
        ));
        layout.delete_reference("v1").await?;

        layout.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn scratch_dir_is_reaped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = open_layout(&dir).await?;
        let temp = layout.temp.clone();

        assert!(fs::try_exists(&temp).await?);
        layout.close().await?;
        assert!(!fs::try_exists(&temp).await?);
        Ok(())
    }
}
