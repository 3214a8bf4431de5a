//! The upstream registry, seen only through the interface the pipeline
//! consumes: layer listings, the raw manifest, and blob streams.
//!
//! The network client is an external collaborator. [`DirRegistry`] serves
//! images out of a local directory of OCI layouts (the `oci:` transport),
//! which is what the test suite and single-host deployments use.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::{
    digest::Digest,
    error::{Error, Result},
    image::ImageRef,
    manifest::Manifest,
    oci::Layout,
};

/// One blob as advertised by a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub digest: Digest,
    pub size: u64,
}

/// Registry credentials, threaded explicitly through every call.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Raw manifest bytes as the registry serves them for the reference.
    async fn manifest(
        &self,
        image: &ImageRef,
        creds: Option<&Credentials>,
    ) -> Result<Vec<u8>>;

    /// Digest and size of every layer, in manifest order.
    async fn layer_infos(
        &self,
        image: &ImageRef,
        creds: Option<&Credentials>,
    ) -> Result<Vec<BlobInfo>>;

    /// The image config blob, when the image has one.
    async fn config_info(
        &self,
        image: &ImageRef,
        creds: Option<&Credentials>,
    ) -> Result<Option<BlobInfo>>;

    /// Stream a blob's bytes.
    async fn open_blob(
        &self,
        image: &ImageRef,
        digest: &Digest,
        creds: Option<&Credentials>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Serves images from `<root>/<remoteName>/`, each an OCI layout whose
/// `refs/<tag>` points at the manifest.
pub struct DirRegistry {
    root: PathBuf,
}

impl DirRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn open_layout(&self, image: &ImageRef) -> Result<Layout> {
        let dir = image.layout_dir(&self.root);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(Error::RefNotFound(image.to_string()));
        }
        Layout::open(dir).await
    }

    async fn parsed_manifest(&self, image: &ImageRef) -> Result<Manifest> {
        let buf = self.read_manifest(image).await?;
        Manifest::from_bytes(&buf)
    }

    async fn read_manifest(&self, image: &ImageRef) -> Result<Vec<u8>> {
        use tokio::io::AsyncReadExt;

        let layout = self.open_layout(image).await?;
        let descriptor = layout.get_reference(&image.tag).await?;
        let mut reader = layout.get_blob(&descriptor.digest).await?;
        let mut buf = Vec::with_capacity(descriptor.size as usize);
        reader.read_to_end(&mut buf).await?;
        layout.close().await?;
        Ok(buf)
    }
}

#[async_trait]
impl Registry for DirRegistry {
    async fn manifest(
        &self,
        image: &ImageRef,
        _creds: Option<&Credentials>,
    ) -> Result<Vec<u8>> {
        self.read_manifest(image).await
    }

    async fn layer_infos(
        &self,
        image: &ImageRef,
        _creds: Option<&Credentials>,
    ) -> Result<Vec<BlobInfo>> {
        let manifest = self.parsed_manifest(image).await?;
        Ok(manifest
            .layers
            .into_iter()
            .map(|l| BlobInfo { digest: l.digest, size: l.size })
            .collect())
    }

    async fn config_info(
        &self,
        image: &ImageRef,
        _creds: Option<&Credentials>,
    ) -> Result<Option<BlobInfo>> {
        let manifest = self.parsed_manifest(image).await?;
        Ok(Some(BlobInfo {
            digest: manifest.config.digest,
            size: manifest.config.size,
        }))
    }

    async fn open_blob(
        &self,
        image: &ImageRef,
        digest: &Digest,
        _creds: Option<&Credentials>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let layout = self.open_layout(image).await?;
        let reader = layout.get_blob(digest).await?;
        layout.close().await?;
        Ok(Box::new(reader))
    }
}
