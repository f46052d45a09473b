//! iRacing SDK provider.
//!
//! Two backends share the same decoder: the sim's live memory map (Windows
//! only) and an image file captured from it.

pub mod image;
#[cfg(windows)]
mod mapping;

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{Result, SourceError};
use crate::provider::{FieldValue, Provider};
use self::image::{Header, ImageView};

/// Name of the sim's memory-mapped file.
pub const MEM_MAP_NAME: &str = "Local\\IRSDKMemMapFileName";
/// Size of the mapped view.
pub const MEM_MAP_SIZE: usize = 1164 * 1024;

/// Bytes of one telemetry image.
trait ImageSource: Send {
    fn bytes(&self) -> &[u8];
}

struct FileImage(Vec<u8>);

impl ImageSource for FileImage {
    fn bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Clone, Debug)]
enum Backend {
    Live,
    File(PathBuf),
}

/// [`Provider`] over the iRacing shared-memory layout.
pub struct IrsdkProvider {
    backend: Backend,
    image: Option<Box<dyn ImageSource>>,
}

impl IrsdkProvider {
    /// Read the running sim's shared memory.
    pub fn live() -> Self {
        Self {
            backend: Backend::Live,
            image: None,
        }
    }

    /// Read a captured memory image from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self {
            backend: Backend::File(path.as_ref().to_path_buf()),
            image: None,
        }
    }

    fn open(&self) -> Result<Box<dyn ImageSource>> {
        match &self.backend {
            Backend::File(path) => {
                let data = std::fs::read(path)?;
                Ok(Box::new(FileImage(data)))
            }
            #[cfg(windows)]
            Backend::Live => Ok(Box::new(mapping::LiveMapping::open()?)),
            #[cfg(not(windows))]
            Backend::Live => Err(SourceError::Unsupported),
        }
    }

    fn view(&self) -> Result<ImageView<'_>> {
        let image = self.image.as_ref().ok_or(SourceError::NotInitialized)?;
        ImageView::parse(image.bytes())
    }
}

impl Provider for IrsdkProvider {
    fn startup(&mut self) -> Result<()> {
        if self.image.is_some() {
            return Ok(());
        }
        let opened = self.open()?;
        let header = Header::parse(opened.bytes())?;
        info!(
            backend = ?self.backend,
            version = header.ver,
            tick_rate = header.tick_rate,
            vars = header.num_vars,
            "irsdk image opened"
        );
        self.image = Some(opened);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.image.take().is_some() {
            debug!("irsdk image closed");
        }
    }

    fn is_initialized(&self) -> bool {
        self.image.is_some()
    }

    fn is_connected(&self) -> bool {
        self.view().map(|v| v.is_connected()).unwrap_or(false)
    }

    fn field(&self, name: &str) -> Result<FieldValue> {
        self.view()?.read_var(name)
    }

    fn session_section(&self, name: &str) -> Result<Value> {
        self.view()?.session_section(name)
    }
}
