//! Local spool: each content hash not yet confirmed in the object store
//! lives as one file under `spool_directory`. The accepting session
//! (the LMTP/IMAP append path, out of scope here) is the sole writer;
//! the upload worker and the body fetch path are the readers.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::ErrorKind;

use mailgram_engine::fetch::Spool;
use mailgram_store::{CoreError, Result};

pub struct FsSpool {
    directory: PathBuf,
}

impl FsSpool {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    fn path_for(&self, content_hash: &str) -> PathBuf {
        self.directory.join(content_hash)
    }
}

#[async_trait]
impl Spool for FsSpool {
    async fn read(&self, content_hash: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(content_hash)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Transient(anyhow::anyhow!(e))),
        }
    }
}
