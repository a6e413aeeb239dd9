use crate::process::{run_tool, ToolError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tarball and compression collaborator shared by both pipelines.
pub trait Archiver {
    /// Packs the contents of `source` into a gzip-compressed tarball at `dest`.
    async fn archive_dir(&self, source: &Path, dest: &Path) -> Result<(), ToolError>;

    /// Compresses `path` in place and returns the path of the compressed file.
    /// The uncompressed input no longer exists afterwards.
    async fn compress(&self, path: &Path) -> Result<PathBuf, ToolError>;
}

#[derive(Debug, Clone)]
pub struct CommandArchiver {
    pub timeout: Duration,
}

impl CommandArchiver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Archiver for CommandArchiver {
    async fn archive_dir(&self, source: &Path, dest: &Path) -> Result<(), ToolError> {
        let args: [OsString; 5] = [
            "-czf".into(),
            dest.into(),
            "-C".into(),
            source.into(),
            ".".into(),
        ];
        run_tool("tar", args, self.timeout).await?.ensure_success()?;
        Ok(())
    }

    async fn compress(&self, path: &Path) -> Result<PathBuf, ToolError> {
        run_tool("gzip", [path.as_os_str()], self.timeout)
            .await?
            .ensure_success()?;
        Ok(gz_path(path))
    }
}

pub fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gz_suffix_is_appended_not_replaced() {
        assert_eq!(
            gz_path(Path::new("/var/log/sys_monitor.log.20230110_120000")),
            PathBuf::from("/var/log/sys_monitor.log.20230110_120000.gz")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gzip_replaces_input_with_compressed_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log.20230110_000000");
        std::fs::write(&path, "line\n".repeat(100)).unwrap();

        let archiver = CommandArchiver::new(Duration::from_secs(30));
        let compressed = match archiver.compress(&path).await {
            Ok(p) => p,
            // gzip is not part of every minimal image
            Err(ToolError::Spawn { .. }) => return,
            Err(err) => panic!("gzip failed: {err}"),
        };

        assert!(!path.exists());
        assert!(compressed.exists());
        assert_eq!(compressed, gz_path(&path));
    }
}
