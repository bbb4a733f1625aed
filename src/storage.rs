//! 上传目录管理与暂存文件（写入完成后再独占发布）。

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, ErrorKind};
use tracing::{debug, warn};
use uuid::Uuid;

const STAGING_PREFIX: &str = ".intake-";
const STAGING_SUFFIX: &str = ".part";

#[derive(Clone, Debug)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 确保目录存在（递归创建）。
    pub async fn ensure_exists(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// 删除目录下的全部条目，保留目录本身。返回删除数量。
    pub async fn clear(&self) -> io::Result<usize> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(value) => value,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            let result = if file_type.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(path = ?path, "entry vanished during clear");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    /// 把单个文件名解析为目录内路径，拒绝任何多段或穿越路径。
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => Ok(self.root.join(segment)),
            _ => Err(StorageError::InvalidPath),
        }
    }

    /// 在目录内创建独占的暂存文件。
    pub async fn stage(&self) -> io::Result<StagedFile> {
        let temp_path = self
            .root
            .join(format!("{STAGING_PREFIX}{}{STAGING_SUFFIX}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        Ok(StagedFile {
            temp_path,
            file: Some(file),
        })
    }
}

/// 暂存文件：写满并同步后独占发布（硬链接，必要时重命名），随后删除暂存路径。
///
/// 未发布就被丢弃（包括请求被取消）时会在 `Drop` 中删除。
#[derive(Debug)]
pub struct StagedFile {
    temp_path: PathBuf,
    file: Option<File>,
}

impl StagedFile {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub async fn write_all(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(chunk).await,
            None => Err(io::Error::other("staged file already sealed")),
        }
    }

    /// 刷新并落盘，关闭写句柄。
    pub async fn seal(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    /// 以 `target` 发布内容；目标已存在时返回 `AlreadyExists`。
    ///
    /// 文件系统不支持硬链接时，先以 `create_new` 占住目标名再重命名覆盖。
    pub async fn publish(&mut self, target: &Path) -> io::Result<()> {
        self.seal().await?;
        match fs::hard_link(&self.temp_path, target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(err),
            Err(err) => {
                debug!(error = %err, "hard link unavailable, falling back to rename");
                reserve_and_rename(&self.temp_path, target).await
            }
        }
    }

    /// 删除暂存路径（发布成功或失败后都应调用）。
    pub async fn discard(mut self) {
        drop(self.file.take());
        if let Err(err) = fs::remove_file(&self.temp_path).await
            && err.kind() != ErrorKind::NotFound
        {
            warn!(path = ?self.temp_path, error = %err, "failed to remove staged file");
        }
        self.temp_path = PathBuf::new();
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.temp_path.as_os_str().is_empty() {
            return;
        }
        drop(self.file.take());
        let _ = std::fs::remove_file(&self.temp_path);
    }
}

async fn reserve_and_rename(temp_path: &Path, target: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await?;
    if let Err(err) = fs::rename(temp_path, target).await {
        let _ = fs::remove_file(target).await;
        return Err(err);
    }
    Ok(())
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
