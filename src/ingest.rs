//! 上传摄取：把一个 multipart 请求体转换为唯一的 `UploadOutcome`。

use axum::body::Bytes;
use futures_util::Stream;
use multer::{Field, Multipart};
use std::fmt;
use std::io;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::{debug, error, info, warn};

use crate::config::{ALLOWED_MIME_TYPES, MAX_PUBLISH_ATTEMPTS};
use crate::naming::{SafeFileName, StampClock};
use crate::storage::{StorageError, UploadDir};

/// 注入给 `Ingestor` 的上传策略。
#[derive(Clone, Copy, Debug, Default)]
pub struct UploadPolicy {
    /// 每次上传前清空目录（破坏性，需显式开启）。
    pub clear_on_upload: bool,
    /// 单个文件的字节上限，0 表示不限制。
    pub max_file_size: u64,
}

/// 校验失败：以 400（超限为 413）返回给客户端，不重试。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidContentType,
    DisallowedType,
    NoFile,
    TooLarge,
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::InvalidContentType => "Missing or invalid Content-Type header",
            Rejection::DisallowedType => "Invalid file type. Only JPEG and PNG are allowed.",
            Rejection::NoFile => "No file uploaded",
            Rejection::TooLarge => "File too large",
        }
    }
}

/// 解析或磁盘错误：以 500 返回，并记录日志。
#[derive(Debug)]
pub enum IngestError {
    Multipart(multer::Error),
    Io(io::Error),
    InvalidPath,
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Multipart(err) => write!(f, "{err}"),
            IngestError::Io(err) => write!(f, "{err}"),
            IngestError::InvalidPath => f.write_str("invalid destination path"),
        }
    }
}

impl From<io::Error> for IngestError {
    fn from(err: io::Error) -> Self {
        IngestError::Io(err)
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidPath => IngestError::InvalidPath,
            StorageError::Io(err) => IngestError::Io(err),
        }
    }
}

/// 一个请求的最终结果，每个请求恰好产生一个。
#[derive(Debug)]
pub enum UploadOutcome {
    Success { file_name: String },
    Rejected(Rejection),
    Failure(IngestError),
}

/// 中途终止摄取的原因。
enum Halt {
    Reject(Rejection),
    Fail(IngestError),
}

impl From<multer::Error> for Halt {
    fn from(err: multer::Error) -> Self {
        Halt::Fail(IngestError::Multipart(err))
    }
}

impl From<io::Error> for Halt {
    fn from(err: io::Error) -> Self {
        Halt::Fail(IngestError::Io(err))
    }
}

impl From<StorageError> for Halt {
    fn from(err: StorageError) -> Self {
        Halt::Fail(err.into())
    }
}

/// 上传摄取器：持有目标目录、策略与命名时钟，可被并发请求共享。
#[derive(Debug)]
pub struct Ingestor {
    dir: UploadDir,
    policy: UploadPolicy,
    clock: StampClock,
}

impl Ingestor {
    pub fn new(dir: UploadDir, policy: UploadPolicy) -> Self {
        Self {
            dir,
            policy,
            clock: StampClock::new(),
        }
    }

    pub fn upload_dir(&self) -> &UploadDir {
        &self.dir
    }

    /// 处理一个请求体。`content_type` 为请求的 `Content-Type` 头。
    pub async fn ingest<S, O, E>(&self, content_type: Option<&str>, body: S) -> UploadOutcome
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let Some(content_type) = content_type.filter(|value| is_form_data(value)) else {
            warn!(content_type, "rejected upload without multipart content type");
            return UploadOutcome::Rejected(Rejection::InvalidContentType);
        };
        let boundary = match multer::parse_boundary(content_type) {
            Ok(boundary) => boundary,
            Err(err) => {
                error!(error = %err, content_type, "unusable multipart boundary");
                return UploadOutcome::Failure(IngestError::Multipart(err));
            }
        };

        if let Err(err) = self.prepare_dir().await {
            error!(error = %err, "failed to prepare upload directory");
            return UploadOutcome::Failure(err.into());
        }

        let mut published = PublishedFiles::default();
        let result = self
            .stream_parts(Multipart::new(body, boundary), &mut published)
            .await;

        let outcome = match result {
            Ok(Some(file_name)) => {
                published.keep();
                return UploadOutcome::Success {
                    file_name: file_name.into_string(),
                };
            }
            Ok(None) => UploadOutcome::Rejected(Rejection::NoFile),
            Err(Halt::Reject(rejection)) => UploadOutcome::Rejected(rejection),
            Err(Halt::Fail(err)) => UploadOutcome::Failure(err),
        };
        match &outcome {
            UploadOutcome::Rejected(rejection) => {
                warn!(reason = rejection.message(), "upload rejected");
            }
            UploadOutcome::Failure(err) => error!(error = %err, "upload failed"),
            UploadOutcome::Success { .. } => {}
        }
        published.rollback().await;
        outcome
    }

    async fn prepare_dir(&self) -> io::Result<()> {
        self.dir.ensure_exists().await?;
        if self.policy.clear_on_upload {
            let removed = self.dir.clear().await?;
            info!(removed, dir = ?self.dir.root_path(), "cleared upload directory");
        }
        Ok(())
    }

    /// 顺序读取各个 part；返回最后一个成功写入的文件名。
    async fn stream_parts(
        &self,
        mut multipart: Multipart<'static>,
        published: &mut PublishedFiles,
    ) -> Result<Option<SafeFileName>, Halt> {
        let mut last = None;
        while let Some(field) = multipart.next_field().await? {
            let Some(original) = field.file_name().filter(|name| !name.is_empty()) else {
                debug!(field = field.name(), "skipping form field");
                continue;
            };
            let original = original.to_string();
            let mime = field.content_type().map(|mime| mime.essence_str().to_string());
            debug!(
                field = field.name(),
                file_name = original.as_str(),
                mime = mime.as_deref(),
                "file part"
            );

            if !mime
                .as_deref()
                .is_some_and(|mime| ALLOWED_MIME_TYPES.contains(&mime))
            {
                return Err(Halt::Reject(Rejection::DisallowedType));
            }

            let name = self.persist_part(field, &original, published).await?;
            info!(file_name = %name, original = original.as_str(), "upload stored");
            last = Some(name);
        }
        Ok(last)
    }

    async fn persist_part(
        &self,
        mut field: Field<'static>,
        original: &str,
        published: &mut PublishedFiles,
    ) -> Result<SafeFileName, Halt> {
        let mut staged = self.dir.stage().await?;
        debug!(staging = ?staged.temp_path(), "streaming file part");
        let limit = self.policy.max_file_size;
        let write_result: Result<u64, Halt> = async {
            let mut written: u64 = 0;
            while let Some(chunk) = field.chunk().await? {
                if chunk.is_empty() {
                    continue;
                }
                written += chunk.len() as u64;
                if limit > 0 && written > limit {
                    return Err(Halt::Reject(Rejection::TooLarge));
                }
                staged.write_all(&chunk).await?;
            }
            Ok(written)
        }
        .await;
        let written = match write_result {
            Ok(value) => value,
            Err(halt) => {
                staged.discard().await;
                return Err(halt);
            }
        };

        let mut last_err = None;
        for _ in 0..MAX_PUBLISH_ATTEMPTS {
            let name = SafeFileName::new(self.clock.next(), original);
            let target = match self.dir.resolve(name.as_str()) {
                Ok(path) => path,
                Err(err) => {
                    staged.discard().await;
                    return Err(err.into());
                }
            };
            match staged.publish(&target).await {
                Ok(()) => {
                    debug!(file_name = %name, bytes = written, "staged file published");
                    published.paths.push(target);
                    staged.discard().await;
                    return Ok(name);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(file_name = %name, "name taken, drawing a new stamp");
                    last_err = Some(err);
                }
                Err(err) => {
                    staged.discard().await;
                    return Err(err.into());
                }
            }
        }
        staged.discard().await;
        Err(last_err
            .unwrap_or_else(|| io::Error::from(ErrorKind::AlreadyExists))
            .into())
    }
}

/// `Content-Type` 是否以 `multipart/form-data` 开头（忽略大小写）。
fn is_form_data(content_type: &str) -> bool {
    const PREFIX: &str = "multipart/form-data";
    content_type
        .trim_start()
        .get(..PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(PREFIX))
}

/// 本次请求已发布的文件。未 `keep` 就被丢弃（请求被取消）时同步删除。
#[derive(Debug, Default)]
struct PublishedFiles {
    paths: Vec<PathBuf>,
}

impl PublishedFiles {
    fn keep(mut self) {
        self.paths.clear();
    }

    async fn rollback(mut self) {
        while let Some(path) = self.paths.pop() {
            match fs::remove_file(&path).await {
                Ok(()) => debug!(path = ?path, "rolled back stored file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(path = ?path, error = %err, "failed to roll back stored file"),
            }
        }
    }
}

impl Drop for PublishedFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}
