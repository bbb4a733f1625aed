//! multipart 图片上传处理器。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, header};
use axum::response::Json as JsonResponse;
use http_body_util::BodyExt;
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::ingest::{Ingestor, UploadOutcome};

const SUCCESS_MESSAGE: &str = "File uploaded successfully";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadResponse {
    message: &'static str,
    file_name: String,
}

/// 接收 multipart 请求体，流式写入上传目录。
pub async fn upload_file(
    Extension(ingestor): Extension<Arc<Ingestor>>,
    headers: HeaderMap,
    body: AxumBody,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let data_stream = BodyExt::into_data_stream(body);

    match ingestor.ingest(content_type, data_stream).await {
        UploadOutcome::Success { file_name } => Ok(JsonResponse(UploadResponse {
            message: SUCCESS_MESSAGE,
            file_name,
        })),
        UploadOutcome::Rejected(rejection) => Err(rejection.into()),
        UploadOutcome::Failure(err) => Err(err.into()),
    }
}
