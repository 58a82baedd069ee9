//! # API 响应结构
//!
//! JSON 接口统一的成功/失败响应格式，以及授权流程结果到 HTTP 响应的转换。

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::FlowResponse;
use crate::auth::pages::success_page;

/// # 标准成功响应
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// # 标准错误信息
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// # 标准错误响应
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorInfo,
    pub timestamp: DateTime<Utc>,
}

/// # API响应枚举
#[derive(Debug)]
pub enum ApiResponse<T: Serialize> {
    Success(T),
    Created(T, String),
    SuccessWithoutData(String),
    Error(StatusCode, String, String),
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            Self::Success(data) => (
                StatusCode::OK,
                Json(SuccessResponse {
                    success: true,
                    data: Some(data),
                    message: None,
                    timestamp: Utc::now(),
                }),
            )
                .into_response(),
            Self::Created(data, message) => (
                StatusCode::CREATED,
                Json(SuccessResponse {
                    success: true,
                    data: Some(data),
                    message: Some(message),
                    timestamp: Utc::now(),
                }),
            )
                .into_response(),
            Self::SuccessWithoutData(message) => (
                StatusCode::OK,
                Json(SuccessResponse::<()> {
                    success: true,
                    data: None,
                    message: Some(message),
                    timestamp: Utc::now(),
                }),
            )
                .into_response(),
            Self::Error(status, code, message) => (
                status,
                Json(ErrorResponse {
                    success: false,
                    error: ErrorInfo { code, message },
                    timestamp: Utc::now(),
                }),
            )
                .into_response(),
        }
    }
}

/// # 便捷函数：成功响应
pub fn success<T: Serialize>(data: T) -> Response {
    ApiResponse::Success(data).into_response()
}

/// # 便捷函数：创建成功
pub fn created<T: Serialize>(data: T, message: &str) -> Response {
    ApiResponse::Created(data, message.to_string()).into_response()
}

/// # 便捷函数：无数据体的成功响应
pub fn success_without_data(message: &str) -> Response {
    ApiResponse::<()>::SuccessWithoutData(message.to_string()).into_response()
}

/// # 便捷函数：HTTP错误响应
pub fn error(status: StatusCode, code: &str, message: &str) -> Response {
    ApiResponse::<()>::Error(status, code.to_string(), message.to_string()).into_response()
}

/// 追加 `Set-Cookie`，非法值直接忽略
pub fn with_cookie(mut response: Response, cookie: Option<&str>) -> Response {
    if let Some(value) = cookie.and_then(|c| HeaderValue::from_str(c).ok()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

impl IntoResponse for FlowResponse {
    fn into_response(self) -> Response {
        let cookie = self.set_cookie().map(ToString::to_string);
        let response = match self {
            Self::Redirect { location, .. } => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
            Self::SuccessPage { redirect_url, .. } => {
                Html(success_page(&redirect_url)).into_response()
            }
        };
        with_cookie(response, cookie.as_deref())
    }
}
