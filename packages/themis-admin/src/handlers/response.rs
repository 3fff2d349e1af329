//! Response envelope shared by every handler.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ApiErrorBody,
}

pub fn success_body<T: Serialize>(data: T) -> ApiResponse<T> {
    ApiResponse { success: true, data }
}

pub fn error_body(code: u16, message: String) -> ErrorResponse {
    ErrorResponse { success: false, error: ApiErrorBody { code, message } }
}
