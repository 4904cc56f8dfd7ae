use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub image_uri: String,
}
