use std::path::Path;

use crate::api::errors::ApiError;

pub(crate) fn validate_image_upload(
    filename: &str,
    content_type: &str,
    allowed_extensions: &[String],
) -> Result<(), ApiError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or_else(|| ApiError::BadRequest("File must have an extension".to_string()))?;

    if !allowed_extensions.iter().any(|allowed| allowed == &extension) {
        return Err(ApiError::BadRequest(format!("File extension '{extension}' is not allowed")));
    }

    let mime = content_type.trim().to_ascii_lowercase();
    if !mime.starts_with("image/") {
        return Err(ApiError::BadRequest(format!("Content type '{mime}' is not an image")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_image_upload;

    fn allowed() -> Vec<String> {
        vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
    }

    #[test]
    fn accepts_known_image_extensions() {
        assert!(validate_image_upload("proof.jpg", "image/jpeg", &allowed()).is_ok());
        assert!(validate_image_upload("proof.PNG", "image/png", &allowed()).is_ok());
    }

    #[test]
    fn rejects_missing_extension_and_non_images() {
        assert!(validate_image_upload("proof", "image/jpeg", &allowed()).is_err());
        assert!(validate_image_upload("proof.exe", "image/jpeg", &allowed()).is_err());
        assert!(validate_image_upload("proof.jpg", "text/html", &allowed()).is_err());
    }
}
