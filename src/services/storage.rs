use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};
use std::time::Duration;
use time::OffsetDateTime;

use crate::core::config::Settings;
use crate::db::types::SectionKind;

#[derive(Debug, Clone)]
pub(crate) struct StorageService {
    client: Client,
    bucket: String,
    endpoint: String,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredImage {
    pub(crate) url: String,
    pub(crate) size: i64,
    pub(crate) sha256_hex: String,
}

impl StorageService {
    pub(crate) async fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        if settings.s3().access_key.is_empty() || settings.s3().secret_key.is_empty() {
            return Ok(None);
        }

        let creds = Credentials::new(
            settings.s3().access_key.clone(),
            settings.s3().secret_key.clone(),
            None,
            None,
            "attestia-proofs",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(settings.s3().endpoint.clone())
            .region(aws_config::Region::new(settings.s3().region.clone()))
            .credentials_provider(creds)
            .load()
            .await;

        let client = Client::new(&config);

        Ok(Some(Self {
            client,
            bucket: settings.s3().bucket.clone(),
            endpoint: settings.s3().endpoint.clone(),
        }))
    }

    /// Stable public URL of an uploaded object; audit tooling resolves it
    /// through the bucket's read policy.
    pub(crate) fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{key}", self.endpoint.trim_end_matches('/'), self.bucket)
    }

    pub(crate) async fn upload_image(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<StoredImage> {
        let size = bytes.len() as i64;
        let hash = Sha256::digest(&bytes);
        let sha256_hex = hex::encode(hash);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await?;

        Ok(StoredImage { url: self.object_url(key), size, sha256_hex })
    }

    /// Short-lived signed GET, handed back to the client for immediate
    /// display of a freshly stored proof photo.
    pub(crate) async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> anyhow::Result<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(expires_in)?)
            .await?;

        Ok(presigned.uri().to_string())
    }
}

pub(crate) fn capture_key(
    user_id: &str,
    course_id: &str,
    section: SectionKind,
    video_index: i32,
    now: OffsetDateTime,
) -> String {
    format!(
        "captures/{course_id}/{user_id}/{}-{video_index:02}-{}.jpg",
        section.as_str(),
        now.unix_timestamp()
    )
}

pub(crate) fn start_image_key(user_id: &str, course_id: &str, now: OffsetDateTime) -> String {
    format!("captures/{course_id}/{user_id}/start-{}.jpg", now.unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use time::macros::datetime;

    #[test]
    fn capture_key_encodes_trigger_coordinates() {
        let now = datetime!(2026-03-01 10:00:00 UTC);
        let key = capture_key("user-1", "course-9", SectionKind::Practice, 3, now);
        assert_eq!(key, format!("captures/course-9/user-1/practice-03-{}.jpg", now.unix_timestamp()));
    }

    #[tokio::test]
    async fn presign_get_returns_signed_url() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        test_support::set_test_storage_env();

        let settings = Settings::load().expect("settings");
        let storage = StorageService::from_settings(&settings)
            .await
            .expect("storage")
            .expect("storage enabled");

        let url = storage
            .presign_get("captures/test/file.jpg", Duration::from_secs(300))
            .await
            .expect("presign get");

        assert!(url.contains("file.jpg"));
        assert_eq!(storage.object_url("a/b.jpg"), "http://localhost:9000/attestia-test-bucket/a/b.jpg");
    }
}
