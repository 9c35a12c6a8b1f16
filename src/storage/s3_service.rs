use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use uuid::Uuid;

/// Uploads are tagged with a fixed content type regardless of the source
/// format, matching what the frontend expects to fetch back.
pub const UPLOAD_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, thiserror::Error)]
pub enum S3ServiceError {
    #[error("S3 error: {0}")]
    S3(String),
}

/// Durable, URL-addressable image storage.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Uploads the bytes under a fresh unique key and returns the public
    /// object URL. One attempt; a failed upload is terminal.
    async fn store_image(&self, image_data: &[u8], filename: &str)
    -> Result<String, S3ServiceError>;
}

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
    region: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String, region: String) -> Self {
        Self {
            client,
            bucket_name,
            region,
        }
    }

    pub fn generate_s3_key(filename: &str) -> String {
        format!("{}_{}", Uuid::new_v4(), filename)
    }

    pub fn object_url(&self, s3_key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket_name, self.region, s3_key
        )
    }
}

#[async_trait]
impl ImageStore for S3Service {
    async fn store_image(
        &self,
        image_data: &[u8],
        filename: &str,
    ) -> Result<String, S3ServiceError> {
        let s3_key = Self::generate_s3_key(filename);
        let body = ByteStream::from(image_data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&s3_key)
            .body(body)
            .content_type(UPLOAD_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| S3ServiceError::S3(e.to_string()))?;

        Ok(self.object_url(&s3_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefixes_filename_with_uuid() {
        let key = S3Service::generate_s3_key("tacos.jpg");
        let (prefix, rest) = key.split_once('_').unwrap();
        assert!(Uuid::parse_str(prefix).is_ok());
        assert_eq!(rest, "tacos.jpg");
    }

    #[test]
    fn keys_are_unique_per_upload() {
        assert_ne!(
            S3Service::generate_s3_key("a.png"),
            S3Service::generate_s3_key("a.png")
        );
    }
}
