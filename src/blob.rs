use std::path::PathBuf;

use crate::error::{DashboardError, Result};

/// Where bucket/key payloads are read from.
#[derive(Debug, Clone)]
pub enum BlobStore {
    /// `<root>/<bucket>/<key>` on the local filesystem.
    Local { root: PathBuf },
    /// `<endpoint>/<bucket>/<key>` over plain GET.
    Http {
        endpoint: String,
        client: reqwest::Client,
    },
}

impl BlobStore {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::Local { root: root.into() }
    }

    pub fn http(endpoint: impl Into<String>) -> Self {
        Self::Http {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn source_key(bucket: &str, key: &str) -> String {
        format!("blob:{bucket}/{key}")
    }

    /// Fetches a UTF-8 payload.
    pub async fn fetch_text(&self, bucket: &str, key: &str) -> Result<String> {
        let source_key = Self::source_key(bucket, key);
        tracing::info!(%source_key, "fetching blob");

        match self {
            Self::Local { root } => {
                let path = root.join(bucket).join(key);
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|err| DashboardError::fetch(&source_key, format!("{}: {err}", path.display())))?;
                String::from_utf8(bytes).map_err(|err| DashboardError::fetch(&source_key, err))
            }
            Self::Http { endpoint, client } => {
                let url = format!("{endpoint}/{bucket}/{key}");
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|err| DashboardError::fetch(&source_key, err))?;
                response
                    .text()
                    .await
                    .map_err(|err| DashboardError::fetch(&source_key, err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_bucket_key_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rev-mgt").join("ecri");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("master_ecris.csv"), "model\nA\n").unwrap();

        let store = BlobStore::local(dir.path());
        let text = store.fetch_text("rev-mgt", "ecri/master_ecris.csv").await.unwrap();
        assert_eq!(text, "model\nA\n");
    }

    #[tokio::test]
    async fn missing_object_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::local(dir.path());
        let err = store.fetch_text("rev-mgt", "nope.csv").await.unwrap_err();
        match err {
            DashboardError::DataFetch { source_key, .. } => {
                assert_eq!(source_key, "blob:rev-mgt/nope.csv");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn http_endpoint_drops_trailing_slash() {
        match BlobStore::http("https://blobs.internal/") {
            BlobStore::Http { endpoint, .. } => assert_eq!(endpoint, "https://blobs.internal"),
            BlobStore::Local { .. } => unreachable!(),
        }
    }
}
