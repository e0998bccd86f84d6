//! GitHub Releases backend.

use super::{ReleaseStore, UploadReceipt};
use crate::release::error::StoreError;
use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

/// Upload and download of large archives can be slow on CI runners
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
struct Release {
    id: u64,
    tag_name: String,
    upload_url: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    id: u64,
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct UploadedAsset {
    browser_download_url: Option<String>,
}

/// Release store backed by the GitHub REST API
#[derive(Debug, Clone)]
pub struct GitHubStore {
    client: Client,
    api_base: Url,
    repository: String,
}

impl GitHubStore {
    /// Creates a store for `owner/repo`; a token is needed for uploads
    pub fn new(repository: &str, token: Option<&str>) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(API_VERSION),
        );
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|_| StoreError::Config("token contains invalid characters".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(concat!("nightly-publish/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let api_base =
            Url::parse(API_BASE).map_err(|e| StoreError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_base,
            repository: repository.to_string(),
        })
    }

    /// Points the store at another API host (GitHub Enterprise)
    pub fn with_api_base(mut self, api_base: &str) -> Result<Self, StoreError> {
        self.api_base = Url::parse(api_base).map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(self)
    }

    fn api_url(&self, path: &str) -> Result<Url, StoreError> {
        let base = self.api_base.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/repos/{}/{}", base, self.repository, path))
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Fetches a release; `None` on 404
    async fn release(&self, path: &str) -> Result<Option<Release>, StoreError> {
        let response = self.client.get(self.api_url(path)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let release = check(response).await?.json::<Release>().await?;
        Ok(Some(release))
    }

    /// Downloads asset `name` of `release`; `None` when it has no such asset
    async fn download(&self, release: &Release, name: &str) -> Result<Option<Bytes>, StoreError> {
        let Some(asset) = release.assets.iter().find(|a| a.name == name) else {
            log::debug!("Release {} has no asset {}", release.tag_name, name);
            return Ok(None);
        };

        let response = self
            .client
            .get(&asset.url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await?;
        let bytes = check(response).await?.bytes().await?;
        log::debug!(
            "Downloaded {} from release {} ({} bytes)",
            name,
            release.tag_name,
            bytes.len()
        );
        Ok(Some(bytes))
    }

    async fn delete_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let url = self.api_url(&format!("releases/assets/{}", asset.id))?;
        let response = self.client.delete(url).send().await?;
        // Already gone counts as deleted
        if response.status() != StatusCode::NOT_FOUND {
            check(response).await?;
        }
        Ok(())
    }

    fn upload_url(release: &Release, name: &str) -> Result<Url, StoreError> {
        // upload_url is a URI template: ".../assets{?name,label}"
        let template = release
            .upload_url
            .split('{')
            .next()
            .unwrap_or(&release.upload_url);
        let mut url = Url::parse(template).map_err(|e| StoreError::Api {
            status: 0,
            message: format!("invalid upload_url '{}': {}", release.upload_url, e),
        })?;
        url.query_pairs_mut().append_pair("name", name);
        Ok(url)
    }
}

/// Maps non-success responses to store errors
async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => StoreError::Auth(message),
        StatusCode::FORBIDDEN if message.contains("rate limit") => StoreError::Quota(message),
        StatusCode::FORBIDDEN => StoreError::Auth(message),
        StatusCode::PAYLOAD_TOO_LARGE | StatusCode::TOO_MANY_REQUESTS => StoreError::Quota(message),
        _ => StoreError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

impl ReleaseStore for GitHubStore {
    async fn fetch_asset(&self, tag: &str, name: &str) -> Result<Option<Bytes>, StoreError> {
        let Some(release) = self.release(&format!("releases/tags/{}", tag)).await? else {
            log::debug!("{} has no release tagged {}", self.repository, tag);
            return Ok(None);
        };
        self.download(&release, name).await
    }

    async fn fetch_latest_asset(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        let Some(release) = self.release("releases/latest").await? else {
            log::debug!("{} has no published release", self.repository);
            return Ok(None);
        };
        self.download(&release, name).await
    }

    async fn upload_asset(
        &self,
        tag: &str,
        name: &str,
        data: Bytes,
    ) -> Result<UploadReceipt, StoreError> {
        let release = self
            .release(&format!("releases/tags/{}", tag))
            .await?
            .ok_or_else(|| StoreError::MissingRelease(tag.to_string()))?;

        let mut replaced = false;
        for asset in release.assets.iter().filter(|a| a.name == name) {
            log::info!("Replacing existing asset {} on release {}", name, tag);
            self.delete_asset(asset).await?;
            replaced = true;
        }

        let url = Self::upload_url(&release, name)?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/zip")
            .body(data)
            .send()
            .await?;
        let uploaded = check(response).await?.json::<UploadedAsset>().await?;
        log::debug!("Uploaded {} to release {} (id {})", name, tag, release.id);

        Ok(UploadReceipt {
            location: uploaded.browser_download_url,
            replaced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_url_drops_template_and_sets_name() {
        let release = Release {
            id: 1,
            tag_name: "v1.2.0".into(),
            upload_url: "https://uploads.github.com/repos/o/r/releases/1/assets{?name,label}"
                .into(),
            assets: Vec::new(),
        };
        let url = GitHubStore::upload_url(&release, "qsv-v1.2.0-x86_64-apple-darwin.zip").unwrap();
        assert_eq!(
            url.as_str(),
            "https://uploads.github.com/repos/o/r/releases/1/assets?name=qsv-v1.2.0-x86_64-apple-darwin.zip"
        );
    }

    #[test]
    fn api_urls_are_scoped_to_repository() {
        let store = GitHubStore::new("jqnatividad/qsv", None).unwrap();
        assert_eq!(
            store.api_url("releases/latest").unwrap().as_str(),
            "https://api.github.com/repos/jqnatividad/qsv/releases/latest"
        );
        let enterprise = store.with_api_base("https://ghe.example.com/api/v3/").unwrap();
        assert_eq!(
            enterprise.api_url("releases/tags/v1").unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/jqnatividad/qsv/releases/tags/v1"
        );
    }
}
