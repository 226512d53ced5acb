use crate::reddit::error::{Error, Result};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use url::Url;

/// Every request gives up after this long
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A fetched web page, after redirects
#[derive(Debug, Clone)]
pub struct Page {
    pub status: u16,
    pub content_type: Option<String>,
    pub final_url: Url,
    pub body: Vec<u8>,
}

impl Page {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx page into an `Error::Http`
    pub fn ensure_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Http {
                url: self.final_url.to_string(),
                status: self.status,
            })
        }
    }

    /// The mime type without any parameters, lowercased
    pub fn mime(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// The capability of GETting a url.
///
/// Transport failures come back as `Err(Error::Transport)`. HTTP error
/// statuses come back as a `Page` so the caller decides what they mean.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get_with(&self, url: &str, headers: &[(&str, String)]) -> Result<Page>;

    async fn get(&self, url: &str) -> Result<Page> {
        self.get_with(url, &[]).await
    }
}

/// `Fetch` backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::transport("<client>", e))?;
        Ok(HttpClient { client })
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Fetch for HttpClient {
    async fn get_with(&self, url: &str, headers: &[(&str, String)]) -> Result<Page> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await.map_err(|e| Error::transport(url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(url, e))?
            .to_vec();

        Ok(Page {
            status,
            content_type,
            final_url,
            body,
        })
    }
}
