use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use reqwest::{StatusCode, Url};
use reqwest_cookie_store::CookieStoreMutex;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

use crate::config::Cookies;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct HttpClient {
    pub client: ClientWithMiddleware,
    pub cookies: Arc<CookieStoreMutex>,
    pub base_url: Url,
}

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("reqwest middleware error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("invalid url {0}: {1}")]
    UrlError(String, String),
    #[error("could not store cookie {0}: {1}")]
    CookieError(&'static str, String),
}

impl HttpClient {
    pub fn new(base_url: &str, cookies: &Cookies) -> Result<HttpClient, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::UrlError(base_url.into(), e.to_string()))?;
        let store = Arc::new(CookieStoreMutex::default());

        {
            let mut store = store
                .lock()
                .map_err(|e| ClientError::CookieError("store", e.to_string()))?;
            for (name, value) in cookies.pairs() {
                store
                    .parse(&format!("{}={}; Path=/", name, value), &base_url)
                    .map_err(|e| ClientError::CookieError(name, e.to_string()))?;
            }
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(store.clone())
            .build()?;

        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClient {
            client,
            cookies: store,
            base_url,
        })
    }

    /// GET `path` relative to the base url. The body is only decoded on 200.
    pub async fn fetch_json<T>(&self, path: &str) -> Result<(StatusCode, Option<T>), ClientError>
    where
        T: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ClientError::UrlError(path.into(), e.to_string()))?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status();

        if status != StatusCode::OK {
            return Ok((status, None));
        }

        Ok((status, Some(resp.json::<T>().await?)))
    }
}

/// Replaces characters that are not allowed in file names.
pub fn sanitize_filename(name: &str) -> String {
    const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    name.chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }

    Path::new(path).to_path_buf()
}

/// `path` itself if it is free, otherwise the first free `name (n).ext`.
pub fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    let free = (1..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            path.with_file_name(name)
        })
        .find(|p| !p.exists());

    free.unwrap_or(path)
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    for next in ["KiB", "MiB", "GiB", "TiB"] {
        if bytes <= 1024.0 {
            break;
        }
        bytes /= 1024.0;
        suffix = next;
    }

    format!("{:.2} {}", bytes, suffix)
}
