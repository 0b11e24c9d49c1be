use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_aux::prelude::*;

use crate::{config::Cookies, util};

pub const API_BASE_URL: &str = "https://api.chzzk.naver.com";

const OPEN_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Every API response is wrapped in `{"code": .., "content": ..}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    pub content: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContent {
    pub channel_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub channel_name: String,
    #[serde(default)]
    pub open_live: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDetailContent {
    #[serde(default)]
    pub live_id: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub live_title: String,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub status: LiveStatus,
    #[serde(default)]
    pub open_date: Option<String>,
    #[serde(default)]
    pub channel: Option<LiveChannel>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChannel {
    pub channel_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub channel_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveStatus {
    Open,
    Close,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub channel_id: String,
    pub channel_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelLookup {
    Found(Channel),
    NotFound,
    /// Any status other than 200 or 404
    Unavailable(u16),
}

/// The parts of a live-detail response the recorder uses.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveInfo {
    pub status: LiveStatus,
    pub live_title: String,
    pub channel_name: String,
    pub live_id: Option<i64>,
    pub open_date: Option<NaiveDateTime>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    ClientError(#[from] util::ClientError),
}

fn or_unknown(s: String) -> String {
    if s.is_empty() {
        "Unknown".into()
    } else {
        s
    }
}

impl LiveInfo {
    pub fn from_content(channel_id: &str, content: LiveDetailContent) -> Self {
        let open_date = content.open_date.as_deref().and_then(|s| {
            NaiveDateTime::parse_from_str(s, OPEN_DATE_FORMAT)
                .map_err(|e| debug!("[{}] could not parse openDate {:?}: {}", channel_id, s, e))
                .ok()
        });

        Self {
            status: content.status,
            live_title: or_unknown(content.live_title),
            channel_name: or_unknown(content.channel.map(|c| c.channel_name).unwrap_or_default()),
            live_id: content.live_id,
            open_date,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == LiveStatus::Open
    }
}

/// Where the recorder gets channel and live status from.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn channel(&self, channel_id: &str) -> Result<ChannelLookup, ApiError>;

    /// `Ok(None)` when the channel has no live info or the API refused.
    async fn live_detail(&self, channel_id: &str) -> Result<Option<LiveInfo>, ApiError>;
}

pub struct ChzzkClient {
    http: util::HttpClient,
}

impl ChzzkClient {
    pub fn new(cookies: &Cookies) -> Result<Self, util::ClientError> {
        Self::with_base_url(API_BASE_URL, cookies)
    }

    pub fn with_base_url(base_url: &str, cookies: &Cookies) -> Result<Self, util::ClientError> {
        Ok(Self {
            http: util::HttpClient::new(base_url, cookies)?,
        })
    }
}

#[async_trait]
impl ChannelSource for ChzzkClient {
    async fn channel(&self, channel_id: &str) -> Result<ChannelLookup, ApiError> {
        let path = format!("/service/v1/channels/{}", channel_id);
        let (status, body) = self
            .http
            .fetch_json::<ApiResponse<ChannelContent>>(&path)
            .await?;

        Ok(match status {
            StatusCode::OK => match body.and_then(|b| b.content) {
                Some(ChannelContent {
                    channel_id: Some(id),
                    channel_name,
                    ..
                }) => Channel {
                    channel_name: if channel_name.is_empty() {
                        id.clone()
                    } else {
                        channel_name
                    },
                    channel_id: id,
                }
                .into(),
                _ => ChannelLookup::NotFound,
            },
            StatusCode::NOT_FOUND => ChannelLookup::NotFound,
            other => ChannelLookup::Unavailable(other.as_u16()),
        })
    }

    async fn live_detail(&self, channel_id: &str) -> Result<Option<LiveInfo>, ApiError> {
        let path = format!("/service/v3/channels/{}/live-detail", channel_id);
        let (status, body) = self
            .http
            .fetch_json::<ApiResponse<LiveDetailContent>>(&path)
            .await?;

        if status != StatusCode::OK {
            debug!("[{}] live-detail returned HTTP {}", channel_id, status);
        }

        Ok(body
            .and_then(|b| b.content)
            .map(|c| LiveInfo::from_content(channel_id, c)))
    }
}

impl From<Channel> for ChannelLookup {
    fn from(channel: Channel) -> Self {
        ChannelLookup::Found(channel)
    }
}
