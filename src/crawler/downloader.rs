use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use http::StatusCode;
use rand::Rng;
use reqwest::Client;
use thiserror::Error;
use tower::limit::ConcurrencyLimit;
use tower::{Service, ServiceExt};
use tracing::{info, instrument, warn};

use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} 返回状态码 {status}")]
    Status { url: String, status: StatusCode },
    #[error("{url} 尝试 {attempts} 次后仍然失败")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// 请求之间的随机停顿
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    min_ms: u64,
    max_ms: u64,
}

impl Pacing {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: min_ms.max(max_ms),
        }
    }

    pub fn delay(&self) -> Duration {
        if self.max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

/// 单次 GET，响应后在持有许可的情况下停顿
#[derive(Clone)]
pub struct PagedFetch {
    client: Client,
    pacing: Pacing,
}

impl Service<String> for PagedFetch {
    type Response = Bytes;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, url: String) -> Self::Future {
        let client = self.client.clone();
        let delay = self.pacing.delay();

        Box::pin(async move {
            let response = client.get(&url).send().await?;
            let status = response.status();
            if status != StatusCode::OK {
                return Err(FetchError::Status { url, status }.into());
            }
            let body = response.bytes().await?;
            tokio::time::sleep(delay).await;
            Ok(body)
        })
    }
}

/// 所有克隆共享同一个并发许可池
#[derive(Clone)]
pub struct Downloader {
    service: ConcurrencyLimit<PagedFetch>,
    max_attempts: u32,
}

impl Downloader {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let user_agent = match &config.user_agent {
            Some(ua) => ua.clone(),
            None => ua_generator::ua::spoof_ua().to_owned(),
        };

        let client = Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let fetch = PagedFetch {
            client,
            pacing: Pacing::new(config.pace_min_ms, config.pace_max_ms),
        };

        Ok(Self {
            service: ConcurrencyLimit::new(fetch, config.concurrency_limit.max(1)),
            max_attempts: config.max_attempts.max(1),
        })
    }

    /// 每次尝试都重新排队获取许可
    #[instrument(skip(self))]
    pub async fn page(&self, url: &str) -> Result<Bytes> {
        let mut service = self.service.clone();
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let result = match ServiceExt::<String>::ready(&mut service).await {
                Ok(ready) => ready.call(url.to_owned()).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!("第 {}/{} 次请求失败: {}", attempt, self.max_attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_owned(),
            attempts: self.max_attempts,
            source: last_error.unwrap_or_else(|| anyhow::anyhow!("未发出请求")),
        }
        .into())
    }

    pub async fn text(&self, url: &str) -> Result<String> {
        let bytes = self.page(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// 返回图片数据和扩展名
    #[instrument(skip(self))]
    pub async fn image(&self, url: &str) -> Result<(Bytes, String)> {
        info!("正在下载图片");
        let bytes = self.page(url).await?;
        let extension = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 4)
            .unwrap_or_else(|| "jpg".to_owned());
        Ok((bytes, extension))
    }
}
