//! HTTP adapters for the order service, escrow ledger and alert webhook

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use shared::custody::OrderInfo;
use std::time::Duration;

use super::alert::{Alert, AlertSink};
use super::{ExternalError, LedgerService, OrderService};

fn build_client(timeout: Duration) -> Result<reqwest::Client, ExternalError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn parse_base(base_url: &str) -> Result<Url, ExternalError> {
    let url = Url::parse(base_url).map_err(|e| ExternalError::InvalidUrl(format!("{base_url}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ExternalError::InvalidUrl(base_url.to_string()));
    }
    Ok(url)
}

/// 追加路径段；每段单独编码，id 里的 `/`、`?` 不会改变路径
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ExternalError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ExternalError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn unexpected(resp: reqwest::Response) -> ExternalError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ExternalError::UnexpectedStatus { status, body }
}

/// `GET {base}/orders/{order_id}`
#[derive(Debug, Clone)]
pub struct HttpOrderService {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpOrderService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base(base_url)?,
        })
    }
}

#[async_trait]
impl OrderService for HttpOrderService {
    async fn get_order(&self, order_id: &str) -> Result<Option<OrderInfo>, ExternalError> {
        let url = endpoint(&self.base_url, &["orders", order_id])?;
        let resp = self.client.get(url).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.json().await?)),
            StatusCode::SERVICE_UNAVAILABLE => {
                Err(ExternalError::Unavailable(resp.text().await.unwrap_or_default()))
            }
            _ => Err(unexpected(resp).await),
        }
    }
}

/// `POST {base}/escrows/{escrow_id}/release` and `/refund`
#[derive(Debug, Clone)]
pub struct HttpLedgerService {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpLedgerService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base(base_url)?,
        })
    }

    async fn check(resp: reqwest::Response) -> Result<(), ExternalError> {
        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(ExternalError::Rejected(resp.text().await.unwrap_or_default()))
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                Err(ExternalError::Unavailable(resp.text().await.unwrap_or_default()))
            }
            _ => Err(unexpected(resp).await),
        }
    }
}

#[async_trait]
impl LedgerService for HttpLedgerService {
    async fn release_escrow(
        &self,
        escrow_id: &str,
        to_seller_id: &str,
    ) -> Result<(), ExternalError> {
        #[derive(serde::Serialize)]
        struct ReleaseRequest<'a> {
            to_seller_id: &'a str,
        }

        let url = endpoint(&self.base_url, &["escrows", escrow_id, "release"])?;
        let resp = self
            .client
            .post(url)
            .json(&ReleaseRequest { to_seller_id })
            .send()
            .await?;
        Self::check(resp).await
    }

    async fn refund_escrow(&self, escrow_id: &str) -> Result<(), ExternalError> {
        let url = endpoint(&self.base_url, &["escrows", escrow_id, "refund"])?;
        let resp = self.client.post(url).send().await?;
        Self::check(resp).await
    }
}

/// Posts each alert as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn emit(&self, alert: Alert) {
        let result = self.client.post(&self.url).json(&alert).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!(
                    status = resp.status().as_u16(),
                    kind = ?alert.kind,
                    "Alert webhook rejected delivery"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, kind = ?alert.kind, "Alert webhook unreachable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_segments() {
        let base = parse_base("http://orders.internal/api/").unwrap();
        let url = endpoint(&base, &["orders", "O1"]).unwrap();
        assert_eq!(url.as_str(), "http://orders.internal/api/orders/O1");

        let base = parse_base("http://ledger.internal").unwrap();
        let url = endpoint(&base, &["escrows", "E1", "release"]).unwrap();
        assert_eq!(url.as_str(), "http://ledger.internal/escrows/E1/release");
    }

    #[test]
    fn test_endpoint_encodes_ids() {
        let base = parse_base("http://ledger.internal/v1").unwrap();
        let url = endpoint(&base, &["escrows", "E1/../admin?x=1#f", "refund"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://ledger.internal/v1/escrows/E1%2F..%2Fadmin%3Fx=1%23f/refund"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.path_segments().unwrap().count(), 4);
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(parse_base("not a url"), Err(ExternalError::InvalidUrl(_))));
        assert!(matches!(
            HttpOrderService::new("mailto:ops@example.com", Duration::from_secs(1)),
            Err(ExternalError::InvalidUrl(_))
        ));
    }
}
