//! Etherscan v2 REST fetcher.
//!
//! Asks the multichain explorer API for the single most recent normal
//! transaction of an address and normalizes it into a
//! [`TransactionFingerprint`].

use crate::{FeedError, LedgerSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use watchlist_core::{Address, Chain, TransactionFingerprint, Wei};

/// Connection settings for the explorer API.
#[derive(Clone)]
pub struct EtherscanConfig {
    pub base_url: Url,
    pub api_key: String,
    pub chain: Chain,
    pub timeout: Duration,
}

impl EtherscanConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.etherscan.io/v2/api";

    pub fn new(api_key: impl Into<String>, chain: Chain) -> Result<Self, FeedError> {
        Ok(Self {
            base_url: Url::parse(Self::DEFAULT_BASE_URL)?,
            api_key: api_key.into(),
            chain,
            timeout: Duration::from_secs(10),
        })
    }
}

impl std::fmt::Debug for EtherscanConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtherscanConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("chain", &self.chain)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Envelope shared by all explorer API responses.
#[derive(Debug, Deserialize)]
struct TxListResponse {
    status: String,
    #[serde(default)]
    message: String,
    /// Array of transactions on success, an error string otherwise.
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    time_stamp: String,
    block_number: String,
}

impl TryFrom<RawTransaction> for TransactionFingerprint {
    type Error = FeedError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let hash = raw.hash.trim().to_ascii_lowercase();
        if !hash.starts_with("0x") || hash.len() < 3 {
            return Err(FeedError::ParseError(format!("bad tx hash: {}", raw.hash)));
        }

        let to = if raw.to.trim().is_empty() {
            None
        } else {
            Some(Address::parse(&raw.to)?)
        };

        let secs: i64 = raw
            .time_stamp
            .trim()
            .parse()
            .map_err(|_| FeedError::ParseError(format!("bad timeStamp: {}", raw.time_stamp)))?;
        let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| FeedError::ParseError(format!("timeStamp out of range: {}", secs)))?;

        let block_number = raw.block_number.trim().parse().map_err(|_| {
            FeedError::ParseError(format!("bad blockNumber: {}", raw.block_number))
        })?;

        Ok(TransactionFingerprint {
            hash,
            from: Address::parse(&raw.from)?,
            to,
            value: Wei::from_base_units(&raw.value)?,
            timestamp,
            block_number,
        })
    }
}

/// Parse a `txlist` response body.
///
/// Any non-success status other than a rate limit means no data: the
/// explorer answers "No transactions found" for an address without history,
/// and other rejections (bad key, bad address) are logged and skipped.
pub fn parse_txlist_response(body: &str) -> Result<Option<TransactionFingerprint>, FeedError> {
    let response: TxListResponse = serde_json::from_str(body)?;

    if response.status != "1" {
        if response.message.eq_ignore_ascii_case("No transactions found") {
            return Ok(None);
        }
        let detail = response
            .result
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| response.message.clone());
        if detail.to_ascii_lowercase().contains("rate limit") {
            return Err(FeedError::RateLimitExceeded);
        }
        warn!(message = %response.message, detail = %detail, "Explorer returned no data");
        return Ok(None);
    }

    let mut txs: Vec<RawTransaction> = serde_json::from_value(response.result)?;
    if txs.is_empty() {
        return Ok(None);
    }
    // Requested sort=desc, so the first row is the latest.
    let latest = txs.swap_remove(0);
    TransactionFingerprint::try_from(latest).map(Some)
}

/// Explorer client; one per process, reused across cycles.
pub struct EtherscanFetcher {
    client: reqwest::Client,
    config: EtherscanConfig,
}

impl EtherscanFetcher {
    pub fn new(config: EtherscanConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn query_params<'a>(&'a self, address: &'a Address, chain_id: &'a str) -> [(&'static str, &'a str); 10] {
        [
            ("chainid", chain_id),
            ("module", "account"),
            ("action", "txlist"),
            ("address", address.as_str()),
            ("startblock", "0"),
            ("endblock", "99999999"),
            ("page", "1"),
            ("offset", "1"),
            ("sort", "desc"),
            ("apikey", self.config.api_key.as_str()),
        ]
    }
}

#[async_trait]
impl LedgerSource for EtherscanFetcher {
    async fn fetch_latest(
        &self,
        address: &Address,
    ) -> Result<Option<TransactionFingerprint>, FeedError> {
        let chain_id = self.config.chain.id().to_string();

        let response = self
            .client
            .get(self.config.base_url.clone())
            .query(&self.query_params(address, &chain_id))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FeedError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(FeedError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await?;
        let latest = parse_txlist_response(&body)?;
        debug!(
            address = %address,
            tx = latest.as_ref().map(|t| t.hash.as_str()).unwrap_or("-"),
            "Fetched latest transaction"
        );
        Ok(latest)
    }

    fn name(&self) -> &'static str {
        "etherscan"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OK_BODY: &str = r#"{
        "status": "1",
        "message": "OK",
        "result": [{
            "blockNumber": "19000000",
            "timeStamp": "1705000000",
            "hash": "0xABCDEF0123",
            "from": "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "to": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            "value": "2500000000000000000",
            "isError": "0"
        }]
    }"#;

    #[test]
    fn test_parse_success() {
        let tx = parse_txlist_response(OK_BODY).unwrap().unwrap();
        assert_eq!(tx.hash, "0xabcdef0123");
        assert_eq!(tx.from.as_str(), "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(
            tx.to.as_ref().map(Address::as_str),
            Some("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
        );
        assert_eq!(tx.value.to_display(), "2.5");
        assert_eq!(tx.timestamp.timestamp(), 1_705_000_000);
        assert_eq!(tx.block_number, 19_000_000);
    }

    #[test]
    fn test_parse_no_transactions() {
        let body = r#"{"status":"0","message":"No transactions found","result":[]}"#;
        assert_eq!(parse_txlist_response(body).unwrap(), None);

        let body = r#"{"status":"1","message":"OK","result":[]}"#;
        assert_eq!(parse_txlist_response(body).unwrap(), None);
    }

    #[test]
    fn test_parse_rate_limited() {
        let body = r#"{"status":"0","message":"NOTOK","result":"Max calls per sec rate limit reached (5/sec)"}"#;
        assert!(matches!(
            parse_txlist_response(body),
            Err(FeedError::RateLimitExceeded)
        ));
    }

    #[test]
    fn test_parse_rejected_request_is_no_data() {
        let body = r#"{"status":"0","message":"NOTOK","result":"Invalid API Key"}"#;
        assert_eq!(parse_txlist_response(body).unwrap(), None);

        let body = r#"{"status":"0","message":"NOTOK","result":"Error! Invalid address format"}"#;
        assert_eq!(parse_txlist_response(body).unwrap(), None);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_txlist_response("<html>bad gateway</html>"),
            Err(FeedError::ParseError(_))
        ));

        let bad_value = OK_BODY.replace("2500000000000000000", "2.5");
        assert!(matches!(
            parse_txlist_response(&bad_value),
            Err(FeedError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_contract_creation() {
        let body = OK_BODY.replace(
            r#""to": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb""#,
            r#""to": """#,
        );
        let tx = parse_txlist_response(&body).unwrap().unwrap();
        assert_eq!(tx.to, None);
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = EtherscanConfig::new("SECRETKEY", Chain::Ethereum).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("SECRETKEY"));
        assert!(rendered.contains("redacted"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient_error() {
        let mut config = EtherscanConfig::new("key", Chain::Ethereum).unwrap();
        config.base_url = Url::parse("http://127.0.0.1:9/api").unwrap();
        config.timeout = Duration::from_millis(500);
        let fetcher = EtherscanFetcher::new(config).unwrap();

        let address = Address::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let err = fetcher.fetch_latest(&address).await.unwrap_err();
        assert!(err.is_transient());
    }
}
