use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionInput, TransactionRequest};
use alloy::transports::TransportResult;
use alloy_primitives::{Address, Bytes};
use anyhow::Result;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

/// Read-only chain access needed by the audit pipeline.
#[allow(async_fn_in_trait)]
pub trait ChainReader {
    async fn chain_id(&self) -> Result<u64>;

    async fn latest_block(&self) -> Result<u64>;

    /// Logs matching `filter` within the inclusive block range.
    async fn get_logs(&self, filter: &Filter, from_block: u64, to_block: u64) -> Result<Vec<Log>>;

    /// `eth_call` against the latest block, returning the raw return data.
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes>;
}

// Provider messages for "too many logs in one response", across common node vendors.
const RANGE_LIMIT_ERRORS: &[&str] = &[
    "exceeds max results",
    "query returned more than",
    "block range",
    "response size exceeded",
    "too many results",
];

const REVERT_ERRORS: &[&str] = &["execution reverted", "revert", "invalid opcode"];

fn is_range_limit_error(message: &str) -> bool {
    let message = message.to_lowercase();
    RANGE_LIMIT_ERRORS.iter().any(|m| message.contains(m))
}

fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    !is_range_limit_error(&lower) && !REVERT_ERRORS.iter().any(|m| lower.contains(m))
}

#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<RootProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    request_timeout: Duration,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String], request_timeout: Duration, max_retries: usize) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            providers.push(RootProvider::new_http(parsed_url));
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            request_timeout,
            max_retries,
        })
    }

    fn get_provider(&self) -> &RootProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, method: &str, error_str: String) -> anyhow::Error {
        if is_retryable(&error_str) {
            warn!(
                "{} error on {}: {}, rotating provider",
                method,
                self.get_current_url(),
                error_str
            );
            self.rotate_provider();
        } else {
            debug!("{} failed on {}: {}", method, self.get_current_url(), error_str);
        }
        anyhow::anyhow!("{}", error_str)
    }

    fn handle_timeout(&self, method: &str) -> anyhow::Error {
        warn!(
            "{} timed out after {} seconds on {}, rotating provider",
            method,
            self.request_timeout.as_secs(),
            self.get_current_url()
        );
        self.rotate_provider();
        anyhow::anyhow!(
            "Request timeout after {} seconds",
            self.request_timeout.as_secs()
        )
    }

    /// Runs one RPC request with a timeout, retrying transient failures on the
    /// next provider. Reverts and range-limit errors are returned immediately.
    async fn request<T, F, Fut>(&self, method: &str, op: F) -> Result<T>
    where
        F: Fn(RootProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        RetryIf::start(
            self.get_retry_strategy(),
            || {
                let request = op(self.get_provider().clone());
                async move {
                    match timeout(self.request_timeout, request).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(self.handle_error(method, e.to_string())),
                        Err(_) => Err(self.handle_timeout(method)),
                    }
                }
            },
            |e: &anyhow::Error| is_retryable(&e.to_string()),
        )
        .await
    }

    async fn get_logs_internal(
        &self,
        filter: &Filter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let filter = filter.clone().from_block(from_block).to_block(to_block);
        self.request("eth_getLogs", |provider| {
            let filter = filter.clone();
            async move { provider.get_logs(&filter).await }
        })
        .await
    }

    /// Extracts the narrower range some providers suggest in their
    /// "too many results" error messages.
    fn parse_suggested_range(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        if let Some(captures) = re.captures(error_str) {
            let from = captures.get(1)?.as_str().parse().ok()?;
            let to = captures.get(2)?.as_str().parse().ok()?;
            return Some((from, to));
        }

        let re = Regex::new(r"\[(0x[0-9a-fA-F]+),\s*(0x[0-9a-fA-F]+)\]").ok()?;
        let captures = re.captures(error_str)?;
        let from = u64::from_str_radix(captures.get(1)?.as_str().trim_start_matches("0x"), 16).ok()?;
        let to = u64::from_str_radix(captures.get(2)?.as_str().trim_start_matches("0x"), 16).ok()?;
        Some((from, to))
    }

    /// Splits `[from, to]` in two after a range-limit error, preferring the
    /// provider's suggestion and otherwise halving. `None` for a single block.
    fn split_range(from: u64, to: u64, error_str: &str) -> Option<((u64, u64), (u64, u64))> {
        if let Some((suggested_from, suggested_to)) = Self::parse_suggested_range(error_str) {
            if suggested_from == from && suggested_to >= from && suggested_to < to {
                return Some(((from, suggested_to), (suggested_to + 1, to)));
            }
        }

        if from < to {
            let mid = from + (to - from) / 2;
            return Some(((from, mid), (mid + 1, to)));
        }

        None
    }
}

impl ChainReader for RpcClient {
    async fn chain_id(&self) -> Result<u64> {
        self.request("eth_chainId", |provider| async move {
            provider.get_chain_id().await
        })
        .await
    }

    async fn latest_block(&self) -> Result<u64> {
        self.request("eth_blockNumber", |provider| async move {
            provider.get_block_number().await
        })
        .await
    }

    async fn get_logs(&self, filter: &Filter, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let mut all_logs = Vec::new();
        // Ranges still to fetch, popped in ascending block order.
        let mut pending = vec![(from_block, to_block)];

        while let Some((from, to)) = pending.pop() {
            match self.get_logs_internal(filter, from, to).await {
                Ok(logs) => all_logs.extend(logs),
                Err(e) if is_range_limit_error(&e.to_string()) => {
                    let Some((left, right)) = Self::split_range(from, to, &e.to_string()) else {
                        return Err(e);
                    };
                    info!(
                        "Hit result limit for blocks {}-{}, splitting into {}-{} and {}-{}",
                        from, to, left.0, left.1, right.0, right.1
                    );
                    pending.push(right);
                    pending.push(left);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(all_logs)
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(input));
        self.request("eth_call", |provider| {
            let tx = tx.clone();
            async move { provider.call(tx).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert!(is_range_limit_error(
            "query exceeds max results 20000, retry with the range 100-150"
        ));
        assert!(is_range_limit_error("Query returned more than 10000 results"));
        assert!(!is_retryable("execution reverted"));
        assert!(!is_retryable("exceeds max results"));
        assert!(is_retryable("error sending request: connection refused"));
        assert!(is_retryable("HTTP error 429 with body: rate limited"));
    }

    #[test]
    fn parses_decimal_range_suggestion() {
        let msg = "query exceeds max results 20000, retry with the range 100-150";
        assert_eq!(RpcClient::parse_suggested_range(msg), Some((100, 150)));
    }

    #[test]
    fn parses_hex_range_suggestion() {
        let msg = "Log response size exceeded. this block range should work: [0x64, 0x96]";
        assert_eq!(RpcClient::parse_suggested_range(msg), Some((100, 150)));
    }

    #[test]
    fn split_prefers_suggestion() {
        let msg = "retry with the range 100-150";
        assert_eq!(
            RpcClient::split_range(100, 400, msg),
            Some(((100, 150), (151, 400)))
        );
    }

    #[test]
    fn split_halves_without_usable_suggestion() {
        assert_eq!(
            RpcClient::split_range(100, 401, "exceeds max results"),
            Some(((100, 250), (251, 401)))
        );
        // Suggestion that does not start at our range is ignored.
        assert_eq!(
            RpcClient::split_range(100, 401, "retry with the range 50-80"),
            Some(((100, 250), (251, 401)))
        );
        assert_eq!(RpcClient::split_range(7, 7, "exceeds max results"), None);
    }

    #[test]
    fn rejects_empty_url_list() {
        assert!(RpcClient::new(&[], Duration::from_secs(1), 0).is_err());
    }

    #[test]
    fn rotates_through_urls() {
        let urls = vec![
            "http://localhost:8545".to_string(),
            "http://localhost:8546".to_string(),
        ];
        let client = RpcClient::new(&urls, Duration::from_secs(1), 0).unwrap();
        assert_eq!(client.get_current_url(), "http://localhost:8545");
        client.rotate_provider();
        assert_eq!(client.get_current_url(), "http://localhost:8546");
        client.rotate_provider();
        assert_eq!(client.get_current_url(), "http://localhost:8545");
    }

    mod node {
        use serde_json::{Value, json};
        use std::sync::{Arc, Mutex};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};

        /// Minimal JSON-RPC over HTTP endpoint answering one request per connection.
        pub struct FakeNode {
            pub url: String,
            requests: Arc<Mutex<Vec<(String, Value)>>>,
        }

        impl FakeNode {
            pub async fn start<H>(handler: H) -> Self
            where
                H: Fn(&str, &Value) -> Result<Value, String> + Send + 'static,
            {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let url = format!("http://{}", listener.local_addr().unwrap());
                let requests = Arc::new(Mutex::new(Vec::new()));
                let recorded = requests.clone();

                tokio::spawn(async move {
                    while let Ok((mut stream, _)) = listener.accept().await {
                        let Some(request) = read_body(&mut stream).await else {
                            continue;
                        };
                        let method = request["method"].as_str().unwrap_or_default().to_string();
                        let params = request["params"].clone();
                        recorded.lock().unwrap().push((method.clone(), params.clone()));

                        let body = match handler(&method, &params) {
                            Ok(result) => json!({"jsonrpc": "2.0", "id": request["id"], "result": result}),
                            Err(message) => json!({
                                "jsonrpc": "2.0",
                                "id": request["id"],
                                "error": {"code": -32000, "message": message}
                            }),
                        }
                        .to_string();
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                });

                FakeNode { url, requests }
            }

            pub fn request_count(&self) -> usize {
                self.requests.lock().unwrap().len()
            }

            /// `(fromBlock, toBlock)` of every eth_getLogs request, in arrival order.
            pub fn log_ranges(&self) -> Vec<(u64, u64)> {
                self.requests
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(method, _)| method == "eth_getLogs")
                    .map(|(_, params)| block_range(params))
                    .collect()
            }
        }

        pub fn quantity(value: &Value) -> u64 {
            let hex = value.as_str().unwrap().trim_start_matches("0x");
            u64::from_str_radix(hex, 16).unwrap()
        }

        pub fn block_range(params: &Value) -> (u64, u64) {
            (quantity(&params[0]["fromBlock"]), quantity(&params[0]["toBlock"]))
        }

        /// One empty log stamped with `block`, so callers can check result order.
        pub fn log_at(block: u64) -> Value {
            json!({
                "address": "0x00000000000000000000000000000000000000f1",
                "topics": [],
                "data": "0x",
                "blockHash": null,
                "blockNumber": format!("0x{block:x}"),
                "blockTimestamp": null,
                "transactionHash": null,
                "transactionIndex": null,
                "logIndex": "0x0",
                "removed": false
            })
        }

        async fn read_body(stream: &mut TcpStream) -> Option<Value> {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                    let len = headers
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    let start = end + 4;
                    while buf.len() < start + len {
                        let n = stream.read(&mut chunk).await.ok()?;
                        if n == 0 {
                            return None;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    return serde_json::from_slice(&buf[start..start + len]).ok();
                }
                let n = stream.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    use node::{FakeNode, block_range, log_at};
    use serde_json::json;

    fn client_for(nodes: &[&FakeNode], max_retries: usize) -> RpcClient {
        let urls: Vec<String> = nodes.iter().map(|n| n.url.clone()).collect();
        RpcClient::new(&urls, Duration::from_secs(5), max_retries).unwrap()
    }

    #[tokio::test]
    async fn narrows_oversized_ranges_in_block_order() {
        // Anything wider than 10 blocks is refused with a 7-block hint.
        let node = FakeNode::start(|_, params| {
            let (from, to) = block_range(params);
            if to - from + 1 > 10 {
                Err(format!(
                    "query exceeds max results 10000, retry with the range {}-{}",
                    from,
                    from + 6
                ))
            } else {
                Ok(json!([log_at(from)]))
            }
        })
        .await;
        let client = client_for(&[&node], 3);

        let logs = client.get_logs(&Filter::new(), 0, 29).await.unwrap();

        assert_eq!(
            node.log_ranges(),
            vec![(0, 29), (0, 6), (7, 29), (7, 13), (14, 29), (14, 20), (21, 29)]
        );
        let blocks: Vec<u64> = logs.iter().filter_map(|log| log.block_number).collect();
        assert_eq!(blocks, vec![0, 7, 14, 21]);
    }

    #[tokio::test]
    async fn single_block_over_limit_is_fatal() {
        let node = FakeNode::start(|_, _| {
            Err("query returned more than 10000 results".to_string())
        })
        .await;
        let client = client_for(&[&node], 3);

        let err = client.get_logs(&Filter::new(), 4, 5).await.unwrap_err();

        assert!(err.to_string().contains("query returned more than"));
        assert_eq!(node.log_ranges(), vec![(4, 5), (4, 4)]);
    }

    #[tokio::test]
    async fn reverted_call_is_not_retried() {
        let node = FakeNode::start(|_, _| Err("execution reverted".to_string())).await;
        let client = client_for(&[&node], 3);

        let result = client
            .call(Address::with_last_byte(0xf1), Bytes::from_static(&[0x95, 0xd8, 0x9b, 0x41]))
            .await;

        assert!(result.is_err());
        assert_eq!(node.request_count(), 1);
    }

    #[tokio::test]
    async fn transient_error_moves_to_next_url() {
        let flaky = FakeNode::start(|_, _| Err("upstream unavailable".to_string())).await;
        let healthy = FakeNode::start(|_, _| Ok(json!("0x1"))).await;
        let client = client_for(&[&flaky, &healthy], 3);

        assert_eq!(client.chain_id().await.unwrap(), 1);
        assert_eq!(flaky.request_count(), 1);
        assert_eq!(healthy.request_count(), 1);
        assert_eq!(client.get_current_url(), healthy.url);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let node = FakeNode::start(|_, _| Err("upstream unavailable".to_string())).await;
        let client = client_for(&[&node], 2);

        let err = client.latest_block().await.unwrap_err();

        assert!(err.to_string().contains("upstream unavailable"));
        assert_eq!(node.request_count(), 3);
    }
}
