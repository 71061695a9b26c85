//! Outbound HTTP plumbing: signed control messages to peer farmers and
//! renters, plus shard mirroring from other farmers.

use {
    anyhow::{Context, Result},
    futures::StreamExt,
    message::Contact,
    std::{path::Path, time::Duration},
    tokio::io::AsyncWriteExt,
};

/// Legacy peers dispatch on this exact header value.
const USER_AGENT: &str = "8.7.3";

const PING_TIMEOUT: Duration = Duration::from_secs(4);
const PROBE_TIMEOUT: Duration = Duration::from_secs(8);
const OFFER_TIMEOUT: Duration = Duration::from_secs(4);

/// Timeout class of an outbound control message. Each class owns its own
/// client so unrelated call-sites never share a deadline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    Ping,
    Probe,
    Offer,
}

/// The engine's view of the network. Mocked in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// POSTs a signed control message to the peer's root endpoint and returns
    /// the raw response body.
    async fn send(&self, contact: &Contact, kind: Kind, body: Vec<u8>) -> Result<Vec<u8>>;

    /// Streams `GET /shards/{data_hash}?token=…` from a remote farmer into
    /// `dest`, returning the number of bytes written.
    async fn fetch_shard(
        &self,
        source: &Contact,
        data_hash: &str,
        token: &str,
        dest: &Path,
    ) -> Result<u64>;
}

pub struct HttpTransport {
    ping: reqwest::Client,
    probe: reqwest::Client,
    offer: reqwest::Client,
    /// Mirror transfers have no overall deadline.
    download: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let with_timeout = |timeout| {
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .context("build http client")
        };
        Ok(Self {
            ping: with_timeout(PING_TIMEOUT)?,
            probe: with_timeout(PROBE_TIMEOUT)?,
            offer: with_timeout(OFFER_TIMEOUT)?,
            download: reqwest::Client::builder()
                .build()
                .context("build download client")?,
        })
    }

    fn client(&self, kind: Kind) -> &reqwest::Client {
        match kind {
            Kind::Ping => &self.ping,
            Kind::Probe => &self.probe,
            Kind::Offer => &self.offer,
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, contact: &Contact, kind: Kind, body: Vec<u8>) -> Result<Vec<u8>> {
        let url = format!("http://{}:{}/", contact.address, contact.port);
        let response = self
            .client(kind)
            .post(url)
            .header("content-type", "application/json")
            .header("userAgent", USER_AGENT)
            .body(body)
            .send()
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch_shard(
        &self,
        source: &Contact,
        data_hash: &str,
        token: &str,
        dest: &Path,
    ) -> Result<u64> {
        let url = format!(
            "http://{}:{}/shards/{data_hash}?token={token}",
            source.address, source.port
        );
        let response = self
            .download
            .get(url)
            .header("userAgent", USER_AGENT)
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .context("create shard file")?;
        let mut stream = response.bytes_stream();
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(total)
    }
}
