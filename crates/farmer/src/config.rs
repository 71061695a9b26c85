//! Configuration loading and validation.
//!
//! The config is a JSON file. `local_addr` and seeds may carry an `http://`,
//! `https://` or `genaro://` scheme prefix which is stripped before parsing;
//! seeds follow the `genaro://host:port/nodeID` form. The signing key comes
//! either from `node_private_key` (hex in the file) or from `keyfile`, a path
//! to a file whose contents are the hex secret.

use {
    anyhow::{Context, Result, bail, ensure},
    message::Contact,
    serde::{Deserialize, Serialize},
    std::{
        net::IpAddr,
        path::{Path, PathBuf},
    },
};

const SCHEMES: [&str; 3] = ["http://", "https://", "genaro://"];

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// `ip:port` the farmer binds and advertises.
    pub local_addr: String,
    #[serde(default)]
    pub node_private_key: Option<String>,
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
    /// Root for `contract.db` and the `shards/` directory.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub seed_list: Vec<String>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Stamped into every contract we countersign.
    pub payout_address: String,
    /// Refuse RETRIEVE tokens for shards we do not hold instead of letting
    /// the later download fail.
    #[serde(default)]
    pub retrieve_requires_shard: bool,
}

#[derive(Debug)]
pub struct ValidatedConfig {
    pub local_ip: IpAddr,
    pub local_port: u16,
    pub node_secret: String,
    pub data_dir: PathBuf,
    pub seeds: Vec<Contact>,
    pub log_file: Option<PathBuf>,
    pub log_filter: String,
    pub payout_address: String,
    pub retrieve_requires_shard: bool,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_slice(&raw).context("decode config file")
    }

    pub fn validate(self) -> Result<ValidatedConfig> {
        let (local_ip, local_port) =
            parse_addr(strip_scheme(&self.local_addr)).context("local_addr invalid")?;

        let node_secret = match (self.node_private_key, self.keyfile) {
            (Some(secret), _) => secret,
            (None, Some(keyfile)) => std::fs::read_to_string(&keyfile)
                .with_context(|| format!("read keyfile {}", keyfile.display()))?
                .trim()
                .to_string(),
            (None, None) => bail!("config needs node_private_key or keyfile"),
        };
        ensure!(
            hex::decode(&node_secret).is_ok(),
            "node private key is not hex"
        );

        let metadata = std::fs::metadata(&self.data_dir)
            .with_context(|| format!("data_dir {} not accessible", self.data_dir.display()))?;
        ensure!(metadata.is_dir(), "data_dir is not a directory");
        let shards = self.data_dir.join("shards");
        if !shards.exists() {
            std::fs::create_dir(&shards).context("create shards directory")?;
        }

        ensure!(!self.seed_list.is_empty(), "seed_list is empty");
        let seeds = self
            .seed_list
            .iter()
            .map(|seed| parse_seed(seed))
            .collect::<Result<Vec<_>>>()?;

        Ok(ValidatedConfig {
            local_ip,
            local_port,
            node_secret,
            data_dir: self.data_dir,
            seeds,
            log_file: self.log_file,
            log_filter: self.log_filter.unwrap_or_else(|| "info".to_string()),
            payout_address: self.payout_address,
            retrieve_requires_shard: self.retrieve_requires_shard,
        })
    }
}

impl ValidatedConfig {
    pub fn contract_db_path(&self) -> PathBuf {
        self.data_dir.join("contract.db")
    }

    pub fn shards_dir(&self) -> PathBuf {
        self.data_dir.join("shards")
    }
}

/// Writes a fresh config template, generating a new private key.
pub fn write_template(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("create config directory")?;
        }
    }
    let template = serde_json::json!({
        "local_addr": "127.0.0.1:5003",
        "node_private_key": farmer_crypto::generate_secret_hex(),
        "data_dir": "/path/to/data",
        "seed_list": [
            "genaro://renter_ip:4000/337472da3068fa05d415262baf4df5bada8aefdc",
        ],
        "log_file": "./farmer.log",
        "payout_address": "0x0000000000000000000000000000000000000000",
    });
    let rendered = serde_json::to_string_pretty(&template).context("encode template")?;
    std::fs::write(path, rendered)
        .with_context(|| format!("write config template {}", path.display()))
}

/// `genaro://110.120.111.23:4000/nodeid` → contact (scheme optional, trailing
/// slash tolerated).
fn parse_seed(seed: &str) -> Result<Contact> {
    let rest = strip_scheme(seed.trim());
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    let (addr, node_id) = rest
        .split_once('/')
        .with_context(|| format!("seed bad format: {seed}"))?;
    ensure!(
        !node_id.is_empty() && !node_id.contains('/'),
        "seed bad format: {seed}"
    );
    ensure!(
        hex::decode(node_id).is_ok(),
        "seed node id is not hex: {seed}"
    );
    let (ip, port) = parse_addr(addr).with_context(|| format!("seed addr invalid: {seed}"))?;
    Ok(Contact {
        address: ip.to_string(),
        port,
        node_id: node_id.to_string(),
        protocol: String::new(),
    })
}

fn strip_scheme(addr: &str) -> &str {
    for scheme in SCHEMES {
        if let Some(rest) = addr.strip_prefix(scheme) {
            return rest;
        }
    }
    addr
}

/// `110.120.111.23:9089` → (ip, port).
fn parse_addr(addr: &str) -> Result<(IpAddr, u16)> {
    let addr = addr.trim();
    ensure!(!addr.is_empty(), "addr is empty");
    let (ip, port) = addr.split_once(':').context("no port supplied")?;
    let ip: IpAddr = ip.parse().context("ip is invalid")?;
    let port: u16 = port.parse().context("port is invalid")?;
    ensure!(port != 0, "port is invalid");
    Ok((ip, port))
}
