//! The farmer's request-processing engine.
//!
//! One [`Engine`] handle bundles everything a request needs: the durable
//! store, the signing identity, the dedupe caches, and the outbound
//! transport. Handlers are one `match` arm each; every response is signed
//! before it leaves the process.

pub mod proof;

use {
    crate::{
        outbound::{Kind, Transport},
        status::StatusHandle,
    },
    anyhow::{Context, Result},
    base64::Engine as _,
    base64::engine::general_purpose::STANDARD as BASE64,
    dashmap::DashMap,
    farmer_crypto::{Sha256Stream, Signer, magic_hash, ripemd160},
    message::{
        AuditParams, ConsignParams, Contact, Contract, Inbound, Method, MirrorParams,
        PublishParams, Request, Response, ResponseIn, RetrieveParams, Signable, fresh_id,
        parse_request, parse_response,
    },
    std::{
        path::{Path, PathBuf},
        sync::{Arc, RwLock},
        time::Duration,
    },
    store::{StorageItem, Store, StoreError},
    tokio::io::AsyncReadExt,
};

/// Repeated PUBLISHes for one shard are collapsed within this window.
const PUBLISH_DEDUPE_TTL: Duration = Duration::from_secs(2 * 60);
/// MIRROR commands are deduped over a shorter window.
const MIRROR_DEDUPE_TTL: Duration = Duration::from_secs(30);

const FILE_BUF: usize = 64 * 1024;

pub struct EngineConfig {
    pub contact: Contact,
    pub shards_dir: PathBuf,
    pub payout_address: String,
    /// When set, RETRIEVE refuses to issue tokens for shards we do not hold
    /// instead of letting the subsequent download 400.
    pub retrieve_requires_shard: bool,
}

#[derive(Clone)]
pub struct Engine(Arc<Inner>);

struct Inner {
    /// Heartbeat may rewrite the address after acquiring a port mapping.
    contact: RwLock<Contact>,
    signer: Signer,
    store: Store,
    shards_dir: PathBuf,
    payout_address: String,
    retrieve_requires_shard: bool,
    transport: Arc<dyn Transport>,
    published: moka::sync::Cache<String, ()>,
    mirrors: moka::sync::Cache<String, ()>,
    /// Serializes {contract read, trees write, shard write} per data_hash.
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    status: StatusHandle,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        signer: Signer,
        store: Store,
        transport: Arc<dyn Transport>,
        status: StatusHandle,
    ) -> Self {
        Self(Arc::new(Inner {
            contact: RwLock::new(config.contact),
            signer,
            store,
            shards_dir: config.shards_dir,
            payout_address: config.payout_address,
            retrieve_requires_shard: config.retrieve_requires_shard,
            transport,
            published: moka::sync::Cache::builder()
                .time_to_live(PUBLISH_DEDUPE_TTL)
                .build(),
            mirrors: moka::sync::Cache::builder()
                .time_to_live(MIRROR_DEDUPE_TTL)
                .build(),
            locks: DashMap::new(),
            status,
        }))
    }

    pub fn contact(&self) -> Contact {
        self.0.contact.read().unwrap().clone()
    }

    pub fn set_address(&self, address: String) {
        self.0.contact.write().unwrap().address = address;
    }

    pub(crate) fn store(&self) -> &Store {
        &self.0.store
    }

    pub(crate) fn shard_path(&self, data_hash: &str) -> PathBuf {
        self.0.shards_dir.join(data_hash)
    }

    pub(crate) fn report_stored_bytes(&self, bytes: u64) {
        self.0
            .status
            .add_bytes(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    /// Processes one inbound control-channel body and returns the signed
    /// response, ready to write back.
    pub async fn handle_raw(&self, raw: &[u8]) -> Vec<u8> {
        let (request_id, mut response) = match parse_request(raw) {
            Inbound::Request(request) => {
                let id = request.id().to_owned();
                (id, self.dispatch(request).await)
            }
            Inbound::Unknown { id } => {
                tracing::debug!(raw = %String::from_utf8_lossy(raw), "unknown message");
                (
                    id.unwrap_or_else(fresh_id),
                    self.error("unknown message"),
                )
            }
        };
        response.set_id(request_id);
        self.sign_envelope(&mut response);
        serde_json::to_vec(&response).unwrap_or_default()
    }

    async fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Ping(_) => Response::ok(self.contact()),
            Request::Probe(envelope) => self.on_probe(envelope.params.contact).await,
            // the routing table is not part of this node; answer politely
            Request::FindNode(_) => Response::nodes(self.contact()),
            Request::Publish(envelope) => self.on_publish(envelope.params),
            // farmers send OFFER, they never serve it
            Request::Offer(_) => self.error("unknown message"),
            Request::Consign(envelope) => self.on_consign(envelope.params).await,
            Request::Retrieve(envelope) => self.on_retrieve(envelope.params).await,
            Request::Mirror(envelope) => self.on_mirror(envelope.params).await,
            Request::Audit(envelope) => self.on_audit(envelope.params).await,
        }
    }

    fn error(&self, message: impl Into<String>) -> Response {
        Response::error(self.contact(), message)
    }

    /// Assigns a fresh id when needed, stamps the nonce, and signs
    /// `id || nonce` under the magic-envelope hash.
    ///
    /// The nonce is Unix seconds scaled to nanoseconds; sub-second uniqueness
    /// is deliberately lost to stay compatible with nanosecond peers.
    fn sign_envelope<S: Signable + ?Sized>(&self, envelope: &mut S) {
        if envelope.id().is_empty() {
            envelope.set_id(fresh_id());
        }
        let nonce = unix_seconds() * 1_000_000_000;
        envelope.set_nonce(nonce);
        let payload = format!("{}{nonce}", envelope.id());
        let signature = self.0.signer.sign(magic_hash(payload.as_bytes()));
        envelope.set_signature(BASE64.encode(signature));
    }

    /// Countersigns a contract: stamps our node id and signs the canonical
    /// payload (both signature fields excluded).
    fn sign_contract(&self, contract: &mut Contract) {
        contract.farmer_id = Some(self.0.signer.node_id());
        let digest = magic_hash(contract.signing_payload().as_bytes());
        contract.farmer_signature = Some(BASE64.encode(self.0.signer.sign(digest)));
    }

    async fn on_probe(&self, caller: Contact) -> Response {
        // only vouch for the caller once we manage to reach them back
        match self.ping(&caller).await {
            Ok(()) => Response::ok(self.contact()),
            Err(err) => {
                tracing::debug!(?err, "probe ping-back failed");
                self.error("unknown message")
            }
        }
    }

    fn on_publish(&self, params: PublishParams) -> Response {
        let contract = params.contents;
        if !contract.is_valid() {
            tracing::debug!(uuid = %params.uuid, "dropping publish with invalid contract");
            return Response::ok(self.contact());
        }
        if self.0.published.contains_key(&contract.data_hash) {
            tracing::debug!(
                uuid = %params.uuid,
                data_hash = %contract.data_hash,
                "publish already processed"
            );
            return Response::ok(self.contact());
        }
        self.0.published.insert(contract.data_hash.clone(), ());

        let mut contract = contract;
        contract.payment_destination = Some(self.0.payout_address.clone());
        self.sign_contract(&mut contract);

        let engine = self.clone();
        let publisher = params.contact;
        tokio::spawn(async move {
            if let Err(err) = engine.send_offer(&publisher, contract).await {
                tracing::warn!(?err, "offer failed");
            }
        });
        Response::ok(self.contact())
    }

    async fn on_consign(&self, params: ConsignParams) -> Response {
        if params.audit_tree.is_empty() {
            return self.error("audit_tree is empty");
        }
        let data_hash = params.data_hash;
        let _guard = self.lock_hash(&data_hash).await;

        let mut item = match self.0.store.storage_item(&data_hash) {
            Ok(item) => item,
            Err(StoreError::NotFound) => return self.error("no contract for data_hash"),
            Err(err) => {
                tracing::warn!(%data_hash, ?err, "consign could not load contract");
                return self.error("internal error");
            }
        };
        if item.contract.audit_count != params.audit_tree.len() as u64 {
            tracing::warn!(
                %data_hash,
                audit_count = item.contract.audit_count,
                leaves = params.audit_tree.len(),
                "consign tree does not match the contract"
            );
            return self.error("internal error");
        }

        // The token must be durable before the trees: trees never exist
        // without a token that can exercise them.
        let token = fresh_id();
        if let Err(err) = self.0.store.insert_token(&token) {
            tracing::warn!(%data_hash, ?err, "could not persist consign token");
            return self.error("internal error");
        }
        item.trees = params.audit_tree;
        if let Err(err) = self.0.store.put_storage_item(&data_hash, &item, true) {
            tracing::warn!(%data_hash, ?err, "could not persist audit tree");
            return self.error("internal error");
        }
        tracing::info!(%data_hash, %token, "consign token issued");
        Response::token(token, self.contact())
    }

    async fn on_retrieve(&self, params: RetrieveParams) -> Response {
        if self.0.retrieve_requires_shard
            && tokio::fs::metadata(self.shard_path(&params.data_hash))
                .await
                .is_err()
        {
            return self.error("no shard");
        }
        let token = fresh_id();
        match self.0.store.insert_token(&token) {
            Ok(()) => {
                tracing::info!(data_hash = %params.data_hash, %token, "retrieve token issued");
                Response::token(token, self.contact())
            }
            Err(err) => {
                tracing::warn!(?err, "could not persist retrieve token");
                self.error("internal error")
            }
        }
    }

    async fn on_mirror(&self, params: MirrorParams) -> Response {
        if self.0.mirrors.contains_key(&params.data_hash) {
            return Response::ok(self.contact());
        }
        let item = match self.0.store.storage_item(&params.data_hash) {
            Ok(item) => item,
            Err(StoreError::NotFound) => return self.error("no signed contract"),
            Err(err) => {
                tracing::warn!(data_hash = %params.data_hash, ?err, "mirror could not load contract");
                return self.error("internal error");
            }
        };
        if item.contract.audit_count != params.audit_tree.len() as u64 {
            return self.error("mirror message bad format");
        }
        self.0.mirrors.insert(params.data_hash.clone(), ());

        {
            let _guard = self.lock_hash(&params.data_hash).await;
            if tokio::fs::metadata(self.shard_path(&params.data_hash))
                .await
                .is_ok()
            {
                // already holding the shard
                return Response::ok(self.contact());
            }
        }

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine
                .mirror_transfer(
                    params.farmer,
                    params.data_hash,
                    params.token,
                    params.audit_tree,
                )
                .await
            {
                tracing::warn!(?err, "mirror transfer failed");
            }
        });
        Response::ok(self.contact())
    }

    async fn on_audit(&self, params: AuditParams) -> Response {
        let Some(audit) = params.audits.first() else {
            return self.error("message bad format");
        };
        tracing::debug!(data_hash = %audit.data_hash, "audit challenge received");

        let shard = self.shard_path(&audit.data_hash);
        if tokio::fs::metadata(&shard).await.is_err() {
            return self.error("no shard");
        }
        let item = match self.0.store.storage_item(&audit.data_hash) {
            Ok(item) if !item.trees.is_empty() => item,
            Ok(_) | Err(StoreError::NotFound) => return self.error("internal error"),
            Err(err) => {
                tracing::warn!(data_hash = %audit.data_hash, ?err, "audit could not load trees");
                return self.error("internal error");
            }
        };

        let Ok(challenge) = hex::decode(&audit.challenge) else {
            return self.error("message bad format");
        };
        let leaf_hash = match self.audit_leaf_hash(&shard, &challenge).await {
            Ok(leaf_hash) => leaf_hash,
            Err(err) => {
                tracing::warn!(data_hash = %audit.data_hash, ?err, "audit could not hash shard");
                return self.error("internal error");
            }
        };

        let lookup = hex::encode(farmer_crypto::ripemd160_sha256(&leaf_hash));
        let Some(position) = item.trees.iter().position(|entry| *entry == lookup) else {
            tracing::warn!(data_hash = %audit.data_hash, "challenge result not in audit tree");
            return self.error("audit failed");
        };
        match proof::build(&item.trees, position, &leaf_hash) {
            Ok(branch) => Response::audit(vec![branch], self.contact()),
            Err(err) => {
                tracing::warn!(data_hash = %audit.data_hash, ?err, "proof construction failed");
                self.error("internal error")
            }
        }
    }

    /// `RIPEMD160(SHA256(challenge || shard))`, streamed off disk.
    async fn audit_leaf_hash(&self, shard: &Path, challenge: &[u8]) -> Result<[u8; 20]> {
        let mut file = tokio::fs::File::open(shard).await?;
        let mut digest = Sha256Stream::default();
        digest.update(challenge);
        let mut buf = vec![0u8; FILE_BUF];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            digest.update(&buf[..read]);
        }
        Ok(ripemd160(&digest.finalize()))
    }

    pub(crate) async fn ping(&self, contact: &Contact) -> Result<()> {
        let body = self.signed_request(Request::ping(self.contact()))?;
        self.0.transport.send(contact, Kind::Ping, body).await?;
        tracing::debug!(peer = %contact.node_id, "PING succeeded");
        Ok(())
    }

    pub(crate) async fn probe(&self, contact: &Contact) -> Result<()> {
        let body = self.signed_request(Request::probe(self.contact()))?;
        self.0.transport.send(contact, Kind::Probe, body).await?;
        tracing::debug!(peer = %contact.node_id, "PROBE succeeded");
        Ok(())
    }

    async fn send_offer(&self, renter: &Contact, contract: Contract) -> Result<()> {
        let sent_hash = contract.data_hash.clone();
        let body = self.signed_request(Request::offer(contract, self.contact()))?;
        let raw = self.0.transport.send(renter, Kind::Offer, body).await?;
        match parse_response(Method::Offer, &raw)? {
            ResponseIn::Error(error) => {
                anyhow::bail!("offer rejected: {}", error.error.message)
            }
            ResponseIn::Offer(offer) => self.accept_offer(&sent_hash, offer.result.contract),
            other => anyhow::bail!("unexpected offer response: {other:?}"),
        }
    }

    /// Persists the countersigned contract returned by the renter. The
    /// publish dedupe entry is purged whenever the contract cannot be kept so
    /// a later PUBLISH can retry.
    fn accept_offer(&self, sent_hash: &str, contract: Contract) -> Result<()> {
        if !contract.has_valid_audit_count() {
            self.0.published.invalidate(sent_hash);
            anyhow::bail!("audit_count {} is not a power of two", contract.audit_count);
        }
        let data_hash = contract.data_hash.clone();
        let item = StorageItem::new(contract);
        if let Err(err) = self.0.store.put_storage_item(&data_hash, &item, false) {
            self.0.published.invalidate(sent_hash);
            return Err(err).context("persist contract");
        }
        tracing::info!(%data_hash, "accepted storage contract");
        Ok(())
    }

    /// Downloads a shard from another farmer, verifies its hash, and commits
    /// {trees, shard file} under the per-hash lock. Partial files never
    /// survive a failure.
    pub(crate) async fn mirror_transfer(
        &self,
        source: Contact,
        data_hash: String,
        token: String,
        audit_tree: Vec<String>,
    ) -> Result<u64> {
        let partial = self.0.shards_dir.join(format!("{data_hash}.part"));
        let downloaded = async {
            let bytes = self
                .0
                .transport
                .fetch_shard(&source, &data_hash, &token, &partial)
                .await?;
            let digest = file_leaf_digest(&partial).await?;
            anyhow::ensure!(
                digest == data_hash,
                "downloaded shard hashes to {digest}, expected {data_hash}"
            );
            Ok::<_, anyhow::Error>(bytes)
        }
        .await;

        let bytes = match downloaded {
            Ok(bytes) => bytes,
            Err(err) => {
                discard_partial(&partial).await;
                return Err(err);
            }
        };

        let _guard = self.lock_hash(&data_hash).await;
        // trees before the shard file: a shard on disk implies its trees
        let commit = async {
            let mut item = self.0.store.storage_item(&data_hash)?;
            item.trees = audit_tree;
            self.0.store.put_storage_item(&data_hash, &item, true)?;
            tokio::fs::rename(&partial, self.shard_path(&data_hash)).await?;
            Ok::<_, anyhow::Error>(())
        };
        match commit.await {
            Ok(()) => {
                self.report_stored_bytes(bytes);
                tracing::info!(%data_hash, bytes, "mirrored shard");
                Ok(bytes)
            }
            Err(err) => {
                discard_partial(&partial).await;
                Err(err)
            }
        }
    }

    fn signed_request(&self, mut request: Request) -> Result<Vec<u8>> {
        self.sign_envelope(&mut request);
        serde_json::to_vec(&request).context("encode request")
    }

    async fn lock_hash(&self, data_hash: &str) -> tokio::sync::OwnedMutexGuard<()> {
        // entries are tiny and bounded by the number of distinct shards seen,
        // so they are never reclaimed
        let lock = self
            .0
            .locks
            .entry(data_hash.to_owned())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

async fn discard_partial(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(?path, ?err, "could not remove partial download");
        }
    }
}

/// `RIPEMD160(SHA256(contents))` of a file, streamed.
async fn file_leaf_digest(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut digest = Sha256Stream::default();
    let mut buf = vec![0u8; FILE_BUF];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        digest.update(&buf[..read]);
    }
    Ok(hex::encode(ripemd160(&digest.finalize())))
}

fn unix_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_secs()).ok())
        .unwrap_or_default()
}
