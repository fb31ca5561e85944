use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, Utc};
use ring::digest;
use tokio::sync::{Mutex, RwLock, watch};
use uuid::Uuid;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::trust::{CompactJwt, certificate_from_pem_or_der, validate_certificate_path};
use crate::utils::base64url_encode;

use super::errors::MetadataError;
use super::types::{
    CachedAuthenticatorEntry, InitializeOptions, MetadataStatement, ServiceState, TocHeader,
    TocPayload, TocSource,
};

/// Ceiling for waiting on an in-progress refresh before giving up.
const READY_WAIT_CEILING: Duration = Duration::from_secs(70);

/// Coordinates interactions with FIDO Metadata Service servers: TOC download
/// and verification, on-demand statement fetching with hash checks, and
/// compromise gating per AAGUID.
///
/// Instantiate once per process and pass a handle to every call site. All
/// refresh work happens inline within whichever call triggered it; lookups
/// that arrive during a refresh wait (bounded) for the registry to become
/// consistent again.
///
/// <https://fidoalliance.org/metadata/>
pub struct MetadataService {
    registry: RwLock<Registry>,
    state_tx: watch::Sender<ServiceState>,
    refresh_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    http: reqwest::Client,
}

#[derive(Default)]
struct Registry {
    /// AAGUID → cached trust data
    entries: HashMap<String, CachedAuthenticatorEntry>,
    /// MDS server URL → cached TOC state
    sources: HashMap<String, TocSource>,
}

/// Holds the service in `Refreshing` and restores `Ready` on drop, so every
/// exit path out of a refresh releases waiting lookups.
struct RefreshingState {
    state_tx: watch::Sender<ServiceState>,
}

impl RefreshingState {
    fn begin(state_tx: &watch::Sender<ServiceState>) -> Self {
        state_tx.send_replace(ServiceState::Refreshing);
        Self {
            state_tx: state_tx.clone(),
        }
    }
}

impl Drop for RefreshingState {
    fn drop(&mut self) {
        self.state_tx.send_replace(ServiceState::Ready);
    }
}

impl MetadataService {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ServiceState::Ready);
        Self {
            registry: RwLock::new(Registry::default()),
            state_tx,
            refresh_guards: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Prepare the service to handle live data, prepared data, or both.
    ///
    /// Preloaded statements are trusted as-is and never refreshed. Each MDS
    /// server is queried for its TOC; a failing server is logged and skipped
    /// so that metadata stays best-effort trust enrichment rather than a hard
    /// prerequisite. This method therefore never fails outright.
    pub async fn initialize(&self, opts: InitializeOptions) {
        let _refreshing = RefreshingState::begin(&self.state_tx);

        if !opts.statements.is_empty() {
            tracing::info!(
                "Adding {} preloaded statements to the registry",
                opts.statements.len()
            );
            let mut reg = self.registry.write().await;
            for statement in opts.statements {
                // Only FIDO2-compatible authenticators carry an AAGUID
                if statement.aaguid.is_empty() {
                    continue;
                }
                reg.entries.insert(
                    statement.aaguid.clone(),
                    CachedAuthenticatorEntry {
                        source_url: String::new(),
                        expected_hash: String::new(),
                        status_reports: Vec::new(),
                        statement: Some(statement),
                        toc_source: None,
                    },
                );
            }
        }

        for server in &opts.mds_servers {
            tracing::info!("Querying MDS server {}", server.url);
            let source = TocSource {
                url: server.url.clone(),
                root_cert_url: server.root_cert_url.clone(),
                url_suffix: server.metadata_url_suffix.clone(),
                signing_alg: String::new(),
                last_seen_sequence_no: 0,
                next_update_at: DateTime::<Utc>::UNIX_EPOCH,
            };
            if let Err(e) = self.download_toc(&source).await {
                tracing::warn!("Error processing MDS server {}: {e}", server.url);
            }
        }
    }

    /// Whether any trust data has been loaded. Format verifiers use this to
    /// decide if a metadata lookup is meaningful at all.
    pub async fn has_entries(&self) -> bool {
        !self.registry.read().await.entries.is_empty()
    }

    /// [`get_statement`] for a raw 16-byte AAGUID as found in authenticator
    /// data, normalized to canonical lowercase hyphenated form first.
    ///
    /// [`get_statement`]: MetadataService::get_statement
    pub async fn get_statement_raw(
        &self,
        aaguid: &[u8],
    ) -> Result<Option<MetadataStatement>, MetadataError> {
        let aaguid = Uuid::from_slice(aaguid)
            .map_err(|e| MetadataError::Aaguid(e.to_string()))?
            .hyphenated()
            .to_string();
        self.get_statement(&aaguid).await
    }

    /// Get the metadata statement for an AAGUID, refreshing the owning TOC
    /// first when its `nextUpdate` has elapsed and fetching the statement body
    /// on demand.
    ///
    /// Fails when the AAGUID is unlisted, when any status report marks the
    /// model as compromised (checked on every call, since status can change
    /// between refreshes), or when a freshly fetched statement body does not
    /// match the TOC-declared hash.
    pub async fn get_statement(
        &self,
        aaguid: &str,
    ) -> Result<Option<MetadataStatement>, MetadataError> {
        if aaguid.is_empty() {
            return Ok(None);
        }

        // If a TOC refresh is in progress, pause until the registry is consistent
        self.pause_until_ready().await?;

        let mut entry = self
            .entry_snapshot(aaguid)
            .await
            .ok_or_else(|| MetadataError::UnlistedAaguid(aaguid.to_string()))?;

        if let Some(source_url) = entry.toc_source.clone() {
            let due = match self.source_snapshot(&source_url).await {
                Some(source) => Utc::now() > source.next_update_at,
                None => false,
            };
            if due {
                let guard = self.refresh_guard(&source_url).await;
                let _in_flight = guard.lock().await;
                // Another caller may have finished the refresh while we
                // waited on the guard; recheck before downloading again.
                if let Some(source) = self.source_snapshot(&source_url).await {
                    if Utc::now() > source.next_update_at {
                        let _refreshing = RefreshingState::begin(&self.state_tx);
                        self.download_toc(&source).await?;
                    }
                }
                // The refresh rewrote this source's entries
                entry = self
                    .entry_snapshot(aaguid)
                    .await
                    .ok_or_else(|| MetadataError::UnlistedAaguid(aaguid.to_string()))?;
            }
        }

        for report in &entry.status_reports {
            if report.status.is_compromised() {
                return Err(MetadataError::CompromisedAuthenticator {
                    aaguid: aaguid.to_string(),
                    status: report.status,
                });
            }
        }

        if entry.statement.is_none() && entry.toc_source.is_some() {
            tracing::debug!("Downloading metadata statement from {}", entry.source_url);
            let body = self.http.get(&entry.source_url).send().await?.text().await?;
            let statement = self.verify_and_cache_statement(aaguid, &entry, &body).await?;
            return Ok(Some(statement));
        }

        Ok(entry.statement)
    }

    /// Hash-check a fetched statement body against the TOC-declared digest,
    /// then cache and return the parsed statement.
    ///
    /// Per FIDO MDS policy a mismatched statement must never be served, even
    /// partially: the cached statement is cleared so a later retry re-fetches.
    async fn verify_and_cache_statement(
        &self,
        aaguid: &str,
        entry: &CachedAuthenticatorEntry,
        body: &str,
    ) -> Result<MetadataStatement, MetadataError> {
        // ES256-signed TOCs declare SHA-256 statement digests; no other
        // algorithm is specified, so SHA-256 doubles as the default. The
        // digest covers the raw (still base64) body.
        let computed = base64url_encode(digest::digest(&digest::SHA256, body.as_bytes()));
        if computed != entry.expected_hash {
            let mut reg = self.registry.write().await;
            if let Some(cached) = reg.entries.get_mut(aaguid) {
                cached.statement = None;
            }
            return Err(MetadataError::HashMismatch(aaguid.to_string()));
        }

        let json = STANDARD
            .decode(body.trim())
            .map_err(|e| MetadataError::Statement(format!("Failed to decode statement body: {e}")))?;
        let statement: MetadataStatement = serde_json::from_slice(&json)
            .map_err(|e| MetadataError::Statement(format!("Failed to parse statement JSON: {e}")))?;

        tracing::debug!("Statement hash matched, caching statement for {aaguid}");
        let mut reg = self.registry.write().await;
        if let Some(cached) = reg.entries.get_mut(aaguid) {
            cached.statement = Some(statement.clone());
        }
        Ok(statement)
    }

    /// Download, authenticate and ingest the latest TOC for one MDS server.
    async fn download_toc(&self, source: &TocSource) -> Result<(), MetadataError> {
        tracing::debug!("Downloading TOC: {}", source.url);
        let token = self.http.get(&source.url).send().await?.text().await?;

        let jwt = CompactJwt::parse(&token).map_err(|e| MetadataError::Toc(e.to_string()))?;
        let header: TocHeader = jwt.header().map_err(|e| MetadataError::Toc(e.to_string()))?;
        let payload: TocPayload = jwt.payload().map_err(|e| MetadataError::Toc(e.to_string()))?;

        if payload.no <= source.last_seen_sequence_no {
            return Err(MetadataError::StaleSequence {
                latest: payload.no,
                cached: source.last_seen_sequence_no,
            });
        }

        let mut chain: Vec<Vec<u8>> = Vec::with_capacity(header.x5c.len() + 1);
        for cert_b64 in &header.x5c {
            let der = STANDARD
                .decode(cert_b64)
                .map_err(|e| MetadataError::Toc(format!("Invalid x5c entry: {e}")))?;
            chain.push(der);
        }
        if chain.is_empty() {
            return Err(MetadataError::Toc(
                "TOC header carries no certificates".to_string(),
            ));
        }
        if !source.root_cert_url.is_empty() {
            tracing::debug!("Downloading root certificate: {}", source.root_cert_url);
            let body = self
                .http
                .get(&source.root_cert_url)
                .send()
                .await?
                .bytes()
                .await?;
            let der = certificate_from_pem_or_der(&body)
                .map_err(|e| MetadataError::CertChain(e.to_string()))?;
            chain.push(der);
        }

        // No statements are cached from an untrusted TOC: the chain is
        // validated first, then the signature, and only then does the cache
        // change.
        validate_certificate_path(&chain).map_err(|e| MetadataError::CertChain(e.to_string()))?;

        if header.alg != "ES256" {
            return Err(MetadataError::Signature(format!(
                "Unsupported TOC signing algorithm {:?}",
                header.alg
            )));
        }
        let leaf_point = leaf_public_key_point(&chain[0])?;
        jwt.verify_es256(&leaf_point)
            .map_err(|e| MetadataError::Signature(e.to_string()))?;

        let next_update_at = parse_next_update(&payload.next_update)?;
        self.ingest_verified_toc(source, &header.alg, &payload, next_update_at)
            .await
    }

    /// Replace this source's registry entries with a fully authenticated TOC.
    async fn ingest_verified_toc(
        &self,
        source: &TocSource,
        alg: &str,
        payload: &TocPayload,
        next_update_at: DateTime<Utc>,
    ) -> Result<(), MetadataError> {
        let mut reg = self.registry.write().await;

        // Recheck under the write lock so a racing refresh of the same source
        // cannot regress the cached sequence number.
        if let Some(cached) = reg.sources.get(&source.url) {
            if payload.no <= cached.last_seen_sequence_no {
                return Err(MetadataError::StaleSequence {
                    latest: payload.no,
                    cached: cached.last_seen_sequence_no,
                });
            }
        }

        let mut cached_count = 0usize;
        for entry in &payload.entries {
            let Some(aaguid) = entry.aaguid.as_deref().filter(|a| !a.is_empty()) else {
                continue;
            };
            // The TOC is the authority on current hash and status: drop any
            // previously fetched statement so the next lookup re-verifies it.
            reg.entries.insert(
                aaguid.to_string(),
                CachedAuthenticatorEntry {
                    source_url: format!("{}{}", entry.url, source.url_suffix),
                    expected_hash: entry.hash.clone(),
                    status_reports: entry.status_reports.clone(),
                    statement: None,
                    toc_source: Some(source.url.clone()),
                },
            );
            cached_count += 1;
        }

        reg.sources.insert(
            source.url.clone(),
            TocSource {
                url: source.url.clone(),
                root_cert_url: source.root_cert_url.clone(),
                url_suffix: source.url_suffix.clone(),
                signing_alg: alg.to_string(),
                last_seen_sequence_no: payload.no,
                next_update_at,
            },
        );

        tracing::info!(
            "TOC {} verified (no {}), cached {cached_count} entries",
            source.url,
            payload.no
        );
        Ok(())
    }

    /// Wait until no refresh is in progress, bounded by [`READY_WAIT_CEILING`].
    async fn pause_until_ready(&self) -> Result<(), MetadataError> {
        let mut rx = self.state_tx.subscribe();
        let ready = rx.wait_for(|state| *state == ServiceState::Ready);
        match tokio::time::timeout(READY_WAIT_CEILING, ready).await {
            Ok(Ok(_)) => Ok(()),
            // The sender lives as long as the service, so a closed channel is
            // indistinguishable from the service going away mid-wait.
            Ok(Err(_)) | Err(_) => Err(MetadataError::Timeout(READY_WAIT_CEILING)),
        }
    }

    async fn entry_snapshot(&self, aaguid: &str) -> Option<CachedAuthenticatorEntry> {
        self.registry.read().await.entries.get(aaguid).cloned()
    }

    async fn source_snapshot(&self, url: &str) -> Option<TocSource> {
        self.registry.read().await.sources.get(url).cloned()
    }

    /// Per-source in-flight guard: two callers that both observe an elapsed
    /// `nextUpdate` serialize here instead of racing duplicate downloads.
    async fn refresh_guard(&self, source_url: &str) -> Arc<Mutex<()>> {
        let mut guards = self.refresh_guards.lock().await;
        guards
            .entry(source_url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for MetadataService {
    fn default() -> Self {
        Self::new()
    }
}

fn leaf_public_key_point(leaf_der: &[u8]) -> Result<Vec<u8>, MetadataError> {
    let (_, cert) = X509Certificate::from_der(leaf_der).map_err(|e| {
        MetadataError::Signature(format!("Failed to parse TOC leaf certificate: {e}"))
    })?;
    Ok(cert.public_key().subject_public_key.data.to_vec())
}

fn parse_next_update(value: &str) -> Result<DateTime<Utc>, MetadataError> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| MetadataError::Toc(format!("Invalid nextUpdate {value:?}: {e}")))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| MetadataError::Toc(format!("Invalid nextUpdate {value:?}")))?;
    Ok(midnight.and_utc())
}
