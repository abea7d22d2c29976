//! Report packaging. A report wraps an ABI-encoded payload with a
//! deterministic report context and the signatures returned by the signing
//! capability; the gateway hands it to the forwarder or receiver contract.

use crate::abi::{keccak256, to_hex, Address, H256};
use anyhow::{bail, ensure, Context, Result};
use futures::future::BoxFuture;
use k256::ecdsa::SigningKey;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const ENCODER_EVM: &str = "evm";
pub const SIGNING_ECDSA: &str = "ecdsa";
pub const HASHING_KECCAK256: &str = "keccak256";

/// Inputs to [`ReportBuilder::build_report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub encoded_payload: Vec<u8>,
    pub encoder_name: String,
    pub signing_algo: String,
    pub hashing_algo: String,
}

impl ReportRequest {
    /// EVM-encoded payload signed with ECDSA over keccak256, the only
    /// combination the consumer contracts accept.
    pub fn evm(encoded_payload: Vec<u8>) -> Self {
        Self {
            encoded_payload,
            encoder_name: ENCODER_EVM.to_owned(),
            signing_algo: SIGNING_ECDSA.to_owned(),
            hashing_algo: HASHING_KECCAK256.to_owned(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.encoder_name != ENCODER_EVM {
            bail!("unsupported report encoder {:?}", self.encoder_name);
        }
        if self.signing_algo != SIGNING_ECDSA {
            bail!("unsupported signing algorithm {:?}", self.signing_algo);
        }
        if self.hashing_algo != HASHING_KECCAK256 {
            bail!("unsupported hashing algorithm {:?}", self.hashing_algo);
        }
        ensure!(!self.encoded_payload.is_empty(), "report payload is empty");
        Ok(())
    }
}

/// A signed payload ready for a single chain write.
#[derive(Clone, PartialEq, Eq)]
pub struct Report {
    raw_report: Vec<u8>,
    report_context: Vec<u8>,
    signatures: Vec<Vec<u8>>,
    encoder_name: String,
    signing_algo: String,
    hashing_algo: String,
}

impl Report {
    pub fn raw_report(&self) -> &[u8] {
        &self.raw_report
    }

    pub fn report_context(&self) -> &[u8] {
        &self.report_context
    }

    pub fn signatures(&self) -> &[Vec<u8>] {
        &self.signatures
    }

    pub fn encoder_name(&self) -> &str {
        &self.encoder_name
    }

    pub fn signing_algo(&self) -> &str {
        &self.signing_algo
    }

    pub fn hashing_algo(&self) -> &str {
        &self.hashing_algo
    }
}

impl fmt::Debug for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Report")
            .field("raw_report", &to_hex(&self.raw_report))
            .field("report_context", &to_hex(&self.report_context))
            .field("signatures", &self.signatures.len())
            .field("encoder_name", &self.encoder_name)
            .field("signing_algo", &self.signing_algo)
            .field("hashing_algo", &self.hashing_algo)
            .finish()
    }
}

/// Digest every signer commits to: `keccak256(keccak256(raw) || context)`.
pub fn report_digest(raw_report: &[u8], report_context: &[u8]) -> H256 {
    let mut preimage = keccak256(raw_report).as_bytes().to_vec();
    preimage.extend_from_slice(report_context);
    keccak256(preimage)
}

/// Opaque signing capability.
pub trait ReportSigner: Send + Sync {
    fn sign<'a>(
        &'a self,
        raw_report: &'a [u8],
        report_context: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<Vec<u8>>>>;
}

/// Packages payloads into reports. The context is the configured digest
/// followed by a per-builder sequence number, so equal inputs in equal order
/// produce byte-identical reports. A number is used up only by a report that
/// was signed.
pub struct ReportBuilder {
    signer: Arc<dyn ReportSigner>,
    config_digest: H256,
    next_sequence: Mutex<u64>,
}

impl ReportBuilder {
    pub fn new(signer: Arc<dyn ReportSigner>) -> Self {
        Self::with_config_digest(signer, H256::zero())
    }

    pub fn with_config_digest(signer: Arc<dyn ReportSigner>, config_digest: H256) -> Self {
        Self {
            signer,
            config_digest,
            next_sequence: Mutex::new(0),
        }
    }

    pub async fn build_report(&self, request: ReportRequest) -> Result<Report> {
        request.validate()?;

        // Held across signing so concurrent builds take numbers in order.
        let mut next_sequence = self.next_sequence.lock().await;
        let sequence = *next_sequence;
        let mut report_context = self.config_digest.as_bytes().to_vec();
        let mut sequence_word = [0u8; 32];
        sequence_word[24..].copy_from_slice(&sequence.to_be_bytes());
        report_context.extend_from_slice(&sequence_word);

        let signatures = self
            .signer
            .sign(&request.encoded_payload, &report_context)
            .await
            .context("report signing failed")?;
        ensure!(!signatures.is_empty(), "signer returned no signatures");
        *next_sequence += 1;
        drop(next_sequence);

        tracing::debug!(
            sequence,
            payload_bytes = request.encoded_payload.len(),
            signatures = signatures.len(),
            "report built"
        );

        Ok(Report {
            raw_report: request.encoded_payload,
            report_context,
            signatures,
            encoder_name: request.encoder_name,
            signing_algo: request.signing_algo,
            hashing_algo: request.hashing_algo,
        })
    }
}

impl fmt::Debug for ReportBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportBuilder")
            .field("config_digest", &self.config_digest)
            .field("next_sequence", &self.next_sequence.try_lock().map(|next| *next).ok())
            .finish()
    }
}

/// Single-key secp256k1 signer for development networks.
pub struct LocalKeySigner {
    key: SigningKey,
}

impl LocalKeySigner {
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let bytes = crate::abi::decode_hex(private_key).context("invalid signer private key")?;
        ensure!(
            bytes.len() == 32,
            "signer private key must be 32 bytes, got {}",
            bytes.len()
        );
        let key = SigningKey::from_slice(&bytes).context("invalid secp256k1 private key")?;
        Ok(Self { key })
    }

    /// Address derived from the uncompressed public key.
    pub fn address(&self) -> Address {
        let point = self.key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        Address::from_slice(&hash.as_bytes()[12..])
    }

    fn sign_digest(&self, digest: H256) -> Result<Vec<u8>> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_bytes())
            .context("failed to sign report digest")?;
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        Ok(bytes)
    }
}

impl fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address())
            .finish()
    }
}

impl ReportSigner for LocalKeySigner {
    fn sign<'a>(
        &'a self,
        raw_report: &'a [u8],
        report_context: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<Vec<u8>>>> {
        Box::pin(async move {
            let digest = report_digest(raw_report, report_context);
            Ok(vec![self.sign_digest(digest)?])
        })
    }
}
