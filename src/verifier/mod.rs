// mtadkim – DKIM signing and verification for mail transfer agents
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Verifier and supporting types.

mod header;
mod lookup;
mod query;
mod verify;

pub use crate::verifier::{lookup::LookupTxt, query::key_record_name};

use crate::{
    body_hash::StreamingBodyHasher,
    crypto::{self, VerificationError},
    header::{HeaderFieldError, HeaderFields},
    record::{DkimKeyRecord, DkimKeyRecordParseError},
    signature::{CanonicalizationAlgorithm, DkimSignature, DkimSignatureError, DomainName, Selector},
    util::{self, CanonicalStr},
    verifier::header::{HeaderSplitter, SignatureHeader},
};
use std::{
    collections::HashSet,
    error::Error,
    fmt::{self, Display, Formatter},
    io,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{
    task::JoinSet,
    time::{self, Instant},
};
use tracing::{debug, trace, Instrument, Span};

/// Configuration for a verifier process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The time budget of [`Verifier::finish`]. Signatures not evaluated when
    /// it elapses fail with reason *timeout*.
    pub timeout: Duration,

    /// Evaluate at most this number of signatures, in header order. Each
    /// further signature fails with reason *too many signatures*.
    pub max_signatures: usize,

    /// Minimum acceptable key size in bits. When the key size of an RSA public
    /// key is below this limit, the signature will not validate.
    ///
    /// Keys below [`crypto::MIN_KEY_BITS`] are never accepted.
    pub min_key_bits: usize,

    /// Tolerance applied to time values when checking signature expiration or
    /// timestamp validity, to allow for clock drift. Resolution is in seconds.
    pub time_tolerance: Duration,

    /// The `SystemTime` value to use as the instant ‘now’.
    pub fixed_system_time: Option<SystemTime>,
}

impl Config {
    fn current_timestamp(&self) -> u64 {
        self.fixed_system_time
            .unwrap_or_else(SystemTime::now)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(29),
            max_signatures: 10,
            min_key_bits: crypto::MIN_KEY_BITS,
            time_tolerance: Duration::from_secs(30),
            fixed_system_time: None,
        }
    }
}

/// An error that fails the verification of one signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerifierError {
    DkimSignatureFormat(DkimSignatureError),
    BodyHashMismatch,
    NoKeyFound,
    KeyLookup(io::ErrorKind),
    KeyRecord(DkimKeyRecordParseError),
    InvalidKey(VerificationError),
    VerificationFailure,
    /// The signature came after the first `max_signatures` and was not
    /// evaluated.
    TooManySignatures,
    Timeout,
    /// Evaluation ended without a result, for example by a panic.
    Internal,
}

impl VerifierError {
    /// Returns the short reason phrase reported for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DkimSignatureFormat(_) => "malformed signature",
            Self::BodyHashMismatch => "body hash mismatch",
            Self::NoKeyFound | Self::KeyLookup(_) => "no key",
            Self::KeyRecord(_) | Self::InvalidKey(_) => "bad key",
            Self::VerificationFailure => "bad signature",
            Self::TooManySignatures => "too many signatures",
            Self::Timeout => "timeout",
            Self::Internal => "internal error",
        }
    }
}

impl Display for VerifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DkimSignatureFormat(error) => error.fmt(f),
            Self::BodyHashMismatch => write!(f, "body hash mismatch"),
            Self::NoKeyFound => write!(f, "no key: no key record found"),
            Self::KeyLookup(kind) => write!(f, "no key: key record lookup failed ({kind})"),
            Self::KeyRecord(error) => write!(f, "bad key: {error}"),
            Self::InvalidKey(error) => write!(f, "bad key: {error}"),
            Self::VerificationFailure => write!(f, "bad signature"),
            Self::TooManySignatures => write!(f, "too many signatures"),
            Self::Timeout => write!(f, "timeout"),
            Self::Internal => write!(f, "internal error: evaluation did not complete"),
        }
    }
}

impl Error for VerifierError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DkimSignatureFormat(error) => Some(error),
            Self::KeyRecord(error) => Some(error),
            Self::InvalidKey(error) => Some(error),
            _ => None,
        }
    }
}

/// An error that fails the verification of the whole message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageError {
    /// No message data was received.
    EmptyMessage,
    MalformedHeader(HeaderFieldError),
}

impl Display for MessageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::MalformedHeader(_) => write!(f, "malformed header section"),
        }
    }
}

impl Error for MessageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::EmptyMessage => None,
            Self::MalformedHeader(error) => Some(error),
        }
    }
}

/// The verification status of an evaluated DKIM signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerificationStatus {
    Success,
    Failure(VerifierError),
}

/// A DKIM result as reported in authentication results.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimResult {
    /// The message was not signed.
    None,
    Pass,
    Fail,
}

impl CanonicalStr for DkimResult {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

impl Display for DkimResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

/// An informational finding that does not change a verification result.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerificationNote {
    /// The *t=* timestamp lies in the future.
    TimestampInFuture { timestamp: u64 },
    /// The *x=* expiration lies in the past.
    Expired { expiration: u64 },
}

impl Display for VerificationNote {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimestampInFuture { timestamp } => write!(f, "timestamp {timestamp} in the future"),
            Self::Expired { expiration } => write!(f, "signature expired at {expiration}"),
        }
    }
}

/// A verification result arrived at for some DKIM signature header.
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    /// The index of the evaluated *DKIM-Signature* header in the header
    /// section.
    pub index: usize,
    /// The signing domain, if it could be parsed.
    pub domain: Option<DomainName>,
    /// The selector, if it could be parsed.
    pub selector: Option<Selector>,
    /// The agent or user identifier (*i=*, or `@` and the domain).
    pub identity: Option<String>,
    pub signature: Option<DkimSignature>,
    /// The key record used in the verification, if one was found.
    pub key_record: Option<Arc<DkimKeyRecord>>,
    pub key_size: Option<usize>,
    pub notes: Vec<VerificationNote>,
}

impl VerificationResult {
    fn new(index: usize, status: VerificationStatus) -> Self {
        Self {
            status,
            index,
            domain: None,
            selector: None,
            identity: None,
            signature: None,
            key_record: None,
            key_size: None,
            notes: vec![],
        }
    }

    /// Returns *pass* or *fail*.
    pub fn result(&self) -> DkimResult {
        match self.status {
            VerificationStatus::Success => DkimResult::Pass,
            VerificationStatus::Failure(_) => DkimResult::Fail,
        }
    }

    pub fn error(&self) -> Option<&VerifierError> {
        match &self.status {
            VerificationStatus::Success => None,
            VerificationStatus::Failure(error) => Some(error),
        }
    }

    /// Returns the reason phrase of a failed result.
    pub fn reason(&self) -> Option<&'static str> {
        self.error().map(VerifierError::reason)
    }

    /// Whether the key record marks the domain as testing DKIM.
    pub fn is_testing(&self) -> bool {
        self.key_record.as_ref().map_or(false, |r| r.is_testing())
    }
}

/// Summarizes the results for a message: *none* without signatures, *pass* if
/// any signature passed, *fail* otherwise.
pub fn summarize(results: &[VerificationResult]) -> DkimResult {
    if results.is_empty() {
        DkimResult::None
    } else if results.iter().any(|r| r.status == VerificationStatus::Success) {
        DkimResult::Pass
    } else {
        DkimResult::Fail
    }
}

// One hasher per body canonicalization in use, shared by all signatures
// that use it.
struct BodyStage {
    headers: Arc<HeaderFields>,
    signatures: Vec<SignatureHeader>,
    simple: Option<StreamingBodyHasher>,
    relaxed: Option<StreamingBodyHasher>,
}

impl BodyStage {
    fn new(header: &[u8], config: &Config) -> Result<Self, MessageError> {
        let headers = HeaderFields::from_bytes(header).map_err(|e| {
            debug!("malformed header section");
            MessageError::MalformedHeader(e)
        })?;

        let signatures = header::find_signatures(&headers);

        trace!(count = signatures.len(), "DKIM signatures found");

        let mut simple = None;
        let mut relaxed = None;

        let evaluated = signatures.iter().take(config.max_signatures);
        for sig in evaluated.filter_map(|s| s.signature.as_ref().ok()) {
            let hasher = match sig.canonicalization.body {
                CanonicalizationAlgorithm::Simple => &mut simple,
                CanonicalizationAlgorithm::Relaxed => &mut relaxed,
            };
            hasher.get_or_insert_with(|| StreamingBodyHasher::new(sig.canonicalization.body));
        }

        Ok(Self {
            headers: Arc::new(headers),
            signatures,
            simple,
            relaxed,
        })
    }

    fn hash_chunk(&mut self, chunk: &[u8]) {
        for hasher in [&mut self.simple, &mut self.relaxed].into_iter().flatten() {
            hasher.update(chunk);
        }
    }
}

enum Stage {
    Header(HeaderSplitter),
    Body(BodyStage),
    Failed(MessageError),
}

/// A verifier of DKIM signatures in an email message.
///
/// The raw message, header and body, is fed in chunks of any size with
/// [`Verifier::message_chunk`]; [`Verifier::finish`] then evaluates all
/// signatures concurrently and returns one result per signature. Dropping the
/// verifier, or the future returned by `finish`, discards all state and
/// cancels outstanding key lookups.
///
/// # Examples
///
/// ```
/// # use std::{future::{self, Ready}, io};
/// # #[derive(Clone)]
/// # struct NoRecords;
/// # impl mtadkim::verifier::LookupTxt for NoRecords {
/// #     type Answer = Vec<io::Result<Vec<u8>>>;
/// #     type Query<'a> = Ready<io::Result<Self::Answer>>;
/// #     fn lookup_txt(&self, _: &str) -> Self::Query<'_> {
/// #         future::ready(Err(io::ErrorKind::NotFound.into()))
/// #     }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// use mtadkim::verifier::{summarize, Config, DkimResult, Verifier};
///
/// let resolver = NoRecords;
///
/// let mut verifier = Verifier::new(Config::default());
/// verifier.message_chunk(b"From: me@example.com\r\nSubject: hi\r\n\r\n");
/// verifier.message_chunk(b"Hello!\r\n");
///
/// let results = verifier.finish(&resolver).await.unwrap();
///
/// assert!(results.is_empty());
/// assert_eq!(summarize(&results), DkimResult::None);
/// # });
/// ```
pub struct Verifier {
    config: Config,
    stage: Stage,
    span: Span,
}

impl Verifier {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stage: Stage::Header(HeaderSplitter::new()),
            span: Span::none(),
        }
    }

    /// Runs all work of this verifier in the given span.
    pub fn instrument(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Processes a chunk of the raw message.
    ///
    /// Remember that email messages generally use CRLF line endings; this is
    /// important for correct body hash calculation.
    pub fn message_chunk(&mut self, chunk: &[u8]) {
        let _enter = self.span.enter();

        match &mut self.stage {
            Stage::Header(splitter) => {
                if let Some((header, rest)) = splitter.push(chunk) {
                    self.stage = match BodyStage::new(&header, &self.config) {
                        Ok(mut body) => {
                            body.hash_chunk(rest);
                            Stage::Body(body)
                        }
                        Err(e) => Stage::Failed(e),
                    };
                }
            }
            Stage::Body(body) => body.hash_chunk(chunk),
            Stage::Failed(_) => {}
        }
    }

    /// Finishes the message and evaluates all signatures.
    ///
    /// A message without signatures gives an empty result vector.
    pub async fn finish<T>(self, resolver: &T) -> Result<Vec<VerificationResult>, MessageError>
    where
        T: LookupTxt + Clone + 'static,
    {
        let span = self.span.clone();
        finish_verification(self.config, self.stage, resolver)
            .instrument(span)
            .await
    }
}

async fn finish_verification<T>(
    config: Config,
    stage: Stage,
    resolver: &T,
) -> Result<Vec<VerificationResult>, MessageError>
where
    T: LookupTxt + Clone + 'static,
{
    let body = match stage {
        Stage::Header(splitter) => {
            let header = splitter.finish();
            if header.is_empty() {
                return Err(MessageError::EmptyMessage);
            }
            BodyStage::new(&header, &config)?
        }
        Stage::Body(body) => body,
        Stage::Failed(e) => return Err(e),
    };

    let BodyStage { headers, signatures, simple, relaxed } = body;

    if signatures.is_empty() {
        debug!("message has no DKIM signatures");
        return Ok(vec![]);
    }

    let simple = simple.map(StreamingBodyHasher::finish_digest);
    let relaxed = relaxed.map(StreamingBodyHasher::finish_digest);

    let now = config.current_timestamp();
    let tolerance = config.time_tolerance.as_secs();

    let mut results = Vec::with_capacity(signatures.len());
    let mut set = JoinSet::new();
    let mut pending = HashSet::new();

    for (i, sig_header) in signatures.into_iter().enumerate() {
        let SignatureHeader { index, name, value, signature } = sig_header;

        if i >= config.max_signatures {
            trace!(index, "signature beyond the evaluation limit");
            let mut result = VerificationResult::new(index, VerificationStatus::Failure(
                VerifierError::TooManySignatures,
            ));
            match signature {
                Ok(sig) => {
                    result.domain = Some(sig.domain);
                    result.selector = Some(sig.selector);
                }
                Err(e) => {
                    result.domain = e.domain;
                    result.selector = e.selector;
                }
            }
            results.push(result);
            continue;
        }

        let sig = match signature {
            Ok(sig) => sig,
            Err(e) => {
                let mut result = VerificationResult::new(index, VerificationStatus::Failure(
                    VerifierError::DkimSignatureFormat(e.clone()),
                ));
                result.domain = e.domain;
                result.selector = e.selector;
                results.push(result);
                continue;
            }
        };

        let computed = match sig.canonicalization.body {
            CanonicalizationAlgorithm::Simple => simple.as_ref(),
            CanonicalizationAlgorithm::Relaxed => relaxed.as_ref(),
        };

        let status = match check_body_hash(&sig, computed) {
            Ok(()) => {
                let resolver = resolver.clone();
                let headers = headers.clone();
                let sig = sig.clone();
                let min_key_bits = config.min_key_bits.max(crypto::MIN_KEY_BITS);

                set.spawn(
                    async move {
                        let evaluation = verify::evaluate_signature(
                            &resolver,
                            &headers,
                            &sig,
                            &name,
                            &value,
                            min_key_bits,
                        )
                        .await;
                        (i, evaluation)
                    }
                    .in_current_span(),
                );

                pending.insert(i);

                VerificationStatus::Failure(VerifierError::Timeout)
            }
            Err(e) => VerificationStatus::Failure(e),
        };

        let mut result = VerificationResult::new(index, status);
        result.domain = Some(sig.domain.clone());
        result.selector = Some(sig.selector.clone());
        result.identity = Some(sig.identity());
        result.notes = time_notes(&sig, now, tolerance);
        result.signature = Some(sig);
        results.push(result);
    }

    let deadline = Instant::now() + config.timeout;

    loop {
        match time::timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok((i, evaluation)))) => {
                pending.remove(&i);
                if let Some(result) = results.get_mut(i) {
                    result.status = evaluation.status;
                    result.key_record = evaluation.key_record;
                    result.key_size = evaluation.key_size;
                }
            }
            Ok(Some(Err(e))) => {
                debug!("signature evaluation did not complete: {e}");
            }
            Ok(None) => {
                // every task has ended, those still pending panicked
                for i in pending.drain() {
                    if let Some(result) = results.get_mut(i) {
                        result.status = VerificationStatus::Failure(VerifierError::Internal);
                    }
                }
                break;
            }
            Err(_) => {
                // pending signatures keep their timeout status
                debug!(pending = set.len(), "verification timed out");
                set.abort_all();
                break;
            }
        }
    }

    for result in &results {
        debug!(
            domain = ?result.domain,
            result = %result.result(),
            reason = result.reason().unwrap_or_default(),
            "DKIM signature evaluated"
        );
        for note in &result.notes {
            debug!(domain = ?result.domain, "{note}");
        }
    }

    Ok(results)
}

fn check_body_hash(sig: &DkimSignature, computed: Option<&(Box<[u8]>, usize)>) -> Result<(), VerifierError> {
    match computed {
        Some((hash, _)) if *hash == sig.body_hash => {
            trace!("body hash matched");
            Ok(())
        }
        Some((hash, len)) => {
            trace!(len, "body hash mismatch: {}", util::encode_base64(hash));
            Err(VerifierError::BodyHashMismatch)
        }
        None => {
            trace!("no body hash computed");
            Err(VerifierError::BodyHashMismatch)
        }
    }
}

fn time_notes(sig: &DkimSignature, now: u64, tolerance: u64) -> Vec<VerificationNote> {
    let mut notes = vec![];

    if let Some(timestamp) = sig.timestamp {
        if timestamp.saturating_sub(tolerance) > now {
            notes.push(VerificationNote::TimestampInFuture { timestamp });
        }
    }
    if let Some(expiration) = sig.expiration {
        if now >= expiration.saturating_add(tolerance) {
            notes.push(VerificationNote::Expired { expiration });
        }
    }

    notes
}
