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

use crate::{
    canonicalize,
    crypto::{self, VerificationError, VerifyingKey},
    header::HeaderFields,
    record::{DkimKeyRecord, DkimKeyRecordParseError},
    signature::DkimSignature,
    tag_list,
    verifier::{query, LookupTxt, VerificationStatus, VerifierError},
};
use std::{
    io::{self, ErrorKind},
    str::FromStr,
    sync::Arc,
};
use tracing::trace;

/// The outcome of evaluating one signature against its key records.
pub struct Evaluation {
    pub status: VerificationStatus,
    pub key_record: Option<Arc<DkimKeyRecord>>,
    pub key_size: Option<usize>,
}

impl Evaluation {
    fn failed(error: VerifierError) -> Self {
        Self {
            status: VerificationStatus::Failure(error),
            key_record: None,
            key_size: None,
        }
    }
}

/// Retrieves the public key for a signature and verifies the header hash.
pub async fn evaluate_signature<T: LookupTxt + ?Sized>(
    resolver: &T,
    headers: &HeaderFields,
    sig: &DkimSignature,
    name: &str,
    value: &str,
    min_key_bits: usize,
) -> Evaluation {
    let lookup_result = query::look_up_records(resolver, &sig.domain, &sig.selector).await;

    let txts = match extract_record_strs(lookup_result) {
        Ok(txts) => txts,
        Err(e) => return Evaluation::failed(e),
    };

    let mut evaluation = Evaluation::failed(VerifierError::NoKeyFound);

    // step through all (usually only 1, but many allowed) key records
    for (i, txt) in txts.into_iter().enumerate() {
        trace!("trying verification using DKIM key record {}", i + 1);

        let key_record = match txt {
            Ok(s) => DkimKeyRecord::from_str(&s),
            Err(e) => {
                trace!("syntax error in DNS record: {e}");
                Err(DkimKeyRecordParseError::RecordSyntax)
            }
        };

        let key_record = match key_record {
            Ok(r) => Arc::new(r),
            Err(e) => {
                // record last error seen
                evaluation = Evaluation::failed(VerifierError::KeyRecord(e));
                continue;
            }
        };

        let public_key = match VerifyingKey::from_key_data(&key_record.key_data) {
            Ok(k) => k,
            Err(e) => {
                trace!("unusable public key: {e}");
                evaluation = Evaluation::failed(VerifierError::InvalidKey(e));
                continue;
            }
        };

        let key_size = public_key.key_size();

        if key_size < min_key_bits {
            trace!(key_size, "public key too small");
            evaluation = Evaluation::failed(VerifierError::InvalidKey(VerificationError::InsufficientKeySize));
            continue;
        }

        let status = match perform_verification(headers, &public_key, sig, name, value) {
            Ok(()) => VerificationStatus::Success,
            Err(e) => VerificationStatus::Failure(e),
        };

        let done = status == VerificationStatus::Success;

        evaluation = Evaluation {
            status,
            key_record: Some(key_record),
            key_size: Some(key_size),
        };

        if done {
            break;
        }
    }

    evaluation
}

fn extract_record_strs(lookup_result: query::QueryResult) -> Result<Vec<io::Result<String>>, VerifierError> {
    match lookup_result {
        Ok(txts) if txts.is_empty() => {
            trace!("no key record");
            Err(VerifierError::NoKeyFound)
        }
        Ok(txts) => Ok(txts),
        Err(e) => {
            if e.kind() == ErrorKind::NotFound {
                trace!("no key record");
                Err(VerifierError::NoKeyFound)
            } else {
                trace!("could not look up key record: {e}");
                Err(VerifierError::KeyLookup(e.kind()))
            }
        }
    }
}

/// Verifies the signature data over the header hash.
pub fn perform_verification(
    headers: &HeaderFields,
    public_key: &VerifyingKey,
    sig: &DkimSignature,
    name: &str,
    value: &str,
) -> Result<(), VerifierError> {
    // the signature as it appeared, with an empty b= value
    let unsigned = tag_list::with_empty_value(value, "b");

    let input = canonicalize::header_signing_input(
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        name,
        &unsigned,
    );

    trace!(len = input.len(), "header signing input canonicalized");

    match public_key.verify(&crypto::sha256([input]), &sig.signature_data) {
        Ok(()) => {
            trace!("RSA public key verification successful");
            Ok(())
        }
        Err(e) => {
            trace!("RSA public key verification failed: {e}");
            Err(VerifierError::VerificationFailure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_record_strs_errors() {
        assert_eq!(
            extract_record_strs(Err(ErrorKind::NotFound.into())).unwrap_err(),
            VerifierError::NoKeyFound
        );
        assert_eq!(extract_record_strs(Ok(vec![])).unwrap_err(), VerifierError::NoKeyFound);
        assert_eq!(
            extract_record_strs(Err(ErrorKind::TimedOut.into())).unwrap_err(),
            VerifierError::KeyLookup(ErrorKind::TimedOut)
        );
    }
}
