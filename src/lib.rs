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

//! A library implementing *DomainKeys Identified Mail* (DKIM) signing and
//! verification, as described in [RFC 6376], for use inside a mail transfer
//! agent.
//!
//! The high-level API signs outbound messages (module `signer`) and verifies
//! signatures on inbound messages (module `verifier`). For outbound mail, the
//! signing identity is chosen per sender domain from a directory of keys
//! (modules `sender` and `keys`); [`DkimPipeline`] combines these steps for a
//! server that processes one message at a time. For convenience, the relevant
//! items are re-exported at the top level.
//!
//! The low-level building blocks, for canonicalisation, body hashing, header
//! and signature models and cryptography, are available in additional
//! modules.
//!
//! # Usage
//!
//! The types [`Signer`] and [`Verifier`] provide the entry points to signing
//! and verifying. Both are fed the message in chunks of any size and produce
//! their result at the end; dropping them discards all state.
//!
//! See the examples for `Signer` and `Verifier` for basic usage.
//!
//! Only the *rsa-sha256* signature algorithm is supported. DNS resolution is
//! left to the user, through the trait
//! [`LookupTxt`][crate::verifier::LookupTxt].
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376

pub mod body_hash;
pub mod canonicalize;
pub mod config;
pub mod crypto;
pub mod header;
pub mod keys;
mod parse;
pub mod pipeline;
pub mod record;
pub mod sender;
pub mod signature;
pub mod signer;
mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    config::{ConfigError, DkimConfig, SignConfig},
    crypto::SigningKey,
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    keys::{FsKeyStore, KeyResolver, KeyStore},
    pipeline::{DkimPipeline, SignSkipped},
    sender::{get_sender_domain, Address, Envelope},
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{Signer, SignerError, SigningOutput, SigningProperties},
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{
        summarize, Config, DkimResult, LookupTxt, VerificationResult, VerificationStatus, Verifier,
        VerifierError,
    },
};
