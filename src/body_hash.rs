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


//! Streaming computation of a single body hash.

use crate::{canonicalize::BodyCanonicalizer, signature::CanonicalizationAlgorithm, util};
use digest::Digest;
use sha2::Sha256;
use tracing::trace;

/// An incremental SHA-256 body hasher for one canonicalization algorithm.
///
/// Chunks may be of any size and may split a line ending anywhere; the digest
/// equals that of the whole canonicalized body.
///
/// # Examples
///
/// ```
/// use mtadkim::{body_hash::StreamingBodyHasher, signature::CanonicalizationAlgorithm};
///
/// let mut hasher = StreamingBodyHasher::new(CanonicalizationAlgorithm::Simple);
/// hasher.update(b"Hello world!\r");
/// hasher.update(b"\n");
///
/// assert_eq!(hasher.finish(), "z6TUz85EdYrACGMHYgZhJGvVy5oQI0dooVMKa2ZT7c4=");
/// ```
pub struct StreamingBodyHasher {
    canonicalizer: BodyCanonicalizer,
    digest: Sha256,
    len: usize,
}

impl StreamingBodyHasher {
    pub fn new(algorithm: CanonicalizationAlgorithm) -> Self {
        Self {
            canonicalizer: BodyCanonicalizer::new(algorithm),
            digest: Sha256::new(),
            len: 0,
        }
    }

    /// Canonicalizes and hashes a chunk of the body.
    pub fn update(&mut self, chunk: &[u8]) {
        let canonical = self.canonicalizer.canonicalize_chunk(chunk);
        self.len += canonical.len();
        self.digest.update(&canonical);
    }

    /// Finishes hashing, returning the digest and the canonicalized length.
    pub fn finish_digest(mut self) -> (Box<[u8]>, usize) {
        let canonical = self.canonicalizer.finish();
        self.len += canonical.len();
        self.digest.update(&canonical);

        trace!(len = self.len, "body hash computed");

        (self.digest.finalize().to_vec().into(), self.len)
    }

    /// Finishes hashing, returning the Base64-encoded digest.
    pub fn finish(self) -> String {
        let (digest, _) = self.finish_digest();
        util::encode_base64(digest)
    }
}
