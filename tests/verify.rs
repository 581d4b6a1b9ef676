pub mod common;

use common::MockLookup;
use mtadkim::verifier::{
    summarize, Config, DkimResult, MessageError, VerificationNote, VerificationStatus, Verifier,
    VerifierError,
};
use mtadkim::signature::{DomainName, Selector};
use std::{io::ErrorKind, time::Duration};

async fn signed_message() -> Vec<u8> {
    let props = common::signing_properties("from, to, subject, date, message-id").await;
    let message = common::make_message();
    let output = common::sign(props, &message);
    common::signed_message(&output, &message)
}

async fn resolver() -> MockLookup {
    MockLookup::with_record(common::key_record("tests/keys/rsa2048pub.pem").await)
}

#[tokio::test]
async fn round_trip_pass() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = resolver().await;
    let message = signed_message().await;

    for chunk_len in [1, 7, 64, message.len()] {
        let results = common::verify(&resolver, &message, Config::default(), chunk_len).await;

        assert_eq!(results.len(), 1);

        let result = &results[0];
        assert_eq!(result.status, VerificationStatus::Success);
        assert_eq!(result.result(), DkimResult::Pass);
        assert_eq!(result.reason(), None);
        assert_eq!(result.index, 0);
        assert_eq!(result.identity.as_deref(), Some("@example.com"));
        assert_eq!(result.domain, Some(DomainName::new("example.com").unwrap()));
        assert_eq!(result.selector, Some(Selector::new("sel").unwrap()));
        assert_eq!(result.key_size, Some(2048));
        assert!(!result.is_testing());

        assert_eq!(summarize(&results), DkimResult::Pass);
    }
}

#[tokio::test]
async fn round_trip_lf_line_endings() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = resolver().await;
    let message = signed_message().await;

    let message = String::from_utf8(message).unwrap().replace("\r\n", "\n");

    let results = common::verify(&resolver, message.as_bytes(), Config::default(), 10).await;

    assert_eq!(results[0].status, VerificationStatus::Success);
}

#[tokio::test]
async fn no_signatures() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = resolver().await;

    let results = common::verify(&resolver, &common::make_message(), Config::default(), 5).await;

    assert!(results.is_empty());
    assert_eq!(summarize(&results), DkimResult::None);
}

#[tokio::test]
async fn malformed_signature_does_not_affect_others() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = resolver().await;

    let mut message = b"DKIM-Signature: v=1; a=rsa-sha256; d=example.com; s=sel\r\n".to_vec();
    message.extend(signed_message().await);

    let results = common::verify(&resolver, &message, Config::default(), 4096).await;

    assert_eq!(results.len(), 2);

    let malformed = results.iter().find(|r| r.index == 0).unwrap();
    assert!(matches!(
        malformed.status,
        VerificationStatus::Failure(VerifierError::DkimSignatureFormat(_))
    ));
    assert_eq!(malformed.reason(), Some("malformed signature"));
    assert_eq!(malformed.domain, Some(DomainName::new("example.com").unwrap()));

    let valid = results.iter().find(|r| r.index == 1).unwrap();
    assert_eq!(valid.status, VerificationStatus::Success);

    assert_eq!(summarize(&results), DkimResult::Pass);
}

#[tokio::test]
async fn modified_body() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = resolver().await;

    let mut message = signed_message().await;
    message.extend(b"P.S. Bring snacks.\r\n");

    let results = common::verify(&resolver, &message, Config::default(), 4096).await;

    assert_eq!(results[0].status, VerificationStatus::Failure(VerifierError::BodyHashMismatch));
    assert_eq!(results[0].reason(), Some("body hash mismatch"));
    assert_eq!(summarize(&results), DkimResult::Fail);
}

#[tokio::test]
async fn trailing_blank_lines_added() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = resolver().await;

    let mut message = signed_message().await;
    message.extend(b"\r\n\r\n");

    let results = common::verify(&resolver, &message, Config::default(), 4096).await;

    assert_eq!(results[0].status, VerificationStatus::Success);
}

#[tokio::test]
async fn modified_header() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = resolver().await;

    let message = signed_message().await;
    let message = String::from_utf8(message)
        .unwrap()
        .replace("Subject: Is dinner ready?", "Subject: Is lunch ready?");

    let results = common::verify(&resolver, message.as_bytes(), Config::default(), 4096).await;

    assert_eq!(results[0].status, VerificationStatus::Failure(VerifierError::VerificationFailure));
    assert_eq!(results[0].reason(), Some("bad signature"));
}

#[tokio::test]
async fn no_key_record() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::failing(ErrorKind::NotFound);

    let results = common::verify(&resolver, &signed_message().await, Config::default(), 4096).await;

    assert_eq!(results[0].status, VerificationStatus::Failure(VerifierError::NoKeyFound));
    assert_eq!(results[0].reason(), Some("no key"));
}

#[tokio::test]
async fn key_lookup_error() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::failing(ErrorKind::ConnectionRefused);

    let results = common::verify(&resolver, &signed_message().await, Config::default(), 4096).await;

    assert_eq!(
        results[0].status,
        VerificationStatus::Failure(VerifierError::KeyLookup(ErrorKind::ConnectionRefused))
    );
    assert_eq!(results[0].reason(), Some("no key"));
}

#[tokio::test]
async fn revoked_key() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::with_record("v=DKIM1; k=rsa; p=".into());

    let results = common::verify(&resolver, &signed_message().await, Config::default(), 4096).await;

    assert_eq!(results[0].reason(), Some("bad key"));
}

#[tokio::test]
async fn key_too_small() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::with_record(common::key_record("tests/keys/rsa512pub.pem").await);

    let config = Config {
        min_key_bits: 512,
        ..Default::default()
    };

    let results = common::verify(&resolver, &signed_message().await, config, 4096).await;

    assert!(matches!(results[0].status, VerificationStatus::Failure(VerifierError::InvalidKey(_))));
    assert_eq!(results[0].reason(), Some("bad key"));
}

#[tokio::test]
async fn testing_flag_and_notes() {
    let _ = tracing_subscriber::fmt::try_init();

    let record = common::key_record("tests/keys/rsa2048pub.pem").await;
    let resolver = MockLookup::with_record(format!("{record}; t=y"));

    // signature timestamp is 1700000000
    let config = Config {
        fixed_system_time: Some(std::time::UNIX_EPOCH + Duration::from_secs(1600000000)),
        ..Default::default()
    };

    let results = common::verify(&resolver, &signed_message().await, config, 4096).await;

    let result = &results[0];
    assert_eq!(result.status, VerificationStatus::Success);
    assert!(result.is_testing());
    assert_eq!(result.notes, [VerificationNote::TimestampInFuture { timestamp: 1700000000 }]);
}

#[tokio::test(start_paused = true)]
async fn lookup_timeout() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::pending();

    let config = Config {
        timeout: Duration::from_secs(5),
        ..Default::default()
    };

    let results = common::verify(&resolver, &signed_message().await, config, 4096).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, VerificationStatus::Failure(VerifierError::Timeout));
    assert_eq!(results[0].reason(), Some("timeout"));
}

#[tokio::test]
async fn empty_message() {
    let resolver = resolver().await;

    let verifier = Verifier::new(Config::default());

    assert_eq!(verifier.finish(&resolver).await.unwrap_err(), MessageError::EmptyMessage);
}

#[tokio::test]
async fn malformed_header_section() {
    let resolver = resolver().await;

    let mut verifier = Verifier::new(Config::default());
    verifier.message_chunk(b"no colon here\r\n\r\nbody\r\n");

    assert!(matches!(
        verifier.finish(&resolver).await,
        Err(MessageError::MalformedHeader(_))
    ));
}

#[tokio::test]
async fn signatures_beyond_limit_fail() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = resolver().await;

    let mut message = common::make_message();
    for _ in 0..11 {
        let props = common::signing_properties("from, subject").await;
        let output = common::sign(props, &message);
        message = common::signed_message(&output, &message);
    }

    let results = common::verify(&resolver, &message, Config::default(), 4096).await;

    assert_eq!(results.len(), 11);
    assert!(results[..10].iter().all(|r| r.status == VerificationStatus::Success));

    let last = &results[10];
    assert_eq!(last.index, 10);
    assert_eq!(last.status, VerificationStatus::Failure(VerifierError::TooManySignatures));
    assert_eq!(last.reason(), Some("too many signatures"));
    assert_eq!(last.domain, Some(DomainName::new("example.com").unwrap()));

    assert_eq!(summarize(&results), DkimResult::Pass);
}

#[tokio::test]
async fn space_before_header_colon() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = resolver().await;

    let message = b"From: a@example.com\r\nSubject : hi\r\n\r\nbody\r\n";

    let results = common::verify(&resolver, message, Config::default(), 4096).await;
    assert!(results.is_empty());

    let output = common::sign(common::signing_properties("from, subject").await, message);
    let signed = common::signed_message(&output, message);

    let results = common::verify(&resolver, &signed, Config::default(), 4096).await;

    assert_eq!(results[0].status, VerificationStatus::Success);
}
