pub mod common;

use common::MockLookup;
use mtadkim::{
    config::{DkimConfig, SignConfig},
    pipeline::{DkimPipeline, SignSkipped},
    sender::{Address, Envelope},
    signer::MissingKeyData,
    verifier::{summarize, DkimResult},
};
use std::path::Path;
use tempfile::TempDir;
use tokio::fs;
use tracing::Span;

fn config(key_dir: &Path) -> DkimConfig {
    DkimConfig {
        sign: SignConfig {
            enabled: true,
            key_dir: key_dir.into(),
            default_key_path: None,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn envelope(sender: &str) -> Envelope {
    Envelope::new(Some(sender.parse::<Address>().unwrap()))
}

async fn key_dir_with_example_com() -> TempDir {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("example.com");
    fs::create_dir(&dir).await.unwrap();
    fs::write(dir.join("private"), common::read_private_key("tests/keys/rsa2048.pem").await)
        .await
        .unwrap();
    fs::write(dir.join("selector"), "sel\n").await.unwrap();
    root
}

#[tokio::test]
async fn sign_and_verify() {
    let _ = tracing_subscriber::fmt::try_init();

    let root = key_dir_with_example_com().await;

    let pipeline = DkimPipeline::load(config(root.path())).await.unwrap();

    let message = common::make_message();
    let (headers, body) = common::split_message(&message);

    // From is joe@football.example.com, signed with the key for example.com
    let mut signer = pipeline
        .prepare_signer(&envelope("bounces@lists.example.org"), headers, Span::current())
        .await
        .unwrap();

    assert_eq!(signer.properties().domain, "example.com");
    assert_eq!(signer.properties().selector, "sel");

    for chunk in body.chunks(3) {
        signer.body_chunk(chunk);
    }
    let output = signer.finish().unwrap();

    let signed = common::signed_message(&output, &message);

    let resolver = MockLookup::with_record(common::key_record("tests/keys/rsa2048pub.pem").await);

    let mut verifier = pipeline.verifier(Span::current());
    verifier.message_chunk(&signed);
    let results = verifier.finish(&resolver).await.unwrap();

    assert_eq!(summarize(&results), DkimResult::Pass);
}

#[tokio::test]
async fn signing_disabled() {
    let root = TempDir::new().unwrap();

    let mut config = config(root.path());
    config.sign.enabled = false;

    let pipeline = DkimPipeline::load(config).await.unwrap();

    let (headers, _) = common::split_message(b"From: me@example.com\r\n\r\n");

    let result = pipeline.prepare_signer(&Envelope::default(), headers, Span::none()).await;

    assert_eq!(result.err(), Some(SignSkipped::Disabled));
}

#[tokio::test]
async fn signing_skipped_without_key() {
    let _ = tracing_subscriber::fmt::try_init();

    let root = TempDir::new().unwrap();

    let pipeline = DkimPipeline::load(config(root.path())).await.unwrap();

    let (headers, _) = common::split_message(b"From: me@unknown.example\r\n\r\n");

    let result = pipeline.prepare_signer(&Envelope::default(), headers, Span::none()).await;

    assert_eq!(
        result.err(),
        Some(SignSkipped::MissingKeyData {
            domain: Some("unknown.example".into()),
            missing: MissingKeyData::PrivateKey,
            notes: vec![],
        })
    );
}

#[tokio::test]
async fn already_signed_by_envelope() {
    let root = key_dir_with_example_com().await;

    let pipeline = DkimPipeline::load(config(root.path())).await.unwrap();

    let (headers, _) = common::split_message(b"From: me@example.com\r\n\r\n");
    let envelope = Envelope {
        already_signed: true,
        ..envelope("me@example.com")
    };

    let result = pipeline.prepare_signer(&envelope, headers, Span::none()).await;

    assert_eq!(result.err(), Some(SignSkipped::AlreadySigned));
}

#[tokio::test]
async fn already_signed_for_domain() {
    let _ = tracing_subscriber::fmt::try_init();

    let root = key_dir_with_example_com().await;

    let pipeline = DkimPipeline::load(config(root.path())).await.unwrap();

    let message = common::make_message();
    let output = common::sign(common::signing_properties("from:subject").await, &message);
    let signed = common::signed_message(&output, &message);

    let (headers, _) = common::split_message(&signed);
    let result = pipeline.prepare_signer(&envelope("joe@football.example.com"), headers, Span::none()).await;

    assert_eq!(result.err(), Some(SignSkipped::AlreadySigned));
    assert_eq!(SignSkipped::AlreadySigned.to_string(), "message already signed");

    // a signature by another domain does not count
    let other = b"DKIM-Signature: v=1; a=rsa-sha256; d=lists.example.org; s=x; h=From; bh=YWJj; b=YWJj\r\n\
        From: me@example.com\r\n\r\n";
    let (headers, _) = common::split_message(other);
    let result = pipeline.prepare_signer(&envelope("me@example.com"), headers, Span::none()).await;

    assert!(result.is_ok());
}
