use mtadkim::{
    header::HeaderFields,
    signer::{Signer, SigningOutput, SigningProperties, Timestamp},
    verifier::{Config, LookupTxt, VerificationResult, Verifier},
};
use std::{
    future::{self, Future},
    io,
    pin::Pin,
    sync::Arc,
};
use tokio::fs;

pub type LookupOutput = Vec<io::Result<Vec<u8>>>;
pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = io::Result<LookupOutput>> + Send + 'a>>;

#[derive(Clone)]
pub struct MockLookup(Arc<dyn Fn(&str) -> LookupFuture<'_> + Send + Sync>);

impl MockLookup {
    pub fn new(f: impl Fn(&str) -> LookupFuture<'_> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A resolver that serves the given key record for `sel._domainkey.example.com`.
    pub fn with_record(record: String) -> Self {
        Self::new(move |name| {
            let answer: io::Result<LookupOutput> = match name {
                "sel._domainkey.example.com" => Ok(vec![Ok(record.clone().into_bytes())]),
                _ => Err(io::ErrorKind::NotFound.into()),
            };
            Box::pin(async move { answer })
        })
    }

    pub fn failing(kind: io::ErrorKind) -> Self {
        Self::new(move |_| {
            let answer: io::Result<LookupOutput> = Err(kind.into());
            Box::pin(async move { answer })
        })
    }

    /// A resolver whose queries never complete.
    pub fn pending() -> Self {
        Self::new(|_| Box::pin(future::pending::<io::Result<LookupOutput>>()))
    }
}

impl LookupTxt for MockLookup {
    type Answer = LookupOutput;
    type Query<'a> = Pin<Box<dyn Future<Output = io::Result<Self::Answer>> + Send + 'a>>;

    fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
        let domain = domain.to_owned();

        Box::pin(async move { self.0(&domain).await })
    }
}

pub async fn read_public_key_base64(file_name: &str) -> io::Result<String> {
    let s = fs::read_to_string(file_name).await?;
    let mut key_base64: Vec<_> = s.lines().skip(1).collect();
    key_base64.pop();
    Ok(key_base64.join(""))
}

pub async fn key_record(file_name: &str) -> String {
    let base64 = read_public_key_base64(file_name).await.unwrap();
    format!("v=DKIM1; k=rsa; p={base64}")
}

pub async fn read_private_key(file_name: &str) -> String {
    fs::read_to_string(file_name).await.unwrap()
}

pub async fn signing_properties(headers: &str) -> SigningProperties {
    let private_key = read_private_key("tests/keys/rsa2048.pem").await;
    SigningProperties::new("example.com", "sel", private_key, headers)
}

pub fn split_message(message: &[u8]) -> (HeaderFields, &[u8]) {
    let i = message
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header/body separator");
    let headers = HeaderFields::from_bytes(&message[..(i + 2)]).unwrap();
    (headers, &message[(i + 4)..])
}

pub fn sign(props: SigningProperties, message: &[u8]) -> SigningOutput {
    let (headers, body) = split_message(message);

    let mut signer = Signer::new(props, headers).with_timestamp(Some(Timestamp::Exact(1700000000)));
    signer.body_chunk(body);
    signer.finish().unwrap()
}

/// Prepends the signature header to the message.
pub fn signed_message(output: &SigningOutput, message: &[u8]) -> Vec<u8> {
    let mut result = output.format_header().into_bytes();
    result.extend(b"\r\n");
    result.extend(message);
    result
}

pub async fn verify<T>(resolver: &T, message: &[u8], config: Config, chunk_len: usize) -> Vec<VerificationResult>
where
    T: LookupTxt + Clone + 'static,
{
    let mut verifier = Verifier::new(config);

    for chunk in message.chunks(chunk_len) {
        verifier.message_chunk(chunk);
    }

    verifier.finish(resolver).await.unwrap()
}

pub fn make_message() -> Vec<u8> {
    b"From: Joe SixPack <joe@football.example.com>\r\n\
To: Suzie Q <suzie@shopping.example.net>\r\n\
Subject: Is dinner ready?\r\n\
Date: Fri, 11 Jul 2003 21:00:37 -0700 (PDT)\r\n\
Message-ID: <20030712040037.46341.5F8J@football.example.com>\r\n\
\r\n\
Hi.\r\n\
\r\n\
We lost the game. Are you hungry yet?\r\n\
\r\n\
Joe.\r\n"
        .to_vec()
}
