use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use zipblob::store::{BlobStore, S3BlobStore};
use zipblob::{ErrorKind, Settings, ZipService};

/// Test bucket name
const TEST_BUCKET: &str = "zipblob-test-bucket";

/// Helper function to create an S3 client pointing to localstack
async fn create_localstack_client() -> Client {
    let endpoint_url =
        std::env::var("AWS_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_string());

    let config = aws_config::defaults(BehaviorVersion::latest())
        .region("us-east-1")
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .endpoint_url(&endpoint_url)
        .force_path_style(true) // Required for LocalStack
        .build();

    Client::from_conf(s3_config)
}

/// Create the bucket (if needed) and upload the source objects
async fn setup_test_bucket(client: &Client) {
    let resp = client.list_buckets().send().await;
    assert!(
        resp.is_ok(),
        "Failed to connect to Localstack S3. Is it running on localhost:4566?"
    );

    // Ignore "already owned" errors from earlier runs
    let _ = client.create_bucket().bucket(TEST_BUCKET).send().await;

    put(client, "docs/a.txt", Bytes::from_static(b"hello")).await;
    put(client, "docs/b.txt", Bytes::from_static(b"world!")).await;

    // Big enough to span several multipart parts once zipped
    let noisy: Vec<u8> = (0..20 * 1024 * 1024u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
        .collect();
    put(client, "data/noisy.bin", Bytes::from(noisy)).await;
}

async fn put(client: &Client, key: &str, body: Bytes) {
    client
        .put_object()
        .bucket(TEST_BUCKET)
        .key(key)
        .body(body.into())
        .send()
        .await
        .unwrap_or_else(|e| panic!("Failed to upload {key}: {e}"));
}

async fn get(client: &Client, key: &str) -> Vec<u8> {
    client
        .get_object()
        .bucket(TEST_BUCKET)
        .key(key)
        .send()
        .await
        .expect("Failed to get object")
        .body
        .collect()
        .await
        .expect("Failed to read object body")
        .into_bytes()
        .to_vec()
}

async fn archive_keys(client: &Client, prefix: &str) -> Vec<String> {
    client
        .list_objects_v2()
        .bucket(TEST_BUCKET)
        .prefix(prefix)
        .send()
        .await
        .expect("Failed to list objects")
        .contents()
        .iter()
        .filter_map(|o| o.key().map(String::from))
        .collect()
}

fn service(client: Client, prefix: &str) -> ZipService {
    let settings = Settings {
        bucket: TEST_BUCKET.to_string(),
        output_prefix: prefix.to_string(),
        ..Settings::default()
    };
    let store: Arc<dyn BlobStore> = Arc::new(S3BlobStore::from_client(client, TEST_BUCKET.to_string()));
    ZipService::new(store, &settings)
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored --test-threads=1
async fn test_zip_small_objects() {
    let client = create_localstack_client().await;
    setup_test_bucket(&client).await;

    let zips = service(client.clone(), "it-small");
    let output = zips
        .zip_files(&["docs/a.txt", "docs/b.txt"], &CancellationToken::new())
        .await
        .expect("zip should succeed");

    let head = client
        .head_object()
        .bucket(TEST_BUCKET)
        .key(output.as_str())
        .send()
        .await
        .expect("archive should exist");
    assert_eq!(head.content_type(), Some("application/zip"));

    let data = get(&client, output.as_str()).await;
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).unwrap();
    assert_eq!(archive.len(), 2);

    let mut content = String::new();
    archive.by_name("a.txt").unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "hello");

    content.clear();
    archive.by_name("b.txt").unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "world!");
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored --test-threads=1
async fn test_zip_multipart_archive() {
    let client = create_localstack_client().await;
    setup_test_bucket(&client).await;

    let zips = service(client.clone(), "it-large");
    let output = zips
        .zip_files(&["data/noisy.bin", "docs/a.txt"], &CancellationToken::new())
        .await
        .expect("zip should succeed");

    let expected = get(&client, "data/noisy.bin").await;
    let data = get(&client, output.as_str()).await;
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).unwrap();

    let mut content = Vec::new();
    archive.by_name("noisy.bin").unwrap().read_to_end(&mut content).unwrap();
    assert_eq!(content, expected);
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored --test-threads=1
async fn test_missing_source_leaves_no_archive() {
    let client = create_localstack_client().await;
    setup_test_bucket(&client).await;

    let zips = service(client.clone(), "it-missing");
    let err = zips
        .zip_files(&["docs/a.txt", "docs/does-not-exist.txt"], &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceNotFound);
    assert!(archive_keys(&client, "it-missing/").await.is_empty());
    assert_eq!(zips.metrics().snapshot().cleanup_failures, 0);
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored --test-threads=1
async fn test_store_reports_missing_objects() {
    let client = create_localstack_client().await;
    setup_test_bucket(&client).await;

    let store = S3BlobStore::from_client(client, TEST_BUCKET.to_string());
    assert!(store.properties("nope/missing.txt").await.unwrap_err().is_not_found());
    assert!(!store.delete_if_exists("nope/missing.txt").await.unwrap());

    let props = store.properties("docs/b.txt").await.unwrap();
    assert_eq!(props.length, 6);
}
