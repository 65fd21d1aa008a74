//! Integration tests for package download and extraction

mod common;

use common::{build_stored_zip, build_zip, direct_client, StubServer};
use nuget_pm::config::DEFAULT_MAX_EXTRACTED_SIZE;
use nuget_pm::{
    extract_archive, FetchError, IndexConfig, NuGetContentFetcher, PackageIdentity, PackageSource,
};

fn fetcher_for(server: &StubServer, max_size: u64) -> NuGetContentFetcher {
    let index = IndexConfig {
        flat_container_url: server.url("/flat"),
        ..IndexConfig::default()
    };
    NuGetContentFetcher::with_client(direct_client(), &index, max_size)
}

#[test]
fn test_extract_three_entry_package() {
    let dll = vec![0x4d, 0x5a, 0x90, 0x00, 0x03];
    let xml = b"<doc><assembly>Foo</assembly></doc>".to_vec();
    let readme = b"# Foo\n".to_vec();

    let archive = build_zip(&[
        ("lib/net6.0/Foo.dll", &dll),
        ("lib/net6.0/Foo.xml", &xml),
        ("README.md", &readme),
    ]);

    let contents = extract_archive(&archive, DEFAULT_MAX_EXTRACTED_SIZE).unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents.get("lib/net6.0/Foo.dll").unwrap().len(), dll.len());
    assert_eq!(contents.get("lib/net6.0/Foo.xml").unwrap().len(), xml.len());
    assert_eq!(contents.get("README.md").unwrap(), readme.as_slice());

    let assemblies: Vec<&str> = contents.assemblies().map(|(path, _)| path).collect();
    assert_eq!(assemblies, vec!["lib/net6.0/Foo.dll"]);
}

#[test]
fn test_extract_preserves_nested_paths() {
    let archive = build_zip(&[
        ("_rels/.rels", b"rels"),
        ("[Content_Types].xml", b"types"),
        ("lib/netstandard2.0/de/Foo.resources.dll", b"MZ"),
    ]);

    let contents = extract_archive(&archive, DEFAULT_MAX_EXTRACTED_SIZE).unwrap();
    let paths: Vec<&str> = contents.paths().collect();
    assert_eq!(
        paths,
        vec![
            "[Content_Types].xml",
            "_rels/.rels",
            "lib/netstandard2.0/de/Foo.resources.dll"
        ]
    );
}

#[test]
fn test_corrupt_entry_discards_whole_package() {
    let first = b"first file is fine".to_vec();
    let second = b"SECOND-FILE-PAYLOAD-THAT-GETS-DAMAGED".to_vec();
    let mut archive = build_stored_zip(&[("a.txt", &first), ("b.dll", &second)]);

    let offset = archive
        .windows(second.len())
        .position(|w| w == second.as_slice())
        .unwrap();
    archive[offset] ^= 0xff;

    let err = extract_archive(&archive, DEFAULT_MAX_EXTRACTED_SIZE).unwrap_err();
    assert!(err.is_corrupt_archive(), "unexpected error: {}", err);
}

#[test]
fn test_truncated_archive_is_corrupt() {
    let archive = build_zip(&[("lib/a.dll", b"MZ")]);
    let truncated = &archive[..archive.len() / 2];
    let err = extract_archive(truncated, DEFAULT_MAX_EXTRACTED_SIZE).unwrap_err();
    assert!(matches!(err, FetchError::CorruptArchive(_)));
}

#[test]
fn test_highly_compressed_entry_exceeds_unpack_budget() {
    let zeros = vec![0u8; 1024 * 1024];
    let archive = build_zip(&[("README.md", b"hello"), ("lib/huge.dll", &zeros)]);
    assert!(archive.len() < 64 * 1024);

    let err = extract_archive(&archive, 64 * 1024).unwrap_err();
    assert!(matches!(err, FetchError::ExtractedTooLarge { max: 65536 }));
    assert!(err.is_corrupt_archive());

    let contents = extract_archive(&archive, zeros.len() as u64 + 5).unwrap();
    assert_eq!(contents.total_size(), zeros.len() + 5);
}

#[tokio::test]
async fn test_download_enforces_unpack_budget() {
    let zeros = vec![0u8; 512 * 1024];
    let archive = build_zip(&[("lib/net6.0/Bomb.dll", &zeros)]);
    let server =
        StubServer::start(vec![("/flat/bomb/1.0.0/bomb.1.0.0.nupkg", 200, archive)]).await;

    let err = fetcher_for(&server, 1024 * 1024)
        .with_max_extracted_size(4096)
        .download(&PackageIdentity::new("Bomb", "1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::ExtractedTooLarge { max: 4096 }));
}

#[tokio::test]
async fn test_download_from_flat_container() {
    let archive = build_zip(&[("lib/net6.0/Newtonsoft.Json.dll", b"MZ"), ("x.nuspec", b"<p/>")]);
    let server = StubServer::start(vec![(
        "/flat/newtonsoft.json/13.0.3/newtonsoft.json.13.0.3.nupkg",
        200,
        archive.clone(),
    )])
    .await;

    let contents = fetcher_for(&server, 1024 * 1024)
        .download(&PackageIdentity::new("Newtonsoft.Json", "13.0.3"))
        .await
        .unwrap();

    assert_eq!(contents.len(), 2);
    assert_eq!(
        contents.archive_checksum(),
        Some(nuget_pm::fetch::compute_checksum(&archive).as_str())
    );
}

#[tokio::test]
async fn test_download_missing_version() {
    let server = StubServer::start(vec![]).await;

    let err = fetcher_for(&server, 1024)
        .download(&PackageIdentity::new("Foo", "9.9.9"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::PackageNotFound(_)));
}

#[tokio::test]
async fn test_download_server_error() {
    let server = StubServer::start(vec![(
        "/flat/foo/1.0.0/foo.1.0.0.nupkg",
        500,
        b"boom".to_vec(),
    )])
    .await;

    let err = fetcher_for(&server, 1024)
        .download(&PackageIdentity::new("Foo", "1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus { status: 500, .. }));
    assert!(!err.is_corrupt_archive());
}

#[tokio::test]
async fn test_download_respects_size_limit() {
    let archive = build_stored_zip(&[("big.bin", &[7u8; 4096])]);
    let server = StubServer::start(vec![("/flat/big/1.0.0/big.1.0.0.nupkg", 200, archive)]).await;

    let err = fetcher_for(&server, 1024)
        .download(&PackageIdentity::new("Big", "1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::ContentTooLarge { max: 1024, .. }));
}

#[tokio::test]
async fn test_download_garbage_body_is_corrupt() {
    let server = StubServer::start(vec![(
        "/flat/foo/1.0.0/foo.1.0.0.nupkg",
        200,
        b"this is not a zip archive".to_vec(),
    )])
    .await;

    let err = fetcher_for(&server, 1024)
        .download(&PackageIdentity::new("Foo", "1.0.0"))
        .await
        .unwrap_err();
    assert!(err.is_corrupt_archive());
}
