//! Placement through a node whose ring is loaded from YAML


use haas::digest::chunk_digest;
use haas::{ErrorKind, HaasConfig, HaasError, HaasNode, PlacementError};
use tempfile::TempDir;
use test_helpers::*;

#[tokio::test]
async fn test_bucket_path_is_deterministic() {
    let (node, _temp_dir) = create_test_node().await;

    for seed in 0..32u8 {
        let chunk_hash = chunk_digest(&patterned_bytes(64, seed));
        let first = node.bucket_path(&chunk_hash).unwrap();
        let second = node.bucket_path(&chunk_hash).unwrap();
        assert_eq!(first, second);

        let rendered = first.to_string();
        assert!(rendered.starts_with(&format!("{}-", TEST_CONFIG_ID)));
        assert!(rendered.ends_with(&chunk_hash));
        assert_eq!(node.where_to(&rendered).unwrap().host, expected_host(&chunk_hash));
    }
}

#[tokio::test]
async fn test_every_prefix_has_a_host() {
    let (node, _temp_dir) = create_test_node().await;

    for digit in "0123456789abcdef".chars() {
        let chunk_hash = format!("{}{}", digit, "0".repeat(63));
        let placement = node
            .where_to(&node.bucket_path(&chunk_hash).unwrap().to_string())
            .unwrap();
        assert_eq!(placement.host, expected_host(&chunk_hash));
    }
}

#[tokio::test]
async fn test_stale_config_id_rejected() {
    let (node, _temp_dir) = create_test_node().await;
    let chunk_hash = chunk_digest(b"stale");
    let cpath = node.bucket_path(&chunk_hash).unwrap();

    let stale = format!("ring6-{}-{}", cpath.node_id, chunk_hash);
    let err = node.where_to(&stale).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigMismatch);
}

#[tokio::test]
async fn test_node_without_host() {
    let (node, _temp_dir) = create_test_node().await;
    let cpath = format!("{}-n99-{}", TEST_CONFIG_ID, chunk_digest(b"orphan"));

    let err = node.where_to(&cpath).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoTargetFound);
    assert!(matches!(
        err,
        HaasError::Placement(PlacementError::NoTargetFound { .. })
    ));
}

#[tokio::test]
async fn test_prefix_missing_from_table() {
    let mut ring = test_ring();
    ring.hash_table.remove("a");
    let (node, _temp_dir) = create_node_with_ring(&ring).await;

    let chunk_hash = format!("a{}", "1".repeat(63));
    let err = node.bucket_path(&chunk_hash).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoTargetFound);
}

#[tokio::test]
async fn test_malformed_chunk_paths() {
    let (node, _temp_dir) = create_test_node().await;

    for cpath in ["", "ring7", "ring7-n1", "ring7--abc", "ring7-n1-abc-def"] {
        let err = node.where_to(cpath).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity, "cpath {:?}", cpath);
    }
}

#[tokio::test]
async fn test_wider_ring_prefix() {
    let mut ring = test_ring();
    ring.ring_size = 2;
    ring.hash_table = ring
        .hash_table
        .into_iter()
        .flat_map(|(prefix, node)| {
            "0123456789abcdef"
                .chars()
                .map(move |second| (format!("{}{}", prefix, second), node.clone()))
                .collect::<Vec<_>>()
        })
        .collect();
    let (node, _temp_dir) = create_node_with_ring(&ring).await;

    let chunk_hash = chunk_digest(b"two character prefix");
    let placement = node
        .where_to(&node.bucket_path(&chunk_hash).unwrap().to_string())
        .unwrap();
    assert_eq!(placement.host, expected_host(&chunk_hash));
}

#[tokio::test]
async fn test_missing_ring_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = HaasConfig::new(temp_dir.path().join("node"));

    let err = HaasNode::from_config(config).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_ring_with_separator_in_id_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let mut ring = test_ring();
    ring.config_id = "ring-7".to_string();
    ring.save_to_file(&config.ring_config).unwrap();

    let err = HaasNode::from_config(config).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
