//! End-to-end tests: chunk a file, inspect the artifacts, rebuild the file.


use haas::digest::chunk_digest;
use haas::{decode, ErrorKind, MessageKind, StorageMode};
use test_helpers::*;

#[tokio::test]
async fn test_network_layout_roundtrip() {
    let (node, temp_dir) = create_test_node().await;
    let content = patterned_bytes(1000, 1);
    let source = write_source(&temp_dir, "thousand.bin", &content);

    let report = node
        .chunk_file(&source, Some(512), Some(StorageMode::Network))
        .await
        .unwrap();

    let meta = &report.metadata;
    assert_eq!(meta.kind, MessageKind::Meta);
    assert_eq!(meta.size, 1000);
    assert_eq!(meta.count, Some(2));
    let sizes: Vec<u32> = meta.pieces.iter().map(|p| p.size).collect();
    assert_eq!(sizes, vec![512, 488]);
    let parts: Vec<u32> = meta.pieces.iter().map(|p| p.part).collect();
    assert_eq!(parts, vec![1, 2]);
    assert_eq!(meta.pieces[0].content_hash, chunk_digest(&content[..512]));
    assert_eq!(meta.pieces[1].content_hash, chunk_digest(&content[512..]));

    // Every network artifact is a self-contained message
    for piece in &meta.pieces {
        let stored = node
            .store()
            .get_network(&report.file_hash, &piece.content_hash)
            .await
            .unwrap();
        let stored_piece = stored.single_piece().unwrap();
        assert_eq!(stored_piece.part, piece.part);
        assert_eq!(stored_piece.data.as_ref().map(Vec::len), Some(piece.size as usize));
    }

    let joined = node
        .join_chunks(&format!("{}.meta", report.file_hash))
        .await
        .unwrap();
    assert_eq!(joined.bytes_written, 1000);
    assert_eq!(std::fs::read(&joined.output_path).unwrap(), content);
}

#[tokio::test]
async fn test_dedup_layout_roundtrip() {
    let (node, temp_dir) = create_test_node().await;
    let content = patterned_bytes(4096 + 17, 2);
    let source = write_source(&temp_dir, "dedup.bin", &content);

    let report = node
        .chunk_file(&source, Some(1024), Some(StorageMode::Dedup))
        .await
        .unwrap();
    assert_eq!(report.metadata.pieces.len(), 5);
    assert_eq!(report.metadata.pieces[4].size, 17);

    let data_dir = node.store().root().join("data");
    let head_dir = node.store().root().join("head");
    assert_eq!(count_entries(&data_dir), 5);
    assert_eq!(count_entries(&head_dir), 5);

    // Headers carry no payload
    for piece in &report.metadata.pieces {
        let head = node
            .store()
            .head_path(&report.file_hash, &piece.content_hash)
            .unwrap();
        let header = decode(&std::fs::read(head).unwrap()).unwrap();
        assert!(header.pieces.iter().all(|p| p.data.is_none()));
    }

    let joined = node.join_chunks(&report.file_hash).await.unwrap();
    assert_eq!(std::fs::read(&joined.output_path).unwrap(), content);
}

#[tokio::test]
async fn test_dedup_shares_blobs_across_files() {
    let (node, temp_dir) = create_test_node().await;
    let shared = patterned_bytes(256, 3);
    let mut first = shared.clone();
    first.extend(patterned_bytes(256, 4));
    let mut second = shared.clone();
    second.extend(patterned_bytes(256, 5));

    let first_path = write_source(&temp_dir, "first.bin", &first);
    let second_path = write_source(&temp_dir, "second.bin", &second);

    let first_report = node
        .chunk_file(&first_path, Some(256), Some(StorageMode::Dedup))
        .await
        .unwrap();
    let second_report = node
        .chunk_file(&second_path, Some(256), Some(StorageMode::Dedup))
        .await
        .unwrap();

    assert_eq!(first_report.blobs_deduplicated, 0);
    assert_eq!(second_report.blobs_deduplicated, 1);
    assert_eq!(count_entries(&node.store().root().join("data")), 3);
    assert_eq!(count_entries(&node.store().root().join("head")), 4);

    let shared_hash = chunk_digest(&shared);
    for report in [&first_report, &second_report] {
        assert!(node
            .store()
            .head_path(&report.file_hash, &shared_hash)
            .unwrap()
            .is_file());
    }

    let joined = node.join_chunks(&second_report.file_hash).await.unwrap();
    assert_eq!(std::fs::read(&joined.output_path).unwrap(), second);
}

#[tokio::test]
async fn test_rechunking_same_file_is_stable() {
    let (node, temp_dir) = create_test_node().await;
    let content = patterned_bytes(3000, 6);
    let source = write_source(&temp_dir, "again.bin", &content);

    let first = node
        .chunk_file(&source, Some(1000), Some(StorageMode::Dedup))
        .await
        .unwrap();
    let second = node
        .chunk_file(&source, Some(1000), Some(StorageMode::Dedup))
        .await
        .unwrap();

    assert_eq!(first.file_hash, second.file_hash);
    assert_eq!(first.metadata, second.metadata);
    assert_eq!(second.blobs_deduplicated, 3);
    assert_eq!(count_entries(&node.store().root().join("data")), 3);
}

#[tokio::test]
async fn test_last_piece_offset() {
    let (node, temp_dir) = create_test_node().await;
    let content = patterned_bytes(3 * 100 + 7, 7);
    let source = write_source(&temp_dir, "tail.bin", &content);

    let report = node
        .chunk_file(&source, Some(100), None)
        .await
        .unwrap();
    let last = report.metadata.pieces.last().unwrap();
    assert_eq!(last.part, 4);
    assert_eq!(last.size, 7);
    assert_eq!(last.content_hash, chunk_digest(&content[300..]));

    let joined = node.join_chunks(&report.file_hash).await.unwrap();
    let rebuilt = std::fs::read(&joined.output_path).unwrap();
    assert_eq!(rebuilt.len(), content.len());
    assert_eq!(&rebuilt[300..], &content[300..]);
    assert_eq!(rebuilt, content);
}

#[tokio::test]
async fn test_exact_multiple_of_chunk_size() {
    let (node, temp_dir) = create_test_node().await;
    let content = patterned_bytes(1024, 12);
    let source = write_source(&temp_dir, "even.bin", &content);

    let report = node.chunk_file(&source, Some(512), None).await.unwrap();
    let sizes: Vec<u32> = report.metadata.pieces.iter().map(|p| p.size).collect();
    assert_eq!(sizes, vec![512, 512]);
    assert_eq!(report.metadata.count, Some(2));

    let joined = node.join_chunks(&report.file_hash).await.unwrap();
    assert_eq!(joined.bytes_written, 1024);
    assert_eq!(std::fs::read(&joined.output_path).unwrap(), content);
}

#[tokio::test]
async fn test_rechunking_restores_lost_blob() {
    let (node, temp_dir) = create_test_node().await;
    let content = patterned_bytes(512, 13);
    let source = write_source(&temp_dir, "lost.bin", &content);
    let chunk_hash = chunk_digest(&content);
    let blob_path = node.store().data_path(&chunk_hash).unwrap();

    node.chunk_file(&source, Some(512), Some(StorageMode::Dedup))
        .await
        .unwrap();
    std::fs::remove_file(&blob_path).unwrap();

    let report = node
        .chunk_file(&source, Some(512), Some(StorageMode::Dedup))
        .await
        .unwrap();
    assert_eq!(report.blobs_deduplicated, 0);
    assert_eq!(std::fs::read(&blob_path).unwrap(), content);

    let joined = node.join_chunks(&report.file_hash).await.unwrap();
    assert_eq!(std::fs::read(&joined.output_path).unwrap(), content);
}

#[tokio::test]
async fn test_chunk_size_larger_than_file() {
    let (node, temp_dir) = create_test_node().await;
    let source = write_source(&temp_dir, "small.txt", b"tiny");

    let report = node.chunk_file(&source, Some(4096), None).await.unwrap();
    assert_eq!(report.metadata.count, Some(1));
    assert_eq!(report.metadata.pieces[0].size, 4);
    assert_eq!(report.metadata.chunk_size, 4096);

    let joined = node.join_chunks(&report.file_hash).await.unwrap();
    assert_eq!(std::fs::read(&joined.output_path).unwrap(), b"tiny");
}

#[tokio::test]
async fn test_default_chunk_size_from_config() {
    let (node, temp_dir) = create_test_node().await;
    let source = write_source(&temp_dir, "defaults.bin", &patterned_bytes(1200, 8));

    let report = node.chunk_file(&source, None, None).await.unwrap();
    assert_eq!(report.metadata.chunk_size, 512);
    assert_eq!(report.metadata.pieces.len(), 3);
}

#[tokio::test]
async fn test_empty_file_rejected() {
    let (node, temp_dir) = create_test_node().await;
    let source = write_source(&temp_dir, "empty.bin", b"");

    let err = node.chunk_file(&source, None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(count_entries(&node.config().meta_root), 0);
}

#[tokio::test]
async fn test_placements_follow_ring() {
    let (node, temp_dir) = create_test_node().await;
    let source = write_source(&temp_dir, "placed.bin", &patterned_bytes(2048, 9));

    let report = node.chunk_file(&source, Some(256), None).await.unwrap();
    assert_eq!(report.placements.len(), report.metadata.pieces.len());

    for (piece, placement) in report.metadata.pieces.iter().zip(&report.placements) {
        assert_eq!(placement.chunk_path.config_id, TEST_CONFIG_ID);
        assert_eq!(placement.chunk_path.chunk_hash, piece.content_hash);
        assert_eq!(placement.host, expected_host(&piece.content_hash));
    }
}

#[tokio::test]
async fn test_join_unknown_file_fails() {
    let (node, _temp_dir) = create_test_node().await;
    let err = node
        .join_chunks(&chunk_digest(b"never chunked"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[tokio::test]
async fn test_join_rejects_corrupted_record() {
    let (node, temp_dir) = create_test_node().await;
    let source = write_source(&temp_dir, "record.bin", &patterned_bytes(600, 10));
    let report = node.chunk_file(&source, None, None).await.unwrap();

    let mut bytes = std::fs::read(&report.meta_path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    std::fs::write(&report.meta_path, bytes).unwrap();

    let err = node.join_chunks(&report.file_hash).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Codec);
}

#[tokio::test]
async fn test_mobilized_buckets_rebuild_file() {
    let (node, temp_dir) = create_test_node().await;
    let content = patterned_bytes(900, 11);
    let source = write_source(&temp_dir, "mobile.bin", &content);

    let report = node
        .chunk_file(&source, Some(300), Some(StorageMode::Dedup))
        .await
        .unwrap();

    // Drop the bucket and rebuild it from the dedup layout
    std::fs::remove_dir_all(node.store().root().join(&report.file_hash)).unwrap();
    for piece in &report.metadata.pieces {
        let path = node
            .mobilize_to_bucket(&report.file_hash, &piece.content_hash)
            .await
            .unwrap();
        assert!(path.is_file());
    }

    let joined = node.join_chunks(&report.file_hash).await.unwrap();
    assert_eq!(std::fs::read(&joined.output_path).unwrap(), content);
}
