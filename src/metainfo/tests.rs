use sha1::{Digest, Sha1};

use super::*;
use crate::bencode::value_span;

fn single_file_torrent() -> Vec<u8> {
    // 3 pieces of 16 KiB covering a 40 KiB file.
    let mut data = Vec::new();
    data.extend_from_slice(b"d8:announce31:http://tracker.example/announce4:infod");
    data.extend_from_slice(b"6:lengthi40960e4:name8:test.bin12:piece lengthi16384e6:pieces60:");
    data.extend_from_slice(&[0u8; 60]);
    data.extend_from_slice(b"ee");
    data
}

fn multi_file_torrent() -> Vec<u8> {
    // Two files of 20 KiB under "album", piece length 32 KiB -> 2 pieces.
    let mut data = Vec::new();
    data.extend_from_slice(b"d4:infod5:filesl");
    data.extend_from_slice(b"d6:lengthi20480e4:pathl5:a.mp3eed6:lengthi20480e4:pathl5:b.mp3ee");
    data.extend_from_slice(b"e4:name5:album12:piece lengthi32768e6:pieces40:");
    data.extend_from_slice(&[0u8; 40]);
    data.extend_from_slice(b"ee");
    data
}

#[test]
fn test_parse_single_file() {
    let data = single_file_torrent();
    let meta = Metainfo::from_bytes(&data).unwrap();

    assert_eq!(meta.name, "test.bin");
    assert_eq!(meta.piece_length, 16384);
    assert_eq!(meta.piece_count(), 3);
    assert_eq!(meta.total_length, 40960);
    assert_eq!(meta.files.len(), 1);
    assert_eq!(meta.files[0].path.to_str(), Some("test.bin"));
    assert_eq!(meta.files[0].offset, 0);
    assert_eq!(
        meta.announce_list,
        vec![vec!["http://tracker.example/announce".to_string()]]
    );
}

#[test]
fn test_parse_multi_file_offsets() {
    let data = multi_file_torrent();
    let meta = Metainfo::from_bytes(&data).unwrap();

    assert_eq!(meta.files.len(), 2);
    assert_eq!(meta.files[0].path.to_str(), Some("album/a.mp3"));
    assert_eq!(meta.files[0].offset, 0);
    assert_eq!(meta.files[1].path.to_str(), Some("album/b.mp3"));
    assert_eq!(meta.files[1].offset, 20480);
    assert_eq!(meta.total_length, 40960);
}

#[test]
fn test_info_hash_is_sha1_of_verbatim_info() {
    let data = single_file_torrent();
    let meta = Metainfo::from_bytes(&data).unwrap();

    let span = value_span(&data, b"info").unwrap().unwrap();
    let mut hasher = Sha1::new();
    hasher.update(&data[span]);
    let expected: [u8; 20] = hasher.finalize().into();

    assert_eq!(meta.info_hash.as_bytes(), &expected);
}

#[test]
fn test_piece_sizes() {
    let data = single_file_torrent();
    let meta = Metainfo::from_bytes(&data).unwrap();

    assert_eq!(meta.piece_size(0), 16384);
    assert_eq!(meta.piece_size(1), 16384);
    assert_eq!(meta.piece_size(2), 8192);
    assert_eq!(meta.block_count(0), 1);
    assert_eq!(meta.block_size(2, 0), 8192);
}

#[test]
fn test_rejects_bad_piece_table() {
    // 40 KiB payload needs 3 pieces of 16 KiB; claim only 2.
    let mut data = Vec::new();
    data.extend_from_slice(b"d4:infod");
    data.extend_from_slice(b"6:lengthi40960e4:name8:test.bin12:piece lengthi16384e6:pieces40:");
    data.extend_from_slice(&[0u8; 40]);
    data.extend_from_slice(b"ee");

    assert!(matches!(
        Metainfo::from_bytes(&data),
        Err(MetainfoError::InvalidField("pieces"))
    ));
}

#[test]
fn test_rejects_pieces_not_multiple_of_20() {
    let mut data = Vec::new();
    data.extend_from_slice(b"d4:infod");
    data.extend_from_slice(b"6:lengthi100e4:name1:x12:piece lengthi100e6:pieces19:");
    data.extend_from_slice(&[0u8; 19]);
    data.extend_from_slice(b"ee");

    assert!(Metainfo::from_bytes(&data).is_err());
}

#[test]
fn test_rejects_zero_piece_length() {
    let mut data = Vec::new();
    data.extend_from_slice(b"d4:infod");
    data.extend_from_slice(b"6:lengthi0e4:name1:x12:piece lengthi0e6:pieces0:ee");

    assert!(Metainfo::from_bytes(&data).is_err());
}

#[test]
fn test_rejects_traversal_path() {
    let mut data = Vec::new();
    data.extend_from_slice(b"d4:infod5:filesl");
    data.extend_from_slice(b"d6:lengthi100e4:pathl2:..6:escapeee");
    data.extend_from_slice(b"e4:name3:bad12:piece lengthi100e6:pieces20:");
    data.extend_from_slice(&[0u8; 20]);
    data.extend_from_slice(b"ee");

    assert!(matches!(
        Metainfo::from_bytes(&data),
        Err(MetainfoError::UnsafePath(_))
    ));
}

#[test]
fn test_from_raw_info_matches_torrent_parse() {
    let data = single_file_torrent();
    let meta = Metainfo::from_bytes(&data).unwrap();

    let rebuilt = Metainfo::from_raw_info(
        meta.raw_info(),
        vec!["udp://tracker.example:6969".to_string()],
    )
    .unwrap();

    assert_eq!(rebuilt.info_hash, meta.info_hash);
    assert_eq!(rebuilt.piece_count(), meta.piece_count());
    assert_eq!(
        rebuilt.announce_list,
        vec![vec!["udp://tracker.example:6969".to_string()]]
    );
}

#[test]
fn test_magnet_parse_hex() {
    let magnet = MagnetLink::parse(
        "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a\
         &dn=Example&tr=http%3A%2F%2Ftracker.example.com%2Fannounce&tr=udp%3A%2F%2Ft2%3A80",
    )
    .unwrap();

    assert_eq!(
        magnet.info_hash.to_hex(),
        "c12fe1c06bba254a9dc9f519b335aa7c1367a88a"
    );
    assert_eq!(magnet.display_name.as_deref(), Some("Example"));
    assert_eq!(
        magnet.trackers,
        vec![
            "http://tracker.example.com/announce".to_string(),
            "udp://t2:80".to_string(),
        ]
    );
}

#[test]
fn test_magnet_parse_base32() {
    // base32 of twenty 'a' bytes (0x61).
    let magnet =
        MagnetLink::parse("magnet:?xt=urn:btih:MFQWCYLBMFQWCYLBMFQWCYLBMFQWCYLB").unwrap();
    assert_eq!(magnet.info_hash.as_bytes(), &[0x61u8; 20]);
}

#[test]
fn test_magnet_rejects_bad_input() {
    assert!(MagnetLink::parse("http://not-a-magnet").is_err());
    assert!(MagnetLink::parse("magnet:?dn=NoHash").is_err());
    assert!(MagnetLink::parse("magnet:?xt=urn:btih:tooshort").is_err());
}

#[test]
fn test_info_hash_encodings() {
    let hash = InfoHash::from_bytes([0xab; 20]);
    assert_eq!(hash.to_hex(), "abababababababababababababababababababab");
    assert!(hash.url_encode().starts_with("%ab%ab"));
    assert_eq!(InfoHash::from_hex(&hash.to_hex()).unwrap(), hash);
    assert!(InfoHash::from_hex("xyz").is_err());
}
