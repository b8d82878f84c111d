//! Integration tests: basket layouts as ROOT writes them, built byte by byte.

mod common;

use common::{KEY_LEN, Key, embedded, free_standing, key_bytes};
use ns_rootio::{
    Algorithm, Basket, BasketContext, RootDecompressor, RootError, decode_baskets,
};

#[test]
fn uncompressed_basket_splits_data_and_offsets() {
    let bytes = free_standing(&[&b"ab"[..], &b""[..], &b"cdef"[..]], None);
    let basket = Basket::decode(&bytes, &BasketContext::numbered(2), &RootDecompressor).unwrap();

    assert!(!basket.is_embedded());
    assert_eq!(basket.basket_num(), Some(2));
    assert_eq!(basket.num_entries(), 3);
    assert_eq!(basket.border(), 6);
    assert_eq!(basket.data(), Some(&b"abcdef"[..]));
    assert_eq!(basket.byte_offsets(), Some(&[0, 2, 2, 6][..]));
    assert_eq!(basket.entry(2), Some(&b"cdef"[..]));
    assert!(basket.block_compression_info().is_none());
    assert_eq!(basket.raw_data().map(<[u8]>::len), Some(6 + 4 * 5));
}

#[test]
fn compressed_basket_accounts_for_every_block() {
    let payload = vec![b'x'; 300];
    let entries: Vec<&[u8]> = payload.chunks(100).collect();
    let bytes = free_standing(&entries, Some(150));
    let basket = Basket::decode(&bytes, &BasketContext::default(), &RootDecompressor).unwrap();

    assert_eq!(basket.data().map(<[u8]>::len), Some(300));
    assert_eq!(basket.byte_offsets(), Some(&[0, 100, 200, 300][..]));

    let blocks = basket.block_compression_info().unwrap();
    assert_eq!(blocks.len(), 2);
    assert!(blocks.iter().all(|b| b.algorithm == Algorithm::Zlib));
    let header = basket.header();
    let compressed: usize = blocks.iter().map(|b| b.compressed_size).sum();
    let uncompressed: usize = blocks.iter().map(|b| b.uncompressed_size).sum();
    assert_eq!(compressed as i64, header.compressed_bytes() - i64::from(header.key_len));
    assert_eq!(uncompressed as i64, header.uncompressed_bytes() - i64::from(header.key_len));
}

#[test]
fn embedded_basket_reads_footer_then_data() {
    let bytes = embedded(&[&b"one"[..], &b"three"[..]]);
    let basket = Basket::decode(&bytes, &BasketContext::default(), &RootDecompressor).unwrap();

    assert!(basket.is_embedded());
    assert_eq!(basket.byte_offsets(), Some(&[0, 3, 8][..]));
    assert_eq!(basket.entry(0), Some(&b"one"[..]));
    assert_eq!(basket.entry(1), Some(&b"three"[..]));
    assert!(basket.raw_data().is_none());
}

#[test]
fn truncated_compressed_payload_is_an_error() {
    let mut bytes = free_standing(&[&[7u8; 64][..]], Some(10));
    let cut = bytes.len() - 5;
    bytes.truncate(cut);
    let err = Basket::decode(&bytes, &BasketContext::default(), &RootDecompressor).unwrap_err();
    assert!(matches!(err, RootError::BufferUnderflow { .. } | RootError::Decompression(_)));
}

#[test]
fn negative_border_is_an_error() {
    let mut bytes = key_bytes(&Key {
        bytes_total: i32::from(KEY_LEN) + 4,
        object_len: 4,
        entry_size: 4,
        entry_count: 1,
        last_offset: 10,
    });
    bytes.extend_from_slice(&[0u8; 4]);
    let err = Basket::decode(&bytes, &BasketContext::default(), &RootDecompressor).unwrap_err();
    assert!(matches!(err, RootError::Deserialization(_)));
}

#[test]
fn many_baskets_decode_in_order_on_the_pool() {
    let mut source = vec![0u8; 16];
    let mut seeks = Vec::new();
    let mut expected = Vec::new();
    for i in 0..12u8 {
        seeks.push(source.len() as u64);
        let entry = vec![i; usize::from(i) + 1];
        if i % 3 == 0 {
            source.extend(embedded(&[entry.as_slice()]));
        } else {
            source.extend(free_standing(&[entry.as_slice()], (i % 2 == 0).then_some(1)));
        }
        expected.push(entry);
    }

    for parallel in [false, true] {
        let baskets =
            decode_baskets(&source, &seeks, &BasketContext::default(), &RootDecompressor, parallel)
                .unwrap();
        assert_eq!(baskets.len(), 12);
        for (i, (basket, entry)) in baskets.iter().zip(&expected).enumerate() {
            assert_eq!(basket.basket_num(), Some(i));
            assert_eq!(basket.entry(0), Some(entry.as_slice()));
        }
    }
}

#[test]
fn seek_past_the_source_is_an_error() {
    let source = free_standing(&[&b"z"[..]], None);
    let err = decode_baskets(&source, &[10_000], &BasketContext::default(), &RootDecompressor, false)
        .unwrap_err();
    assert!(matches!(err, RootError::BufferUnderflow { .. }));
}
