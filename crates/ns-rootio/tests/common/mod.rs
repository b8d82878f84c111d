//! Byte builders shared by the integration tests.

#![allow(dead_code)]

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;

pub const KEY_LEN: i16 = 64;

pub struct Key {
    pub bytes_total: i32,
    pub object_len: i32,
    pub entry_size: i32,
    pub entry_count: i32,
    pub last_offset: i32,
}

pub fn key_bytes(k: &Key) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&k.bytes_total.to_be_bytes());
    out.extend_from_slice(&4i16.to_be_bytes());
    out.extend_from_slice(&k.object_len.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&KEY_LEN.to_be_bytes());
    out.extend_from_slice(&1i16.to_be_bytes());
    // Class name, name and title are never looked at.
    out.resize(KEY_LEN as usize - 19, b'.');
    out.extend_from_slice(&3u16.to_be_bytes());
    out.extend_from_slice(&32000i32.to_be_bytes());
    out.extend_from_slice(&k.entry_size.to_be_bytes());
    out.extend_from_slice(&k.entry_count.to_be_bytes());
    out.extend_from_slice(&k.last_offset.to_be_bytes());
    out.push(0);
    assert_eq!(out.len(), KEY_LEN as usize);
    out
}

/// Entry data for `entries` plus the footer that indexes it.
pub fn data_and_footer(entries: &[&[u8]]) -> (Vec<u8>, Vec<u8>) {
    let mut data = Vec::new();
    let mut footer = ((entries.len() + 1) as i32).to_be_bytes().to_vec();
    for e in entries {
        footer.extend_from_slice(&(data.len() as i32 + i32::from(KEY_LEN)).to_be_bytes());
        data.extend_from_slice(e);
    }
    footer.extend_from_slice(&0i32.to_be_bytes());
    (data, footer)
}

pub fn zlib_block(raw: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(raw).unwrap();
    let compressed = enc.finish().unwrap();
    let mut block = b"ZL\x08".to_vec();
    block.extend_from_slice(&(compressed.len() as u32).to_le_bytes()[..3]);
    block.extend_from_slice(&(raw.len() as u32).to_le_bytes()[..3]);
    block.extend(compressed);
    block
}

/// A free-standing basket; with `split_at`, the payload is two zlib blocks
/// split at that byte.
pub fn free_standing(entries: &[&[u8]], split_at: Option<usize>) -> Vec<u8> {
    let (data, footer) = data_and_footer(entries);
    let mut raw = data.clone();
    raw.extend_from_slice(&footer);

    let payload = match split_at {
        None => raw.clone(),
        Some(at) => {
            let mut blocks = zlib_block(&raw[..at]);
            blocks.extend(zlib_block(&raw[at..]));
            blocks
        }
    };
    let mut out = key_bytes(&Key {
        bytes_total: i32::from(KEY_LEN) + payload.len() as i32,
        object_len: raw.len() as i32,
        entry_size: 0,
        entry_count: entries.len() as i32,
        last_offset: i32::from(KEY_LEN) + data.len() as i32,
    });
    out.extend(payload);
    out
}

/// An embedded basket: key, footer, second key, data.
pub fn embedded(entries: &[&[u8]]) -> Vec<u8> {
    let (data, footer) = data_and_footer(entries);
    let key = Key {
        bytes_total: i32::from(KEY_LEN),
        object_len: data.len() as i32,
        entry_size: 0,
        entry_count: entries.len() as i32,
        last_offset: i32::from(KEY_LEN) + data.len() as i32,
    };
    let mut out = key_bytes(&key);
    // The footer's last word overlaps the start of the second key.
    out.extend_from_slice(&footer[..footer.len() - 4]);
    out.extend(key_bytes(&key));
    out.extend(data);
    out
}

/// An object with a byte-count/version header around `body`.
pub fn obj(version: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(0x4000_0000u32 | (2 + body.len() as u32)).to_be_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(body);
    out
}
