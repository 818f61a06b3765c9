//! Merge flash images into a single image written at address zero
//!
//! A bootloader, partition table and application are normally written at
//! separate flash offsets. Merging them, padding the gaps with erased flash
//! (`0xFF`), produces one image that can be flashed in a single write.

use std::{num::ParseIntError, path::PathBuf};

use crate::error::Error;

/// Value of erased flash
const ERASED: u8 = 0xFF;

/// Largest flash supported by the targeted chips
pub const MAX_FLASH_SIZE: u32 = 16 * 1024 * 1024;

/// Standard ESP-IDF image offsets
pub const BOOTLOADER_ADDR: u32 = 0x0;
pub const PARTITION_TABLE_ADDR: u32 = 0x8000;
pub const NVS_ADDR: u32 = 0x9000;
pub const PHY_INIT_ADDR: u32 = 0xf000;
pub const APP_ADDR: u32 = 0x10000;

/// Merge images given as `(address, data)` pairs
///
/// The images are laid out in address order. Gaps between them are filled
/// with `0xFF`, and the result ends with the last image.
pub fn merge_images(parts: &[(u32, Vec<u8>)]) -> Result<Vec<u8>, Error> {
    if parts.is_empty() {
        return Err(Error::NothingToMerge);
    }

    let mut sorted = parts.iter().collect::<Vec<_>>();
    sorted.sort_by_key(|(addr, _)| *addr);

    let mut merged = Vec::new();
    for (addr, data) in sorted {
        let offset = *addr as usize;
        if offset < merged.len() {
            return Err(Error::OverlappingImages { addr: *addr });
        }
        if offset.saturating_add(data.len()) > MAX_FLASH_SIZE as usize {
            return Err(Error::ImageOutOfRange { addr: *addr });
        }

        merged.resize(offset, ERASED);
        merged.extend_from_slice(data);
    }

    Ok(merged)
}

/// An image to merge, given on the command line as `ADDR=FILE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSpec {
    pub addr: u32,
    pub path: PathBuf,
}

/// Parse an `ADDR=FILE` image specification; the address may be decimal or
/// `0x` prefixed hexadecimal and must lie within [MAX_FLASH_SIZE]
pub fn parse_part(spec: &str) -> Result<PartSpec, Error> {
    let invalid = || Error::InvalidPartSpec(spec.to_owned());

    let (addr, path) = spec.split_once('=').ok_or_else(invalid)?;
    if path.is_empty() {
        return Err(invalid());
    }
    let addr = parse_u32(addr.trim()).map_err(|_| invalid())?;
    if addr >= MAX_FLASH_SIZE {
        return Err(invalid());
    }

    Ok(PartSpec {
        addr,
        path: PathBuf::from(path),
    })
}

fn parse_u32(input: &str) -> Result<u32, ParseIntError> {
    match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    }
}
