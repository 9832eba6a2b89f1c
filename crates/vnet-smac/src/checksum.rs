//! Ones'-complement checksum helpers.
//!
//! Rewrites done by the MAC substitution engine touch fields that are covered
//! by a transport checksum. The checksum is adjusted by the difference between
//! the old and new field sums instead of being recomputed over the packet.

use vnet_core::MacAddr;

use crate::TooShort;

/// Fold a 32-bit accumulator down to 16 bits with end-around carry.
pub fn fold32(sum: u32) -> u16 {
    let mut s = (sum >> 16) + (sum & 0xFFFF);
    s = (s >> 16) + (s & 0xFFFF);
    s as u16
}

/// Ones'-complement sum of a 6-byte MAC, as three big-endian words.
pub fn mac_sum(mac: &[u8; 6]) -> u16 {
    let head = u32::from_be_bytes([mac[0], mac[1], mac[2], mac[3]]);
    let tail = u32::from(u16::from_be_bytes([mac[4], mac[5]]));
    fold32(u32::from(fold32(head)) + tail)
}

/// Adjust `checksum` for a covered region whose sum went from `old_sum` to
/// `new_sum`. Never returns zero.
pub fn adjust_checksum(checksum: u16, old_sum: u16, new_sum: u16) -> u16 {
    // C' = C + old - new, ones'-complement.
    let delta = i32::from(old_sum) - i32::from(new_sum);
    let mut sum = i32::from(checksum) + delta;
    if sum > 0xFFFF {
        // carry out of bit 16 wraps around: -0x10000 + 1
        sum -= 0xFFFF;
    } else if sum < 0 {
        // borrow wraps around: +0x10000 - 1
        sum += 0xFFFF;
    }
    if sum == 0 {
        0xFFFF
    } else {
        sum as u16
    }
}

/// Internet checksum (RFC 1071) of `data`.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let Some(&byte) = chunks.remainder().first() {
        sum += u32::from(byte) << 8;
    }
    !fold32(sum)
}

fn read_u16(frame: &[u8], offset: usize) -> Result<u16, TooShort> {
    let b = frame.get(offset..offset + 2).ok_or(TooShort)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

/// Overwrite the 6-byte field at `mac_offset` with `new_mac` and fix up the
/// checksum stored at `checksum_offset` so it stays valid.
///
/// Both offsets must lie in the same checksummed region. A field at an odd
/// distance from the checksum is summed byte-swapped.
pub fn patch_mac_fix_checksum(
    frame: &mut [u8],
    checksum_offset: usize,
    mac_offset: usize,
    new_mac: &MacAddr,
) -> Result<(), TooShort> {
    let checksum = read_u16(frame, checksum_offset)?;
    let old: [u8; 6] = frame
        .get(mac_offset..mac_offset + 6)
        .ok_or(TooShort)?
        .try_into()
        .map_err(|_| TooShort)?;
    let new = new_mac.octets();

    let mut old_sum = mac_sum(&old);
    let mut new_sum = mac_sum(&new);
    if mac_offset.abs_diff(checksum_offset) % 2 == 1 {
        old_sum = old_sum.swap_bytes();
        new_sum = new_sum.swap_bytes();
    }
    let patched = adjust_checksum(checksum, old_sum, new_sum);

    for (i, byte) in new.iter().enumerate() {
        frame[mac_offset + i] = *byte;
    }
    let [hi, lo] = patched.to_be_bytes();
    frame[checksum_offset] = hi;
    frame[checksum_offset + 1] = lo;
    Ok(())
}

/// Overwrite the 16-bit word at `offset` and adjust the checksum at
/// `checksum_offset`. A zero checksum means "not computed" and is left alone.
pub fn patch_u16_fix_checksum(
    frame: &mut [u8],
    checksum_offset: usize,
    offset: usize,
    value: u16,
) -> Result<(), TooShort> {
    let checksum = read_u16(frame, checksum_offset)?;
    let old = read_u16(frame, offset)?;
    let [hi, lo] = value.to_be_bytes();
    frame[offset] = hi;
    frame[offset + 1] = lo;
    if checksum != 0 {
        let patched = adjust_checksum(checksum, old, value);
        let [hi, lo] = patched.to_be_bytes();
        frame[checksum_offset] = hi;
        frame[checksum_offset + 1] = lo;
    }
    Ok(())
}
