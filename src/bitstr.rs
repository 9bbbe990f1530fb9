//! Bit-granular copies between byte buffers.
//!
//! Bits are numbered most-significant first within each byte, so bit 0 of a
//! buffer is the high bit of byte 0.

#[inline]
fn get_bit(src: &[u8], bit: u64) -> bool {
    let byte = src[(bit >> 3) as usize];
    byte & (0x80 >> (bit & 7)) != 0
}

#[inline]
fn set_bit(dst: &mut [u8], bit: u64, on: bool) {
    let mask = 0x80u8 >> (bit & 7);
    let byte = &mut dst[(bit >> 3) as usize];
    if on {
        *byte |= mask;
    } else {
        *byte &= !mask;
    }
}

/// Copy `nbits` bits from `src` starting at bit `soff` into `dst` starting at
/// bit `doff`. Bits of `dst` outside the destination range are preserved.
///
/// Panics if either range runs past the end of its buffer.
pub fn bitcpy(dst: &mut [u8], doff: u64, src: &[u8], soff: u64, nbits: u64) {
    if nbits == 0 {
        return;
    }
    assert!(doff + nbits <= dst.len() as u64 * 8, "bitcpy: destination overrun");
    assert!(soff + nbits <= src.len() as u64 * 8, "bitcpy: source overrun");

    let mut copied = 0u64;

    // both sides byte aligned: move whole bytes at once
    if doff & 7 == 0 && soff & 7 == 0 {
        let whole = (nbits >> 3) as usize;
        let d = (doff >> 3) as usize;
        let s = (soff >> 3) as usize;
        dst[d..d + whole].copy_from_slice(&src[s..s + whole]);
        copied = (whole as u64) << 3;
    }

    while copied < nbits {
        let on = get_bit(src, soff + copied);
        set_bit(dst, doff + copied, on);
        copied += 1;
    }
}

/// Number of bytes needed to hold `bits` bits
#[inline]
pub fn bytes_for_bits(bits: u64) -> usize {
    ((bits + 7) >> 3) as usize
}
