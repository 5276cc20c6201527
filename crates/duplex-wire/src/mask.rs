/// XOR `buf` in place with the repeating 4-byte `mask`.
///
/// Masking is an involution, so the same call both masks outbound client
/// payloads and unmasks inbound ones. Whole 32-bit words are processed at a
/// time; the tail falls back to byte-wise XOR.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);

    let mut words = buf.chunks_exact_mut(4);
    for word in &mut words {
        let value = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) ^ mask_u32;
        word.copy_from_slice(&value.to_ne_bytes());
    }

    // the remainder always starts on a multiple of four
    apply_mask_fallback(words.into_remainder(), mask);
}

/// A safe unoptimized mask application.
#[inline(always)]
fn apply_mask_fallback(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
