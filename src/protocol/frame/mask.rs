/// Generate a random frame mask.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    rand::random()
}

/// Mask/unmask a frame.
///
/// Masking is an involution: applying the same key twice restores the input.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    apply_mask_fast32(buf, mask)
}

/// A safe unoptimized mask application.
#[inline]
fn apply_mask_fallback(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Faster version of `apply_mask()` which operates on 4-byte blocks.
#[inline]
fn apply_mask_fast32(buf: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);

    let mut blocks = buf.chunks_exact_mut(4);
    for block in &mut blocks {
        let word = u32::from_ne_bytes([block[0], block[1], block[2], block[3]]) ^ mask_u32;
        block.copy_from_slice(&word.to_ne_bytes());
    }

    // Possible last block with less than 4 bytes.
    apply_mask_fallback(blocks.into_remainder(), mask);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_mask() {
        let mask = [0x6d, 0xb6, 0xb2, 0x80];
        let unmasked = vec![
            0xf3, 0x00, 0x01, 0x02, 0x03, 0x80, 0x81, 0x82, 0xff, 0xfe, 0x00, 0x17, 0x74, 0xf9,
            0x12, 0x03,
        ];

        // Check masking with different alignment.
        for off in 0..=3 {
            let mut masked = unmasked.clone();
            apply_mask_fallback(&mut masked[off..], mask);

            let mut masked_fast = unmasked.clone();
            apply_mask_fast32(&mut masked_fast[off..], mask);

            assert_eq!(masked, masked_fast);
        }
    }

    #[test]
    fn mask_is_symmetric() {
        let mask = generate_mask();
        let original = b"Hello, masked world".to_vec();
        let mut data = original.clone();
        apply_mask(&mut data, mask);
        apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn known_vector() {
        // RFC 6455 section 5.7: masked "Hello".
        let mut data = vec![0x7f, 0x9f, 0x4d, 0x51, 0x58];
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(data, b"Hello");
    }
}
