//! Symmetric nibble cipher used for every payload exchanged with the machine.
//!
//! The transform works on 4-bit nibbles (high nibble first), mixing each one
//! through two fixed permutation tables together with the session key and a
//! running nibble counter. The counter makes the output position-dependent:
//! equal nibbles at different offsets encrypt differently. For a fixed key
//! the transform is its own inverse, so the same routine decrypts the status
//! frames the machine sends back.

const NUMB1: [i32; 16] = [14, 4, 3, 2, 1, 13, 8, 11, 6, 15, 12, 7, 10, 5, 0, 9];
const NUMB2: [i32; 16] = [10, 6, 13, 12, 14, 11, 1, 9, 15, 7, 0, 5, 3, 2, 4, 8];

// All intermediate sums are reduced to a byte first and then to a nibble,
// wrapping negatives up into [0, 16).
fn nib(i: i32) -> usize {
    (i.rem_euclid(256) % 16) as usize
}

fn shuffle(src: i32, cnt: i32, key_hi: i32, key_lo: i32) -> u8 {
    let i1 = ((cnt >> 4) % 256) % 16;
    let i2 = NUMB1[nib(src + cnt + key_hi)];
    let i3 = NUMB2[nib(i2 + key_lo + i1 - cnt - key_hi)];
    let i4 = NUMB1[nib(i3 + key_hi + cnt - key_lo - i1)];
    nib(i4 - cnt - key_hi) as u8
}

/// Encrypt or decrypt `data` with the given key byte; the transform is a
/// self-inverse, so one routine serves both directions.
pub fn encdec(data: &[u8], key: u8) -> Vec<u8> {
    let key_hi = i32::from(key >> 4);
    let key_lo = i32::from(key & 0xF);
    let mut cnt = 0;
    let mut dst = Vec::with_capacity(data.len());
    for &b in data {
        let hi = shuffle(i32::from(b >> 4), cnt, key_hi, key_lo);
        cnt += 1;
        let lo = shuffle(i32::from(b & 0xF), cnt, key_hi, key_lo);
        cnt += 1;
        dst.push((hi << 4) | lo);
    }
    dst
}

/// Build the wire payload for an outbound command: byte 0 carries the key
/// the frame was encrypted with, then the whole frame goes through the
/// cipher.
pub fn encrypt_command(data: &[u8], key: u8) -> Vec<u8> {
    let mut data = data.to_vec();
    if let Some(first) = data.first_mut() {
        *first = key;
    }
    encdec(&data, key)
}
