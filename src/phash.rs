//! Perceptual hash (spec §4.5, §9): a portable 8×8 average-hash fixed by
//! the specification so dedup behavior does not depend on a particular
//! hashing crate's internals.

use image::{imageops::FilterType, GrayImage};

const HASH_DIM: u32 = 8;

/// Compute the 64-bit average-hash of an already orientation-corrected
/// image. Each of the 64 bits is set iff that cell's luminance is at or
/// above the mean of all 64 cells.
pub fn average_hash(gray: &GrayImage) -> u64 {
    let small = image::imageops::resize(gray, HASH_DIM, HASH_DIM, FilterType::Triangle);
    let pixels: Vec<u32> = small.pixels().map(|p| p.0[0] as u32).collect();
    let mean = pixels.iter().sum::<u32>() as f64 / pixels.len() as f64;

    let mut hash: u64 = 0;
    for (i, &p) in pixels.iter().enumerate() {
        if p as f64 >= mean {
            hash |= 1 << i;
        }
    }
    hash
}

/// Hamming distance between two 64-bit hashes.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Similarity in `[0, 1]` as defined by spec §4.6: `1 - hamming/64`.
pub fn similarity(a: u64, b: u64) -> f64 {
    1.0 - (hamming_distance(a, b) as f64 / 64.0)
}
