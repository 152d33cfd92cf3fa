use super::packet::HEADER_LEN;

/// Repeating XOR key: the ASCII of the vendor brand.
pub const MASK: &[u8; 7] = b"Growatt";

/// XORs every byte after the header with the cycling mask. Applying it a
/// second time restores the input.
pub fn scramble(frame: &[u8]) -> Vec<u8> {
    let split = frame.len().min(HEADER_LEN);
    let (header, body) = frame.split_at(split);

    header
        .iter()
        .copied()
        .chain(body.iter().zip(MASK.iter().cycle()).map(|(b, m)| b ^ m))
        .collect()
}
