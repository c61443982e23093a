/// The sixteen reserved GREASE identifiers (RFC 8701) that clients sprinkle
/// into cipher suite and extension lists.
pub const GREASE_VALUES: [u16; 16] = [
    0x0a0a, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a, 0x9a9a, 0xaaaa, 0xbaba,
    0xcaca, 0xdada, 0xeaea, 0xfafa,
];

/// Check if a u16 value is a GREASE value: both bytes equal, low nibble 0xA.
pub fn is_grease(val: u16) -> bool {
    let [hi, lo] = val.to_be_bytes();
    hi == lo && (lo & 0x0f) == 0x0a
}

/// Copy of `values` with GREASE entries removed, relative order preserved.
pub fn strip_grease(values: &[u16]) -> Vec<u16> {
    values.iter().copied().filter(|v| !is_grease(*v)).collect()
}
