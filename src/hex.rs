/// Lowercase hex rendering, used to show ciphertext blocks in log events.
pub(crate) fn hex_encode<B: AsRef<[u8]>>(data: B) -> String {
    data.as_ref()
        .iter()
        .flat_map(|byte| [byte >> 4, byte & 0b0000_1111])
        .map(|nibble| {
            if nibble < 10 {
                b'0' + nibble
            } else {
                b'a' + nibble - 10
            }
        })
        .map(char::from)
        .collect()
}
