use std::collections::HashSet;

pub(crate) trait BytesExt {
    /// Xor self with another slice of bytes of equal length
    fn xor<B: AsRef<[u8]>>(&self, other: B) -> Vec<u8>;

    /// The `n`th whole block of `block_size` bytes, if there is one
    fn nth_block(&self, block_size: usize, n: usize) -> Option<&[u8]>;

    /// Whether any two whole blocks are byte-identical
    fn has_repeated_block(&self, block_size: usize) -> bool;

    /// Index of the first block that differs from the same block of `other`
    fn first_differing_block<B: AsRef<[u8]>>(&self, other: B, block_size: usize) -> Option<usize>;
}

fn assert_same_length(a: &[u8], b: &[u8]) {
    assert_eq!(
        a.len(),
        b.len(),
        "Length mismatch: {} != {}",
        a.len(),
        b.len()
    );
}

impl BytesExt for [u8] {
    fn xor<B: AsRef<[u8]>>(&self, other: B) -> Vec<u8> {
        assert_same_length(self, other.as_ref());

        self.iter()
            .zip(other.as_ref().iter())
            .map(|(a, b)| a ^ b)
            .collect()
    }

    fn nth_block(&self, block_size: usize, n: usize) -> Option<&[u8]> {
        self.chunks_exact(block_size).nth(n)
    }

    fn has_repeated_block(&self, block_size: usize) -> bool {
        let blocks = self.chunks_exact(block_size);
        let unique_blocks = blocks.clone().collect::<HashSet<_>>();
        blocks.len() != unique_blocks.len()
    }

    fn first_differing_block<B: AsRef<[u8]>>(&self, other: B, block_size: usize) -> Option<usize> {
        self.chunks(block_size)
            .zip(other.as_ref().chunks(block_size))
            .position(|(a, b)| a != b)
    }
}
