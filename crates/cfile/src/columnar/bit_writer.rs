/// Appends bit runs to a little-endian bitmap, 64 bits at a time.
pub(super) struct BitWriter<'a> {
    dst: &'a mut [u8],
    /// Byte offset in `dst` where the next full word will be written.
    pos: usize,
    buffered_values: u64,
    num_buffered_bits: u32,
    flushed: bool,
}

impl<'a> BitWriter<'a> {
    /// Returns a writer that appends to `dst` starting at bit
    /// `skip_initial_bits`.  The bits before that position in the same byte
    /// are preserved.
    pub fn new(dst: &'a mut [u8], skip_initial_bits: usize) -> Self {
        let pos = skip_initial_bits / 8;
        let preexisting_bits = (skip_initial_bits % 8) as u32;
        let mut writer = Self {
            dst,
            pos,
            buffered_values: 0,
            num_buffered_bits: 0,
            flushed: false,
        };
        if preexisting_bits > 0 {
            let preexisting = writer.dst[pos] & ((1u8 << preexisting_bits) - 1);
            writer.put(preexisting as u64, preexisting_bits);
        }
        writer
    }

    /// Appends the low `num_bits` bits of `value`.  Higher bits of `value`
    /// must be zero.
    #[inline(always)]
    pub fn put(&mut self, value: u64, num_bits: u32) {
        debug_assert!(num_bits <= 64);
        debug_assert!(num_bits == 64 || value >> num_bits == 0);
        self.buffered_values |= value << self.num_buffered_bits;
        self.num_buffered_bits += num_bits;
        if self.num_buffered_bits >= 64 {
            self.dst[self.pos..self.pos + 8].copy_from_slice(&self.buffered_values.to_le_bytes());
            self.pos += 8;
            self.num_buffered_bits -= 64;
            let shift = num_bits - self.num_buffered_bits;
            self.buffered_values = value.checked_shr(shift).unwrap_or(0);
        }
    }

    /// Writes out any buffered bits.  Bits past the last one appended, in
    /// the final byte, are zeroed.
    pub fn flush(mut self) {
        let n_bytes = self.num_buffered_bits.div_ceil(8) as usize;
        self.dst[self.pos..self.pos + n_bytes]
            .copy_from_slice(&self.buffered_values.to_le_bytes()[..n_bytes]);
        self.flushed = true;
    }
}

impl Drop for BitWriter<'_> {
    fn drop(&mut self) {
        debug_assert!(
            self.flushed || std::thread::panicking(),
            "BitWriter dropped without flush()"
        );
    }
}
