use super::CellWidth;

/// Zeroes the cells of null values.
///
/// `dst_values` holds cells `width` bytes wide and `non_null_bitmap` has one
/// bit per cell.  For each of the `n_rows` cells starting at `dst_idx` whose
/// non-null bit is clear, sets the cell's bytes to zero.  The scan starts at
/// the byte-aligned cell at or before `dst_idx`, so null cells in
/// `dst_idx & !7..dst_idx` are also zeroed.
pub fn zero_null_values(
    width: CellWidth,
    dst_idx: usize,
    n_rows: usize,
    dst_values: &mut [u8],
    non_null_bitmap: &[u8],
) {
    match width {
        CellWidth::W1 => zero_null_values_impl::<1>(dst_idx, n_rows, dst_values, non_null_bitmap),
        CellWidth::W2 => zero_null_values_impl::<2>(dst_idx, n_rows, dst_values, non_null_bitmap),
        CellWidth::W4 => zero_null_values_impl::<4>(dst_idx, n_rows, dst_values, non_null_bitmap),
        CellWidth::W8 => zero_null_values_impl::<8>(dst_idx, n_rows, dst_values, non_null_bitmap),
        CellWidth::W16 => {
            zero_null_values_impl::<16>(dst_idx, n_rows, dst_values, non_null_bitmap)
        }
    }
}

#[inline(never)]
fn zero_null_values_impl<const W: usize>(
    dst_idx: usize,
    n_rows: usize,
    dst_values: &mut [u8],
    non_null_bitmap: &[u8],
) {
    let aligned_dst_idx = dst_idx & !7;
    let aligned_n_rows = n_rows + (dst_idx - aligned_dst_idx);
    let values = &mut dst_values[aligned_dst_idx * W..];
    for_each_unset_bit(
        &non_null_bitmap[aligned_dst_idx / 8..],
        aligned_n_rows,
        |row| values[row * W..(row + 1) * W].fill(0),
    );
}

/// Calls `f` with the index of each clear bit among the first `n_bits` bits
/// of `bitmap`, in increasing order.
fn for_each_unset_bit(bitmap: &[u8], n_bits: usize, mut f: impl FnMut(usize)) {
    for (word_index, word) in bitmap[..n_bits.div_ceil(8)].chunks(8).enumerate() {
        let mut raw = [0u8; 8];
        raw[..word.len()].copy_from_slice(word);
        let base = word_index * 64;
        let valid_bits = n_bits - base;
        let mask = if valid_bits >= 64 {
            u64::MAX
        } else {
            (1 << valid_bits) - 1
        };
        let mut unset = !u64::from_le_bytes(raw) & mask;
        while unset != 0 {
            f(base + unset.trailing_zeros() as usize);
            unset &= unset - 1;
        }
    }
}
