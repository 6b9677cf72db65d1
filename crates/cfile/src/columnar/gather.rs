use super::CellWidth;

/// Gathers selected cells into a dense buffer.
///
/// Copies cell `sel_rows[i]` of `src`, which holds cells `width` bytes wide,
/// to cell `i` of `dst`.  `dst` must hold at least `sel_rows.len()` cells.
///
/// # Panic
///
/// Panics if a selected row lies outside `src`.
pub fn copy_selected_rows(sel_rows: &[u16], width: CellWidth, src: &[u8], dst: &mut [u8]) {
    match width {
        CellWidth::W1 => copy_selected_rows_impl::<1>(sel_rows, src, dst),
        CellWidth::W2 => copy_selected_rows_impl::<2>(sel_rows, src, dst),
        CellWidth::W4 => copy_selected_rows_impl::<4>(sel_rows, src, dst),
        CellWidth::W8 => copy_selected_rows_impl::<8>(sel_rows, src, dst),
        CellWidth::W16 => copy_selected_rows_impl::<16>(sel_rows, src, dst),
    }
}

#[inline(never)]
fn copy_selected_rows_impl<const W: usize>(sel_rows: &[u16], src: &[u8], dst: &mut [u8]) {
    assert!(dst.len() >= sel_rows.len() * W);
    for (&row, cell) in sel_rows.iter().zip(dst.chunks_exact_mut(W)) {
        let start = row as usize * W;
        cell.copy_from_slice(&src[start..start + W]);
    }
}
