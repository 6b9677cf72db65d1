use super::{
    bit_writer::BitWriter,
    pext::{selected_pext_method, Pext, PextMethod, SimplePext},
};

#[cfg(target_arch = "x86_64")]
use super::pext::{ClmulPext, InstructionPext};

/// Compacts the non-null bitmap of the selected rows.
///
/// For each of the first `n_rows` rows whose bit is set in `sel_bitmap`, in
/// order, appends that row's bit from `non_null_bitmap` to `dst_bitmap`,
/// starting at bit `dst_idx`.  Bits of `dst_bitmap` before `dst_idx` are
/// preserved.  Bits of the last byte written that follow the appended bits
/// are zeroed.
///
/// Both source bitmaps must hold at least `n_rows` bits, and `dst_bitmap`
/// must hold at least `dst_idx` plus the number of selected rows.
pub fn copy_non_null_bitmap(
    non_null_bitmap: &[u8],
    sel_bitmap: &[u8],
    dst_idx: usize,
    n_rows: usize,
    dst_bitmap: &mut [u8],
) {
    // SAFETY: the selected method is always supported.
    unsafe {
        dispatch(
            selected_pext_method(),
            non_null_bitmap,
            sel_bitmap,
            dst_idx,
            n_rows,
            dst_bitmap,
        )
    }
}

/// Like [`copy_non_null_bitmap`], but uses `method` instead of the method
/// chosen for this CPU.
///
/// # Panic
///
/// Panics if the CPU does not support `method`.
pub fn copy_non_null_bitmap_with(
    method: PextMethod,
    non_null_bitmap: &[u8],
    sel_bitmap: &[u8],
    dst_idx: usize,
    n_rows: usize,
    dst_bitmap: &mut [u8],
) {
    assert!(
        method.is_supported(),
        "{method:?} is not supported on this CPU"
    );
    // SAFETY: we just checked that the CPU supports `method`.
    unsafe {
        dispatch(
            method,
            non_null_bitmap,
            sel_bitmap,
            dst_idx,
            n_rows,
            dst_bitmap,
        )
    }
}

/// # Safety
///
/// The CPU must support `method`.
unsafe fn dispatch(
    method: PextMethod,
    non_null_bitmap: &[u8],
    sel_bitmap: &[u8],
    dst_idx: usize,
    n_rows: usize,
    dst_bitmap: &mut [u8],
) {
    match method {
        #[cfg(target_arch = "x86_64")]
        PextMethod::PextInstruction => copy_with_pext_instruction(
            non_null_bitmap,
            sel_bitmap,
            dst_idx,
            n_rows,
            dst_bitmap,
        ),
        #[cfg(target_arch = "x86_64")]
        PextMethod::Clmul => {
            copy_with_clmul(non_null_bitmap, sel_bitmap, dst_idx, n_rows, dst_bitmap)
        }
        #[cfg(not(target_arch = "x86_64"))]
        PextMethod::PextInstruction | PextMethod::Clmul => {
            unreachable!("{method:?} is not supported on this CPU")
        }
        PextMethod::Simple => copy_non_null_bitmap_impl::<SimplePext>(
            non_null_bitmap,
            sel_bitmap,
            dst_idx,
            n_rows,
            dst_bitmap,
        ),
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "bmi2")]
unsafe fn copy_with_pext_instruction(
    non_null_bitmap: &[u8],
    sel_bitmap: &[u8],
    dst_idx: usize,
    n_rows: usize,
    dst_bitmap: &mut [u8],
) {
    copy_non_null_bitmap_impl::<InstructionPext>(
        non_null_bitmap,
        sel_bitmap,
        dst_idx,
        n_rows,
        dst_bitmap,
    )
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "pclmulqdq")]
unsafe fn copy_with_clmul(
    non_null_bitmap: &[u8],
    sel_bitmap: &[u8],
    dst_idx: usize,
    n_rows: usize,
    dst_bitmap: &mut [u8],
) {
    copy_non_null_bitmap_impl::<ClmulPext>(
        non_null_bitmap,
        sel_bitmap,
        dst_idx,
        n_rows,
        dst_bitmap,
    )
}

fn load_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

/// # Safety
///
/// The CPU must support `P::METHOD`.
#[inline(always)]
unsafe fn copy_non_null_bitmap_impl<P: Pext>(
    non_null_bitmap: &[u8],
    sel_bitmap: &[u8],
    dst_idx: usize,
    n_rows: usize,
    dst_bitmap: &mut [u8],
) {
    debug_assert!(P::METHOD.is_supported());
    let n_bytes = n_rows.div_ceil(8);
    let non_null_bitmap = &non_null_bitmap[..n_bytes];
    let sel_bitmap = &sel_bitmap[..n_bytes];

    let mut writer = BitWriter::new(dst_bitmap, dst_idx);
    let n_words = n_rows / 64;
    for (non_nulls, sel) in non_null_bitmap
        .chunks_exact(8)
        .zip(sel_bitmap.chunks_exact(8))
        .take(n_words)
    {
        let sel = load_u64(sel);
        writer.put(P::pext(load_u64(non_nulls), sel), sel.count_ones());
    }

    let tail_rows = n_rows % 64;
    let tail_start = n_words * 8;
    for (i, (&non_nulls, &sel)) in non_null_bitmap[tail_start..]
        .iter()
        .zip(&sel_bitmap[tail_start..])
        .enumerate()
    {
        // Ignore selection bits past `n_rows` in the last byte.
        let valid_bits = (tail_rows - i * 8).min(8);
        let sel = sel & ((1u16 << valid_bits) - 1) as u8;
        writer.put(P::pext(non_nulls as u64, sel as u64), sel.count_ones());
    }
    writer.flush();
}
