//! Parallel bit extraction.
//!
//! `pext(value, mask)` gathers the bits of `value` selected by the set bits
//! of `mask` into the low-order bits of the result, preserving their order.
//! x86-64 CPUs with BMI2 have an instruction for it, but on AMD processors
//! before Zen 3 that instruction is microcoded and very slow, so we only
//! prefer it on Intel.  Without BMI2, carry-less multiplication makes a good
//! substitute.
use std::sync::OnceLock;

use tracing::info;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64 as x86;

/// A way to compute `pext`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PextMethod {
    /// The BMI2 `pext` instruction.
    PextInstruction,
    /// A sequence of carry-less multiplications.
    Clmul,
    /// A portable loop over the set bits of the mask.
    Simple,
}

impl PextMethod {
    /// All methods, fastest first.
    pub const ALL: [PextMethod; 3] = [
        PextMethod::PextInstruction,
        PextMethod::Clmul,
        PextMethod::Simple,
    ];

    /// Returns true if the running CPU can execute this method.
    pub fn is_supported(self) -> bool {
        match self {
            #[cfg(target_arch = "x86_64")]
            PextMethod::PextInstruction => is_x86_feature_detected!("bmi2"),
            #[cfg(target_arch = "x86_64")]
            PextMethod::Clmul => is_x86_feature_detected!("pclmulqdq"),
            #[cfg(not(target_arch = "x86_64"))]
            PextMethod::PextInstruction | PextMethod::Clmul => false,
            PextMethod::Simple => true,
        }
    }
}

/// Returns the methods that are worth using on the running CPU, most
/// preferred first.  [`PextMethod::Simple`] is always last.
pub fn available_pext_methods() -> Vec<PextMethod> {
    let mut methods = Vec::with_capacity(PextMethod::ALL.len());
    if PextMethod::PextInstruction.is_supported() && is_genuine_intel() {
        methods.push(PextMethod::PextInstruction);
    }
    if PextMethod::Clmul.is_supported() {
        methods.push(PextMethod::Clmul);
    }
    methods.push(PextMethod::Simple);
    methods
}

/// Returns the method used by
/// [`copy_non_null_bitmap`](super::copy_non_null_bitmap).  The choice is made
/// on first use and then fixed for the life of the process.
pub fn selected_pext_method() -> PextMethod {
    static SELECTED: OnceLock<PextMethod> = OnceLock::new();
    *SELECTED.get_or_init(|| {
        let available = available_pext_methods();
        let method = available[0];
        info!("using {method:?} for bitmap compaction (available: {available:?})");
        method
    })
}

#[cfg(target_arch = "x86_64")]
fn is_genuine_intel() -> bool {
    // SAFETY: `cpuid` is available on every x86-64 processor.
    #[allow(unused_unsafe)]
    let leaf = unsafe { x86::__cpuid(0) };
    let mut vendor = [0u8; 12];
    vendor[..4].copy_from_slice(&leaf.ebx.to_le_bytes());
    vendor[4..8].copy_from_slice(&leaf.edx.to_le_bytes());
    vendor[8..].copy_from_slice(&leaf.ecx.to_le_bytes());
    &vendor == b"GenuineIntel"
}

#[cfg(not(target_arch = "x86_64"))]
fn is_genuine_intel() -> bool {
    false
}

/// An implementation of `pext`.
///
/// # Safety
///
/// Implementations may use instructions that the CPU lacks.  Callers must
/// check [`PextMethod::is_supported`] for [`Pext::METHOD`] first.
pub(super) unsafe trait Pext {
    const METHOD: PextMethod;

    unsafe fn pext(value: u64, mask: u64) -> u64;
}

pub(super) struct SimplePext;

unsafe impl Pext for SimplePext {
    const METHOD: PextMethod = PextMethod::Simple;

    #[inline(always)]
    unsafe fn pext(value: u64, mask: u64) -> u64 {
        pext_simple(value, mask)
    }
}

pub(super) fn pext_simple(value: u64, mut mask: u64) -> u64 {
    let mut result = 0;
    let mut bit = 0;
    while mask != 0 {
        if value & mask & mask.wrapping_neg() != 0 {
            result |= 1 << bit;
        }
        bit += 1;
        mask &= mask - 1;
    }
    result
}

#[cfg(target_arch = "x86_64")]
pub(super) struct InstructionPext;

#[cfg(target_arch = "x86_64")]
unsafe impl Pext for InstructionPext {
    const METHOD: PextMethod = PextMethod::PextInstruction;

    #[inline(always)]
    unsafe fn pext(value: u64, mask: u64) -> u64 {
        pext_instruction(value, mask)
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "bmi2")]
unsafe fn pext_instruction(value: u64, mask: u64) -> u64 {
    x86::_pext_u64(value, mask)
}

#[cfg(target_arch = "x86_64")]
pub(super) struct ClmulPext;

#[cfg(target_arch = "x86_64")]
unsafe impl Pext for ClmulPext {
    const METHOD: PextMethod = PextMethod::Clmul;

    #[inline(always)]
    unsafe fn pext(value: u64, mask: u64) -> u64 {
        pext_clmul(value, mask)
    }
}

/// The "compress" algorithm from Hacker's Delight, section 7-4, with each
/// parallel prefix XOR computed by one carry-less multiplication by all-ones.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "pclmulqdq")]
unsafe fn pext_clmul(value: u64, mask: u64) -> u64 {
    let mut m = mask;
    let mut x = value & m;
    // Bit i of `mk` is set if bit i - 1 of `m` is clear.
    let mut mk = !m << 1;
    for i in 0..6 {
        let mp = prefix_xor(mk);
        let mv = mp & m;
        m = (m ^ mv) | (mv >> (1 << i));
        let t = x & mv;
        x = (x ^ t) | (t >> (1 << i));
        mk &= !mp;
    }
    x
}

/// Returns a value whose bit i is the XOR of bits 0 through i of `x`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "pclmulqdq")]
unsafe fn prefix_xor(x: u64) -> u64 {
    let product = x86::_mm_clmulepi64_si128(
        x86::_mm_set_epi64x(0, x as i64),
        x86::_mm_set1_epi64x(-1),
        0x00,
    );
    x86::_mm_cvtsi128_si64(product) as u64
}
