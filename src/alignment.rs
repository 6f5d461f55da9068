//! Structural layout self-check (spec §3.1, §6.2): every on-disk struct's
//! serialized size must match its documented byte size. These are asserted
//! once, at crate-init time, playing the same role a `const_assert!` over a
//! `#[repr(C)]` struct size would at compile time; our structs are plain
//! Rust types read by offset rather than `#[repr(C)]` layouts, so there is
//! no compiler-checked size to assert against, and instead each constant
//! here is cross-checked against the offset tables in the module that owns
//! it.

use crate::block::offset as block_offset;
use crate::header::offset as header_offset;
use crate::metadata::{section1_offset, section2_offset, section3_offset, SECTION_1_BYTES, SECTION_2_BYTES, SECTION_3_BYTES};
use crate::primitives::{
    CMP_FIXED_BH_BYTES, METADATA_BODY_BYTES, RECORD_HEADER_BYTES, RI_BYTES, TSI_BYTES,
    UNIVERSAL_HEADER_BYTES, VI_BYTES,
};

/// Panics (at crate-init, via [`check_all`]) if any documented size
/// disagrees with the offset table that defines it. This is a debug
/// assertion in spirit: a mismatch means a hand-edited offset table drifted
/// from the documented layout, not something that can happen at runtime
/// from file content.
pub fn check_all() {
    assert_eq!(1024, UNIVERSAL_HEADER_BYTES);
    assert!(header_offset::META3_ENCRYPTION < UNIVERSAL_HEADER_BYTES);
    assert!(header_offset::L3_VALIDATION + 32 <= UNIVERSAL_HEADER_BYTES);

    assert_eq!(15360, METADATA_BODY_BYTES);
    assert_eq!(1024, SECTION_1_BYTES);
    assert_eq!(4096, SECTION_2_BYTES);
    assert_eq!(
        METADATA_BODY_BYTES - SECTION_1_BYTES - SECTION_2_BYTES,
        SECTION_3_BYTES
    );
    assert!(section1_offset::SUBJECT_ID + section1_offset::SUBJECT_ID_BYTES <= SECTION_1_BYTES);
    assert!(
        section2_offset::MAXIMUM_BLOCK_DURATION + 4 <= SECTION_2_BYTES
    );
    assert!(
        section3_offset::LOCALITY_DESCRIPTION + section3_offset::LOCALITY_DESCRIPTION_BYTES
            <= SECTION_3_BYTES
    );

    assert_eq!(24, TSI_BYTES);
    assert_eq!(24, VI_BYTES);
    assert_eq!(24, RI_BYTES);
    assert_eq!(24, RECORD_HEADER_BYTES);

    assert_eq!(56, CMP_FIXED_BH_BYTES);
    assert!(block_offset::TOTAL_HEADER_BYTES < CMP_FIXED_BH_BYTES);
}

#[cfg(test)]
mod tests {
    #[test]
    fn layout_sizes_are_consistent() {
        super::check_all();
    }
}
