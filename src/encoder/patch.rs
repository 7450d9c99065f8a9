//! Pointer patches: moving a driver image to another load address.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

use super::layout::Layout;
use super::template::Template;

/// One 16-bit operand to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointerPatch {
    /// Offset of the operand from the start of the driver code.
    pub file_offset: usize,
    /// Address the template was assembled with.
    pub original_address: u16,
    /// Address for the new layout.
    pub new_address: u16,
}

/// Patch set that moves `template` from its assembly base to `layout`.
///
/// Every relocation yields exactly one patch, including those whose address
/// does not change.
pub fn derive_patches(template: &Template, layout: &Layout) -> Result<Vec<PointerPatch>> {
    let original = Layout::new(template, template.base)?;
    template
        .relocations
        .iter()
        .map(|relocation| {
            let resolve = |layout: &Layout| {
                layout
                    .address(relocation.symbol)
                    .map(|a| a.wrapping_add(relocation.addend))
                    .ok_or_else(|| ConvertError::InvalidTemplate {
                        name: template.name.clone(),
                        msg: format!("relocation references missing {:?}", relocation.symbol),
                    })
            };
            Ok(PointerPatch {
                file_offset: relocation.offset as usize,
                original_address: resolve(&original)?,
                new_address: resolve(layout)?,
            })
        })
        .collect()
}

/// Apply patches to `code` and return how many operands were rewritten.
///
/// Operands already holding the new address are left alone, so applying a
/// set twice changes nothing.
pub fn apply_patches(code: &mut [u8], patches: &[PointerPatch]) -> Result<usize> {
    let mut written = 0;
    for patch in patches {
        let at = patch.file_offset;
        let Some(operand) = code.get_mut(at..at + 2) else {
            return Err(format!("patch offset 0x{at:04x} outside driver code").into());
        };
        let found = u16::from_le_bytes([operand[0], operand[1]]);
        if found == patch.new_address {
            continue;
        }
        if found != patch.original_address {
            return Err(ConvertError::PatchMismatch {
                offset: at,
                expected: patch.original_address,
                found,
            });
        }
        operand.copy_from_slice(&patch.new_address.to_le_bytes());
        written += 1;
    }
    trace!("applied {written} of {} pointer patches", patches.len());
    Ok(written)
}
