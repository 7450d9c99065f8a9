//! NMOS 6502 opcode metadata.
//!
//! One table drives both execution (decode) and the small assembler used to
//! build target drivers (encode). Cycle counts are the base counts; the
//! page-cross penalty is applied by the CPU when `page_penalty` is set.

use std::fmt;

/// Instruction mnemonic.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    // Stable undocumented opcodes seen in SID drivers
    Lax,
    Sax,
    Dcp,
    Isc,
    Slo,
    Rla,
    Sre,
    Rra,
    Anc,
    Alr,
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = format!("{self:?}").to_uppercase();
        f.write_str(&name)
    }
}

/// Operand addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    /// No operand.
    Implied,
    /// Operates on the accumulator (`ASL A`).
    Accumulator,
    /// `#$nn`
    Immediate,
    /// `$nn`
    ZeroPage,
    /// `$nn,X` (wraps within page zero)
    ZeroPageX,
    /// `$nn,Y` (wraps within page zero)
    ZeroPageY,
    /// `$nnnn`
    Absolute,
    /// `$nnnn,X`
    AbsoluteX,
    /// `$nnnn,Y`
    AbsoluteY,
    /// `($nnnn)`, JMP only
    Indirect,
    /// `($nn,X)`
    IndexedIndirect,
    /// `($nn),Y`
    IndirectIndexed,
    /// Signed branch displacement.
    Relative,
}

impl AddressingMode {
    /// Number of operand bytes following the opcode.
    pub const fn operand_len(self) -> u16 {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 0,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndexedIndirect
            | AddressingMode::IndirectIndexed
            | AddressingMode::Relative => 1,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 2,
        }
    }
}

/// Decoded opcode metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    /// Instruction mnemonic.
    pub mnemonic: Mnemonic,
    /// Addressing mode of the operand.
    pub mode: AddressingMode,
    /// Base cycle count.
    pub cycles: u8,
    /// One extra cycle when indexing crosses a page boundary.
    pub page_penalty: bool,
    /// Undocumented opcode.
    pub illegal: bool,
}

impl Opcode {
    /// Total instruction length in bytes.
    pub const fn len(&self) -> u16 {
        1 + self.mode.operand_len()
    }
}

const fn op(mnemonic: Mnemonic, mode: AddressingMode, cycles: u8, page_penalty: bool) -> Option<Opcode> {
    Some(Opcode {
        mnemonic,
        mode,
        cycles,
        page_penalty,
        illegal: false,
    })
}

const fn ill(mnemonic: Mnemonic, mode: AddressingMode, cycles: u8, page_penalty: bool) -> Option<Opcode> {
    Some(Opcode {
        mnemonic,
        mode,
        cycles,
        page_penalty,
        illegal: true,
    })
}

/// Decode an opcode byte. Returns `None` for opcodes the core does not run
/// (JAM/KIL and the unstable undocumented group).
pub const fn decode(byte: u8) -> Option<Opcode> {
    use AddressingMode::*;
    use Mnemonic::*;
    match byte {
        0x69 => op(Adc, Immediate, 2, false),
        0x65 => op(Adc, ZeroPage, 3, false),
        0x75 => op(Adc, ZeroPageX, 4, false),
        0x6D => op(Adc, Absolute, 4, false),
        0x7D => op(Adc, AbsoluteX, 4, true),
        0x79 => op(Adc, AbsoluteY, 4, true),
        0x61 => op(Adc, IndexedIndirect, 6, false),
        0x71 => op(Adc, IndirectIndexed, 5, true),

        0x29 => op(And, Immediate, 2, false),
        0x25 => op(And, ZeroPage, 3, false),
        0x35 => op(And, ZeroPageX, 4, false),
        0x2D => op(And, Absolute, 4, false),
        0x3D => op(And, AbsoluteX, 4, true),
        0x39 => op(And, AbsoluteY, 4, true),
        0x21 => op(And, IndexedIndirect, 6, false),
        0x31 => op(And, IndirectIndexed, 5, true),

        0x0A => op(Asl, Accumulator, 2, false),
        0x06 => op(Asl, ZeroPage, 5, false),
        0x16 => op(Asl, ZeroPageX, 6, false),
        0x0E => op(Asl, Absolute, 6, false),
        0x1E => op(Asl, AbsoluteX, 7, false),

        0x90 => op(Bcc, Relative, 2, false),
        0xB0 => op(Bcs, Relative, 2, false),
        0xF0 => op(Beq, Relative, 2, false),
        0x30 => op(Bmi, Relative, 2, false),
        0xD0 => op(Bne, Relative, 2, false),
        0x10 => op(Bpl, Relative, 2, false),
        0x50 => op(Bvc, Relative, 2, false),
        0x70 => op(Bvs, Relative, 2, false),

        0x24 => op(Bit, ZeroPage, 3, false),
        0x2C => op(Bit, Absolute, 4, false),

        0x00 => op(Brk, Implied, 7, false),

        0x18 => op(Clc, Implied, 2, false),
        0xD8 => op(Cld, Implied, 2, false),
        0x58 => op(Cli, Implied, 2, false),
        0xB8 => op(Clv, Implied, 2, false),

        0xC9 => op(Cmp, Immediate, 2, false),
        0xC5 => op(Cmp, ZeroPage, 3, false),
        0xD5 => op(Cmp, ZeroPageX, 4, false),
        0xCD => op(Cmp, Absolute, 4, false),
        0xDD => op(Cmp, AbsoluteX, 4, true),
        0xD9 => op(Cmp, AbsoluteY, 4, true),
        0xC1 => op(Cmp, IndexedIndirect, 6, false),
        0xD1 => op(Cmp, IndirectIndexed, 5, true),

        0xE0 => op(Cpx, Immediate, 2, false),
        0xE4 => op(Cpx, ZeroPage, 3, false),
        0xEC => op(Cpx, Absolute, 4, false),

        0xC0 => op(Cpy, Immediate, 2, false),
        0xC4 => op(Cpy, ZeroPage, 3, false),
        0xCC => op(Cpy, Absolute, 4, false),

        0xC6 => op(Dec, ZeroPage, 5, false),
        0xD6 => op(Dec, ZeroPageX, 6, false),
        0xCE => op(Dec, Absolute, 6, false),
        0xDE => op(Dec, AbsoluteX, 7, false),

        0xCA => op(Dex, Implied, 2, false),
        0x88 => op(Dey, Implied, 2, false),

        0x49 => op(Eor, Immediate, 2, false),
        0x45 => op(Eor, ZeroPage, 3, false),
        0x55 => op(Eor, ZeroPageX, 4, false),
        0x4D => op(Eor, Absolute, 4, false),
        0x5D => op(Eor, AbsoluteX, 4, true),
        0x59 => op(Eor, AbsoluteY, 4, true),
        0x41 => op(Eor, IndexedIndirect, 6, false),
        0x51 => op(Eor, IndirectIndexed, 5, true),

        0xE6 => op(Inc, ZeroPage, 5, false),
        0xF6 => op(Inc, ZeroPageX, 6, false),
        0xEE => op(Inc, Absolute, 6, false),
        0xFE => op(Inc, AbsoluteX, 7, false),

        0xE8 => op(Inx, Implied, 2, false),
        0xC8 => op(Iny, Implied, 2, false),

        0x4C => op(Jmp, Absolute, 3, false),
        0x6C => op(Jmp, Indirect, 5, false),
        0x20 => op(Jsr, Absolute, 6, false),

        0xA9 => op(Lda, Immediate, 2, false),
        0xA5 => op(Lda, ZeroPage, 3, false),
        0xB5 => op(Lda, ZeroPageX, 4, false),
        0xAD => op(Lda, Absolute, 4, false),
        0xBD => op(Lda, AbsoluteX, 4, true),
        0xB9 => op(Lda, AbsoluteY, 4, true),
        0xA1 => op(Lda, IndexedIndirect, 6, false),
        0xB1 => op(Lda, IndirectIndexed, 5, true),

        0xA2 => op(Ldx, Immediate, 2, false),
        0xA6 => op(Ldx, ZeroPage, 3, false),
        0xB6 => op(Ldx, ZeroPageY, 4, false),
        0xAE => op(Ldx, Absolute, 4, false),
        0xBE => op(Ldx, AbsoluteY, 4, true),

        0xA0 => op(Ldy, Immediate, 2, false),
        0xA4 => op(Ldy, ZeroPage, 3, false),
        0xB4 => op(Ldy, ZeroPageX, 4, false),
        0xAC => op(Ldy, Absolute, 4, false),
        0xBC => op(Ldy, AbsoluteX, 4, true),

        0x4A => op(Lsr, Accumulator, 2, false),
        0x46 => op(Lsr, ZeroPage, 5, false),
        0x56 => op(Lsr, ZeroPageX, 6, false),
        0x4E => op(Lsr, Absolute, 6, false),
        0x5E => op(Lsr, AbsoluteX, 7, false),

        0xEA => op(Nop, Implied, 2, false),

        0x09 => op(Ora, Immediate, 2, false),
        0x05 => op(Ora, ZeroPage, 3, false),
        0x15 => op(Ora, ZeroPageX, 4, false),
        0x0D => op(Ora, Absolute, 4, false),
        0x1D => op(Ora, AbsoluteX, 4, true),
        0x19 => op(Ora, AbsoluteY, 4, true),
        0x01 => op(Ora, IndexedIndirect, 6, false),
        0x11 => op(Ora, IndirectIndexed, 5, true),

        0x48 => op(Pha, Implied, 3, false),
        0x08 => op(Php, Implied, 3, false),
        0x68 => op(Pla, Implied, 4, false),
        0x28 => op(Plp, Implied, 4, false),

        0x2A => op(Rol, Accumulator, 2, false),
        0x26 => op(Rol, ZeroPage, 5, false),
        0x36 => op(Rol, ZeroPageX, 6, false),
        0x2E => op(Rol, Absolute, 6, false),
        0x3E => op(Rol, AbsoluteX, 7, false),

        0x6A => op(Ror, Accumulator, 2, false),
        0x66 => op(Ror, ZeroPage, 5, false),
        0x76 => op(Ror, ZeroPageX, 6, false),
        0x6E => op(Ror, Absolute, 6, false),
        0x7E => op(Ror, AbsoluteX, 7, false),

        0x40 => op(Rti, Implied, 6, false),
        0x60 => op(Rts, Implied, 6, false),

        0xE9 => op(Sbc, Immediate, 2, false),
        0xE5 => op(Sbc, ZeroPage, 3, false),
        0xF5 => op(Sbc, ZeroPageX, 4, false),
        0xED => op(Sbc, Absolute, 4, false),
        0xFD => op(Sbc, AbsoluteX, 4, true),
        0xF9 => op(Sbc, AbsoluteY, 4, true),
        0xE1 => op(Sbc, IndexedIndirect, 6, false),
        0xF1 => op(Sbc, IndirectIndexed, 5, true),

        0x38 => op(Sec, Implied, 2, false),
        0xF8 => op(Sed, Implied, 2, false),
        0x78 => op(Sei, Implied, 2, false),

        0x85 => op(Sta, ZeroPage, 3, false),
        0x95 => op(Sta, ZeroPageX, 4, false),
        0x8D => op(Sta, Absolute, 4, false),
        0x9D => op(Sta, AbsoluteX, 5, false),
        0x99 => op(Sta, AbsoluteY, 5, false),
        0x81 => op(Sta, IndexedIndirect, 6, false),
        0x91 => op(Sta, IndirectIndexed, 6, false),

        0x86 => op(Stx, ZeroPage, 3, false),
        0x96 => op(Stx, ZeroPageY, 4, false),
        0x8E => op(Stx, Absolute, 4, false),

        0x84 => op(Sty, ZeroPage, 3, false),
        0x94 => op(Sty, ZeroPageX, 4, false),
        0x8C => op(Sty, Absolute, 4, false),

        0xAA => op(Tax, Implied, 2, false),
        0xA8 => op(Tay, Implied, 2, false),
        0xBA => op(Tsx, Implied, 2, false),
        0x8A => op(Txa, Implied, 2, false),
        0x9A => op(Txs, Implied, 2, false),
        0x98 => op(Tya, Implied, 2, false),

        // Undocumented, stable group
        0xA7 => ill(Lax, ZeroPage, 3, false),
        0xB7 => ill(Lax, ZeroPageY, 4, false),
        0xAF => ill(Lax, Absolute, 4, false),
        0xBF => ill(Lax, AbsoluteY, 4, true),
        0xA3 => ill(Lax, IndexedIndirect, 6, false),
        0xB3 => ill(Lax, IndirectIndexed, 5, true),

        0x87 => ill(Sax, ZeroPage, 3, false),
        0x97 => ill(Sax, ZeroPageY, 4, false),
        0x8F => ill(Sax, Absolute, 4, false),
        0x83 => ill(Sax, IndexedIndirect, 6, false),

        0xC7 => ill(Dcp, ZeroPage, 5, false),
        0xD7 => ill(Dcp, ZeroPageX, 6, false),
        0xCF => ill(Dcp, Absolute, 6, false),
        0xDF => ill(Dcp, AbsoluteX, 7, false),
        0xDB => ill(Dcp, AbsoluteY, 7, false),
        0xC3 => ill(Dcp, IndexedIndirect, 8, false),
        0xD3 => ill(Dcp, IndirectIndexed, 8, false),

        0xE7 => ill(Isc, ZeroPage, 5, false),
        0xF7 => ill(Isc, ZeroPageX, 6, false),
        0xEF => ill(Isc, Absolute, 6, false),
        0xFF => ill(Isc, AbsoluteX, 7, false),
        0xFB => ill(Isc, AbsoluteY, 7, false),
        0xE3 => ill(Isc, IndexedIndirect, 8, false),
        0xF3 => ill(Isc, IndirectIndexed, 8, false),

        0x07 => ill(Slo, ZeroPage, 5, false),
        0x17 => ill(Slo, ZeroPageX, 6, false),
        0x0F => ill(Slo, Absolute, 6, false),
        0x1F => ill(Slo, AbsoluteX, 7, false),
        0x1B => ill(Slo, AbsoluteY, 7, false),
        0x03 => ill(Slo, IndexedIndirect, 8, false),
        0x13 => ill(Slo, IndirectIndexed, 8, false),

        0x27 => ill(Rla, ZeroPage, 5, false),
        0x37 => ill(Rla, ZeroPageX, 6, false),
        0x2F => ill(Rla, Absolute, 6, false),
        0x3F => ill(Rla, AbsoluteX, 7, false),
        0x3B => ill(Rla, AbsoluteY, 7, false),
        0x23 => ill(Rla, IndexedIndirect, 8, false),
        0x33 => ill(Rla, IndirectIndexed, 8, false),

        0x47 => ill(Sre, ZeroPage, 5, false),
        0x57 => ill(Sre, ZeroPageX, 6, false),
        0x4F => ill(Sre, Absolute, 6, false),
        0x5F => ill(Sre, AbsoluteX, 7, false),
        0x5B => ill(Sre, AbsoluteY, 7, false),
        0x43 => ill(Sre, IndexedIndirect, 8, false),
        0x53 => ill(Sre, IndirectIndexed, 8, false),

        0x67 => ill(Rra, ZeroPage, 5, false),
        0x77 => ill(Rra, ZeroPageX, 6, false),
        0x6F => ill(Rra, Absolute, 6, false),
        0x7F => ill(Rra, AbsoluteX, 7, false),
        0x7B => ill(Rra, AbsoluteY, 7, false),
        0x63 => ill(Rra, IndexedIndirect, 8, false),
        0x73 => ill(Rra, IndirectIndexed, 8, false),

        0x0B | 0x2B => ill(Anc, Immediate, 2, false),
        0x4B => ill(Alr, Immediate, 2, false),
        0xEB => ill(Sbc, Immediate, 2, false),

        0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => ill(Nop, Implied, 2, false),
        0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => ill(Nop, Immediate, 2, false),
        0x04 | 0x44 | 0x64 => ill(Nop, ZeroPage, 3, false),
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => ill(Nop, ZeroPageX, 4, false),
        0x0C => ill(Nop, Absolute, 4, false),
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => ill(Nop, AbsoluteX, 4, true),

        _ => None,
    }
}

/// Find the opcode byte for a mnemonic/mode pair, preferring the documented
/// encoding when an undocumented alias exists.
pub fn encode(mnemonic: Mnemonic, mode: AddressingMode) -> Option<u8> {
    let mut fallback = None;
    for byte in 0..=u8::MAX {
        if let Some(opcode) = decode(byte) {
            if opcode.mnemonic == mnemonic && opcode.mode == mode {
                if !opcode.illegal {
                    return Some(byte);
                }
                fallback.get_or_insert(byte);
            }
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_opcode_count_is_151() {
        let documented = (0..=u8::MAX)
            .filter_map(decode)
            .filter(|op| !op.illegal)
            .count();
        assert_eq!(documented, 151);
    }

    #[test]
    fn encode_prefers_documented_alias() {
        assert_eq!(encode(Mnemonic::Nop, AddressingMode::Implied), Some(0xEA));
        assert_eq!(encode(Mnemonic::Sbc, AddressingMode::Immediate), Some(0xE9));
        assert_eq!(encode(Mnemonic::Lda, AddressingMode::IndirectIndexed), Some(0xB1));
        assert_eq!(encode(Mnemonic::Lax, AddressingMode::Absolute), Some(0xAF));
        assert_eq!(encode(Mnemonic::Sta, AddressingMode::Immediate), None);
    }

    #[test]
    fn instruction_lengths_follow_mode() {
        assert_eq!(decode(0x20).map(|op| op.len()), Some(3));
        assert_eq!(decode(0xA9).map(|op| op.len()), Some(2));
        assert_eq!(decode(0x60).map(|op| op.len()), Some(1));
        assert!(decode(0x02).is_none());
    }
}
