//! Tiny two-pass 6502 assembler used to build driver templates.
//!
//! Opcodes come from the emulator's decode table, so every instruction the
//! assembler emits is one the emulator executes. Absolute operands that
//! point into the driver's own layout become [`Relocation`] entries.

use std::collections::HashMap;

use sidconv_emu::cpu::opcodes::{self, AddressingMode, Mnemonic};

use super::template::{Relocation, Symbol};

/// Absolute operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Code label.
    Label(&'static str),
    /// Layout symbol plus byte offset.
    Symbol(Symbol, u16),
    /// Fixed hardware address; never relocated.
    Fixed(u16),
}

/// Instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// No operand.
    Implied,
    /// Accumulator (`ASL A`).
    Acc,
    /// `#$nn`
    Imm(u8),
    /// `$nn`
    Zp(u8),
    /// `$nn,X`
    ZpX(u8),
    /// `$nn,Y`
    ZpY(u8),
    /// `$nnnn`
    Abs(Target),
    /// `$nnnn,X`
    AbsX(Target),
    /// `$nnnn,Y`
    AbsY(Target),
    /// `($nnnn)`
    Ind(Target),
    /// `($nn,X)`
    IndX(u8),
    /// `($nn),Y`
    IndY(u8),
    /// Relative branch to a label.
    Branch(&'static str),
}

impl Operand {
    fn mode(&self) -> AddressingMode {
        match self {
            Operand::Implied => AddressingMode::Implied,
            Operand::Acc => AddressingMode::Accumulator,
            Operand::Imm(_) => AddressingMode::Immediate,
            Operand::Zp(_) => AddressingMode::ZeroPage,
            Operand::ZpX(_) => AddressingMode::ZeroPageX,
            Operand::ZpY(_) => AddressingMode::ZeroPageY,
            Operand::Abs(_) => AddressingMode::Absolute,
            Operand::AbsX(_) => AddressingMode::AbsoluteX,
            Operand::AbsY(_) => AddressingMode::AbsoluteY,
            Operand::Ind(_) => AddressingMode::Indirect,
            Operand::IndX(_) => AddressingMode::IndexedIndirect,
            Operand::IndY(_) => AddressingMode::IndirectIndexed,
            Operand::Branch(_) => AddressingMode::Relative,
        }
    }
}

/// Assembled code plus its relocation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    /// Machine code.
    pub code: Vec<u8>,
    /// Relocated operands.
    pub relocations: Vec<Relocation>,
    /// Label offsets from the start of the code.
    pub labels: HashMap<&'static str, u16>,
}

/// Assembler state.
pub struct Assembler {
    base: u16,
    code: Vec<u8>,
    labels: HashMap<&'static str, u16>,
    branches: Vec<(usize, &'static str)>,
    absolutes: Vec<(usize, Target)>,
    errors: Vec<String>,
}

impl Assembler {
    /// Assemble for code loaded at `base`.
    pub fn new(base: u16) -> Self {
        Self {
            base,
            code: Vec::new(),
            labels: HashMap::new(),
            branches: Vec::new(),
            absolutes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Bytes emitted so far.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether nothing was emitted yet.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Define a label at the current position.
    pub fn label(&mut self, name: &'static str) {
        if self.labels.insert(name, self.code.len() as u16).is_some() {
            self.errors.push(format!("label '{name}' defined twice"));
        }
    }

    /// Emit raw data bytes.
    pub fn bytes(&mut self, data: &[u8]) {
        self.code.extend_from_slice(data);
    }

    /// Emit one instruction.
    pub fn i(&mut self, mnemonic: Mnemonic, operand: Operand) {
        let Some(byte) = opcodes::encode(mnemonic, operand.mode()) else {
            self.errors
                .push(format!("{mnemonic} has no {:?} form", operand.mode()));
            return;
        };
        self.code.push(byte);
        match operand {
            Operand::Implied | Operand::Acc => {}
            Operand::Imm(v)
            | Operand::Zp(v)
            | Operand::ZpX(v)
            | Operand::ZpY(v)
            | Operand::IndX(v)
            | Operand::IndY(v) => self.code.push(v),
            Operand::Abs(target)
            | Operand::AbsX(target)
            | Operand::AbsY(target)
            | Operand::Ind(target) => {
                self.absolutes.push((self.code.len(), target));
                self.code.extend_from_slice(&[0, 0]);
            }
            Operand::Branch(label) => {
                self.branches.push((self.code.len(), label));
                self.code.push(0);
            }
        }
    }

    /// Resolve labels and symbols. `resolve` maps symbols to addresses for
    /// the final code length.
    pub fn finish(
        mut self,
        resolve: impl Fn(Symbol) -> Option<u16>,
    ) -> std::result::Result<Assembled, String> {
        let mut relocations = Vec::new();

        for (at, label) in std::mem::take(&mut self.branches) {
            let Some(&target) = self.labels.get(label) else {
                self.errors.push(format!("undefined label '{label}'"));
                continue;
            };
            let distance = target as i32 - (at as i32 + 1);
            if !(-128..=127).contains(&distance) {
                self.errors
                    .push(format!("branch to '{label}' out of range ({distance})"));
                continue;
            }
            self.code[at] = distance as i8 as u8;
        }

        for (at, target) in std::mem::take(&mut self.absolutes) {
            let (address, relocation) = match target {
                Target::Fixed(address) => (Some(address), None),
                Target::Label(label) => match self.labels.get(label) {
                    Some(&offset) => (
                        Some(self.base.wrapping_add(offset)),
                        Some((Symbol::Code, offset)),
                    ),
                    None => (None, None),
                },
                Target::Symbol(symbol, addend) => (
                    resolve(symbol).map(|a| a.wrapping_add(addend)),
                    Some((symbol, addend)),
                ),
            };
            let Some(address) = address else {
                self.errors.push(format!("unresolved operand {target:?}"));
                continue;
            };
            self.code[at..at + 2].copy_from_slice(&address.to_le_bytes());
            if let Some((symbol, addend)) = relocation {
                relocations.push(Relocation {
                    offset: at as u16,
                    symbol,
                    addend,
                });
            }
        }

        if !self.errors.is_empty() {
            return Err(self.errors.join("; "));
        }
        Ok(Assembled {
            code: self.code,
            relocations,
            labels: self.labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Mnemonic::*;
    use Operand::*;

    #[test]
    fn labels_branches_and_relocations() {
        let mut a = Assembler::new(0x1000);
        a.i(Jmp, Abs(Target::Label("start")));
        a.label("start");
        a.i(Ldx, Imm(3));
        a.label("loop");
        a.i(Sta, AbsX(Target::Symbol(Symbol::Variables, 2)));
        a.i(Dex, Implied);
        a.i(Bne, Branch("loop"));
        a.i(Sta, Abs(Target::Fixed(0xD418)));
        a.i(Rts, Implied);
        let out = a.finish(|s| (s == Symbol::Variables).then_some(0x2000)).unwrap();

        assert_eq!(
            out.code,
            vec![
                0x4C, 0x03, 0x10, // JMP start
                0xA2, 0x03, // LDX #3
                0x9D, 0x02, 0x20, // STA vars+2,X
                0xCA, // DEX
                0xD0, 0xFA, // BNE loop
                0x8D, 0x18, 0xD4, // STA $D418
                0x60,
            ]
        );
        assert_eq!(
            out.relocations,
            vec![
                Relocation {
                    offset: 1,
                    symbol: Symbol::Code,
                    addend: 3
                },
                Relocation {
                    offset: 6,
                    symbol: Symbol::Variables,
                    addend: 2
                },
            ]
        );
    }

    #[test]
    fn errors_are_collected() {
        let mut a = Assembler::new(0x1000);
        a.i(Stx, AbsX(Target::Fixed(0x2000)));
        a.i(Bne, Branch("nowhere"));
        let err = a.finish(|_| None).unwrap_err();
        assert!(err.contains("STX"));
        assert!(err.contains("nowhere"));
    }
}
