//! Instruction-stepped NMOS 6502.
//!
//! `step()` executes one whole instruction against a [`Bus`] and returns the
//! number of cycles it took, including page-cross and branch penalties.
//! Read-modify-write instructions perform the NMOS double write (unmodified
//! value first), which matters when the target is a SID register.

pub mod opcodes;

use bitflags::bitflags;

use crate::error::{EmulationError, Result};
use opcodes::{AddressingMode, Mnemonic, Opcode};

/// Base address of the hardware stack page.
pub const STACK_PAGE: u16 = 0x0100;

/// IRQ/BRK vector.
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Memory access used by the CPU during execution.
///
/// Implementations route accesses to RAM or memory-mapped chips.
pub trait Bus {
    /// Read a byte.
    fn read(&mut self, address: u16) -> u8;

    /// Write a byte.
    fn write(&mut self, address: u16, value: u8);

    /// Read a little-endian word.
    fn read_u16(&mut self, address: u16) -> u16 {
        let lo = self.read(address) as u16;
        let hi = self.read(address.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }
}

bitflags! {
    /// Processor status register (P).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u8 {
        /// Carry
        const CARRY = 0x01;
        /// Zero
        const ZERO = 0x02;
        /// IRQ disable
        const IRQ_DISABLE = 0x04;
        /// Decimal mode
        const DECIMAL = 0x08;
        /// Break (only exists on the stack copy)
        const BREAK = 0x10;
        /// Unused, always reads as set
        const UNUSED = 0x20;
        /// Overflow
        const OVERFLOW = 0x40;
        /// Negative
        const NEGATIVE = 0x80;
    }
}

/// CPU register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Program counter
    pub pc: u16,
    /// Accumulator
    pub a: u8,
    /// X index
    pub x: u8,
    /// Y index
    pub y: u8,
    /// Stack pointer (offset into page one)
    pub sp: u8,
    /// Status flags
    pub p: Status,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFF,
            p: Status::UNUSED | Status::IRQ_DISABLE,
        }
    }
}

/// Resolved operand location.
#[derive(Debug, Clone, Copy)]
enum Operand {
    None,
    Accumulator,
    Address(u16),
}

/// The 6502 core.
#[derive(Debug, Default, Clone)]
pub struct Mos6502 {
    /// Register file.
    pub regs: Registers,
    total_cycles: u64,
}

impl Mos6502 {
    /// Create a CPU with power-on register defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cycles executed since creation.
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Push a byte onto the hardware stack.
    pub fn push<B: Bus>(&mut self, bus: &mut B, value: u8) {
        bus.write(STACK_PAGE | self.regs.sp as u16, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    /// Pull a byte from the hardware stack.
    pub fn pull<B: Bus>(&mut self, bus: &mut B) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        bus.read(STACK_PAGE | self.regs.sp as u16)
    }

    /// Push a word, high byte first.
    pub fn push_u16<B: Bus>(&mut self, bus: &mut B, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    fn pull_u16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.pull(bus) as u16;
        let hi = self.pull(bus) as u16;
        (hi << 8) | lo
    }

    /// Execute one instruction and return the cycles it consumed.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> Result<u8> {
        let address = self.regs.pc;
        let byte = bus.read(address);
        let opcode = opcodes::decode(byte).ok_or(EmulationError::UnsupportedInstruction {
            opcode: byte,
            address,
        })?;
        self.regs.pc = address.wrapping_add(1);

        let (operand, crossed) = self.resolve(bus, opcode.mode);
        let mut cycles = opcode.cycles;
        if crossed && opcode.page_penalty {
            cycles += 1;
        }
        cycles += self.execute(bus, &opcode, operand);
        self.total_cycles += cycles as u64;
        Ok(cycles)
    }

    fn fetch<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn fetch_u16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch(bus) as u16;
        let hi = self.fetch(bus) as u16;
        (hi << 8) | lo
    }

    /// Read a zero-page pointer, wrapping the high byte fetch within page zero.
    fn zp_pointer<B: Bus>(bus: &mut B, zp: u8) -> u16 {
        let lo = bus.read(zp as u16) as u16;
        let hi = bus.read(zp.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    fn resolve<B: Bus>(&mut self, bus: &mut B, mode: AddressingMode) -> (Operand, bool) {
        match mode {
            AddressingMode::Implied => (Operand::None, false),
            AddressingMode::Accumulator => (Operand::Accumulator, false),
            AddressingMode::Immediate => {
                let at = self.regs.pc;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                (Operand::Address(at), false)
            }
            AddressingMode::ZeroPage => (Operand::Address(self.fetch(bus) as u16), false),
            AddressingMode::ZeroPageX => {
                let zp = self.fetch(bus).wrapping_add(self.regs.x);
                (Operand::Address(zp as u16), false)
            }
            AddressingMode::ZeroPageY => {
                let zp = self.fetch(bus).wrapping_add(self.regs.y);
                (Operand::Address(zp as u16), false)
            }
            AddressingMode::Absolute => (Operand::Address(self.fetch_u16(bus)), false),
            AddressingMode::AbsoluteX => {
                let base = self.fetch_u16(bus);
                let effective = base.wrapping_add(self.regs.x as u16);
                (Operand::Address(effective), page_crossed(base, effective))
            }
            AddressingMode::AbsoluteY => {
                let base = self.fetch_u16(bus);
                let effective = base.wrapping_add(self.regs.y as u16);
                (Operand::Address(effective), page_crossed(base, effective))
            }
            AddressingMode::Indirect => {
                let pointer = self.fetch_u16(bus);
                let lo = bus.read(pointer) as u16;
                // NMOS bug: the high byte never crosses the pointer's page.
                let hi_at = (pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF);
                let hi = bus.read(hi_at) as u16;
                (Operand::Address((hi << 8) | lo), false)
            }
            AddressingMode::IndexedIndirect => {
                let zp = self.fetch(bus).wrapping_add(self.regs.x);
                (Operand::Address(Self::zp_pointer(bus, zp)), false)
            }
            AddressingMode::IndirectIndexed => {
                let zp = self.fetch(bus);
                let base = Self::zp_pointer(bus, zp);
                let effective = base.wrapping_add(self.regs.y as u16);
                (Operand::Address(effective), page_crossed(base, effective))
            }
            AddressingMode::Relative => {
                let offset = self.fetch(bus) as i8;
                let target = self.regs.pc.wrapping_add(offset as i16 as u16);
                (Operand::Address(target), false)
            }
        }
    }

    fn load<B: Bus>(&mut self, bus: &mut B, operand: Operand) -> u8 {
        match operand {
            Operand::Address(at) => bus.read(at),
            Operand::Accumulator => self.regs.a,
            Operand::None => 0,
        }
    }

    fn store<B: Bus>(&mut self, bus: &mut B, operand: Operand, value: u8) {
        match operand {
            Operand::Address(at) => bus.write(at, value),
            Operand::Accumulator => self.regs.a = value,
            Operand::None => {}
        }
    }

    /// Read-modify-write with the NMOS dummy write of the unmodified value.
    fn modify<B: Bus>(&mut self, bus: &mut B, operand: Operand, f: impl FnOnce(&mut Self, u8) -> u8) -> u8 {
        let value = self.load(bus, operand);
        if let Operand::Address(at) = operand {
            bus.write(at, value);
        }
        let result = f(self, value);
        self.store(bus, operand, result);
        result
    }

    fn set_nz(&mut self, value: u8) {
        self.regs.p.set(Status::ZERO, value == 0);
        self.regs.p.set(Status::NEGATIVE, value & 0x80 != 0);
    }

    fn flag(&self, flag: Status) -> bool {
        self.regs.p.contains(flag)
    }

    fn adc(&mut self, value: u8) {
        let a = self.regs.a as u16;
        let v = value as u16;
        let carry = self.flag(Status::CARRY) as u16;

        if self.flag(Status::DECIMAL) {
            let binary = (a + v + carry) & 0xFF;
            let mut lo = (a & 0x0F) + (v & 0x0F) + carry;
            if lo >= 0x0A {
                lo = ((lo + 0x06) & 0x0F) + 0x10;
            }
            let mut sum = (a & 0xF0) + (v & 0xF0) + lo;
            self.regs.p.set(Status::NEGATIVE, sum & 0x80 != 0);
            self.regs
                .p
                .set(Status::OVERFLOW, (!(a ^ v) & (a ^ sum) & 0x80) != 0);
            if sum >= 0xA0 {
                sum += 0x60;
            }
            self.regs.p.set(Status::CARRY, sum >= 0x100);
            self.regs.p.set(Status::ZERO, binary == 0);
            self.regs.a = sum as u8;
        } else {
            let sum = a + v + carry;
            let result = sum as u8;
            self.regs.p.set(Status::CARRY, sum > 0xFF);
            self.regs
                .p
                .set(Status::OVERFLOW, (!(a ^ v) & (a ^ sum) & 0x80) != 0);
            self.regs.a = result;
            self.set_nz(result);
        }
    }

    fn sbc(&mut self, value: u8) {
        if !self.flag(Status::DECIMAL) {
            self.adc(!value);
            return;
        }
        let a = self.regs.a as i16;
        let v = value as i16;
        let borrow = 1 - self.flag(Status::CARRY) as i16;

        // Flags follow the binary subtraction on NMOS parts.
        let binary = a - v - borrow;
        self.regs.p.set(Status::CARRY, binary >= 0);
        self.regs.p.set(
            Status::OVERFLOW,
            ((a ^ v) & (a ^ binary) & 0x80) != 0,
        );
        self.set_nz(binary as u8);

        let mut lo = (a & 0x0F) - (v & 0x0F) - borrow;
        if lo < 0 {
            lo = ((lo - 0x06) & 0x0F) - 0x10;
        }
        let mut sum = (a & 0xF0) - (v & 0xF0) + lo;
        if sum < 0 {
            sum -= 0x60;
        }
        self.regs.a = sum as u8;
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.regs.p.set(Status::CARRY, register >= value);
        self.set_nz(result);
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.regs.p.set(Status::CARRY, value & 0x80 != 0);
        let result = value << 1;
        self.set_nz(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.regs.p.set(Status::CARRY, value & 0x01 != 0);
        let result = value >> 1;
        self.set_nz(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = self.flag(Status::CARRY) as u8;
        self.regs.p.set(Status::CARRY, value & 0x80 != 0);
        let result = (value << 1) | carry_in;
        self.set_nz(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = (self.flag(Status::CARRY) as u8) << 7;
        self.regs.p.set(Status::CARRY, value & 0x01 != 0);
        let result = (value >> 1) | carry_in;
        self.set_nz(result);
        result
    }

    /// Branch helper; returns the extra cycles (1 taken, 2 taken across a page).
    fn branch(&mut self, condition: bool, operand: Operand) -> u8 {
        let Operand::Address(target) = operand else {
            return 0;
        };
        if !condition {
            return 0;
        }
        let extra = if page_crossed(self.regs.pc, target) { 2 } else { 1 };
        self.regs.pc = target;
        extra
    }

    /// Execute a decoded instruction; returns cycles beyond the base count.
    fn execute<B: Bus>(&mut self, bus: &mut B, opcode: &Opcode, operand: Operand) -> u8 {
        use Mnemonic::*;
        match opcode.mnemonic {
            Lda => {
                let v = self.load(bus, operand);
                self.regs.a = v;
                self.set_nz(v);
            }
            Ldx => {
                let v = self.load(bus, operand);
                self.regs.x = v;
                self.set_nz(v);
            }
            Ldy => {
                let v = self.load(bus, operand);
                self.regs.y = v;
                self.set_nz(v);
            }
            Sta => self.store(bus, operand, self.regs.a),
            Stx => self.store(bus, operand, self.regs.x),
            Sty => self.store(bus, operand, self.regs.y),

            Adc => {
                let v = self.load(bus, operand);
                self.adc(v);
            }
            Sbc => {
                let v = self.load(bus, operand);
                self.sbc(v);
            }
            And => {
                let v = self.regs.a & self.load(bus, operand);
                self.regs.a = v;
                self.set_nz(v);
            }
            Ora => {
                let v = self.regs.a | self.load(bus, operand);
                self.regs.a = v;
                self.set_nz(v);
            }
            Eor => {
                let v = self.regs.a ^ self.load(bus, operand);
                self.regs.a = v;
                self.set_nz(v);
            }
            Bit => {
                let v = self.load(bus, operand);
                self.regs.p.set(Status::ZERO, self.regs.a & v == 0);
                self.regs.p.set(Status::NEGATIVE, v & 0x80 != 0);
                self.regs.p.set(Status::OVERFLOW, v & 0x40 != 0);
            }
            Cmp => {
                let v = self.load(bus, operand);
                self.compare(self.regs.a, v);
            }
            Cpx => {
                let v = self.load(bus, operand);
                self.compare(self.regs.x, v);
            }
            Cpy => {
                let v = self.load(bus, operand);
                self.compare(self.regs.y, v);
            }

            Asl => {
                self.modify(bus, operand, Self::asl);
            }
            Lsr => {
                self.modify(bus, operand, Self::lsr);
            }
            Rol => {
                self.modify(bus, operand, Self::rol);
            }
            Ror => {
                self.modify(bus, operand, Self::ror);
            }
            Inc => {
                self.modify(bus, operand, |cpu, v| {
                    let r = v.wrapping_add(1);
                    cpu.set_nz(r);
                    r
                });
            }
            Dec => {
                self.modify(bus, operand, |cpu, v| {
                    let r = v.wrapping_sub(1);
                    cpu.set_nz(r);
                    r
                });
            }
            Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.set_nz(self.regs.x);
            }
            Iny => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.set_nz(self.regs.y);
            }
            Dex => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.set_nz(self.regs.x);
            }
            Dey => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.set_nz(self.regs.y);
            }

            Tax => {
                self.regs.x = self.regs.a;
                self.set_nz(self.regs.x);
            }
            Tay => {
                self.regs.y = self.regs.a;
                self.set_nz(self.regs.y);
            }
            Txa => {
                self.regs.a = self.regs.x;
                self.set_nz(self.regs.a);
            }
            Tya => {
                self.regs.a = self.regs.y;
                self.set_nz(self.regs.a);
            }
            Tsx => {
                self.regs.x = self.regs.sp;
                self.set_nz(self.regs.x);
            }
            Txs => self.regs.sp = self.regs.x,

            Pha => self.push(bus, self.regs.a),
            Php => {
                let p = self.regs.p | Status::BREAK | Status::UNUSED;
                self.push(bus, p.bits());
            }
            Pla => {
                let v = self.pull(bus);
                self.regs.a = v;
                self.set_nz(v);
            }
            Plp => {
                let pulled = Status::from_bits_retain(self.pull(bus));
                self.regs.p = (pulled - Status::BREAK) | Status::UNUSED;
            }

            Clc => self.regs.p.remove(Status::CARRY),
            Sec => self.regs.p.insert(Status::CARRY),
            Cld => self.regs.p.remove(Status::DECIMAL),
            Sed => self.regs.p.insert(Status::DECIMAL),
            Cli => self.regs.p.remove(Status::IRQ_DISABLE),
            Sei => self.regs.p.insert(Status::IRQ_DISABLE),
            Clv => self.regs.p.remove(Status::OVERFLOW),

            Bcc => return self.branch(!self.flag(Status::CARRY), operand),
            Bcs => return self.branch(self.flag(Status::CARRY), operand),
            Beq => return self.branch(self.flag(Status::ZERO), operand),
            Bne => return self.branch(!self.flag(Status::ZERO), operand),
            Bmi => return self.branch(self.flag(Status::NEGATIVE), operand),
            Bpl => return self.branch(!self.flag(Status::NEGATIVE), operand),
            Bvs => return self.branch(self.flag(Status::OVERFLOW), operand),
            Bvc => return self.branch(!self.flag(Status::OVERFLOW), operand),

            Jmp => {
                if let Operand::Address(target) = operand {
                    self.regs.pc = target;
                }
            }
            Jsr => {
                if let Operand::Address(target) = operand {
                    let ret = self.regs.pc.wrapping_sub(1);
                    self.push_u16(bus, ret);
                    self.regs.pc = target;
                }
            }
            Rts => {
                self.regs.pc = self.pull_u16(bus).wrapping_add(1);
            }
            Rti => {
                let pulled = Status::from_bits_retain(self.pull(bus));
                self.regs.p = (pulled - Status::BREAK) | Status::UNUSED;
                self.regs.pc = self.pull_u16(bus);
            }
            Brk => {
                let ret = self.regs.pc.wrapping_add(1);
                self.push_u16(bus, ret);
                let p = self.regs.p | Status::BREAK | Status::UNUSED;
                self.push(bus, p.bits());
                self.regs.p.insert(Status::IRQ_DISABLE);
                self.regs.pc = bus.read_u16(IRQ_VECTOR);
            }
            Nop => {
                if let Operand::Address(at) = operand {
                    bus.read(at);
                }
            }

            Lax => {
                let v = self.load(bus, operand);
                self.regs.a = v;
                self.regs.x = v;
                self.set_nz(v);
            }
            Sax => self.store(bus, operand, self.regs.a & self.regs.x),
            Dcp => {
                let r = self.modify(bus, operand, |_, v| v.wrapping_sub(1));
                self.compare(self.regs.a, r);
            }
            Isc => {
                let r = self.modify(bus, operand, |_, v| v.wrapping_add(1));
                self.sbc(r);
            }
            Slo => {
                let r = self.modify(bus, operand, Self::asl);
                self.regs.a |= r;
                self.set_nz(self.regs.a);
            }
            Rla => {
                let r = self.modify(bus, operand, Self::rol);
                self.regs.a &= r;
                self.set_nz(self.regs.a);
            }
            Sre => {
                let r = self.modify(bus, operand, Self::lsr);
                self.regs.a ^= r;
                self.set_nz(self.regs.a);
            }
            Rra => {
                let r = self.modify(bus, operand, Self::ror);
                self.adc(r);
            }
            Anc => {
                let v = self.regs.a & self.load(bus, operand);
                self.regs.a = v;
                self.set_nz(v);
                self.regs.p.set(Status::CARRY, v & 0x80 != 0);
            }
            Alr => {
                let v = self.regs.a & self.load(bus, operand);
                self.regs.a = self.lsr(v);
            }
        }
        0
    }
}

fn page_crossed(a: u16, b: u16) -> bool {
    (a & 0xFF00) != (b & 0xFF00)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ram {
        bytes: Vec<u8>,
        writes: Vec<(u16, u8)>,
    }

    impl Ram {
        fn with_program(at: u16, code: &[u8]) -> Self {
            let mut bytes = vec![0; 0x10000];
            bytes[at as usize..at as usize + code.len()].copy_from_slice(code);
            Self {
                bytes,
                writes: Vec::new(),
            }
        }
    }

    impl Bus for Ram {
        fn read(&mut self, address: u16) -> u8 {
            self.bytes[address as usize]
        }

        fn write(&mut self, address: u16, value: u8) {
            self.writes.push((address, value));
            self.bytes[address as usize] = value;
        }
    }

    fn cpu_at(pc: u16) -> Mos6502 {
        let mut cpu = Mos6502::new();
        cpu.regs.pc = pc;
        cpu
    }

    #[test]
    fn adc_sets_overflow_on_signed_wrap() {
        // LDA #$50; ADC #$50
        let mut ram = Ram::with_program(0x1000, &[0xA9, 0x50, 0x69, 0x50]);
        let mut cpu = cpu_at(0x1000);
        cpu.step(&mut ram).unwrap();
        cpu.step(&mut ram).unwrap();
        assert_eq!(cpu.regs.a, 0xA0);
        assert!(cpu.regs.p.contains(Status::OVERFLOW));
        assert!(cpu.regs.p.contains(Status::NEGATIVE));
        assert!(!cpu.regs.p.contains(Status::CARRY));
    }

    #[test]
    fn decimal_adc_and_sbc() {
        // SED; CLC; LDA #$19; ADC #$28 -> $47 ; SEC; SBC #$08 -> $39
        let code = [0xF8, 0x18, 0xA9, 0x19, 0x69, 0x28, 0x38, 0xE9, 0x08];
        let mut ram = Ram::with_program(0x1000, &code);
        let mut cpu = cpu_at(0x1000);
        for _ in 0..4 {
            cpu.step(&mut ram).unwrap();
        }
        assert_eq!(cpu.regs.a, 0x47);
        cpu.step(&mut ram).unwrap();
        cpu.step(&mut ram).unwrap();
        assert_eq!(cpu.regs.a, 0x39);
        assert!(cpu.regs.p.contains(Status::CARRY));
    }

    #[test]
    fn decimal_adc_carries_out_of_99() {
        // SED; SEC; LDA #$99; ADC #$00 -> $00, C=1
        let mut ram = Ram::with_program(0x1000, &[0xF8, 0x38, 0xA9, 0x99, 0x69, 0x00]);
        let mut cpu = cpu_at(0x1000);
        for _ in 0..4 {
            cpu.step(&mut ram).unwrap();
        }
        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.p.contains(Status::CARRY));
    }

    #[test]
    fn indirect_indexed_page_cross_costs_a_cycle() {
        // LDA ($10),Y with pointer $10FF and Y=1
        let mut ram = Ram::with_program(0x1000, &[0xB1, 0x10]);
        ram.bytes[0x10] = 0xFF;
        ram.bytes[0x11] = 0x10;
        ram.bytes[0x1100] = 0x42;
        let mut cpu = cpu_at(0x1000);
        cpu.regs.y = 1;
        let cycles = cpu.step(&mut ram).unwrap();
        assert_eq!(cpu.regs.a, 0x42);
        assert_eq!(cycles, 6);
    }

    #[test]
    fn taken_branch_cycle_penalties() {
        // BNE +2 (taken, same page) = 3 cycles
        let mut ram = Ram::with_program(0x1000, &[0xD0, 0x02]);
        let mut cpu = cpu_at(0x1000);
        assert_eq!(cpu.step(&mut ram).unwrap(), 3);
        assert_eq!(cpu.regs.pc, 0x1004);

        // BEQ not taken = 2 cycles
        let mut ram = Ram::with_program(0x1000, &[0xF0, 0x02]);
        let mut cpu = cpu_at(0x1000);
        assert_eq!(cpu.step(&mut ram).unwrap(), 2);

        // BNE across page = 4 cycles
        let mut ram = Ram::with_program(0x10FD, &[0xD0, 0x10]);
        let mut cpu = cpu_at(0x10FD);
        assert_eq!(cpu.step(&mut ram).unwrap(), 4);
        assert_eq!(cpu.regs.pc, 0x110F);
    }

    #[test]
    fn jmp_indirect_wraps_within_page() {
        let mut ram = Ram::with_program(0x1000, &[0x6C, 0xFF, 0x20]);
        ram.bytes[0x20FF] = 0x34;
        ram.bytes[0x2000] = 0x12;
        ram.bytes[0x2100] = 0x99;
        let mut cpu = cpu_at(0x1000);
        cpu.step(&mut ram).unwrap();
        assert_eq!(cpu.regs.pc, 0x1234);
    }

    #[test]
    fn jsr_rts_round_trip() {
        // JSR $1010 ; at $1010: RTS
        let mut ram = Ram::with_program(0x1000, &[0x20, 0x10, 0x10]);
        ram.bytes[0x1010] = 0x60;
        let mut cpu = cpu_at(0x1000);
        assert_eq!(cpu.step(&mut ram).unwrap(), 6);
        assert_eq!(cpu.regs.pc, 0x1010);
        assert_eq!(cpu.regs.sp, 0xFD);
        cpu.step(&mut ram).unwrap();
        assert_eq!(cpu.regs.pc, 0x1003);
        assert_eq!(cpu.regs.sp, 0xFF);
    }

    #[test]
    fn rmw_performs_double_write() {
        // INC $D404
        let mut ram = Ram::with_program(0x1000, &[0xEE, 0x04, 0xD4]);
        ram.bytes[0xD404] = 0x40;
        let mut cpu = cpu_at(0x1000);
        assert_eq!(cpu.step(&mut ram).unwrap(), 6);
        assert_eq!(ram.writes, vec![(0xD404, 0x40), (0xD404, 0x41)]);
    }

    #[test]
    fn zero_page_x_wraps() {
        // LDA $F0,X with X=$20 reads $0010
        let mut ram = Ram::with_program(0x1000, &[0xB5, 0xF0]);
        ram.bytes[0x10] = 0x77;
        let mut cpu = cpu_at(0x1000);
        cpu.regs.x = 0x20;
        cpu.step(&mut ram).unwrap();
        assert_eq!(cpu.regs.a, 0x77);
    }

    #[test]
    fn php_plp_ignore_break_bit() {
        // PHP; PLP
        let mut ram = Ram::with_program(0x1000, &[0x08, 0x28]);
        let mut cpu = cpu_at(0x1000);
        cpu.step(&mut ram).unwrap();
        assert_eq!(ram.bytes[0x01FF] & 0x30, 0x30);
        cpu.step(&mut ram).unwrap();
        assert!(!cpu.regs.p.contains(Status::BREAK));
        assert!(cpu.regs.p.contains(Status::UNUSED));
    }

    #[test]
    fn compare_sets_carry_when_greater_or_equal() {
        // LDA #$10; CMP #$10; CMP #$11
        let mut ram = Ram::with_program(0x1000, &[0xA9, 0x10, 0xC9, 0x10, 0xC9, 0x11]);
        let mut cpu = cpu_at(0x1000);
        cpu.step(&mut ram).unwrap();
        cpu.step(&mut ram).unwrap();
        assert!(cpu.regs.p.contains(Status::CARRY));
        assert!(cpu.regs.p.contains(Status::ZERO));
        cpu.step(&mut ram).unwrap();
        assert!(!cpu.regs.p.contains(Status::CARRY));
        assert!(cpu.regs.p.contains(Status::NEGATIVE));
    }

    #[test]
    fn undocumented_lax_and_dcp() {
        // LAX $20 ; DCP $21
        let mut ram = Ram::with_program(0x1000, &[0xA7, 0x20, 0xC7, 0x21]);
        ram.bytes[0x20] = 0x05;
        ram.bytes[0x21] = 0x06;
        let mut cpu = cpu_at(0x1000);
        cpu.step(&mut ram).unwrap();
        assert_eq!((cpu.regs.a, cpu.regs.x), (0x05, 0x05));
        cpu.step(&mut ram).unwrap();
        assert_eq!(ram.bytes[0x21], 0x05);
        assert!(cpu.regs.p.contains(Status::ZERO));
        assert!(cpu.regs.p.contains(Status::CARRY));
    }

    #[test]
    fn unsupported_opcode_is_reported() {
        let mut ram = Ram::with_program(0x1000, &[0x02]);
        let mut cpu = cpu_at(0x1000);
        match cpu.step(&mut ram) {
            Err(EmulationError::UnsupportedInstruction { opcode, address }) => {
                assert_eq!(opcode, 0x02);
                assert_eq!(address, 0x1000);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
