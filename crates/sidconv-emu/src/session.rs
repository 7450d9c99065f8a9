//! Emulation sessions: one CPU, one memory image and one trace per job.
//!
//! A session loads a program, runs its init routine once, then calls the
//! play routine once per frame while recording every SID write. Routines are
//! entered through a synthetic return address so that their final `RTS`/`RTI`
//! lands on [`RETURN_ADDRESS`], the halt sentinel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::cpu::{Bus, Mos6502, Registers, Status, IRQ_VECTOR};
use crate::error::{EmulationError, Result};
use crate::memory::MemoryImage;
use crate::sid::{SidBank, SidRegister, SID_BASE, SID_END};
use crate::trace::{FrameTrace, TraceEntry};

/// Halt sentinel: a routine has returned once the PC lands here.
pub const RETURN_ADDRESS: u16 = 0x0000;

/// KERNAL IRQ vector in RAM.
pub const KERNAL_IRQ_VECTOR: u16 = 0x0314;

/// KERNAL IRQ exit points that interrupt handlers commonly jump to.
const KERNAL_IRQ_EXIT: u16 = 0xEA31;
const KERNAL_IRQ_RESTORE: u16 = 0xEA81;

/// Video standard, which fixes the frame length in cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Clock {
    /// 50 Hz, 19 656 cycles per frame.
    #[default]
    Pal,
    /// 60 Hz, 17 095 cycles per frame.
    Ntsc,
}

impl Clock {
    /// CPU cycles per video frame.
    pub fn cycles_per_frame(self) -> u32 {
        match self {
            Clock::Pal => 19_656,
            Clock::Ntsc => 17_095,
        }
    }
}

/// Emulation limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulationConfig {
    /// Frame timing.
    pub clock: Clock,
    /// Frames worth of cycles the init routine may take.
    pub cycle_budget_frames: u32,
    /// Cycle budget for one play call.
    pub max_call_cycles: u64,
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            clock: Clock::Pal,
            cycle_budget_frames: 50,
            max_call_cycles: 200_000,
        }
    }
}

impl EmulationConfig {
    fn init_budget(&self) -> u64 {
        self.cycle_budget_frames as u64 * self.clock.cycles_per_frame() as u64
    }
}

/// How the play routine is reached each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    /// `JSR` to this address once per frame.
    Subroutine(u16),
    /// Init installs an IRQ handler (`$0314` or `$FFFE`) that ends in `RTI`.
    Interrupt,
}

/// A loadable player: one memory block plus entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Address the data is loaded at.
    pub load_address: u16,
    /// Code and data.
    pub data: Vec<u8>,
    /// Init routine, entered with the song number in A.
    pub init: u16,
    /// Play routine.
    pub play: PlayMode,
    /// Zero-based song number.
    pub song: u8,
}

impl Program {
    /// Program that is called as a subroutine every frame.
    pub fn new(load_address: u16, data: Vec<u8>, init: u16, play: u16) -> Self {
        Self {
            load_address,
            data,
            init,
            play: PlayMode::Subroutine(play),
            song: 0,
        }
    }

    /// Memory image with the program loaded.
    pub fn image(&self) -> Result<MemoryImage> {
        MemoryImage::with_block(self.load_address, &self.data)
    }

    /// First address past the program.
    pub fn end_address(&self) -> usize {
        self.load_address as usize + self.data.len()
    }
}

/// Shared cancellation flag for one job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Memory plus SID bridge seen by the CPU.
struct C64Bus {
    memory: MemoryImage,
    sid: SidBank,
    pending: Vec<(SidRegister, u8)>,
}

impl Bus for C64Bus {
    fn read(&mut self, address: u16) -> u8 {
        if (SID_BASE..=SID_END).contains(&address) {
            self.sid.read((address & 0x1F) as u8)
        } else {
            self.memory.read(address)
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        if (SID_BASE..=SID_END).contains(&address) {
            if let Some(register) = self.sid.write((address & 0x1F) as u8, value) {
                self.pending.push((register, value));
            }
        } else {
            self.memory.write(address, value);
        }
    }
}

/// One emulation job.
pub struct EmulationSession {
    config: EmulationConfig,
    cpu: Mos6502,
    bus: C64Bus,
    play: Option<PlayMode>,
    trace: Option<FrameTrace>,
    frame: u32,
    frame_cycle: u32,
    overruns: u32,
    cancel: Option<CancelToken>,
}

impl EmulationSession {
    /// Session with empty memory.
    pub fn new(config: EmulationConfig) -> Self {
        Self {
            config,
            cpu: Mos6502::new(),
            bus: C64Bus {
                memory: MemoryImage::new(),
                sid: SidBank::new(),
                pending: Vec::new(),
            },
            play: None,
            trace: None,
            frame: 0,
            frame_cycle: 0,
            overruns: 0,
            cancel: None,
        }
    }

    /// Attach a cancellation token checked at frame boundaries.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Install a memory image, point the CPU at `entry` and start recording.
    ///
    /// `entry` doubles as the play subroutine for [`run_frames`](Self::run_frames).
    pub fn load(&mut self, image: MemoryImage, entry: u16) {
        self.bus.memory = image;
        self.bus.sid = SidBank::new();
        self.bus.pending.clear();
        self.cpu = Mos6502::new();
        self.cpu.regs.pc = entry;
        self.play = Some(PlayMode::Subroutine(entry));
        self.overruns = 0;
        self.begin_trace();
    }

    /// Load a program, run its init routine and start recording.
    pub fn load_program(&mut self, program: &Program) -> Result<()> {
        self.load(program.image()?, program.init);
        if program.play == PlayMode::Interrupt {
            self.install_kernal_exit()?;
        }
        debug!(
            "init ${:04X} (song {}) for program at ${:04X}..${:04X}",
            program.init,
            program.song,
            program.load_address,
            program.end_address()
        );
        let budget = self.config.init_budget();
        self.run_routine(program.init, program.song, budget)?;
        self.play = Some(program.play);
        self.begin_trace();
        Ok(())
    }

    /// Start a new trace from the current register state.
    pub fn begin_trace(&mut self) {
        self.trace = Some(FrameTrace::new(self.bus.sid.snapshot()));
        self.frame = 0;
        self.frame_cycle = 0;
    }

    /// Execute one instruction; returns its cycle count.
    pub fn step(&mut self) -> Result<u8> {
        let cycles = self.cpu.step(&mut self.bus)?;
        if !self.bus.pending.is_empty() {
            let count = self.bus.pending.len() as u32;
            let end = self.frame_cycle + cycles as u32;
            for (i, (register, value)) in self.bus.pending.drain(..).enumerate() {
                if let Some(trace) = self.trace.as_mut() {
                    trace.push(TraceEntry {
                        frame: self.frame,
                        cycle_offset: end.saturating_sub(count) + i as u32,
                        register,
                        value,
                    });
                }
            }
        }
        self.frame_cycle += cycles as u32;
        Ok(cycles)
    }

    /// Run the subroutine at `address` with `a` in the accumulator until it
    /// returns. Returns the cycles spent.
    pub fn call(&mut self, address: u16, a: u8) -> Result<u64> {
        let budget = self.config.max_call_cycles;
        self.run_routine(address, a, budget)
    }

    /// Run `n` frames, calling the play routine once per frame.
    pub fn run_frames(&mut self, n: u32) -> Result<()> {
        let play = self.play.ok_or(EmulationError::NoPlayRoutine)?;
        if self.trace.is_none() {
            self.begin_trace();
        }
        let frame_cycles = self.config.clock.cycles_per_frame() as u64;
        let mut overruns = 0u32;
        let mut longest = 0u64;
        for _ in 0..n {
            self.check_cancelled()?;
            self.frame_cycle = 0;
            let cycles = match play {
                PlayMode::Subroutine(address) => self.call(address, 0)?,
                PlayMode::Interrupt => self.interrupt()?,
            };
            if cycles > frame_cycles {
                overruns += 1;
                longest = longest.max(cycles);
            }
            if let Some(trace) = self.trace.as_mut() {
                trace.frames += 1;
            }
            self.frame += 1;
        }
        if overruns > 0 {
            warn!(
                "play routine overran the frame in {overruns} of {n} frames \
                 (longest {longest} cycles, frame holds {frame_cycles})"
            );
            self.overruns += overruns;
        }
        trace!("ran {n} frames, now at frame {}", self.frame);
        Ok(())
    }

    /// Play calls since loading that took longer than one frame.
    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    /// Hand out the recorded trace, consuming the session.
    pub fn finish(self) -> FrameTrace {
        self.trace
            .unwrap_or_else(|| FrameTrace::new(self.bus.sid.snapshot()))
    }

    /// Current memory contents.
    pub fn memory(&self) -> &MemoryImage {
        &self.bus.memory
    }

    /// Current SID register state.
    pub fn sid(&self) -> &SidBank {
        &self.bus.sid
    }

    /// Current CPU registers.
    pub fn registers(&self) -> &Registers {
        &self.cpu.regs
    }

    /// Frames emulated since the trace started.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(EmulationError::Cancelled),
            _ => Ok(()),
        }
    }

    fn run_routine(&mut self, entry: u16, a: u8, budget: u64) -> Result<u64> {
        self.check_cancelled()?;
        let ret = RETURN_ADDRESS.wrapping_sub(1);
        self.cpu.push_u16(&mut self.bus, ret);
        self.cpu.regs.a = a;
        self.cpu.regs.pc = entry;
        self.run_to_sentinel(entry, budget)
    }

    fn interrupt(&mut self) -> Result<u64> {
        let kernal = self.bus.memory.read_u16(KERNAL_IRQ_VECTOR);
        let hardware = self.bus.memory.read_u16(IRQ_VECTOR);
        let (entry, through_kernal) = if kernal != 0 {
            (kernal, true)
        } else if hardware != 0 {
            (hardware, false)
        } else {
            return Err(EmulationError::NoPlayRoutine);
        };

        self.cpu.push_u16(&mut self.bus, RETURN_ADDRESS);
        let p = (self.cpu.regs.p | Status::UNUSED) - Status::BREAK;
        self.cpu.push(&mut self.bus, p.bits());
        self.cpu.regs.p.insert(Status::IRQ_DISABLE);
        if through_kernal {
            // The KERNAL IRQ prologue saves A, X and Y before jumping through $0314.
            let (a, x, y) = (self.cpu.regs.a, self.cpu.regs.x, self.cpu.regs.y);
            self.cpu.push(&mut self.bus, a);
            self.cpu.push(&mut self.bus, x);
            self.cpu.push(&mut self.bus, y);
        }
        self.cpu.regs.pc = entry;
        let budget = self.config.max_call_cycles;
        self.run_to_sentinel(entry, budget)
    }

    fn run_to_sentinel(&mut self, entry: u16, budget: u64) -> Result<u64> {
        let mut spent = 0u64;
        while self.cpu.regs.pc != RETURN_ADDRESS {
            spent += self.step()? as u64;
            if spent > budget {
                return Err(EmulationError::ExecutionTimeout {
                    entry,
                    frame: self.frame,
                    cycles: spent,
                });
            }
        }
        Ok(spent)
    }

    /// Provide the KERNAL IRQ exit (`PLA TAY PLA TAX PLA RTI`) when the
    /// program does not occupy that memory.
    fn install_kernal_exit(&mut self) -> Result<()> {
        let restore = [0x68, 0xA8, 0x68, 0xAA, 0x68, 0x40];
        let exit = [0x4C, KERNAL_IRQ_RESTORE as u8, (KERNAL_IRQ_RESTORE >> 8) as u8];
        let memory = &mut self.bus.memory;
        let free = |memory: &MemoryImage, at: u16, len: usize| {
            memory
                .slice(at as usize..at as usize + len)
                .iter()
                .all(|b| *b == 0)
        };
        if free(memory, KERNAL_IRQ_RESTORE, restore.len()) {
            memory.load(KERNAL_IRQ_RESTORE, &restore)?;
        }
        if free(memory, KERNAL_IRQ_EXIT, exit.len()) {
            memory.load(KERNAL_IRQ_EXIT, &exit)?;
        }
        Ok(())
    }
}

/// Run `program` for `frames` frames and return its SID trace.
///
/// Deterministic: the same inputs always give the same trace.
pub fn emulate(program: &Program, frames: u32, config: &EmulationConfig) -> Result<FrameTrace> {
    let mut session = EmulationSession::new(config.clone());
    session.load_program(program)?;
    session.run_frames(frames)?;
    Ok(session.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    // init: LDA #$0F; STA $D418; RTS
    // play: INC $20; LDA $20; STA $D400; RTS
    fn counter_program() -> Program {
        let code = vec![
            0xA9, 0x0F, 0x8D, 0x18, 0xD4, 0x60, // $1000 init
            0xE6, 0x20, 0xA5, 0x20, 0x8D, 0x00, 0xD4, 0x60, // $1006 play
        ];
        Program::new(0x1000, code, 0x1000, 0x1006)
    }

    #[test]
    fn init_writes_are_initial_state_not_entries() {
        let trace = emulate(&counter_program(), 3, &EmulationConfig::default()).unwrap();
        assert_eq!(trace.initial[SidRegister::ModeVolume.index()], 0x0F);
        assert_eq!(trace.frames, 3);
        assert_eq!(trace.entries.len(), 3);
        assert!(trace
            .entries
            .iter()
            .all(|e| e.register == SidRegister::Voice0FreqLo));
        assert_eq!(trace.frame(2)[0].value, 3);
    }

    #[test]
    fn cycle_offset_is_write_cycle_within_frame() {
        let trace = emulate(&counter_program(), 2, &EmulationConfig::default()).unwrap();
        // INC zp (5) + LDA zp (3) + STA abs (4): the store lands on cycle 11.
        for entry in &trace.entries {
            assert_eq!(entry.cycle_offset, 11);
        }
    }

    #[test]
    fn loaded_images_record_stepped_writes() {
        // $1000: LDA #$09; STA $D400; RTS
        let mut image = MemoryImage::new();
        image.load(0x1000, &[0xA9, 0x09, 0x8D, 0x00, 0xD4, 0x60]).unwrap();
        let mut session = EmulationSession::new(EmulationConfig::default());
        session.load(image.clone(), 0x1000);
        session.step().unwrap();
        session.step().unwrap();
        let trace = session.finish();
        assert_eq!(trace.entries.len(), 1);
        assert_eq!(trace.entries[0].register, SidRegister::Voice0FreqLo);
        assert_eq!(trace.entries[0].value, 0x09);

        let mut session = EmulationSession::new(EmulationConfig::default());
        session.load(image, 0x1000);
        session.run_frames(2).unwrap();
        let trace = session.finish();
        assert_eq!(trace.frames, 2);
        assert_eq!(trace.frame(1).len(), 1);
    }

    #[test]
    fn play_calls_longer_than_a_frame_are_counted() {
        // init: RTS
        // play: LDY #$20; LDX #$00; DEX; BNE -3; DEY; BNE -8; RTS
        let code = vec![
            0x60, // $1000
            0xA0, 0x20, 0xA2, 0x00, 0xCA, 0xD0, 0xFD, 0x88, 0xD0, 0xF8, 0x60, // $1001
        ];
        let program = Program::new(0x1000, code, 0x1000, 0x1001);
        let mut session = EmulationSession::new(EmulationConfig::default());
        session.load_program(&program).unwrap();
        session.run_frames(2).unwrap();
        assert_eq!(session.overruns(), 2);

        let mut session = EmulationSession::new(EmulationConfig::default());
        session.load_program(&counter_program()).unwrap();
        session.run_frames(2).unwrap();
        assert_eq!(session.overruns(), 0);
    }

    #[test]
    fn endless_play_routine_times_out() {
        // play: JMP $1001
        let program = Program::new(0x1000, vec![0x60, 0x4C, 0x01, 0x10], 0x1000, 0x1001);
        let config = EmulationConfig {
            max_call_cycles: 1_000,
            ..EmulationConfig::default()
        };
        match emulate(&program, 1, &config) {
            Err(EmulationError::ExecutionTimeout { entry, frame, .. }) => {
                assert_eq!(entry, 0x1001);
                assert_eq!(frame, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancelled_token_stops_at_frame_boundary() {
        let token = CancelToken::new();
        let mut session = EmulationSession::new(EmulationConfig::default()).with_cancel(token.clone());
        session.load_program(&counter_program()).unwrap();
        session.run_frames(2).unwrap();
        token.cancel();
        assert_eq!(session.run_frames(1), Err(EmulationError::Cancelled));
        assert_eq!(session.frame(), 2);
    }

    #[test]
    fn interrupt_handler_through_kernal_vector() {
        // init: LDA #<irq; STA $0314; LDA #>irq; STA $0315; RTS
        // irq:  INC $D401; JMP $EA31
        let code = vec![
            0xA9, 0x0B, 0x8D, 0x14, 0x03, 0xA9, 0x10, 0x8D, 0x15, 0x03, 0x60, // $1000
            0xEE, 0x01, 0xD4, 0x4C, 0x31, 0xEA, // $100B
        ];
        let program = Program {
            play: PlayMode::Interrupt,
            ..Program::new(0x1000, code, 0x1000, 0)
        };
        let trace = emulate(&program, 4, &EmulationConfig::default()).unwrap();
        let snaps = trace.snapshots();
        assert_eq!(snaps[3][SidRegister::Voice0FreqHi.index()], 4);
        // INC performs the unmodified write first.
        assert_eq!(trace.frame(0).len(), 2);
    }
}
