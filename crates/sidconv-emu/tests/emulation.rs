use anyhow::Result;
use sidconv_emu::{
    emulate, Clock, EmulationConfig, EmulationError, EmulationSession, Program, SidRegister,
};

/// Three-voice toy driver: every frame it bumps a counter and writes it to
/// each voice's frequency and control registers.
fn busy_program() -> Program {
    let code = vec![
        // $1000 init: LDA #$00; STA $30; RTS
        0xA9, 0x00, 0x85, 0x30, 0x60,
        // $1005 play: INC $30; LDX #$00
        0xE6, 0x30, 0xA2, 0x00,
        // loop: LDA $30; STA $D400,X; STA $D404,X; TXA; CLC; ADC #$07; TAX; CPX #$15; BNE loop
        0xA5, 0x30, 0x9D, 0x00, 0xD4, 0x9D, 0x04, 0xD4, 0x8A, 0x18, 0x69, 0x07, 0xAA, 0xE0,
        0x15, 0xD0, 0xEF,
        // RTS
        0x60,
    ];
    Program::new(0x1000, code, 0x1000, 0x1005)
}

#[test]
fn emulation_is_deterministic() -> Result<()> {
    let config = EmulationConfig::default();
    let first = emulate(&busy_program(), 50, &config)?;
    let second = emulate(&busy_program(), 50, &config)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn trace_is_ordered_and_offsets_reset_each_frame() -> Result<()> {
    let config = EmulationConfig::default();
    let trace = emulate(&busy_program(), 20, &config)?;
    assert_eq!(trace.entries.len(), 20 * 6);
    for pair in trace.entries.windows(2) {
        assert!((pair[0].frame, pair[0].cycle_offset) <= (pair[1].frame, pair[1].cycle_offset));
    }
    let first_offsets: Vec<u32> = trace.frame(0).iter().map(|e| e.cycle_offset).collect();
    for frame in 1..20 {
        let offsets: Vec<u32> = trace.frame(frame).iter().map(|e| e.cycle_offset).collect();
        assert_eq!(offsets, first_offsets);
    }
    assert!(first_offsets
        .iter()
        .all(|c| *c < Clock::Pal.cycles_per_frame()));
    Ok(())
}

#[test]
fn single_write_at_frame_zero() -> Result<()> {
    // init: RTS / play: LDA #$09; STA $D400; RTS
    let program = Program::new(0x1000, vec![0x60, 0xA9, 0x09, 0x8D, 0x00, 0xD4, 0x60], 0x1000, 0x1001);
    let trace = emulate(&program, 1, &EmulationConfig::default())?;
    let frame0: Vec<_> = trace
        .frame(0)
        .iter()
        .map(|e| (e.frame, e.register, e.value))
        .collect();
    assert_eq!(frame0, vec![(0, SidRegister::Voice0FreqLo, 0x09)]);
    Ok(())
}

#[test]
fn mirrored_writes_land_on_the_base_register() -> Result<()> {
    // play: LDA #$0F; STA $D7F8; RTS  ($D7F8 mirrors $D418)
    let program = Program::new(0x1000, vec![0x60, 0xA9, 0x0F, 0x8D, 0xF8, 0xD7, 0x60], 0x1000, 0x1001);
    let trace = emulate(&program, 1, &EmulationConfig::default())?;
    assert_eq!(trace.entries[0].register, SidRegister::ModeVolume);
    Ok(())
}

#[test]
fn unsupported_opcode_aborts_the_run() {
    // play: KIL ($02)
    let program = Program::new(0x1000, vec![0x60, 0x02], 0x1000, 0x1001);
    let err = emulate(&program, 1, &EmulationConfig::default()).unwrap_err();
    assert_eq!(
        err,
        EmulationError::UnsupportedInstruction {
            opcode: 0x02,
            address: 0x1001
        }
    );
    assert!(err.is_recoverable());
}

#[test]
fn session_step_and_call() -> Result<()> {
    let program = busy_program();
    let mut session = EmulationSession::new(EmulationConfig::default());
    session.load(program.image()?, program.init);
    let cycles = session.step()?;
    assert_eq!(cycles, 2);
    assert_eq!(session.registers().pc, 0x1002);

    let spent = session.call(0x1005, 0)?;
    assert!(spent > 0);
    assert_eq!(session.memory().read(0x30), 1);
    assert_eq!(session.sid().get(SidRegister::Voice2Control), 1);
    Ok(())
}
