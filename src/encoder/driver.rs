//! The built-in `minimal` driver.
//!
//! Plays three voices from order lists of `(transpose, sequence)` pairs and
//! two-byte sequence events, with per-frame wave, pulse and filter programs.
//! Rows advance every `tempo` frames. Zero page `$FB-$FE` holds the sequence
//! and order list pointers while a row is read.

use sidconv_emu::cpu::opcodes::Mnemonic::{self, *};

use crate::error::{ConvertError, Result};
use crate::model::CommandKind;

use super::asm::{Assembler, Operand, Operand::*, Target};
use super::layout::Layout;
use super::template::{
    EntryPoints, Limits, Slot, StatePointer, Symbol, TableSpec, Template,
};

/// Name of the built-in template.
pub const MINIMAL: &str = "minimal";

/// Default load address.
pub const DEFAULT_BASE: u16 = 0x1000;

/// Sequence event classes.
pub mod event {
    /// Note on, param = pitch.
    pub const NOTE_ON: u8 = 0x00;
    /// Gate off.
    pub const NOTE_OFF: u8 = 0x01;
    /// Legato for the next note.
    pub const TIE: u8 = 0x02;
    /// Select instrument, param = id.
    pub const INSTRUMENT: u8 = 0x03;
    /// Rest, param = rows.
    pub const REST: u8 = 0x04;
    /// Command, param = command table row.
    pub const COMMAND: u8 = 0x05;
    /// End of sequence.
    pub const END: u8 = 0x7F;
}

/// Order list markers.
pub mod order {
    /// Added to the transpose byte.
    pub const TRANSPOSE_BIAS: u8 = 0x80;
    /// Loop marker, followed by the entry index.
    pub const LOOP: u8 = 0xFF;
    /// Stop marker, followed by a zero byte.
    pub const STOP: u8 = 0xFE;
}

const ZP_SEQ: u8 = 0xFB;
const ZP_ORDER: u8 = 0xFD;

// Driver variables; per-voice arrays are three bytes wide.
const OL_LO: u16 = 0;
const OL_HI: u16 = 3;
const OL_POS: u16 = 6;
const SEQ_LO: u16 = 9;
const SEQ_HI: u16 = 12;
const TRANSPOSE: u16 = 15;
const WAIT: u16 = 18;
const NOTE: u16 = 21;
const INSTR: u16 = 24;
const TIE: u16 = 27;
const GATE: u16 = 30;
const ACTIVE: u16 = 33;
const STOPPED: u16 = 36;
const WAVE_POS: u16 = 39;
const WAVE_VAL: u16 = 42;
const WAVE_OFF: u16 = 45;
const PULSE_POS: u16 = 48;
const PULSE_HOLD: u16 = 51;
const PW_LO: u16 = 54;
const PW_HI: u16 = 57;
const TEMPO: u16 = 60;
const TICK: u16 = 61;
const FILTER_POS: u16 = 62;
const MODE_VOL: u16 = 63;
const PARAM: u16 = 64;
const TMP_FLAGS: u16 = 65;
const TMP_AD: u16 = 66;
const TMP_SR: u16 = 67;
const TMP_LO: u16 = 68;
const TMP_HI: u16 = 69;
const VARIABLES: u16 = 70;

fn var(offset: u16) -> Target {
    Target::Symbol(Symbol::Variables, offset)
}

fn label(name: &'static str) -> Target {
    Target::Label(name)
}

fn sid(register: u16) -> Target {
    Target::Fixed(0xD400 + register)
}

fn sym(symbol: Symbol) -> Target {
    Target::Symbol(symbol, 0)
}

/// Column `column` of `slot`, given the template's capacities.
fn column(template: &Template, slot: Slot, column: u8) -> Target {
    let capacity = template.spec(slot).map_or(0, |s| s.capacity as u16);
    Target::Symbol(Symbol::Table(slot), column as u16 * capacity)
}

fn spec(slot: Slot, columns: u8, capacity: u8, name: &str) -> TableSpec {
    TableSpec {
        slot,
        columns,
        capacity,
        name: name.to_string(),
    }
}

/// Build and assemble the `minimal` template.
pub fn minimal() -> Result<Template> {
    let mut template = Template {
        name: MINIMAL.to_string(),
        driver_type: 0x01,
        version: [1, 0],
        base: DEFAULT_BASE,
        code: Vec::new(),
        variables: VARIABLES,
        entry: EntryPoints {
            init: 0,
            play: 3,
            stop: 6,
        },
        tables: vec![
            spec(Slot::Instruments, 6, 32, "Instruments"),
            spec(Slot::Commands, 3, 32, "Commands"),
            spec(Slot::Wave, 2, 128, "Wave"),
            spec(Slot::Pulse, 3, 128, "Pulse"),
            spec(Slot::Filter, 4, 128, "Filter"),
        ],
        limits: Limits {
            max_sequences: 128,
            max_order_entries: 127,
        },
        supported_commands: vec![
            CommandKind::SetAdsr,
            CommandKind::SetTempo,
            CommandKind::SetVolume,
            CommandKind::FilterProgram,
        ],
        accepted_families: vec!["*".to_string()],
        relocations: Vec::new(),
        state_pointers: vec![
            StatePointer {
                name: "tempo".into(),
                symbol: Symbol::SongSettings,
                addend: 0,
            },
            StatePointer {
                name: "variables".into(),
                symbol: Symbol::Variables,
                addend: 0,
            },
            StatePointer {
                name: "filter_position".into(),
                symbol: Symbol::Variables,
                addend: FILTER_POS,
            },
        ],
    };

    let mut asm = Assembler::new(template.base);
    emit(&mut asm, &template);
    let layout = Layout::with_code_len(&template, template.base, asm.len())?;
    let assembled = asm
        .finish(|symbol| layout.address(symbol))
        .map_err(|msg| ConvertError::InvalidTemplate {
            name: MINIMAL.to_string(),
            msg,
        })?;
    template.code = assembled.code;
    template.relocations = assembled.relocations;
    template.check()?;
    Ok(template)
}

/// Shorthand for a sequence of instructions.
fn ops(a: &mut Assembler, list: &[(Mnemonic, Operand)]) {
    for (mnemonic, operand) in list {
        a.i(*mnemonic, *operand);
    }
}

fn emit(a: &mut Assembler, t: &Template) {
    let ins = |c| column(t, Slot::Instruments, c);
    let cmd = |c| column(t, Slot::Commands, c);
    let wave = |c| column(t, Slot::Wave, c);
    let pulse = |c| column(t, Slot::Pulse, c);
    let filter = |c| column(t, Slot::Filter, c);

    // Jump table: init, play, stop.
    a.i(Jmp, Abs(label("init")));
    a.i(Jmp, Abs(label("play")));
    a.i(Jmp, Abs(label("stop")));
    a.label("voice_off");
    a.bytes(&[0, 7, 14]);

    a.label("init");
    ops(a, &[(Lda, Imm(0)), (Ldx, Imm(VARIABLES as u8 - 1))]);
    a.label("init_clear");
    ops(
        a,
        &[
            (Sta, AbsX(var(0))),
            (Dex, Implied),
            (Bpl, Branch("init_clear")),
            (Lda, Abs(sym(Symbol::SongSettings))),
            (Sta, Abs(var(TEMPO))),
            (Lda, Imm(1)),
            (Sta, Abs(var(TICK))),
            (Lda, Imm(0xFF)),
            (Sta, Abs(var(FILTER_POS))),
            (Lda, Imm(0x0F)),
            (Sta, Abs(var(MODE_VOL))),
            (Sta, Abs(sid(0x18))),
            (Ldx, Imm(2)),
        ],
    );
    a.label("init_voice");
    ops(
        a,
        &[
            (Lda, Imm(0xFF)),
            (Sta, AbsX(var(PULSE_POS))),
            (Lda, AbsX(sym(Symbol::OrderListsLo))),
            (Sta, AbsX(var(OL_LO))),
            (Lda, AbsX(sym(Symbol::OrderListsHi))),
            (Sta, AbsX(var(OL_HI))),
            (Jsr, Abs(label("next_order"))),
            (Dex, Implied),
            (Bpl, Branch("init_voice")),
            (Rts, Implied),
        ],
    );

    // Load the next order list entry of voice X.
    a.label("next_order");
    ops(
        a,
        &[
            (Lda, AbsX(var(OL_LO))),
            (Sta, Zp(ZP_ORDER)),
            (Lda, AbsX(var(OL_HI))),
            (Sta, Zp(ZP_ORDER + 1)),
            (Ldy, AbsX(var(OL_POS))),
            (Lda, IndY(ZP_ORDER)),
            (Cmp, Imm(order::STOP)),
            (Beq, Branch("order_stop")),
            (Cmp, Imm(order::LOOP)),
            (Bne, Branch("order_entry")),
            (Iny, Implied),
            (Lda, IndY(ZP_ORDER)),
            (Asl, Acc),
            (Sta, AbsX(var(OL_POS))),
            (Tay, Implied),
            (Lda, IndY(ZP_ORDER)),
        ],
    );
    a.label("order_entry");
    ops(
        a,
        &[
            (Sec, Implied),
            (Sbc, Imm(order::TRANSPOSE_BIAS)),
            (Sta, AbsX(var(TRANSPOSE))),
            (Iny, Implied),
            (Lda, IndY(ZP_ORDER)),
            (Tay, Implied),
            (Lda, AbsY(sym(Symbol::SequencesLo))),
            (Sta, AbsX(var(SEQ_LO))),
            (Lda, AbsY(sym(Symbol::SequencesHi))),
            (Sta, AbsX(var(SEQ_HI))),
            (Lda, AbsX(var(OL_POS))),
            (Clc, Implied),
            (Adc, Imm(2)),
            (Sta, AbsX(var(OL_POS))),
            (Rts, Implied),
        ],
    );
    a.label("order_stop");
    ops(
        a,
        &[
            (Lda, Imm(1)),
            (Sta, AbsX(var(STOPPED))),
            (Lda, Imm(0)),
            (Sta, AbsX(var(GATE))),
            (Ldy, AbsX(label("voice_off"))),
            (Lda, AbsX(var(WAVE_VAL))),
            (And, Imm(0xFE)),
            (Sta, AbsY(sid(0x04))),
            (Rts, Implied),
        ],
    );

    a.label("play");
    ops(
        a,
        &[
            (Dec, Abs(var(TICK))),
            (Bne, Branch("play_frame")),
            (Lda, Abs(var(TEMPO))),
            (Sta, Abs(var(TICK))),
            (Ldx, Imm(2)),
        ],
    );
    a.label("play_rows");
    ops(
        a,
        &[
            (Lda, AbsX(var(STOPPED))),
            (Bne, Branch("play_rows_next")),
            (Jsr, Abs(label("row"))),
        ],
    );
    a.label("play_rows_next");
    ops(a, &[(Dex, Implied), (Bpl, Branch("play_rows"))]);
    a.label("play_frame");
    a.i(Ldx, Imm(2));
    a.label("play_voices");
    ops(
        a,
        &[
            (Lda, AbsX(var(STOPPED))),
            (Bne, Branch("play_voices_next")),
            (Lda, AbsX(var(ACTIVE))),
            (Beq, Branch("play_voices_next")),
            (Jsr, Abs(label("update_voice"))),
        ],
    );
    a.label("play_voices_next");
    ops(
        a,
        &[
            (Dex, Implied),
            (Bpl, Branch("play_voices")),
            (Jmp, Abs(label("update_filter"))),
        ],
    );

    // One row of voice X: wait out a rest or read events up to the next
    // row-consuming one.
    a.label("row");
    ops(
        a,
        &[
            (Lda, AbsX(var(WAIT))),
            (Beq, Branch("row_read")),
            (Dec, AbsX(var(WAIT))),
            (Rts, Implied),
        ],
    );
    a.label("row_read");
    ops(
        a,
        &[
            (Lda, AbsX(var(SEQ_LO))),
            (Sta, Zp(ZP_SEQ)),
            (Lda, AbsX(var(SEQ_HI))),
            (Sta, Zp(ZP_SEQ + 1)),
            (Ldy, Imm(0)),
            (Lda, IndY(ZP_SEQ)),
            (Cmp, Imm(event::END)),
            (Bne, Branch("row_event")),
            (Jsr, Abs(label("next_order"))),
            (Lda, AbsX(var(STOPPED))),
            (Beq, Branch("row_read")),
            (Rts, Implied),
        ],
    );
    a.label("row_event");
    ops(
        a,
        &[
            (Pha, Implied),
            (Iny, Implied),
            (Lda, IndY(ZP_SEQ)),
            (Sta, Abs(var(PARAM))),
            (Lda, AbsX(var(SEQ_LO))),
            (Clc, Implied),
            (Adc, Imm(2)),
            (Sta, AbsX(var(SEQ_LO))),
            (Bcc, Branch("row_dispatch")),
            (Inc, AbsX(var(SEQ_HI))),
        ],
    );
    a.label("row_dispatch");
    ops(
        a,
        &[
            (Pla, Implied),
            (Bne, Branch("row_not_note")),
            (Jmp, Abs(label("note_on"))),
        ],
    );
    a.label("row_not_note");
    ops(
        a,
        &[
            (Cmp, Imm(event::NOTE_OFF)),
            (Bne, Branch("row_not_off")),
            (Lda, Imm(0)),
            (Sta, AbsX(var(GATE))),
            (Rts, Implied),
        ],
    );
    a.label("row_not_off");
    ops(
        a,
        &[
            (Cmp, Imm(event::TIE)),
            (Bne, Branch("row_not_tie")),
            (Lda, Imm(1)),
            (Sta, AbsX(var(TIE))),
            (Jmp, Abs(label("row_read"))),
        ],
    );
    a.label("row_not_tie");
    ops(
        a,
        &[
            (Cmp, Imm(event::INSTRUMENT)),
            (Bne, Branch("row_not_instr")),
            (Lda, Abs(var(PARAM))),
            (Sta, AbsX(var(INSTR))),
            (Jmp, Abs(label("row_read"))),
        ],
    );
    a.label("row_not_instr");
    ops(
        a,
        &[
            (Cmp, Imm(event::REST)),
            (Bne, Branch("row_command")),
            (Ldy, Abs(var(PARAM))),
            (Dey, Implied),
            (Tya, Implied),
            (Sta, AbsX(var(WAIT))),
            (Rts, Implied),
        ],
    );
    a.label("row_command");
    ops(
        a,
        &[
            (Jsr, Abs(label("command"))),
            (Jmp, Abs(label("row_read"))),
        ],
    );

    a.label("note_on");
    ops(
        a,
        &[
            (Lda, Abs(var(PARAM))),
            (Clc, Implied),
            (Adc, AbsX(var(TRANSPOSE))),
            (Sta, AbsX(var(NOTE))),
            (Lda, Imm(1)),
            (Sta, AbsX(var(ACTIVE))),
            (Lda, AbsX(var(TIE))),
            (Beq, Branch("note_trigger")),
            (Lda, Imm(0)),
            (Sta, AbsX(var(TIE))),
            (Rts, Implied),
        ],
    );
    // Retrigger: everything but a tied note.
    a.label("note_trigger");
    ops(
        a,
        &[
            (Lda, Imm(1)),
            (Sta, AbsX(var(GATE))),
            (Ldy, AbsX(var(INSTR))),
            (Lda, AbsY(ins(2))),
            (Sta, Abs(var(TMP_FLAGS))),
            (Lda, AbsY(ins(0))),
            (Sta, Abs(var(TMP_AD))),
            (Lda, AbsY(ins(1))),
            (Sta, Abs(var(TMP_SR))),
            (Lda, AbsY(ins(3))),
            (Sta, AbsX(var(WAVE_POS))),
            (Lda, AbsY(ins(4))),
            (Sta, AbsX(var(PULSE_POS))),
            (Lda, Imm(0)),
            (Sta, AbsX(var(PULSE_HOLD))),
            (Lda, AbsY(ins(5))),
            (Cmp, Imm(0xFF)),
            (Beq, Branch("note_no_filter")),
            (Sta, Abs(var(FILTER_POS))),
        ],
    );
    // Gate off first: the envelope only restarts on a 0 -> 1 edge, which
    // update_voice produces later in the same frame.
    a.label("note_no_filter");
    ops(
        a,
        &[
            (Ldy, AbsX(label("voice_off"))),
            (Lda, AbsX(var(WAVE_VAL))),
            (And, Imm(0xFE)),
            (Sta, AbsY(sid(0x04))),
            (Lda, Abs(var(TMP_FLAGS))),
            (And, Imm(0x01)),
            (Beq, Branch("note_envelope")),
            (Lda, Imm(0)),
            (Sta, AbsY(sid(0x05))),
            (Sta, AbsY(sid(0x06))),
        ],
    );
    a.label("note_envelope");
    ops(
        a,
        &[
            (Lda, Abs(var(TMP_AD))),
            (Sta, AbsY(sid(0x05))),
            (Lda, Abs(var(TMP_SR))),
            (Sta, AbsY(sid(0x06))),
            (Rts, Implied),
        ],
    );

    // Per-frame register update of voice X.
    a.label("update_voice");
    ops(
        a,
        &[
            (Ldy, AbsX(var(WAVE_POS))),
            (Lda, AbsY(wave(0))),
            (Cmp, Imm(0x7F)),
            (Bne, Branch("wave_not_loop")),
            (Lda, AbsY(wave(1))),
            (Sta, AbsX(var(WAVE_POS))),
            (Tay, Implied),
            (Lda, AbsY(wave(0))),
        ],
    );
    a.label("wave_not_loop");
    ops(
        a,
        &[
            (Cmp, Imm(0x7E)),
            (Beq, Branch("wave_hold")),
            (Sta, AbsX(var(WAVE_VAL))),
            (Lda, AbsY(wave(1))),
            (Sta, AbsX(var(WAVE_OFF))),
            (Inc, AbsX(var(WAVE_POS))),
        ],
    );
    a.label("wave_hold");
    ops(
        a,
        &[
            (Lda, AbsX(var(NOTE))),
            (Clc, Implied),
            (Adc, AbsX(var(WAVE_OFF))),
            (Tay, Implied),
            (Lda, AbsY(sym(Symbol::FreqLo))),
            (Sta, Abs(var(TMP_LO))),
            (Lda, AbsY(sym(Symbol::FreqHi))),
            (Sta, Abs(var(TMP_HI))),
            (Ldy, AbsX(var(PULSE_POS))),
            (Cpy, Imm(0xFF)),
            (Beq, Branch("voice_regs_offset")),
            (Lda, AbsX(var(PULSE_HOLD))),
            (Beq, Branch("pulse_read")),
            (Dec, AbsX(var(PULSE_HOLD))),
            (Jmp, Abs(label("pulse_write"))),
        ],
    );
    a.label("pulse_read");
    ops(
        a,
        &[
            (Lda, AbsY(pulse(0))),
            (Cmp, Imm(0x7F)),
            (Bne, Branch("pulse_not_loop")),
            (Lda, AbsY(pulse(1))),
            (Sta, AbsX(var(PULSE_POS))),
            (Tay, Implied),
            (Lda, AbsY(pulse(0))),
        ],
    );
    a.label("pulse_not_loop");
    ops(
        a,
        &[
            (Cmp, Imm(0x7E)),
            (Beq, Branch("pulse_write")),
            (Sta, AbsX(var(PW_HI))),
            (Lda, AbsY(pulse(1))),
            (Sta, AbsX(var(PW_LO))),
            (Lda, AbsY(pulse(2))),
            (Beq, Branch("pulse_hold_set")),
            (Sec, Implied),
            (Sbc, Imm(1)),
        ],
    );
    a.label("pulse_hold_set");
    ops(
        a,
        &[
            (Sta, AbsX(var(PULSE_HOLD))),
            (Inc, AbsX(var(PULSE_POS))),
        ],
    );
    a.label("pulse_write");
    ops(
        a,
        &[
            (Ldy, AbsX(label("voice_off"))),
            (Lda, AbsX(var(PW_LO))),
            (Sta, AbsY(sid(0x02))),
            (Lda, AbsX(var(PW_HI))),
            (Sta, AbsY(sid(0x03))),
            (Jmp, Abs(label("voice_regs"))),
        ],
    );
    a.label("voice_regs_offset");
    a.i(Ldy, AbsX(label("voice_off")));
    a.label("voice_regs");
    ops(
        a,
        &[
            (Lda, Abs(var(TMP_LO))),
            (Sta, AbsY(sid(0x00))),
            (Lda, Abs(var(TMP_HI))),
            (Sta, AbsY(sid(0x01))),
            (Lda, AbsX(var(WAVE_VAL))),
            (And, Imm(0xFE)),
            (Ora, AbsX(var(GATE))),
            (Sta, AbsY(sid(0x04))),
            (Rts, Implied),
        ],
    );

    a.label("update_filter");
    ops(
        a,
        &[
            (Ldy, Abs(var(FILTER_POS))),
            (Cpy, Imm(0xFF)),
            (Beq, Branch("filter_done")),
            (Lda, AbsY(filter(0))),
            (Cmp, Imm(0x7F)),
            (Bne, Branch("filter_not_loop")),
            (Lda, AbsY(filter(1))),
            (Sta, Abs(var(FILTER_POS))),
            (Tay, Implied),
            (Lda, AbsY(filter(0))),
        ],
    );
    a.label("filter_not_loop");
    ops(
        a,
        &[
            (Cmp, Imm(0x7E)),
            (Beq, Branch("filter_done")),
            (Sta, Abs(sid(0x15))),
            (Lda, AbsY(filter(1))),
            (Sta, Abs(sid(0x16))),
            (Lda, AbsY(filter(2))),
            (Sta, Abs(sid(0x17))),
            (Lda, AbsY(filter(3))),
            (Sta, Abs(var(MODE_VOL))),
            (Sta, Abs(sid(0x18))),
            (Inc, Abs(var(FILTER_POS))),
        ],
    );
    a.label("filter_done");
    a.i(Rts, Implied);

    // Command in PARAM for voice X.
    a.label("command");
    ops(
        a,
        &[
            (Ldy, Abs(var(PARAM))),
            (Lda, AbsY(cmd(0))),
            (Cmp, Imm(CommandKind::SetAdsr.id())),
            (Bne, Branch("command_not_adsr")),
            (Lda, AbsY(cmd(1))),
            (Sta, Abs(var(TMP_AD))),
            (Lda, AbsY(cmd(2))),
            (Sta, Abs(var(TMP_SR))),
            (Ldy, AbsX(label("voice_off"))),
            (Lda, Abs(var(TMP_AD))),
            (Sta, AbsY(sid(0x05))),
            (Lda, Abs(var(TMP_SR))),
            (Sta, AbsY(sid(0x06))),
            (Rts, Implied),
        ],
    );
    a.label("command_not_adsr");
    ops(
        a,
        &[
            (Cmp, Imm(CommandKind::SetTempo.id())),
            (Bne, Branch("command_not_tempo")),
            (Lda, AbsY(cmd(1))),
            (Sta, Abs(var(TEMPO))),
            (Rts, Implied),
        ],
    );
    a.label("command_not_tempo");
    ops(
        a,
        &[
            (Cmp, Imm(CommandKind::SetVolume.id())),
            (Bne, Branch("command_not_volume")),
            (Lda, AbsY(cmd(1))),
            (And, Imm(0x0F)),
            (Sta, Abs(var(TMP_LO))),
            (Lda, Abs(var(MODE_VOL))),
            (And, Imm(0xF0)),
            (Ora, Abs(var(TMP_LO))),
            (Sta, Abs(var(MODE_VOL))),
            (Sta, Abs(sid(0x18))),
            (Rts, Implied),
        ],
    );
    a.label("command_not_volume");
    ops(
        a,
        &[
            (Cmp, Imm(CommandKind::FilterProgram.id())),
            (Bne, Branch("command_done")),
            (Lda, AbsY(cmd(1))),
            (Sta, Abs(var(FILTER_POS))),
        ],
    );
    a.label("command_done");
    a.i(Rts, Implied);

    a.label("stop");
    ops(
        a,
        &[
            (Lda, Imm(0)),
            (Sta, Abs(sid(0x04))),
            (Sta, Abs(sid(0x0B))),
            (Sta, Abs(sid(0x12))),
            (Sta, Abs(sid(0x18))),
            (Lda, Imm(1)),
            (Sta, Abs(var(STOPPED))),
            (Sta, Abs(var(STOPPED + 1))),
            (Sta, Abs(var(STOPPED + 2))),
            (Rts, Implied),
        ],
    );
}
