//! Operator console: the command-driven mode state machine.
//!
//! Bytes drained from the receive queue are assembled into commands; commands
//! switch the display mode or trigger diagnostic dumps. All responses go out
//! through the transmit queue as CRLF-terminated ASCII.
//!
//! The machine has two input states. Normally every byte is a one-character
//! command; the debug memory command is two-phase and accumulates a hex
//! address parameter until carriage return.

use core::fmt::Write;

use heapless::{String, Vec};

use crate::config::MSG_BUF_LEN;
use crate::sched::SchedFlags;
use crate::state::SystemStatus;
use crate::transport::TransportQueue;

// ── Modes ─────────────────────────────────────────────────────────────────────

/// Operator-selected verbosity / interaction state.
///
/// NORMAL and ADC-VIEW emit one unsolicited status line per display cadence;
/// DEBUG is menu-driven only; QUIET emits nothing unsolicited.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Quiet,
    Normal,
    Debug,
    AdcView,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum InputState {
    /// Each byte is a complete one-character command.
    Command,
    /// Accumulating a parameter until carriage return.
    Parameter,
}

// ── Collaborator contract ─────────────────────────────────────────────────────

/// Platform-specific debug dump access (registers, stack, raw memory).
/// The firmware backs this with the Cortex-M; tests use a mock.
pub trait DebugProbe {
    /// Capture the CPU registers r0–r15.
    fn registers(&mut self, out: &mut [u32; 16]);
    /// Read one 32-bit word at `addr`.
    fn read_word(&mut self, addr: u32) -> u32;
    /// Copy the most recent stack words into `out`; returns how many.
    fn stack(&mut self, out: &mut [u32]) -> usize;
}

// ── Parameter parsing ─────────────────────────────────────────────────────────

/// Parse 1–8 case-insensitive hex digits into an address.
/// Any non-hex character (or an empty / oversized string) is a refusal.
pub fn parse_hex_addr(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    let mut addr = 0u32;
    for &d in digits {
        let nibble = match d {
            b'0'..=b'9' => d - b'0',
            b'a'..=b'f' => d - b'a' + 10,
            b'A'..=b'F' => d - b'A' + 10,
            _ => return None,
        };
        addr = (addr << 4) | nibble as u32;
    }
    Some(addr)
}

// ── Console ───────────────────────────────────────────────────────────────────

/// Words shown by the memory dump (32 bytes from the requested address).
const MEM_DUMP_WORDS: u32 = 8;
/// Stack dump depth.
const STACK_DUMP_WORDS: usize = 32;

pub struct Console<'a, P: DebugProbe, const TX: usize> {
    tx: &'a TransportQueue<TX>,
    flags: &'a SchedFlags,
    probe: P,
    mode: Mode,
    input: InputState,
    buf: Vec<u8, MSG_BUF_LEN>,
}

impl<'a, P: DebugProbe, const TX: usize> Console<'a, P, TX> {
    pub fn new(tx: &'a TransportQueue<TX>, flags: &'a SchedFlags, probe: P) -> Self {
        Self {
            tx,
            flags,
            probe,
            mode: Mode::Normal,
            input: InputState::Command,
            buf: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Bytes currently accumulated for an in-flight command.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Feed one byte drained from the receive queue.
    pub fn process_byte(&mut self, byte: u8, status: &SystemStatus) {
        match self.input {
            InputState::Command => {
                // Buffer is empty between commands; one byte always fits.
                let _ = self.buf.push(byte);
                self.dispatch(status);
            }
            InputState::Parameter => match byte {
                b'\r' => self.dispatch(status),
                // Backspace / DEL: drop the last parameter byte, never the
                // command letter itself.
                0x08 | 0x7F => {
                    if self.buf.len() > 1 {
                        let _ = self.buf.pop();
                        self.put_str("\x08 \x08");
                    }
                }
                _ => {
                    if self.buf.push(byte).is_err() {
                        self.put_str("\r\nToo long!\r\n");
                        self.abort_command();
                    } else {
                        // Echo so the operator sees what they typed.
                        self.tx.put(byte);
                    }
                }
            },
        }
    }

    /// Emit the unsolicited status line if the cadence flag is up and the
    /// mode permits one. The flag is consumed either way.
    pub fn poll_display(&mut self, status: &SystemStatus) {
        if !self.flags.take_display_ready() {
            return;
        }
        match self.mode {
            Mode::Normal => self.show_readings(status),
            Mode::AdcView => self.show_adcs(status),
            Mode::Quiet | Mode::Debug => {}
        }
    }

    /// Print the menu for the current mode (used once at startup).
    pub fn show_menu(&mut self) {
        match self.mode {
            Mode::Debug => self.debug_menu(),
            _ => self.main_menu(),
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    fn dispatch(&mut self, status: &SystemStatus) {
        let Some(&first) = self.buf.first() else {
            return;
        };
        let cmd = first.to_ascii_uppercase();

        match self.mode {
            Mode::Quiet | Mode::Normal | Mode::AdcView => self.dispatch_main(cmd, status),
            Mode::Debug => self.dispatch_debug(cmd, status),
        }

        // Outside the two-phase parameter case the command is complete:
        // empty the buffer and restart the display cadence.
        if self.input == InputState::Command {
            self.buf.clear();
            self.flags.request_display_restart();
        }
    }

    fn dispatch_main(&mut self, cmd: u8, status: &SystemStatus) {
        match cmd {
            b'A' => self.set_mode(Mode::AdcView, "ADC"),
            b'D' => {
                self.set_mode(Mode::Debug, "DEBUG");
                self.debug_menu();
            }
            b'N' => self.set_mode(Mode::Normal, "NORMAL"),
            b'Q' => self.set_mode(Mode::Quiet, "QUIET"),
            b'I' => self.show_sysinfo(status),
            b'V' => self.show_version(),
            b'?' => self.main_menu(),
            _ => self.put_str("\r\nMain (? menu) -> "),
        }
    }

    fn dispatch_debug(&mut self, cmd: u8, status: &SystemStatus) {
        match cmd {
            b'R' => self.show_registers(),
            b'M' => {
                if self.buf.len() == 1 {
                    // Phase one: ask for the address and start accumulating.
                    self.put_str("\r\nAddr? -> ");
                    self.input = InputState::Parameter;
                } else {
                    self.input = InputState::Command;
                    match parse_hex_addr(&self.buf[1..]) {
                        Some(addr) => self.show_memory(addr),
                        None => self.put_str("\r\nBad memory location!\r\n"),
                    }
                }
            }
            b'S' => self.show_stack(),
            b'F' => {
                self.show_readings(status);
                self.put_str("\r\n");
            }
            b'I' => self.show_sysinfo(status),
            b'N' => self.set_mode(Mode::Normal, "Normal"),
            b'V' => self.show_version(),
            b'?' => self.debug_menu(),
            _ => self.put_str("\r\nDebug (? menu) -> "),
        }
    }

    fn set_mode(&mut self, mode: Mode, label: &str) {
        self.mode = mode;
        #[cfg(feature = "defmt")]
        defmt::info!("mode -> {}", mode);
        let mut m = String::<32>::new();
        let _ = write!(m, "\r\nMode -> {label}\r\n");
        self.put_str(&m);
    }

    fn abort_command(&mut self) {
        self.buf.clear();
        self.input = InputState::Command;
    }

    // ── Output ────────────────────────────────────────────────────────────────

    fn put_str(&self, s: &str) {
        self.tx.put_bytes(s.as_bytes());
    }

    fn main_menu(&mut self) {
        self.put_str("\r\nMain\r\n");
        self.put_str("N - Normal\r\n");
        self.put_str("Q - Quiet\r\n");
        self.put_str("D - Debug\r\n");
        self.put_str("A - ADCs\r\n");
        self.put_str("I - SysInfo\r\n");
        self.put_str("V - Version\r\n");
        self.put_str("-> ");
    }

    fn debug_menu(&mut self) {
        self.put_str("\r\nDebug\r\n");
        self.put_str("R - Registers\r\n");
        self.put_str("M - Memory\r\n");
        self.put_str("S - Stack\r\n");
        self.put_str("F - Flow Data\r\n");
        self.put_str("I - SysInfo\r\n");
        self.put_str("V - Version\r\n");
        self.put_str("N - Normal\r\n");
        self.put_str("-> ");
    }

    fn show_readings(&mut self, status: &SystemStatus) {
        let r = &status.readings;
        let mut m = String::<80>::new();
        match r.flow_gpm {
            Some(flow) => {
                let _ = write!(m, "\r\n Flow: {}", flow as i32);
            }
            None => {
                let _ = write!(m, "\r\n Flow: ----");
            }
        }
        let _ = write!(m, "  Temp: {}  Freq: {}", r.temp_c, r.freq_hz as i32);
        self.put_str(&m);
    }

    fn show_adcs(&mut self, status: &SystemStatus) {
        let mut m = String::<64>::new();
        let _ = write!(
            m,
            " ADC CH0: {:04X}  CH1: {:04X} CH2: {:04X}\r\n",
            status.adc[0], status.adc[1], status.adc[2]
        );
        self.put_str(&m);
    }

    fn show_sysinfo(&mut self, status: &SystemStatus) {
        self.put_str("\r\nSystem Information:\r\n");
        let mut m = String::<64>::new();
        let _ = write!(m, " Core clock: {}\r\n", status.core_clock_hz);
        self.put_str(&m);
        let mut m = String::<64>::new();
        let _ = write!(m, " Timer ISRs: {}\r\n", self.flags.isr_count());
        self.put_str(&m);
    }

    fn show_version(&mut self) {
        let mut m = String::<48>::new();
        let _ = write!(m, "\r\nVer: {}\r\n", crate::VERSION);
        self.put_str(&m);
    }

    fn show_registers(&mut self) {
        let mut regs = [0u32; 16];
        self.probe.registers(&mut regs);
        self.put_str("\r\nRegisters:\r\n");
        for (i, r) in regs.iter().enumerate() {
            let mut m = String::<32>::new();
            let _ = write!(m, " R{i:02}: {r:08X}\r\n");
            self.put_str(&m);
        }
    }

    fn show_memory(&mut self, addr: u32) {
        self.put_str("\r\nMemory:\r\n");
        for i in 0..MEM_DUMP_WORDS {
            let a = addr.wrapping_add(i * 4);
            let data = self.probe.read_word(a);
            let mut m = String::<32>::new();
            let _ = write!(m, "0x{a:08X} : {data:08X}\r\n");
            self.put_str(&m);
        }
    }

    fn show_stack(&mut self) {
        let mut words = [0u32; STACK_DUMP_WORDS];
        let n = self.probe.stack(&mut words);
        self.put_str("\r\nStack (recent first):\r\n");
        for w in &words[..n] {
            let mut m = String::<16>::new();
            let _ = write!(m, "{w:08X}\r\n");
            self.put_str(&m);
        }
    }
}
