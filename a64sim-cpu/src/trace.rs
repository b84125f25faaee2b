// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Human-readable execution trace, written to a caller-supplied byte sink.
//!
//! Categories are bit-selectable; the driver drains the register file's
//! written-markers after each instruction and prints one line per changed
//! register. Memory operations suppress the generic register line and emit
//! a richer line carrying the address instead.

use std::io::Write;

use bitflags::bitflags;

use a64sim_common::VAddr;

use crate::state::{Reg31Mode, REG31};

bitflags! {
    /// Trace categories. DISASM is honored by an external disassembler
    /// visitor sitting in front of the core; the bit is carried here so
    /// the trace host-trap can toggle it uniformly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TraceParams: u32 {
        const DISASM = 1 << 0;
        const REGS = 1 << 1;
        const VREGS = 1 << 2;
        const PREGS = 1 << 3;
        const SYSREGS = 1 << 4;
        const WRITE = 1 << 5;
        const BRANCH = 1 << 6;
        const STATE = Self::REGS.bits()
            | Self::VREGS.bits()
            | Self::PREGS.bits()
            | Self::SYSREGS.bits();
        const ALL = Self::STATE.bits()
            | Self::DISASM.bits()
            | Self::WRITE.bits()
            | Self::BRANCH.bits();
    }
}

/// X-register name for a code, honoring the 31 mode.
pub fn xreg_name(code: u8, mode: Reg31Mode) -> String {
    if code == REG31 {
        match mode {
            Reg31Mode::ZeroRegister => "xzr".to_string(),
            Reg31Mode::StackPointer => "sp".to_string(),
        }
    } else if code == 30 {
        "lr".to_string()
    } else {
        format!("x{code}")
    }
}

/// W-register name for a code, honoring the 31 mode.
pub fn wreg_name(code: u8, mode: Reg31Mode) -> String {
    if code == REG31 {
        match mode {
            Reg31Mode::ZeroRegister => "wzr".to_string(),
            Reg31Mode::StackPointer => "wsp".to_string(),
        }
    } else {
        format!("w{code}")
    }
}

/// The trace writer. Owns the sink and the enabled-category mask.
pub struct Trace {
    params: TraceParams,
    sink: Box<dyn Write + Send>,
}

impl Trace {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Trace { params: TraceParams::empty(), sink }
    }

    /// A trace that drops everything; the default for new simulators.
    pub fn disabled() -> Self {
        Trace::new(Box::new(std::io::sink()))
    }

    pub fn params(&self) -> TraceParams {
        self.params
    }

    pub fn set_params(&mut self, params: TraceParams) {
        self.params = params;
    }

    pub fn enabled(&self, category: TraceParams) -> bool {
        self.params.intersects(category)
    }

    pub fn log_xreg(&mut self, code: u8, value: u64) {
        if self.enabled(TraceParams::REGS) {
            let name = xreg_name(code, Reg31Mode::ZeroRegister);
            let _ = writeln!(self.sink, "# {name:>4}: 0x{value:016x}");
        }
    }

    pub fn log_sp(&mut self, value: u64) {
        if self.enabled(TraceParams::REGS) {
            let _ = writeln!(self.sink, "#   sp: 0x{value:016x}");
        }
    }

    pub fn log_vreg(&mut self, code: u8, q: u128) {
        if self.enabled(TraceParams::VREGS) {
            let _ = writeln!(
                self.sink,
                "# {:>4}: 0x{:016x}{:016x}",
                format!("v{code}"),
                (q >> 64) as u64,
                q as u64
            );
        }
    }

    pub fn log_preg(&mut self, code: u8, bytes: &[u8]) {
        if self.enabled(TraceParams::PREGS) {
            let mut line = format!("# {:>4}: 0b", format!("p{code}"));
            for byte in bytes.iter().rev() {
                line.push_str(&format!("{byte:08b}"));
            }
            let _ = writeln!(self.sink, "{line}");
        }
    }

    pub fn log_sysreg(&mut self, name: &str, value: u32) {
        if self.enabled(TraceParams::SYSREGS) {
            let _ = writeln!(self.sink, "# {name:>4}: 0x{value:08x}");
        }
    }

    /// Memory read into a register: the richer line that replaces the
    /// plain register trace for loads.
    pub fn log_read(&mut self, reg: &str, value: u64, addr: VAddr) {
        if self.enabled(TraceParams::REGS | TraceParams::VREGS) {
            let _ = writeln!(self.sink, "# {reg:>4}: 0x{value:016x} <- 0x{addr:016x}");
        }
    }

    /// Memory write from a register.
    pub fn log_write(&mut self, reg: &str, value: u64, addr: VAddr) {
        if self.enabled(TraceParams::WRITE) {
            let _ = writeln!(self.sink, "# {reg:>4}: 0x{value:016x} -> 0x{addr:016x}");
        }
    }

    pub fn log_branch(&mut self, target: VAddr) {
        if self.enabled(TraceParams::BRANCH) {
            let _ = writeln!(self.sink, "# branch -> 0x{target:016x}");
        }
    }

    /// Free-form output used by the printf host trap.
    pub fn print(&mut self, text: &str) {
        let _ = write!(self.sink, "{text}");
        let _ = self.sink.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shared in-memory sink for asserting on trace output.
    #[derive(Clone, Default)]
    pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_category_gating() {
        let sink = SharedSink::default();
        let mut trace = Trace::new(Box::new(sink.clone()));
        trace.log_xreg(0, 42);
        assert_eq!(sink.contents(), "");
        trace.set_params(TraceParams::REGS);
        trace.log_xreg(0, 42);
        assert!(sink.contents().contains("x0"));
        assert!(sink.contents().contains("0x000000000000002a"));
    }

    #[test]
    fn test_write_line_has_address() {
        let sink = SharedSink::default();
        let mut trace = Trace::new(Box::new(sink.clone()));
        trace.set_params(TraceParams::WRITE);
        trace.log_write("x3", 0x1234, 0x8000);
        let out = sink.contents();
        assert!(out.contains("-> 0x0000000000008000"));
    }

    #[test]
    fn test_reg_names() {
        assert_eq!(xreg_name(0, Reg31Mode::ZeroRegister), "x0");
        assert_eq!(xreg_name(30, Reg31Mode::ZeroRegister), "lr");
        assert_eq!(xreg_name(31, Reg31Mode::ZeroRegister), "xzr");
        assert_eq!(xreg_name(31, Reg31Mode::StackPointer), "sp");
        assert_eq!(wreg_name(31, Reg31Mode::StackPointer), "wsp");
    }
}
