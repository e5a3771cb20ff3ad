//! Register-level stand-in for the device, shared with the test through an
//! `Rc<RefCell<_>>` so the test can script it and inspect the traffic.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use embedded_hal::delay::DelayNs;

use crate::bus::RegisterBus;
use crate::registers::{adc_control, channel, Register};

#[derive(Debug, Clone, PartialEq)]
pub struct MockError;

/// Deterministic code for the `n`th conversion of `channel`.
pub fn code_for(channel: u8, n: u32) -> u32 {
    0x40_0000 + u32::from(channel) * 0x1_0000 + n
}

#[derive(Default)]
pub struct DeviceState {
    pub regs: HashMap<u8, u32>,
    /// Every bus call, reads and writes alike.
    pub transactions: usize,
    pub writes: Vec<(Register, u32)>,
    /// Status polls a conversion takes before RDY goes low.
    pub ready_after: u32,
    pub never_ready: bool,
    /// Sequence position continuous mode starts at.
    pub start_offset: usize,
    /// Tags reported for the next continuous conversions, overriding the sequencer.
    pub scripted_tags: VecDeque<u8>,
    /// Tags reported for the next single conversions.
    pub scripted_single_tags: VecDeque<u8>,
    /// Number of upcoming reads that fail.
    pub fail_reads: u32,
    pub error_flag: bool,
    /// Single conversions started.
    pub triggers: usize,
    /// Raw code override per channel.
    pub codes: HashMap<u8, u32>,
    converting: Option<u8>,
    continuous: bool,
    sequence: Vec<u8>,
    seq_pos: usize,
    polls: u32,
    ready: bool,
    last_tag: u8,
    last_code: u32,
    conversions: [u32; 16],
}

impl DeviceState {
    fn power_on(&mut self) {
        self.regs.clear();
        self.regs.insert(Register::Id.address(), 0x14);
        self.regs.insert(Register::Channel(0).address(), 0x8001);
        self.converting = None;
        self.continuous = false;
        self.ready = false;
    }

    fn enabled(&self) -> Vec<u8> {
        (0..16u8)
            .filter(|&n| self.regs.get(&Register::Channel(n).address()).is_some_and(|v| v & channel::ENABLE != 0))
            .collect()
    }

    fn start(&mut self, control: u32) {
        let mode = (control >> adc_control::MODE_SHIFT) & 0xF;
        self.polls = 0;
        self.ready = false;
        match mode {
            0 => {
                self.continuous = true;
                self.sequence = self.enabled();
                self.seq_pos = if self.sequence.is_empty() { 0 } else { self.start_offset % self.sequence.len() };
                self.converting = self.sequence.get(self.seq_pos).copied();
            }
            1 | 5..=8 => {
                self.continuous = false;
                self.converting = self.enabled().first().copied();
                if mode == 1 {
                    self.triggers += 1;
                }
            }
            _ => {
                self.continuous = false;
                self.converting = None;
            }
        }
    }

    fn status_byte(&self) -> u32 {
        let mut status = u32::from(self.last_tag);
        if !self.ready {
            status |= 0x80;
        }
        if self.error_flag {
            status |= 0x40;
        }
        status
    }

    fn poll(&mut self) -> u32 {
        if !self.ready && !self.never_ready {
            if let Some(ch) = self.converting {
                self.polls += 1;
                if self.polls > self.ready_after {
                    let script = if self.continuous { &mut self.scripted_tags } else { &mut self.scripted_single_tags };
                    let tag = script.pop_front().unwrap_or(ch);
                    let n = self.conversions[usize::from(tag & 0x0F)];
                    self.conversions[usize::from(tag & 0x0F)] += 1;
                    self.last_tag = tag;
                    self.last_code = self.codes.get(&tag).copied().unwrap_or_else(|| code_for(tag, n));
                    self.ready = true;
                    if !self.continuous {
                        self.converting = None;
                    }
                }
            }
        }
        self.status_byte()
    }

    fn read_data(&mut self) -> u32 {
        let word = (self.last_code << 8) | self.status_byte();
        if self.ready {
            self.ready = false;
            if self.continuous && !self.sequence.is_empty() {
                self.seq_pos = (self.seq_pos + 1) % self.sequence.len();
                self.converting = Some(self.sequence[self.seq_pos]);
                self.polls = 0;
            }
        }
        word
    }
}

pub struct MockBus {
    state: Rc<RefCell<DeviceState>>,
}

impl MockBus {
    pub fn new() -> (Self, Rc<RefCell<DeviceState>>) {
        let mut device = DeviceState::default();
        device.power_on();
        let state = Rc::new(RefCell::new(device));
        (Self { state: state.clone() }, state)
    }
}

impl RegisterBus for MockBus {
    type Error = MockError;

    fn write_register(&mut self, reg: Register, value: u32) -> Result<(), MockError> {
        let mut dev = self.state.borrow_mut();
        dev.transactions += 1;
        dev.writes.push((reg, value));
        dev.regs.insert(reg.address(), value);
        if reg == Register::AdcControl {
            dev.start(value);
        }
        Ok(())
    }

    fn read_register(&mut self, reg: Register) -> Result<u32, MockError> {
        let mut dev = self.state.borrow_mut();
        dev.transactions += 1;
        if dev.fail_reads > 0 {
            dev.fail_reads -= 1;
            return Err(MockError);
        }
        Ok(match reg {
            Register::Status => dev.poll(),
            Register::DataWithStatus => dev.read_data(),
            Register::Data => dev.read_data() >> 8,
            other => dev.regs.get(&other.address()).copied().unwrap_or(0),
        })
    }

    fn reset(&mut self) -> Result<(), MockError> {
        let mut dev = self.state.borrow_mut();
        dev.transactions += 1;
        dev.power_on();
        Ok(())
    }
}

pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
