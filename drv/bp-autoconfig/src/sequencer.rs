// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-SEP auto-configuration state machine
//!
//! A [`Sequencer`] starts at [`Step::GroupId`] and issues exactly one
//! register write per step.  It ends in [`State::Done`] once
//! [`Step::Enable`] has been written, or in [`State::Failed`] at the first
//! write that does not land.  There is no way out of either terminal state.

use bp_catalog::{BpClass, Descriptor, GroupId};
use drv_i2c_api::{RegisterWrite, ResponseCode};
use drv_i2c_devices::sep::{Register, Sep, AUTO_CONFIG_ENABLE};
use log::{debug, error, info};

use crate::BpError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Step {
    GroupId,
    SlotId,
    BayId,
    BackplaneInfo,
    NumSlots,
    StartSlot,
    HfcIdentity,
    SystemMgmtProtocol,
    Enable,
}

impl Step {
    /// Every step, in protocol order.
    pub const ALL: [Step; 9] = [
        Step::GroupId,
        Step::SlotId,
        Step::BayId,
        Step::BackplaneInfo,
        Step::NumSlots,
        Step::StartSlot,
        Step::HfcIdentity,
        Step::SystemMgmtProtocol,
        Step::Enable,
    ];

    pub const fn register(self) -> Register {
        match self {
            Step::GroupId => Register::GroupId,
            Step::SlotId => Register::SlotId,
            Step::BayId => Register::BayId,
            Step::BackplaneInfo => Register::BackplaneInfo,
            Step::NumSlots => Register::NumSlots,
            Step::StartSlot => Register::StartSlot,
            Step::HfcIdentity => Register::HfcIdentity,
            Step::SystemMgmtProtocol => Register::SystemMgmtProtocol,
            Step::Enable => Register::AutoConfigEnable,
        }
    }

    /// SAS/SATA backplanes have no PCIe slot or bay identity.
    pub fn applies_to(self, class: BpClass) -> bool {
        !(class == BpClass::SasSata
            && matches!(self, Step::SlotId | Step::BayId))
    }

    /// The step that follows this one for a backplane of `class`, or `None`
    /// after [`Step::Enable`].
    pub fn next(self, class: BpClass) -> Option<Step> {
        let pos = Step::ALL.iter().position(|&s| s == self)?;
        Step::ALL[pos + 1..]
            .iter()
            .copied()
            .find(|s| s.applies_to(class))
    }
}

/// Value of the group ID register for SEP `sep` of a backplane grouped by
/// `group`.
pub fn group_value(group: GroupId, sep: u8) -> u8 {
    match group {
        GroupId::By4 => sep.wrapping_add(1),
        GroupId::By8 => sep.wrapping_mul(2).wrapping_add(1),
    }
}

/// One SEP to be configured.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SepTarget {
    pub descriptor: Descriptor,
    pub connector: u8,
    pub sep: u8,
    pub mgmt_protocol: u8,
}

/// Register values for one SEP, checked once up front so that computing a
/// step's value cannot fail halfway through the sequence.
#[derive(Copy, Clone, Debug)]
struct SepValues {
    target: SepTarget,
    hfc: u8,
}

impl SepValues {
    fn new(target: &SepTarget) -> Result<Self, BpError> {
        let d = &target.descriptor;
        if target.sep >= d.sep_count {
            return Err(BpError::BadSep { sep: target.sep });
        }
        let hfc = d
            .hfc_for(target.sep)
            .ok_or(BpError::BadSep { sep: target.sep })?;
        Ok(Self {
            target: *target,
            hfc,
        })
    }

    fn value(&self, step: Step) -> u8 {
        let t = &self.target;
        let k = t.descriptor.group.size();
        let base = k.wrapping_mul(t.sep);
        match step {
            Step::GroupId => group_value(t.descriptor.group, t.sep),
            Step::SlotId => 0x40u8.wrapping_add(base),
            Step::BayId | Step::StartSlot => base,
            Step::BackplaneInfo => t.connector.wrapping_add(1),
            Step::NumSlots => t.descriptor.bay_count,
            Step::HfcIdentity => self.hfc,
            Step::SystemMgmtProtocol => t.mgmt_protocol,
            Step::Enable => AUTO_CONFIG_ENABLE,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    /// The given step is the next write to issue.
    Step(Step),
    Done,
    Failed(Step, ResponseCode),
}

impl State {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, State::Step(_))
    }
}

pub struct Sequencer {
    values: SepValues,
    state: State,
}

impl Sequencer {
    pub fn new(target: &SepTarget) -> Result<Self, BpError> {
        Ok(Self {
            values: SepValues::new(target)?,
            state: State::Step(Step::GroupId),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Issues the current step's write and advances.  Does nothing once the
    /// sequence has finished.
    pub fn step(
        &mut self,
        bus: &mut (impl RegisterWrite + ?Sized),
        sep: &Sep,
    ) -> State {
        let State::Step(step) = self.state else {
            return self.state;
        };
        let value = self.values.value(step);
        self.state = match sep.write_reg(bus, step.register(), value) {
            Ok(()) => {
                debug!("{}: {step:?} = {value:#04x}", sep.device());
                let class = self.values.target.descriptor.class;
                match step.next(class) {
                    Some(next) => State::Step(next),
                    None => State::Done,
                }
            }
            Err(code) => State::Failed(step, code),
        };
        self.state
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PlannedWrite {
    pub step: Step,
    pub register: Register,
    pub value: u8,
}

/// The writes a successful run would issue for `target`, in order.
pub fn plan(target: &SepTarget) -> Result<Vec<PlannedWrite>, BpError> {
    let values = SepValues::new(target)?;
    let class = target.descriptor.class;
    Ok(Step::ALL
        .iter()
        .filter(|s| s.applies_to(class))
        .map(|&step| PlannedWrite {
            step,
            register: step.register(),
            value: values.value(step),
        })
        .collect())
}

/// Runs the whole auto-configuration sequence for one SEP.
///
/// The target is validated before anything is written, so a `BadSep` error
/// means the bus was never touched.
pub fn run(
    bus: &mut (impl RegisterWrite + ?Sized),
    sep: &Sep,
    target: &SepTarget,
) -> Result<(), BpError> {
    let mut seq = Sequencer::new(target)?;
    loop {
        match seq.step(bus, sep) {
            State::Step(_) => continue,
            State::Done => {
                info!(
                    "BP#{} SEP{} on {}: auto-config enabled",
                    target.connector,
                    target.sep,
                    sep.device()
                );
                return Ok(());
            }
            State::Failed(step, code) => {
                error!(
                    "BP#{} SEP{} on {}: {step:?} failed: {code}",
                    target.connector,
                    target.sep,
                    sep.device()
                );
                return Err(BpError::RegisterWrite { step, code });
            }
        }
    }
}
