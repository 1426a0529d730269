//! Machine register identities and register sets.
//!
//! Registers are identified by a bank (general purpose, floating point) and an
//! index within the bank. The [`RegisterFile`] is the bookkeeping a register
//! assigner uses to hand out free registers; it performs no spilling.

use std::fmt;

/// Maximum number of register banks supported (GP, FP).
pub const MAX_REGISTER_BANKS: usize = 2;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

pub const GP_BANK: RegBank = 0;
pub const FP_BANK: RegBank = 1;

/// Combined register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    pub const fn gp(id: RegId) -> Self {
        Self { bank: GP_BANK, id }
    }
}

impl fmt::Display for AsmReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bank {
            GP_BANK => write!(f, "gp{}", self.id),
            FP_BANK => write!(f, "fp{}", self.id),
            bank => write!(f, "b{}r{}", bank, self.id),
        }
    }
}

/// Bit set for tracking register sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegBitSet {
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    pub const fn new() -> Self {
        Self {
            banks: [0; MAX_REGISTER_BANKS],
        }
    }

    pub fn from_regs(regs: &[AsmReg]) -> Self {
        let mut set = Self::new();
        regs.iter().for_each(|&r| set.set(r));
        set
    }

    pub fn contains(&self, reg: AsmReg) -> bool {
        if reg.bank as usize >= MAX_REGISTER_BANKS || reg.id >= 64 {
            return false;
        }
        (self.banks[reg.bank as usize] & (1u64 << reg.id)) != 0
    }

    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] &= !(1u64 << reg.id);
        }
    }

    /// Lowest register of `bank` in this set and not in `exclude`.
    pub fn find_first_in_bank(&self, bank: RegBank, exclude: &RegBitSet) -> Option<RegId> {
        if bank as usize >= MAX_REGISTER_BANKS {
            return None;
        }
        let available = self.banks[bank as usize] & !exclude.banks[bank as usize];
        if available == 0 {
            return None;
        }
        Some(available.trailing_zeros() as RegId)
    }

    pub fn count_in_bank(&self, bank: RegBank) -> u32 {
        self.banks
            .get(bank as usize)
            .map_or(0, |b| b.count_ones())
    }

    /// Registers of `bank` in ascending order.
    pub fn iter_bank(&self, bank: RegBank) -> impl Iterator<Item = AsmReg> + '_ {
        let mask = self.banks.get(bank as usize).copied().unwrap_or(0);
        (0..64u8)
            .filter(move |id| mask & (1u64 << id) != 0)
            .map(move |id| AsmReg::new(bank, id))
    }
}

/// Free/used bookkeeping over a fixed set of allocatable registers.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    allocatable: RegBitSet,
    used: RegBitSet,
    /// Every register handed out at least once.
    clobbered: RegBitSet,
}

impl RegisterFile {
    pub fn new(allocatable: RegBitSet) -> Self {
        Self {
            allocatable,
            used: RegBitSet::new(),
            clobbered: RegBitSet::new(),
        }
    }

    /// Take the lowest free register of `bank`.
    pub fn allocate(&mut self, bank: RegBank) -> Option<AsmReg> {
        let id = self.allocatable.find_first_in_bank(bank, &self.used)?;
        let reg = AsmReg::new(bank, id);
        self.used.set(reg);
        self.clobbered.set(reg);
        Some(reg)
    }

    pub fn free(&mut self, reg: AsmReg) {
        self.used.clear(reg);
    }

    pub fn clobbered(&self) -> RegBitSet {
        self.clobbered
    }
}
