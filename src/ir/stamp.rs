// This module implements the stamp lattice: the abstract value attached to every node of the
// graph. An integer stamp is a closed signed interval [lo, hi] for one of three kinds (32-bit,
// 64-bit, pointer); an interval with lo > hi is the empty stamp and stands for unreachable
// values, and lo == hi is a compile-time constant. join is the exact interval union used when
// merging values, meet is the intersection used for guard-derived narrowing. The arithmetic
// transfer functions (add, sub, mul, mul_high, bitwise ops, negation, comparisons) compute
// result ranges from input ranges and fall back to the unrestricted stamp whenever the exact
// result could wrap. Stamp operations never fail: an empty input propagates as an empty
// result. Stamps are small Copy values and are replaced, never mutated in place.

//! Integer range stamps and their transfer functions.

use std::fmt;

/// Value kind carried by a stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StampKind {
    Int32,
    Int64,
    Pointer,
    /// Nodes that produce no value (control flow, stores).
    Void,
}

impl StampKind {
    pub const fn bits(self) -> u32 {
        match self {
            StampKind::Int32 => 32,
            StampKind::Int64 | StampKind::Pointer => 64,
            StampKind::Void => 0,
        }
    }

    pub const fn min_value(self) -> i64 {
        match self {
            StampKind::Int32 => i32::MIN as i64,
            StampKind::Int64 | StampKind::Pointer => i64::MIN,
            StampKind::Void => 0,
        }
    }

    pub const fn max_value(self) -> i64 {
        match self {
            StampKind::Int32 => i32::MAX as i64,
            StampKind::Int64 | StampKind::Pointer => i64::MAX,
            StampKind::Void => 0,
        }
    }

    /// Truncate `value` to this kind's width and sign-extend it back.
    pub fn wrap(self, value: i64) -> i64 {
        match self {
            StampKind::Int32 => value as i32 as i64,
            StampKind::Void => 0,
            _ => value,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StampKind::Int32 => "i32",
            StampKind::Int64 => "i64",
            StampKind::Pointer => "ptr",
            StampKind::Void => "void",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "i32" => Some(StampKind::Int32),
            "i64" => Some(StampKind::Int64),
            "ptr" => Some(StampKind::Pointer),
            "void" => Some(StampKind::Void),
            _ => None,
        }
    }
}

/// Abstract value of a node.
///
/// The interval bounds are always stored sign-extended to 64 bits. The empty
/// stamp of a kind is represented as `[max, min]` so that every empty stamp of
/// the same kind compares equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stamp {
    kind: StampKind,
    lo: i64,
    hi: i64,
}

impl Stamp {
    pub const fn void() -> Self {
        Self {
            kind: StampKind::Void,
            lo: 0,
            hi: 0,
        }
    }

    pub const fn unrestricted(kind: StampKind) -> Self {
        Self {
            kind,
            lo: kind.min_value(),
            hi: kind.max_value(),
        }
    }

    pub const fn empty(kind: StampKind) -> Self {
        Self {
            kind,
            lo: kind.max_value(),
            hi: kind.min_value(),
        }
    }

    pub fn constant(kind: StampKind, value: i64) -> Self {
        let value = kind.wrap(value);
        Self {
            kind,
            lo: value,
            hi: value,
        }
    }

    /// Stamp for `[lo, hi]`, clamped to the kind's value range.
    pub fn range(kind: StampKind, lo: i64, hi: i64) -> Self {
        if kind == StampKind::Void {
            return Self::void();
        }
        let lo = lo.max(kind.min_value());
        let hi = hi.min(kind.max_value());
        if lo > hi {
            return Self::empty(kind);
        }
        Self { kind, lo, hi }
    }

    fn from_wide(kind: StampKind, lo: i128, hi: i128) -> Self {
        if lo < kind.min_value() as i128 || hi > kind.max_value() as i128 {
            Self::unrestricted(kind)
        } else {
            Self::range(kind, lo as i64, hi as i64)
        }
    }

    pub fn kind(&self) -> StampKind {
        self.kind
    }

    pub fn lower_bound(&self) -> i64 {
        self.lo
    }

    pub fn upper_bound(&self) -> i64 {
        self.hi
    }

    pub fn is_void(&self) -> bool {
        self.kind == StampKind::Void
    }

    pub fn is_empty(&self) -> bool {
        !self.is_void() && self.lo > self.hi
    }

    pub fn is_unrestricted(&self) -> bool {
        !self.is_void() && self.lo == self.kind.min_value() && self.hi == self.kind.max_value()
    }

    /// The constant value if the range collapsed to a single point.
    pub fn as_constant(&self) -> Option<i64> {
        if !self.is_void() && self.lo == self.hi {
            Some(self.lo)
        } else {
            None
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        !self.is_void() && self.lo <= value && value <= self.hi
    }

    pub fn is_non_negative(&self) -> bool {
        !self.is_empty() && self.lo >= 0
    }

    fn compatible(&self, other: &Stamp) -> bool {
        self.kind == other.kind
    }

    /// Smallest stamp enclosing both ranges.
    ///
    /// Stamps of different kinds have no common enclosing interval; the result
    /// is then the unrestricted stamp of `self`'s kind.
    pub fn join(&self, other: &Stamp) -> Stamp {
        if !self.compatible(other) {
            return Stamp::unrestricted(self.kind);
        }
        if self.is_void() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Stamp::range(self.kind, self.lo.min(other.lo), self.hi.max(other.hi))
    }

    /// Intersection of both ranges, used for guard-derived refinement.
    pub fn meet(&self, other: &Stamp) -> Stamp {
        if !self.compatible(other) {
            return Stamp::empty(self.kind);
        }
        if self.is_void() {
            return *self;
        }
        Stamp::range(self.kind, self.lo.max(other.lo), self.hi.min(other.hi))
    }

    /// Whether every value of `other` is also a value of `self`.
    pub fn encloses(&self, other: &Stamp) -> bool {
        self.compatible(other) && (other.is_empty() || (self.lo <= other.lo && other.hi <= self.hi))
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_void() {
            write!(f, "void")
        } else if self.is_empty() {
            write!(f, "{}[empty]", self.kind.name())
        } else if self.is_unrestricted() {
            write!(f, "{}", self.kind.name())
        } else {
            write!(f, "{}[{}, {}]", self.kind.name(), self.lo, self.hi)
        }
    }
}

// ==== Transfer functions ====

fn propagate_empty(a: &Stamp, b: &Stamp) -> Option<Stamp> {
    if a.is_empty() || b.is_empty() {
        Some(Stamp::empty(a.kind))
    } else {
        None
    }
}

/// Smallest all-ones mask covering `value` (for non-negative `value`).
fn covering_mask(value: i64) -> i64 {
    if value <= 0 {
        0
    } else {
        (u64::MAX >> value.leading_zeros()) as i64
    }
}

pub fn add(a: &Stamp, b: &Stamp) -> Stamp {
    if let Some(empty) = propagate_empty(a, b) {
        return empty;
    }
    if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
        return Stamp::constant(a.kind, x.wrapping_add(y));
    }
    Stamp::from_wide(a.kind, a.lo as i128 + b.lo as i128, a.hi as i128 + b.hi as i128)
}

pub fn sub(a: &Stamp, b: &Stamp) -> Stamp {
    if let Some(empty) = propagate_empty(a, b) {
        return empty;
    }
    if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
        return Stamp::constant(a.kind, x.wrapping_sub(y));
    }
    Stamp::from_wide(a.kind, a.lo as i128 - b.hi as i128, a.hi as i128 - b.lo as i128)
}

pub fn mul(a: &Stamp, b: &Stamp) -> Stamp {
    if let Some(empty) = propagate_empty(a, b) {
        return empty;
    }
    if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
        return Stamp::constant(a.kind, x.wrapping_mul(y));
    }
    let corners = [
        a.lo as i128 * b.lo as i128,
        a.lo as i128 * b.hi as i128,
        a.hi as i128 * b.lo as i128,
        a.hi as i128 * b.hi as i128,
    ];
    let lo = corners.iter().copied().min().unwrap_or(0);
    let hi = corners.iter().copied().max().unwrap_or(0);
    Stamp::from_wide(a.kind, lo, hi)
}

/// High half of the signed double-width product.
pub fn multiply_high(kind: StampKind, x: i64, y: i64) -> i64 {
    match kind {
        StampKind::Int32 => (x.wrapping_mul(y)) >> 32,
        _ => ((x as i128 * y as i128) >> 64) as i64,
    }
}

/// Range of the signed multiply-high.
///
/// Evaluates the operation at the four combinations of input extremes and
/// keeps their min and max. This is only sound because multiply-high is
/// monotonic in each input once the sign of the other input is fixed.
pub fn mul_high(a: &Stamp, b: &Stamp) -> Stamp {
    if let Some(empty) = propagate_empty(a, b) {
        return empty;
    }
    if a.is_unrestricted() || b.is_unrestricted() {
        return Stamp::unrestricted(a.kind);
    }
    let mut lo = i64::MAX;
    let mut hi = i64::MIN;
    for x in [a.lo, a.hi] {
        for y in [b.lo, b.hi] {
            let r = multiply_high(a.kind, x, y);
            lo = lo.min(r);
            hi = hi.max(r);
        }
    }
    Stamp::range(a.kind, lo, hi)
}

pub fn and(a: &Stamp, b: &Stamp) -> Stamp {
    if let Some(empty) = propagate_empty(a, b) {
        return empty;
    }
    if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
        return Stamp::constant(a.kind, x & y);
    }
    match (a.is_non_negative(), b.is_non_negative()) {
        (true, true) => Stamp::range(a.kind, 0, a.hi.min(b.hi)),
        (true, false) => Stamp::range(a.kind, 0, a.hi),
        (false, true) => Stamp::range(a.kind, 0, b.hi),
        (false, false) => Stamp::unrestricted(a.kind),
    }
}

pub fn or(a: &Stamp, b: &Stamp) -> Stamp {
    if let Some(empty) = propagate_empty(a, b) {
        return empty;
    }
    if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
        return Stamp::constant(a.kind, x | y);
    }
    if a.is_non_negative() && b.is_non_negative() {
        Stamp::range(a.kind, a.lo.max(b.lo), covering_mask(a.hi.max(b.hi)))
    } else {
        Stamp::unrestricted(a.kind)
    }
}

pub fn xor(a: &Stamp, b: &Stamp) -> Stamp {
    if let Some(empty) = propagate_empty(a, b) {
        return empty;
    }
    if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
        return Stamp::constant(a.kind, x ^ y);
    }
    if a.is_non_negative() && b.is_non_negative() {
        Stamp::range(a.kind, 0, covering_mask(a.hi.max(b.hi)))
    } else {
        Stamp::unrestricted(a.kind)
    }
}

pub fn neg(a: &Stamp) -> Stamp {
    if a.is_empty() {
        return *a;
    }
    if let Some(x) = a.as_constant() {
        return Stamp::constant(a.kind, x.wrapping_neg());
    }
    if a.lo == a.kind.min_value() {
        return Stamp::unrestricted(a.kind);
    }
    Stamp::range(a.kind, -a.hi, -a.lo)
}

pub fn not(a: &Stamp) -> Stamp {
    if a.is_empty() {
        return *a;
    }
    Stamp::range(a.kind, !a.hi, !a.lo)
}

/// Bounds are kept sign-extended, so widening keeps the interval.
pub fn sign_extend(a: &Stamp) -> Stamp {
    if a.is_empty() {
        return Stamp::empty(StampKind::Int64);
    }
    Stamp::range(StampKind::Int64, a.lo, a.hi)
}

fn boolean(value: Option<bool>) -> Stamp {
    match value {
        Some(v) => Stamp::constant(StampKind::Int32, v as i64),
        None => Stamp::range(StampKind::Int32, 0, 1),
    }
}

/// Signed `a < b` as a 32-bit `0`/`1` value.
pub fn less_than(a: &Stamp, b: &Stamp) -> Stamp {
    if a.is_empty() || b.is_empty() {
        return Stamp::empty(StampKind::Int32);
    }
    if a.hi < b.lo {
        boolean(Some(true))
    } else if a.lo >= b.hi {
        boolean(Some(false))
    } else {
        boolean(None)
    }
}

/// `a == b` as a 32-bit `0`/`1` value.
pub fn equals(a: &Stamp, b: &Stamp) -> Stamp {
    if a.is_empty() || b.is_empty() {
        return Stamp::empty(StampKind::Int32);
    }
    match (a.as_constant(), b.as_constant()) {
        (Some(x), Some(y)) => boolean(Some(x == y)),
        _ if a.hi < b.lo || b.hi < a.lo => boolean(Some(false)),
        _ => boolean(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i32s(lo: i64, hi: i64) -> Stamp {
        Stamp::range(StampKind::Int32, lo, hi)
    }

    #[test]
    fn test_join_is_union() {
        assert_eq!(i32s(0, 10).join(&i32s(20, 30)), i32s(0, 30));
        let s = i32s(-4, 7);
        assert_eq!(s.join(&s), s);
        assert_eq!(s.join(&Stamp::empty(StampKind::Int32)), s);
    }

    #[test]
    fn test_meet_narrows() {
        assert_eq!(i32s(0, 10).meet(&i32s(5, 30)), i32s(5, 10));
        assert!(i32s(0, 10).meet(&i32s(20, 30)).is_empty());
    }

    #[test]
    fn test_constant() {
        let c = Stamp::constant(StampKind::Int32, 5);
        assert_eq!(c, i32s(5, 5));
        assert_eq!(c.as_constant(), Some(5));
        assert_eq!(i32s(5, 6).as_constant(), None);
        assert_eq!(Stamp::constant(StampKind::Int32, 1 << 32).as_constant(), Some(0));
    }

    #[test]
    fn test_empty_propagates() {
        let empty = Stamp::empty(StampKind::Int64);
        let s = Stamp::range(StampKind::Int64, 1, 2);
        assert!(add(&empty, &s).is_empty());
        assert!(mul(&s, &empty).is_empty());
        assert!(mul_high(&empty, &s).is_empty());
        assert!(neg(&empty).is_empty());
    }

    #[test]
    fn test_add_overflow_goes_unrestricted() {
        let big = i32s(0, i32::MAX as i64);
        assert!(add(&big, &i32s(1, 1)).is_unrestricted());
        assert_eq!(add(&i32s(1, 2), &i32s(10, 20)), i32s(11, 22));
        // Constants wrap instead.
        let max = Stamp::constant(StampKind::Int32, i32::MAX as i64);
        assert_eq!(add(&max, &Stamp::constant(StampKind::Int32, 1)).as_constant(), Some(i32::MIN as i64));
    }

    #[test]
    fn test_sub_and_mul_ranges() {
        assert_eq!(sub(&i32s(0, 10), &i32s(1, 2)), i32s(-2, 9));
        assert_eq!(mul(&i32s(-2, 3), &i32s(-2, 3)), i32s(-6, 9));
    }

    #[test]
    fn test_mul_high_four_extremes() {
        // Products of the extremes: 4, -6, -6, 9; high 32 bits: 0, -1, -1, 0.
        let s = i32s(-2, 3);
        assert_eq!(mul_high(&s, &s), i32s(-1, 0));

        let big = Stamp::range(StampKind::Int64, 1 << 40, 1 << 41);
        let r = mul_high(&big, &big);
        assert_eq!(r.lower_bound(), 1 << 16);
        assert_eq!(r.upper_bound(), 1 << 18);
    }

    #[test]
    fn test_bitwise_ranges() {
        assert_eq!(and(&i32s(0, 100), &i32s(-5, 5)), i32s(0, 100));
        assert_eq!(and(&i32s(0, 100), &i32s(0, 7)), i32s(0, 7));
        assert_eq!(or(&i32s(1, 5), &i32s(2, 8)), i32s(2, 15));
        assert_eq!(xor(&i32s(0, 5), &i32s(0, 3)), i32s(0, 7));
        assert_eq!(not(&i32s(0, 3)), i32s(-4, -1));
        assert_eq!(neg(&i32s(1, 3)), i32s(-3, -1));
        assert!(neg(&i32s(i32::MIN as i64, 0)).is_unrestricted());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(less_than(&i32s(0, 4), &i32s(5, 9)).as_constant(), Some(1));
        assert_eq!(less_than(&i32s(5, 9), &i32s(0, 5)).as_constant(), Some(0));
        assert_eq!(less_than(&i32s(0, 9), &i32s(5, 6)), i32s(0, 1));
        assert_eq!(equals(&i32s(0, 4), &i32s(5, 9)).as_constant(), Some(0));
        assert_eq!(equals(&i32s(3, 3), &i32s(3, 3)).as_constant(), Some(1));
    }

    #[test]
    fn test_display() {
        assert_eq!(i32s(0, 10).to_string(), "i32[0, 10]");
        assert_eq!(Stamp::unrestricted(StampKind::Pointer).to_string(), "ptr");
        assert_eq!(Stamp::void().to_string(), "void");
    }
}
