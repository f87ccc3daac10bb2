//! Per-column type state: a small bitset identifying the current base type
//! plus the orthogonal `MISSING` and `USER` flags, and the promotion
//! lattice that governs how a column's type is allowed to change as new
//! evidence arrives.

use std::sync::atomic::{AtomicU8, Ordering};

/// Base type bits are mutually exclusive; `MISSING` and `USER` are
/// orthogonal flags that can be set alongside any base type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum BaseType {
    Empty = 0,
    MissingType = 1,
    Int = 2,
    Float = 3,
    Date = 4,
    DateTime = 5,
    Time = 6,
    Bool = 7,
    Pool = 8,
    String = 9,
}

impl BaseType {
    const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => BaseType::Empty,
            1 => BaseType::MissingType,
            2 => BaseType::Int,
            3 => BaseType::Float,
            4 => BaseType::Date,
            5 => BaseType::DateTime,
            6 => BaseType::Time,
            7 => BaseType::Bool,
            8 => BaseType::Pool,
            _ => BaseType::String,
        }
    }
}

const BASE_MASK: u8 = 0b0000_1111;
pub const MISSING_FLAG: u8 = 0b0001_0000;
pub const USER_FLAG: u8 = 0b0010_0000;

/// Compact enum+flags describing a column's current inferred/declared
/// type. Stored as a single byte so a column vector of these can be
/// mutated atomically during multithreaded parsing (see [`AtomicTypeCode`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeCode(u8);

impl TypeCode {
    pub const EMPTY: TypeCode = TypeCode(BaseType::Empty as u8);

    pub fn new(base: BaseType) -> Self {
        TypeCode(base as u8)
    }

    pub fn base(self) -> BaseType {
        BaseType::from_bits(self.0 & BASE_MASK)
    }

    pub fn is_missing(self) -> bool {
        self.0 & MISSING_FLAG != 0
    }

    pub fn is_user(self) -> bool {
        self.0 & USER_FLAG != 0
    }

    pub fn with_missing(self) -> Self {
        TypeCode(self.0 | MISSING_FLAG)
    }

    pub fn with_user(self) -> Self {
        TypeCode(self.0 | USER_FLAG)
    }

    pub fn with_base(self, base: BaseType) -> Self {
        TypeCode((self.0 & !BASE_MASK) | base as u8)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn from_u8(bits: u8) -> Self {
        TypeCode(bits)
    }

    /// Joins two bases for cross-chunk reconciliation. Equal bases merge
    /// to themselves; EMPTY/MISSINGTYPE carry no evidence and defer to
    /// whatever the other side is; INT and FLOAT merge to FLOAT (the one
    /// true numeric-widening edge); any other pair of differing concrete
    /// bases -- e.g. one chunk committing BOOL while another committed
    /// DATE -- is incomparable and collapses to STRING, the universal
    /// sink. Commutative and associative, so folding it over chunks in
    /// any completion order reaches the same result.
    fn merge_base(a: BaseType, b: BaseType) -> BaseType {
        use BaseType::*;
        match (a, b) {
            (x, y) if x == y => x,
            (Empty, x) | (x, Empty) => x,
            (MissingType, x) | (x, MissingType) => x,
            (Int, Float) | (Float, Int) => Float,
            _ => String,
        }
    }

    /// True if merging `self` with `other` leaves `self`'s base
    /// unchanged, i.e. `self` is already at or above `other` in the
    /// lattice. Used by the atomic monotonic-max update.
    pub fn dominates(self, other: TypeCode) -> bool {
        TypeCode::merge_base(self.base(), other.base()) == self.base()
    }
}

impl Default for TypeCode {
    fn default() -> Self {
        TypeCode::EMPTY
    }
}

/// An array-friendly atomic cell for a column's [`TypeCode`]. Promotions
/// are monotonic (they only move up the lattice), so a plain
/// compare-and-swap loop that only ever installs a dominating value is
/// race-free: whichever thread's CAS wins, the result is still a valid
/// upper bound of both inputs.
#[derive(Debug)]
pub struct AtomicTypeCode(AtomicU8);

impl AtomicTypeCode {
    pub fn new(code: TypeCode) -> Self {
        AtomicTypeCode(AtomicU8::new(code.as_u8()))
    }

    pub fn load(&self) -> TypeCode {
        TypeCode::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Merges `new` into the stored value via [`TypeCode::merge_base`].
    /// Returns the value that ended up stored.
    pub fn promote_to(&self, new: TypeCode) -> TypeCode {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let current_code = TypeCode::from_u8(current);
            let merged_base = TypeCode::merge_base(current_code.base(), new.base());
            let merged = TypeCode(
                merged_base as u8 | ((current_code.0 | new.0) & (MISSING_FLAG | USER_FLAG)),
            );
            if merged == current_code {
                return current_code;
            }
            match self.0.compare_exchange_weak(
                current,
                merged.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return merged,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_round_trips_through_u8() {
        for base in [
            BaseType::Empty,
            BaseType::Int,
            BaseType::Float,
            BaseType::String,
            BaseType::Pool,
        ] {
            let tc = TypeCode::new(base).with_missing();
            let back = TypeCode::from_u8(tc.as_u8());
            assert_eq!(back.base(), base);
            assert!(back.is_missing());
        }
    }

    #[test]
    fn missing_flag_persists_across_promotion() {
        let atomic = AtomicTypeCode::new(TypeCode::new(BaseType::Int).with_missing());
        atomic.promote_to(TypeCode::new(BaseType::Float));
        let loaded = atomic.load();
        assert_eq!(loaded.base(), BaseType::Float);
        assert!(loaded.is_missing());
    }

    #[test]
    fn string_is_sink() {
        let atomic = AtomicTypeCode::new(TypeCode::new(BaseType::Float));
        let merged = atomic.promote_to(TypeCode::new(BaseType::String));
        assert_eq!(merged.base(), BaseType::String);
        // further promotions never move off String
        let merged2 = atomic.promote_to(TypeCode::new(BaseType::Int));
        assert_eq!(merged2.base(), BaseType::String);
    }

    #[test]
    fn user_flag_is_sticky() {
        let tc = TypeCode::new(BaseType::Int).with_user();
        assert!(tc.is_user());
        assert_eq!(tc.with_missing().base(), BaseType::Int);
    }

    #[test]
    fn incompatible_concrete_bases_collapse_to_string() {
        // Two chunks of the same column committed to different concrete
        // types (e.g. one chunk's rows all parsed as BOOL, another's all
        // parsed as DATE). Neither dominates the other, so the merge must
        // land on STRING rather than silently keeping whichever won the
        // race.
        let atomic = AtomicTypeCode::new(TypeCode::new(BaseType::Bool));
        let merged = atomic.promote_to(TypeCode::new(BaseType::Date));
        assert_eq!(merged.base(), BaseType::String);
    }

    #[test]
    fn merge_is_order_independent() {
        // The same three bases merged in either order reach the same result.
        let a = AtomicTypeCode::new(TypeCode::new(BaseType::Int));
        a.promote_to(TypeCode::new(BaseType::Date));
        a.promote_to(TypeCode::new(BaseType::Float));

        let b = AtomicTypeCode::new(TypeCode::new(BaseType::Float));
        b.promote_to(TypeCode::new(BaseType::Int));
        b.promote_to(TypeCode::new(BaseType::Date));

        assert_eq!(a.load().base(), b.load().base());
        assert_eq!(a.load().base(), BaseType::String);
    }
}
