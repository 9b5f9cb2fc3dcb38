use std::fmt;

// === TypeTag === //

/// A 128-bit identifier naming either a concrete type or an interface.
///
/// Tags are opaque: they carry no ordering and no hashing at this layer. Two tags are the same
/// identifier if and only if both halves are bitwise equal. Uniqueness across the identifier space
/// is guaranteed by whoever mints the tags, not by this crate.
///
/// The layout is frozen: `lo` at offset 0, `hi` at offset 8.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct TypeTag {
    pub lo: u64,
    pub hi: u64,
}

impl TypeTag {
    pub const fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    /// Exact equality of both halves. Usable in `const` contexts.
    pub const fn matches(self, other: Self) -> bool {
        self.lo == other.lo && self.hi == other.hi
    }
}

impl Eq for TypeTag {}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.matches(*other)
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({self})")
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}
