use std::{
    cmp::max,
    ops::{BitOr, BitOrAssign},
};


/// How far a cached value can be trusted.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Default)]
pub enum Dirty {
    #[default]
    Clean,
    /// A dependency was notified. Dependency versions must be compared before the value is trusted.
    MaybeDirty,
    /// The value was never resolved or was invalidated explicitly.
    Dirty,
}
impl Dirty {
    pub fn from_is_dirty(is_dirty: bool) -> Self {
        if is_dirty {
            Dirty::Dirty
        } else {
            Dirty::Clean
        }
    }
    pub fn is_maybe_dirty(self) -> bool {
        self == Dirty::MaybeDirty
    }
    pub fn is_clean(self) -> bool {
        self == Dirty::Clean
    }
}

impl BitOr for Dirty {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        max(self, rhs)
    }
}
impl BitOrAssign for Dirty {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}
