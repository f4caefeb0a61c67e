use std::fmt;

/// Unique identifier of a body. Stays fixed for the lifetime of the body, unlike its storage index.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub i32);

/// Unique identifier of a static collidable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct StaticHandle(pub i32);

/// Unique identifier of a constraint, handed out by the solver's handle pool.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ConstraintHandle(pub i32);

impl ConstraintHandle {
    /// Placeholder stored in a pair cache slot whose constraint has not been created yet.
    pub const PENDING: ConstraintHandle = ConstraintHandle(-1);

    #[inline(always)]
    pub fn is_pending(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for BodyHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BodyHandle<{}>", self.0)
    }
}

impl fmt::Display for StaticHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StaticHandle<{}>", self.0)
    }
}

impl fmt::Display for ConstraintHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConstraintHandle<{}>", self.0)
    }
}
