use core::fmt;

/// Priority tag carried by every outbound buffer.
///
/// A priority is an opaque signed integer chosen by the producer. It carries
/// no ordering meaning on its own: the scheduler maps each priority to a
/// class through [`DrrConfig`](crate::DrrConfig) and the class weight decides
/// how much bandwidth the priority receives.
///
/// ```
/// use framelane::Priority;
///
/// let control = Priority::new(0);
/// let bulk = Priority::from(7);
/// assert_ne!(control, bulk);
/// assert_eq!(bulk.get(), 7);
/// assert_eq!(Priority::default(), Priority::DEFAULT);
/// ```
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Priority(i32);

impl Priority {
    /// Priority of buffers that were never tagged.
    pub const DEFAULT: Self = Self(0);

    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn get(self) -> i32 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn rand(classes: i32) -> Self {
        use rand::Rng;

        Self(rand::rng().random_range(0..classes))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<Priority> for i32 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_conversions() {
        for v in [i32::MIN, -1, 0, 1, i32::MAX] {
            let p = Priority::from(v);
            assert_eq!(i32::from(p), v);
            assert_eq!(Priority::new(v), p);
        }
        assert_eq!(Priority::new(3).to_string(), "P3");
        assert_eq!(Priority::default().get(), 0);
    }
}
