//! Operator-implementation helpers for single-field newtypes.

/// Implements a `std::ops` trait for a newtype by delegating to the wrapped value.
///
/// `op!(binary T, Add, add)` implements `Add for T`, `op!(inplace T, AddAssign, add_assign)`
/// implements the in-place variant, and `op!(unary T, Neg, neg)` the unary one.
#[macro_export]
macro_rules! op {
    (binary $t:ty, $op:ident, $f:ident) => {
        impl std::ops::$op for $t {
            type Output = Self;

            fn $f(self, rhs: Self) -> Self::Output {
                Self(std::ops::$op::$f(self.0, rhs.0))
            }
        }
    };
    (inplace $t:ty, $op:ident, $f:ident) => {
        impl std::ops::$op for $t {
            fn $f(&mut self, rhs: Self) {
                std::ops::$op::$f(&mut self.0, rhs.0)
            }
        }
    };
    (unary $t:ty, $op:ident, $f:ident) => {
        impl std::ops::$op for $t {
            type Output = Self;

            fn $f(self) -> Self::Output {
                Self(std::ops::$op::$f(self.0))
            }
        }
    };
}
