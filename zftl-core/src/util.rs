// vim: tw=80
//! Common utility functions used throughout zftl

use std::ops::{Add, Div, Mul, Sub};

/// Size of the blocks that metadata buffers are measured in.  The base device
/// may use a smaller sector size, but metadata is always laid out in 4K units.
pub const FTL_BLOCK_SIZE: usize = 4096;

/// Divide two unsigned numbers (usually integers), rounding up.
pub fn div_roundup<T>(dividend: T, divisor: T) -> T
    where T: Add<Output=T> + Copy + Div<Output=T> + From<u8> + Sub<Output=T>
{
    (dividend + divisor - T::from(1u8)) / divisor
}

/// Round `x` up to the next multiple of `align`.
pub fn roundup<T>(x: T, align: T) -> T
    where T: Add<Output=T> + Copy + Div<Output=T> + From<u8> + Mul<Output=T> +
             Sub<Output=T>
{
    div_roundup(x, align) * align
}

// LCOV_EXCL_START
#[cfg(test)]
/// Helper to generate the runtime used by most unit tests
pub fn basic_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

// LCOV_EXCL_STOP
