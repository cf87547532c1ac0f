use num_traits::{Bounded, Num};
use rand::distributions::uniform::SampleUniform;
use std::fmt::{Debug, Display};
use std::ops::{AddAssign, MulAssign};

/// Element types a tensor can hold.
pub trait Type:
    'static
    + Send
    + Sync
    + Num
    + Bounded
    + SampleUniform
    + Copy
    + Debug
    + Display
    + PartialOrd
    + AddAssign
    + MulAssign
{
    fn atol() -> Self {
        Self::zero()
    }

    fn abs(&self) -> Self {
        if *self < Self::zero() {
            Self::zero() - *self
        } else {
            *self
        }
    }
}

impl Type for f32 {
    fn atol() -> Self {
        1e-5
    }
}

impl Type for f64 {
    fn atol() -> Self {
        1e-8
    }
}

macro_rules! impl_type {
    ($($t:ty),*) => {
        $(
            impl Type for $t {}
        )*
    };
}

impl_type!(usize, u8, u16, u32, u64, isize, i8, i16, i32, i64);
