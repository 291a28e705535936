//! Element types a pool can hold
//!
//! Pools are generic over a storage type and an accumulation type. Only
//! plain numeric types qualify, since buffer contents are moved to and from
//! the device as raw bytes through `bytemuck` casts.

use bytemuck::Pod;
use half::{bf16, f16};

mod sealed {
    pub trait Sealed {}
}

/// A fixed-size numeric element with no padding and no invalid bit patterns
pub trait Element:
    sealed::Sealed + Pod + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
    /// Short name used in log output
    const NAME: &'static str;

    /// Size of one element in bytes
    fn size() -> usize {
        std::mem::size_of::<Self>()
    }
}

macro_rules! impl_element {
    ($($ty:ty => $name:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const NAME: &'static str = $name;
            }
        )*
    };
}

impl_element! {
    i8 => "i8",
    i32 => "i32",
    f16 => "f16",
    bf16 => "bf16",
    f32 => "f32",
    f64 => "f64",
}

/// View an element slice as bytes
pub(crate) fn as_bytes<T: Element>(data: &[T]) -> &[u8] {
    bytemuck::cast_slice(data)
}

/// View an element slice as mutable bytes
pub(crate) fn as_bytes_mut<T: Element>(data: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(data)
}
