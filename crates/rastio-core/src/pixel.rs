//! Pixel sample kinds and the raw byte codec for them.
//!
//! A raster band stores samples of exactly one [`RasterKind`]. The kind is
//! a runtime value because bands of different kinds flow through the same
//! cache and engine; per-kind code is reached by dispatching on it (see
//! `copy` for the conversion kernel).
//!
//! # Kinds
//!
//! Real: `U8, I8, U16, I16, U32, I32, F32, F64`.
//! Complex (interleaved re/im component pairs): `CI16, CI32, CF32, CF64`.
//!
//! # Example
//!
//! ```rust
//! use rastio_core::RasterKind;
//!
//! assert_eq!(RasterKind::U16.size_bytes(), 2);
//! assert_eq!(RasterKind::CF32.size_bytes(), 8);
//! assert_eq!(RasterKind::CF32.component(), RasterKind::F32);
//! assert_eq!(RasterKind::I16.union(RasterKind::U16), RasterKind::I32);
//! ```

pub use num_complex::Complex;

/// Sample kind of one raster band.
///
/// The enumeration is fixed; drivers may not invent kinds. Complex kinds
/// store the real component first, immediately followed by the imaginary
/// component, both of the [`component`](RasterKind::component) kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RasterKind {
    /// 8-bit unsigned integer.
    #[default]
    U8,
    /// 8-bit signed integer.
    I8,
    /// 16-bit unsigned integer.
    U16,
    /// 16-bit signed integer.
    I16,
    /// 32-bit unsigned integer.
    U32,
    /// 32-bit signed integer.
    I32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Complex pair of 16-bit signed integers.
    CI16,
    /// Complex pair of 32-bit signed integers.
    CI32,
    /// Complex pair of 32-bit floats.
    CF32,
    /// Complex pair of 64-bit floats.
    CF64,
}

impl RasterKind {
    /// Size of one sample word in bytes (both components for complex kinds).
    #[inline]
    pub const fn size_bytes(&self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 | Self::CI16 => 4,
            Self::F64 | Self::CI32 | Self::CF32 => 8,
            Self::CF64 => 16,
        }
    }

    /// Whether this is a complex kind.
    #[inline]
    pub const fn is_complex(&self) -> bool {
        matches!(self, Self::CI16 | Self::CI32 | Self::CF32 | Self::CF64)
    }

    /// Whether the component type is floating point.
    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64 | Self::CF32 | Self::CF64)
    }

    /// Whether the component type is a signed integer.
    #[inline]
    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::CI16 | Self::CI32)
    }

    /// Whether the component type is an integer.
    #[inline]
    pub const fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// Bits in one component.
    #[inline]
    pub const fn component_bits(&self) -> u32 {
        match self {
            Self::U8 | Self::I8 => 8,
            Self::U16 | Self::I16 | Self::CI16 => 16,
            Self::U32 | Self::I32 | Self::F32 | Self::CI32 | Self::CF32 => 32,
            Self::F64 | Self::CF64 => 64,
        }
    }

    /// The real kind of one component (identity for real kinds).
    #[inline]
    pub const fn component(&self) -> RasterKind {
        match self {
            Self::CI16 => Self::I16,
            Self::CI32 => Self::I32,
            Self::CF32 => Self::F32,
            Self::CF64 => Self::F64,
            other => *other,
        }
    }

    /// Short display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::CI16 => "ci16",
            Self::CI32 => "ci32",
            Self::CF32 => "cf32",
            Self::CF64 => "cf64",
        }
    }

    /// Returns `true` if a value of kind `other` always survives a round
    /// trip through `self` unchanged.
    fn covers(&self, other: RasterKind) -> bool {
        let c = self.component();
        let o = other.component();
        if o.is_float() {
            return c.is_float() && c.component_bits() >= o.component_bits();
        }
        if c.is_float() {
            // Mantissa width: f32 holds integers up to 24 bits, f64 up to 53.
            let mantissa = if c.component_bits() == 32 { 24 } else { 53 };
            return mantissa >= o.component_bits();
        }
        match (c.is_signed(), o.is_signed()) {
            (true, true) | (false, false) => c.component_bits() >= o.component_bits(),
            (true, false) => c.component_bits() > o.component_bits(),
            (false, true) => false,
        }
    }

    /// Smallest kind that losslessly holds values of both `self` and `other`.
    ///
    /// The result is complex if either input is complex.
    pub fn union(&self, other: RasterKind) -> RasterKind {
        if self.is_complex() || other.is_complex() {
            const COMPLEX: [RasterKind; 4] = [
                RasterKind::CI16,
                RasterKind::CI32,
                RasterKind::CF32,
                RasterKind::CF64,
            ];
            for candidate in COMPLEX {
                if candidate.covers(*self) && candidate.covers(other) {
                    return candidate;
                }
            }
            return RasterKind::CF64;
        }
        const REAL: [RasterKind; 8] = [
            RasterKind::U8,
            RasterKind::I8,
            RasterKind::U16,
            RasterKind::I16,
            RasterKind::U32,
            RasterKind::I32,
            RasterKind::F32,
            RasterKind::F64,
        ];
        for candidate in REAL {
            if candidate.covers(*self) && candidate.covers(other) {
                return candidate;
            }
        }
        RasterKind::F64
    }
}

impl std::fmt::Display for RasterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A real sample primitive that can be read from and written to raw,
/// possibly unaligned, native-endian bytes.
///
/// Implemented for the eight real component types. Complex samples are
/// handled as component pairs by the conversion kernel.
pub trait Sample: Copy + Default + PartialOrd + 'static {
    /// The corresponding [`RasterKind`].
    const KIND: RasterKind;
    /// Word size in bytes.
    const SIZE: usize;

    /// Reads one sample from the start of `buf`.
    fn read_from(buf: &[u8]) -> Self;

    /// Writes this sample to the start of `buf`.
    fn write_to(self, buf: &mut [u8]);
}

macro_rules! impl_sample {
    ($ty:ty, $kind:expr, $size:expr) => {
        impl Sample for $ty {
            const KIND: RasterKind = $kind;
            const SIZE: usize = $size;

            #[inline]
            fn read_from(buf: &[u8]) -> Self {
                let mut raw = [0u8; $size];
                raw.copy_from_slice(&buf[..$size]);
                <$ty>::from_ne_bytes(raw)
            }

            #[inline]
            fn write_to(self, buf: &mut [u8]) {
                buf[..$size].copy_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

impl_sample!(u8, RasterKind::U8, 1);
impl_sample!(i8, RasterKind::I8, 1);
impl_sample!(u16, RasterKind::U16, 2);
impl_sample!(i16, RasterKind::I16, 2);
impl_sample!(u32, RasterKind::U32, 4);
impl_sample!(i32, RasterKind::I32, 4);
impl_sample!(f32, RasterKind::F32, 4);
impl_sample!(f64, RasterKind::F64, 8);

/// Reads a complex sample of component type `T` from the start of `buf`.
#[inline]
pub fn read_complex<T: Sample>(buf: &[u8]) -> Complex<T> {
    Complex::new(T::read_from(buf), T::read_from(&buf[T::SIZE..]))
}

/// Writes a complex sample of component type `T` to the start of `buf`.
#[inline]
pub fn write_complex<T: Sample>(value: Complex<T>, buf: &mut [u8]) {
    value.re.write_to(buf);
    value.im.write_to(&mut buf[T::SIZE..]);
}
