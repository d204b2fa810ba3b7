//! Typed views over vector register payloads.
//!
//! Multi-byte sensor results arrive as one byte sequence holding several words.
//! [`ROSlice`] decodes them in place; [`RWSlice`] builds outgoing payloads.

/// Generates `read_<ty>_{be,le}_at` for one primitive.
macro_rules! impl_read_word {
    ($type:ty, $size:literal) => {
        paste::paste! {
            #[doc = "Reads a big-endian `" $type "` at `offset`, or `None` past the end."]
            #[inline]
            pub fn [<read_ $type _be_at>](&self, offset: usize) -> Option<$type> {
                let bytes = self.0.get(offset..offset.checked_add($size)?)?;
                Some(<$type>::from_be_bytes(bytes.try_into().ok()?))
            }

            #[doc = "Reads a little-endian `" $type "` at `offset`, or `None` past the end."]
            #[inline]
            pub fn [<read_ $type _le_at>](&self, offset: usize) -> Option<$type> {
                let bytes = self.0.get(offset..offset.checked_add($size)?)?;
                Some(<$type>::from_le_bytes(bytes.try_into().ok()?))
            }
        }
    };
}

/// Generates `write_<ty>_{be,le}_at` for one primitive.
macro_rules! impl_write_word {
    ($type:ty, $size:literal) => {
        paste::paste! {
            #[doc = "Writes a big-endian `" $type "` at `offset`."]
            #[doc = ""]
            #[doc = "# Panics"]
            #[doc = "Panics if `offset + " $size " > len()`."]
            #[inline]
            pub fn [<write_ $type _be_at>](&mut self, offset: usize, value: $type) {
                self.0[offset..offset + $size].copy_from_slice(&value.to_be_bytes());
            }

            #[doc = "Writes a little-endian `" $type "` at `offset`."]
            #[doc = ""]
            #[doc = "# Panics"]
            #[doc = "Panics if `offset + " $size " > len()`."]
            #[inline]
            pub fn [<write_ $type _le_at>](&mut self, offset: usize, value: $type) {
                self.0[offset..offset + $size].copy_from_slice(&value.to_le_bytes());
            }
        }
    };
}

macro_rules! impl_slice_common {
    () => {
        #[inline]
        pub fn len(&self) -> usize {
            self.0.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }

        /// Reads the byte at `offset`, or `None` past the end.
        #[inline]
        pub fn read_u8_at(&self, offset: usize) -> Option<u8> {
            self.0.get(offset).copied()
        }

        /// Returns `len` bytes starting at `offset`, or `None` past the end.
        #[inline]
        pub fn bytes_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
            self.0.get(offset..offset.checked_add(len)?)
        }

        impl_read_word!(u16, 2);
        impl_read_word!(i16, 2);
        impl_read_word!(u32, 4);
        impl_read_word!(i32, 4);
    };
}

/// Read-only view over a payload.
#[derive(Debug, Clone, Copy)]
pub struct ROSlice<'a>(&'a [u8]);

impl<'a> ROSlice<'a> {
    #[inline]
    pub fn new(slice: &'a [u8]) -> Self {
        Self(slice)
    }

    impl_slice_common!();
}

/// Read-write view used to assemble outgoing payloads.
#[derive(Debug)]
pub struct RWSlice<'a>(&'a mut [u8]);

impl<'a> RWSlice<'a> {
    #[inline]
    pub fn new(slice: &'a mut [u8]) -> Self {
        Self(slice)
    }

    impl_slice_common!();

    /// Writes one byte.
    ///
    /// # Panics
    /// Panics if `offset >= len()`.
    #[inline]
    pub fn write_u8_at(&mut self, offset: usize, value: u8) {
        self.0[offset] = value;
    }

    impl_write_word!(u16, 2);
    impl_write_word!(u32, 4);
}
