//! Register and variable descriptors.
//!
//! Descriptors are plain data built once when a chip's map is constructed and
//! never mutated afterwards. Cached values live in the owning table, not here.

use crate::{
    access::{Access, AccessPolicy},
    error::TableError,
    value::{Address, RegisterValue},
};

/// Named bit-field view into a register's raw value.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable<A, V> {
    register: Option<A>,
    mask: V,
    shift: u32,
    access: Access,
    name: String,
    nice_name: String,
    description: String,
}

impl<A: Address, V: RegisterValue> Variable<A, V> {
    /// Creates a read-write variable covering the bits set in `mask`.
    pub fn new(mask: V, name: impl Into<String>) -> Self {
        let name = name.into();
        let shift = mask.trailing_zeros();
        Self {
            register: None,
            mask,
            shift,
            access: Access::ReadWrite,
            nice_name: name.clone(),
            name,
            description: String::new(),
        }
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn nice_name(mut self, nice_name: impl Into<String>) -> Self {
        self.nice_name = nice_name.into();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Address of the owning register, once attached.
    pub fn register(&self) -> Option<A> {
        self.register
    }

    pub fn mask(&self) -> &V {
        &self.mask
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn mode(&self) -> Access {
        self.access
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.nice_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Extracts the field: `(raw & mask) >> shift`.
    pub fn get(&self, raw: &V) -> V {
        raw.bit_and(&self.mask).shr(self.shift)
    }

    /// Replaces the field: `(raw & !mask) | ((new << shift) & mask)`.
    ///
    /// Bits outside the mask are taken from `raw` unchanged. Bits of `new` that do
    /// not fit the field are dropped.
    pub fn set(&self, raw: &V, new: &V) -> V {
        let mask = self.fit_mask(raw);
        let kept = raw.bit_and(&mask.bit_not());
        let field = self.fit(new, raw).shl(self.shift).bit_and(&mask);
        kept.bit_or(&field)
    }

    // Vector masks may be declared shorter than the register; widen them so
    // `!mask` keeps the untouched high-order bytes.
    fn fit_mask(&self, raw: &V) -> V {
        self.fit(&self.mask, raw)
    }

    fn fit(&self, value: &V, raw: &V) -> V {
        if V::FIXED_LEN.is_some() || value.encoded_len() >= raw.encoded_len() {
            return value.clone();
        }
        V::zeroed(raw.encoded_len()).bit_or(value)
    }
}

impl<A, V> AccessPolicy for Variable<A, V> {
    fn can_read(&self) -> bool {
        self.access.can_read()
    }

    fn can_write(&self) -> bool {
        self.access.can_write()
    }
}

/// Immutable hardware register descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Register<A, V> {
    address: A,
    width: usize,
    access: Access,
    hot: bool,
    name: String,
    nice_name: String,
    description: String,
    variables: Vec<Variable<A, V>>,
}

impl<A: Address, V: RegisterValue> Register<A, V> {
    /// Creates a read-write register. Scalar registers are one value wide;
    /// vector registers must declare their width with [`Register::width`].
    pub fn new(address: A, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            address,
            width: V::FIXED_LEN.unwrap_or(0),
            access: Access::ReadWrite,
            hot: false,
            nice_name: name.clone(),
            name,
            description: String::new(),
            variables: Vec::new(),
        }
    }

    /// Width in bytes.
    pub fn width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn read_only(self) -> Self {
        self.access(Access::ReadOnly)
    }

    pub fn write_only(self) -> Self {
        self.access(Access::WriteOnly)
    }

    /// Flags the register for the frequent refresh tier.
    pub fn hot(mut self) -> Self {
        self.hot = true;
        self
    }

    pub fn nice_name(mut self, nice_name: impl Into<String>) -> Self {
        self.nice_name = nice_name.into();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a variable; declaration order is iteration order.
    pub fn variable(mut self, mut variable: Variable<A, V>) -> Self {
        variable.register = Some(self.address);
        self.variables.push(variable);
        self
    }

    pub fn address(&self) -> A {
        self.address
    }

    pub fn byte_width(&self) -> usize {
        self.width
    }

    /// Length of the snapshot hex string for this register.
    pub fn hex_len(&self) -> usize {
        self.width * 2
    }

    pub fn mode(&self) -> Access {
        self.access
    }

    pub fn is_hot(&self) -> bool {
        self.hot
    }

    pub fn readable(&self) -> bool {
        self.access.can_read()
    }

    pub fn writeable(&self) -> bool {
        self.access.can_write()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.nice_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable<A, V>> {
        self.variables.iter()
    }

    pub fn find_variable(&self, name: &str) -> Option<&Variable<A, V>> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// All-zero value of this register's width.
    pub fn zero(&self) -> V {
        V::zeroed(self.width)
    }

    pub(crate) fn validate(&self) -> Result<(), TableError> {
        if self.width == 0 {
            return Err(TableError::ZeroWidth(self.name.clone()));
        }
        if let Some(expected) = V::FIXED_LEN {
            if self.width != expected {
                return Err(TableError::WidthMismatch {
                    register: self.name.clone(),
                    declared: self.width,
                    expected,
                });
            }
        }
        for v in &self.variables {
            if v.mask.is_zero() {
                return Err(TableError::EmptyMask {
                    register: self.name.clone(),
                    variable: v.name.clone(),
                });
            }
            if v.mask.encoded_len() > self.width {
                return Err(TableError::MaskTooWide {
                    register: self.name.clone(),
                    variable: v.name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl<A, V> AccessPolicy for Register<A, V> {
    fn can_read(&self) -> bool {
        self.access.can_read()
    }

    fn can_write(&self) -> bool {
        self.access.can_write()
    }
}
