use std::collections::BTreeMap;

use crate::{
    register::Register,
    value::{Address, RegisterValue},
};

/// Cached raw values of a register table, keyed by address.
pub trait Buffer<A, V>: Send + Sync + 'static {
    /// Shapes a zeroed buffer for the declared registers (ascending order).
    fn for_registers(registers: &[Register<A, V>]) -> Self;

    fn get(&self, addr: A) -> Option<&V>;

    /// Stores `value` at a declared address. Returns false if the address is not
    /// covered by the buffer.
    fn set(&mut self, addr: A, value: V) -> bool;

    /// Number of cached slots.
    fn slots(&self) -> usize;
}

/// Contiguous buffer spanning the lowest to the highest declared address.
///
/// Undeclared addresses inside the span hold zero. Suited to chips whose register
/// file is mostly populated.
#[derive(Debug, Clone)]
pub struct DenseBuffer<A, V> {
    first: Option<A>,
    values: Vec<V>,
}

impl<A: Address, V: RegisterValue> DenseBuffer<A, V> {
    fn index(&self, addr: A) -> Option<usize> {
        let first = self.first?;
        if addr < first {
            return None;
        }
        let idx = (addr.to_bus() - first.to_bus()) as usize;
        (idx < self.values.len()).then_some(idx)
    }
}

impl<A: Address, V: RegisterValue> Buffer<A, V> for DenseBuffer<A, V> {
    fn for_registers(registers: &[Register<A, V>]) -> Self {
        let (Some(first), Some(last)) = (registers.first(), registers.last()) else {
            return Self {
                first: None,
                values: Vec::new(),
            };
        };
        let base = first.address();
        let mut values = vec![V::zeroed(0); base.distance(last.address())];
        for reg in registers {
            let idx = (reg.address().to_bus() - base.to_bus()) as usize;
            values[idx] = reg.zero();
        }
        Self {
            first: Some(base),
            values,
        }
    }

    fn get(&self, addr: A) -> Option<&V> {
        self.index(addr).map(|i| &self.values[i])
    }

    fn set(&mut self, addr: A, value: V) -> bool {
        match self.index(addr) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    fn slots(&self) -> usize {
        self.values.len()
    }
}

/// Buffer holding only the declared addresses.
///
/// Suited to RF transceivers with wide, mostly unused address spaces and to
/// command-keyed sensors whose "addresses" are 16-bit command words.
#[derive(Debug, Clone)]
pub struct SparseBuffer<A, V> {
    values: BTreeMap<A, V>,
}

impl<A: Address, V: RegisterValue> Buffer<A, V> for SparseBuffer<A, V> {
    fn for_registers(registers: &[Register<A, V>]) -> Self {
        Self {
            values: registers.iter().map(|r| (r.address(), r.zero())).collect(),
        }
    }

    fn get(&self, addr: A) -> Option<&V> {
        self.values.get(&addr)
    }

    fn set(&mut self, addr: A, value: V) -> bool {
        match self.values.get_mut(&addr) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn slots(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs() -> Vec<Register<u8, u8>> {
        vec![Register::new(0x02, "A"), Register::new(0x05, "B")]
    }

    #[test]
    fn dense_spans_declared_range() {
        let mut buf: DenseBuffer<u8, u8> = DenseBuffer::for_registers(&regs());
        assert_eq!(buf.slots(), 4);
        assert_eq!(buf.get(0x03), Some(&0));
        assert_eq!(buf.get(0x01), None);
        assert_eq!(buf.get(0x06), None);

        assert!(buf.set(0x05, 0x7F));
        assert_eq!(buf.get(0x05), Some(&0x7F));
        assert!(!buf.set(0x10, 1));
    }

    #[test]
    fn sparse_holds_only_declared() {
        let mut buf: SparseBuffer<u8, u8> = SparseBuffer::for_registers(&regs());
        assert_eq!(buf.slots(), 2);
        assert_eq!(buf.get(0x03), None);
        assert!(buf.set(0x02, 9));
        assert!(!buf.set(0x03, 9));
        assert_eq!(buf.get(0x02), Some(&9));
    }

    #[test]
    fn empty_tables_have_empty_buffers() {
        let dense: DenseBuffer<u8, u8> = DenseBuffer::for_registers(&[]);
        assert_eq!(dense.slots(), 0);
        assert_eq!(dense.get(0), None);
    }
}
