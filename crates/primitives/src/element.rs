use alloy::primitives::U256;

/// A 32-byte machine word together with an optional provenance label.
///
/// Labels are hints only; every opcode is computed from `data` alone, so an
/// analysis that ignores labels still sees correct arithmetic. `T` is chosen
/// by each analysis driver (calldata markers, argument descriptors, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element<T> {
    /// Big-endian 256-bit value.
    pub data: [u8; 32],
    pub label: Option<T>,
}

impl<T> Element<T> {
    pub fn new(data: [u8; 32], label: Option<T>) -> Self {
        Element { data, label }
    }

    pub fn from_uint(value: U256) -> Self {
        Element {
            data: value.to_be_bytes(),
            label: None,
        }
    }

    pub fn from_usize(value: usize) -> Self {
        Self::from_uint(U256::from(value))
    }

    pub fn to_uint(&self) -> U256 {
        U256::from_be_bytes(self.data)
    }

    /// The low 4 bytes, where dispatchers keep function selectors.
    pub fn low4(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.data[28..32]);
        out
    }
}
