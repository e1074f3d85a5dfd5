use alloy::primitives::U256;

use crate::element::Element;
use crate::errors::VmError;

/// Depth limit shared with the real EVM.
const STACK_LIMIT: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct Stack<T> {
    pub data: Vec<Element<T>>,
}

impl<T> Stack<T> {
    pub fn new() -> Self {
        Stack { data: Vec::new() }
    }

    /// Push a value onto the stack.
    /// Returns `Err(VmError::StackTooDeep)` if the stack would exceed 1024 items.
    pub fn push(&mut self, value: Element<T>) -> Result<(), VmError> {
        if self.data.len() >= STACK_LIMIT {
            return Err(VmError::StackTooDeep);
        }
        self.data.push(value);
        Ok(())
    }

    pub fn push_uint(&mut self, value: U256) -> Result<(), VmError> {
        self.push(Element::from_uint(value))
    }

    pub fn pop(&mut self) -> Result<Element<T>, VmError> {
        self.data.pop().ok_or(VmError::StackUnderflow)
    }

    pub fn pop_uint(&mut self) -> Result<U256, VmError> {
        Ok(self.pop()?.to_uint())
    }

    pub fn peek(&self) -> Result<&Element<T>, VmError> {
        self.data.last().ok_or(VmError::StackUnderflow)
    }

    pub fn peek_mut(&mut self) -> Result<&mut Element<T>, VmError> {
        self.data.last_mut().ok_or(VmError::StackUnderflow)
    }

    /// Copy the n-th element from the top (1-based) onto the top.
    pub fn dup(&mut self, n: usize) -> Result<(), VmError>
    where
        T: Clone,
    {
        if n == 0 || self.data.len() < n {
            return Err(VmError::StackUnderflow);
        }
        let value = self.data[self.data.len() - n].clone();
        self.push(value)
    }

    /// Exchange the top with the (n+1)-th element from the top.
    pub fn swap(&mut self, n: usize) -> Result<(), VmError> {
        if n == 0 || self.data.len() <= n {
            return Err(VmError::StackUnderflow);
        }
        let top = self.data.len() - 1;
        self.data.swap(top, top - n);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
