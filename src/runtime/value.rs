use crate::runtime::runtime_error::Fault;

/// Index into a VM's string heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrHandle(usize);

/// One operand stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Byte(u8),
    Str(StrHandle),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Byte(_) => "byte",
            Value::Str(_) => "string",
        }
    }
}

/// String storage for `PUSH_STR` values. A slot is freed when the value
/// holding its handle is consumed, and freed slots are reused by `alloc`.
#[derive(Debug, Default)]
pub struct StringHeap {
    slots: Vec<Option<Vec<u8>>>,
    free: Vec<usize>,
}

impl StringHeap {
    pub fn alloc(&mut self, bytes: &[u8]) -> StrHandle {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(bytes.to_vec());
                StrHandle(index)
            }
            None => {
                self.slots.push(Some(bytes.to_vec()));
                StrHandle(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, handle: StrHandle) -> &[u8] {
        // handles are only minted by alloc on this heap
        self.slots
            .get(handle.0)
            .and_then(Option::as_deref)
            .unwrap_or_default()
    }

    /// Takes the bytes out and frees the slot. The handle is dead afterwards.
    pub fn release(&mut self, handle: StrHandle) -> Vec<u8> {
        match self.slots.get_mut(handle.0).and_then(Option::take) {
            Some(bytes) => {
                self.free.push(handle.0);
                bytes
            }
            None => Vec::new(),
        }
    }

    /// Number of live strings.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded operand stack. Overflow and underflow are faults.
#[derive(Debug)]
pub struct OperandStack {
    values: Vec<Value>,
    capacity: usize,
}

impl OperandStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), Fault> {
        if self.values.len() >= self.capacity {
            return Err(Fault::StackOverflow {
                capacity: self.capacity,
            });
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self, op: &'static str) -> Result<Value, Fault> {
        self.values.pop().ok_or(Fault::StackUnderflow { op })
    }

    pub fn pop_byte(&mut self, op: &'static str) -> Result<u8, Fault> {
        match self.pop(op)? {
            Value::Byte(b) => Ok(b),
            other => Err(Fault::TypeMismatch {
                op,
                expected: "byte",
                found: other.type_name(),
            }),
        }
    }

    /// Removes every value, bottom first.
    pub fn drain(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.values)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_capacity() {
        let mut stack = OperandStack::new(2);
        stack.push(Value::Byte(1)).unwrap();
        stack.push(Value::Byte(2)).unwrap();
        let err = stack.push(Value::Byte(3)).unwrap_err();
        assert!(matches!(err, Fault::StackOverflow { capacity: 2 }));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_pop_empty_faults() {
        let mut stack = OperandStack::new(4);
        let err = stack.pop("ADD").unwrap_err();
        assert!(matches!(err, Fault::StackUnderflow { op: "ADD" }));
    }

    #[test]
    fn test_pop_byte_rejects_strings() {
        let mut heap = StringHeap::default();
        let mut stack = OperandStack::new(4);
        stack.push(Value::Str(heap.alloc(b"hi"))).unwrap();
        let err = stack.pop_byte("COMPARE").unwrap_err();
        assert!(matches!(
            err,
            Fault::TypeMismatch { op: "COMPARE", expected: "byte", found: "string" }
        ));
    }

    #[test]
    fn test_drain_is_bottom_first() {
        let mut stack = OperandStack::new(4);
        stack.push(Value::Byte(1)).unwrap();
        stack.push(Value::Byte(2)).unwrap();
        assert_eq!(stack.drain(), vec![Value::Byte(1), Value::Byte(2)]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_heap_handles_are_stable() {
        let mut heap = StringHeap::default();
        let a = heap.alloc(b"first");
        let b = heap.alloc(b"second");
        assert_eq!(heap.get(a), b"first");
        assert_eq!(heap.get(b), b"second");
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn test_released_slots_are_reused() {
        let mut heap = StringHeap::default();
        let a = heap.alloc(b"first");
        assert_eq!(heap.release(a), b"first");
        assert!(heap.is_empty());

        let b = heap.alloc(b"again");
        assert_eq!(b, a);
        assert_eq!(heap.get(b), b"again");
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_double_release_is_empty() {
        let mut heap = StringHeap::default();
        let a = heap.alloc(b"once");
        heap.release(a);
        assert!(heap.release(a).is_empty());
        assert_eq!(heap.len(), 0);
    }
}
