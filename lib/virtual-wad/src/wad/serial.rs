use std::cell::Cell;
use std::rc::Rc;

const FIRST_SERIAL_NO: u64 = 0x80_0000;

/// Hands out process-local serial numbers for directory entries.
///
/// Clones share the same counter, so archives opened with clones of one
/// generator never hand out the same serial number twice.
#[derive(Debug, Clone)]
pub struct SerialGenerator {
    next: Rc<Cell<u64>>,
}

impl SerialGenerator {
    pub fn new() -> Self {
        Self::starting_at(FIRST_SERIAL_NO)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Rc::new(Cell::new(first)),
        }
    }

    pub fn next_serial(&self) -> u64 {
        let serial = self.next.get();
        self.next.set(serial + 1);
        serial
    }
}

impl Default for SerialGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test_serial {
    use super::*;

    #[test]
    fn test_clones_share_counter() {
        let a = SerialGenerator::new();
        let b = a.clone();
        assert_eq!(a.next_serial(), FIRST_SERIAL_NO);
        assert_eq!(b.next_serial(), FIRST_SERIAL_NO + 1);
        assert_eq!(SerialGenerator::starting_at(5).next_serial(), 5);
    }
}
