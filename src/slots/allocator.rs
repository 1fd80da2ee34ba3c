/// Allocates and recycles `u32` slot indices below a fixed capacity.
///
/// Freed indices are reused before untouched ones, most recently freed first.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    free_list: Vec<u32>,
    next_id: u32,
    len: u32,
    capacity: u32,
}

impl SlotAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            free_list: Vec::new(),
            next_id: 0,
            len: 0,
            capacity,
        }
    }

    /// Allocate the next available slot, `None` when full
    pub fn alloc(&mut self) -> Option<u32> {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None if self.next_id < self.capacity => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
            None => return None,
        };
        self.len += 1;
        Some(id)
    }

    /// Return a slot for reuse
    pub fn free(&mut self, id: u32) {
        debug_assert!(id < self.next_id, "freeing an unallocated slot: {}", id);
        debug_assert!(!self.free_list.contains(&id), "slot {} freed twice", id);
        self.len -= 1;
        self.free_list.push(id);
    }

    /// Slots that can still be allocated
    pub fn available(&self) -> u32 {
        self.capacity - self.len
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_until_full() {
        let mut alloc = SlotAllocator::new(3);
        assert_eq!(alloc.alloc(), Some(0));
        assert_eq!(alloc.alloc(), Some(1));
        assert_eq!(alloc.alloc(), Some(2));
        assert_eq!(alloc.alloc(), None);
        assert_eq!(alloc.available(), 0);
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let mut alloc = SlotAllocator::new(4);
        let a = alloc.alloc().unwrap();
        let _b = alloc.alloc().unwrap();
        alloc.free(a);
        assert_eq!(alloc.len(), 1);
        assert_eq!(alloc.alloc(), Some(a));
    }

    #[test]
    fn test_zero_capacity() {
        let mut alloc = SlotAllocator::new(0);
        assert!(alloc.is_empty());
        assert_eq!(alloc.alloc(), None);
    }
}
