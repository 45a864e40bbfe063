// File: src/table.rs
//
// Open-addressed hash table keyed by interned strings. One generic
// implementation backs globals, instance fields, class method tables and
// the heap's string-intern set (see object.rs).
//
// Tombstones are modeled as an explicit `Slot::Tombstone` variant rather
// than clox's "key=null, value=true" sentinel trick — same observable
// behavior (a deleted slot doesn't stop a probe the way an empty slot
// does), expressed without overloading the value type.

use crate::object::{Heap, ObjData, ObjRef};

const MIN_CAPACITY: usize = 8;
const MAX_LOAD: f64 = 0.75;

enum Slot<V> {
    Empty,
    Tombstone,
    Occupied(ObjRef, u32, V),
}

pub struct Table<V: Clone> {
    slots: Vec<Slot<V>>,
    count: usize, // occupied, not counting tombstones
}

impl<V: Clone> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Table<V> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, heap: &Heap, key: ObjRef) -> Option<&V> {
        if self.slots.is_empty() {
            return None;
        }
        let hash = heap.string_hash(key);
        let mask = self.slots.len() - 1;
        let mut index = (hash as usize) & mask;
        loop {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied(k, _, v) if *k == key => return Some(v),
                _ => index = (index + 1) & mask,
            }
        }
    }

    /// Returns true iff a brand-new logical entry was created.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: V) -> bool {
        if self.needs_growth() {
            self.grow();
        }
        let mask = self.slots.len() - 1;
        let mut index = (hash as usize) & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            match &self.slots[index] {
                Slot::Empty => {
                    let target = tombstone.unwrap_or(index);
                    self.slots[target] = Slot::Occupied(key, hash, value);
                    self.count += 1;
                    return true;
                }
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                    index = (index + 1) & mask;
                }
                Slot::Occupied(k, _, _) if *k == key => {
                    self.slots[index] = Slot::Occupied(key, hash, value);
                    return false;
                }
                Slot::Occupied(..) => index = (index + 1) & mask,
            }
        }
    }

    pub fn delete(&mut self, heap: &Heap, key: ObjRef) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let hash = heap.string_hash(key);
        let mask = self.slots.len() - 1;
        let mut index = (hash as usize) & mask;
        loop {
            match &self.slots[index] {
                Slot::Empty => return false,
                Slot::Occupied(k, _, _) if *k == key => {
                    self.slots[index] = Slot::Tombstone;
                    return true;
                }
                _ => index = (index + 1) & mask,
            }
        }
    }

    /// Probe by content equality; used only to resolve the string intern set,
    /// where the key object might not exist yet.
    pub fn find_string(&self, heap: &Heap, chars: &str, hash: u32) -> Option<ObjRef> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut index = (hash as usize) & mask;
        loop {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied(k, h, _) if *h == hash => {
                    if let ObjData::Str(s) = heap.get(*k) {
                        if s.chars == chars {
                            return Some(*k);
                        }
                    }
                    index = (index + 1) & mask;
                }
                _ => index = (index + 1) & mask,
            }
        }
    }

    /// Iterates occupied entries (key, value) — used by the GC mark phase
    /// and for intern-table cleanup.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, &V)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(k, _, v) => Some((*k, v)),
            _ => None,
        })
    }

    fn needs_growth(&self) -> bool {
        self.slots.is_empty() || (self.count + 1) as f64 > self.slots.len() as f64 * MAX_LOAD
    }

    fn grow(&mut self) {
        let new_capacity = (self.slots.len() * 2).max(MIN_CAPACITY);
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; new_capacity]);
        self.count = 0;
        for slot in old {
            if let Slot::Occupied(key, hash, value) = slot {
                self.insert_no_grow(key, hash, value);
            }
        }
    }

    fn insert_no_grow(&mut self, key: ObjRef, hash: u32, value: V) {
        let mask = self.slots.len() - 1;
        let mut index = (hash as usize) & mask;
        loop {
            if matches!(self.slots[index], Slot::Empty) {
                self.slots[index] = Slot::Occupied(key, hash, value);
                self.count += 1;
                return;
            }
            index = (index + 1) & mask;
        }
    }
}

impl<V: Clone> Clone for Slot<V> {
    fn clone(&self) -> Self {
        match self {
            Slot::Empty => Slot::Empty,
            Slot::Tombstone => Slot::Tombstone,
            Slot::Occupied(k, h, v) => Slot::Occupied(*k, *h, v.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Heap;

    #[test]
    fn set_get_delete_roundtrip() {
        let mut heap = Heap::new();
        let key = heap.intern_string("x");
        let hash = heap.string_hash(key);
        let mut table: Table<i64> = Table::new();
        assert!(table.set(key, hash, 1));
        assert_eq!(table.get(&heap, key), Some(&1));
        assert!(table.delete(&heap, key));
        assert_eq!(table.get(&heap, key), None);
    }

    #[test]
    fn set_existing_key_returns_false() {
        let mut heap = Heap::new();
        let key = heap.intern_string("x");
        let hash = heap.string_hash(key);
        let mut table: Table<i64> = Table::new();
        assert!(table.set(key, hash, 1));
        assert!(!table.set(key, hash, 2));
        assert_eq!(table.get(&heap, key), Some(&2));
    }

    #[test]
    fn find_string_probes_by_content() {
        let mut heap = Heap::new();
        let key = heap.intern_string("hello");
        let hash = heap.string_hash(key);
        let mut table: Table<()> = Table::new();
        table.set(key, hash, ());
        assert_eq!(table.find_string(&heap, "hello", hash), Some(key));
        assert_eq!(table.find_string(&heap, "nope", hash), None);
    }

    #[test]
    fn grows_past_load_factor() {
        let mut heap = Heap::new();
        let mut table: Table<i64> = Table::new();
        for i in 0..100 {
            let key = heap.intern_string(&format!("k{i}"));
            let hash = heap.string_hash(key);
            table.set(key, hash, i);
        }
        assert_eq!(table.len(), 100);
        for i in 0..100 {
            let key = heap.intern_string(&format!("k{i}"));
            assert_eq!(table.get(&heap, key), Some(&i));
        }
    }
}
