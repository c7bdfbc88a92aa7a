//! Generational arena with mark bits for the collector.

use std::fmt;
use std::marker::PhantomData;

/// A typed, copyable reference into a [`Heap`].
pub(crate) trait Handle: Copy {
    fn new(index: u32, generation: u32) -> Self;
    fn index(self) -> u32;
    fn generation(self) -> u32;
}

/// Heap storage with generational indices.
///
/// When a value is freed its slot is reused but the generation is
/// incremented, so stale handles are detected instead of aliasing.
pub(crate) struct Heap<H, T> {
    slots: Vec<HeapSlot<T>>,
    free_list: Vec<u32>,
    _handle: PhantomData<H>,
}

struct HeapSlot<T> {
    generation: u32,
    value: Option<T>,
    marked: bool,
}

impl<H: Handle, T> Heap<H, T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            _handle: PhantomData,
        }
    }

    pub(crate) fn allocate(&mut self, value: T) -> H {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            slot.marked = false;
            H::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                value: Some(value),
                marked: false,
            });
            H::new(index, 0)
        }
    }

    pub(crate) fn get(&self, handle: H) -> Option<&T> {
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// Number of live values.
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// Set the mark bit; returns true if the value was live and unmarked.
    pub(crate) fn mark(&mut self, handle: H) -> bool {
        if let Some(slot) = self.slots.get_mut(handle.index() as usize)
            && slot.generation == handle.generation()
            && slot.value.is_some()
            && !slot.marked
        {
            slot.marked = true;
            return true;
        }
        false
    }

    /// Handles of live values not marked in this cycle.
    pub(crate) fn unmarked(&self) -> Vec<H> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some() && !slot.marked)
            .map(|(index, slot)| H::new(index as u32, slot.generation))
            .collect()
    }

    /// Free every unmarked value and clear all marks; returns the freed count.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.is_some() && !slot.marked {
                slot.value = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push(index as u32);
                freed += 1;
            }
            slot.marked = false;
        }
        freed
    }
}

impl<H, T> fmt::Debug for Heap<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .finish()
    }
}
