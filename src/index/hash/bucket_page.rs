use crate::common::types::{Page, PAGE_SIZE};
use crate::index::hash::codec::{FixedCodec, KeyComparator};

/// Slots a bucket page can hold for the given encoded slot width: two
/// one-bit-per-slot bitmaps plus the packed slot array must fit the page.
pub fn bucket_capacity(slot_size: usize) -> usize {
    let mut capacity = (8 * PAGE_SIZE) / (8 * slot_size + 2);
    while 2 * bitmap_bytes(capacity) + capacity * slot_size > PAGE_SIZE {
        capacity -= 1;
    }
    capacity
}

fn bitmap_bytes(capacity: usize) -> usize {
    (capacity + 7) / 8
}

fn bit(bitmap: &[u8], index: usize) -> bool {
    (bitmap[index / 8] >> (index % 8)) & 1 == 1
}

fn set_bit(bitmap: &mut [u8], index: usize) {
    bitmap[index / 8] |= 1 << (index % 8);
}

fn clear_bit(bitmap: &mut [u8], index: usize) {
    bitmap[index / 8] &= !(1 << (index % 8));
}

/// Decoded view of one hash bucket page: a fixed array of key/value
/// slots plus two bitmaps. `occupied` is historical — once set it stays
/// set until the page is drained, letting scans stop at the first slot
/// that has never held an entry. `readable` marks the currently live
/// slots; a readable slot is always occupied.
pub struct HashBucketPage<K, V> {
    capacity: usize,
    occupied: Vec<u8>,
    readable: Vec<u8>,
    slots: Vec<Option<(K, V)>>,
}

// On-page layout: occupied bitmap | readable bitmap | packed slots
impl<K, V> HashBucketPage<K, V>
where
    K: FixedCodec,
    V: FixedCodec + PartialEq,
{
    const SLOT_SIZE: usize = K::ENCODED_SIZE + V::ENCODED_SIZE;

    pub fn new() -> Self {
        let capacity = bucket_capacity(Self::SLOT_SIZE);
        Self {
            capacity,
            occupied: vec![0; bitmap_bytes(capacity)],
            readable: vec![0; bitmap_bytes(capacity)],
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn from_page(page: &Page) -> Self {
        let capacity = bucket_capacity(Self::SLOT_SIZE);
        let bm = bitmap_bytes(capacity);
        let data = &page.data;

        let occupied = data[0..bm].to_vec();
        let readable = data[bm..2 * bm].to_vec();

        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            if bit(&readable, i) {
                let offset = 2 * bm + i * Self::SLOT_SIZE;
                let key = K::decode_from(&data[offset..offset + K::ENCODED_SIZE]);
                let value = V::decode_from(
                    &data[offset + K::ENCODED_SIZE..offset + Self::SLOT_SIZE],
                );
                slots.push(Some((key, value)));
            } else {
                slots.push(None);
            }
        }

        Self {
            capacity,
            occupied,
            readable,
            slots,
        }
    }

    pub fn write_to(&self, page: &mut Page) {
        let bm = bitmap_bytes(self.capacity);
        let data = &mut page.data;

        data[0..bm].copy_from_slice(&self.occupied);
        data[bm..2 * bm].copy_from_slice(&self.readable);

        for (i, slot) in self.slots.iter().enumerate() {
            let offset = 2 * bm + i * Self::SLOT_SIZE;
            match slot {
                Some((key, value)) => {
                    key.encode_into(&mut data[offset..offset + K::ENCODED_SIZE]);
                    value.encode_into(
                        &mut data[offset + K::ENCODED_SIZE..offset + Self::SLOT_SIZE],
                    );
                }
                None => {
                    for byte in data[offset..offset + Self::SLOT_SIZE].iter_mut() {
                        *byte = 0;
                    }
                }
            }
        }
    }

    /// Install a pair into the first free slot, reusing tombstones.
    /// Rejects an exact (key, value) duplicate; fails when the bucket is
    /// full.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        let mut free_slot = None;
        for i in 0..self.capacity {
            match &self.slots[i] {
                Some((k, v)) if bit(&self.readable, i) => {
                    if cmp.is_equal(k, key) && v == value {
                        return false;
                    }
                }
                _ => {
                    if free_slot.is_none() {
                        free_slot = Some(i);
                    }
                }
            }
        }

        let i = match free_slot {
            Some(i) => i,
            None => return false,
        };

        self.slots[i] = Some((key.clone(), value.clone()));
        set_bit(&mut self.occupied, i);
        set_bit(&mut self.readable, i);
        true
    }

    /// Collect every live value stored under `key`; true if any matched
    pub fn get_value<C: KeyComparator<K>>(&self, key: &K, cmp: &C, result: &mut Vec<V>) -> bool {
        let before = result.len();
        for i in 0..self.capacity {
            if !bit(&self.occupied, i) {
                break;
            }
            if let Some((k, v)) = &self.slots[i] {
                if bit(&self.readable, i) && cmp.is_equal(k, key) {
                    result.push(v.clone());
                }
            }
        }
        result.len() > before
    }

    /// Clear the first live slot holding exactly (key, value). The
    /// occupied bit stays set as a tombstone.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        for i in 0..self.capacity {
            if !bit(&self.occupied, i) {
                break;
            }
            if !bit(&self.readable, i) {
                continue;
            }
            if let Some((k, v)) = &self.slots[i] {
                if cmp.is_equal(k, key) && v == value {
                    clear_bit(&mut self.readable, i);
                    self.slots[i] = None;
                    return true;
                }
            }
        }
        false
    }

    /// Whether the exact (key, value) pair is already live; distinguishes
    /// "full" from "already present" after a failed insert
    pub fn is_repeat<C: KeyComparator<K>>(&self, key: &K, value: &V, cmp: &C) -> bool {
        for i in 0..self.capacity {
            if !bit(&self.occupied, i) {
                break;
            }
            if let Some((k, v)) = &self.slots[i] {
                if bit(&self.readable, i) && cmp.is_equal(k, key) && v == value {
                    return true;
                }
            }
        }
        false
    }

    pub fn num_readable(&self) -> usize {
        self.readable.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    /// Drain every live pair and reset the page for redistribution
    pub fn copy_mappings_and_reset(&mut self) -> Vec<(K, V)> {
        let mut result = Vec::with_capacity(self.num_readable());
        for i in 0..self.capacity {
            if !bit(&self.occupied, i) {
                break;
            }
            if bit(&self.readable, i) {
                if let Some(pair) = self.slots[i].take() {
                    result.push(pair);
                }
            }
        }

        self.occupied.iter_mut().for_each(|b| *b = 0);
        self.readable.iter_mut().for_each(|b| *b = 0);
        self.slots.iter_mut().for_each(|s| *s = None);
        result
    }
}

impl<K, V> Default for HashBucketPage<K, V>
where
    K: FixedCodec,
    V: FixedCodec + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::hash::codec::OrdComparator;

    #[test]
    fn test_capacity_fits_page() {
        let slot = 8; // i32 key + i32 value
        let capacity = bucket_capacity(slot);
        assert!(capacity > 0);
        assert!(2 * bitmap_bytes(capacity) + capacity * slot <= PAGE_SIZE);
        // one more slot must not fit
        assert!(2 * bitmap_bytes(capacity + 1) + (capacity + 1) * slot > PAGE_SIZE);
    }

    #[test]
    fn test_insert_and_get() {
        let cmp = OrdComparator;
        let mut bucket = HashBucketPage::<i32, i32>::new();

        assert!(bucket.insert(&1, &10, &cmp));
        assert!(bucket.insert(&1, &11, &cmp));
        assert!(bucket.insert(&2, &20, &cmp));

        let mut values = Vec::new();
        assert!(bucket.get_value(&1, &cmp, &mut values));
        values.sort();
        assert_eq!(values, vec![10, 11]);

        let mut missing = Vec::new();
        assert!(!bucket.get_value(&9, &cmp, &mut missing));
        assert!(missing.is_empty());
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let cmp = OrdComparator;
        let mut bucket = HashBucketPage::<i32, i32>::new();

        assert!(bucket.insert(&1, &10, &cmp));
        assert!(!bucket.insert(&1, &10, &cmp));
        assert!(bucket.is_repeat(&1, &10, &cmp));
        assert_eq!(bucket.num_readable(), 1);
    }

    #[test]
    fn test_remove_leaves_tombstone_and_slot_is_reused() {
        let cmp = OrdComparator;
        let mut bucket = HashBucketPage::<i32, i32>::new();

        assert!(bucket.insert(&1, &10, &cmp));
        assert!(bucket.insert(&2, &20, &cmp));
        assert!(bucket.remove(&1, &10, &cmp));
        assert!(!bucket.remove(&1, &10, &cmp));

        // slot 0 is a tombstone: occupied, not readable
        assert!(bit(&bucket.occupied, 0));
        assert!(!bit(&bucket.readable, 0));

        // the next insert reuses the tombstoned slot
        assert!(bucket.insert(&3, &30, &cmp));
        assert!(bit(&bucket.readable, 0));
        assert_eq!(bucket.num_readable(), 2);
    }

    #[test]
    fn test_fill_to_capacity() {
        let cmp = OrdComparator;
        let mut bucket = HashBucketPage::<i32, i32>::new();
        let capacity = bucket.capacity();

        for i in 0..capacity {
            assert!(bucket.insert(&(i as i32), &0, &cmp));
        }
        assert!(bucket.is_full());
        assert!(!bucket.insert(&-1, &0, &cmp));
    }

    #[test]
    fn test_copy_mappings_and_reset() {
        let cmp = OrdComparator;
        let mut bucket = HashBucketPage::<i32, i32>::new();

        bucket.insert(&1, &10, &cmp);
        bucket.insert(&2, &20, &cmp);
        bucket.remove(&1, &10, &cmp);

        let drained = bucket.copy_mappings_and_reset();
        assert_eq!(drained, vec![(2, 20)]);
        assert!(bucket.is_empty());
        assert!(!bit(&bucket.occupied, 0));
    }

    #[test]
    fn test_page_round_trip() {
        let cmp = OrdComparator;
        let mut bucket = HashBucketPage::<i32, i32>::new();
        bucket.insert(&7, &70, &cmp);
        bucket.insert(&8, &80, &cmp);
        bucket.remove(&7, &70, &cmp);

        let mut page = Page::new(0);
        bucket.write_to(&mut page);
        let decoded = HashBucketPage::<i32, i32>::from_page(&page);

        assert_eq!(decoded.num_readable(), 1);
        let mut values = Vec::new();
        assert!(decoded.get_value(&8, &cmp, &mut values));
        assert_eq!(values, vec![80]);
        // the tombstone's occupied bit survives the round trip
        assert!(bit(&decoded.occupied, 0));
        assert!(!bit(&decoded.readable, 0));
    }
}
