/// An array of dynamically sized bit arrays.
///
/// Used to store cell and region membership, one entry per cell
/// with one bit per proxy id.
#[derive(Clone, Debug)]
pub(crate) struct BitMatrix {
    entry_size: usize,
    entry_count: usize,
    bits: Vec<u64>,
}

pub(crate) struct BitMatrixParams {
    pub bits_per_entry: usize,
    pub entry_count: usize,
}

impl BitMatrix {
    pub fn new(params: BitMatrixParams) -> Self {
        let entry_size = params.bits_per_entry / 64 + 1;
        let entry_count = params.entry_count;
        Self {
            entry_size,
            entry_count,
            bits: vec![0; entry_count * entry_size],
        }
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn entry(&self, idx: usize) -> Entry<'_> {
        let start = idx * self.entry_size;
        Entry(&self.bits[start..start + self.entry_size])
    }

    pub fn entry_mut(&mut self, idx: usize) -> EntryMut<'_> {
        let start = idx * self.entry_size;
        EntryMut(&mut self.bits[start..start + self.entry_size])
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = Entry<'_>> {
        self.bits.chunks(self.entry_size).map(Entry)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = 0);
    }

    /// Clear everything and change the number of entries.
    pub fn clear_and_reshape(&mut self, new_entry_count: usize) {
        self.entry_count = new_entry_count;
        self.bits.clear();
        self.bits.resize(self.entry_size * new_entry_count, 0);
    }

    /// Make every entry able to hold at least `bits_per_entry` bits,
    /// keeping the bits already set.
    pub fn reserve_bits(&mut self, bits_per_entry: usize) {
        let needed_entry_size = bits_per_entry / 64 + 1;
        if needed_entry_size <= self.entry_size {
            return;
        }
        let mut bits = vec![0; needed_entry_size * self.entry_count];
        for (old, new) in self
            .bits
            .chunks(self.entry_size)
            .zip(bits.chunks_mut(needed_entry_size))
        {
            new[..old.len()].copy_from_slice(old);
        }
        self.entry_size = needed_entry_size;
        self.bits = bits;
    }
}

pub(crate) trait IterableEntry {
    fn len(&self) -> usize;
    fn get_word(&self, idx: usize) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A view into a single entry in a bit matrix.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry<'a>(&'a [u64]);

impl<'a> Entry<'a> {
    pub fn iter(self) -> EntryIter<Self> {
        EntryIter::new(self)
    }

    pub fn has(&self, idx: usize) -> bool {
        let word_idx = idx / 64;
        let bit_idx = idx % 64;
        self.0
            .get(word_idx)
            .map_or(false, |word| word & (1_u64 << bit_idx) != 0)
    }

    pub fn count(&self) -> usize {
        self.0.iter().map(|word| word.count_ones() as usize).sum()
    }
}

impl<'a> IterableEntry for Entry<'a> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn get_word(&self, idx: usize) -> u64 {
        self.0[idx]
    }
}

#[derive(Debug)]
pub(crate) struct EntryMut<'a>(&'a mut [u64]);

impl<'a> EntryMut<'a> {
    /// Set the bit at an index.
    ///
    /// # Panics
    /// Panics if the index is outside the entry's range.
    pub fn set(&mut self, idx: usize) {
        let word_idx = idx / 64;
        let bit_idx = idx % 64;
        self.0[word_idx] |= 1_u64 << bit_idx;
    }

    /// Unset the bit at an index. Does nothing if the index is out of range.
    pub fn unset(&mut self, idx: usize) {
        let word_idx = idx / 64;
        let bit_idx = idx % 64;
        if let Some(word) = self.0.get_mut(word_idx) {
            *word &= !(1_u64 << bit_idx);
        }
    }

    pub fn clear(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryIter<Mask: IterableEntry> {
    m: Mask,
    word_idx: usize,
    // copy each word into the iterator so we can remove bits from it
    // instead of reading from the original bitset every time
    curr_word: u64,
}

impl<Mask: IterableEntry> EntryIter<Mask> {
    fn new(m: Mask) -> Self {
        let curr_word = if m.is_empty() { 0 } else { m.get_word(0) };
        Self {
            m,
            word_idx: 0,
            curr_word,
        }
    }
}

impl<Mask: IterableEntry> Iterator for EntryIter<Mask> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.curr_word != 0 {
                let first_bit_idx = self.curr_word.trailing_zeros();
                self.curr_word ^= 1 << first_bit_idx;
                return Some(self.word_idx * 64 + first_bit_idx as usize);
            }
            self.word_idx += 1;
            if self.word_idx >= self.m.len() {
                return None;
            }
            self.curr_word = self.m.get_word(self.word_idx);
        }
    }
}

//
// tests
//

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(entries: &[&[usize]]) -> BitMatrix {
        let mut m = BitMatrix::new(BitMatrixParams {
            bits_per_entry: 70,
            entry_count: entries.len(),
        });
        for (i, idxs) in entries.iter().enumerate() {
            for idx in idxs.iter() {
                m.entry_mut(i).set(*idx);
            }
        }
        m
    }

    #[test]
    fn set_iter() {
        let m = matrix(&[&[0, 5, 3, 130, 120]]);
        itertools::assert_equal(m.entry(0).iter(), [0, 3, 5, 120, 130]);
        assert_eq!(m.entry(0).count(), 5);
    }

    #[test]
    fn unset_and_clear() {
        let mut m = matrix(&[&[1, 2, 64], &[2, 100]]);
        m.entry_mut(0).unset(2);
        m.entry_mut(0).unset(9000);
        itertools::assert_equal(m.entry(0).iter(), [1, 64]);
        m.entry_mut(1).clear();
        assert_eq!(m.entry(1).iter().next(), None);
        assert!(m.entry(0).has(64) && !m.entry(0).has(9000));
    }

    #[test]
    fn reserve_keeps_bits() {
        let mut m = matrix(&[&[3, 127], &[0, 64]]);
        m.reserve_bits(1000);
        m.entry_mut(1).set(999);
        itertools::assert_equal(m.entry(0).iter(), [3, 127]);
        itertools::assert_equal(m.entry(1).iter(), [0, 64, 999]);

        m.clear_and_reshape(5);
        assert_eq!(m.entry_count(), 5);
        assert!(m.iter().all(|e| e.iter().next().is_none()));
    }
}
