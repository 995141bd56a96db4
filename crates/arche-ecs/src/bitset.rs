//! Growable bitset with swap-remove, used for per-row enable bits.

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: bool) {
        if self.len % 64 == 0 {
            self.words.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, value);
    }

    /// Bit at `index`; `false` when out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.len {
            return;
        }
        let mask = 1 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    /// Move the last bit into `index` and shrink by one.
    pub fn swap_remove(&mut self, index: usize) {
        if index >= self.len {
            return;
        }
        let last = self.get(self.len - 1);
        self.set(index, last);
        self.len -= 1;
        if self.len % 64 == 0 {
            self.words.pop();
        }
    }

    /// First index `>= from` where the bit equals `value`.
    #[must_use]
    pub fn find_from(&self, from: usize, value: bool) -> Option<usize> {
        (from..self.len).find(|&i| self.get(i) == value)
    }
}

impl std::fmt::Debug for Bitset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries((0..self.len).map(|i| u8::from(self.get(i))))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_get_set() {
        let mut bits = Bitset::new();
        for i in 0..130 {
            bits.push(i % 3 == 0);
        }
        assert_eq!(bits.len(), 130);
        assert!(bits.get(0));
        assert!(!bits.get(1));
        assert!(bits.get(129));
        assert!(!bits.get(130));

        bits.set(1, true);
        assert!(bits.get(1));
    }

    #[test]
    fn test_swap_remove() {
        let mut bits = Bitset::new();
        bits.push(false);
        bits.push(true);
        bits.push(true);
        bits.swap_remove(0);
        assert_eq!(bits.len(), 2);
        assert!(bits.get(0));
        assert!(bits.get(1));

        bits.swap_remove(1);
        bits.swap_remove(0);
        assert!(bits.is_empty());
    }

    #[test]
    fn test_find_from() {
        let mut bits = Bitset::new();
        for value in [true, false, false, true] {
            bits.push(value);
        }
        assert_eq!(bits.find_from(0, false), Some(1));
        assert_eq!(bits.find_from(2, true), Some(3));
        assert_eq!(bits.find_from(4, true), None);
    }
}
