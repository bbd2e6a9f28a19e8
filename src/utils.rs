/// [Szudzik pairing function][szudzik-pairing].
///
/// ```text
/// (a, b) -> if (a<b) then (b^2 + a) else (a^2 + a + b)
/// ```
///
/// Wraps on overflow: the result only feeds bucket selection.
///
/// [szudzik-pairing]: http://szudzik.com/ElegantPairing.pdf
pub fn pairing_szudzik(a: u64, b: u64) -> u64 {
    if a < b {
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

/// [Pairing function][pairing] for two `u64` values.
///
/// [pairing]: https://en.wikipedia.org/wiki/Pairing_function
pub fn pairing2(a: u64, b: u64) -> u64 {
    pairing_szudzik(a, b)
}

/// Pairing function for three `u64` values.
pub fn pairing3(a: u64, b: u64, c: u64) -> u64 {
    pairing2(pairing2(a, b), c)
}

/// Folds the bit pattern of a float so that its high bits reach the low end.
///
/// Small integral values such as `1.0` or `2.0` have all-zero low mantissa
/// bits, which would otherwise pile them into a single hash bucket.
pub fn fold_f64(value: f64) -> u64 {
    let bits = value.to_bits();
    bits ^ (bits >> 20) ^ (bits >> 40) ^ (bits >> 52)
}

pub trait MyHash {
    /// Hash used for bucket selection in the unique table.
    fn hash(&self) -> u64;
}

impl MyHash for (u64, u64) {
    fn hash(&self) -> u64 {
        pairing2(self.0, self.1)
    }
}

impl MyHash for (u64, u64, u64) {
    fn hash(&self) -> u64 {
        pairing3(self.0, self.1, self.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_szudzik() {
        // a\b  0  1  2  3  4
        // ------------------
        // 0    0  1  4  9 16
        // 1    2  3  5 10 17
        // 2    6  7  8 11 18
        // 4   20 21 22 23 24
        assert_eq!(pairing_szudzik(0, 0), 0);
        assert_eq!(pairing_szudzik(0, 1), 1);
        assert_eq!(pairing_szudzik(1, 0), 2);
        assert_eq!(pairing_szudzik(1, 2), 5);
        assert_eq!(pairing_szudzik(2, 1), 7);
        assert_eq!(pairing_szudzik(0, 4), 16);
        assert_eq!(pairing_szudzik(4, 4), 24);
    }

    #[test]
    fn test_szudzik_wraps() {
        let h = pairing_szudzik(u64::MAX, 1);
        assert_eq!(h, pairing_szudzik(u64::MAX, 1));
    }

    #[test]
    fn test_fold_spreads_small_integers() {
        let mask = (1 << 16) - 1;
        let buckets: Vec<u64> = [1.0, 2.0, 3.0, 4.0, 0.5]
            .iter()
            .map(|&x| fold_f64(x) & mask)
            .collect();
        for i in 0..buckets.len() {
            for j in i + 1..buckets.len() {
                assert_ne!(buckets[i], buckets[j]);
            }
        }
    }
}
