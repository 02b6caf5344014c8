//! Monotonic, lexicographically sortable identifiers for history events
//!
//! Layout (26 Crockford base32 symbols):
//!
//! ```text
//!  01J5Z3K8QH   7X2M4N9P0R1S6T8V
//! |----------| |----------------|
//!  timestamp        randomness
//!  10 symbols       16 symbols
//!  (ms epoch)
//! ```
//!
//! Within one millisecond the randomness portion is incremented as a
//! big-endian base32 counter instead of being re-randomized, so identifiers
//! from one generator sort in creation order.

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;

/// Crockford base32 alphabet (no I, L, O, U)
pub const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

pub const ID_LEN: usize = 26;
const TIME_LEN: usize = 10;
const RANDOM_LEN: usize = 16;

#[derive(Debug, Default)]
struct GeneratorState {
    last_ms: Option<u64>,
    last_random: [u8; RANDOM_LEN],
}

/// Identifier generator owning its monotonic state.
///
/// Construct once per process and share by reference.
#[derive(Debug, Default)]
pub struct UlidGenerator {
    state: Mutex<GeneratorState>,
}

impl UlidGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate an identifier for the current instant
    pub fn generate(&self) -> String {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.generate_at(now)
    }

    /// Generate an identifier for the given milliseconds since epoch.
    ///
    /// A timestamp at or before the previous one reuses the previous
    /// timestamp and increments the randomness, which keeps output ordered
    /// across clock steps backwards.
    pub fn generate_at(&self, ms: u64) -> String {
        let mut state = self.state.lock();

        let (ms, random) = match state.last_ms {
            Some(last) if ms <= last => (last, increment(state.last_random)),
            _ => (ms, random_symbols()),
        };

        state.last_ms = Some(ms);
        state.last_random = random;

        encode(ms, &random)
    }
}

fn random_symbols() -> [u8; RANDOM_LEN] {
    let mut rng = rand::thread_rng();
    let mut out = [0u8; RANDOM_LEN];
    for symbol in out.iter_mut() {
        *symbol = rng.gen_range(0..32);
    }
    out
}

/// Add one to a big-endian base32 counter, wrapping to all zeros on overflow
fn increment(mut random: [u8; RANDOM_LEN]) -> [u8; RANDOM_LEN] {
    for symbol in random.iter_mut().rev() {
        if *symbol < 31 {
            *symbol += 1;
            return random;
        }
        *symbol = 0;
    }
    random
}

fn encode(ms: u64, random: &[u8; RANDOM_LEN]) -> String {
    let mut out = [0u8; ID_LEN];

    let mut t = ms;
    for slot in out[..TIME_LEN].iter_mut().rev() {
        *slot = ALPHABET[(t % 32) as usize];
        t /= 32;
    }
    for (slot, symbol) in out[TIME_LEN..].iter_mut().zip(random.iter()) {
        *slot = ALPHABET[*symbol as usize];
    }

    out.iter().map(|&b| b as char).collect()
}

/// Decode the millisecond timestamp from an identifier (case-insensitive)
pub fn timestamp_ms(id: &str) -> Option<u64> {
    if id.len() != ID_LEN {
        return None;
    }
    id.bytes().take(TIME_LEN).try_fold(0u64, |acc, b| {
        let value = symbol_value(b)?;
        acc.checked_mul(32)?.checked_add(value as u64)
    })
}

/// Symbol value with Crockford case normalization (`i`/`l` → 1, `o` → 0)
fn symbol_value(b: u8) -> Option<u8> {
    let upper = match b.to_ascii_uppercase() {
        b'I' | b'L' => b'1',
        b'O' => b'0',
        other => other,
    };
    ALPHABET.iter().position(|&c| c == upper).map(|p| p as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_and_alphabet() {
        let id = UlidGenerator::new().generate();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn test_timestamp_prefix_round_trip() {
        let generator = UlidGenerator::new();
        let id = generator.generate_at(1_767_225_600_000);
        assert_eq!(timestamp_ms(&id), Some(1_767_225_600_000));
        assert_eq!(timestamp_ms(&id.to_lowercase()), Some(1_767_225_600_000));
    }

    #[test]
    fn test_same_millisecond_strictly_increasing() {
        let generator = UlidGenerator::new();
        let ids: Vec<String> = (0..500).map(|_| generator.generate_at(1_000)).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
            assert_eq!(&pair[0][..TIME_LEN], &pair[1][..TIME_LEN]);
        }
    }

    #[test]
    fn test_across_milliseconds_sorted() {
        let generator = UlidGenerator::new();
        let mut ids = Vec::new();
        for ms in [5_000u64, 5_000, 5_001, 5_002, 5_002, 9_999_999] {
            ids.push(generator.generate_at(ms));
        }
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_clock_going_backwards_stays_ordered() {
        let generator = UlidGenerator::new();
        let a = generator.generate_at(10_000);
        let b = generator.generate_at(9_000);
        assert!(a < b);
        assert_eq!(timestamp_ms(&b), Some(10_000));
    }

    #[test]
    fn test_increment_carries_and_wraps() {
        let mut r = [0u8; RANDOM_LEN];
        r[15] = 31;
        let next = increment(r);
        assert_eq!(next[15], 0);
        assert_eq!(next[14], 1);

        let max = [31u8; RANDOM_LEN];
        assert_eq!(increment(max), [0u8; RANDOM_LEN]);
    }

    #[test]
    fn test_timestamp_rejects_bad_input() {
        assert_eq!(timestamp_ms("short"), None);
        assert_eq!(timestamp_ms("UUUUUUUUUUUUUUUUUUUUUUUUUU"), None);
    }
}
