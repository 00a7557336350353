//! Client-side identifier generation.
//!
//! Identifiers are `[prefix_]<time36>-<rand36>-<rand36>-<counter36>`. The
//! timestamp and the wrapping in-process counter rule out collisions within a
//! process; the two random fragments make cross-device collisions negligible.
//! Randomness comes from a seeded `SmallRng` rather than OS entropy, so
//! generation works on runtimes without a secure random source.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const COUNTER_MODULUS: u32 = 1_000_000;
const RANDOM_FRAGMENT_LEN: usize = 6;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static COUNTER: AtomicU32 = AtomicU32::new(0);
static RNG: OnceLock<Mutex<SmallRng>> = OnceLock::new();

/// Generate a new identifier, optionally namespaced by `prefix`.
///
/// ```
/// let id = chalk_core::ids::generate(Some("attempt"));
/// assert!(id.starts_with("attempt_"));
/// ```
pub fn generate(prefix: Option<&str>) -> String {
    let timestamp = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    let counter = next_counter();
    let (first, second) = random_fragments();

    let body = format!(
        "{}-{first}-{second}-{}",
        to_base36(timestamp),
        to_base36(u64::from(counter))
    );

    match prefix.map(str::trim).filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => format!("{prefix}_{body}"),
        None => body,
    }
}

fn next_counter() -> u32 {
    COUNTER
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
            Some((value + 1) % COUNTER_MODULUS)
        })
        .unwrap_or_default()
}

fn random_fragments() -> (String, String) {
    let rng = RNG.get_or_init(|| Mutex::new(SmallRng::seed_from_u64(seed())));
    // A poisoned lock only means another thread panicked mid-draw; the
    // generator state is still usable.
    let mut rng = match rng.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    (
        random_fragment(&mut rng),
        random_fragment(&mut rng),
    )
}

fn random_fragment(rng: &mut SmallRng) -> String {
    (0..RANDOM_FRAGMENT_LEN)
        .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
        .collect()
}

fn seed() -> u64 {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .map_or(0, |nanos| nanos.unsigned_abs());
    let pid = u64::from(std::process::id());
    let stack_marker = std::ptr::addr_of!(nanos) as u64;
    nanos ^ pid.rotate_left(32) ^ stack_marker
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        let digit = usize::try_from(value % 36).unwrap_or_default();
        digits.push(BASE36[digit]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn base36_encodes_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_295), "zz");
    }

    #[test]
    fn generated_ids_are_unique_within_process() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate(None)).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn prefix_is_prepended_and_blank_prefix_ignored() {
        assert!(generate(Some("link")).starts_with("link_"));
        assert!(!generate(Some("  ")).contains('_'));
    }

    #[test]
    fn id_has_four_dash_separated_base36_parts() {
        let id = generate(None);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert!(parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| BASE36.contains(&b))));
    }
}
