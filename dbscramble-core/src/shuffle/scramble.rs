//! Row-local scramblers.
//!
//! These never move data between rows: the characters or groups of a single
//! value are reordered in place.

use rand::Rng;
use rand::seq::SliceRandom;

/// Random permutation of the characters of `token`.
pub fn scramble_characters<R: Rng + ?Sized>(token: &str, rng: &mut R) -> String {
    let mut chars: Vec<char> = token.chars().collect();
    chars.shuffle(rng);
    chars.into_iter().collect()
}

/// Shuffles the characters before the first `@` and keeps the rest.
///
/// A value without `@` is scrambled whole.
pub fn scramble_before_at<R: Rng + ?Sized>(value: &str, rng: &mut R) -> String {
    match value.split_once('@') {
        Some((local, domain)) => format!("{}@{}", scramble_characters(local, rng), domain),
        None => scramble_characters(value, rng),
    }
}

/// Shuffles the four dot-separated groups of an IPv4 address.
///
/// Returns `None` when the value does not have exactly four groups; callers
/// keep the original value in that case.
pub fn scramble_ipv4_octets<R: Rng + ?Sized>(value: &str, rng: &mut R) -> Option<String> {
    let mut groups: Vec<&str> = value.split('.').collect();
    if groups.len() != 4 {
        return None;
    }
    groups.shuffle(rng);
    Some(groups.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sorted_chars(value: &str) -> Vec<char> {
        let mut chars: Vec<char> = value.chars().collect();
        chars.sort_unstable();
        chars
    }

    #[test]
    fn test_scramble_characters_keeps_multiset() {
        let mut rng = StdRng::seed_from_u64(1);
        let scrambled = scramble_characters("carlos", &mut rng);
        assert_eq!(sorted_chars(&scrambled), sorted_chars("carlos"));
        assert_eq!(scramble_characters("", &mut rng), "");
    }

    #[test]
    fn test_scramble_before_at_keeps_domain() {
        let mut rng = StdRng::seed_from_u64(2);
        let scrambled = scramble_before_at("jgarcia@empresa.es", &mut rng);
        let (local, domain) = scrambled.split_once('@').unwrap();
        assert_eq!(domain, "empresa.es");
        assert_eq!(sorted_chars(local), sorted_chars("jgarcia"));

        let hash = scramble_before_at("5f4dcc3b", &mut rng);
        assert_eq!(sorted_chars(&hash), sorted_chars("5f4dcc3b"));
    }

    #[test]
    fn test_scramble_ipv4_octets() {
        let mut rng = StdRng::seed_from_u64(3);
        let scrambled = scramble_ipv4_octets("10.20.30.40", &mut rng).unwrap();
        let mut groups: Vec<&str> = scrambled.split('.').collect();
        groups.sort_unstable();
        assert_eq!(groups, vec!["10", "20", "30", "40"]);
    }

    #[test]
    fn test_malformed_ipv4_is_rejected() {
        let mut rng = StdRng::seed_from_u64(4);
        assert_eq!(scramble_ipv4_octets("10.20.30", &mut rng), None);
        assert_eq!(scramble_ipv4_octets("::1", &mut rng), None);
        assert_eq!(scramble_ipv4_octets("1.2.3.4.5", &mut rng), None);
    }
}
