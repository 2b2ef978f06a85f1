//! Deterministic ordering of resolved endpoints.
//!
//! Priority is the publisher's stated intent and always wins. The family
//! rank only disambiguates equal priorities, in favour of the
//! privacy-preferring transport; the original position breaks remaining
//! ties so the order is a stable function of the input.

use crate::payload::Endpoint;

/// Rank of an address family for equal-priority ordering. Lower sorts
/// first.
fn family_rank(family: Option<&str>) -> u8 {
    match family {
        Some("onion") => 1,
        Some("ipv6") => 2,
        Some("ipv4") => 3,
        None => 4,
        Some(_) => 5,
    }
}

/// Return a copy of `endpoints` in connection order: ascending priority
/// (missing = 1000), then family rank (onion, ipv6, ipv4, unspecified,
/// other), then original index.
pub fn select_endpoints(endpoints: &[Endpoint]) -> Vec<Endpoint> {
    let mut indexed: Vec<(usize, &Endpoint)> = endpoints.iter().enumerate().collect();
    indexed.sort_by_key(|(index, endpoint)| {
        (
            endpoint.effective_priority(),
            family_rank(endpoint.family.as_deref()),
            *index,
        )
    });
    indexed.into_iter().map(|(_, e)| e.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(transport: &str, family: Option<&str>, priority: Option<u32>) -> Endpoint {
        let mut endpoint = Endpoint::new(transport, format!("{transport}-url"));
        endpoint.family = family.map(str::to_string);
        endpoint.priority = priority;
        endpoint
    }

    #[test]
    fn priority_wins_over_family() {
        let input = vec![
            ep("tcp", Some("onion"), Some(20)),
            ep("tcp", Some("ipv4"), Some(5)),
        ];
        let selected = select_endpoints(&input);
        assert_eq!(selected[0].family.as_deref(), Some("ipv4"));
        assert_eq!(selected[1].family.as_deref(), Some("onion"));
    }

    #[test]
    fn family_breaks_priority_ties_toward_onion() {
        let input = vec![
            ep("tcp", Some("ipv4"), Some(10)),
            ep("tcp", Some("ipv6"), Some(10)),
            ep("tcp", Some("onion"), Some(10)),
            ep("tcp", Some("ipv4"), Some(20)),
        ];
        let selected = select_endpoints(&input);
        let families: Vec<_> = selected
            .iter()
            .map(|e| (e.family.as_deref().unwrap(), e.effective_priority()))
            .collect();
        assert_eq!(
            families,
            vec![("onion", 10), ("ipv6", 10), ("ipv4", 10), ("ipv4", 20)]
        );
    }

    #[test]
    fn missing_priority_is_one_thousand() {
        let input = vec![
            ep("tcp", Some("onion"), None),
            ep("tcp", Some("ipv4"), Some(999)),
            ep("tcp", Some("ipv4"), Some(1001)),
        ];
        let selected = select_endpoints(&input);
        assert_eq!(selected[0].priority, Some(999));
        assert_eq!(selected[1].priority, None);
        assert_eq!(selected[2].priority, Some(1001));
    }

    #[test]
    fn unknown_family_sorts_after_unspecified() {
        let input = vec![
            ep("tcp", Some("carrier-pigeon"), Some(1)),
            ep("tcp", None, Some(1)),
        ];
        let selected = select_endpoints(&input);
        assert_eq!(selected[0].family, None);
        assert_eq!(selected[1].family.as_deref(), Some("carrier-pigeon"));
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let a = ep("tcp", Some("ipv4"), Some(7));
        let mut b = ep("udp", Some("ipv4"), Some(7));
        b.url = "second".to_string();

        let selected = select_endpoints(&[a.clone(), b.clone()]);
        assert_eq!(selected, vec![a, b]);
    }

    #[test]
    fn input_is_not_mutated() {
        let input = vec![
            ep("tcp", Some("ipv4"), Some(2)),
            ep("tcp", Some("onion"), Some(1)),
        ];
        let snapshot = input.clone();
        let _ = select_endpoints(&input);
        assert_eq!(input, snapshot);
    }
}
