//! Excluded ports: always routed to the pass-through class.

use tcshape_shared::{FilterDescriptor, MatchCriterion};

use super::ids::RuleIds;

/// Two filters per port (as source port and as destination port), at the
/// exclusion priority so they win over the from/to classifier.
pub fn build(ports: &[u16], ids: &RuleIds, device: &str) -> Vec<FilterDescriptor> {
    ports
        .iter()
        .flat_map(|&port| {
            [MatchCriterion::SrcPort(port), MatchCriterion::DstPort(port)]
                .into_iter()
                .map(move |port_match| FilterDescriptor {
                    device: device.to_string(),
                    parent: ids.root,
                    priority: ids.exclusion_priority,
                    criteria: vec![
                        MatchCriterion::SrcNet(MatchCriterion::ANY_NETWORK.to_string()),
                        port_match,
                    ],
                    flow: ids.pass_through,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcshape_shared::Direction;

    #[test]
    fn test_two_filters_per_port() {
        let ids = RuleIds::for_direction(Direction::Inbound);
        let filters = build(&[22, 53], &ids, "ifb0");

        assert_eq!(filters.len(), 4);
        assert_eq!(filters[0].criteria[1], MatchCriterion::SrcPort(22));
        assert_eq!(filters[1].criteria[1], MatchCriterion::DstPort(22));
        assert_eq!(filters[2].criteria[1], MatchCriterion::SrcPort(53));
        assert_eq!(filters[3].criteria[1], MatchCriterion::DstPort(53));
        for filter in &filters {
            assert_eq!(filter.flow, ids.pass_through);
            assert_eq!(filter.priority, ids.exclusion_priority);
            assert_eq!(filter.device, "ifb0");
            assert_eq!(
                filter.criteria[0],
                MatchCriterion::SrcNet("0.0.0.0/0".to_string())
            );
        }
    }

    #[test]
    fn test_duplicates_are_kept() {
        let ids = RuleIds::for_direction(Direction::Outbound);
        assert_eq!(build(&[22, 22], &ids, "eth0").len(), 4);
    }

    #[test]
    fn test_no_ports_no_filters() {
        let ids = RuleIds::for_direction(Direction::Outbound);
        assert!(build(&[], &ids, "eth0").is_empty());
    }
}
