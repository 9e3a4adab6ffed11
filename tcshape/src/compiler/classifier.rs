//! from/to filters steering selected traffic into the shaped class.

use tcshape_shared::{FilterDescriptor, MatchCriterion, Selector};

use super::ids::RuleIds;

/// Which end of the packet a selector constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Destination,
}

/// Build the classifier filters for one device.
///
/// `from` and `to` produce independent filters, so a packet is shaped when it
/// matches either of them. A `none` selector produces no filter; with both
/// sides `none` everything stays on the pass-through class.
pub fn build(
    from: &Selector,
    to: &Selector,
    ids: &RuleIds,
    device: &str,
) -> Vec<FilterDescriptor> {
    [(from, Side::Source), (to, Side::Destination)]
        .into_iter()
        .filter_map(|(selector, side)| criteria(selector, side))
        .map(|criteria| FilterDescriptor {
            device: device.to_string(),
            parent: ids.root,
            priority: ids.classifier_priority,
            criteria,
            flow: ids.shaped,
        })
        .collect()
}

fn criteria(selector: &Selector, side: Side) -> Option<Vec<MatchCriterion>> {
    let Selector::Match { network, port } = selector else {
        return None;
    };

    // An address term is always present, even when unconstrained.
    let network = network
        .clone()
        .unwrap_or_else(|| MatchCriterion::ANY_NETWORK.to_string());

    let mut criteria = vec![match side {
        Side::Source => MatchCriterion::SrcNet(network),
        Side::Destination => MatchCriterion::DstNet(network),
    }];
    if let Some(port) = *port {
        criteria.push(match side {
            Side::Source => MatchCriterion::SrcPort(port),
            Side::Destination => MatchCriterion::DstPort(port),
        });
    }

    Some(criteria)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcshape_shared::Direction;

    fn ids() -> RuleIds {
        RuleIds::for_direction(Direction::Outbound)
    }

    #[test]
    fn test_destination_port_only() {
        let filters = build(&Selector::MatchNothing, &Selector::parse("*:80"), &ids(), "eth0");

        assert_eq!(filters.len(), 1);
        assert_eq!(
            filters[0].criteria,
            vec![
                MatchCriterion::DstNet("0.0.0.0/0".to_string()),
                MatchCriterion::DstPort(80)
            ]
        );
        assert_eq!(filters[0].flow, ids().shaped);
        assert_eq!(filters[0].priority, ids().classifier_priority);
    }

    #[test]
    fn test_source_network_without_port() {
        let filters = build(
            &Selector::parse("10.0.0.0/8:*"),
            &Selector::MatchNothing,
            &ids(),
            "eth0",
        );
        assert_eq!(
            filters[0].criteria,
            vec![MatchCriterion::SrcNet("10.0.0.0/8".to_string())]
        );
    }

    #[test]
    fn test_match_all_still_emits_address_term() {
        let filters = build(&Selector::MatchNothing, &Selector::match_all(), &ids(), "eth0");
        assert_eq!(
            filters[0].criteria,
            vec![MatchCriterion::DstNet("0.0.0.0/0".to_string())]
        );
    }

    #[test]
    fn test_both_sides_are_independent_filters() {
        let filters = build(
            &Selector::parse("10.0.0.1:5000"),
            &Selector::parse("10.0.0.2:6000"),
            &ids(),
            "eth0",
        );

        assert_eq!(filters.len(), 2);
        assert_eq!(
            filters[0].criteria,
            vec![
                MatchCriterion::SrcNet("10.0.0.1".to_string()),
                MatchCriterion::SrcPort(5000)
            ]
        );
        assert_eq!(
            filters[1].criteria,
            vec![
                MatchCriterion::DstNet("10.0.0.2".to_string()),
                MatchCriterion::DstPort(6000)
            ]
        );
        assert!(filters.iter().all(|f| f.flow == ids().shaped));
    }

    #[test]
    fn test_none_none_builds_nothing() {
        let filters = build(&Selector::MatchNothing, &Selector::MatchNothing, &ids(), "eth0");
        assert!(filters.is_empty());
    }
}
