//! Handle, class and priority numbering.
//!
//! TC handles are 16:16 bit `major:minor` pairs. Every direction gets its own
//! majors so the outbound and inbound trees never collide, and the numbering
//! is fixed so a later `clear` can find exactly what `apply` created.

use tcshape_shared::{Direction, Handle};

/// Number of bands in the root prio qdisc.
pub const ROOT_BANDS: u16 = 3;

/// Root band receiving unmatched and excluded traffic.
pub const PASS_THROUGH_BAND: u16 = 1;

/// Root band feeding the shaping chain.
pub const SHAPED_BAND: u16 = 3;

/// Filter priority of excluded-port rules (evaluated first).
pub const EXCLUSION_PRIORITY: u16 = 1;

/// Filter priority of the from/to classifier rules.
pub const CLASSIFIER_PRIORITY: u16 = 2;

/// Identifiers used for one direction's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleIds {
    pub direction: Direction,
    /// Root prio qdisc
    pub root: Handle,
    /// Default class for unmatched and excluded traffic
    pub pass_through: Handle,
    /// Class whose traffic is shaped
    pub shaped: Handle,
    /// tbf qdisc
    pub bandwidth: Handle,
    /// netem qdisc
    pub impairment: Handle,
    pub exclusion_priority: u16,
    pub classifier_priority: u16,
}

impl RuleIds {
    pub fn for_direction(direction: Direction) -> Self {
        let (root, bandwidth, impairment) = match direction {
            Direction::Outbound => (0x1, 0x10, 0x20),
            Direction::Inbound => (0x2, 0x30, 0x40),
        };
        let root = Handle::qdisc(root);

        Self {
            direction,
            root,
            pass_through: root.class(PASS_THROUGH_BAND),
            shaped: root.class(SHAPED_BAND),
            bandwidth: Handle::qdisc(bandwidth),
            impairment: Handle::qdisc(impairment),
            exclusion_priority: EXCLUSION_PRIORITY,
            classifier_priority: CLASSIFIER_PRIORITY,
        }
    }

    /// Parent of the impairment stage: chained under tbf when one exists.
    pub fn impairment_parent(&self, has_bandwidth_stage: bool) -> Handle {
        if has_bandwidth_stage {
            self.bandwidth
        } else {
            self.shaped
        }
    }

    /// Every qdisc handle this direction may create.
    pub fn qdisc_handles(&self) -> [Handle; 3] {
        [self.root, self.bandwidth, self.impairment]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_outbound_numbering() {
        let ids = RuleIds::for_direction(Direction::Outbound);
        assert_eq!(ids.root.to_string(), "1:");
        assert_eq!(ids.pass_through.to_string(), "1:1");
        assert_eq!(ids.shaped.to_string(), "1:3");
        assert_eq!(ids.bandwidth.to_string(), "10:");
        assert_eq!(ids.impairment.to_string(), "20:");
    }

    #[test]
    fn test_directions_do_not_collide() {
        let handles: HashSet<Handle> = Direction::ALL
            .iter()
            .flat_map(|d| RuleIds::for_direction(*d).qdisc_handles())
            .collect();
        assert_eq!(handles.len(), 6);
    }

    #[test]
    fn test_exclusions_take_precedence() {
        for direction in Direction::ALL {
            let ids = RuleIds::for_direction(direction);
            assert!(ids.exclusion_priority < ids.classifier_priority);
            assert!(ids.pass_through.minor < ids.shaped.minor);
        }
    }

    #[test]
    fn test_impairment_parent() {
        let ids = RuleIds::for_direction(Direction::Inbound);
        assert_eq!(ids.impairment_parent(true), ids.bandwidth);
        assert_eq!(ids.impairment_parent(false), ids.shaped);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(
            RuleIds::for_direction(Direction::Outbound),
            RuleIds::for_direction(Direction::Outbound)
        );
    }
}
