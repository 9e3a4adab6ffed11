//! Policy compiler: [`ShapingPolicy`] in, one [`RuleSet`] per direction out.
//!
//! The compiler is a pure function of its input. It performs no I/O and the
//! same policy always yields identical descriptor lists, which is what lets
//! `clear` remove exactly what `apply` installed.
//!
//! Both directions are built the same way; the inbound rule set simply
//! targets the mirror device that receives a copy of the interface's ingress
//! traffic (see [`crate::mirror`]).

pub mod classifier;
pub mod exclusion;
pub mod ids;
pub mod shaping;

use tcshape_shared::{
    CompiledPolicy, DEFAULT_BUFFER_SIZE, Direction, QdiscDescriptor, QdiscKind, QdiscParent,
    REORDER_WORKAROUND_RATE, RuleSet, ShapingPolicy,
};
use tracing::debug;

pub use ids::RuleIds;

/// Tunables that are constants in production but overridable in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// netem queue limit in packets
    pub buffer_size: u32,
    /// Rate injected into netem to suppress jitter reordering
    pub reorder_rate: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            reorder_rate: REORDER_WORKAROUND_RATE.to_string(),
        }
    }
}

/// Compile a policy for both directions.
pub fn compile(policy: &ShapingPolicy, config: &CompilerConfig) -> CompiledPolicy {
    CompiledPolicy {
        outbound: build_direction(Direction::Outbound, policy, config),
        inbound: build_direction(Direction::Inbound, policy, config),
    }
}

/// Build the rule set of a single direction.
///
/// Order: root prio, shaping chain, exclusion filters, classifier filters.
pub fn build_direction(
    direction: Direction,
    policy: &ShapingPolicy,
    config: &CompilerConfig,
) -> RuleSet {
    let ids = RuleIds::for_direction(direction);
    let device = policy.device_for(direction);
    let mut rules = RuleSet::new(direction, device);

    rules.qdiscs.push(root_qdisc(&ids, device));
    rules
        .qdiscs
        .extend(shaping::build(&policy.shaping, &ids, device, config));

    rules
        .filters
        .extend(exclusion::build(&policy.exclude_ports, &ids, device));
    rules
        .filters
        .extend(classifier::build(&policy.from, &policy.to, &ids, device));

    debug!(
        "Compiled {} rules for {}: {} qdiscs, {} filters",
        direction,
        device,
        rules.qdiscs.len(),
        rules.filters.len()
    );

    rules
}

/// Root prio qdisc whose priomap sends every packet to the pass-through band.
fn root_qdisc(ids: &RuleIds, device: &str) -> QdiscDescriptor {
    let band_index = (ids.pass_through.minor - 1).to_string();
    let mut params = vec![
        "bands".to_string(),
        ids::ROOT_BANDS.to_string(),
        "priomap".to_string(),
    ];
    params.extend(std::iter::repeat_n(band_index, 16));

    QdiscDescriptor {
        device: device.to_string(),
        parent: QdiscParent::Root,
        handle: ids.root,
        kind: QdiscKind::Prio,
        params,
    }
}
