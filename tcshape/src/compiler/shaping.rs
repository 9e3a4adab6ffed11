//! Bandwidth-limit and impairment stages hung under the shaped class.

use tcshape_shared::{QdiscDescriptor, QdiscKind, QdiscParent, ShapingSpec};

use super::CompilerConfig;
use super::ids::RuleIds;

/// Build the shaping chain for one device.
///
/// tbf always comes first so netem sees already rate-limited traffic. netem's
/// own queue is capped at the configured buffer size, and unless reordering
/// is allowed a huge `rate` is prepended: netem reorders jittered packets
/// whenever no rate is set.
pub fn build(
    spec: &ShapingSpec,
    ids: &RuleIds,
    device: &str,
    config: &CompilerConfig,
) -> Vec<QdiscDescriptor> {
    let mut chain = Vec::with_capacity(2);

    if let Some(ref bandwidth) = spec.bandwidth_limit {
        chain.push(QdiscDescriptor {
            device: device.to_string(),
            parent: QdiscParent::Handle(ids.shaped),
            handle: ids.bandwidth,
            kind: QdiscKind::Tbf,
            params: bandwidth.tokens().map(str::to_string).collect(),
        });
    }

    if let Some(ref impairment) = spec.impairment {
        let mut params = Vec::new();
        if !spec.reorder_on_jitter {
            params.push("rate".to_string());
            params.push(config.reorder_rate.clone());
        }
        params.extend(impairment.tokens().map(str::to_string));
        params.push("limit".to_string());
        params.push(config.buffer_size.to_string());

        chain.push(QdiscDescriptor {
            device: device.to_string(),
            parent: QdiscParent::Handle(ids.impairment_parent(spec.bandwidth_limit.is_some())),
            handle: ids.impairment,
            kind: QdiscKind::Netem,
            params,
        });
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcshape_shared::{Direction, RawParams};

    fn spec(bandwidth: Option<&str>, impairment: Option<&str>, reorder: bool) -> ShapingSpec {
        ShapingSpec {
            bandwidth_limit: bandwidth.and_then(RawParams::new),
            impairment: impairment.and_then(RawParams::new),
            reorder_on_jitter: reorder,
        }
    }

    fn outbound() -> RuleIds {
        RuleIds::for_direction(Direction::Outbound)
    }

    #[test]
    fn test_empty_spec_builds_nothing() {
        let chain = build(
            &spec(None, None, false),
            &outbound(),
            "eth0",
            &CompilerConfig::default(),
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn test_bandwidth_only_hangs_off_shaped_class() {
        let ids = outbound();
        let chain = build(
            &spec(Some("rate 0.5mbit burst 10kb limit 10k"), None, false),
            &ids,
            "eth0",
            &CompilerConfig::default(),
        );

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].kind, QdiscKind::Tbf);
        assert_eq!(chain[0].parent, QdiscParent::Handle(ids.shaped));
        assert_eq!(chain[0].handle, ids.bandwidth);
        assert_eq!(
            chain[0].params,
            vec!["rate", "0.5mbit", "burst", "10kb", "limit", "10k"]
        );
    }

    #[test]
    fn test_impairment_only_gets_rate_first_and_limit_last() {
        let ids = outbound();
        let config = CompilerConfig::default();
        let chain = build(
            &spec(None, Some("delay 100ms 10ms 25% loss 0.1%"), false),
            &ids,
            "eth0",
            &config,
        );

        assert_eq!(chain.len(), 1);
        let netem = &chain[0];
        assert_eq!(netem.parent, QdiscParent::Handle(ids.shaped));
        assert_eq!(
            netem.params,
            vec![
                "rate", "1000gbit", "delay", "100ms", "10ms", "25%", "loss", "0.1%", "limit",
                "10000"
            ]
        );
    }

    #[test]
    fn test_reorder_allowed_skips_rate() {
        let chain = build(
            &spec(None, Some("delay 50ms 20ms"), true),
            &outbound(),
            "eth0",
            &CompilerConfig::default(),
        );
        assert_eq!(chain[0].params, vec!["delay", "50ms", "20ms", "limit", "10000"]);
    }

    #[test]
    fn test_both_stages_are_chained() {
        let ids = outbound();
        let chain = build(
            &spec(Some("rate 1mbit burst 32kbit latency 400ms"), Some("loss 1%"), false),
            &ids,
            "eth0",
            &CompilerConfig::default(),
        );

        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].kind, QdiscKind::Tbf);
        assert_eq!(chain[1].kind, QdiscKind::Netem);
        assert_eq!(chain[1].parent, QdiscParent::Handle(chain[0].handle));
    }

    #[test]
    fn test_buffer_size_is_overridable() {
        let config = CompilerConfig {
            buffer_size: 42,
            ..Default::default()
        };
        let chain = build(&spec(None, Some("loss 5%"), true), &outbound(), "eth0", &config);
        assert_eq!(chain[0].params.last().map(String::as_str), Some("42"));
    }
}
