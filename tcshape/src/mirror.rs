//! Inbound mirroring onto an ifb device.
//!
//! tc can only shape egress traffic, so ingress on the interface is
//! redirected to the egress side of an ifb device where the inbound rule set
//! is installed.

use anyhow::Result;

use crate::commands::{TcCommand, TcCommandBuilder, TcOperation, TcTarget};
use tcshape_shared::{Handle, MatchCriterion};

/// Handle of the ingress qdisc.
pub const INGRESS_HANDLE: Handle = Handle::qdisc(0xffff);

/// `ip link add <ifb> type ifb`; fails with "File exists" when already present.
pub fn create_device(mirror_device: &str) -> TcCommand {
    TcCommand::ip(["link", "add", mirror_device, "type", "ifb"])
}

/// Bring the ifb up and redirect all ingress traffic of `interface` to it.
pub fn setup_commands(interface: &str, mirror_device: &str) -> Result<Vec<TcCommand>> {
    Ok(vec![
        TcCommand::ip(["link", "set", "dev", mirror_device, "up"]),
        TcCommandBuilder::qdisc()
            .operation(TcOperation::Add)
            .device(interface)
            .target(TcTarget::Ingress)
            .build()?,
        TcCommandBuilder::filter()
            .operation(TcOperation::Add)
            .device(interface)
            .target(TcTarget::Parent(INGRESS_HANDLE))
            .criteria([MatchCriterion::All])
            .raw_args(["action", "mirred", "egress", "redirect", "dev", mirror_device])
            .build()?,
    ])
}

/// Remove the redirect and the ifb device.
pub fn teardown_commands(interface: &str, mirror_device: &str) -> Result<Vec<TcCommand>> {
    Ok(vec![
        TcCommandBuilder::qdisc()
            .operation(TcOperation::Delete)
            .device(interface)
            .target(TcTarget::Ingress)
            .build()?,
        TcCommand::ip(["link", "del", mirror_device]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_redirects_ingress() {
        let commands: Vec<String> = setup_commands("eth0", "ifb0")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(
            commands,
            vec![
                "ip link set dev ifb0 up",
                "tc qdisc add dev eth0 ingress",
                "tc filter add dev eth0 parent ffff: protocol ip u32 match u32 0 0 \
                 action mirred egress redirect dev ifb0",
            ]
        );
    }

    #[test]
    fn test_teardown() {
        let commands: Vec<String> = teardown_commands("eth0", "ifb0")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(commands, vec!["tc qdisc del dev eth0 ingress", "ip link del ifb0"]);
    }

    #[test]
    fn test_create_device() {
        assert_eq!(create_device("ifb1").to_string(), "ip link add ifb1 type ifb");
    }
}
