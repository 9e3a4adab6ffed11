//! Shared types for tcshape.
//!
//! This crate holds the data model that flows through the policy compiler:
//! the declarative [`ShapingPolicy`] a user asks for, and the typed
//! [`QdiscDescriptor`]/[`FilterDescriptor`] lists the compiler produces for
//! each [`Direction`]. Nothing here touches the platform; the backend crate
//! turns descriptors into `tc` invocations.
//!
//! # Hierarchy built per direction
//!
//! ```text
//! root prio (1:)          priomap sends everything to band 1
//!  ├── 1:1  pass-through  unmatched + excluded traffic
//!  ├── 1:2  (unused)
//!  └── 1:3  shaped        traffic matched by from/to filters
//!       └── tbf (10:)     bandwidth limit, optional
//!            └── netem (20:)  delay/jitter/loss, optional
//! ```
//!
//! Inbound traffic is mirrored onto an ifb device and gets the same tree
//! under its own handles (`2:`, `30:`, `40:`).

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod errors;
pub mod profile;
pub mod selector;

pub use selector::Selector;

/// Maximum number of packets queued inside the impairment stage.
///
/// Appended as `limit` to every netem qdisc; it overrides any limit set on the
/// bandwidth stage since netem's own queue is what holds delayed packets.
pub const DEFAULT_BUFFER_SIZE: u32 = 10_000;

/// Rate injected into netem to stop it from reordering jittered packets.
pub const REORDER_WORKAROUND_RATE: &str = "1000gbit";

/// Ports that bypass shaping unless the user overrides the exclusion list.
pub const DEFAULT_EXCLUDED_PORTS: &[u16] = &[22];

/// Interface shaped when none is given.
pub const DEFAULT_INTERFACE: &str = "eth0";

/// Virtual device receiving the mirror of the interface's ingress traffic.
pub const DEFAULT_MIRROR_DEVICE: &str = "ifb0";

/// Traffic direction a rule set applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    /// Both directions, in the order they are built and applied.
    pub const ALL: [Direction; 2] = [Direction::Outbound, Direction::Inbound];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

/// A tc handle or class id (`major:minor`).
///
/// Rendered the way tc parses it: hexadecimal, with the minor omitted when
/// zero (`10:` rather than `10:0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    pub major: u16,
    pub minor: u16,
}

impl Handle {
    /// Handle of a qdisc (minor must be zero).
    pub const fn qdisc(major: u16) -> Self {
        Self { major, minor: 0 }
    }

    /// Class `minor` inside this qdisc.
    pub const fn class(self, minor: u16) -> Self {
        Self {
            major: self.major,
            minor,
        }
    }

    pub const fn is_qdisc(&self) -> bool {
        self.minor == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{:x}:", self.major)
        } else {
            write!(f, "{:x}:{:x}", self.major, self.minor)
        }
    }
}

/// Where a qdisc attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QdiscParent {
    Root,
    Handle(Handle),
}

impl fmt::Display for QdiscParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QdiscParent::Root => write!(f, "root"),
            QdiscParent::Handle(handle) => write!(f, "parent {}", handle),
        }
    }
}

/// Queueing disciplines the compiler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QdiscKind {
    /// Root classifier with fixed bands
    Prio,
    /// Token bucket filter for the bandwidth stage
    Tbf,
    /// Network emulator for the impairment stage
    Netem,
}

impl fmt::Display for QdiscKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QdiscKind::Prio => write!(f, "prio"),
            QdiscKind::Tbf => write!(f, "tbf"),
            QdiscKind::Netem => write!(f, "netem"),
        }
    }
}

/// A single u32 match term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCriterion {
    /// Source prefix (`0.0.0.0/0` when unconstrained)
    SrcNet(String),
    /// Destination prefix (`0.0.0.0/0` when unconstrained)
    DstNet(String),
    SrcPort(u16),
    DstPort(u16),
    /// Matches every packet
    All,
}

impl MatchCriterion {
    /// Prefix matching any IPv4 address.
    pub const ANY_NETWORK: &'static str = "0.0.0.0/0";
}

impl fmt::Display for MatchCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchCriterion::SrcNet(net) => write!(f, "ip src {}", net),
            MatchCriterion::DstNet(net) => write!(f, "ip dst {}", net),
            MatchCriterion::SrcPort(port) => write!(f, "ip sport {} 0xffff", port),
            MatchCriterion::DstPort(port) => write!(f, "ip dport {} 0xffff", port),
            MatchCriterion::All => write!(f, "u32 0 0"),
        }
    }
}

/// A qdisc the platform must create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QdiscDescriptor {
    pub device: String,
    pub parent: QdiscParent,
    pub handle: Handle,
    pub kind: QdiscKind,
    /// Parameter tokens passed verbatim after the kind
    pub params: Vec<String>,
}

/// A u32 classifier the platform must create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDescriptor {
    pub device: String,
    pub parent: Handle,
    /// Lower values are evaluated first
    pub priority: u16,
    pub criteria: Vec<MatchCriterion>,
    /// Class receiving matching packets
    pub flow: Handle,
}

/// Everything installed on one device for one direction.
///
/// Qdiscs are ordered parent-first and all precede the filters; exclusion
/// filters come before the general classifier filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub direction: Direction,
    pub device: String,
    pub qdiscs: Vec<QdiscDescriptor>,
    pub filters: Vec<FilterDescriptor>,
}

impl RuleSet {
    pub fn new(direction: Direction, device: impl Into<String>) -> Self {
        Self {
            direction,
            device: device.into(),
            qdiscs: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Filters routing traffic into `flow`, in emission order.
    pub fn filters_to(&self, flow: Handle) -> impl Iterator<Item = &FilterDescriptor> {
        self.filters.iter().filter(move |f| f.flow == flow)
    }

    /// The qdisc of the given kind, if present.
    pub fn qdisc(&self, kind: QdiscKind) -> Option<&QdiscDescriptor> {
        self.qdiscs.iter().find(|q| q.kind == kind)
    }
}

/// Output of the compiler: one rule set per direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPolicy {
    pub outbound: RuleSet,
    pub inbound: RuleSet,
}

impl CompiledPolicy {
    /// Rule sets in application order (outbound first).
    pub fn rule_sets(&self) -> [&RuleSet; 2] {
        [&self.outbound, &self.inbound]
    }

    pub fn get(&self, direction: Direction) -> &RuleSet {
        match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        }
    }
}

/// Opaque parameter string for a shaping primitive (e.g. `rate 1mbit burst 10kb`).
///
/// Never interpreted by the compiler beyond splitting on whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawParams(String);

impl RawParams {
    /// Wraps `raw`, returning `None` for blank input.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw.trim().to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split_whitespace()
    }
}

impl fmt::Display for RawParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which shaping stages to install on the shaped branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapingSpec {
    /// tbf parameters (`rate 0.5mbit burst 10kb limit 10k`)
    pub bandwidth_limit: Option<RawParams>,
    /// netem parameters (`delay 100ms 10ms 25% loss 0.1%`)
    pub impairment: Option<RawParams>,
    /// Allow netem to reorder jittered packets instead of injecting a rate
    pub reorder_on_jitter: bool,
}

impl ShapingSpec {
    /// True when no shaping stage is configured.
    pub fn is_empty(&self) -> bool {
        self.bandwidth_limit.is_none() && self.impairment.is_none()
    }

    /// True when the reorder-suppressing rate will be injected into netem.
    pub fn injects_reorder_workaround(&self) -> bool {
        self.impairment.is_some() && !self.reorder_on_jitter
    }
}

/// The full declarative request: what to shape, where, and what to leave alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapingPolicy {
    pub interface: String,
    pub mirror_device: String,
    pub shaping: ShapingSpec,
    /// Source address/port selector
    pub from: Selector,
    /// Destination address/port selector
    pub to: Selector,
    /// Ports that always bypass shaping, as entered
    pub exclude_ports: Vec<u16>,
}

impl Default for ShapingPolicy {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            mirror_device: DEFAULT_MIRROR_DEVICE.to_string(),
            shaping: ShapingSpec::default(),
            from: Selector::MatchNothing,
            to: Selector::match_all(),
            exclude_ports: DEFAULT_EXCLUDED_PORTS.to_vec(),
        }
    }
}

impl ShapingPolicy {
    /// Device a direction's rule set is installed on.
    pub fn device_for(&self, direction: Direction) -> &str {
        match direction {
            Direction::Outbound => &self.interface,
            Direction::Inbound => &self.mirror_device,
        }
    }
}
