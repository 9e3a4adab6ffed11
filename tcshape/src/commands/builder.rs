//! TC command builder with validation.
//!
//! This module turns compiler descriptors (and the handful of ad-hoc
//! commands needed for mirroring, clearing and status) into argument vectors
//! for `tc`, `ip` and `ethtool`. Nothing here runs a process; see
//! [`crate::executor`] for that.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use tcshape_shared::{
    FilterDescriptor, Handle, MatchCriterion, QdiscDescriptor, QdiscKind, QdiscParent,
};

/// Program a command invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Program {
    Tc,
    Ip,
    Ethtool,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Program::Tc => write!(f, "tc"),
            Program::Ip => write!(f, "ip"),
            Program::Ethtool => write!(f, "ethtool"),
        }
    }
}

/// TC object a command operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcObject {
    Qdisc,
    Filter,
}

impl fmt::Display for TcObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcObject::Qdisc => write!(f, "qdisc"),
            TcObject::Filter => write!(f, "filter"),
        }
    }
}

/// TC command operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcOperation {
    Add,
    Delete,
    Show,
}

impl fmt::Display for TcOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcOperation::Add => write!(f, "add"),
            TcOperation::Delete => write!(f, "del"),
            TcOperation::Show => write!(f, "show"),
        }
    }
}

/// TC command target (where the object attaches)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcTarget {
    /// Root qdisc
    Root,
    /// Ingress qdisc (`ffff:`)
    Ingress,
    /// Parent handle
    Parent(Handle),
}

impl TcTarget {
    fn push_args(&self, args: &mut Vec<String>) {
        match self {
            TcTarget::Root => args.push("root".to_string()),
            TcTarget::Ingress => args.push("ingress".to_string()),
            TcTarget::Parent(handle) => {
                args.push("parent".to_string());
                args.push(handle.to_string());
            }
        }
    }
}

impl From<QdiscParent> for TcTarget {
    fn from(parent: QdiscParent) -> Self {
        match parent {
            QdiscParent::Root => TcTarget::Root,
            QdiscParent::Handle(handle) => TcTarget::Parent(handle),
        }
    }
}

/// A fully built command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcCommand {
    program: Program,
    args: Vec<String>,
}

impl TcCommand {
    pub fn new<I, S>(program: Program, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ip<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Program::Ip, args)
    }

    pub fn ethtool<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Program::Ethtool, args)
    }

    /// `tc qdisc add` for a compiled qdisc.
    pub fn from_qdisc(qdisc: &QdiscDescriptor) -> Result<Self> {
        TcCommandBuilder::qdisc()
            .operation(TcOperation::Add)
            .device(&qdisc.device)
            .target(qdisc.parent.into())
            .handle(qdisc.handle)
            .kind(qdisc.kind)
            .params(qdisc.params.iter().cloned())
            .build()
    }

    /// `tc filter add` for a compiled u32 filter.
    pub fn from_filter(filter: &FilterDescriptor) -> Result<Self> {
        TcCommandBuilder::filter()
            .operation(TcOperation::Add)
            .device(&filter.device)
            .target(TcTarget::Parent(filter.parent))
            .priority(filter.priority)
            .criteria(filter.criteria.iter().cloned())
            .flow(filter.flow)
            .build()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Program followed by its arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut result = vec![self.program.to_string()];
        result.extend(self.args.iter().cloned());
        result
    }

    /// Convert to an async process command
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(self.program.to_string());
        cmd.args(&self.args);
        cmd
    }
}

/// Shell-like rendering, used in logs and dry runs
impl fmt::Display for TcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Builder for `tc qdisc` and `tc filter` commands
#[derive(Debug, Clone)]
pub struct TcCommandBuilder {
    object: TcObject,
    /// Command operation (add, delete, show)
    operation: Option<TcOperation>,
    /// Target device interface
    device: Option<String>,
    /// Command target (root, ingress, parent)
    target: Option<TcTarget>,
    /// Own handle of a qdisc
    handle: Option<Handle>,
    /// Qdisc type
    kind: Option<QdiscKind>,
    /// Qdisc parameter tokens
    params: Vec<String>,
    /// Filter priority
    priority: Option<u16>,
    /// u32 match terms
    criteria: Vec<MatchCriterion>,
    /// Filter target class
    flow: Option<Handle>,
    /// Whether to ask tc for statistics (`-s`)
    stats: bool,
    /// Additional raw arguments, appended last
    raw_args: Vec<String>,
}

impl TcCommandBuilder {
    fn new(object: TcObject) -> Self {
        Self {
            object,
            operation: None,
            device: None,
            target: None,
            handle: None,
            kind: None,
            params: Vec::new(),
            priority: None,
            criteria: Vec::new(),
            flow: None,
            stats: false,
            raw_args: Vec::new(),
        }
    }

    /// Start a `tc qdisc` command
    pub fn qdisc() -> Self {
        Self::new(TcObject::Qdisc)
    }

    /// Start a `tc filter` command
    pub fn filter() -> Self {
        Self::new(TcObject::Filter)
    }

    pub fn operation(mut self, op: TcOperation) -> Self {
        self.operation = Some(op);
        self
    }

    pub fn device<S: Into<String>>(mut self, device: S) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn target(mut self, target: TcTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn kind(mut self, kind: QdiscKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn criteria<I: IntoIterator<Item = MatchCriterion>>(mut self, criteria: I) -> Self {
        self.criteria.extend(criteria);
        self
    }

    pub fn flow(mut self, flow: Handle) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Request statistics in show output
    pub fn with_stats(mut self) -> Self {
        self.stats = true;
        self
    }

    pub fn raw_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build and validate the command
    pub fn build(self) -> Result<TcCommand> {
        self.validate_configuration()?;
        let operation = self.operation.unwrap_or(TcOperation::Add);
        let device = self.device.unwrap_or_default();

        let mut args = Vec::new();
        if self.stats {
            args.push("-s".to_string());
        }
        args.push(self.object.to_string());
        args.push(operation.to_string());
        args.push("dev".to_string());
        args.push(device);

        if let Some(target) = self.target {
            target.push_args(&mut args);
        }

        match self.object {
            TcObject::Qdisc => {
                if let Some(handle) = self.handle {
                    args.push("handle".to_string());
                    args.push(handle.to_string());
                }
                // The ingress keyword already names the qdisc kind
                if operation == TcOperation::Add && self.target != Some(TcTarget::Ingress) {
                    if let Some(kind) = self.kind {
                        args.push(kind.to_string());
                    }
                    args.extend(self.params);
                }
            }
            TcObject::Filter => {
                if operation == TcOperation::Add {
                    args.push("protocol".to_string());
                    args.push("ip".to_string());
                    if let Some(priority) = self.priority {
                        args.push("prio".to_string());
                        args.push(priority.to_string());
                    }
                    args.push("u32".to_string());
                    for criterion in &self.criteria {
                        args.push("match".to_string());
                        args.extend(criterion.to_string().split(' ').map(str::to_string));
                    }
                    if let Some(flow) = self.flow {
                        args.push("flowid".to_string());
                        args.push(flow.to_string());
                    }
                }
            }
        }

        args.extend(self.raw_args);
        Ok(TcCommand::new(Program::Tc, args))
    }

    /// Validate the command configuration
    fn validate_configuration(&self) -> Result<()> {
        let operation = self
            .operation
            .ok_or_else(|| anyhow!("TC operation must be specified"))?;

        let device = self
            .device
            .as_ref()
            .ok_or_else(|| anyhow!("Device interface must be specified"))?;
        if device.is_empty() {
            return Err(anyhow!("Device interface cannot be empty"));
        }

        if operation != TcOperation::Add {
            return Ok(());
        }

        match self.object {
            TcObject::Qdisc => {
                if self.target.is_none() {
                    return Err(anyhow!("Qdisc add requires a root, ingress or parent target"));
                }
                if self.kind.is_none() && self.target != Some(TcTarget::Ingress) {
                    return Err(anyhow!("Qdisc type must be specified for add operation"));
                }
                if let Some(handle) = self.handle {
                    if !handle.is_qdisc() {
                        return Err(anyhow!("Qdisc handle {} must have a zero minor", handle));
                    }
                }
            }
            TcObject::Filter => {
                if !matches!(self.target, Some(TcTarget::Parent(_))) {
                    return Err(anyhow!("Filter add requires a parent qdisc"));
                }
                if self.criteria.is_empty() {
                    return Err(anyhow!("Filter add requires at least one match"));
                }
                if self.flow.is_none() && self.raw_args.is_empty() {
                    return Err(anyhow!("Filter add requires a flowid or an action"));
                }
            }
        }

        Ok(())
    }
}
