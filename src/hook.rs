//! Tracing hook call construction
//!
//! Every probe is a static call `statementPoint(probeId, channel, mirror)`
//! into the runtime support package bundled with the instrumented app.

use crate::error::Result;
use crate::ir::{CodeUnit, Method, MethodBody, MethodRef, Op, Type, Value};
use crate::probe_id::ProbeId;
use crate::registry::CodeRegistry;

/// Package of the runtime support code shipped into instrumented apps
pub const RUNTIME_PACKAGE: &str = "org.covprobe.runtime";

/// Class declaring the tracing hook
pub const DEFAULT_HOOK_CLASS: &str = "org.covprobe.runtime.Runtime";

/// Name of the tracing hook method
pub const DEFAULT_HOOK_METHOD: &str = "statementPoint";

/// Channel file on the device holding the monitor port
pub const DEFAULT_CHANNEL: &str = "/data/local/tmp/coverage_port.tmp";

/// Simple names of the runtime support classes
pub const HELPER_CLASSES: [&str; 6] = [
    "MonitorTcpServer",
    "Runtime",
    "SerializationHelper",
    "TcpServerBase$1",
    "TcpServerBase$MonitorServerRunnable",
    "TcpServerBase",
];

/// Qualified names of the runtime support classes
pub fn default_helper_units() -> Vec<String> {
    HELPER_CLASSES
        .iter()
        .map(|name| format!("{}.{}", RUNTIME_PACKAGE, name))
        .collect()
}

/// Builds probe calls for one run
///
/// The channel is resolved once per run and shared by every call.
#[derive(Debug, Clone)]
pub struct ProbeHook {
    method: MethodRef,
    channel: String,
    mirror_to_log: bool,
}

impl ProbeHook {
    /// Resolve the hook method among the units loaded in `registry`
    pub fn resolve(
        registry: &mut CodeRegistry,
        class: &str,
        method: &str,
        channel: impl Into<String>,
        mirror_to_log: bool,
    ) -> Result<Self> {
        Ok(Self {
            method: registry.resolve_hook(class, method)?,
            channel: channel.into(),
            mirror_to_log,
        })
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Call statement reporting that `probe` was reached
    pub fn call(&self, probe: &ProbeId) -> Op {
        Op::Invoke {
            callee: self.method.clone(),
            args: vec![
                Value::StringConst(probe.to_string()),
                Value::StringConst(self.channel.clone()),
                Value::IntConst(i32::from(self.mirror_to_log)),
            ],
        }
    }

    /// Whether `op` is a call produced by this hook
    pub fn is_probe_call(&self, op: &Op) -> bool {
        matches!(op, Op::Invoke { callee, .. } if *callee == self.method)
    }
}

/// Declaration-only unit exposing the hook signature
///
/// Used where the real support code is not at hand, e.g. when the backend
/// links the runtime separately.
pub fn hook_declaration(class: &str, method: &str) -> CodeUnit {
    let mut body = MethodBody::new();
    body.push(Op::Return { value: None });
    CodeUnit::new(class).with_method(
        Method::new(method, vec![Type::String, Type::String, Type::Int], Type::Void)
            .with_body(body),
    )
}
