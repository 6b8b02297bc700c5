//! Statement probe injection engine
//!
//! Walks every loaded unit in load order, every method body in declaration
//! order, and inserts a tracing hook call before each statement the policy
//! admits. Each body is rewritten from a frozen copy of its statements and
//! validated before the engine moves on.

use std::collections::BTreeMap;
use tracing::{debug, info, trace};

use crate::error::{InstrumentError, Result};
use crate::hook::ProbeHook;
use crate::ir::{CodeUnit, MethodBody, Statement};
use crate::location::LocationFormatter;
use crate::manifest::{ManifestBuilder, ProbeRecord};
use crate::policy::{Decision, ExclusionPolicy};
use crate::probe_id::IdAllocator;
use crate::registry::CodeRegistry;
use crate::validate::{validate_body, ValidationError};

/// Counters describing one injection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionReport {
    pub probes: usize,
    pub bodies_rewritten: usize,
    pub units_skipped: usize,
    /// Statements left alone, by the rule that excluded them
    pub skipped: BTreeMap<Decision, usize>,
}

impl InjectionReport {
    fn skip(&mut self, decision: Decision, count: usize) {
        if count > 0 {
            *self.skipped.entry(decision).or_insert(0) += count;
        }
    }

    pub fn skipped_for(&self, decision: Decision) -> usize {
        self.skipped.get(&decision).copied().unwrap_or(0)
    }
}

/// Result of an injection pass: the collected probe records plus counters
#[derive(Debug)]
pub struct Injection {
    pub manifest: ManifestBuilder,
    pub report: InjectionReport,
}

/// Rewrites method bodies according to an [`ExclusionPolicy`]
pub struct InjectionEngine<'a> {
    policy: &'a ExclusionPolicy,
    hook: &'a ProbeHook,
    formatter: &'a dyn LocationFormatter,
}

impl<'a> InjectionEngine<'a> {
    pub fn new(
        policy: &'a ExclusionPolicy,
        hook: &'a ProbeHook,
        formatter: &'a dyn LocationFormatter,
    ) -> Self {
        Self {
            policy,
            hook,
            formatter,
        }
    }

    /// Instrument every unit in `registry`, drawing ids from `allocator`
    #[tracing::instrument(skip_all, fields(units = registry.len()))]
    pub fn inject(
        &self,
        registry: &mut CodeRegistry,
        allocator: &mut dyn IdAllocator,
    ) -> Result<Injection> {
        let mut manifest = ManifestBuilder::new();
        let mut report = InjectionReport::default();

        for unit in registry.units_mut() {
            if let Some(decision) = self.policy.unit_decision(&unit.name) {
                trace!(unit = %unit.name, ?decision, "unit skipped");
                report.units_skipped += 1;
                report.skip(decision, unit.statement_count());
                continue;
            }
            self.inject_unit(unit, allocator, &mut manifest, &mut report)?;
        }

        info!(
            probes = report.probes,
            bodies = report.bodies_rewritten,
            units_skipped = report.units_skipped,
            "injection finished"
        );
        Ok(Injection { manifest, report })
    }

    fn inject_unit(
        &self,
        unit: &mut CodeUnit,
        allocator: &mut dyn IdAllocator,
        manifest: &mut ManifestBuilder,
        report: &mut InjectionReport,
    ) -> Result<()> {
        let CodeUnit { name, methods } = unit;
        let name = name.as_str();

        for method in methods.iter_mut() {
            let signature = method.signature(name);
            let Some(body) = method.body.as_mut() else {
                continue;
            };
            if !self.policy.in_scope(&signature) {
                report.skip(Decision::OutOfScope, body.len());
                continue;
            }

            let inserted =
                self.inject_body(name, &signature, body, allocator, manifest, report)?;

            validate_body(body).map_err(|source| InstrumentError::BodyValidation {
                method: signature.clone(),
                source,
            })?;

            report.bodies_rewritten += 1;
            debug!(method = %signature, probes = inserted, "body instrumented");
        }
        Ok(())
    }

    fn inject_body(
        &self,
        unit_name: &str,
        signature: &str,
        body: &mut MethodBody,
        allocator: &mut dyn IdAllocator,
        manifest: &mut ManifestBuilder,
        report: &mut InjectionReport,
    ) -> Result<usize> {
        // Frozen copy; insertions below never disturb this iteration
        let snapshot: Vec<Statement> = body.statements().to_vec();
        let mut inserted = 0;

        for statement in &snapshot {
            let decision = self.policy.decide(statement, signature, unit_name);
            if !decision.is_include() {
                report.skip(decision, 1);
                continue;
            }

            let id = allocator.next();
            if body.insert_before(self.hook.call(&id), statement.label).is_none() {
                let source = match body.get(statement.label) {
                    Some(_) => ValidationError::LabelsExhausted,
                    None => ValidationError::MissingStatement {
                        label: statement.label,
                    },
                };
                return Err(InstrumentError::BodyValidation {
                    method: signature.to_string(),
                    source,
                });
            }

            let location = self.formatter.describe(statement, signature);
            trace!(probe = %id, %location, "probe inserted");
            manifest.record(ProbeRecord {
                id,
                location,
                owning_method: signature.to_string(),
            });
            inserted += 1;
        }

        report.probes += inserted;
        Ok(inserted)
    }
}
