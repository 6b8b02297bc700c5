// Injection engine invariants over whole registries

mod utils;

use covprobe::hook::{ProbeHook, DEFAULT_CHANNEL, DEFAULT_HOOK_CLASS, DEFAULT_HOOK_METHOD};
use covprobe::inject::{Injection, InjectionEngine};
use covprobe::ir::{CodeUnit, Op};
use covprobe::location::LocationFormat;
use covprobe::policy::{scope_prefix, Decision, ExclusionPolicy, DEFAULT_EXCLUDED_PREFIXES};
use covprobe::probe_id::{CounterAllocator, IdAllocator, ProbeId};
use covprobe::registry::CodeRegistry;
use covprobe::validate::validate_body;
use utils::{branchy_unit, registry_with, unit};

fn policy() -> ExclusionPolicy {
    ExclusionPolicy::new(
        covprobe::hook::default_helper_units(),
        DEFAULT_EXCLUDED_PREFIXES,
    )
}

fn hook(registry: &mut CodeRegistry) -> ProbeHook {
    ProbeHook::resolve(
        registry,
        DEFAULT_HOOK_CLASS,
        DEFAULT_HOOK_METHOD,
        DEFAULT_CHANNEL,
        true,
    )
    .unwrap()
}

fn inject(
    registry: &mut CodeRegistry,
    policy: &ExclusionPolicy,
    format: LocationFormat,
    allocator: &mut dyn IdAllocator,
) -> (Injection, ProbeHook) {
    let hook = hook(registry);
    let injection = InjectionEngine::new(policy, &hook, &format)
        .inject(registry, allocator)
        .unwrap();
    (injection, hook)
}

fn mixed_units() -> Vec<CodeUnit> {
    vec![
        unit("com.example.app.Main", 4),
        branchy_unit("com.example.app.Calc"),
        unit("com.google.ads.Banner", 3),
        unit("org.covprobe.runtime.MonitorTcpServer", 3),
        unit("org.lib.Json", 2),
    ]
}

fn probe_calls(registry: &CodeRegistry, hook: &ProbeHook) -> usize {
    registry
        .units()
        .iter()
        .flat_map(|u| &u.methods)
        .filter_map(|m| m.body.as_ref())
        .flat_map(|b| b.statements())
        .filter(|s| hook.is_probe_call(&s.op))
        .count()
}

#[test]
fn test_manifest_entries_match_inserted_calls() {
    let mut registry = registry_with(mixed_units());
    let (injection, hook) = inject(
        &mut registry,
        &policy(),
        LocationFormat::Statement,
        &mut CounterAllocator::new(),
    );

    let records = injection.manifest.records();
    assert_eq!(records.len(), probe_calls(&registry, &hook));
    assert_eq!(records.len(), injection.report.probes);

    // Each call carries exactly one manifest id
    let mut call_ids: Vec<String> = registry
        .units()
        .iter()
        .flat_map(|u| &u.methods)
        .filter_map(|m| m.body.as_ref())
        .flat_map(|b| b.statements())
        .filter_map(|s| match &s.op {
            Op::Invoke { args, .. } if hook.is_probe_call(&s.op) => Some(args[0].to_string()),
            _ => None,
        })
        .collect();
    let mut record_ids: Vec<String> = records.iter().map(|r| format!("{:?}", r.id.to_string())).collect();
    call_ids.sort();
    record_ids.sort();
    assert_eq!(call_ids, record_ids);
}

#[test]
fn test_helper_and_excluded_units_untouched() {
    let mut registry = registry_with(mixed_units());
    let (injection, _) = inject(
        &mut registry,
        &policy(),
        LocationFormat::Statement,
        &mut CounterAllocator::new(),
    );

    for record in injection.manifest.records() {
        assert!(!record.owning_method.contains("org.covprobe.runtime."));
        assert!(!record.owning_method.starts_with("<com.google."));
    }
    assert_eq!(
        registry.unit("com.google.ads.Banner").unwrap().statement_count(),
        4
    );
    assert_eq!(
        registry
            .unit("org.covprobe.runtime.MonitorTcpServer")
            .unwrap()
            .statement_count(),
        4
    );
    assert!(injection.report.skipped_for(Decision::HelperUnit) > 0);
    assert_eq!(injection.report.skipped_for(Decision::ExcludedNamespace), 4);
}

#[test]
fn test_identity_statements_keep_leading_positions() {
    let originals = mixed_units();
    let mut registry = registry_with(originals.clone());
    inject(
        &mut registry,
        &policy(),
        LocationFormat::Statement,
        &mut CounterAllocator::new(),
    );

    for original in &originals {
        let rewritten = registry.unit(&original.name).unwrap();
        for (before, after) in original.methods.iter().zip(&rewritten.methods) {
            let (Some(before), Some(after)) = (&before.body, &after.body) else {
                continue;
            };
            let leading = before
                .statements()
                .iter()
                .take_while(|s| s.is_identity())
                .count();
            assert_eq!(
                &after.statements()[..leading],
                &before.statements()[..leading]
            );
            assert!(validate_body(after).is_ok());
        }
    }
}

#[test]
fn test_exception_edges_survive() {
    let mut registry = registry_with(vec![branchy_unit("com.example.app.Calc")]);
    inject(
        &mut registry,
        &policy(),
        LocationFormat::Statement,
        &mut CounterAllocator::new(),
    );

    let body = registry.unit("com.example.app.Calc").unwrap().methods[0]
        .body
        .as_ref()
        .unwrap();
    let trap = &body.traps()[0];
    // The protected range now starts at the probe guarding its first statement
    let begin = body.get(trap.begin).unwrap();
    assert!(matches!(begin.op, Op::Invoke { .. }));
    assert!(body.get(trap.handler).unwrap().is_identity());
}

#[test]
fn test_branches_target_the_probe() {
    let mut registry = registry_with(vec![branchy_unit("com.example.app.Calc")]);
    inject(
        &mut registry,
        &policy(),
        LocationFormat::Statement,
        &mut CounterAllocator::new(),
    );

    let body = registry.unit("com.example.app.Calc").unwrap().methods[1]
        .body
        .as_ref()
        .unwrap();
    for stmt in body.statements() {
        if let Some(target) = stmt.op.branch_target() {
            assert!(matches!(body.get(target).unwrap().op, Op::Invoke { .. }));
        }
    }
}

#[test]
fn test_scoped_run_only_touches_scope() {
    let mut registry = registry_with(mixed_units());
    let policy = policy().scoped_to_application("com.example.app.ui");
    assert_eq!(policy.scope(), Some(scope_prefix("com.example.app.ui").as_str()));

    let (injection, _) = inject(
        &mut registry,
        &policy,
        LocationFormat::Statement,
        &mut CounterAllocator::new(),
    );
    assert!(!injection.manifest.is_empty());
    for record in injection.manifest.records() {
        assert!(record.owning_method.trim_start_matches('<').starts_with("com.example"));
    }
    assert_eq!(registry.unit("org.lib.Json").unwrap().statement_count(), 3);
}

#[test]
fn test_counter_runs_are_deterministic() {
    let run = || {
        let mut registry = registry_with(mixed_units());
        let (injection, _) = inject(
            &mut registry,
            &policy(),
            LocationFormat::Qualified,
            &mut CounterAllocator::new(),
        );
        injection
            .manifest
            .records()
            .iter()
            .map(|r| (r.id, r.location.clone(), r.owning_method.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_shared_allocator_continues_numbering() {
    let mut allocator = CounterAllocator::new();
    let mut first = registry_with(vec![unit("com.example.app.Main", 2)]);
    inject(&mut first, &policy(), LocationFormat::Statement, &mut allocator);

    let mut second = registry_with(vec![unit("com.example.app.Main", 2)]);
    let (injection, _) = inject(&mut second, &policy(), LocationFormat::Statement, &mut allocator);
    assert_eq!(injection.manifest.records()[0].id, ProbeId::Counter(2));

    allocator.reset();
    let mut third = registry_with(vec![unit("com.example.app.Main", 2)]);
    let (injection, _) = inject(&mut third, &policy(), LocationFormat::Statement, &mut allocator);
    assert_eq!(injection.manifest.records()[0].id, ProbeId::Counter(0));
}

#[test]
fn test_mirror_flag_reaches_every_call() {
    let mut registry = registry_with(vec![unit("com.example.app.Main", 3)]);
    let (_, hook) = inject(
        &mut registry,
        &policy(),
        LocationFormat::Statement,
        &mut CounterAllocator::new(),
    );
    let body = registry.unit("com.example.app.Main").unwrap().methods[0]
        .body
        .as_ref()
        .unwrap();
    for stmt in body.statements() {
        if let Op::Invoke { args, .. } = &stmt.op {
            assert!(hook.is_probe_call(&stmt.op));
            assert_eq!(args[1].to_string(), format!("{:?}", DEFAULT_CHANNEL));
            assert_eq!(args[2].to_string(), "1");
        }
    }
}
