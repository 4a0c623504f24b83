//! Capability gate: decides whether a parsed spec is runnable.
//!
//! Every check produces a violation with a JSON-Pointer path, a kind tag, and
//! a one-line remediation. Execution must not begin while any violation
//! exists; unknown top-level keys are warnings only.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::spec::{DagPattern, GraphPattern, Pattern, Step, ToolKind, WorkflowSpec, TERMINAL};
use crate::template::eval_condition;
use crate::tools::{ssrf, SecurityPolicy};

/// Providers this engine can drive through a `ModelClient`.
pub const SUPPORTED_PROVIDERS: [&str; 3] = ["bedrock", "openai", "ollama"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    UnsupportedFeature,
    InvalidReference,
    StructuralError,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ViolationKind::UnsupportedFeature => "unsupported_feature",
            ViolationKind::InvalidReference => "invalid_reference",
            ViolationKind::StructuralError => "structural_error",
        };
        f.write_str(tag)
    }
}

/// One gate finding, actionable on its own.
#[derive(Debug, Clone)]
pub struct Violation {
    /// JSON Pointer into the spec document.
    pub pointer: String,
    pub kind: ViolationKind,
    pub message: String,
    pub remediation: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: [{}] {} ({})",
            self.pointer, self.kind, self.message, self.remediation
        )
    }
}

/// The gate's verdict: empty violations means the spec is runnable.
#[derive(Debug, Clone, Default)]
pub struct CapabilityReport {
    pub violations: Vec<Violation>,
    pub warnings: Vec<Violation>,
}

impl CapabilityReport {
    pub fn is_fatal(&self) -> bool {
        !self.violations.is_empty()
    }

    fn violation(
        &mut self,
        pointer: impl Into<String>,
        kind: ViolationKind,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) {
        self.violations.push(Violation {
            pointer: pointer.into(),
            kind,
            message: message.into(),
            remediation: remediation.into(),
        });
    }

    fn warning(
        &mut self,
        pointer: impl Into<String>,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) {
        self.warnings.push(Violation {
            pointer: pointer.into(),
            kind: ViolationKind::UnsupportedFeature,
            message: message.into(),
            remediation: remediation.into(),
        });
    }
}

impl fmt::Display for CapabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for v in &self.violations {
            writeln!(f, "error: {}", v)?;
        }
        for w in &self.warnings {
            writeln!(f, "warning: {}", w)?;
        }
        Ok(())
    }
}

/// Runs every gate check against a parsed spec.
///
/// `registry_tools` is the set of tool names the runtime registry provides;
/// tool references must resolve there or to a declared spec tool.
pub fn check(spec: &WorkflowSpec, registry_tools: &[String]) -> CapabilityReport {
    let mut report = CapabilityReport::default();

    check_runtime(spec, &mut report);
    check_agents_exist(spec, &mut report);
    check_tools(spec, registry_tools, &mut report);
    check_pattern(spec, &mut report);

    for key in spec.extra.keys() {
        report.warning(
            format!("/{}", key),
            format!("unknown top-level key {:?}", key),
            "remove the key or upgrade the engine",
        );
    }

    report
}

fn check_runtime(spec: &WorkflowSpec, report: &mut CapabilityReport) {
    let provider = spec.runtime.provider.as_str();
    if !SUPPORTED_PROVIDERS.contains(&provider) {
        report.violation(
            "/runtime/provider",
            ViolationKind::UnsupportedFeature,
            format!("provider {:?} is not supported", provider),
            format!("use one of {:?}", SUPPORTED_PROVIDERS),
        );
    }
    if provider == "bedrock" && spec.runtime.region.is_none() {
        report.violation(
            "/runtime/region",
            ViolationKind::StructuralError,
            "bedrock runtime needs a region",
            "set runtime.region, e.g. us-east-1",
        );
    }
    if provider == "ollama" && spec.runtime.host.is_none() {
        report.violation(
            "/runtime/host",
            ViolationKind::StructuralError,
            "ollama runtime needs a host",
            "set runtime.host, e.g. http://ollama.internal:11434",
        );
    }
    if spec.runtime.max_parallel == 0 {
        report.violation(
            "/runtime/max_parallel",
            ViolationKind::StructuralError,
            "max_parallel must be at least 1",
            "set runtime.max_parallel >= 1",
        );
    }
    if spec.agents.is_empty() {
        report.violation(
            "/agents",
            ViolationKind::StructuralError,
            "spec declares no agents",
            "declare at least one agent",
        );
    }
}

fn check_agents_exist(spec: &WorkflowSpec, report: &mut CapabilityReport) {
    let mut refs: Vec<(String, String)> = Vec::new();
    collect_agent_refs(&spec.pattern, &mut refs);
    for (pointer, agent) in refs {
        if !spec.agents.contains_key(&agent) {
            report.violation(
                pointer,
                ViolationKind::InvalidReference,
                format!("agent {:?} is not declared", agent),
                format!("add {:?} under agents or fix the reference", agent),
            );
        }
    }
}

fn collect_agent_refs(pattern: &Pattern, out: &mut Vec<(String, String)>) {
    let steps_refs = |prefix: &str, steps: &[Step], out: &mut Vec<(String, String)>| {
        for (i, step) in steps.iter().enumerate() {
            if let Step::Agent(s) = step {
                out.push((format!("{}/{}/agent", prefix, i), s.agent.clone()));
            }
        }
    };
    match pattern {
        Pattern::Chain(c) => steps_refs("/pattern/steps", &c.steps, out),
        Pattern::Routing(r) => {
            out.push(("/pattern/router/agent".into(), r.router.agent.clone()));
            for (name, steps) in &r.routes {
                steps_refs(&format!("/pattern/routes/{}", name), steps, out);
            }
        }
        Pattern::Parallel(p) => {
            for (i, branch) in p.branches.iter().enumerate() {
                steps_refs(
                    &format!("/pattern/branches/{}/steps", i),
                    &branch.steps,
                    out,
                );
            }
            if let Some(reduce) = &p.reduce {
                out.push(("/pattern/reduce/agent".into(), reduce.agent.clone()));
            }
        }
        Pattern::Workflow(w) => {
            for (i, task) in w.tasks.iter().enumerate() {
                out.push((format!("/pattern/tasks/{}/agent", i), task.agent.clone()));
            }
        }
        Pattern::EvaluatorOptimizer(e) => {
            out.push(("/pattern/producer/agent".into(), e.producer.agent.clone()));
            out.push(("/pattern/evaluator/agent".into(), e.evaluator.agent.clone()));
        }
        Pattern::OrchestratorWorkers(o) => {
            out.push((
                "/pattern/orchestrator/agent".into(),
                o.orchestrator.agent.clone(),
            ));
            out.push((
                "/pattern/worker_template/agent".into(),
                o.worker_template.agent.clone(),
            ));
            if let Some(reduce) = &o.reduce {
                out.push(("/pattern/reduce/agent".into(), reduce.agent.clone()));
            }
            if let Some(writeup) = &o.writeup {
                out.push(("/pattern/writeup/agent".into(), writeup.agent.clone()));
            }
        }
        Pattern::Graph(g) => {
            for (id, node) in &g.nodes {
                out.push((format!("/pattern/nodes/{}/agent", id), node.agent.clone()));
            }
        }
    }
}

fn check_tools(spec: &WorkflowSpec, registry_tools: &[String], report: &mut CapabilityReport) {
    let declared: HashSet<&str> = spec.tools.iter().map(|t| t.name.as_str()).collect();
    let registered: HashSet<&str> = registry_tools.iter().map(String::as_str).collect();

    for (agent_id, agent) in &spec.agents {
        for tool in &agent.tools {
            if !declared.contains(tool.as_str()) && !registered.contains(tool.as_str()) {
                report.violation(
                    format!("/agents/{}/tools", agent_id),
                    ViolationKind::InvalidReference,
                    format!("tool {:?} is neither registered nor declared", tool),
                    "declare the tool under tools or use a builtin name",
                );
            }
        }
    }

    let policy = SecurityPolicy::from_spec(&spec.security, false);
    for (i, tool) in spec.tools.iter().enumerate() {
        match tool.kind {
            ToolKind::Builtin => {
                if !registered.contains(tool.name.as_str()) {
                    report.violation(
                        format!("/tools/{}/name", i),
                        ViolationKind::InvalidReference,
                        format!("builtin tool {:?} is not in the registry", tool.name),
                        "use a registered builtin name",
                    );
                }
            }
            ToolKind::Http => match &tool.base_url {
                None => report.violation(
                    format!("/tools/{}/base_url", i),
                    ViolationKind::StructuralError,
                    "http tool needs a base_url",
                    "set base_url to the endpoint root",
                ),
                Some(url) => {
                    if let Err(e) = ssrf::screen_url(url, &policy) {
                        report.violation(
                            format!("/tools/{}/base_url", i),
                            ViolationKind::UnsupportedFeature,
                            format!("base_url fails the SSRF screen: {}", e),
                            "use a public http(s) endpoint or whitelist the host",
                        );
                    }
                }
            },
            ToolKind::Callable => {
                if !spec
                    .security
                    .allow_callables
                    .iter()
                    .any(|n| n == &tool.name)
                {
                    report.violation(
                        format!("/tools/{}/name", i),
                        ViolationKind::UnsupportedFeature,
                        format!("callable tool {:?} is not on the allow-list", tool.name),
                        "add the name to security.allow_callables",
                    );
                }
            }
        }
    }
}

fn check_pattern(spec: &WorkflowSpec, report: &mut CapabilityReport) {
    match &spec.pattern {
        Pattern::Chain(_) => {}
        Pattern::Routing(r) => {
            if let Some(default) = &r.default_route {
                if !r.routes.contains_key(default) {
                    report.violation(
                        "/pattern/default",
                        ViolationKind::InvalidReference,
                        format!("default route {:?} is not a declared route", default),
                        "name an existing route",
                    );
                }
            }
        }
        Pattern::Parallel(p) => {
            if p.branches.len() < 2 {
                report.violation(
                    "/pattern/branches",
                    ViolationKind::StructuralError,
                    format!("parallel needs at least 2 branches, got {}", p.branches.len()),
                    "add branches or use a chain",
                );
            }
            let mut seen = HashSet::new();
            for (i, branch) in p.branches.iter().enumerate() {
                if !seen.insert(branch.id.as_str()) {
                    report.violation(
                        format!("/pattern/branches/{}/id", i),
                        ViolationKind::StructuralError,
                        format!("duplicate branch id {:?}", branch.id),
                        "branch ids must be unique",
                    );
                }
                check_no_gates(
                    &branch.steps,
                    &format!("/pattern/branches/{}/steps", i),
                    "parallel branches",
                    report,
                );
            }
        }
        Pattern::Workflow(w) => check_dag(w, report),
        Pattern::EvaluatorOptimizer(e) => {
            if e.accept.max_iters == 0 {
                report.violation(
                    "/pattern/accept/max_iters",
                    ViolationKind::StructuralError,
                    "max_iters must be at least 1",
                    "set accept.max_iters >= 1",
                );
            }
        }
        Pattern::OrchestratorWorkers(o) => {
            if o.orchestrator.max_workers == 0 || o.orchestrator.max_rounds == 0 {
                report.violation(
                    "/pattern/orchestrator",
                    ViolationKind::StructuralError,
                    "max_workers and max_rounds must be at least 1",
                    "set both limits >= 1",
                );
            }
        }
        Pattern::Graph(g) => check_graph(g, report),
    }
}

fn check_no_gates(steps: &[Step], pointer: &str, context: &str, report: &mut CapabilityReport) {
    for (i, step) in steps.iter().enumerate() {
        if matches!(step, Step::ManualGate(_)) {
            report.violation(
                format!("{}/{}", pointer, i),
                ViolationKind::UnsupportedFeature,
                format!("manual gates are not supported inside {}", context),
                "move the gate to a top-level chain or routing branch",
            );
        }
    }
}

fn check_dag(dag: &DagPattern, report: &mut CapabilityReport) {
    let ids: HashSet<&str> = dag.tasks.iter().map(|t| t.id.as_str()).collect();
    if ids.len() != dag.tasks.len() {
        report.violation(
            "/pattern/tasks",
            ViolationKind::StructuralError,
            "duplicate task ids",
            "task ids must be unique",
        );
    }
    for (i, task) in dag.tasks.iter().enumerate() {
        for dep in &task.deps {
            if !ids.contains(dep.as_str()) {
                report.violation(
                    format!("/pattern/tasks/{}/deps", i),
                    ViolationKind::InvalidReference,
                    format!("dependency {:?} is not a task", dep),
                    "reference a declared task id",
                );
            }
        }
        if let Some(condition) = &task.condition {
            if let Err(e) = eval_condition(condition, &crate::scope::Scope::new()) {
                report.violation(
                    format!("/pattern/tasks/{}/condition", i),
                    ViolationKind::StructuralError,
                    format!("condition does not parse: {}", e),
                    "use the restricted expression language",
                );
            }
        }
    }
    if topological_order(dag).is_none() {
        report.violation(
            "/pattern/tasks",
            ViolationKind::StructuralError,
            "task dependencies form a cycle",
            "break the cycle; deps must form a DAG",
        );
    }
}

/// Kahn's algorithm over task deps; None when the graph has a cycle.
pub fn topological_order(dag: &DagPattern) -> Option<Vec<String>> {
    let ids: HashSet<String> = dag.tasks.iter().map(|t| t.id.clone()).collect();
    let mut in_degree: HashMap<String, usize> = ids.iter().cloned().map(|id| (id, 0)).collect();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for task in &dag.tasks {
        for dep in &task.deps {
            if !ids.contains(dep) {
                continue;
            }
            *in_degree.get_mut(&task.id)? += 1;
            dependents
                .entry(dep.clone())
                .or_default()
                .push(task.id.clone());
        }
    }

    let mut queue: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut order = Vec::with_capacity(ids.len());
    while let Some(id) = queue.pop() {
        order.push(id.clone());
        for dependent in dependents.remove(&id).unwrap_or_default() {
            let d = in_degree.get_mut(&dependent)?;
            *d -= 1;
            if *d == 0 {
                queue.push(dependent);
            }
        }
    }

    if order.len() == ids.len() {
        Some(order)
    } else {
        None
    }
}

fn check_graph(graph: &GraphPattern, report: &mut CapabilityReport) {
    if !graph.nodes.contains_key(&graph.start_node) {
        report.violation(
            "/pattern/start_node",
            ViolationKind::InvalidReference,
            format!("start_node {:?} is not a node", graph.start_node),
            "name a declared node",
        );
    }
    let mut seen_from: HashSet<&str> = HashSet::new();
    for (i, edge) in graph.edges.iter().enumerate() {
        if !graph.nodes.contains_key(&edge.from) {
            report.violation(
                format!("/pattern/edges/{}/from", i),
                ViolationKind::InvalidReference,
                format!("edge source {:?} is not a node", edge.from),
                "name a declared node",
            );
        }
        if !seen_from.insert(edge.from.as_str()) {
            report.violation(
                format!("/pattern/edges/{}/from", i),
                ViolationKind::StructuralError,
                format!("node {:?} has more than one edge entry", edge.from),
                "merge the entries; one edge or one choose list per node",
            );
        }
        match (&edge.to, edge.choose.is_empty()) {
            (Some(_), false) => report.violation(
                format!("/pattern/edges/{}", i),
                ViolationKind::StructuralError,
                "edge has both `to` and `choose`",
                "use one or the other",
            ),
            (None, true) => report.violation(
                format!("/pattern/edges/{}", i),
                ViolationKind::StructuralError,
                "edge has neither `to` nor `choose`",
                "add a target or conditional arms",
            ),
            (Some(to), true) => {
                if to != TERMINAL && !graph.nodes.contains_key(to) {
                    report.violation(
                        format!("/pattern/edges/{}/to", i),
                        ViolationKind::InvalidReference,
                        format!("edge target {:?} is not a node", to),
                        "name a declared node or `terminal`",
                    );
                }
            }
            (None, false) => {
                let mut has_else = false;
                for (j, arm) in edge.choose.iter().enumerate() {
                    if arm.when.trim() == "else" {
                        has_else = true;
                    } else if let Err(e) = eval_condition(&arm.when, &crate::scope::Scope::new()) {
                        report.violation(
                            format!("/pattern/edges/{}/choose/{}/when", i, j),
                            ViolationKind::StructuralError,
                            format!("condition does not parse: {}", e),
                            "use the restricted expression language",
                        );
                    }
                    if arm.to != TERMINAL && !graph.nodes.contains_key(&arm.to) {
                        report.violation(
                            format!("/pattern/edges/{}/choose/{}/to", i, j),
                            ViolationKind::InvalidReference,
                            format!("arm target {:?} is not a node", arm.to),
                            "name a declared node or `terminal`",
                        );
                    }
                }
                if !has_else {
                    report.violation(
                        format!("/pattern/edges/{}/choose", i),
                        ViolationKind::StructuralError,
                        "choose arms do not cover all cases",
                        "add a final arm with when: else",
                    );
                }
            }
        }
    }
}
