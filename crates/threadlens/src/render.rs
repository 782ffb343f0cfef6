//! Human-readable text for tool responses.

use std::collections::BTreeMap;

use threadlens_types::{
    DiagnosticReport, ProcessSummary, StackSnapshot, ThreadId, ThreadInfo, ThreadRecord,
    ThreadState,
};

/// Waiting and blocked threads listed in detail before the rest are elided.
const MAX_WAITING_DETAILS: usize = 10;

pub fn render_thread_info(info: &ThreadInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== Thread Information (generation {}) ===\n",
        info.generation
    ));
    render_process(&mut out, &info.process, &info.threads);
    render_advisories(&mut out, &info.advisories);

    out.push_str(&format!("\nThreads ({}):\n", info.threads.len()));
    for thread in &info.threads {
        out.push_str(&format!("  {}\n", thread_line(thread)));
    }
    render_waiting(&mut out, info.threads.iter(), &BTreeMap::new());
    out
}

pub fn render_stack_info(report: &DiagnosticReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== Thread Stack Information (generation {}) ===\n",
        report.generation
    ));
    if report.truncated {
        out.push_str("*** TRUNCATED: pass deadline expired before the pass finished ***\n");
    }
    let records: Vec<&ThreadRecord> = report.threads.iter().map(|t| &t.record).collect();
    render_process(&mut out, &report.process, records.iter().copied());
    render_advisories(&mut out, &report.advisories);

    if report.findings.is_empty() {
        out.push_str("\nDeadlocks: none detected\n");
    } else {
        out.push_str(&format!("\nDeadlocks ({}):\n", report.findings.len()));
        for finding in &report.findings {
            let path: Vec<String> = finding.cycle.iter().map(|id| id.to_string()).collect();
            out.push_str(&format!(
                "  [{}] {} -> {}\n",
                finding.severity.as_str(),
                path.join(" -> "),
                finding.cycle[0]
            ));
            let n = finding.cycle.len();
            for (i, resource) in finding.resources.iter().enumerate() {
                out.push_str(&format!(
                    "      thread {} waits on {} held by thread {}\n",
                    finding.cycle[i],
                    resource,
                    finding.cycle[(i + 1) % n]
                ));
            }
        }
    }

    if !report.edges.is_empty() {
        out.push_str(&format!("\nWait edges ({}):\n", report.edges.len()));
        for edge in &report.edges {
            out.push_str(&format!(
                "  {} -> {} on {} ({})\n",
                edge.waiter,
                edge.holder,
                edge.resource,
                edge.kind.as_str()
            ));
        }
    }
    if !report.unresolved_waits.is_empty() {
        out.push_str(&format!(
            "\nUnresolved waits ({}):\n",
            report.unresolved_waits.len()
        ));
        for wait in &report.unresolved_waits {
            out.push_str(&format!(
                "  {} on {} ({}), holder unknown\n",
                wait.waiter,
                wait.resource,
                wait.kind.as_str()
            ));
        }
    }

    render_waiting(&mut out, records.iter().copied(), &wait_reasons(report));

    out.push_str("\nStacks:\n");
    for entry in &report.threads {
        out.push_str(&format!("  {}\n", thread_line(&entry.record)));
        match (&entry.stack, entry.sample_degraded) {
            (_, true) => out.push_str("      (stack unavailable: capture failed or timed out)\n"),
            (None, false) => out.push_str("      (not sampled)\n"),
            (Some(stack), false) => render_stack(&mut out, stack),
        }
    }
    out
}

fn render_process<'a>(
    out: &mut String,
    process: &ProcessSummary,
    threads: impl IntoIterator<Item = &'a ThreadRecord>,
) {
    out.push_str(&format!(
        "Process: {} (pid {})\n",
        process.process_name, process.pid
    ));
    out.push_str(&format!(
        "Threads: {} ({} workers)\n",
        process.thread_count, process.worker_thread_count
    ));
    out.push_str(&format!(
        "Memory: {:.1} MB\n",
        process.memory_bytes as f64 / (1024.0 * 1024.0)
    ));
    out.push_str(&format!("CPU: {:.1}%\n", process.cpu_percent));

    if let Some(current) = &process.current_thread {
        let id = current
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unregistered".to_string());
        out.push_str(&format!(
            "Calling thread: {} (id {}, main: {})\n",
            current.name,
            id,
            yes_no(current.is_main)
        ));
    }
    match process.main_thread_id {
        Some(main_id) => {
            let name = threads
                .into_iter()
                .find(|t| t.id == main_id)
                .map(|t| t.name.as_str())
                .unwrap_or("?");
            out.push_str(&format!("Main thread: {name} (id {main_id})\n"));
        }
        None => out.push_str("Main thread: not identified\n"),
    }

    let counts = &process.state_counts;
    out.push_str("\nThread states:\n");
    for (state, count) in [
        (ThreadState::Running, counts.running),
        (ThreadState::Blocked, counts.blocked),
        (ThreadState::Waiting, counts.waiting),
        (ThreadState::Suspended, counts.suspended),
        (ThreadState::Unknown, counts.unknown),
    ] {
        if count > 0 {
            out.push_str(&format!("  {}: {count}\n", state.as_str()));
        }
    }
}

fn render_advisories(out: &mut String, advisories: &[String]) {
    if advisories.is_empty() {
        return;
    }
    out.push_str("\nAdvisories:\n");
    for advisory in advisories {
        out.push_str(&format!("  ! {advisory}\n"));
    }
}

/// What each blocked thread is waiting on, from the wait edges and the
/// unresolved waits.
fn wait_reasons(report: &DiagnosticReport) -> BTreeMap<ThreadId, String> {
    let mut holders: BTreeMap<(ThreadId, &str, &str), Vec<String>> = BTreeMap::new();
    for edge in &report.edges {
        holders
            .entry((edge.waiter, edge.resource.as_str(), edge.kind.as_str()))
            .or_default()
            .push(format!("#{}", edge.holder));
    }

    let mut reasons: BTreeMap<ThreadId, Vec<String>> = BTreeMap::new();
    for ((waiter, resource, kind), holders) in holders {
        reasons.entry(waiter).or_default().push(format!(
            "waiting on {resource} ({kind}) held by {}",
            holders.join(", ")
        ));
    }
    for wait in &report.unresolved_waits {
        reasons.entry(wait.waiter).or_default().push(format!(
            "waiting on {} ({}), holder unknown",
            wait.resource,
            wait.kind.as_str()
        ));
    }
    reasons
        .into_iter()
        .map(|(id, parts)| (id, parts.join("; ")))
        .collect()
}

fn render_waiting<'a>(
    out: &mut String,
    threads: impl Iterator<Item = &'a ThreadRecord>,
    reasons: &BTreeMap<ThreadId, String>,
) {
    let waiting: Vec<&ThreadRecord> = threads
        .filter(|t| matches!(t.state, ThreadState::Waiting | ThreadState::Blocked))
        .collect();
    if waiting.is_empty() {
        return;
    }
    out.push_str(&format!("\nWaiting/blocked threads ({}):\n", waiting.len()));
    for thread in waiting.iter().take(MAX_WAITING_DETAILS) {
        match reasons.get(&thread.id) {
            Some(reason) => out.push_str(&format!("  {}: {reason}\n", thread_line(thread))),
            None => out.push_str(&format!("  {}\n", thread_line(thread))),
        }
    }
    if waiting.len() > MAX_WAITING_DETAILS {
        out.push_str(&format!(
            "  ... and {} more\n",
            waiting.len() - MAX_WAITING_DETAILS
        ));
    }
}

fn render_stack(out: &mut String, stack: &StackSnapshot) {
    if stack.frames.is_empty() {
        out.push_str("      (empty)\n");
        return;
    }
    for (i, frame) in stack.frames.iter().enumerate() {
        let symbol = if frame.function_symbol.is_empty() {
            "<unknown>"
        } else {
            frame.function_symbol.as_str()
        };
        match &frame.location {
            Some(location) => out.push_str(&format!("      #{i} {symbol} at {location}\n")),
            None => out.push_str(&format!("      #{i} {symbol}\n")),
        }
    }
}

fn thread_line(thread: &ThreadRecord) -> String {
    let mut flags = Vec::new();
    if thread.is_main {
        flags.push("main");
    }
    if thread.is_daemon {
        flags.push("daemon");
    }
    if !thread.is_alive {
        flags.push("exited");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    let name = if thread.name.is_empty() {
        "<unnamed>"
    } else {
        thread.name.as_str()
    };
    format!("#{} {} {}{}", thread.id, name, thread.state.as_str(), flags)
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
