use crate::compute::{CacheKey, ComputationError, EntryStatus, Ledger, Simulation};
use crate::period::Period;
use crate::store::VariableRegistry;
use std::collections::HashMap;
use std::fmt::Write;

/// Computes `name` for `period` and renders the tree of cached entries it was
/// built from, with the values of each.
pub fn format_trace(sim: &Simulation, name: &str, period: Period) -> Result<String, ComputationError> {
    let root = sim.key(name, period)?;
    // A failed request is still traced, down to the entry that failed.
    let outcome = sim.calculate(name, period);
    Ok(sim.with_ledger(|ledger| {
        let mut tracer = Tracer {
            registry: sim.registry(),
            ledger,
            visited_at_level: HashMap::new(),
            output: String::new(),
        };
        let _ = writeln!(tracer.output, "AUDIT TRACE for '{}' @ {}:", name, period);
        if let Err(e) = &outcome {
            let _ = writeln!(tracer.output, "FAILED: {}", e.root_cause());
        }
        let _ = writeln!(tracer.output, "--------------------------------------------------");
        tracer.trace_entry(root, 1, "");
        tracer.output
    }))
}

struct Tracer<'a> {
    registry: &'a VariableRegistry,
    ledger: &'a Ledger,
    visited_at_level: HashMap<CacheKey, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_entry(&mut self, key: CacheKey, level: usize, prefix: &str) {
        if let Some(&first_seen) = self.visited_at_level.get(&key) {
            let _ = writeln!(self.output, "{}-> (Ref to L{})", prefix, first_seen);
            return;
        }
        self.visited_at_level.insert(key, level);

        let def = self.registry.get(key.variable);
        let header = format!("[L{}] {}@{}{}", level, def.name(), key.period, self.format_value(&key));
        let reads = self.ledger.reads(&key);
        if reads.is_empty() {
            let source = if def.is_input() { "Input" } else { "Formula" };
            let _ = writeln!(self.output, "{}{} -> {}", prefix, header, source);
            return;
        }
        let _ = writeln!(self.output, "{}{} = f({})", prefix, header, self.format_reads(&reads));

        let stem = build_child_stem(prefix);
        for (i, &child) in reads.iter().enumerate() {
            let connector = if i == reads.len() - 1 { "`--" } else { "|--" };
            self.trace_entry(child, level + 1, &format!("{}{}", stem, connector));
        }
    }

    fn format_reads(&self, reads: &[CacheKey]) -> String {
        reads
            .iter()
            .map(|k| format!("{}@{}", self.registry.name(k.variable), k.period))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn format_value(&self, key: &CacheKey) -> String {
        match self.ledger.status(key) {
            EntryStatus::Done => match self.ledger.value(key).map(|v| v.as_slice()) {
                Some([single]) => format!("[{:.3}]", single),
                Some([first, ..]) => format!("[{:.3}, ...]", first),
                _ => "[]".to_string(),
            },
            EntryStatus::Failed => match self.ledger.error(key) {
                Some(e) => format!("[Err: {}]", e.root_cause()),
                None => "[?]".to_string(),
            },
            _ => "[?]".to_string(),
        }
    }
}

fn build_child_stem(current_prefix: &str) -> String {
    current_prefix.replace("`--", "   ").replace("|--", "|  ")
}
