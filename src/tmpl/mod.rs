//! Structured template trees.
//!
//! A [`Tree`] captures one execution of a template as an alternation of
//! literal *static* fragments and evaluated *dynamic* values, so later
//! renders can push only the dynamics that changed. Trees serialize to the
//! compact JSON the client-side patcher consumes and diff against a prior
//! tree from the same template.

pub mod diff;
mod json;
mod render;
mod serialize;

pub use diff::diff;

/// One dynamic slot in a tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Dynamic {
    /// An evaluated value, already HTML-escaped by the template engine.
    Leaf(String),
    /// A nested tree (an `if` branch, a sub-template, a nested range).
    Sub(Tree),
    /// One range iteration; rows contain only leaves and subtrees.
    Row(Vec<Dynamic>),
    /// Diff sentinel: this position is unchanged and is omitted on the
    /// wire. Never produced by the builder.
    Skip,
}

/// A rendered template snapshot.
///
/// For an ordinary tree, statics and dynamics strictly alternate,
/// beginning and ending with a (possibly empty) static:
/// `statics.len() == dynamics.len() + 1`. For a range tree the dynamics
/// are per-iteration rows of identical length `k` and
/// `statics.len() == k + 1`. The builder maintains the alternation as it
/// goes, so serializing never mutates the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tree {
    pub(crate) statics: Vec<String>,
    pub(crate) dynamics: Vec<Dynamic>,
    pub(crate) is_range: bool,
    /// Write cursor for the current range iteration.
    pub(crate) range_step: usize,
    /// Page title override, carried on the root only.
    pub(crate) title: Option<String>,
    /// Pre-encoded event envelopes pushed atomically with the diff.
    pub(crate) events: Vec<String>,
    /// Set by diffing when the statics are unchanged and should be
    /// suppressed on the wire.
    pub(crate) exclude_statics: bool,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_range() -> Self {
        Tree {
            is_range: true,
            ..Self::default()
        }
    }

    /// Number of dynamics in the current alternation: the row length for
    /// range trees, the direct count otherwise.
    fn alternation_len(&self) -> usize {
        if !self.is_range {
            return self.dynamics.len();
        }
        match self.dynamics.first() {
            Some(Dynamic::Row(row)) => row.len(),
            _ => 0,
        }
    }

    /// Append literal text. Consecutive statics merge into one so the
    /// alternation survives constructs that evaluate to nothing.
    /// Ignored inside a range past the first iteration.
    pub fn append_static(&mut self, text: &str) {
        if self.range_step > 0 {
            return;
        }
        let last_slot_is_static = self.statics.len() > self.alternation_len();
        if last_slot_is_static {
            if let Some(last) = self.statics.last_mut() {
                last.push_str(text);
            }
            return;
        }
        self.statics.push(text.to_string());
    }

    /// Append an evaluated value.
    pub fn append_dynamic(&mut self, value: String) {
        self.push_dynamic(Dynamic::Leaf(value));
    }

    /// Append a nested subtree and return it for population.
    pub fn append_sub(&mut self) -> &mut Tree {
        match self.push_dynamic(Dynamic::Sub(Tree::new())) {
            Dynamic::Sub(t) => t,
            _ => unreachable!("push_dynamic returned a different slot"),
        }
    }

    /// Append a range-rooted subtree and return it for population.
    pub fn append_range_sub(&mut self) -> &mut Tree {
        match self.push_dynamic(Dynamic::Sub(Tree::new_range())) {
            Dynamic::Sub(t) => t,
            _ => unreachable!("push_dynamic returned a different slot"),
        }
    }

    /// Advance the range write cursor. On the first step only, the
    /// trailing placeholder static is appended if the iteration ended
    /// on a dynamic.
    pub fn inc_range_step(&mut self) {
        if self.range_step == 0 && self.statics.len() < self.alternation_len() + 1 {
            self.statics.push(String::new());
        }
        self.range_step += 1;
    }

    /// Length of the row being written for the current range step,
    /// or 0 if the iteration has not emitted a dynamic yet.
    pub fn current_row_len(&self) -> usize {
        if self.dynamics.len() != self.range_step + 1 {
            return 0;
        }
        match self.dynamics.last() {
            Some(Dynamic::Row(row)) => row.len(),
            _ => 0,
        }
    }

    fn push_dynamic(&mut self, d: Dynamic) -> &mut Dynamic {
        if self.is_range {
            return self.push_range_dynamic(d);
        }
        if self.statics.len() == self.dynamics.len() {
            // no static precedes this dynamic; keep the alternation
            self.statics.push(String::new());
        }
        self.dynamics.push(d);
        self.statics.push(String::new());
        let slot = self.dynamics.last_mut();
        slot.unwrap_or_else(|| unreachable!("dynamic was just pushed"))
    }

    fn push_range_dynamic(&mut self, d: Dynamic) -> &mut Dynamic {
        // statics are recorded during the first iteration only
        if self.range_step == 0 && self.statics.len() == self.current_row_len() {
            self.statics.push(String::new());
        }
        if self.dynamics.len() != self.range_step + 1 {
            self.dynamics.push(Dynamic::Row(vec![d]));
        } else if let Some(Dynamic::Row(row)) = self.dynamics.last_mut() {
            row.push(d);
        } else {
            unreachable!("range tree holds non-row dynamics");
        }
        match self.dynamics.last_mut() {
            Some(Dynamic::Row(row)) => row
                .last_mut()
                .unwrap_or_else(|| unreachable!("range cell was just pushed")),
            _ => unreachable!("range tree holds non-row dynamics"),
        }
    }

    /// Override the page title pushed with this tree. Root only.
    pub fn set_title(&mut self, title: String) {
        self.title = Some(title);
    }

    /// Attach pre-encoded event envelopes pushed with this tree. Root only.
    pub fn set_events(&mut self, events: Vec<String>) {
        self.events = events;
    }

    pub fn is_range(&self) -> bool {
        self.is_range
    }

    /// True for a diff result that carries nothing: every position
    /// unchanged, statics suppressed, no title or events.
    pub(crate) fn is_empty_diff(&self) -> bool {
        self.exclude_statics
            && self.title.is_none()
            && self.events.is_empty()
            && self.dynamics.iter().all(|d| matches!(d, Dynamic::Skip))
    }

    /// Check the structural invariants. Violations indicate an internal
    /// consistency failure in the builder or the template engine.
    pub fn validate(&self) -> Result<(), String> {
        if self.dynamics.is_empty() {
            if !self.is_range && self.statics.len() > 1 {
                return Err(format!(
                    "tree with no dynamics has {} statics",
                    self.statics.len()
                ));
            }
            return Ok(());
        }
        if self.is_range {
            let k = self.alternation_len();
            for d in &self.dynamics {
                let row = match d {
                    Dynamic::Row(row) => row,
                    other => return Err(format!("range tree holds non-row dynamic {other:?}")),
                };
                if row.len() != k {
                    return Err(format!("range row has {} cells, expected {k}", row.len()));
                }
                for cell in row {
                    match cell {
                        Dynamic::Leaf(_) => {}
                        Dynamic::Sub(sub) => sub.validate()?,
                        other => return Err(format!("range cell holds {other:?}")),
                    }
                }
            }
            if self.statics.len() != k + 1 {
                return Err(format!(
                    "range tree has {} statics for row length {k}",
                    self.statics.len()
                ));
            }
            return Ok(());
        }
        if self.statics.len() != self.dynamics.len() + 1 {
            return Err(format!(
                "tree has {} statics for {} dynamics",
                self.statics.len(),
                self.dynamics.len()
            ));
        }
        for d in &self.dynamics {
            match d {
                Dynamic::Leaf(_) | Dynamic::Skip => {}
                Dynamic::Sub(sub) => sub.validate()?,
                Dynamic::Row(_) => {
                    return Err("row dynamic outside a range tree".to_string());
                }
            }
        }
        Ok(())
    }
}
