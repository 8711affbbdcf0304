//! Compact JSON serialization of trees.
//!
//! Ordinary trees serialize as `{"0":d0,"1":d1,…,"s":[…]}`; range trees
//! as `{"d":[[row…],…],"s":[…]}`. A tree with no dynamics degenerates to
//! its single static as a bare JSON string. Diff overlays omit unchanged
//! positions and, when `exclude_statics` is set, the `"s"` key; an empty
//! overlay serializes as `{}`.

use crate::error::TreeError;
use crate::tmpl::{json, Dynamic, Tree};

impl Tree {
    /// Serialize the tree to its JSON wire form.
    ///
    /// The `Result` mirrors the encoder contract: invalid UTF-8 is the
    /// only encoder error. Rust strings rule it out statically, so this
    /// only fails if non-UTF-8 data is ever routed through the tree.
    pub fn json(&self) -> Result<String, TreeError> {
        let mut out = String::new();
        self.write_json(&mut out)?;
        Ok(out)
    }

    fn write_json(&self, out: &mut String) -> Result<(), TreeError> {
        // a tree with no dynamics collapses into a single string,
        // unless it is a diff overlay
        if self.dynamics.is_empty()
            && !self.exclude_statics
            && self.title.is_none()
            && self.events.is_empty()
        {
            match self.statics.first() {
                None => out.push_str("\"\""),
                Some(s) => json::append_string(out, s),
            }
            return Ok(());
        }

        out.push('{');
        let mut first = true;

        if self.is_range {
            if !self.dynamics.is_empty() {
                first = false;
                out.push_str("\"d\":[");
                for (i, d) in self.dynamics.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push('[');
                    if let Dynamic::Row(row) = d {
                        for (j, cell) in row.iter().enumerate() {
                            if j > 0 {
                                out.push(',');
                            }
                            write_cell(cell, out)?;
                        }
                    }
                    out.push(']');
                }
                out.push(']');
            }
        } else {
            for (i, d) in self.dynamics.iter().enumerate() {
                if matches!(d, Dynamic::Skip) {
                    // unchanged position: the reader assumes it
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                out.push('"');
                out.push_str(&i.to_string());
                out.push_str("\":");
                write_cell(d, out)?;
            }
        }

        if !self.exclude_statics {
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str("\"s\":[");
            for (i, s) in self.statics.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                json::append_string(out, s);
            }
            out.push(']');
        }

        if let Some(title) = &self.title {
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str("\"t\":");
            json::append_string(out, title);
        }

        if !self.events.is_empty() {
            if !first {
                out.push(',');
            }
            out.push_str("\"e\":[");
            for (i, e) in self.events.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(e);
            }
            out.push(']');
        }

        out.push('}');
        Ok(())
    }
}

fn write_cell(d: &Dynamic, out: &mut String) -> Result<(), TreeError> {
    match d {
        Dynamic::Leaf(s) => {
            json::append_string(out, s);
            Ok(())
        }
        Dynamic::Sub(t) => t.write_json(out),
        Dynamic::Row(_) | Dynamic::Skip => {
            // rows only nest under a range root and skips are elided by
            // the caller; reaching here is a builder bug
            unreachable!("unexpected {d:?} in serialization position")
        }
    }
}
