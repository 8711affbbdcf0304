//! Flattening a tree back into plain HTML.

use crate::tmpl::{Dynamic, Tree};

impl Tree {
    /// Render the tree to the HTML string the originating template
    /// would have produced. Titles and events are out-of-band and are
    /// not rendered.
    pub fn render_to(&self, out: &mut String) {
        if self.is_range {
            for d in &self.dynamics {
                if let Dynamic::Row(row) = d {
                    interleave(&self.statics, row, out);
                }
            }
            // a range that never ran still contributes its statics
            if self.dynamics.is_empty() {
                for s in &self.statics {
                    out.push_str(s);
                }
            }
            return;
        }
        interleave(&self.statics, &self.dynamics, out);
    }
}

fn interleave(statics: &[String], dynamics: &[Dynamic], out: &mut String) {
    for (i, s) in statics.iter().enumerate() {
        out.push_str(s);
        match dynamics.get(i) {
            Some(Dynamic::Leaf(v)) => out.push_str(v),
            Some(Dynamic::Sub(t)) => t.render_to(out),
            Some(Dynamic::Row(_)) | Some(Dynamic::Skip) | None => {}
        }
    }
    // degenerate trees may hold dynamics with no statics recorded yet
    if statics.is_empty() {
        for d in dynamics {
            match d {
                Dynamic::Leaf(v) => out.push_str(v),
                Dynamic::Sub(t) => t.render_to(out),
                Dynamic::Row(_) | Dynamic::Skip => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(tree: &Tree) -> String {
        let mut out = String::new();
        tree.render_to(&mut out);
        out
    }

    #[test]
    fn test_render_alternation() {
        let mut root = Tree::new();
        root.append_static("<h1>");
        root.append_dynamic("0".to_string());
        root.append_static("</h1>");
        assert_eq!(rendered(&root), "<h1>0</h1>");
    }

    #[test]
    fn test_render_nested_sub() {
        let mut root = Tree::new();
        root.append_static("a");
        let sub = root.append_sub();
        sub.append_static("b");
        sub.append_dynamic("c".to_string());
        root.append_static("d");
        assert_eq!(rendered(&root), "abcd");
    }

    #[test]
    fn test_render_range_rows() {
        let mut root = Tree::new();
        let range = root.append_range_sub();
        for x in ["a", "b", "c"] {
            range.append_dynamic(x.to_string());
            range.append_static(" ");
            range.inc_range_step();
        }
        assert_eq!(rendered(&root), "a b c ");
    }

    #[test]
    fn test_render_empty_tree() {
        assert_eq!(rendered(&Tree::new()), "");
    }
}
