//! Memory graph to DOT (Graphviz) conversion.
//!
//! The generated DOT output follows these conventions:
//! - **Objects** are boxes (list segments 3D boxes, optional objects
//!   octagons); freed objects are dashed, external ones grey
//! - **Values** are circles, labelled with their number when known
//! - **Has-value edges** go from an object to a value and carry the bit range
//! - **Points-to edges** go from a value to an object and carry the offset and
//!   target specifier
//! - **Disequalities** are red dotted lines between values
//! - Stack frames and the globals are drawn as clusters
//!
//! # Examples
//!
//! ```
//! use smg_rs::context::AnalysisContext;
//! use smg_rs::frame::FunctionDecl;
//! use smg_rs::options::SmgOptions;
//! use smg_rs::state::SmgState;
//!
//! let ctx = AnalysisContext::with_options(SmgOptions::default());
//! let state = SmgState::initial(ctx).add_stack_frame(FunctionDecl::void("main")).unwrap();
//! let (state, _) = state.add_local_variable(64, "p").unwrap();
//!
//! let dot = state.to_dot().unwrap();
//! // Write to file and render with: dot -Tpng output.dot -o output.png
//! assert!(dot.contains("cluster_frame_0"));
//! ```

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::explicit::ExplicitValues;
use crate::memory::LanguageMemory;
use crate::object::{ObjectKind, SmgObject};
use crate::state::SmgState;
use crate::types::ObjectId;

/// Configuration options for DOT output generation.
///
/// # Examples
///
/// ```
/// use smg_rs::dot::DotConfig;
///
/// let config = DotConfig {
///     show_null: true,
///     ..DotConfig::default()
/// };
/// assert_eq!(config.region_shape, "box");
/// ```
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Shape for concrete regions (default: "box")
    pub region_shape: &'static str,
    /// Shape for list segments (default: "box3d")
    pub segment_shape: &'static str,
    /// Shape for optional objects (default: "octagon")
    pub optional_shape: &'static str,
    /// Shape for values (default: "circle")
    pub value_shape: &'static str,
    /// Style for has-value edges (default: "solid")
    pub has_value_style: &'static str,
    /// Style for points-to edges (default: "bold")
    pub points_to_style: &'static str,
    /// Whether to draw the Null object and the edges into it (default: false)
    pub show_null: bool,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            region_shape: "box",
            segment_shape: "box3d",
            optional_shape: "octagon",
            value_shape: "circle",
            has_value_style: "solid",
            points_to_style: "bold",
            show_null: false,
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl LanguageMemory {
    fn write_object(
        &self,
        dot: &mut String,
        object: &SmgObject,
        label: Option<&str>,
        config: &DotConfig,
    ) -> std::fmt::Result {
        let shape = match object.kind() {
            ObjectKind::Sll { .. } | ObjectKind::Dll { .. } => config.segment_shape,
            ObjectKind::Optional => config.optional_shape,
            ObjectKind::Null | ObjectKind::Region => config.region_shape,
        };
        let mut attributes = format!(
            "shape={}, label=\"{}\\n{} ({} bits)\"",
            shape,
            escape(label.unwrap_or(object.label())),
            object.kind(),
            object.size()
        );
        if !self.smg().is_valid(object.id()) && !object.is_null() {
            attributes.push_str(", style=dashed");
        }
        if self.is_external(object.id()) {
            attributes.push_str(", color=grey");
        }
        writeln!(dot, "  o{} [{}];", object.id().id(), attributes)
    }

    /// Converts the memory graph to DOT format with custom configuration.
    pub fn to_dot_with_config(&self, explicit: &ExplicitValues, config: &DotConfig) -> Result<String, std::fmt::Error> {
        let smg = self.smg();
        let shown = |object: ObjectId| config.show_null || !object.is_null();

        let mut dot = String::new();
        writeln!(dot, "digraph smg {{")?;
        writeln!(dot, "  rankdir=LR;")?;

        // Roots, grouped by namespace
        let mut drawn = BTreeSet::new();
        writeln!(dot, "  subgraph cluster_globals {{")?;
        writeln!(dot, "  label=\"globals\";")?;
        for (name, id) in self.globals() {
            if let Some(object) = smg.object(id) {
                self.write_object(&mut dot, object, Some(name.as_ref()), config)?;
                drawn.insert(id);
            }
        }
        writeln!(dot, "  }}")?;
        for (depth, frame) in self.frames().enumerate() {
            writeln!(dot, "  subgraph cluster_frame_{} {{", depth)?;
            writeln!(dot, "  label=\"{}\";", escape(&frame.function().to_string()))?;
            for id in frame.objects() {
                if let Some(object) = smg.object(id) {
                    self.write_object(&mut dot, object, None, config)?;
                    drawn.insert(id);
                }
            }
            writeln!(dot, "  }}")?;
        }

        // Heap
        for object in smg.objects() {
            if !drawn.contains(&object.id()) && shown(object.id()) {
                self.write_object(&mut dot, object, None, config)?;
            }
        }

        // Values that occur in some edge
        let mut values = BTreeSet::new();
        for edge in smg.all_has_value_edges() {
            values.insert(edge.value);
        }
        for pt in smg.points_to_edges() {
            if shown(pt.object) {
                values.insert(pt.value);
            }
        }
        for (a, b) in smg.neq_pairs() {
            values.extend([a, b]);
        }
        for &value in &values {
            let label = match explicit.get(value) {
                Some(number) => number.to_string(),
                None => format!("#{}", value.id()),
            };
            writeln!(dot, "  v{} [shape={}, label=\"{}\"];", value.id(), config.value_shape, label)?;
        }

        for edge in smg.all_has_value_edges() {
            writeln!(
                dot,
                "  o{} -> v{} [style={}, label=\"[{},{})\"];",
                edge.object.id(),
                edge.value.id(),
                config.has_value_style,
                edge.offset,
                edge.end()
            )?;
        }
        for pt in smg.points_to_edges() {
            if !shown(pt.object) {
                continue;
            }
            writeln!(
                dot,
                "  v{} -> o{} [style={}, label=\"+{} {}\"];",
                pt.value.id(),
                pt.object.id(),
                config.points_to_style,
                pt.offset,
                pt.specifier
            )?;
        }
        for (a, b) in smg.neq_pairs() {
            writeln!(
                dot,
                "  v{} -> v{} [dir=none, style=dotted, color=red, label=\"!=\"];",
                a.id(),
                b.id()
            )?;
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}

impl SmgState {
    /// Converts the state's memory graph to DOT (Graphviz) format.
    pub fn to_dot(&self) -> Result<String, std::fmt::Error> {
        self.to_dot_with_config(&DotConfig::default())
    }

    /// Converts the state's memory graph to DOT format with custom configuration.
    pub fn to_dot_with_config(&self, config: &DotConfig) -> Result<String, std::fmt::Error> {
        self.memory().to_dot_with_config(self.explicit_values(), config)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use num_bigint::BigInt;

    use super::*;
    use crate::context::AnalysisContext;
    use crate::frame::FunctionDecl;
    use crate::options::SmgOptions;

    fn list_state() -> SmgState {
        let state = SmgState::initial(AnalysisContext::with_options(SmgOptions::default()))
            .add_stack_frame(FunctionDecl::void("main"))
            .unwrap();
        let (state, p) = state.add_local_variable(64, "p").unwrap();
        let allocated = state.allocate_heap(128, "node").unwrap().remove(0);
        let state = allocated.state.write_value(p, 0, 64, allocated.value.unwrap()).unwrap();
        let object = state.smg().points_to(allocated.value.unwrap()).unwrap().object;
        let n = state.value_for_number(BigInt::from(42));
        n.state.write_value(object, 64, 64, n.value.unwrap()).unwrap()
    }

    /// Basic test: verify DOT output is generated without errors
    #[test]
    fn test_to_dot_basic() {
        let dot = list_state().to_dot().unwrap();
        assert!(dot.starts_with("digraph smg {"));
        assert!(dot.ends_with("}\n"));
        assert!(dot.contains("label=\"42\""));
        assert!(dot.contains("cluster_frame_0"));
        assert!(!dot.contains("o0 ["));
    }

    /// Test with custom configuration
    #[test]
    fn test_to_dot_with_config() {
        let config = DotConfig {
            show_null: true,
            region_shape: "rect",
            ..DotConfig::default()
        };
        let dot = list_state().to_dot_with_config(&config).unwrap();
        assert!(dot.contains("o0 ["));
        assert!(dot.contains("shape=rect"));
    }

    /// Helper test to write DOT file for manual inspection (disabled by default)
    #[test]
    #[ignore]
    fn test_write_dot_file() {
        let dot = list_state().to_dot().unwrap();
        std::fs::write("test_output.dot", &dot).unwrap();
        println!("DOT output:\n{}", dot);
    }
}
