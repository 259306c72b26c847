//! Render a display graph in the Graphviz DOT language.
//!
//! Every function becomes a box labelled with its name, its inclusive and
//! self percentages of the overall total, and its call count. Members of a
//! cycle are drawn together inside a `cluster` subgraph. Each function-level
//! call becomes an arrow labelled with its share of the total and its call
//! count; arrows between cycle members carry only the count. Boxes and
//! arrows are coloured by their percentage through a [`ColorMap`].
//!
//! See <http://www.graphviz.org/doc/info/lang.html> for the language.

use crate::names::{NameCompressor, NameFormat};
use profdot_graph::{DisplayEdge, DisplayFunction, DisplayGraph, DisplayNode, percentage};
use std::io::Write;
use thiserror::Error;

/// Errors that can occur while rendering.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, RenderError>;

const FONT_NAME: &str = "Helvetica";
const FONT_SIZE: &str = "10";

// ============================================================================
// Colours
// ============================================================================

/// Maps a ratio in `[0, 1]` to a colour by interpolating hue, saturation
/// and lightness, each raised to its own power.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMap {
    /// Hue, saturation, lightness at ratio 0.
    pub min: [f64; 3],
    /// Hue, saturation, lightness at ratio 1.
    pub max: [f64; 3],
    pub pow: [f64; 3],
}

impl ColorMap {
    /// Dark blue to saturated red, with a sub-linear hue gradation.
    pub const TEMPERATURE: ColorMap = ColorMap {
        min: [2.0 / 3.0, 0.80, 0.25],
        max: [0.0, 1.0, 0.5],
        pow: [0.5, 1.0, 1.0],
    };

    /// Pink to saturated red.
    pub const PINK: ColorMap = ColorMap {
        min: [0.0, 1.0, 0.90],
        max: [0.0, 1.0, 0.5],
        pow: [1.0, 1.0, 1.0],
    };

    /// Light gray to black.
    pub const GRAY: ColorMap = ColorMap {
        min: [0.0, 0.0, 0.925],
        max: [0.0, 0.0, 0.0],
        pow: [1.0, 1.0, 1.0],
    };

    /// RGB components in `[0, 1]`.
    pub fn rgb(&self, ratio: f64) -> (f64, f64, f64) {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let channel =
            |i: usize| self.min[i] + ratio.powf(self.pow[i]) * (self.max[i] - self.min[i]);
        hsl_to_rgb(channel(0), channel(1), channel(2))
    }

    /// `#rrggbb` for the ratio.
    pub fn hex(&self, ratio: f64) -> String {
        let (r, g, b) = self.rgb(ratio);
        format!("#{:02x}{:02x}{:02x}", to_byte(r), to_byte(g), to_byte(b))
    }
}

impl Default for ColorMap {
    fn default() -> Self {
        Self::TEMPERATURE
    }
}

fn to_byte(f: f64) -> u8 {
    if f <= 0.0 {
        0
    } else if f >= 1.0 {
        255
    } else {
        (255.0 * f + 0.5) as u8
    }
}

/// Convert from the HSL colour model, as in CSS3.
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (f64, f64, f64) {
    let m2 = if l <= 0.5 { l * (s + 1.0) } else { l + s - l * s };
    let m1 = l * 2.0 - m2;
    (
        hue_to_rgb(m1, m2, h + 1.0 / 3.0),
        hue_to_rgb(m1, m2, h),
        hue_to_rgb(m1, m2, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(m1: f64, m2: f64, h: f64) -> f64 {
    let h = if h < 0.0 {
        h + 1.0
    } else if h > 1.0 {
        h - 1.0
    } else {
        h
    };
    if h * 6.0 < 1.0 {
        m1 + (m2 - m1) * h * 6.0
    } else if h * 2.0 < 1.0 {
        m2
    } else if h * 3.0 < 2.0 {
        m1 + (m2 - m1) * (2.0 / 3.0 - h) * 6.0
    } else {
        m1
    }
}

// ============================================================================
// Writer
// ============================================================================

/// An attribute value: bare numbers are written as-is, text is quoted
/// unless it is a plain identifier.
enum Value<'a> {
    Text(&'a str),
    Int(usize),
}

/// Writer for the DOT language.
pub struct DotWriter<W: Write> {
    writer: W,
    names: NameCompressor,
}

impl<W: Write> DotWriter<W> {
    pub fn new(writer: W, format: NameFormat) -> Result<Self> {
        Ok(Self {
            writer,
            names: NameCompressor::new(format)?,
        })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write the whole graph.
    pub fn graph(&mut self, graph: &DisplayGraph, colormap: &ColorMap) -> Result<()> {
        self.write("digraph {\n")?;

        let font = [
            ("fontname", Value::Text(FONT_NAME)),
            ("fontsize", Value::Text(FONT_SIZE)),
        ];
        self.attr("graph", &font)?;
        self.attr(
            "node",
            &[
                ("fontname", Value::Text(FONT_NAME)),
                ("fontsize", Value::Text(FONT_SIZE)),
                ("shape", Value::Text("box")),
                ("style", Value::Text("filled")),
                ("fontcolor", Value::Text("white")),
            ],
        )?;
        self.attr("edge", &font)?;

        for node in &graph.nodes {
            if node.is_cycle {
                self.cycle(graph, node, colormap)?;
            } else {
                for function in &node.functions {
                    self.function(graph, node, function, colormap, "\t")?;
                }
            }
        }

        for edge in &graph.edges {
            self.calls(graph, edge, colormap)?;
        }

        self.write("}\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn cycle(
        &mut self,
        graph: &DisplayGraph,
        node: &DisplayNode,
        colormap: &ColorMap,
    ) -> Result<()> {
        let self_pct = percentage(node.self_time, graph.total_time);
        let label = format!(
            "cycle {}\n{:.2}% ({:.2}%)",
            node.index, node.total_pct, self_pct
        );

        self.write(&format!("\tsubgraph cluster_{} {{\n", node.index))?;
        self.write("\t\tgraph")?;
        self.attr_list(&[("label", Value::Text(&label)), ("style", Value::Text("dashed"))])?;
        self.write(";\n")?;
        for function in &node.functions {
            self.function(graph, node, function, colormap, "\t\t")?;
        }
        self.write("\t}\n")?;
        Ok(())
    }

    /// A function box. Cycle members show the cycle's inclusive time.
    fn function(
        &mut self,
        graph: &DisplayGraph,
        node: &DisplayNode,
        function: &DisplayFunction,
        colormap: &ColorMap,
        indent: &str,
    ) -> Result<()> {
        let mut labels = vec![self.names.compress(&function.id.to_string())];
        labels.push(format!(
            "{:.2}% ({:.2}%)",
            node.total_pct,
            percentage(function.self_time, graph.total_time)
        ));
        if function.calls > 0 {
            labels.push(function.calls.to_string());
        }

        let label = labels.join("\n");
        let color = colormap.hex(node.total_pct / 100.0);
        self.write(indent)?;
        self.id(Value::Int(function.index))?;
        self.attr_list(&[("label", Value::Text(&label)), ("color", Value::Text(&color))])?;
        self.write(";\n")
    }

    /// One arrow per function-level call folded into the edge.
    fn calls(
        &mut self,
        graph: &DisplayGraph,
        edge: &DisplayEdge,
        colormap: &ColorMap,
    ) -> Result<()> {
        let caller_pct = graph.node(edge.caller).map_or(0.0, |n| n.total_pct);

        for part in &edge.parts {
            let share = if edge.calls > 0 {
                part.calls as f64 / edge.calls as f64
            } else {
                1.0 / edge.parts.len() as f64
            };

            let mut labels = Vec::new();
            let ratio = match edge.total_pct {
                Some(pct) => {
                    let pct = pct * share;
                    labels.push(format!("{:.2}%", pct));
                    pct / 100.0
                }
                None => caller_pct / 100.0,
            };
            labels.push(part.calls.to_string());

            let label = labels.join("\n");
            let color = colormap.hex(ratio);
            self.edge(
                part.caller,
                part.callee,
                &[
                    ("label", Value::Text(&label)),
                    ("color", Value::Text(&color)),
                    ("fontcolor", Value::Text(&color)),
                ],
            )?;
        }
        Ok(())
    }

    fn attr(&mut self, what: &str, attrs: &[(&str, Value<'_>)]) -> Result<()> {
        self.write("\t")?;
        self.write(what)?;
        self.attr_list(attrs)?;
        self.write(";\n")
    }

    fn edge(&mut self, src: usize, dst: usize, attrs: &[(&str, Value<'_>)]) -> Result<()> {
        self.write("\t")?;
        self.id(Value::Int(src))?;
        self.write(" -> ")?;
        self.id(Value::Int(dst))?;
        self.attr_list(attrs)?;
        self.write(";\n")
    }

    fn attr_list(&mut self, attrs: &[(&str, Value<'_>)]) -> Result<()> {
        if attrs.is_empty() {
            return Ok(());
        }
        self.write(" [")?;
        for (i, (name, value)) in attrs.iter().enumerate() {
            if i > 0 {
                self.write(", ")?;
            }
            self.id(Value::Text(*name))?;
            self.write("=")?;
            match value {
                Value::Text(s) => self.id(Value::Text(*s))?,
                Value::Int(n) => self.id(Value::Int(*n))?,
            }
        }
        self.write("]")
    }

    fn id(&mut self, id: Value<'_>) -> Result<()> {
        match id {
            Value::Int(n) => write!(self.writer, "{}", n)?,
            Value::Text(s) if is_plain_id(s) => self.writer.write_all(s.as_bytes())?,
            Value::Text(s) => self.writer.write_all(escape(s).as_bytes())?,
        }
        Ok(())
    }

    fn write(&mut self, s: &str) -> Result<()> {
        self.writer.write_all(s.as_bytes())?;
        Ok(())
    }
}

fn is_plain_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(char::is_alphanumeric)
}

/// Quote a string for DOT.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str(r"\\"),
            '\n' => out.push_str(r"\n"),
            '\t' => out.push_str(r"\t"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
