//! Node identities and input declarations.

use std::fmt;
use std::str::FromStr;

/// Stable identity of a declared node: an index into the graph's arena.
///
/// Assigned once by [`GraphBuilder`](super::builder::GraphBuilder) and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Element type of an input placeholder or intermediate value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float32,
    Int64,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Float32 => write!(f, "float32"),
            ElementType::Int64 => write!(f, "int64"),
        }
    }
}

impl FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float32" | "float" | "f32" => Ok(ElementType::Float32),
            "int64" | "int" | "i64" => Ok(ElementType::Int64),
            other => Err(format!(
                "unknown element type '{}' (expected float32 or int64)",
                other
            )),
        }
    }
}

/// Per-sample dimensions; the batch dimension is implicit.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    pub fn vector(width: usize) -> Self {
        Shape(vec![width])
    }

    /// Number of features per sample.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(*")?;
        for d in &self.0 {
            write!(f, ", {}", d)?;
        }
        write!(f, ")")
    }
}

/// A named input placeholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSpec {
    pub name: String,
    pub shape: Shape,
    pub dtype: ElementType,
}

impl InputSpec {
    pub fn new(name: impl Into<String>, shape: &[usize], dtype: ElementType) -> Self {
        Self {
            name: name.into(),
            shape: Shape(shape.to_vec()),
            dtype,
        }
    }

    pub fn float(name: impl Into<String>, shape: &[usize]) -> Self {
        Self::new(name, shape, ElementType::Float32)
    }

    pub fn int(name: impl Into<String>, shape: &[usize]) -> Self {
        Self::new(name, shape, ElementType::Int64)
    }
}

/// What a node is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Input(InputSpec),
    /// The `index`-th output of the `block`-th declared block.
    BlockOutput { block: usize, index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_display_uses_batch_star() {
        assert_eq!(Shape::vector(8).to_string(), "(*, 8)");
        assert_eq!(Shape(vec![2, 3]).to_string(), "(*, 2, 3)");
        assert_eq!(Shape(vec![2, 3]).numel(), 6);
    }

    #[test]
    fn element_type_parse() {
        assert_eq!("float32".parse::<ElementType>(), Ok(ElementType::Float32));
        assert_eq!("int".parse::<ElementType>(), Ok(ElementType::Int64));
        assert!("bf16".parse::<ElementType>().is_err());
    }
}
