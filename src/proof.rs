//! # Proof Terms
//!
//! Compositional witnesses of type inhabitation. A successful synthesis
//! carries a proof term alongside the plan: the expression of identities,
//! function applications, sequential compositions, and parallel tuplings
//! that realises the goal type from the sources.
//!
//! `Compose` is flattened on construction and identity children are elided,
//! so degenerate nesting never appears. `Tuple` structure is retained
//! verbatim (it carries parallelism).

use crate::model::FuncDef;

/// A witness of type inhabitation
#[derive(Debug, Clone, PartialEq)]
pub enum Proof {
    /// Identity witness for a type
    Identity { ty: String },
    /// A single function application
    Func(FuncDef),
    /// Sequential composition, read left-to-right (first applied first)
    Compose { children: Vec<Proof> },
    /// Parallel tupling: the result is the tuple of children's results
    Tuple { children: Vec<Proof> },
    /// The i-th component of a product (reserved for future destructors)
    Projection {
        index: usize,
        source: String,
        target: String,
    },
}

impl Proof {
    pub fn identity(ty: impl Into<String>) -> Proof {
        Proof::Identity { ty: ty.into() }
    }

    pub fn func(func: &FuncDef) -> Proof {
        Proof::Func(func.clone())
    }

    /// Proof for a linear path: `Identity(src)` when empty, otherwise the
    /// flattened composition of the function applications
    pub fn path(src: &str, funcs: &[FuncDef]) -> Proof {
        if funcs.is_empty() {
            return Proof::identity(src);
        }
        Proof::compose(funcs.iter().map(Proof::func).collect())
    }

    /// Sequential composition. Nested `Compose` children are flattened and
    /// identity witnesses are elided; a composition that reduces to nothing
    /// collapses to the identity on its endpoint type.
    pub fn compose(children: Vec<Proof>) -> Proof {
        let mut flat = Vec::new();
        let mut endpoint = String::new();

        for child in children {
            match child {
                Proof::Compose { children: inner } => flat.extend(inner),
                Proof::Identity { ty } => endpoint = ty,
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => Proof::Identity { ty: endpoint },
            1 => flat.into_iter().next().unwrap(),
            _ => Proof::Compose { children: flat },
        }
    }

    /// Parallel tupling of sibling proofs
    pub fn tuple(children: Vec<Proof>) -> Proof {
        Proof::Tuple { children }
    }

    /// Source type of the witness
    pub fn source_type(&self) -> String {
        match self {
            Proof::Identity { ty } => ty.clone(),
            Proof::Func(f) => {
                if f.is_multiarg() {
                    format!("({})", f.dom_types().join(", "))
                } else {
                    f.dom_types()[0].clone()
                }
            }
            Proof::Compose { children } => children
                .first()
                .map(Proof::source_type)
                .unwrap_or_default(),
            Proof::Tuple { children } => children
                .first()
                .map(Proof::source_type)
                .unwrap_or_default(),
            Proof::Projection { source, .. } => source.clone(),
        }
    }

    /// Target type of the witness; a tuple's target is the product of its
    /// children's targets
    pub fn target_type(&self) -> String {
        match self {
            Proof::Identity { ty } => ty.clone(),
            Proof::Func(f) => f.cod.clone(),
            Proof::Compose { children } => children
                .last()
                .map(Proof::target_type)
                .unwrap_or_default(),
            Proof::Tuple { children } => {
                let targets: Vec<String> =
                    children.iter().map(Proof::target_type).collect();
                format!("({})", targets.join(", "))
            }
            Proof::Projection { target, .. } => target.clone(),
        }
    }

    /// Adjacency check: in a composition, each child's target must equal the
    /// next child's source
    pub fn is_well_typed(&self) -> bool {
        match self {
            Proof::Identity { .. } | Proof::Func(_) | Proof::Projection { .. } => true,
            Proof::Compose { children } => {
                children.windows(2).all(|pair| {
                    pair[0].target_type() == pair[1].source_type()
                }) && children.iter().all(Proof::is_well_typed)
            }
            Proof::Tuple { children } => children.iter().all(Proof::is_well_typed),
        }
    }

    /// Sum of function costs over the witness (each occurrence counted once)
    pub fn cost(&self) -> f64 {
        match self {
            Proof::Identity { .. } | Proof::Projection { .. } => 0.0,
            Proof::Func(f) => f.cost,
            Proof::Compose { children } | Proof::Tuple { children } => {
                children.iter().map(Proof::cost).sum()
            }
        }
    }

    /// Product of function confidences over the witness
    pub fn confidence(&self) -> f64 {
        match self {
            Proof::Identity { .. } | Proof::Projection { .. } => 1.0,
            Proof::Func(f) => f.conf,
            Proof::Compose { children } | Proof::Tuple { children } => {
                children.iter().map(Proof::confidence).product()
            }
        }
    }

    /// Compact rendering: `∘` between sequential steps, `⟨…⟩` for tuples
    pub fn compact(&self) -> String {
        match self {
            Proof::Identity { ty } => format!("id[{ty}]"),
            Proof::Func(f) => f.id.clone(),
            Proof::Compose { children } => children
                .iter()
                .map(Proof::compact)
                .collect::<Vec<_>>()
                .join(" ∘ "),
            Proof::Tuple { children } => {
                let parts: Vec<String> = children.iter().map(Proof::compact).collect();
                format!("⟨{}⟩", parts.join(", "))
            }
            Proof::Projection { index, .. } => format!("π{index}"),
        }
    }

    /// Indented tree rendering
    pub fn tree(&self) -> String {
        let mut out = String::new();
        self.render_tree(0, &mut out);
        out
    }

    fn render_tree(&self, indent: usize, out: &mut String) {
        let prefix = "  ".repeat(indent);
        match self {
            Proof::Identity { ty } => {
                out.push_str(&format!("{prefix}IDENTITY[{ty}]\n"));
            }
            Proof::Func(f) => {
                out.push_str(&format!("{prefix}FUNC: {} ({})\n", f.id, f.signature()));
            }
            Proof::Compose { children } => {
                out.push_str(&format!("{prefix}COMPOSE:\n"));
                for child in children {
                    child.render_tree(indent + 1, out);
                }
            }
            Proof::Tuple { children } => {
                out.push_str(&format!("{prefix}TUPLE ⟨{}⟩:\n", children.len()));
                for child in children {
                    child.render_tree(indent + 1, out);
                }
            }
            Proof::Projection { index, source, .. } => {
                out.push_str(&format!("{prefix}PROJECTION[{index}] of {source}\n"));
            }
        }
    }
}
