//! Type resolution: turns each pipe's type expression (possibly containing
//! type variables, e.g. `$T`, or a union `$A|$B`) into a concrete type by
//! unifying every pipe's expression against the edges of a finalized
//! `ServiceGraph`. Runs once, after the graph is built and before
//! scheduling begins (spec.md §4.3; the expression grammar is documented
//! in full in *origin: include/runtime/pdt.h*).

use std::collections::HashMap;

use crate::error::{codes, CoreError, DomainError, DomainErrorKind, ErrorCategory};

/// A parsed pipe type expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeExpr {
    /// A concrete, already-resolved type name, e.g. `plumber/std/Raw`.
    Concrete(String),
    /// A reference to a type variable, e.g. `$T`.
    Variable(String),
    /// A compound expression: a named transform applied to a nested
    /// expression, e.g. `compressor/compressed $T`.
    Compound(String, Box<TypeExpr>),
    /// The common-ancestor union of two expressions, e.g. `$A|$B`.
    Union(Box<TypeExpr>, Box<TypeExpr>),
}

impl TypeExpr {
    /// Parses the textual grammar described in `pdt.h`. Deliberately small:
    /// whitespace separates a compound prefix from its nested expression,
    /// `|` separates a union, `$name` marks a variable.
    pub fn parse(src: &str) -> Self {
        if let Some((lhs, rhs)) = src.split_once('|') {
            return TypeExpr::Union(
                Box::new(TypeExpr::parse(lhs.trim())),
                Box::new(TypeExpr::parse(rhs.trim())),
            );
        }
        if let Some((prefix, rest)) = src.split_once(' ') {
            return TypeExpr::Compound(prefix.trim().to_string(), Box::new(TypeExpr::parse(rest.trim())));
        }
        if let Some(var) = src.strip_prefix('$') {
            return TypeExpr::Variable(var.to_string());
        }
        TypeExpr::Concrete(src.to_string())
    }

    fn variables(&self, out: &mut Vec<String>) {
        match self {
            TypeExpr::Concrete(_) => {}
            TypeExpr::Variable(v) => out.push(v.clone()),
            TypeExpr::Compound(_, inner) => inner.variables(out),
            TypeExpr::Union(a, b) => {
                a.variables(out);
                b.variables(out);
            }
        }
    }

    fn substitute(&self, bindings: &HashMap<String, String>) -> Option<String> {
        match self {
            TypeExpr::Concrete(name) => Some(name.clone()),
            TypeExpr::Variable(v) => bindings.get(v).cloned(),
            TypeExpr::Compound(prefix, inner) => {
                inner.substitute(bindings).map(|resolved| format!("{prefix} {resolved}"))
            }
            TypeExpr::Union(a, b) => {
                let ra = a.substitute(bindings);
                let rb = b.substitute(bindings);
                match (ra, rb) {
                    (Some(x), Some(y)) if x == y => Some(x),
                    (Some(x), Some(y)) => Some(common_ancestor(&x, &y)),
                    (Some(x), None) => Some(x),
                    (None, Some(y)) => Some(y),
                    (None, None) => None,
                }
            }
        }
    }
}

/// Placeholder "common ancestor" naming scheme for a union of two concrete
/// types that did not already agree: the original drops extra header bytes
/// down to the shared prefix; this crate only needs a stable name for the
/// resolved union type, the byte-layout truncation is a servlet-runtime
/// concern outside this crate.
fn common_ancestor(a: &str, b: &str) -> String {
    format!("union<{a}|{b}>")
}

/// One edge's type-variable binding: an output pipe's concrete resolved
/// type feeds into the input pipe(s) it connects to, binding any type
/// variables shared between them.
pub struct Binding<'a> {
    pub output_expr: &'a str,
    pub input_expr: &'a str,
}

/// Resolves every `(output_expr, input_expr)` edge pair to concrete types
/// using Gauss-Seidel-style fixpoint iteration: repeat substitution passes
/// until no binding changes, then require every variable bound.
pub struct TypeResolver {
    bindings: HashMap<String, String>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Registers a concrete type discovered for a variable. Conflicting
    /// bindings for the same variable are an error (two incompatible
    /// concrete types cannot unify).
    pub fn bind(&mut self, variable: &str, concrete: &str) -> Result<(), CoreError> {
        match self.bindings.get(variable) {
            Some(existing) if existing != concrete => Err(DomainError::new(
                DomainErrorKind::TypeResolution,
                codes::TYPE_CONFLICTING_BINDING,
                format!("variable ${variable} bound to both {existing} and {concrete}"),
            )
            .into_core(ErrorCategory::ProtocolViolation)),
            _ => {
                self.bindings.insert(variable.to_string(), concrete.to_string());
                Ok(())
            }
        }
    }

    /// Runs the edges through repeated substitution until the set of bound
    /// variables stops growing, then resolves every expression. Returns an
    /// error naming the first pipe whose variables remain unbound.
    pub fn resolve_fixpoint(
        &mut self,
        edges: &[Binding<'_>],
    ) -> Result<Vec<(String, String)>, CoreError> {
        let parsed: Vec<(TypeExpr, TypeExpr)> = edges
            .iter()
            .map(|e| (TypeExpr::parse(e.output_expr), TypeExpr::parse(e.input_expr)))
            .collect();

        loop {
            let mut changed = false;
            for (output, input) in &parsed {
                if let Some(resolved) = output.substitute(&self.bindings) {
                    let mut vars = Vec::new();
                    input.variables(&mut vars);
                    for var in vars {
                        if !self.bindings.contains_key(&var) {
                            self.bind(&var, &resolved)?;
                            changed = true;
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }

        self.results_from(&parsed)
    }

    /// Substitutes `expr` against whatever bindings `resolve_fixpoint` left
    /// behind. Used to find the final type of a PD that never appeared as
    /// an edge endpoint itself (e.g. a `persist` pipe with no peer in this
    /// graph) but still carries a registered type hook that needs a final
    /// type to call back with.
    pub fn resolve_expr(&self, expr: &str) -> Option<String> {
        TypeExpr::parse(expr).substitute(&self.bindings)
    }

    fn results_from(&self, parsed: &[(TypeExpr, TypeExpr)]) -> Result<Vec<(String, String)>, CoreError> {
        let mut results = Vec::with_capacity(parsed.len());
        for (idx, (output, input)) in parsed.iter().enumerate() {
            let out_resolved = output.substitute(&self.bindings).ok_or_else(|| {
                DomainError::new(
                    DomainErrorKind::TypeResolution,
                    codes::TYPE_UNRESOLVED_VARIABLE,
                    format!("edge {idx}: output type expression left unresolved variables"),
                )
                .into_core(ErrorCategory::ProtocolViolation)
            })?;
            let in_resolved = input.substitute(&self.bindings).unwrap_or_else(|| out_resolved.clone());
            results.push((out_resolved, in_resolved));
        }
        Ok(results)
    }
}

impl Default for TypeResolver {
    fn default() -> Self {
        Self::new()
    }
}
