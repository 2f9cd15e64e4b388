//! Registry of leaf functions callable through [`Expression::Call`](crate::expr::Expression::Call).
//!
//! The expression core only knows the protocol a function takes part in: its result
//! type and the context facets it reads. What a function computes is up to the host.

use crate::expr::value::Value;
use crate::expr::{DataType, Dependencies};
use crate::model::ExpandedName;
use crate::runtime::{Context, Error, ErrorCode};
use core::fmt;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;

pub type Arity = usize;

pub type FunctionImpl<N> =
    Arc<dyn Fn(&Context<N>, &[Value<N>]) -> Result<Value<N>, Error> + Send + Sync>;

/// A registered implementation together with its declared static properties.
pub struct FunctionEntry<N> {
    pub implementation: FunctionImpl<N>,
    pub min_arity: Arity,
    pub max_arity: Option<Arity>,
    pub data_type: DataType,
    /// Facets the implementation reads from the context it is handed. A function
    /// with no dependencies is folded at simplification time when all its arguments
    /// are literals.
    pub dependencies: Dependencies,
}

impl<N> Clone for FunctionEntry<N> {
    fn clone(&self) -> Self {
        Self {
            implementation: Arc::clone(&self.implementation),
            min_arity: self.min_arity,
            max_arity: self.max_arity,
            data_type: self.data_type,
            dependencies: self.dependencies,
        }
    }
}

impl<N> fmt::Debug for FunctionEntry<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("min_arity", &self.min_arity)
            .field("max_arity", &self.max_arity)
            .field("data_type", &self.data_type)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl<N> FunctionEntry<N> {
    fn accepts(&self, arity: Arity) -> bool {
        arity >= self.min_arity && self.max_arity.is_none_or(|m| arity <= m)
    }
}

/// Error type returned by function resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    Unknown(ExpandedName),
    /// The function exists, but not for the requested arity.
    WrongArity { name: ExpandedName, available: Vec<Arity> },
}

impl From<ResolveError> for Error {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Unknown(name) => {
                Error::from_code(ErrorCode::XPST0017, format!("unknown function {name}"))
            }
            ResolveError::WrongArity { name, available } => Error::from_code(
                ErrorCode::XPST0017,
                format!("function {name} cannot take this many arguments (have {available:?})"),
            ),
        }
    }
}

pub struct FunctionRegistry<N> {
    fns: HashMap<ExpandedName, Vec<FunctionEntry<N>>>,
}

impl<N> Default for FunctionRegistry<N> {
    fn default() -> Self {
        Self { fns: HashMap::new() }
    }
}

impl<N> fmt::Debug for FunctionRegistry<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry").field("names", &self.fns.len()).finish()
    }
}

impl<N> FunctionRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation for an arity range. `max_arity = None` is variadic.
    /// When ranges overlap the most specific one (highest minimum, then smallest
    /// maximum) wins.
    pub fn register_range(
        &mut self,
        name: ExpandedName,
        min_arity: Arity,
        max_arity: Option<Arity>,
        entry: FunctionEntry<N>,
    ) {
        let entry = FunctionEntry { min_arity, max_arity, ..entry };
        let overloads = self.fns.entry(name).or_default();
        overloads.push(entry);
        overloads.sort_by(|a, b| {
            b.min_arity.cmp(&a.min_arity).then_with(|| match (a.max_arity, b.max_arity) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => core::cmp::Ordering::Less,
                (None, Some(_)) => core::cmp::Ordering::Greater,
                (None, None) => core::cmp::Ordering::Equal,
            })
        });
    }

    /// Register `f` for exactly `arity` arguments with its declared result type and
    /// context dependencies.
    pub fn register<F>(
        &mut self,
        name: ExpandedName,
        arity: Arity,
        data_type: DataType,
        dependencies: Dependencies,
        f: F,
    ) where
        F: 'static + Send + Sync + Fn(&Context<N>, &[Value<N>]) -> Result<Value<N>, Error>,
    {
        let entry = FunctionEntry {
            implementation: Arc::new(f),
            min_arity: arity,
            max_arity: Some(arity),
            data_type,
            dependencies,
        };
        self.register_range(name, arity, Some(arity), entry);
    }

    /// Convenience: a context-free function of unknown result type.
    pub fn register_fn<F>(&mut self, name: ExpandedName, arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&Context<N>, &[Value<N>]) -> Result<Value<N>, Error>,
    {
        self.register(name, arity, DataType::Any, Dependencies::empty(), f);
    }

    /// Convenience: register a function in a namespace using ns URI and local name.
    pub fn register_ns<F>(&mut self, ns_uri: &str, local: &str, arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&Context<N>, &[Value<N>]) -> Result<Value<N>, Error>,
    {
        self.register_fn(ExpandedName::new(Some(ns_uri), local), arity, f);
    }

    pub fn register_local<F>(&mut self, local: &str, arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&Context<N>, &[Value<N>]) -> Result<Value<N>, Error>,
    {
        self.register_fn(ExpandedName::local(local), arity, f);
    }

    pub fn resolve(
        &self,
        name: &ExpandedName,
        arity: Arity,
    ) -> Result<&FunctionEntry<N>, ResolveError> {
        let Some(candidates) = self.fns.get(name) else {
            return Err(ResolveError::Unknown(name.clone()));
        };
        if let Some(entry) = candidates.iter().find(|e| e.accepts(arity)) {
            return Ok(entry);
        }
        let available: Vec<Arity> = candidates
            .iter()
            .filter_map(|e| e.max_arity.map(|max| e.min_arity..=max))
            .flatten()
            .sorted_unstable()
            .dedup()
            .collect();
        Err(ResolveError::WrongArity { name: name.clone(), available })
    }

    pub fn contains(&self, name: &ExpandedName, arity: Arity) -> bool {
        self.resolve(name, arity).is_ok()
    }
}
