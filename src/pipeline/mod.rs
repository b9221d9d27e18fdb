// src/pipeline/mod.rs

//! Sequential task pipelines with snapshot-based rollback.
//!
//! A [`Pipeline<I, C>`] starts from an initial context of type `I` and, after
//! every declared step, holds a context of type `C`. Each step returns a
//! *patch*; the patch is folded into the context through [`Merge`], whose
//! associated `Output` becomes the context type seen by later steps. Steps
//! declared with an `enabled` predicate merge `Option<P>` instead of `P`, so
//! their contribution is optional in the type as well.
//!
//! Before each step runs, a snapshot of the context is pushed onto a journal
//! together with the step's rollback handler. When a step fails, the journal
//! is unwound newest-first, then a [`PipelineError`](crate::errors::PipelineError)
//! carrying the pre-failure snapshot is returned.

mod builder;
mod journal;
mod step;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

pub use builder::Pipeline;
pub use step::{StepHandle, StepOptions, StepRetry};

/// Bounds every pipeline context must satisfy.
pub trait Context: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Context for T {}

/// Fold a step's patch into the context.
///
/// Fields present in the patch replace the context's fields wholesale; there
/// is no deep merge.
pub trait Merge<P> {
    type Output: Context;

    fn merge(self, patch: P) -> Self::Output;
}

/// Steps that only have side effects leave the context untouched.
impl<C: Context> Merge<()> for C {
    type Output = C;

    fn merge(self, _patch: ()) -> C {
        self
    }
}

impl<C: Context> Merge<Option<()>> for C {
    type Output = C;

    fn merge(self, _patch: Option<()>) -> C {
        self
    }
}

macro_rules! map_merge {
    ($map:ident, $($bound:path),+) => {
        impl<K, V> Merge<$map<K, V>> for $map<K, V>
        where
            K: $($bound +)+ Clone + Send + Sync + 'static,
            V: Clone + Send + Sync + 'static,
        {
            type Output = Self;

            fn merge(mut self, patch: $map<K, V>) -> Self {
                self.extend(patch);
                self
            }
        }

        impl<K, V> Merge<Option<$map<K, V>>> for $map<K, V>
        where
            K: $($bound +)+ Clone + Send + Sync + 'static,
            V: Clone + Send + Sync + 'static,
        {
            type Output = Self;

            fn merge(self, patch: Option<$map<K, V>>) -> Self {
                match patch {
                    Some(patch) => self.merge(patch),
                    None => self,
                }
            }
        }
    };
}

map_merge!(BTreeMap, Ord);
map_merge!(HashMap, Eq, Hash);

/// Lifecycle of one pipeline run, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running(usize),
    RollingBack,
    Succeeded,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Running(index) => write!(f, "running step {index}"),
            PipelineState::RollingBack => f.write_str("rolling back"),
            PipelineState::Succeeded => f.write_str("succeeded"),
            PipelineState::Failed => f.write_str("failed"),
        }
    }
}
