//! Execution backends for solver dispatch

use crate::error::{RegulonError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Where solver fits run. Every variant builds its own rayon pool per
/// call, so nested parallel work inside a solver never lands on the
/// global pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum ExecutionContext {
    /// One solver after another on a single worker
    #[default]
    Sequential,
    /// Solvers fitted concurrently; `n_threads = 0` uses every core
    ThreadPool { n_threads: usize },
}

impl ExecutionContext {
    pub fn sequential() -> Self {
        ExecutionContext::Sequential
    }

    pub fn thread_pool(n_threads: usize) -> Self {
        ExecutionContext::ThreadPool { n_threads }
    }

    /// Worker count the pool will be built with
    pub fn num_threads(&self) -> usize {
        match *self {
            ExecutionContext::Sequential => 1,
            ExecutionContext::ThreadPool { n_threads: 0 } => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            ExecutionContext::ThreadPool { n_threads } => n_threads,
        }
    }

    fn build_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads())
            .thread_name(|i| format!("regulon-worker-{}", i))
            .build()
            .map_err(|e| RegulonError::ThreadPoolError(e.to_string()))
    }

    /// Apply `f` to every item; output order follows input order
    pub fn map<T, U, F>(&self, items: &[T], f: F) -> Result<Vec<U>>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Send + Sync,
    {
        let pool = self.build_pool()?;
        let out: Vec<U> = match self {
            ExecutionContext::Sequential => pool.install(|| items.iter().map(&f).collect()),
            ExecutionContext::ThreadPool { .. } => pool.install(|| items.par_iter().map(&f).collect()),
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_preserves_order() {
        let items: Vec<u64> = (0..64).collect();
        for ctx in [ExecutionContext::sequential(), ExecutionContext::thread_pool(4)] {
            let out = ctx.map(&items, |x| x * x).unwrap();
            assert_eq!(out, items.iter().map(|x| x * x).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_thread_counts() {
        assert_eq!(ExecutionContext::sequential().num_threads(), 1);
        assert_eq!(ExecutionContext::thread_pool(3).num_threads(), 3);
        assert!(ExecutionContext::thread_pool(0).num_threads() >= 1);
    }

    #[test]
    fn test_pool_runs_on_named_workers() {
        let ctx = ExecutionContext::thread_pool(2);
        let names = ctx
            .map(&[0, 1], |_| std::thread::current().name().map(|s| s.to_string()))
            .unwrap();
        assert!(names.iter().all(|n| n.as_deref().map_or(false, |s| s.starts_with("regulon-worker-"))));
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&ExecutionContext::thread_pool(8)).unwrap();
        assert_eq!(json, r#"{"backend":"thread-pool","n_threads":8}"#);
        let back: ExecutionContext = serde_json::from_str(r#"{"backend":"sequential"}"#).unwrap();
        assert_eq!(back, ExecutionContext::Sequential);
    }
}
