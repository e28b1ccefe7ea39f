use core::{fmt, panic::Location};
use std::sync::Arc;

use super::{Middleware, Next};
use crate::{
    failure::{Failure, Thrown},
    wrap::run_sync,
};

/// An ordered chain of [`Middleware`].
///
/// Cloning a pipeline is cheap; clones share their middleware.
pub struct Pipeline<T> {
    middleware: Vec<Arc<dyn Middleware<T>>>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            middleware: self.middleware.clone(),
        }
    }
}

impl<T: 'static> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn run_chain<T: 'static>(middleware: &[Arc<dyn Middleware<T>>], op: Next<'_, T>) -> Result<T, Failure> {
    match middleware.split_first() {
        None => op(),
        Some((outer, rest)) => outer.handle(&mut || run_chain(rest, &mut *op)),
    }
}

impl<T: 'static> Pipeline<T> {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    /// Appends `middleware` below the existing ones.
    #[must_use]
    pub fn with(mut self, middleware: impl Middleware<T>) -> Self {
        self.push(middleware);
        self
    }

    /// Appends `middleware` below the existing ones.
    pub fn push(&mut self, middleware: impl Middleware<T>) {
        self.middleware.push(Arc::new(middleware));
    }

    /// Number of middleware in the pipeline.
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// Returns `true` if the pipeline has no middleware.
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Names of the middleware, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Runs `op` through the pipeline. Errors and panics of `op` become
    /// failures as with [`try_sync`](crate::try_sync).
    #[track_caller]
    pub fn execute<E, F>(&self, mut op: F) -> Result<T, Failure>
    where
        F: FnMut() -> Result<T, E>,
        E: Into<Thrown>,
    {
        let caller = Location::caller();
        run_chain(&self.middleware, &mut || run_sync(&mut op, None, caller))
    }

    /// Runs an already computed result through the pipeline.
    ///
    /// Middleware that re-runs the chain sees the same result again.
    pub fn apply(&self, result: Result<T, Failure>) -> Result<T, Failure>
    where
        T: Clone,
    {
        run_chain(&self.middleware, &mut || result.clone())
    }
}

impl<T: 'static> Middleware<T> for Pipeline<T> {
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
        run_chain(&self.middleware, next)
    }

    fn name(&self) -> &str {
        "pipeline"
    }
}

impl<T: 'static> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{Kind, create_error};

    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl<T: 'static> Middleware<T> for Record {
        fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
            self.log.lock().unwrap().push(format!("enter {}", self.label));
            let result = next();
            self.log.lock().unwrap().push(format!("leave {}", self.label));
            result
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    struct ShortCircuit;

    impl Middleware<u8> for ShortCircuit {
        fn handle(&self, _next: Next<'_, u8>) -> Result<u8, Failure> {
            Ok(0)
        }
    }

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Record {
        Record {
            label,
            log: log.clone(),
        }
    }

    #[test]
    fn test_pipeline_send_sync() {
        static_assertions::assert_impl_all!(Pipeline<u8>: Send, Sync, Clone);
    }

    #[test]
    fn test_first_added_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with(recorder("a", &log))
            .with(recorder("b", &log));
        assert_eq!(pipeline.names(), ["a", "b"]);
        assert_eq!(pipeline.execute(|| Ok::<_, Failure>(1)).unwrap(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            ["enter a", "enter b", "leave b", "leave a"]
        );
    }

    #[test]
    fn test_short_circuit_skips_operation() {
        let mut ran = false;
        let result = Pipeline::new().with(ShortCircuit).execute(|| {
            ran = true;
            Ok::<u8, Failure>(9)
        });
        assert_eq!(result.unwrap(), 0);
        assert!(!ran);
    }

    #[test]
    fn test_nested_pipelines() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = Pipeline::new().with(recorder("inner", &log));
        let outer = Pipeline::new().with(recorder("outer", &log)).with(inner);
        assert_eq!(outer.len(), 2);
        assert_eq!(outer.names(), ["outer", "pipeline"]);
        outer.execute(|| Ok::<_, Failure>(())).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            ["enter outer", "enter inner", "leave inner", "leave outer"]
        );
    }

    #[test]
    fn test_apply_and_empty_pipeline() {
        let pipeline: Pipeline<u8> = Pipeline::default();
        assert!(pipeline.is_empty());
        let failure = create_error(Kind::IO, "x", None, None);
        assert_eq!(pipeline.apply(Err(failure)).unwrap_err().message(), "x");
        assert_eq!(pipeline.apply(Ok(4)).unwrap(), 4);
    }
}
